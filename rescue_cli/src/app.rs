//! Config loading and engine assembly shared by all subcommands.

use eyre::{WrapErr, bail};
use rescue_config::Config;
use rescue_core::{
    EventBus, ExecutionEngine, JsonlEventLog, ProtocolStore, ThreadTimer, default_protocol,
};
use rescue_sim::SimulatedPump;
use rescue_traits::SystemClock;
use std::path::Path;
use std::sync::Arc;

use crate::cli::DEFAULT_CONFIG;

/// Load and validate the config. An explicit path must exist; the default one may not.
pub fn load_config(explicit: Option<&Path>) -> eyre::Result<Config> {
    let path = match explicit {
        Some(p) => p,
        None => {
            let p = Path::new(DEFAULT_CONFIG);
            if !p.exists() {
                return Ok(Config::default());
            }
            p
        }
    };
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg = rescue_config::load_toml(&text)
        .wrap_err_with(|| format!("parse config {}", path.display()))?;
    cfg.validate().wrap_err("invalid configuration")?;
    Ok(cfg)
}

/// Everything a running command needs, wired together.
pub struct App {
    pub cfg: Config,
    pub bus: Arc<EventBus>,
    pub store: Arc<ProtocolStore>,
    pub engine: ExecutionEngine,
    pub timer: Arc<ThreadTimer>,
    pub pump: Arc<SimulatedPump>,
}

pub fn effective_speedup(cfg: &Config, cli: Option<f64>) -> eyre::Result<f64> {
    match cli {
        Some(s) if !(s.is_finite() && s > 0.0) => {
            bail!("--speedup must be a finite number > 0, got {s}")
        }
        Some(s) => Ok(s),
        None => Ok(cfg.timer.speedup),
    }
}

/// Register the built-in protocol (unless disabled) and import the protocol file.
///
/// Rejected import entries are logged and skipped; valid ones are kept.
pub fn load_store(
    cfg: &Config,
    protocols_override: Option<&Path>,
    bus: Arc<EventBus>,
) -> eyre::Result<Arc<ProtocolStore>> {
    let store = Arc::new(ProtocolStore::new(bus));
    if cfg.protocols.include_default {
        store
            .register(default_protocol())
            .wrap_err("register built-in protocol")?;
    }
    if let Some(file) = protocols_override.or(cfg.protocols.file.as_deref()) {
        let report = store.import_file(file)?;
        for rejected in &report.rejected {
            tracing::warn!(file = %file.display(), error = %rejected, "protocol entry skipped");
        }
    }
    Ok(store)
}

impl App {
    pub fn assemble(
        cfg: Config,
        protocols_override: Option<&Path>,
        speedup: Option<f64>,
    ) -> eyre::Result<Self> {
        let speedup = effective_speedup(&cfg, speedup)?;
        let bus = Arc::new(EventBus::new());
        let store = load_store(&cfg, protocols_override, bus.clone())?;

        let pump = Arc::new(SimulatedPump::new());
        bus.subscribe(pump.clone());
        if let Some(path) = cfg.logging.events_file.as_ref() {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)
                    .wrap_err_with(|| format!("create event log directory {}", dir.display()))?;
            }
            tracing::info!(path = %path.display(), "event log enabled");
            bus.subscribe(Arc::new(JsonlEventLog::new(path)));
        }

        let timer = Arc::new(ThreadTimer::with_speedup(speedup));
        let engine = ExecutionEngine::new(
            store.clone(),
            bus.clone(),
            Arc::new(SystemClock::new()),
            timer.clone(),
        );
        tracing::debug!(protocols = store.len(), speedup, "engine assembled");

        Ok(Self {
            cfg,
            bus,
            store,
            engine,
            timer,
            pump,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn include_default_can_be_disabled() {
        let mut cfg = Config::default();
        cfg.protocols.include_default = false;
        let store = load_store(&cfg, None, Arc::new(EventBus::new())).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn bad_speedup_override_is_rejected() {
        let cfg = Config::default();
        assert!(effective_speedup(&cfg, Some(0.0)).is_err());
        assert!((effective_speedup(&cfg, None).unwrap() - 1.0).abs() < f64::EPSILON);
    }
}
