mod app;
mod cli;
mod error_fmt;
mod monitor;
mod output;

use clap::Parser;
use cli::{Cli, Commands, FILE_GUARD, JSON_MODE, ProtocolsCmd};
use eyre::{WrapErr, bail, eyre};
use rescue_config::{Config, ProtocolDoc};
use rescue_core::{EventBus, ProtocolStore, ThreadTimer};
use rescue_traits::Timer;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    if let Err(e) = run(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", error_fmt::format_error_json(&e));
        } else {
            eprintln!("{}", error_fmt::humanize(&e));
        }
        std::process::exit(error_fmt::exit_code_for_error(&e));
    }
}

fn run(cli: Cli) -> eyre::Result<()> {
    color_eyre::install()?;
    let cfg = app::load_config(cli.config.as_deref())?;
    init_tracing(&cli, &cfg)?;
    tracing::debug!(?cfg, "config loaded");

    match cli.cmd {
        Commands::Monitor {
            for_secs,
            speedup,
            no_auto,
            interval_ms,
            probability,
            seed,
            no_stdin,
        } => {
            let opts = monitor::MonitorOpts {
                for_secs,
                auto_mode: cfg.detection.auto_mode && !no_auto,
                interval_ms: interval_ms.unwrap_or(cfg.detection.interval_ms),
                probability: probability.unwrap_or(cfg.detection.probability),
                seed: seed.or(cfg.detection.seed),
                read_stdin: !no_stdin,
            };
            let app = app::App::assemble(cfg, cli.protocols.as_deref(), speedup)?;
            monitor::run_monitor(&app, &opts, cli.json)
        }
        Commands::Start { protocol, speedup } => {
            let app = app::App::assemble(cfg, cli.protocols.as_deref(), speedup)?;
            monitor::run_start(&app, protocol, cli.json)
        }
        Commands::Protocols {
            cmd: ProtocolsCmd::List,
        } => list_protocols(&cfg, cli.protocols.as_deref(), cli.json),
        Commands::Protocols {
            cmd: ProtocolsCmd::Validate { file },
        } => validate_protocols(&file, cli.json),
        Commands::SelfCheck => self_check(&cfg, cli.protocols.as_deref(), cli.json),
    }
}

fn init_tracing(cli: &Cli, cfg: &Config) -> eyre::Result<()> {
    use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

    let console_filter = EnvFilter::try_new(&cli.log_level)
        .wrap_err_with(|| format!("invalid --log-level {:?}", cli.log_level))?;
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    // stderr keeps stdout free for events
    if cli.json {
        layers.push(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_filter(console_filter)
                .boxed(),
        );
    } else {
        layers.push(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_filter(console_filter)
                .boxed(),
        );
    }

    if let Some(file) = cfg.logging.file.as_deref() {
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .ok_or_else(|| eyre!("logging.file {file:?} has no file name"))?;
        let appender = match cfg.logging.rotation.as_deref().unwrap_or("never") {
            "daily" => tracing_appender::rolling::daily(dir, name),
            "hourly" => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        let level = cfg.logging.level.as_deref().unwrap_or("info");
        let file_filter = EnvFilter::try_new(level)
            .wrap_err_with(|| format!("invalid logging.level {level:?}"))?;
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(file_filter)
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .wrap_err("init tracing")?;
    Ok(())
}

fn list_protocols(cfg: &Config, file: Option<&Path>, json: bool) -> eyre::Result<()> {
    let store = app::load_store(cfg, file, Arc::new(EventBus::new()))?;
    let protocols = store.list();
    if json {
        let docs: Vec<ProtocolDoc> = protocols.iter().map(|p| ProtocolDoc::from(&**p)).collect();
        println!("{}", serde_json::to_string(&docs)?);
        return Ok(());
    }
    if protocols.is_empty() {
        println!("No protocols registered");
        return Ok(());
    }
    println!(
        "{:>4}  {:<28} {:>5} {:>9} {:>9}",
        "ID", "NAME", "STEPS", "TOTAL_MIN", "THRESHOLD"
    );
    for p in protocols {
        println!(
            "{:>4}  {:<28} {:>5} {:>9.2} {:>9.2}",
            p.id,
            p.name,
            p.steps.len(),
            p.total_duration,
            p.seizure_duration_threshold
        );
    }
    Ok(())
}

fn validate_protocols(file: &Path, json: bool) -> eyre::Result<()> {
    let store = ProtocolStore::new(Arc::new(EventBus::new()));
    let ids = rescue_core::store::import_file_strict(&store, file)?;
    if json {
        println!("{}", serde_json::json!({ "valid": true, "protocol_ids": ids }));
    } else {
        println!("{} valid protocol(s) in {}", ids.len(), file.display());
    }
    Ok(())
}

fn self_check(cfg: &Config, file: Option<&Path>, json: bool) -> eyre::Result<()> {
    let store = app::load_store(cfg, file, Arc::new(EventBus::new()))?;
    let default_id = cfg.detection.default_protocol_id;
    if store.get(default_id).is_none() {
        bail!("detection.default_protocol_id {default_id} is not a registered protocol");
    }

    let timer = ThreadTimer::new();
    let (tx, rx) = crossbeam_channel::bounded(1);
    let _handle = timer
        .arm(
            Duration::from_millis(1),
            Box::new(move || {
                let _ = tx.send(());
            }),
        )
        .map_err(|e| eyre!("arm timer: {e}"))?;
    rx.recv_timeout(Duration::from_secs(2))
        .wrap_err("timer backend did not fire")?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "ok": true, "protocols": store.len(), "default_protocol_id": default_id })
        );
    } else {
        println!("OK: {} protocols, timer ok", store.len());
    }
    Ok(())
}
