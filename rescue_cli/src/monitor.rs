//! `monitor` and `start` commands: run the engine against live events.

use crate::app::App;
use crate::output::{render_event, render_status};
use crossbeam_channel as xch;
use eyre::{WrapErr, bail, eyre};
use rescue_core::{
    CancelReason, DetectionRouter, Detector, EngineError, EngineEvent, RunId, SeizureMark,
};
use rescue_sim::RandomPredicate;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

/// Operator override typed on stdin.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start(u32),
    Cancel,
    Dispense { dose_mg: f64, medication: String },
    Mark(SeizureMark),
    Auto(bool),
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "commands: start <id> | cancel | dispense <mg> [medication] | mark start|stop | auto on|off | status | quit";

/// Parse one stdin line. Blank lines and `#` comments yield `None`.
pub fn parse_command(line: &str) -> eyre::Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut words = line.split_whitespace();
    let head = words.next().unwrap_or_default().to_ascii_lowercase();
    let cmd = match head.as_str() {
        "start" => {
            let id = words.next().ok_or_else(|| eyre!("usage: start <id>"))?;
            Command::Start(
                id.parse()
                    .wrap_err_with(|| format!("protocol id must be a number, got {id:?}"))?,
            )
        }
        "cancel" | "stop" => Command::Cancel,
        "dispense" => {
            let dose = words
                .next()
                .ok_or_else(|| eyre!("usage: dispense <mg> [medication]"))?;
            let dose_mg: f64 = dose
                .parse()
                .wrap_err_with(|| format!("dose must be a number, got {dose:?}"))?;
            let medication = words.collect::<Vec<_>>().join(" ");
            Command::Dispense {
                dose_mg,
                medication,
            }
        }
        "mark" => match words.next().map(str::to_ascii_lowercase).as_deref() {
            Some("start") => Command::Mark(SeizureMark::Start),
            Some("stop") => Command::Mark(SeizureMark::Stop),
            _ => bail!("usage: mark start|stop"),
        },
        "auto" => match words.next().map(str::to_ascii_lowercase).as_deref() {
            Some("on") => Command::Auto(true),
            Some("off") => Command::Auto(false),
            _ => bail!("usage: auto on|off"),
        },
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => bail!("unknown command {other:?}; {HELP}"),
    };
    Ok(Some(cmd))
}

/// Channel closed by the first Ctrl-C.
fn install_interrupt() -> eyre::Result<xch::Receiver<()>> {
    let (tx, rx) = xch::bounded(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })
    .wrap_err("install Ctrl-C handler")?;
    Ok(rx)
}

fn spawn_stdin_reader() -> xch::Receiver<String> {
    let (tx, rx) = xch::unbounded();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

pub struct MonitorOpts {
    pub for_secs: Option<u64>,
    pub auto_mode: bool,
    pub interval_ms: u64,
    pub probability: f64,
    pub seed: Option<u64>,
    pub read_stdin: bool,
}

enum Flow {
    Continue,
    Quit,
}

fn handle(cmd: Command, app: &App, router: &DetectionRouter, json: bool) -> Flow {
    let result = match cmd {
        Command::Start(id) => app.engine.start(id).map(|_| ()),
        Command::Cancel => {
            if !app.engine.cancel() {
                println!("Nothing to cancel");
            }
            Ok(())
        }
        Command::Dispense {
            dose_mg,
            medication,
        } => app.engine.manual_dispense(dose_mg, &medication),
        Command::Mark(mark) => {
            app.engine.mark_seizure(mark);
            Ok(())
        }
        Command::Auto(on) => {
            router.set_auto_mode(on);
            println!("Auto-mode {}", if on { "on" } else { "off" });
            Ok(())
        }
        Command::Status => {
            println!(
                "{}",
                render_status(&app.engine.status(), router.auto_mode(), json)
            );
            Ok(())
        }
        Command::Help => {
            println!("{HELP}");
            Ok(())
        }
        Command::Quit => return Flow::Quit,
    };
    if let Err(e) = result {
        eprintln!("{}", crate::error_fmt::humanize(&eyre::Report::new(e)));
    }
    Flow::Continue
}

pub fn run_monitor(app: &App, opts: &MonitorOpts, json: bool) -> eyre::Result<()> {
    let events = app.bus.subscribe_channel();
    let interrupted = install_interrupt()?;

    let default_id = app.cfg.detection.default_protocol_id;
    if app.store.get(default_id).is_none() {
        tracing::warn!(
            protocol_id = default_id,
            "default protocol is not registered; auto-starts will fail"
        );
    }
    let router = Arc::new(DetectionRouter::new(
        app.engine.clone(),
        default_id,
        opts.auto_mode,
    ));
    let predicate = RandomPredicate::new(opts.probability, opts.seed)?;
    let detector = Detector::new(
        predicate,
        Duration::from_millis(opts.interval_ms),
        app.timer.clone(),
        router.handler(),
    )?;
    detector.start()?;
    tracing::info!(
        interval_ms = opts.interval_ms,
        probability = opts.probability,
        auto_mode = opts.auto_mode,
        "monitoring"
    );
    if !json {
        println!(
            "Monitoring (auto-mode {}, {} protocols). {HELP}",
            if opts.auto_mode { "on" } else { "off" },
            app.store.len()
        );
    }

    let mut commands = if opts.read_stdin {
        spawn_stdin_reader()
    } else {
        xch::never()
    };
    let deadline = opts
        .for_secs
        .map(|s| xch::after(Duration::from_secs(s)))
        .unwrap_or_else(xch::never);

    loop {
        xch::select! {
            recv(events) -> ev => {
                if let Ok(ev) = ev {
                    println!("{}", render_event(&ev, json));
                }
            }
            recv(commands) -> line => match line {
                Ok(line) => match parse_command(&line) {
                    Ok(Some(cmd)) => {
                        if let Flow::Quit = handle(cmd, app, &router, json) {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => eprintln!("{e:#}"),
                },
                // stdin closed: keep monitoring until interrupted or timed out
                Err(_) => commands = xch::never(),
            },
            recv(interrupted) -> _ => {
                tracing::info!("interrupted");
                break;
            }
            recv(deadline) -> _ => break,
        }
    }

    detector.stop();
    app.engine.cancel();
    for ev in events.try_iter() {
        println!("{}", render_event(&ev, json));
    }
    print_summary(app, detector.checks(), detector.detections(), json);
    Ok(())
}

fn print_summary(app: &App, checks: u64, detections: u64, json: bool) {
    let given = app.pump.administrations();
    if json {
        println!(
            "{}",
            serde_json::json!({
                "summary": {
                    "checks": checks,
                    "detections": detections,
                    "doses": given.len(),
                    "total_mg": app.pump.total_mg(),
                }
            })
        );
    } else {
        println!(
            "Stopped after {checks} checks, {detections} detections; {} doses given ({:.2} mg total)",
            given.len(),
            app.pump.total_mg()
        );
    }
}

/// Start one protocol and block until its run ends.
pub fn run_start(app: &App, protocol_id: u32, json: bool) -> eyre::Result<()> {
    let events = app.bus.subscribe_channel();
    let interrupted = install_interrupt()?;

    let run: RunId = app.engine.start(protocol_id)?;
    let outcome = loop {
        xch::select! {
            recv(events) -> ev => {
                let Ok(ev) = ev else { bail!("event stream closed") };
                println!("{}", render_event(&ev, json));
                if ev.is_terminal() && ev.run() == Some(run) {
                    break ev;
                }
            }
            recv(interrupted) -> _ => {
                tracing::info!(%run, "interrupted; cancelling run");
                app.engine.cancel();
            }
        }
    };

    match outcome {
        EngineEvent::ProtocolCompleted { .. } => {
            if !json {
                println!(
                    "{} doses given ({:.2} mg total)",
                    app.pump.administrations().len(),
                    app.pump.total_mg()
                );
            }
            Ok(())
        }
        EngineEvent::ProtocolCancelled {
            reason: CancelReason::TimerFailure(msg),
            ..
        } => Err(EngineError::TimerArm(msg).into()),
        _ => bail!("protocol run was interrupted before completion"),
    }
}
