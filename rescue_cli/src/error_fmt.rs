//! Human-readable error descriptions and structured JSON error formatting.

use rescue_core::{DetectorError, EngineError};
use rescue_sim::error::SimError;

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(ee) = err.downcast_ref::<EngineError>() {
        return match ee {
            EngineError::ProtocolNotFound(id) => format!(
                "What happened: Protocol {id} is not registered.\nLikely causes: Wrong id, or the protocol file was not loaded (check [protocols] in the config).\nHow to fix: Run `rescue protocols list` to see the available ids."
            ),
            EngineError::InvalidProtocol { .. } => format!(
                "What happened: {ee}.\nLikely causes: A step with a non-positive duration or dose, an empty step list, or a missing field.\nHow to fix: Correct the entry in the protocol file and run `rescue protocols validate <file>`."
            ),
            EngineError::TimerArm(msg) => format!(
                "What happened: The timer for the next dose could not be armed ({msg}); the run was cancelled.\nLikely causes: The system is out of threads or memory.\nHow to fix: Free system resources, then start the protocol again."
            ),
            EngineError::InvalidDose(msg) => format!(
                "What happened: Manual dose rejected ({msg}).\nLikely causes: Zero, negative or non-numeric dose.\nHow to fix: Enter a dose in mg greater than 0, e.g. `dispense 2.5 Midazolam`."
            ),
        };
    }

    if let Some(de) = err.downcast_ref::<DetectorError>() {
        return format!(
            "What happened: Seizure detection could not start ({de}).\nLikely causes: detection.interval_ms is 0 or the timer backend failed.\nHow to fix: Set [detection] interval_ms >= 1 and retry."
        );
    }

    if let Some(SimError::Probability(p)) = err.downcast_ref::<SimError>() {
        return format!(
            "What happened: Detection probability {p} is out of range.\nLikely causes: A typo in --probability or [detection] probability.\nHow to fix: Use a value between 0.0 and 1.0."
        );
    }

    // String-based heuristics for errors coming from config or import files
    let chain = format!("{err:#}");
    let lower = chain.to_ascii_lowercase();

    if lower.contains("invalid configuration") || lower.contains("parse config") {
        return format!(
            "What happened: Configuration is invalid ({chain}).\nLikely causes: Out-of-range values or a typo in the TOML.\nHow to fix: Edit the config file and try again."
        );
    }

    if lower.contains("read config") {
        return format!(
            "What happened: The config file could not be read ({chain}).\nLikely causes: Wrong --config path or missing permissions.\nHow to fix: Point --config at an existing TOML file."
        );
    }

    if lower.contains("protocol entries") && lower.contains("rejected") {
        return format!(
            "What happened: {chain}.\nLikely causes: Malformed entries in the protocol file.\nHow to fix: Fix the listed entry and run `rescue protocols validate <file>` again."
        );
    }

    if lower.contains("protocol file") || lower.contains("protocol import") {
        return format!(
            "What happened: The protocol file could not be loaded ({chain}).\nLikely causes: Missing file or invalid JSON.\nHow to fix: Check the path and that the file holds a JSON object or array."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {err}"
    )
}

/// Stable exit codes: 2 config, 3 unknown protocol, 4 invalid protocol,
/// 5 timer failure, 6 invalid dose, 1 anything else.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if let Some(ee) = err.chain().find_map(|e| e.downcast_ref::<EngineError>()) {
        return match ee {
            EngineError::ProtocolNotFound(_) => 3,
            EngineError::InvalidProtocol { .. } => 4,
            EngineError::TimerArm(_) => 5,
            EngineError::InvalidDose(_) => 6,
        };
    }
    let chain = format!("{err:#}").to_ascii_lowercase();
    if chain.contains("invalid configuration")
        || chain.contains("parse config")
        || chain.contains("read config")
    {
        return 2;
    }
    1
}

fn reason_name(err: &eyre::Report) -> &'static str {
    match err.chain().find_map(|e| e.downcast_ref::<EngineError>()) {
        Some(EngineError::ProtocolNotFound(_)) => "ProtocolNotFound",
        Some(EngineError::InvalidProtocol { .. }) => "InvalidProtocol",
        Some(EngineError::TimerArm(_)) => "TimerArmFailure",
        Some(EngineError::InvalidDose(_)) => "InvalidDose",
        None => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let details = match err.chain().find_map(|e| e.downcast_ref::<EngineError>()) {
        Some(EngineError::ProtocolNotFound(id)) => Some(json!({ "protocol_id": id })),
        Some(EngineError::InvalidProtocol { index, id, reason }) => {
            Some(json!({ "index": index, "protocol_id": id, "reason": reason }))
        }
        _ => None,
    };

    let obj = match details {
        Some(d) => json!({ "reason": reason_name(err), "details": d, "message": humanize(err) }),
        None => json!({ "reason": reason_name(err), "message": humanize(err) }),
    };
    obj.to_string()
}
