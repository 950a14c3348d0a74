//! Human-readable error descriptions and structured JSON error formatting.

use flowmeter_core::error::{ErrorKind, FlowError};

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(fe) = find_flow_error(err) {
        return match fe {
            FlowError::OpenFailed(msg) => format!(
                "What happened: The serial port could not be opened ({msg}).\nLikely causes: Wrong port name, device unplugged, or the port is held by another program.\nHow to fix: Run `flowmeter ports` to list ports and pass the right one with --port."
            ),
            FlowError::Closed => {
                "What happened: The device disconnected during acquisition (not connected).\nLikely causes: USB cable pulled, adapter reset, or the scale powered off.\nHow to fix: Reconnect the scale and start a new recording; data up to the disconnect was kept.".to_string()
            }
            FlowError::Timeout => {
                "What happened: The scale did not send a line in time.\nLikely causes: Wrong baud rate or the scale is not in continuous output mode.\nHow to fix: Check --baud against the scale settings or raise serial.read_timeout_ms.".to_string()
            }
            FlowError::WriteFailed(msg) => format!(
                "What happened: Writing the probe to the port failed ({msg}).\nLikely causes: Flow control mismatch or a stalled adapter.\nHow to fix: Replug the adapter, then retry; raise serial.write_timeout_ms if it persists."
            ),
            FlowError::HandshakeTimeout { probes } => format!(
                "What happened: The device never answered the presence probe after {probes} attempts.\nLikely causes: A different device on this port or a wrong baud rate.\nHow to fix: Verify the port and baud rate; raise handshake.max_probes for slow devices."
            ),
            FlowError::Config(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML or flags.\nHow to fix: Edit the config file or flags, then rerun."
            ),
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    // String-based heuristics for errors coming from config or export
    let msg = format!("{err:#}");
    let lower = msg.to_ascii_lowercase();

    if lower.contains("read config") {
        return format!(
            "What happened: The config file could not be read.\nLikely causes: Wrong --config path or missing permissions.\nHow to fix: Pass an existing file with --config. Original: {msg}"
        );
    }
    if lower.contains("parse config") || lower.contains("must be") || lower.contains("unreasonably large") {
        return format!(
            "What happened: Configuration is invalid.\nLikely causes: A typo or an out-of-range value in the TOML.\nHow to fix: Edit the config and try again. Original: {msg}"
        );
    }
    if lower.contains("no serial port") {
        return "What happened: No serial port was selected.\nLikely causes: Neither --port nor serial.port is set.\nHow to fix: Pass --port <NAME> (see `flowmeter ports`) or use --sim.".to_string();
    }
    if lower.contains("export") {
        return format!(
            "What happened: The CSV export failed.\nLikely causes: The target directory does not exist or is not writable.\nHow to fix: Choose a writable path for --csv. Original: {msg}"
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

fn find_flow_error(err: &eyre::Report) -> Option<&FlowError> {
    err.chain().find_map(|e| e.downcast_ref::<FlowError>())
}

/// Map error kinds to stable exit codes; anything else returns 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match find_flow_error(err).map(FlowError::kind) {
        Some(ErrorKind::OpenFailed) => 3,
        Some(ErrorKind::Closed) => 4,
        Some(ErrorKind::WriteFailed) => 5,
        Some(ErrorKind::HandshakeTimeout) => 6,
        Some(ErrorKind::Config) => 7,
        _ => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let reason = find_flow_error(err).map_or("Error", |fe| fe.kind().as_str());
    json!({ "reason": reason, "message": humanize(err) }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::WrapErr;

    #[test]
    fn typed_errors_are_found_through_context() {
        let res: eyre::Result<()> =
            Err(FlowError::OpenFailed("COM9: not found".into())).wrap_err("connect");
        let err = res.unwrap_err();
        assert_eq!(exit_code_for_error(&err), 3);
        assert!(humanize(&err).contains("flowmeter ports"));
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "OpenFailed");
    }

    #[test]
    fn untyped_errors_fall_back() {
        let err = eyre::eyre!("something odd");
        assert_eq!(exit_code_for_error(&err), 1);
        assert!(humanize(&err).starts_with("Something went wrong."));
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "Error");
    }
}
