//! Human-readable error descriptions and structured JSON error formatting.

use spectro_core::error::{BuildError, DeviceError, ParseError};

fn find_device_error(err: &eyre::Report) -> Option<&DeviceError> {
    err.chain().find_map(|e| e.downcast_ref::<DeviceError>())
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingTransport => {
                "What happened: No transport was provided to the session.\nLikely causes: The device link failed to open or was not wired into the builder.\nHow to fix: Ensure the transport is created successfully and passed via with_transport(...).".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun."
            ),
        };
    }

    if let Some(de) = find_device_error(err) {
        return match de {
            DeviceError::CalibrationCorrupt(pe) => {
                let detail = match pe {
                    ParseError::InsufficientPages { found, required } => {
                        format!("only {found} of {required} pages could be read")
                    }
                    ParseError::CorruptEeprom { page, fill } => {
                        format!("page {page} is blank (every byte {fill:#04x})")
                    }
                    ParseError::MalformedField { field, .. } => format!("field `{field}` is malformed"),
                };
                format!(
                    "What happened: The device calibration EEPROM could not be parsed ({detail}).\nLikely causes: Unprogrammed or damaged EEPROM, or the wrong eeprom_protocol for this device.\nHow to fix: Check device.eeprom_protocol in the config; if it matches, the unit needs recalibration."
                )
            }
            DeviceError::TransportTimeout(_) => {
                "What happened: The spectrometer stopped answering.\nLikely causes: Loose cable, device asleep, or timeouts.transport_ms too low for the integration time.\nHow to fix: Reconnect the device and consider raising timeouts.transport_ms or retry.max_retries.".to_string()
            }
            DeviceError::Transport(_) => {
                "What happened: The link to the spectrometer failed.\nLikely causes: Device disconnected or powered off.\nHow to fix: Reconnect the device and rerun.".to_string()
            }
            DeviceError::ProtocolViolation(_) | DeviceError::DuplicateFrame(_) => {
                "What happened: The spectrometer kept sending malformed spectrum packets.\nLikely causes: Noisy link or a firmware/compatibility mismatch.\nHow to fix: Check device.compatibility in the config, or raise retry.max_retries on a marginal link.".to_string()
            }
            DeviceError::DeviceRejected(code) => format!(
                "What happened: The spectrometer rejected a request (status {code:#04x}).\nLikely causes: Unsupported setting for this firmware.\nHow to fix: Re-run with --log-level=debug to see the failing command."
            ),
            DeviceError::GateBusy(op) => format!(
                "What happened: The device was busy during {op}.\nLikely causes: Another transaction held the link past timeouts.gate_ms.\nHow to fix: Retry, or raise timeouts.gate_ms."
            ),
            DeviceError::Cancelled => {
                "What happened: Acquisition was cancelled.\nLikely causes: Ctrl-C or a caller cancel request.\nHow to fix: Nothing to fix; start a new acquisition.".to_string()
            }
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    if let Some(te) = err.chain().find_map(|e| e.downcast_ref::<toml::de::Error>()) {
        return format!(
            "What happened: The config file is not valid TOML for this tool.\nLikely causes: A typo, a misplaced section, or an unknown enum value.\nHow to fix: {}",
            te.message()
        );
    }

    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();
    if lower.contains("invalid configuration") {
        let cause = err.chain().nth(1).map(|c| c.to_string()).unwrap_or_default();
        return format!(
            "What happened: Configuration is invalid ({cause}).\nLikely causes: Out-of-range values or a typo in the TOML.\nHow to fix: Edit the config file and try again."
        );
    }

    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes per failure class; anything untyped returns 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if err.downcast_ref::<BuildError>().is_some() {
        return 1;
    }
    match find_device_error(err) {
        Some(DeviceError::Cancelled) => 2,
        Some(DeviceError::CalibrationCorrupt(_)) => 3,
        Some(DeviceError::Transport(_) | DeviceError::TransportTimeout(_)) => 4,
        Some(DeviceError::DeviceRejected(_)) => 5,
        Some(DeviceError::ProtocolViolation(_) | DeviceError::DuplicateFrame(_)) => 6,
        Some(DeviceError::GateBusy(_)) => 7,
        _ => 1,
    }
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if err.downcast_ref::<BuildError>().is_some() {
        return "InvalidSetup";
    }
    match find_device_error(err) {
        Some(DeviceError::TransportTimeout(_)) => "TransportTimeout",
        Some(DeviceError::Transport(_)) => "Transport",
        Some(DeviceError::ProtocolViolation(_)) => "ProtocolViolation",
        Some(DeviceError::DuplicateFrame(_)) => "DuplicateFrame",
        Some(DeviceError::DeviceRejected(_)) => "DeviceRejected",
        Some(DeviceError::CalibrationCorrupt(_)) => "CalibrationCorrupt",
        Some(DeviceError::ParameterOutOfRange(_)) => "ParameterOutOfRange",
        Some(DeviceError::GateBusy(_)) => "GateBusy",
        Some(DeviceError::Cancelled) => "Cancelled",
        Some(DeviceError::State(_)) => "State",
        None => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let reason = reason_name(err);
    let obj = match find_device_error(err) {
        Some(DeviceError::DeviceRejected(code)) => json!({
            "reason": reason,
            "details": { "status": code },
            "message": humanize(err),
        }),
        Some(DeviceError::CalibrationCorrupt(ParseError::CorruptEeprom { page, fill })) => json!({
            "reason": reason,
            "details": { "page": page, "fill": fill },
            "message": humanize(err),
        }),
        _ => json!({ "reason": reason, "message": humanize(err) }),
    };
    obj.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::WrapErr;

    fn wrapped(e: DeviceError) -> eyre::Report {
        Err::<(), _>(e).wrap_err("acquiring").unwrap_err()
    }

    #[test]
    fn device_errors_are_found_under_context() {
        let err = wrapped(DeviceError::DeviceRejected(0x42));
        assert_eq!(exit_code_for_error(&err), 5);
        assert!(humanize(&err).contains("status 0x42"));
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "DeviceRejected");
        assert_eq!(v["details"]["status"], 0x42);
    }

    #[test]
    fn blank_eeprom_names_the_page() {
        let err = wrapped(DeviceError::CalibrationCorrupt(ParseError::CorruptEeprom {
            page: 0,
            fill: 0xFF,
        }));
        assert_eq!(exit_code_for_error(&err), 3);
        assert!(humanize(&err).contains("page 0 is blank"));
    }

    #[test]
    fn untyped_errors_fall_back() {
        let err = eyre::eyre!("boom");
        assert_eq!(exit_code_for_error(&err), 1);
        assert!(humanize(&err).starts_with("Something went wrong."));
        assert!(format_error_json(&err).contains("\"reason\":\"Error\""));
    }
}
