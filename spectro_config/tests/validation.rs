use rstest::rstest;
use spectro_config::{AcquisitionModeCfg, Compatibility, EepromProtocol, load_toml};

const FULL: &str = r#"
[device]
eeprom_protocol = "generic"
compatibility = "software-raman"

[acquisition]
warning_delay_sec = 3
min_readout_ms = 120
mode = "auto-dark"

[retry]
max_retries = 7
backoff_base_ms = 4
throwaway_multiplier = 9

[timeouts]
transport_ms = 250
gate_ms = 300

[sync]
auto_sync = false
lenient_gain = true

[logging]
level = "debug"
rotation = "daily"
"#;

#[test]
fn full_config_parses_and_validates() {
    let cfg = load_toml(FULL).expect("parse TOML");
    cfg.validate().expect("valid config");
    assert_eq!(cfg.device.eeprom_protocol, EepromProtocol::Generic);
    assert_eq!(cfg.device.compatibility, Compatibility::SoftwareRaman);
    assert_eq!(cfg.acquisition.mode, AcquisitionModeCfg::AutoDark);
    assert_eq!(cfg.acquisition.min_readout_ms, 120);
    assert_eq!(cfg.retry.max_retries, 7);
    assert_eq!(cfg.timeouts.gate_ms, 300);
    assert!(!cfg.sync.auto_sync);
    assert!(cfg.sync.lenient_gain);
    assert_eq!(cfg.logging.rotation.as_deref(), Some("daily"));
}

#[test]
fn empty_config_uses_defaults() {
    let cfg = load_toml("").expect("parse TOML");
    cfg.validate().expect("defaults are valid");
    assert_eq!(cfg.device.eeprom_protocol, EepromProtocol::Usb);
    assert_eq!(cfg.acquisition.min_readout_ms, 100);
    assert_eq!(cfg.retry.max_retries, 5);
    assert_eq!(cfg.retry.backoff_base_ms, 5);
    assert_eq!(cfg.timeouts.transport_ms, 100);
    assert!(cfg.sync.auto_sync);
}

#[test]
fn io_ms_alias_is_accepted() {
    let cfg = load_toml("[timeouts]\nio_ms = 40\n").expect("parse TOML");
    assert_eq!(cfg.timeouts.transport_ms, 40);
}

#[test]
fn unknown_protocol_is_a_parse_error() {
    assert!(load_toml("[device]\neeprom_protocol = \"serial\"\n").is_err());
}

#[rstest]
#[case("[retry]\nmax_retries = 0\n", "retry.max_retries must be >= 1")]
#[case("[retry]\nbackoff_base_ms = 0\n", "retry.backoff_base_ms must be >= 1")]
#[case("[timeouts]\ntransport_ms = 0\n", "timeouts.transport_ms must be >= 1")]
#[case("[timeouts]\ngate_ms = 0\n", "timeouts.gate_ms must be >= 1")]
#[case("[acquisition]\nmin_readout_ms = 0\n", "acquisition.min_readout_ms must be >= 1")]
#[case("[logging]\nrotation = \"weekly\"\n", "logging.rotation must be one of")]
fn rejects_invalid_values(#[case] toml: &str, #[case] needle: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should be rejected");
    assert!(
        format!("{err}").to_lowercase().contains(needle),
        "unexpected message: {err}"
    );
}
