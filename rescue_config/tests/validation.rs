use rescue_config::load_toml;
use rstest::rstest;

#[test]
fn rejects_zero_detection_interval() {
    let toml = r#"
[detection]
interval_ms = 0
auto_mode = true
default_protocol_id = 1
"#;

    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject interval_ms=0");
    assert!(
        format!("{err}")
            .to_lowercase()
            .contains("interval_ms must be >= 1")
    );
}

#[test]
fn accepts_full_config() {
    let toml = r#"
[detection]
interval_ms = 500
auto_mode = false
default_protocol_id = 4
probability = 0.25
seed = 7

[protocols]
file = "etc/protocols.json"
include_default = false

[timer]
speedup = 60.0

[logging]
level = "debug"
rotation = "daily"
events_file = "events.jsonl"
"#;

    let cfg = load_toml(toml).expect("parse TOML");
    cfg.validate().expect("valid config should pass");
    assert!(!cfg.detection.auto_mode);
    assert_eq!(cfg.detection.default_protocol_id, 4);
    assert_eq!(cfg.detection.seed, Some(7));
    assert!(!cfg.protocols.include_default);
    assert_eq!(
        cfg.logging.events_file.as_deref(),
        Some(std::path::Path::new("events.jsonl"))
    );
}

#[rstest]
#[case("[detection]\nprobability = 1.5\n", "probability")]
#[case("[detection]\nprobability = -0.1\n", "probability")]
#[case("[timer]\nspeedup = 0.0\n", "speedup")]
#[case("[timer]\nspeedup = -2.0\n", "speedup")]
#[case("[logging]\nrotation = \"weekly\"\n", "rotation")]
#[case("[detection]\ninterval_ms = 7200000\n", "unreasonably large")]
fn rejects_out_of_range_values(#[case] toml: &str, #[case] needle: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should be rejected");
    assert!(
        format!("{err}").contains(needle),
        "error {err} should mention {needle}"
    );
}

#[test]
fn unknown_rotation_type_fails_to_parse_when_not_a_string() {
    let res = load_toml("[logging]\nrotation = 3\n");
    assert!(res.is_err());
}
