use rstest::rstest;
use supply_config::{ProfileKind, RunMode, load_file, load_toml};

const FULL: &str = r#"
[instrument]
address = "TCPIP0::10.0.0.7::inst0::INSTR"
current_limit_a = 12.0
poll_ms = 50

[experiment]
profile = "profiles/ramp.csv"
profile_kind = "ordered_pairs"
storage_dir = "data"
test_time_s = 30
reset_voltage = false
refresh_ms = 100
mode = "manual"

[pid]
kp = 0.1
ki = 0.02
kd = 0.0
integral_reset = true
target_power_w = 5.0
period_ms = 10

[simulation]
load_ohms = 4.0
response_ms = 20

[logging]
file = "supply.log"
level = "debug"
rotation = "daily"
"#;

#[test]
fn parses_full_document() {
    let cfg = load_toml(FULL).expect("parse TOML");
    cfg.validate().expect("valid config should pass");
    assert_eq!(cfg.experiment.profile_kind, ProfileKind::OrderedPairs);
    assert_eq!(cfg.experiment.mode, RunMode::Manual);
    assert_eq!(cfg.experiment.test_time_s, 30.0);
    assert!(!cfg.experiment.reset_voltage);
    assert_eq!(cfg.pid.target_power_w, 5.0);
    assert_eq!(cfg.logging.rotation.as_deref(), Some("daily"));
}

#[rstest]
#[case("[experiment]\ntest_time_s = 0\n", "test_time_s must be > 0")]
#[case("[experiment]\ntest_time_s = -3\n", "test_time_s must be > 0")]
#[case("[experiment]\nrefresh_ms = 0\n", "refresh_ms must be >= 1")]
#[case("[instrument]\npoll_ms = 0\n", "poll_ms must be >= 1")]
#[case("[instrument]\ncurrent_limit_a = 0.0\n", "current_limit_a must be > 0")]
#[case("[pid]\ntarget_power_w = -1.0\n", "target_power_w must be >= 0")]
#[case("[pid]\nperiod_ms = 0\n", "period_ms must be >= 1")]
#[case("[simulation]\nload_ohms = 0.0\n", "load_ohms must be > 0")]
#[case("[logging]\nrotation = \"weekly\"\n", "logging.rotation")]
fn rejects_out_of_range(#[case] toml: &str, #[case] needle: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should be rejected");
    assert!(
        format!("{err}").contains(needle),
        "expected {needle:?} in {err}"
    );
}

#[test]
fn rejects_unknown_profile_kind() {
    let err = load_toml("[experiment]\nprofile_kind = \"spline\"\n").expect_err("unknown kind");
    assert!(err.to_string().contains("unknown variant"));
}

#[test]
fn load_file_reports_missing_path() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    let err = load_file(&missing).expect_err("missing file");
    assert!(format!("{err}").contains("read config"));
}

#[test]
fn load_file_reads_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("supply.toml");
    std::fs::write(&path, FULL).unwrap();
    let cfg = load_file(&path).expect("load");
    assert_eq!(cfg.instrument.current_limit_a, 12.0);
}
