use std::fs;
use sunmine::config::Config;

#[test]
fn save_and_load_yaml_roundtrip() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let path = tmp_dir.path().join("config.yaml");

    let mut cfg = Config::default();
    cfg.miner.host = "10.0.0.5".to_string();
    cfg.miner.base_watts = 3300;
    cfg.autocontrol.thresholds.sunset_min_soc = 70.0;
    cfg.logging.file = path.with_extension("log").to_string_lossy().to_string();

    cfg.save_to_file(&path).unwrap();
    let loaded = Config::from_file(&path).unwrap();

    assert_eq!(loaded.miner.host, "10.0.0.5");
    assert_eq!(loaded.miner.base_watts, 3300);
    assert!((loaded.autocontrol.thresholds.sunset_min_soc - 70.0).abs() < f64::EPSILON);
    assert_eq!(loaded.logging.file, cfg.logging.file);
    assert!(loaded.validate().is_ok());
}

#[test]
fn saved_file_never_contains_battery_token() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let path = tmp_dir.path().join("config.yaml");

    let mut cfg = Config::default();
    cfg.battery.token = "hunter2".to_string();
    cfg.save_to_file(&path).unwrap();

    let text = fs::read_to_string(&path).unwrap();
    assert!(!text.contains("hunter2"));
    assert!(Config::from_file(&path).unwrap().battery.token.is_empty());
}

#[test]
fn config_validation_errors() {
    let mut cfg = Config::default();

    // Empty host
    cfg.miner.host.clear();
    assert!(cfg.validate().is_err());

    // Invalid port
    cfg = Config::default();
    cfg.miner.port = 0;
    assert!(cfg.validate().is_err());

    // Zero base watts
    cfg = Config::default();
    cfg.miner.base_watts = 0;
    assert!(cfg.validate().is_err());

    // Sunset out of range
    cfg = Config::default();
    cfg.autocontrol.sunset_hour = 24;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.autocontrol.sunset_minute = 60;
    assert!(cfg.validate().is_err());

    // Poll interval zero
    cfg = Config::default();
    cfg.battery.poll_seconds = 0;
    assert!(cfg.validate().is_err());

    // Unknown timezone
    cfg = Config::default();
    cfg.timezone = "Mars/Olympus_Mons".to_string();
    assert!(cfg.validate().is_err());
}

#[test]
fn from_file_with_invalid_yaml_fails() {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    fs::write(tmp.path(), b"bad: [unclosed").unwrap();
    let err = Config::from_file(tmp.path()).unwrap_err();
    let msg = format!("{}", err);
    assert!(msg.contains("Serialization error"));
}

#[test]
fn shipped_example_config_is_valid() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/sunmine.example.yaml");
    let cfg = Config::from_file(path).unwrap();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.miner.port, 4028);
    assert!(!cfg.battery.url.is_empty());
}

#[test]
fn location_section_is_optional_and_range_checked() {
    let cfg: Config = serde_yaml::from_str("timezone: Europe/Amsterdam\n").unwrap();
    assert!(cfg.location.is_none());

    let mut cfg: Config =
        serde_yaml::from_str("location:\n  latitude: 52.37\n  longitude: 4.90\n").unwrap();
    let loc = cfg.location.unwrap();
    assert!((loc.latitude - 52.37).abs() < f64::EPSILON);
    assert!(cfg.validate().is_ok());

    cfg.location = Some(sunmine::config::LocationConfig {
        latitude: 95.0,
        longitude: 4.9,
    });
    assert!(cfg.validate().is_err());
}
