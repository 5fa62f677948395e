#![cfg(test)]

use super::config::*;
use std::collections::HashMap;

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.miner.port, 4028);
    assert_eq!(config.miner.base_watts, 3600);
    assert_eq!(config.autocontrol.min_interval_sec, 60);
    assert_eq!(config.autocontrol.sunset_hour, 19);
    assert!((config.autocontrol.thresholds.emergency_soc - 30.0).abs() < f64::EPSILON);
    assert!(!config.autocontrol.enabled);
}

#[test]
fn test_config_validation() {
    let mut config = Config::default();
    assert!(config.validate().is_ok());

    config.miner.host = String::new();
    assert!(config.validate().is_err());

    config = Config::default();
    config.miner.base_watts = 0;
    assert!(config.validate().is_err());

    config = Config::default();
    config.autocontrol.sunset_hour = 24;
    assert!(config.validate().is_err());

    config = Config::default();
    config.autocontrol.sunset_minute = 60;
    assert!(config.validate().is_err());

    config = Config::default();
    config.timezone = "Mars/Olympus_Mons".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_threshold_ordering_is_validated() {
    let mut config = Config::default();
    config.autocontrol.thresholds.emergency_soc = 70.0;
    assert!(config.validate().is_err());

    config = Config::default();
    config.autocontrol.thresholds.full_soc = 120.0;
    assert!(config.validate().is_err());
}

#[test]
fn test_partial_yaml_uses_defaults() {
    let yaml = "miner:\n  host: 10.0.0.7\n  base_watts: 3000\nautocontrol:\n  enabled: true\n";
    let config: Config = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(config.miner.host, "10.0.0.7");
    assert_eq!(config.miner.base_watts, 3000);
    assert_eq!(config.miner.port, 4028);
    assert!(config.autocontrol.enabled);
    assert_eq!(config.autocontrol.tick_interval_sec, 20);
}

#[test]
fn test_overrides_apply_and_reject_garbage() {
    let env: HashMap<&str, &str> = [
        ("SUNMINE_MINER_HOST", "miner.lan"),
        ("SUNMINE_BASE_WATTS", "3300"),
        ("SUNMINE_POLL_SECONDS", "15"),
    ]
    .into_iter()
    .collect();
    let mut config = Config::default();
    config
        .apply_overrides(|k| env.get(k).map(ToString::to_string))
        .unwrap();
    assert_eq!(config.miner.host, "miner.lan");
    assert_eq!(config.miner.base_watts, 3300);
    assert_eq!(config.miner.poll_seconds, 15);
    assert_eq!(config.battery.poll_seconds, 15);

    let mut config = Config::default();
    let err = config
        .apply_overrides(|k| (k == "SUNMINE_PORT").then(|| "eighty".to_string()))
        .unwrap_err();
    assert!(err.is_config());
}

#[test]
fn test_battery_token_not_serialized() {
    let mut config = Config::default();
    config.battery.token = "hunter2".to_string();
    let yaml = serde_yaml::to_string(&config).unwrap();
    assert!(!yaml.contains("hunter2"));
}
