use super::*;

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.50".to_string(),
            port: 4028,
            base_watts: 3600,
            poll_seconds: 10,
            timeout_ms: 5000,
            verify_commands: true,
        }
    }
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: String::new(),
            poll_seconds: 10,
            stale_after_seconds: 90,
            timeout_ms: 10_000,
        }
    }
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            emergency_soc: 30.0,
            sunset_min_soc: 60.0,
            full_soc: 100.0,
        }
    }
}

impl Default for AutoControlConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_interval_sec: 60,
            tick_interval_sec: 20,
            sunset_hour: 19,
            sunset_minute: 0,
            thresholds: ThresholdsConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            web_level: None,
            file: "/tmp/sunmine.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            miner: MinerConfig::default(),
            battery: BatteryConfig::default(),
            autocontrol: AutoControlConfig::default(),
            logging: LoggingConfig::default(),
            web: WebConfig::default(),
            timezone: "America/New_York".to_string(),
            location: None,
            state_file: "sunmine_state.json".to_string(),
        }
    }
}
