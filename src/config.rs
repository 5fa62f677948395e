//! Configuration management for Sunmine
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files with support for environment variable overrides.

use crate::error::{Result, SunmineError};
use serde::{Deserialize, Serialize};
use std::path::Path;

mod defaults;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(schemars::JsonSchema))]
#[serde(default)]
pub struct Config {
    /// Miner RPC connection and sizing
    pub miner: MinerConfig,

    /// Battery portal polling
    pub battery: BatteryConfig,

    /// Auto-control loop and policy thresholds
    pub autocontrol: AutoControlConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Web server binding configuration
    pub web: WebConfig,

    /// IANA timezone used for the sunset override
    pub timezone: String,

    /// Site coordinates; when set, the sunset override follows today's
    /// computed sunset instead of the fixed hour and minute
    pub location: Option<LocationConfig>,

    /// Path of the best-effort JSON state file
    pub state_file: String,
}

/// Miner RPC connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(schemars::JsonSchema))]
#[serde(default)]
pub struct MinerConfig {
    /// Hostname or IP address of the miner
    pub host: String,

    /// RPC port (WhatsMiner uses 4028)
    pub port: u16,

    /// Power draw in watts that corresponds to 100 %
    pub base_watts: u32,

    /// Summary polling interval in seconds
    pub poll_seconds: u64,

    /// Connect/read timeout per request in milliseconds
    pub timeout_ms: u64,

    /// Read the summary back after each power command and fail the command
    /// when the miner does not report the requested state
    pub verify_commands: bool,
}

/// Battery portal polling parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(schemars::JsonSchema))]
#[serde(default)]
pub struct BatteryConfig {
    /// URL of the JSON runtime document; empty disables polling
    pub url: String,

    /// Optional bearer token sent with each request
    #[serde(skip_serializing)]
    pub token: String,

    /// Polling interval in seconds
    pub poll_seconds: u64,

    /// Samples older than this are treated as stale
    pub stale_after_seconds: u64,

    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

/// SOC thresholds used by the power policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(schemars::JsonSchema))]
#[serde(default)]
pub struct ThresholdsConfig {
    /// At or below this SOC the miner is switched off
    pub emergency_soc: f64,

    /// Sunset override applies only above this SOC
    pub sunset_min_soc: f64,

    /// At or above this SOC the miner runs at full power and the latch resets
    pub full_soc: f64,
}

/// Auto-control loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(schemars::JsonSchema))]
#[serde(default)]
pub struct AutoControlConfig {
    /// Start with auto-control enabled
    pub enabled: bool,

    /// Minimum seconds between two applied adjustments
    pub min_interval_sec: u64,

    /// Seconds between two evaluations of the loop
    pub tick_interval_sec: u64,

    /// Local hour (0-23) after which the sunset override may apply; used
    /// when no location is configured or no sunset can be computed
    pub sunset_hour: u32,

    /// Local minute (0-59) of the fallback sunset time
    pub sunset_minute: u32,

    /// Policy thresholds
    pub thresholds: ThresholdsConfig,
}

/// Site coordinates in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(schemars::JsonSchema))]
pub struct LocationConfig {
    pub latitude: f64,
    pub longitude: f64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(schemars::JsonSchema))]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Console level override
    pub console_level: Option<String>,

    /// File level override
    pub file_level: Option<String>,

    /// Level of lines forwarded to the web log stream
    pub web_level: Option<String>,

    /// Path to log file or directory; empty logs to the console only
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(schemars::JsonSchema))]
#[serde(default)]
pub struct WebConfig {
    /// Bind address
    pub host: String,

    /// TCP port
    pub port: u16,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the first default location that exists,
    /// then apply environment overrides.
    pub fn load() -> Result<Self> {
        let default_paths = [
            "sunmine.local.yaml",
            "sunmine.yaml",
            "/etc/sunmine/config.yaml",
        ];

        let mut config = default_paths
            .iter()
            .find(|p| Path::new(p).exists())
            .map_or_else(|| Ok(Self::default()), Self::from_file)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply `SUNMINE_*` environment overrides on top of file values.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup. Split out so tests do not
    /// need to touch the process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SUNMINE_MINER_HOST") {
            self.miner.host = v;
        }
        if let Some(v) = lookup("SUNMINE_BASE_WATTS") {
            self.miner.base_watts = parse_override("SUNMINE_BASE_WATTS", &v)?;
        }
        if let Some(v) = lookup("SUNMINE_BATTERY_URL") {
            self.battery.url = v;
        }
        if let Some(v) = lookup("SUNMINE_BATTERY_TOKEN") {
            self.battery.token = v;
        }
        if let Some(v) = lookup("SUNMINE_POLL_SECONDS") {
            let secs: u64 = parse_override("SUNMINE_POLL_SECONDS", &v)?;
            self.miner.poll_seconds = secs;
            self.battery.poll_seconds = secs;
        }
        if let Some(v) = lookup("SUNMINE_PORT") {
            self.web.port = parse_override("SUNMINE_PORT", &v)?;
        }
        Ok(())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parsed timezone, falling back to UTC when the name is unknown.
    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone.parse().unwrap_or(chrono_tz::UTC)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.miner.host.is_empty() {
            return Err(SunmineError::validation(
                "miner.host",
                "Host cannot be empty",
            ));
        }

        if self.miner.port == 0 {
            return Err(SunmineError::validation(
                "miner.port",
                "Port must be greater than 0",
            ));
        }

        if self.miner.base_watts == 0 {
            return Err(SunmineError::validation(
                "miner.base_watts",
                "Must be greater than 0",
            ));
        }

        if self.miner.poll_seconds == 0 || self.battery.poll_seconds == 0 {
            return Err(SunmineError::validation(
                "poll_seconds",
                "Must be greater than 0",
            ));
        }

        if self.autocontrol.tick_interval_sec == 0 {
            return Err(SunmineError::validation(
                "autocontrol.tick_interval_sec",
                "Must be greater than 0",
            ));
        }

        if self.autocontrol.sunset_hour > 23 {
            return Err(SunmineError::validation(
                "autocontrol.sunset_hour",
                "Must be between 0 and 23",
            ));
        }

        if self.autocontrol.sunset_minute > 59 {
            return Err(SunmineError::validation(
                "autocontrol.sunset_minute",
                "Must be between 0 and 59",
            ));
        }

        let t = &self.autocontrol.thresholds;
        if !(0.0..=100.0).contains(&t.emergency_soc)
            || !(0.0..=100.0).contains(&t.sunset_min_soc)
            || !(0.0..=100.0).contains(&t.full_soc)
        {
            return Err(SunmineError::validation(
                "autocontrol.thresholds",
                "Thresholds must lie within 0..=100",
            ));
        }
        if t.emergency_soc >= t.sunset_min_soc || t.sunset_min_soc > t.full_soc {
            return Err(SunmineError::validation(
                "autocontrol.thresholds",
                "Expected emergency_soc < sunset_min_soc <= full_soc",
            ));
        }

        if let Some(loc) = &self.location {
            if !(-90.0..=90.0).contains(&loc.latitude) {
                return Err(SunmineError::validation(
                    "location.latitude",
                    "Must be between -90 and 90",
                ));
            }
            if !(-180.0..=180.0).contains(&loc.longitude) {
                return Err(SunmineError::validation(
                    "location.longitude",
                    "Must be between -180 and 180",
                ));
            }
        }

        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(SunmineError::validation(
                "timezone",
                "Unknown IANA timezone name",
            ));
        }

        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| SunmineError::config(format!("Invalid value for {key}: {value:?}")))
}
