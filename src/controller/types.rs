use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::ControlMode;

/// Loop sub-state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    #[default]
    Disabled,
    Idle,
    Evaluating,
    Commanding,
}

/// State owned by the control loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlState {
    pub enabled: bool,
    /// Low-water mark of the current discharge cycle
    pub latched_floor_pct: Option<u8>,
    /// Last applied adjustment; `None` means cooldown does not apply
    pub last_adjustment_at: Option<DateTime<Utc>>,
    /// Last target the miner accepted; `None` until the first success
    pub last_target_pct: Option<u8>,
    /// Target from the most recent evaluation
    pub desired_pct: Option<u8>,
    pub mode: ControlMode,
    pub last_error: Option<String>,
    pub warning: Option<String>,
}

/// Commands accepted by the controller from external components (web, etc.)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Enable,
    Disable,
}

/// Read-only snapshot of the controller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlStatus {
    pub timestamp: DateTime<Utc>,
    pub enabled: bool,
    pub loop_state: LoopState,
    pub mode: ControlMode,
    /// Target from the last evaluation
    pub target_pct: Option<u8>,
    pub target_watts: Option<u32>,
    /// Last target the miner accepted
    pub applied_pct: Option<u8>,
    pub applied_watts: Option<u32>,
    pub latched_floor_pct: Option<u8>,
    pub last_adjustment_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub warning: Option<String>,
    pub soc_percent: Option<f64>,
    pub description: String,
    pub min_interval_sec: i64,
    /// Local sunset time as HH:MM
    pub sunset: String,
    pub is_past_sunset: bool,
}
