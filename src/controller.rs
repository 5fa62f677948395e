//! Auto-control loop
//!
//! The controller owns [`ControlState`] outright. It runs as one task: a
//! fixed-interval tick evaluates the power policy and, when the target moves,
//! hands a command to the dispatcher and waits for it. Enable/disable arrive
//! over a command channel and are handled between ticks, so state is only
//! ever mutated from inside this task. Everyone else sees immutable
//! [`ControlStatus`] snapshots published at tick boundaries.

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::Config;
use crate::dispatcher::CommandDispatcher;
use crate::error::{Result, SunmineError};
use crate::logging::{StructuredLogger, get_logger};
use crate::persistence::PersistenceManager;
use crate::policy::PolicyConfig;
use crate::telemetry::TelemetrySource;

mod commands;
mod runtime;
mod snapshot;
mod tick;
mod types;

pub use runtime::ControllerHandle;
pub use tick::TickOutcome;
pub use types::{ControlCommand, ControlState, ControlStatus, LoopState};

/// Main auto-control state machine
pub struct AutoController {
    /// Owned control state; never shared
    state: ControlState,

    /// Sub-state of the loop
    loop_state: LoopState,

    policy: PolicyConfig,

    /// Anti-oscillation cooldown between applied adjustments
    min_interval: chrono::Duration,

    /// Evaluation cadence
    tick_interval: std::time::Duration,

    telemetry: Arc<dyn TelemetrySource>,

    dispatcher: Arc<CommandDispatcher>,

    persistence: Option<PersistenceManager>,

    /// Last SOC seen by a tick, for status only
    last_soc: Option<f64>,

    /// Human readable summary of the last decision
    description: String,

    status_tx: watch::Sender<Arc<ControlStatus>>,

    logger: StructuredLogger,
}

impl AutoController {
    /// Build a controller. Refuses invalid configuration.
    pub fn new(
        config: &Config,
        telemetry: Arc<dyn TelemetrySource>,
        dispatcher: Arc<CommandDispatcher>,
    ) -> Result<Self> {
        config.validate()?;
        if dispatcher.base_watts() != config.miner.base_watts {
            return Err(SunmineError::config(format!(
                "dispatcher base_watts {} does not match miner.base_watts {}",
                dispatcher.base_watts(),
                config.miner.base_watts
            )));
        }

        let min_interval = chrono::Duration::seconds(
            i64::try_from(config.autocontrol.min_interval_sec).unwrap_or(i64::MAX / 1000),
        );
        let controller = Self {
            state: ControlState::default(),
            loop_state: LoopState::Disabled,
            policy: PolicyConfig::from_config(config),
            min_interval,
            tick_interval: std::time::Duration::from_secs(config.autocontrol.tick_interval_sec),
            telemetry,
            dispatcher,
            persistence: None,
            last_soc: None,
            description: "Disabled".to_string(),
            status_tx: watch::channel(Arc::new(ControlStatus::default())).0,
            logger: get_logger("controller"),
        };
        controller.publish(chrono::Utc::now());
        Ok(controller)
    }

    /// Attach best-effort persistence of the enabled flag and applied target
    #[must_use]
    pub fn with_persistence(mut self, persistence: PersistenceManager) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub const fn state(&self) -> &ControlState {
        &self.state
    }

    pub const fn loop_state(&self) -> LoopState {
        self.loop_state
    }

    /// Latest published snapshot
    pub fn status(&self) -> Arc<ControlStatus> {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ControlStatus>> {
        self.status_tx.subscribe()
    }

    fn persist(&mut self) {
        let enabled = self.state.enabled;
        let target = self.state.last_target_pct;
        if let Some(p) = self.persistence.as_mut() {
            p.update_and_save(|s| {
                s.autocontrol = enabled;
                if target.is_some() {
                    s.target_power_pct = target;
                    let power_state = if target == Some(0) { "stopped" } else { "running" };
                    s.miner_power_state = Some(power_state.to_string());
                }
            });
        }
    }
}
