//! Command dispatcher
//!
//! Serialises power commands to the miner. There is exactly one slot: a
//! command holds it from the first RPC to the last, so the control loop and
//! manual overrides from the web API can never interleave writes.
//!
//! Firmware acknowledges some writes without applying them, and the "no
//! reply" acknowledgement carries no information at all. After the writes a
//! command re-reads the summary and only counts as applied when the miner
//! reports what was asked for.

use std::ops::Deref;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};

use crate::error::{Result, SunmineError};
use crate::logging::{StructuredLogger, get_logger};
use crate::miner::{MinerClient, MinerSnapshot};
use crate::policy::percent_to_watts;
use crate::telemetry::LatestCell;

/// Why a command failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Connectivity or timeout; retry on the next eligible tick
    Transient,
    /// The device answered with an explicit error
    Rejected,
}

/// Classify a miner error
pub const fn classify(err: &SunmineError) -> FailureKind {
    match err {
        SunmineError::Rejected { .. } => FailureKind::Rejected,
        _ => FailureKind::Transient,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "kind", rename_all = "snake_case")]
pub enum CommandResult {
    Pending,
    Applied,
    Failed(FailureKind),
}

/// Terminal result of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Applied,
    Failed(FailureKind),
}

impl From<CommandOutcome> for CommandResult {
    fn from(outcome: CommandOutcome) -> Self {
        match outcome {
            CommandOutcome::Applied => Self::Applied,
            CommandOutcome::Failed(kind) => Self::Failed(kind),
        }
    }
}

/// Who asked for a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOrigin {
    AutoControl,
    Manual,
}

/// What the miner should do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerAction {
    /// Run at a percentage of base watts; 0 switches the miner off
    Percent,
    /// Set an explicit wattage limit
    Limit,
    PowerOn,
    PowerOff,
}

/// A single power request and its outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerCommand {
    pub action: PowerAction,
    pub origin: CommandOrigin,
    pub target_pct: u8,
    pub target_watts: u32,
    pub issued_at: DateTime<Utc>,
    pub result: CommandResult,
    pub error: Option<String>,
}

impl PowerCommand {
    /// Percentage command; watts derived from `base_watts`
    pub fn percent(
        base_watts: u32,
        pct: u8,
        origin: CommandOrigin,
        issued_at: DateTime<Utc>,
    ) -> Self {
        let pct = pct.min(100);
        Self {
            action: PowerAction::Percent,
            origin,
            target_pct: pct,
            target_watts: percent_to_watts(base_watts, pct),
            issued_at,
            result: CommandResult::Pending,
            error: None,
        }
    }

    /// Explicit watt limit; the percentage is the nearest equivalent
    pub fn limit(
        base_watts: u32,
        watts: u32,
        origin: CommandOrigin,
        issued_at: DateTime<Utc>,
    ) -> Self {
        let watts = watts.min(base_watts);
        let pct = if base_watts == 0 {
            0
        } else {
            u8::try_from((u64::from(watts) * 100 + u64::from(base_watts) / 2) / u64::from(base_watts))
                .unwrap_or(100)
        };
        Self {
            action: PowerAction::Limit,
            origin,
            target_pct: pct,
            target_watts: watts,
            issued_at,
            result: CommandResult::Pending,
            error: None,
        }
    }

    /// Bare power on/off without touching the limit
    pub fn switch(on: bool, base_watts: u32, origin: CommandOrigin, issued_at: DateTime<Utc>) -> Self {
        Self {
            action: if on {
                PowerAction::PowerOn
            } else {
                PowerAction::PowerOff
            },
            origin,
            target_pct: if on { 100 } else { 0 },
            target_watts: if on { base_watts } else { 0 },
            issued_at,
            result: CommandResult::Pending,
            error: None,
        }
    }

    /// Power-off, or a percentage or limit of zero watts
    pub const fn switches_off(&self) -> bool {
        match self.action {
            PowerAction::PowerOff => true,
            PowerAction::Percent | PowerAction::Limit => self.target_watts == 0,
            PowerAction::PowerOn => false,
        }
    }
}

/// A command that has left the dispatcher. Only [`CommandDispatcher::submit`]
/// builds one, so its result is never `Pending`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CompletedCommand {
    command: PowerCommand,
    #[serde(skip)]
    outcome: CommandOutcome,
}

impl CompletedCommand {
    fn new(mut command: PowerCommand, outcome: CommandOutcome, error: Option<String>) -> Self {
        command.result = outcome.into();
        command.error = error;
        Self { command, outcome }
    }

    pub const fn outcome(&self) -> CommandOutcome {
        self.outcome
    }

    pub const fn is_applied(&self) -> bool {
        matches!(self.outcome, CommandOutcome::Applied)
    }
}

impl Deref for CompletedCommand {
    type Target = PowerCommand;

    fn deref(&self) -> &PowerCommand {
        &self.command
    }
}

/// Compare a post-command summary against what the command asked for.
///
/// Fields the firmware did not report are not held against the command.
fn check_applied(cmd: &PowerCommand, snapshot: &MinerSnapshot) -> Result<()> {
    if cmd.switches_off() {
        if snapshot.is_mining == Some(true) {
            return Err(SunmineError::rejected("miner still mining after power off"));
        }
        return Ok(());
    }
    if cmd.action == PowerAction::PowerOn {
        if snapshot.is_mining == Some(false) {
            return Err(SunmineError::rejected("miner not mining after power on"));
        }
        return Ok(());
    }
    match snapshot.power_limit_w {
        Some(limit) if (limit - f64::from(cmd.target_watts)).abs() >= 1.0 => {
            Err(SunmineError::rejected(format!(
                "power limit reads {limit:.0} W, expected {} W",
                cmd.target_watts
            )))
        }
        _ => Ok(()),
    }
}

/// Dispatcher activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpState {
    #[default]
    Idle,
    Applying,
    /// Writes done; reading the summary back
    Verifying,
}

/// Observable state of the dispatcher
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStatus {
    pub op_state: OpState,
    pub last_command: Option<PowerCommand>,
    /// Whether the miner was last commanded on (`None` before any command)
    pub powered: Option<bool>,
}

/// Single-flight power command executor
pub struct CommandDispatcher {
    miner: Arc<dyn MinerClient>,
    slot: Mutex<Option<bool>>,
    observed: Option<LatestCell<MinerSnapshot>>,
    verify_commands: bool,
    status_tx: watch::Sender<OperationStatus>,
    logger: StructuredLogger,
}

impl CommandDispatcher {
    pub fn new(miner: Arc<dyn MinerClient>) -> Self {
        let (status_tx, _rx) = watch::channel(OperationStatus::default());
        Self {
            miner,
            slot: Mutex::new(None),
            observed: None,
            verify_commands: true,
            status_tx,
            logger: get_logger("dispatcher"),
        }
    }

    /// Consult live miner telemetry when deciding whether a power-on is needed
    #[must_use]
    pub fn with_observed(mut self, cell: LatestCell<MinerSnapshot>) -> Self {
        self.observed = Some(cell);
        self
    }

    /// Skip the summary read-back after each command
    #[must_use]
    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify_commands = verify;
        self
    }

    pub fn base_watts(&self) -> u32 {
        self.miner.base_watts()
    }

    /// Last command and current activity
    pub fn operation_status(&self) -> OperationStatus {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<OperationStatus> {
        self.status_tx.subscribe()
    }

    /// Execute a command, waiting for the slot if another command holds it.
    pub async fn submit(&self, mut cmd: PowerCommand) -> CompletedCommand {
        let mut powered = self.slot.lock().await;
        cmd.result = CommandResult::Pending;
        cmd.error = None;
        self.publish(OpState::Applying, &cmd, *powered);
        self.logger.info(&format!(
            "Applying {:?} {}% ({} W) from {:?}",
            cmd.action, cmd.target_pct, cmd.target_watts, cmd.origin
        ));

        let mut result = self.execute(&cmd, &mut powered).await;
        if result.is_ok() && self.verify_commands {
            self.publish(OpState::Verifying, &cmd, *powered);
            result = self.verify(&cmd).await;
        }

        let done = match result {
            Ok(()) => {
                self.logger.info(&format!(
                    "Applied {}% ({} W)",
                    cmd.target_pct, cmd.target_watts
                ));
                CompletedCommand::new(cmd, CommandOutcome::Applied, None)
            }
            Err(e) => {
                let kind = classify(&e);
                self.logger.error(&format!(
                    "Power command failed ({kind:?}): {e}"
                ));
                CompletedCommand::new(cmd, CommandOutcome::Failed(kind), Some(e.to_string()))
            }
        };

        self.publish(OpState::Idle, &done, *powered);
        done
    }

    /// Convenience wrapper returning a `Result`
    pub async fn apply(&self, cmd: PowerCommand) -> Result<CompletedCommand> {
        let done = self.submit(cmd).await;
        let msg = done.error.clone().unwrap_or_default();
        match done.outcome() {
            CommandOutcome::Applied => Ok(done),
            CommandOutcome::Failed(FailureKind::Rejected) => Err(SunmineError::rejected(msg)),
            CommandOutcome::Failed(FailureKind::Transient) => Err(SunmineError::transport(msg)),
        }
    }

    async fn verify(&self, cmd: &PowerCommand) -> Result<()> {
        let snapshot = self.miner.summary().await?;
        check_applied(cmd, &snapshot)?;
        self.logger.debug("Summary confirms command");
        Ok(())
    }

    async fn execute(&self, cmd: &PowerCommand, powered: &mut Option<bool>) -> Result<()> {
        if cmd.switches_off() {
            self.miner.set_power_off().await?;
            *powered = Some(false);
            return Ok(());
        }

        if cmd.action == PowerAction::PowerOn || self.needs_power_on(*powered) {
            self.miner.set_power_on().await?;
            *powered = Some(true);
        }
        if cmd.action != PowerAction::PowerOn {
            self.miner.set_power_limit(cmd.target_watts).await?;
        }
        Ok(())
    }

    fn needs_power_on(&self, powered: Option<bool>) -> bool {
        let observed = self
            .observed
            .as_ref()
            .and_then(LatestCell::get)
            .and_then(|s| s.appears_powered());
        match (powered, observed) {
            (_, Some(false)) | (Some(false) | None, None) => true,
            (_, Some(true)) | (Some(true), None) => false,
        }
    }

    fn publish(&self, op_state: OpState, cmd: &PowerCommand, powered: Option<bool>) {
        self.status_tx.send_replace(OperationStatus {
            op_state,
            last_command: Some(cmd.clone()),
            powered,
        });
    }
}
