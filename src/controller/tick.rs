use chrono::{DateTime, Utc};

use super::AutoController;
use super::types::LoopState;
use crate::dispatcher::{CommandOrigin, CommandOutcome, CompletedCommand, PowerCommand};
use crate::policy::{ControlMode, PriorState, decide};

/// What a single tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Controller disabled or not idle; nothing evaluated
    Skipped,
    /// Within the cooldown window after the last adjustment
    Cooldown,
    /// Telemetry stale or missing; prior target held
    Held,
    /// Decision matches what is already applied
    Unchanged,
    /// A command ran; see its result
    Commanded(CompletedCommand),
}

impl AutoController {
    /// Enable auto-control. Clears the latch and starts the cooldown window
    /// at `now`. A no-op when already enabled.
    pub fn enable(&mut self, now: DateTime<Utc>) {
        if self.state.enabled {
            self.logger.debug("Enable requested while already enabled");
            return;
        }
        self.state.enabled = true;
        self.state.latched_floor_pct = None;
        self.state.last_adjustment_at = Some(now);
        self.state.last_error = None;
        self.loop_state = LoopState::Idle;
        self.description = "Enabled, waiting for first evaluation".to_string();
        self.logger.info("Auto-control enabled");
        self.persist();
        self.publish(now);
    }

    /// Disable auto-control. An in-flight command is never interrupted
    /// because commands are awaited inside the tick that issued them.
    pub fn disable(&mut self, now: DateTime<Utc>) {
        if !self.state.enabled && self.loop_state == LoopState::Disabled {
            return;
        }
        self.state.enabled = false;
        self.loop_state = LoopState::Disabled;
        self.description = "Disabled".to_string();
        self.logger.info("Auto-control disabled");
        self.persist();
        self.publish(now);
    }

    /// Run one evaluation at `now`.
    pub async fn tick_at(&mut self, now: DateTime<Utc>) -> TickOutcome {
        if self.loop_state != LoopState::Idle {
            return TickOutcome::Skipped;
        }
        self.loop_state = LoopState::Evaluating;

        let sample = self.telemetry.latest_soc(now);
        if sample.is_usable() {
            self.last_soc = Some(sample.value_percent);
        }

        if let Some(last) = self.state.last_adjustment_at
            && now - last < self.min_interval
        {
            let wait = (self.min_interval - (now - last)).num_seconds();
            self.logger
                .debug(&format!("Cooldown active, next adjustment in {wait}s"));
            return self.finish(now, TickOutcome::Cooldown);
        }

        let prior = PriorState {
            target_pct: self.state.last_target_pct,
            mode: self.state.mode,
            latched_floor_pct: self.state.latched_floor_pct,
        };
        let decision = decide(&sample, now, &prior, &self.policy);

        if decision.is_hold() {
            let msg = format!(
                "No fresh SOC sample (last observed {}), holding target",
                sample.observed_at.to_rfc3339()
            );
            self.logger.warn(&msg);
            self.state.warning = Some(msg);
            return self.finish(now, TickOutcome::Held);
        }
        self.state.warning = None;

        // Mode and latch follow the decision even if the command later fails
        self.state.mode = decision.mode;
        self.state.latched_floor_pct = decision.latched_floor_pct;
        self.state.desired_pct = Some(decision.target_pct);
        self.description = describe(decision.mode, decision.target_pct, sample.value_percent);

        self.forget_target_after_manual_override();
        if self.state.last_target_pct == Some(decision.target_pct) {
            return self.finish(now, TickOutcome::Unchanged);
        }

        self.loop_state = LoopState::Commanding;
        self.logger.info(&format!(
            "SOC {:.1}% -> {:?} target {}% (was {:?})",
            sample.value_percent, decision.mode, decision.target_pct, self.state.last_target_pct
        ));
        let cmd = PowerCommand::percent(
            self.dispatcher.base_watts(),
            decision.target_pct,
            CommandOrigin::AutoControl,
            now,
        );
        let done = self.dispatcher.submit(cmd).await;

        match done.outcome() {
            CommandOutcome::Applied => {
                self.state.last_target_pct = Some(done.target_pct);
                self.state.last_adjustment_at = Some(now);
                self.state.last_error = None;
                self.persist();
            }
            CommandOutcome::Failed(kind) => {
                // Cooldown stamp untouched so the next tick may retry
                self.state.last_error = Some(format!(
                    "{kind:?}: {}",
                    done.error.as_deref().unwrap_or("unknown error")
                ));
            }
        }
        self.finish(now, TickOutcome::Commanded(done))
    }

    /// A manual command moved the miner away from what this loop applied.
    /// Dropping the applied target makes the next eligible tick re-assert it.
    fn forget_target_after_manual_override(&mut self) {
        let Some(applied) = self.state.last_target_pct else {
            return;
        };
        let Some(last) = self.dispatcher.operation_status().last_command else {
            return;
        };
        if last.origin == CommandOrigin::Manual && last.target_pct != applied {
            self.logger.info(&format!(
                "Manual {:?} to {}% overrode auto-control target {applied}%, re-asserting",
                last.action, last.target_pct
            ));
            self.state.last_target_pct = None;
        }
    }

    fn finish(&mut self, now: DateTime<Utc>, outcome: TickOutcome) -> TickOutcome {
        self.loop_state = if self.state.enabled {
            LoopState::Idle
        } else {
            LoopState::Disabled
        };
        self.publish(now);
        outcome
    }
}

fn describe(mode: ControlMode, target: u8, soc: f64) -> String {
    match mode {
        ControlMode::Emergency => format!("Emergency shutdown, SOC {soc:.1}%"),
        ControlMode::Full => "Battery full, running at 100%".to_string(),
        ControlMode::Sunset => format!("After sunset with SOC {soc:.1}%, running at 100%"),
        ControlMode::Decile => format!("Discharge tier {target}% at SOC {soc:.1}%"),
    }
}
