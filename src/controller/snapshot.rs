use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::AutoController;
use super::types::ControlStatus;
use crate::policy::{is_past_sunset, percent_to_watts};

impl AutoController {
    pub(crate) fn build_status(&self, now: DateTime<Utc>) -> ControlStatus {
        let base = self.dispatcher.base_watts();
        let sunset = self.policy.sunset_for(now);
        ControlStatus {
            timestamp: now,
            enabled: self.state.enabled,
            loop_state: self.loop_state,
            mode: self.state.mode,
            target_pct: self.state.desired_pct,
            target_watts: self.state.desired_pct.map(|p| percent_to_watts(base, p)),
            applied_pct: self.state.last_target_pct,
            applied_watts: self.state.last_target_pct.map(|p| percent_to_watts(base, p)),
            latched_floor_pct: self.state.latched_floor_pct,
            last_adjustment_at: self.state.last_adjustment_at,
            last_error: self.state.last_error.clone(),
            warning: self.state.warning.clone(),
            soc_percent: self.last_soc,
            description: self.description.clone(),
            min_interval_sec: self.min_interval.num_seconds(),
            sunset: sunset.format("%H:%M").to_string(),
            is_past_sunset: is_past_sunset(now, sunset, self.policy.timezone),
        }
    }

    /// Publish a snapshot to watchers
    pub(crate) fn publish(&self, now: DateTime<Utc>) {
        let status = Arc::new(self.build_status(now));
        self.status_tx.send_replace(status);
    }
}
