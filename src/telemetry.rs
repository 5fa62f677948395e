//! Telemetry plumbing
//!
//! Battery and miner pollers run on their own cadences and publish into
//! single-slot [`LatestCell`]s. The control loop only ever reads the cached
//! value; it never waits on the network.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{Duration, MissedTickBehavior, interval};

use crate::battery::{BatteryPortal, BatterySnapshot};
use crate::error::Result;
use crate::logging::get_logger;
use crate::miner::{MinerClient, MinerSnapshot};

/// One SOC reading as seen by the control loop
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SocSample {
    pub value_percent: f64,
    pub observed_at: DateTime<Utc>,
    pub valid: bool,
}

impl SocSample {
    /// A sample that is valid when the value is finite. Packs report a
    /// remaining capacity slightly above nominal when full, so the value is
    /// clamped into 0..=100.
    pub fn new(value_percent: f64, observed_at: DateTime<Utc>) -> Self {
        let valid = value_percent.is_finite();
        Self {
            value_percent: if valid {
                value_percent.clamp(0.0, 100.0)
            } else {
                value_percent
            },
            observed_at,
            valid,
        }
    }

    /// Placeholder for "nothing usable"
    pub const fn invalid(observed_at: DateTime<Utc>) -> Self {
        Self {
            value_percent: 0.0,
            observed_at,
            valid: false,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.valid && self.value_percent.is_finite() && (0.0..=100.0).contains(&self.value_percent)
    }
}

/// Last-write-wins single value shared between one writer and many readers.
///
/// Readers never block the writer and never see history.
#[derive(Debug)]
pub struct LatestCell<T> {
    tx: Arc<watch::Sender<Option<T>>>,
}

impl<T> Clone for LatestCell<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T: Clone> Default for LatestCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> LatestCell<T> {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Replace the stored value
    pub fn set(&self, value: T) {
        self.tx.send_replace(Some(value));
    }

    /// Copy of the current value, if any was ever written
    pub fn get(&self) -> Option<T> {
        self.tx.borrow().clone()
    }

    /// Change notifications for streaming readers
    pub fn subscribe(&self) -> watch::Receiver<Option<T>> {
        self.tx.subscribe()
    }

    /// Apply an in-place edit, creating the value from `init` if empty
    pub fn update<F>(&self, init: impl FnOnce() -> T, edit: F)
    where
        F: FnOnce(&mut T),
    {
        self.tx.send_modify(|slot| {
            let value = slot.get_or_insert_with(init);
            edit(value);
        });
    }
}

/// Connectivity of a polled device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

impl ConnectionStatus {
    fn record_success(&mut self, at: DateTime<Utc>) {
        self.connected = true;
        self.last_seen = Some(at);
        self.last_error = None;
        self.consecutive_failures = 0;
    }

    fn record_failure(&mut self, error: String) {
        self.connected = false;
        self.last_error = Some(error);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    /// Seconds since the last successful poll
    pub fn seconds_since_seen(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_seen.map(|t| (now - t).num_seconds())
    }
}

/// Cached SOC provider consumed by the control loop
pub trait TelemetrySource: Send + Sync {
    /// Most recent SOC sample; `valid=false` if none is fresh enough
    fn latest_soc(&self, now: DateTime<Utc>) -> SocSample;
}

/// Battery telemetry cell plus its staleness window
#[derive(Debug, Clone)]
pub struct BatteryTelemetry {
    cell: LatestCell<BatterySnapshot>,
    stale_after: chrono::Duration,
}

impl BatteryTelemetry {
    pub fn new(cell: LatestCell<BatterySnapshot>, stale_after_seconds: u64) -> Self {
        let secs = i64::try_from(stale_after_seconds).unwrap_or(i64::MAX / 1000);
        Self {
            cell,
            stale_after: chrono::Duration::seconds(secs),
        }
    }

    pub const fn cell(&self) -> &LatestCell<BatterySnapshot> {
        &self.cell
    }
}

impl TelemetrySource for BatteryTelemetry {
    fn latest_soc(&self, now: DateTime<Utc>) -> SocSample {
        let Some(snapshot) = self.cell.get() else {
            return SocSample::invalid(now);
        };
        let Some(soc) = snapshot.soc_percent else {
            return SocSample::invalid(snapshot.observed_at);
        };
        let mut sample = SocSample::new(soc, snapshot.observed_at);
        if now - snapshot.observed_at > self.stale_after {
            sample.valid = false;
        }
        sample
    }
}

/// Shared cells filled by the pollers and read by the controller and web layer
#[derive(Debug, Clone, Default)]
pub struct TelemetryHub {
    pub battery: LatestCell<BatterySnapshot>,
    pub battery_status: LatestCell<ConnectionStatus>,
    pub miner: LatestCell<MinerSnapshot>,
    pub miner_status: LatestCell<ConnectionStatus>,
}

impl TelemetryHub {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Poll `fetch` every `period` until shutdown, publishing into `cell`.
///
/// Failures keep the previous value in place so readers judge freshness by
/// the snapshot timestamp rather than by presence.
pub async fn poll_loop<T, F, Fut>(
    component: &'static str,
    period: Duration,
    mut fetch: F,
    cell: LatestCell<T>,
    status: LatestCell<ConnectionStatus>,
    mut shutdown: watch::Receiver<bool>,
) where
    T: Clone + Send + Sync,
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T>> + Send,
{
    let logger = get_logger(component);
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    logger.info(&format!("Polling every {}s", period.as_secs()));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match fetch().await {
                    Ok(value) => {
                        cell.set(value);
                        status.update(ConnectionStatus::default, |s| s.record_success(Utc::now()));
                    }
                    Err(e) => {
                        let msg = e.to_string();
                        let mut first = false;
                        status.update(ConnectionStatus::default, |s| {
                            first = s.consecutive_failures == 0;
                            s.record_failure(msg.clone());
                        });
                        // Only the first failure of a streak is loud
                        if first {
                            logger.error(&format!("Poll failed: {msg}"));
                        } else {
                            logger.debug(&format!("Poll still failing: {msg}"));
                        }
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    logger.info("Poller stopping");
                    break;
                }
            }
        }
    }
}

/// Spawn the battery poller
pub fn spawn_battery_poller(
    portal: Arc<dyn BatteryPortal>,
    hub: &TelemetryHub,
    period: Duration,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let cell = hub.battery.clone();
    let status = hub.battery_status.clone();
    tokio::spawn(async move {
        poll_loop(
            "battery",
            period,
            move || {
                let portal = Arc::clone(&portal);
                async move { portal.fetch().await }
            },
            cell,
            status,
            shutdown,
        )
        .await;
    })
}

/// Spawn the miner summary poller
pub fn spawn_miner_poller(
    miner: Arc<dyn MinerClient>,
    hub: &TelemetryHub,
    period: Duration,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let cell = hub.miner.clone();
    let status = hub.miner_status.clone();
    tokio::spawn(async move {
        poll_loop(
            "miner",
            period,
            move || {
                let miner = Arc::clone(&miner);
                async move { miner.summary().await }
            },
            cell,
            status,
            shutdown,
        )
        .await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn snapshot(soc: Option<f64>, observed_at: DateTime<Utc>) -> BatterySnapshot {
        BatterySnapshot {
            soc_percent: soc,
            observed_at,
            ..BatterySnapshot::default()
        }
    }

    #[test]
    fn empty_cell_is_invalid() {
        let t = BatteryTelemetry::new(LatestCell::new(), 90);
        assert!(!t.latest_soc(at(0)).valid);
    }

    #[test]
    fn staleness_window_applies() {
        let cell = LatestCell::new();
        cell.set(snapshot(Some(64.0), at(0)));
        let t = BatteryTelemetry::new(cell, 90);
        assert!(t.latest_soc(at(90)).valid);
        assert!(!t.latest_soc(at(91)).valid);
    }

    #[test]
    fn missing_or_bogus_soc_is_invalid() {
        let cell = LatestCell::new();
        let t = BatteryTelemetry::new(cell.clone(), 90);
        cell.set(snapshot(None, at(0)));
        assert!(!t.latest_soc(at(1)).valid);
        cell.set(snapshot(Some(f64::NAN), at(0)));
        assert!(!t.latest_soc(at(1)).is_usable());
        cell.set(snapshot(Some(f64::INFINITY), at(0)));
        assert!(!t.latest_soc(at(1)).is_usable());
    }

    #[test]
    fn overfull_pack_reads_as_full() {
        let cell = LatestCell::new();
        let t = BatteryTelemetry::new(cell.clone(), 90);
        let doc = serde_json::json!({"remainCapacity": 281, "fullCapacity": 280});
        let mut snap = BatterySnapshot::from_runtime_json(&doc).unwrap();
        snap.observed_at = at(0);
        assert_eq!(snap.soc_percent, Some(100.4));
        cell.set(snap);

        let sample = t.latest_soc(at(1));
        assert!(sample.is_usable());
        assert!((sample.value_percent - 100.0).abs() < f64::EPSILON);
        assert!((SocSample::new(-0.3, at(0)).value_percent).abs() < f64::EPSILON);
    }

    #[test]
    fn last_write_wins() {
        let cell = LatestCell::new();
        cell.set(1u32);
        cell.set(2u32);
        assert_eq!(cell.get(), Some(2));
    }

    #[tokio::test]
    async fn poll_loop_records_failures_and_stops() {
        let cell: LatestCell<u32> = LatestCell::new();
        let status = LatestCell::new();
        let (tx, rx) = watch::channel(false);
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let task = tokio::spawn(poll_loop(
            "test",
            Duration::from_millis(5),
            move || {
                let n = c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(crate::error::SunmineError::transport("refused"))
                    } else {
                        Ok(n)
                    }
                }
            },
            cell.clone(),
            status.clone(),
            rx,
        ));
        tokio::time::sleep(Duration::from_millis(40)).await;
        tx.send(true).unwrap();
        task.await.unwrap();
        assert!(cell.get().unwrap() >= 1);
        let st = status.get().unwrap();
        assert!(st.connected);
        assert_eq!(st.consecutive_failures, 0);
    }
}
