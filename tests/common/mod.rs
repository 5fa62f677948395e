#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::Duration;
use sunmine::error::{Result, SunmineError};
use sunmine::miner::{Ack, MinerClient, MinerSnapshot};
use sunmine::telemetry::{SocSample, TelemetrySource};

/// How the fake miner answers write commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Unreachable,
    Reject,
}

/// Miner double that records every RPC
pub struct FakeMiner {
    pub base_watts: u32,
    pub calls: Mutex<Vec<String>>,
    pub reply: Mutex<Reply>,
    pub delay: Duration,
    /// What `summary` reports; the default reports nothing to compare
    pub summary: Mutex<MinerSnapshot>,
}

impl FakeMiner {
    pub fn new() -> Self {
        Self {
            base_watts: 3600,
            calls: Mutex::new(Vec::new()),
            reply: Mutex::new(Reply::Ok),
            delay: Duration::ZERO,
            summary: Mutex::new(MinerSnapshot::default()),
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    pub fn set_reply(&self, reply: Reply) {
        *self.reply.lock().unwrap() = reply;
    }

    pub fn set_summary(&self, summary: MinerSnapshot) {
        *self.summary.lock().unwrap() = summary;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    async fn answer(&self, call: String) -> Result<Ack> {
        self.calls.lock().unwrap().push(format!("{call}:start"));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let reply = *self.reply.lock().unwrap();
        self.calls.lock().unwrap().push(call);
        match reply {
            Reply::Ok => Ok(Ack {
                code: Some(0),
                message: "OK".to_string(),
            }),
            Reply::Unreachable => Err(SunmineError::transport("connection refused")),
            Reply::Reject => Err(SunmineError::rejected("invalid command (code 14)")),
        }
    }

    /// Completed calls only, without the start markers
    pub fn completed(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.ends_with(":start"))
            .collect()
    }
}

#[async_trait]
impl MinerClient for FakeMiner {
    fn base_watts(&self) -> u32 {
        self.base_watts
    }

    async fn summary(&self) -> Result<MinerSnapshot> {
        Ok(self.summary.lock().unwrap().clone())
    }

    async fn set_power_limit(&self, watts: u32) -> Result<Ack> {
        self.answer(format!("limit:{watts}")).await
    }

    async fn set_power_on(&self) -> Result<Ack> {
        self.answer("on".to_string()).await
    }

    async fn set_power_off(&self) -> Result<Ack> {
        self.answer("off".to_string()).await
    }
}

/// Telemetry double; `None` means no fresh sample
pub struct ManualSoc(pub Mutex<Option<f64>>);

impl ManualSoc {
    pub fn new(soc: f64) -> Self {
        Self(Mutex::new(Some(soc)))
    }

    pub fn set(&self, soc: Option<f64>) {
        *self.0.lock().unwrap() = soc;
    }
}

impl TelemetrySource for ManualSoc {
    fn latest_soc(&self, now: DateTime<Utc>) -> SocSample {
        match *self.0.lock().unwrap() {
            Some(v) => SocSample::new(v, now),
            None => SocSample::invalid(now),
        }
    }
}
