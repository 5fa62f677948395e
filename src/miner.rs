//! WhatsMiner RPC client
//!
//! The miner speaks newline-delimited JSON on TCP port 4028: one request per
//! connection, one reply line back. Replies carry a `STATUS` of `"S"` or
//! `"E"`, either as a top-level string or inside a list of status objects.
//! Write commands frequently restart the RPC daemon before it answers, so an
//! empty reply to a write is treated as success.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::MinerConfig;
use crate::error::{Result, SunmineError};
use crate::logging::{LogContext, StructuredLogger};
use crate::policy::percent_to_watts;

/// Code the firmware uses when it accepted a write but restarts before replying
pub const NO_REPLY_CODE: i64 = 131;

/// Positive acknowledgement from the miner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub code: Option<i64>,
    pub message: String,
}

impl Ack {
    fn from_reply(reply: &Value) -> Self {
        let (_, code, msg) = status_fields(reply);
        Self {
            code,
            message: msg.unwrap_or_default(),
        }
    }
}

/// Parsed miner summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MinerSnapshot {
    pub observed_at: DateTime<Utc>,
    pub power_w: Option<f64>,
    pub power_limit_w: Option<f64>,
    pub hashrate_ths: Option<f64>,
    /// Watts per TH/s
    pub efficiency_w_per_th: Option<f64>,
    pub temperature_c: Option<f64>,
    pub fan_in_rpm: Option<f64>,
    pub fan_out_rpm: Option<f64>,
    pub uptime_seconds: Option<u64>,
    pub is_mining: Option<bool>,
}

fn num(item: &serde_json::Map<String, Value>, key: &str) -> Option<f64> {
    let x = match item.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    x.filter(|x: &f64| x.is_finite())
}

/// Hashrate in TH/s from whichever unit the firmware reports
pub fn hashrate_ths(item: &serde_json::Map<String, Value>) -> Option<f64> {
    const UNITS: [(&[&str], f64); 3] = [
        (&["THS 5s", "THS av", "TH/s", "THS"], 1.0),
        (&["GHS 5s", "GHS av", "GH/s", "GHS"], 1_000.0),
        (
            &["MHS 5s", "MHS av", "MH/s", "MHS", "MHS 1m", "MHS 5m", "MHS 15m"],
            1_000_000.0,
        ),
    ];
    for (keys, divisor) in UNITS {
        for key in keys {
            if let Some(v) = num(item, key) {
                return (v >= 0.0).then_some(v / divisor);
            }
        }
    }
    None
}

impl MinerSnapshot {
    /// Build from a `summary` reply
    pub fn from_summary(reply: &Value) -> Result<Self> {
        let item = reply
            .get("SUMMARY")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .or_else(|| reply.get("Msg").filter(|m| m.is_object()))
            .and_then(Value::as_object)
            .ok_or_else(|| SunmineError::protocol("summary reply has no SUMMARY item"))?;

        let power_w = num(item, "Power");
        let hashrate = hashrate_ths(item);
        let efficiency_w_per_th = match (power_w, hashrate) {
            (Some(p), Some(h)) if h > 0.0 => Some((p / h * 10.0).round() / 10.0),
            _ => None,
        };
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let uptime_seconds = num(item, "Elapsed")
            .filter(|e| *e >= 0.0)
            .map(|e| e as u64);

        Ok(Self {
            observed_at: Utc::now(),
            power_w,
            power_limit_w: num(item, "Power Limit"),
            hashrate_ths: hashrate,
            efficiency_w_per_th,
            temperature_c: num(item, "Temperature"),
            fan_in_rpm: num(item, "Fan Speed In"),
            fan_out_rpm: num(item, "Fan Speed Out"),
            uptime_seconds,
            is_mining: item.get("is_mining").and_then(Value::as_bool),
        })
    }

    /// Below this draw the miner is considered off
    pub const OFF_THRESHOLD_W: f64 = 100.0;

    /// `Some(false)` when the reported draw says the hashboards are idle
    pub fn appears_powered(&self) -> Option<bool> {
        self.is_mining
            .or_else(|| self.power_w.map(|p| p >= Self::OFF_THRESHOLD_W))
    }
}

/// `(status, code, message)` from either reply layout
fn status_fields(reply: &Value) -> (Option<String>, Option<i64>, Option<String>) {
    let holder = match reply.get("STATUS") {
        Some(Value::Array(items)) => items.first().unwrap_or(reply),
        _ => reply,
    };
    let status = match holder.get("STATUS") {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    };
    let code = holder.get("Code").and_then(Value::as_i64);
    let msg = holder
        .get("Msg")
        .and_then(Value::as_str)
        .or_else(|| holder.get("Description").and_then(Value::as_str))
        .map(ToString::to_string);
    (status, code, msg)
}

/// Parse one reply line. `"E"` replies become [`SunmineError::Rejected`];
/// an empty line is the benign no-reply status.
pub fn parse_reply(line: &str) -> Result<Value> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(json!({
            "STATUS": "S",
            "Code": NO_REPLY_CODE,
            "Msg": "No immediate reply (miner may be restarting)",
        }));
    }
    // Some firmware pads the reply with NULs
    let line = line.trim_end_matches('\0');
    let reply: Value = serde_json::from_str(line)
        .map_err(|e| SunmineError::protocol(format!("invalid miner reply: {e}")))?;
    if !reply.is_object() {
        return Err(SunmineError::protocol("miner reply is not an object"));
    }
    let (status, code, msg) = status_fields(&reply);
    if status.as_deref() == Some("E") {
        let msg = msg.unwrap_or_else(|| "unspecified error".to_string());
        return Err(SunmineError::rejected(match code {
            Some(c) => format!("{msg} (code {c})"),
            None => msg,
        }));
    }
    Ok(reply)
}

/// Miner control surface consumed by the dispatcher and pollers
#[async_trait]
pub trait MinerClient: Send + Sync {
    /// Watts corresponding to 100 %
    fn base_watts(&self) -> u32;

    async fn summary(&self) -> Result<MinerSnapshot>;

    async fn set_power_limit(&self, watts: u32) -> Result<Ack>;

    async fn set_power_on(&self) -> Result<Ack>;

    async fn set_power_off(&self) -> Result<Ack>;

    async fn set_power_percent(&self, pct: u8) -> Result<Ack> {
        self.set_power_limit(percent_to_watts(self.base_watts(), pct))
            .await
    }
}

/// Plaintext WhatsMiner API client
pub struct WhatsMinerClient {
    host: String,
    port: u16,
    base_watts: u32,
    io_timeout: Duration,
    logger: StructuredLogger,
}

impl WhatsMinerClient {
    pub fn new(cfg: &MinerConfig) -> Self {
        let context =
            LogContext::new("miner").with_field("addr", format!("{}:{}", cfg.host, cfg.port));
        Self {
            host: cfg.host.clone(),
            port: cfg.port,
            base_watts: cfg.base_watts,
            io_timeout: Duration::from_millis(cfg.timeout_ms),
            logger: StructuredLogger::new(context),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Send one command and read one reply line.
    ///
    /// `write` marks commands whose reply may never arrive because the
    /// firmware restarts; a read timeout then counts as an empty reply.
    async fn send(&self, request: &Value, write: bool) -> Result<Value> {
        let addr = self.address();
        let stream = timeout(self.io_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| SunmineError::timeout(format!("connect to {addr}")))?
            .map_err(|e| SunmineError::transport(format!("connect to {addr}: {e}")))?;

        let (read_half, mut write_half) = stream.into_split();
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        timeout(self.io_timeout, write_half.write_all(line.as_bytes()))
            .await
            .map_err(|_| SunmineError::timeout(format!("write to {addr}")))?
            .map_err(|e| SunmineError::transport(format!("write to {addr}: {e}")))?;

        let mut reader = BufReader::new(read_half);
        let mut reply = String::new();
        match timeout(self.io_timeout, reader.read_line(&mut reply)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) if write => {
                self.logger.debug(&format!("No reply after write: {e}"));
                reply.clear();
            }
            Ok(Err(e)) => {
                return Err(SunmineError::transport(format!("read from {addr}: {e}")));
            }
            Err(_) if write => reply.clear(),
            Err(_) => return Err(SunmineError::timeout(format!("read from {addr}"))),
        }
        parse_reply(&reply)
    }
}

#[async_trait]
impl MinerClient for WhatsMinerClient {
    fn base_watts(&self) -> u32 {
        self.base_watts
    }

    async fn summary(&self) -> Result<MinerSnapshot> {
        let reply = self.send(&json!({"cmd": "summary"}), false).await?;
        MinerSnapshot::from_summary(&reply)
    }

    async fn set_power_limit(&self, watts: u32) -> Result<Ack> {
        let reply = self
            .send(
                &json!({"cmd": "adjust_power_limit", "power_limit": watts.to_string()}),
                true,
            )
            .await?;
        Ok(Ack::from_reply(&reply))
    }

    async fn set_power_on(&self) -> Result<Ack> {
        let reply = self.send(&json!({"cmd": "power_on"}), true).await?;
        Ok(Ack::from_reply(&reply))
    }

    async fn set_power_off(&self) -> Result<Ack> {
        let reply = self
            .send(&json!({"cmd": "power_off", "respbefore": "true"}), true)
            .await?;
        Ok(Ack::from_reply(&reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_reply_is_benign() {
        let v = parse_reply("  \n").unwrap();
        assert_eq!(v["Code"], NO_REPLY_CODE);
    }

    #[test]
    fn error_status_is_rejected_in_both_layouts() {
        let flat = r#"{"STATUS":"E","Code":14,"Msg":"invalid cmd"}"#;
        let err = parse_reply(flat).unwrap_err();
        assert!(matches!(err, SunmineError::Rejected { .. }));
        assert!(err.to_string().contains("code 14"));

        let listed = r#"{"STATUS":[{"STATUS":"E","Msg":"over max power"}]}"#;
        assert!(matches!(
            parse_reply(listed),
            Err(SunmineError::Rejected { .. })
        ));
    }

    #[test]
    fn garbage_is_protocol_error() {
        let err = parse_reply("{not json").unwrap_err();
        assert!(matches!(err, SunmineError::Protocol { .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn summary_fields_and_units() {
        let reply = parse_reply(
            r#"{"STATUS":[{"STATUS":"S","Msg":"Summary"}],"SUMMARY":[{"Power":3310,"Power Limit":"3600","MHS av":110500000.0,"Temperature":71.5,"Fan Speed In":4200,"Elapsed":5400}]}"#,
        )
        .unwrap();
        let s = MinerSnapshot::from_summary(&reply).unwrap();
        assert_eq!(s.power_w, Some(3310.0));
        assert_eq!(s.power_limit_w, Some(3600.0));
        assert_eq!(s.hashrate_ths, Some(110.5));
        assert_eq!(s.efficiency_w_per_th, Some(30.0));
        assert_eq!(s.uptime_seconds, Some(5400));
        assert_eq!(s.appears_powered(), Some(true));
    }

    #[test]
    fn idle_draw_reads_as_off() {
        let s = MinerSnapshot {
            power_w: Some(40.0),
            ..MinerSnapshot::default()
        };
        assert_eq!(s.appears_powered(), Some(false));
        assert_eq!(MinerSnapshot::default().appears_powered(), None);
    }
}
