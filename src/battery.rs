//! Battery portal client and snapshot normalisation
//!
//! The portal is treated as an opaque JSON provider. Its runtime document
//! uses inverter field names (`ppv1`, `pToUser`, `remainCapacity`, ...);
//! [`BatterySnapshot::from_runtime_json`] folds those into one flat record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::config::BatteryConfig;
use crate::error::{Result, SunmineError};

/// One battery pack module as reported by the portal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatteryUnit {
    pub serial: Option<String>,
    pub soc: Option<f64>,
    pub voltage_mv: Option<f64>,
    pub current_a: Option<f64>,
}

/// Normalised battery/inverter reading
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatterySnapshot {
    pub observed_at: DateTime<Utc>,
    pub soc_percent: Option<f64>,
    pub pack_voltage_v: Option<f64>,
    pub pack_current_a: Option<f64>,
    pub pv_power_w: Option<f64>,
    pub load_power_w: Option<f64>,
    pub grid_power_w: Option<f64>,
    pub ac_couple_w: Option<f64>,
    /// Positive while charging, negative while discharging
    pub battery_net_w: Option<f64>,
    pub units: Vec<BatteryUnit>,
}

/// Numbers arrive as JSON numbers or numeric strings
fn num(v: Option<&Value>) -> Option<f64> {
    let x = match v? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    x.filter(|x: &f64| x.is_finite())
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

impl BatterySnapshot {
    /// Build a snapshot from a portal document.
    ///
    /// Accepts either `{"runtime": {...}, "battery": {...}}` or a single flat
    /// object carrying both sets of fields.
    pub fn from_runtime_json(doc: &Value) -> Result<Self> {
        let Some(root) = doc.as_object() else {
            return Err(SunmineError::protocol("battery document is not an object"));
        };
        let runtime = root.get("runtime").and_then(Value::as_object).unwrap_or(root);
        let pack = root.get("battery").and_then(Value::as_object).unwrap_or(root);

        let pv_parts: Vec<f64> = ["ppv1", "ppv2", "ppv3"]
            .iter()
            .filter_map(|k| num(runtime.get(*k)))
            .collect();
        let pv_power_w = if pv_parts.is_empty() {
            num(runtime.get("ppv"))
        } else {
            Some(pv_parts.iter().sum())
        };

        let load_power_w =
            num(runtime.get("pToUser")).or_else(|| num(runtime.get("consumptionPower")));

        let charge = num(runtime.get("pCharge"));
        let discharge = num(runtime.get("pDisCharge"));
        let battery_net_w = (charge.is_some() || discharge.is_some())
            .then(|| charge.unwrap_or(0.0) - discharge.unwrap_or(0.0));

        let units: Vec<BatteryUnit> = pack
            .get("battery_units")
            .or_else(|| pack.get("batteryArray"))
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .map(|u| BatteryUnit {
                        serial: u
                            .get("batterySn")
                            .and_then(Value::as_str)
                            .map(ToString::to_string),
                        soc: num(u.get("soc")),
                        voltage_mv: num(u.get("totalVoltage")),
                        current_a: num(u.get("current")),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let soc_percent = match (num(pack.get("remainCapacity")), num(pack.get("fullCapacity"))) {
            (Some(remain), Some(full)) if full > 0.0 => Some(round1(remain / full * 100.0)),
            _ => {
                let socs: Vec<f64> = units.iter().filter_map(|u| u.soc).collect();
                if socs.is_empty() {
                    num(pack.get("soc")).or_else(|| num(pack.get("soc_percent")))
                } else {
                    #[allow(clippy::cast_precision_loss)]
                    let n = socs.len() as f64;
                    Some(round1(socs.iter().sum::<f64>() / n))
                }
            }
        };

        let pack_voltage_v = num(pack.get("totalVoltageText")).or_else(|| {
            let volts: Vec<f64> = units.iter().filter_map(|u| u.voltage_mv).collect();
            // Unit voltages are centivolts summed per pack
            (!volts.is_empty()).then(|| round1(volts.iter().sum::<f64>() / 100.0))
        });

        Ok(Self {
            observed_at: Utc::now(),
            soc_percent,
            pack_voltage_v,
            pack_current_a: num(pack.get("currentText")),
            pv_power_w,
            load_power_w,
            grid_power_w: num(runtime.get("pToGrid")),
            ac_couple_w: num(runtime.get("acCouplePower")),
            battery_net_w,
            units,
        })
    }
}

/// Source of battery snapshots
#[async_trait]
pub trait BatteryPortal: Send + Sync {
    async fn fetch(&self) -> Result<BatterySnapshot>;
}

/// Polls a JSON runtime document over HTTP
pub struct HttpBatteryPortal {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HttpBatteryPortal {
    pub fn new(cfg: &BatteryConfig) -> Result<Self> {
        if cfg.url.is_empty() {
            return Err(SunmineError::config("battery.url is not set"));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            url: cfg.url.clone(),
            token: (!cfg.token.is_empty()).then(|| cfg.token.clone()),
        })
    }
}

#[async_trait]
impl BatteryPortal for HttpBatteryPortal {
    async fn fetch(&self) -> Result<BatterySnapshot> {
        let mut req = self.client.get(&self.url);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SunmineError::transport(format!(
                "battery portal returned HTTP {status}"
            )));
        }
        let doc: Value = resp.json().await?;
        BatterySnapshot::from_runtime_json(&doc)
    }
}
