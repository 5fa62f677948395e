//! Power policy
//!
//! Pure decision logic mapping a battery SOC sample, the wall clock and the
//! prior control state to a miner power target. No I/O happens here; the
//! controller feeds in whatever it has cached and applies the result.
//!
//! Rules are evaluated in order and the first match wins:
//!
//! 1. invalid or stale sample: hold the prior target, raise a warning
//! 2. SOC at or below the emergency threshold: 0 %, latch to 0
//! 3. SOC at or above the full threshold: 100 %, clear the latch
//! 4. past sunset with SOC above the sunset threshold: 100 %. Sunset is
//!    computed for the configured location, else the fixed fallback time
//! 5. otherwise the decile ratchet, capped by the latched floor

use crate::config::{Config, LocationConfig, ThresholdsConfig};
use crate::telemetry::SocSample;
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Which rule produced the current target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    #[default]
    Decile,
    Sunset,
    Emergency,
    Full,
}

impl ControlMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Decile => "decile",
            Self::Sunset => "sunset",
            Self::Emergency => "emergency",
            Self::Full => "full",
        }
    }
}

/// Non-fatal conditions raised while deciding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyWarning {
    StaleData,
}

/// The slice of control state the policy reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PriorState {
    pub target_pct: Option<u8>,
    pub mode: ControlMode,
    pub latched_floor_pct: Option<u8>,
}

/// Policy output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub target_pct: u8,
    pub mode: ControlMode,
    pub latched_floor_pct: Option<u8>,
    pub warning: Option<PolicyWarning>,
}

impl Decision {
    /// True when the loop must not issue a command for this decision
    pub const fn is_hold(&self) -> bool {
        self.warning.is_some()
    }
}

/// Policy parameters, resolved once from configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyConfig {
    pub thresholds: ThresholdsConfig,
    /// Fixed sunset used when no location is set or no sunset is computable
    pub sunset: NaiveTime,
    pub location: Option<LocationConfig>,
    pub timezone: Tz,
}

impl PolicyConfig {
    pub fn from_config(config: &Config) -> Self {
        let ac = &config.autocontrol;
        Self {
            thresholds: ac.thresholds,
            sunset: NaiveTime::from_hms_opt(ac.sunset_hour, ac.sunset_minute, 0)
                .unwrap_or(NaiveTime::MIN),
            location: config.location,
            timezone: config.tz(),
        }
    }

    /// Local sunset on the local date of `now`
    pub fn sunset_for(&self, now: DateTime<Utc>) -> NaiveTime {
        let today = now.with_timezone(&self.timezone).date_naive();
        self.location
            .and_then(|loc| solar_sunset(loc, today, self.timezone))
            .unwrap_or(self.sunset)
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Decide the power target for one tick.
pub fn decide(
    sample: &SocSample,
    now: DateTime<Utc>,
    prior: &PriorState,
    cfg: &PolicyConfig,
) -> Decision {
    let t = &cfg.thresholds;

    if !sample.is_usable() {
        return Decision {
            target_pct: prior.target_pct.unwrap_or(0),
            mode: prior.mode,
            latched_floor_pct: prior.latched_floor_pct,
            warning: Some(PolicyWarning::StaleData),
        };
    }
    let soc = sample.value_percent;

    if soc <= t.emergency_soc {
        return Decision {
            target_pct: 0,
            mode: ControlMode::Emergency,
            latched_floor_pct: Some(0),
            warning: None,
        };
    }

    if soc >= t.full_soc {
        return Decision {
            target_pct: 100,
            mode: ControlMode::Full,
            latched_floor_pct: None,
            warning: None,
        };
    }

    if soc > t.sunset_min_soc && is_past_sunset(now, cfg.sunset_for(now), cfg.timezone) {
        return Decision {
            target_pct: 100,
            mode: ControlMode::Sunset,
            latched_floor_pct: prior.latched_floor_pct,
            warning: None,
        };
    }

    let raw = decile_target(soc);
    let effective = prior.latched_floor_pct.map_or(raw, |floor| raw.min(floor));
    Decision {
        target_pct: effective,
        mode: ControlMode::Decile,
        latched_floor_pct: Some(effective),
        warning: None,
    }
}

/// Round SOC up to the next multiple of ten, clamped to 0..=100.
pub fn decile_target(soc: f64) -> u8 {
    let soc = soc.clamp(0.0, 100.0);
    // Clamped above, so the cast cannot truncate
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let decile = ((soc / 10.0).ceil() * 10.0) as u8;
    decile.min(100)
}

/// Whether `now` is at or after today's sunset in the given timezone.
pub fn is_past_sunset(now: DateTime<Utc>, sunset: NaiveTime, tz: Tz) -> bool {
    now.with_timezone(&tz).time() >= sunset
}

/// Local time of sunset at `loc` on `date`.
///
/// `None` during polar day or night, when the sun does not set that day.
pub fn solar_sunset(loc: LocationConfig, date: NaiveDate, tz: Tz) -> Option<NaiveTime> {
    #[allow(deprecated)]
    let (_, sunset) =
        sunrise::sunrise_sunset(loc.latitude, loc.longitude, date.year(), date.month(), date.day());
    let local = DateTime::from_timestamp(sunset, 0)?.with_timezone(&tz);
    (local.date_naive() == date).then(|| local.time())
}

/// The single percent to watts conversion.
pub fn percent_to_watts(base_watts: u32, pct: u8) -> u32 {
    let pct = u64::from(pct.min(100));
    let watts = (u64::from(base_watts) * pct + 50) / 100;
    u32::try_from(watts).unwrap_or(base_watts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn morning() -> DateTime<Utc> {
        // 09:00 in New York
        Utc.with_ymd_and_hms(2025, 6, 1, 13, 0, 0).unwrap()
    }

    fn sample(soc: f64) -> SocSample {
        SocSample::new(soc, morning())
    }

    #[test]
    fn decile_rounds_up() {
        assert_eq!(decile_target(55.0), 60);
        assert_eq!(decile_target(83.0), 90);
        assert_eq!(decile_target(90.0), 90);
        assert_eq!(decile_target(31.0), 40);
        assert_eq!(decile_target(39.0), 40);
        assert_eq!(decile_target(99.5), 100);
        assert_eq!(decile_target(130.0), 100);
    }

    #[test]
    fn watts_round_half_up() {
        assert_eq!(percent_to_watts(3600, 60), 2160);
        assert_eq!(percent_to_watts(3333, 50), 1667);
        assert_eq!(percent_to_watts(3600, 0), 0);
        assert_eq!(percent_to_watts(3600, 150), 3600);
    }

    #[test]
    fn stale_holds_prior() {
        let prior = PriorState {
            target_pct: Some(70),
            mode: ControlMode::Decile,
            latched_floor_pct: Some(70),
        };
        let stale = SocSample::invalid(morning());
        let d = decide(&stale, morning(), &prior, &PolicyConfig::default());
        assert_eq!(d.target_pct, 70);
        assert_eq!(d.latched_floor_pct, Some(70));
        assert_eq!(d.warning, Some(PolicyWarning::StaleData));
        assert!(d.is_hold());
    }

    fn new_york() -> LocationConfig {
        LocationConfig {
            latitude: 40.7128,
            longitude: -74.0060,
        }
    }

    fn between(t: NaiveTime, lo: (u32, u32), hi: (u32, u32)) -> bool {
        let at = |(h, m)| NaiveTime::from_hms_opt(h, m, 0).unwrap();
        t >= at(lo) && t <= at(hi)
    }

    #[test]
    fn solar_sunset_tracks_the_season() {
        let tz = chrono_tz::America::New_York;
        let june = NaiveDate::from_ymd_opt(2025, 6, 21).unwrap();
        let december = NaiveDate::from_ymd_opt(2025, 12, 21).unwrap();
        let summer = solar_sunset(new_york(), june, tz).unwrap();
        let winter = solar_sunset(new_york(), december, tz).unwrap();
        // Around 20:31 EDT and 16:32 EST
        assert!(between(summer, (20, 15), (20, 45)), "{summer}");
        assert!(between(winter, (16, 15), (16, 45)), "{winter}");
    }

    #[test]
    fn sunset_for_falls_back_to_fixed_time() {
        // 23:00 UTC on June 21 is 19:00 in New York
        let now = Utc.with_ymd_and_hms(2025, 6, 21, 23, 0, 0).unwrap();
        let fixed = PolicyConfig::default();
        assert_eq!(fixed.sunset_for(now), NaiveTime::from_hms_opt(19, 0, 0).unwrap());

        let located = PolicyConfig {
            location: Some(new_york()),
            ..PolicyConfig::default()
        };
        assert!(between(located.sunset_for(now), (20, 15), (20, 45)));
    }

    #[test]
    fn emergency_boundary_is_inclusive() {
        let d = decide(
            &sample(30.0),
            morning(),
            &PriorState::default(),
            &PolicyConfig::default(),
        );
        assert_eq!(d.mode, ControlMode::Emergency);
        assert_eq!(d.target_pct, 0);

        let d = decide(
            &sample(30.1),
            morning(),
            &PriorState::default(),
            &PolicyConfig::default(),
        );
        assert_eq!(d.mode, ControlMode::Decile);
        assert_eq!(d.target_pct, 40);
    }
}
