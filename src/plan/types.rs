//! Plan data model: series bundle, metrics, triggers and the stored record.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::forecast::ForecastDigest;

/// Parallel hourly series derived from one forecast snapshot.
///
/// All present series have the same length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesBundle {
    /// Baseline load (MW).
    pub base: Vec<f64>,
    /// Renewable availability, solar plus wind (MW).
    pub renewable: Vec<f64>,
    /// Carbon intensity (kg CO₂/MWh), explicit or estimated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intensity: Option<Vec<f64>>,
    /// Load after shifting (MW).
    pub optimized: Vec<f64>,
}

impl SeriesBundle {
    /// Number of hours covered.
    pub fn len(&self) -> usize {
        self.base.len()
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }

    /// True when every present series has the baseline's length.
    pub fn is_aligned(&self) -> bool {
        let n = self.base.len();
        self.renewable.len() == n
            && self.optimized.len() == n
            && self.intensity.as_ref().is_none_or(|i| i.len() == n)
    }
}

/// Score of a plan against its baseline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Reduction of load above the peak threshold (%).
    pub peak_reduction_pct: f64,
    /// Increase of load served by renewables (%).
    pub renewable_gain_pct: f64,
    /// Emissions avoided (kg CO₂). Negative when the plan made things worse.
    pub co2_avoided_kg: f64,
}

/// An immutable, versioned load plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Strictly increasing per tenant; milliseconds since the epoch by convention.
    pub version: u64,
    #[serde(rename = "plan")]
    pub series: SeriesBundle,
    pub metrics: Metrics,
}

/// Why a plan version was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Trigger {
    Manual,
    Reoptimize,
    Cron,
    Alarm,
    Apply,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Reoptimize => "reoptimize",
            Self::Cron => "cron",
            Self::Alarm => "alarm",
            Self::Apply => "apply",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted state of one tenant's scheduler.
///
/// Replaced wholesale on every accepted apply or self-reoptimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPlanRecord {
    pub plan: Plan,
    /// Digest of the forecast the plan was computed from. `None` disables drift checks.
    pub forecast_digest: Option<ForecastDigest>,
    pub trigger: Trigger,
    pub updated_at: DateTime<Utc>,
    /// Next scheduled drift check, if any.
    pub next_alarm_at: Option<DateTime<Utc>>,
}

/// Current wall-clock time as a plan version.
pub fn version_now() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_serializes_kebab_case() {
        let json = serde_json::to_string(&Trigger::Reoptimize).expect("serialize");
        assert_eq!(json, "\"reoptimize\"");
        let back: Trigger = serde_json::from_str("\"alarm\"").expect("deserialize");
        assert_eq!(back, Trigger::Alarm);
        assert_eq!(Trigger::Cron.to_string(), "cron");
    }

    #[test]
    fn plan_uses_wire_field_names() {
        let plan = Plan {
            version: 7,
            series: SeriesBundle {
                base: vec![1.0],
                renewable: vec![0.5],
                intensity: None,
                optimized: vec![1.0],
            },
            metrics: Metrics::default(),
        };
        let json = serde_json::to_value(&plan).expect("serialize");
        assert_eq!(json["version"], 7);
        assert!(json["plan"]["base"].is_array());
        assert!(json["plan"].get("intensity").is_none());
        assert!(json["metrics"]["co2_avoided_kg"].is_number());
    }

    #[test]
    fn misaligned_bundle_detected() {
        let mut bundle = SeriesBundle {
            base: vec![1.0, 2.0],
            renewable: vec![0.0, 0.0],
            intensity: Some(vec![100.0, 200.0]),
            optimized: vec![1.0, 2.0],
        };
        assert!(bundle.is_aligned());
        bundle.intensity = Some(vec![100.0]);
        assert!(!bundle.is_aligned());
    }
}
