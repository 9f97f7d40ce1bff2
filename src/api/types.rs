//! API request, response and query types.

use serde::{Deserialize, Serialize};

use crate::error::ForecastError;
use crate::forecast::ForecastDigest;
use crate::insight::SummarySource;
use crate::plan::{Metrics, Plan, PreviewMode, StoredPlanRecord, Trigger};
use crate::scheduler::AlarmOutcome;

/// `?tenant=` selector; absent or blank means the default tenant.
#[derive(Debug, Default, Deserialize)]
pub struct TenantQuery {
    pub tenant: Option<String>,
}

/// `?mode=` selector of the optimize preview.
#[derive(Debug, Default, Deserialize)]
pub struct OptimizeQuery {
    #[serde(default)]
    pub mode: PreviewMode,
}

/// Acknowledgement of a stored forecast.
#[derive(Debug, Serialize)]
pub struct ForecastAccepted {
    pub status: &'static str,
    pub count: usize,
}

/// Body of `POST /api/apply`.
#[derive(Debug, Deserialize)]
pub struct ApplyBody {
    #[serde(default)]
    pub tenant: Option<String>,
    pub payload: Plan,
    #[serde(default)]
    pub forecast_digest: Option<ForecastDigest>,
    /// Recorded with the plan; `apply` when absent.
    #[serde(default)]
    pub trigger: Option<Trigger>,
}

/// An accepted apply or reoptimization.
#[derive(Debug, Serialize)]
pub struct AppliedResponse {
    pub status: &'static str,
    pub tenant: String,
    pub version: u64,
    pub metrics: Metrics,
    /// Present when the plan was applied but could not be audited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_error: Option<String>,
}

/// `POST /api/reoptimize` with no forecast to work from.
#[derive(Debug, Serialize)]
pub struct NoForecastResponse {
    pub status: &'static str,
}

/// Current plan record of a tenant.
#[derive(Debug, Serialize)]
pub struct PlanResponse {
    pub tenant: String,
    pub record: Option<StoredPlanRecord>,
}

/// Result of an alarm callback.
#[derive(Debug, Serialize)]
pub struct AlarmResponse {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consecutive_failures: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_error: Option<String>,
}

impl From<AlarmOutcome> for AlarmResponse {
    fn from(outcome: AlarmOutcome) -> Self {
        let empty = Self {
            outcome: "",
            version: None,
            consecutive_failures: None,
            audit_error: None,
        };
        match outcome {
            AlarmOutcome::Idle => Self {
                outcome: "idle",
                ..empty
            },
            AlarmOutcome::ForecastUnavailable {
                consecutive_failures,
            } => Self {
                outcome: "forecast_unavailable",
                consecutive_failures: Some(consecutive_failures),
                ..empty
            },
            AlarmOutcome::Unchanged => Self {
                outcome: "unchanged",
                ..empty
            },
            AlarmOutcome::Reoptimized {
                version,
                audit_error,
            } => Self {
                outcome: "reoptimized",
                version: Some(version),
                audit_error: audit_error.map(|e| e.to_string()),
                ..empty
            },
        }
    }
}

/// Summary of the current forecast's best plan.
#[derive(Debug, Serialize)]
pub struct InsightResponse {
    pub summary: String,
    pub source: SummarySource,
    pub metrics: Option<Metrics>,
}

/// One rejected field of a request payload.
#[derive(Debug, Serialize)]
pub struct FieldIssue {
    pub path: String,
    pub message: String,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<FieldIssue>,
    /// Version held by the tenant, on conflict.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<u64>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Vec::new(),
            current: None,
        }
    }

    /// A rejected plan payload.
    pub fn invalid_plan(reason: &str) -> Self {
        Self {
            details: vec![FieldIssue {
                path: "payload.plan".to_string(),
                message: reason.to_string(),
            }],
            ..Self::new("Invalid payload")
        }
    }

    /// Per-field details for a rejected forecast upload.
    pub fn invalid_forecast(err: &ForecastError) -> Self {
        let details = match err {
            ForecastError::Invalid {
                index,
                field,
                message,
            } => vec![FieldIssue {
                path: format!("{index}.{field}"),
                message: message.clone(),
            }],
            other => vec![FieldIssue {
                path: String::new(),
                message: other.to_string(),
            }],
        };
        Self {
            details,
            ..Self::new("Invalid payload")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_forecast_reports_row_and_field() {
        let err = ForecastError::Invalid {
            index: 3,
            field: "load_pred_mw",
            message: "must be finite".to_string(),
        };
        let body = serde_json::to_value(ErrorResponse::invalid_forecast(&err)).expect("json");
        assert_eq!(body["error"], "Invalid payload");
        assert_eq!(body["details"][0]["path"], "3.load_pred_mw");
        assert_eq!(body["details"][0]["message"], "must be finite");
        assert!(body.get("current").is_none());
    }

    #[test]
    fn alarm_response_omits_absent_fields() {
        let body = serde_json::to_value(AlarmResponse::from(AlarmOutcome::Unchanged)).expect("json");
        assert_eq!(body, serde_json::json!({ "outcome": "unchanged" }));
    }

    #[test]
    fn apply_body_trigger_is_optional() {
        let body: ApplyBody = serde_json::from_value(serde_json::json!({
            "payload": {
                "version": 1,
                "plan": { "base": [1.0], "renewable": [0.0], "optimized": [1.0] },
                "metrics": { "peak_reduction_pct": 0.0, "renewable_gain_pct": 0.0, "co2_avoided_kg": 0.0 }
            }
        }))
        .expect("json");
        assert_eq!(body.trigger, None);
        assert!(body.forecast_digest.is_none());
    }

    #[test]
    fn optimize_mode_defaults_to_carbon() {
        let q: OptimizeQuery = serde_json::from_str("{}").expect("json");
        assert_eq!(q.mode, PreviewMode::Carbon);
    }
}
