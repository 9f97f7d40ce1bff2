//! Plain-language summaries of plan metrics.
//!
//! The crate ships no model client; hosts plug one in through [`Summarizer`].
//! Whenever it fails, a deterministic sentence built from the metrics is used.

use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use crate::error::SummaryError;
use crate::plan::Metrics;

/// Shown when there is no forecast to summarize.
pub const NO_FORECAST_SUMMARY: &str = "No forecast available. Upload data via PUT /api/forecast.";

/// Extra facts a summary may mention.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct InsightContext {
    pub horizon_hours: usize,
    pub shifted_mwh: f64,
}

/// Where a summary came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SummarySource {
    Summarizer,
    Fallback,
}

/// A summary with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insight {
    pub summary: String,
    pub source: SummarySource,
}

/// External text generator.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        metrics: &Metrics,
        context: &InsightContext,
    ) -> Result<String, SummaryError>;
}

/// Templated summary used when no summarizer is available or it fails.
pub fn fallback_summary(metrics: &Metrics, context: &InsightContext) -> String {
    if context.shifted_mwh <= 0.0 {
        return format!(
            "No load shift is recommended across the next {} hours; the profile is already \
             within its peak and carbon targets.",
            context.horizon_hours
        );
    }

    let co2 = if metrics.co2_avoided_kg >= 0.0 {
        format!("avoiding about {:.0} kg of CO2", metrics.co2_avoided_kg)
    } else {
        format!("adding about {:.0} kg of CO2", -metrics.co2_avoided_kg)
    };
    format!(
        "Shift {:.1} MWh of flexible jobs out of the dirtiest hours over the next {} hours. \
         This trims peak overage by {:.1}% and lifts renewable overlap by {:.1}%, {co2}.",
        context.shifted_mwh,
        context.horizon_hours,
        metrics.peak_reduction_pct,
        metrics.renewable_gain_pct,
    )
}

/// Asks `summarizer` for a summary, substituting [`fallback_summary`] on
/// failure, blank output, or when no summarizer is configured.
pub async fn summarize_or_fallback(
    summarizer: Option<&dyn Summarizer>,
    metrics: &Metrics,
    context: &InsightContext,
) -> Insight {
    if let Some(summarizer) = summarizer {
        match summarizer.summarize(metrics, context).await {
            Ok(text) if !text.trim().is_empty() => {
                return Insight {
                    summary: text.trim().to_string(),
                    source: SummarySource::Summarizer,
                };
            }
            Ok(_) => warn!(error = %SummaryError::Empty, "using fallback summary"),
            Err(e) => warn!(error = %e, "using fallback summary"),
        }
    }

    Insight {
        summary: fallback_summary(metrics, context),
        source: SummarySource::Fallback,
    }
}
