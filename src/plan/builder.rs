//! Turns a forecast snapshot into a candidate plan.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{EstimationConfig, ServiceConfig};
use crate::error::DigestError;
use crate::forecast::{ForecastDigest, ForecastRow, ForecastStore};

use super::metrics::MetricsEngine;
use super::optimizer::{Optimizer, Signal};
use super::types::{Metrics, Plan, SeriesBundle};

/// Input series derived from forecast rows.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedSeries {
    pub base: Vec<f64>,
    pub renewable: Vec<f64>,
    pub intensity: Vec<f64>,
}

/// Builds the base, renewable and intensity series for `rows`.
///
/// A row's intensity is taken as given when present; otherwise it is
/// interpolated between the configured floor and ceiling from the row's
/// renewable share, falling back to `renewable / load` clamped to `[0, 1]`
/// (zero for non-positive load).
pub fn derive_series(rows: &[ForecastRow], estimation: &EstimationConfig) -> DerivedSeries {
    let base: Vec<f64> = rows.iter().map(|r| r.load_pred_mw).collect();
    let renewable: Vec<f64> = rows.iter().map(ForecastRow::renewable_mw).collect();
    let intensity = rows
        .iter()
        .zip(base.iter().zip(&renewable))
        .map(|(row, (&load, &green))| {
            if let Some(explicit) = row.carbon_intensity_kg_per_mwh {
                return explicit;
            }
            let share = row.renewable_share.unwrap_or(if load > 0.0 {
                (green / load).clamp(0.0, 1.0)
            } else {
                0.0
            });
            estimation.floor_kg_per_mwh
                + (estimation.ceiling_kg_per_mwh - estimation.floor_kg_per_mwh) * (1.0 - share)
        })
        .collect();

    DerivedSeries {
        base,
        renewable,
        intensity,
    }
}

/// A plan computed from the live forecast, with the digest of that forecast.
#[derive(Debug, Clone)]
pub struct CandidatePlan {
    pub plan: Plan,
    pub digest: ForecastDigest,
    /// Total load moved by the optimizer (MW).
    pub shifted: f64,
    /// Number of forecast hours the plan covers.
    pub hours: usize,
}

/// Optimizer mode for read-only previews.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewMode {
    /// Shift by carbon intensity.
    #[default]
    Carbon,
    /// Trim peaks into the hours with the most renewable supply.
    Renewable,
}

/// Unversioned optimizer output for display; never applied.
#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    pub base: Vec<f64>,
    pub optimized: Vec<f64>,
    pub renewable: Vec<f64>,
    pub metrics: Metrics,
    pub shifts: f64,
}

/// Reads the forecast and runs the optimizer and metrics engine over it.
///
/// Pure apart from the forecast read; safe to call concurrently.
pub struct PlanBuilder {
    forecasts: Arc<dyn ForecastStore>,
    optimizer: Optimizer,
    metrics: MetricsEngine,
    estimation: EstimationConfig,
}

impl std::fmt::Debug for PlanBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanBuilder")
            .field("optimizer", &self.optimizer)
            .field("metrics", &self.metrics)
            .field("estimation", &self.estimation)
            .finish_non_exhaustive()
    }
}

impl PlanBuilder {
    pub fn new(
        forecasts: Arc<dyn ForecastStore>,
        optimizer: Optimizer,
        metrics: MetricsEngine,
        estimation: EstimationConfig,
    ) -> Self {
        Self {
            forecasts,
            optimizer,
            metrics,
            estimation,
        }
    }

    /// Builds a plan builder from the service configuration.
    pub fn from_config(forecasts: Arc<dyn ForecastStore>, config: &ServiceConfig) -> Self {
        Self::new(
            forecasts,
            Optimizer::new(config.optimizer.clone()),
            MetricsEngine::new(config.metrics.clone()),
            config.estimation.clone(),
        )
    }

    /// Forecast store this builder reads from.
    pub fn forecasts(&self) -> &Arc<dyn ForecastStore> {
        &self.forecasts
    }

    /// Computes a candidate plan with the given version.
    ///
    /// # Returns
    ///
    /// `Ok(None)` when no forecast is available.
    ///
    /// # Errors
    ///
    /// Returns a `DigestError` if the forecast cannot be hashed.
    pub async fn build(&self, version: u64) -> Result<Option<CandidatePlan>, DigestError> {
        let Some(rows) = self.forecasts.read().await else {
            return Ok(None);
        };
        if rows.is_empty() {
            return Ok(None);
        }
        self.build_from_rows(&rows, version).map(Some)
    }

    /// Computes a candidate plan from an explicit snapshot.
    ///
    /// # Errors
    ///
    /// Returns a `DigestError` if the rows cannot be hashed.
    pub fn build_from_rows(
        &self,
        rows: &[ForecastRow],
        version: u64,
    ) -> Result<CandidatePlan, DigestError> {
        let digest = ForecastDigest::of(rows)?;
        let series = derive_series(rows, &self.estimation);
        let outcome = self
            .optimizer
            .optimize(&series.base, Signal::Intensity(&series.intensity));
        let metrics = self.metrics.compute(
            &series.base,
            &outcome.optimized,
            &series.renewable,
            Some(&series.intensity),
        );

        Ok(CandidatePlan {
            plan: Plan {
                version,
                series: SeriesBundle {
                    base: series.base,
                    renewable: series.renewable,
                    intensity: Some(series.intensity),
                    optimized: outcome.optimized,
                },
                metrics,
            },
            digest,
            shifted: outcome.shifted,
            hours: rows.len(),
        })
    }

    /// Runs the optimizer over the live forecast without producing a plan.
    ///
    /// Returns `None` when no forecast is available.
    pub async fn preview(&self, mode: PreviewMode) -> Option<Preview> {
        let rows = self.forecasts.read().await?;
        if rows.is_empty() {
            return None;
        }
        let series = derive_series(&rows, &self.estimation);
        let (outcome, intensity) = match mode {
            PreviewMode::Carbon => (
                self.optimizer
                    .optimize(&series.base, Signal::Intensity(&series.intensity)),
                Some(series.intensity.as_slice()),
            ),
            PreviewMode::Renewable => (
                self.optimizer
                    .optimize(&series.base, Signal::Renewable(&series.renewable)),
                None,
            ),
        };
        let metrics =
            self.metrics
                .compute(&series.base, &outcome.optimized, &series.renewable, intensity);

        Some(Preview {
            base: series.base,
            optimized: outcome.optimized,
            renewable: series.renewable,
            metrics,
            shifts: outcome.shifted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::MemoryForecastStore;

    fn row(ds: &str, load: f64, solar: f64, wind: f64) -> ForecastRow {
        ForecastRow {
            solar_mw: Some(solar),
            wind_mw: Some(wind),
            ..ForecastRow::new(ds, load)
        }
    }

    fn builder(rows: Vec<ForecastRow>) -> PlanBuilder {
        PlanBuilder::from_config(
            Arc::new(MemoryForecastStore::with_rows(rows)),
            &ServiceConfig::default(),
        )
    }

    #[test]
    fn intensity_estimated_from_share() {
        let mut explicit = row("2025-06-01T00:00:00Z", 100.0, 0.0, 0.0);
        explicit.carbon_intensity_kg_per_mwh = Some(321.0);
        let mut shared = row("2025-06-01T01:00:00Z", 100.0, 0.0, 0.0);
        shared.renewable_share = Some(0.5);
        let rows = vec![
            explicit,
            shared,
            row("2025-06-01T02:00:00Z", 100.0, 25.0, 25.0),
            row("2025-06-01T03:00:00Z", 100.0, 200.0, 0.0),
            row("2025-06-01T04:00:00Z", 0.0, 10.0, 0.0),
        ];
        let series = derive_series(&rows, &EstimationConfig::default());
        assert_eq!(series.intensity, vec![321.0, 265.0, 265.0, 80.0, 450.0]);
        assert_eq!(series.renewable, vec![0.0, 0.0, 50.0, 200.0, 10.0]);
        assert_eq!(series.base.len(), series.intensity.len());
    }

    #[tokio::test]
    async fn build_returns_none_without_forecast() {
        let b = builder(Vec::new());
        assert!(b.build(1).await.expect("no digest needed").is_none());
        assert!(b.preview(PreviewMode::Carbon).await.is_none());
    }

    #[tokio::test]
    async fn build_produces_aligned_versioned_plan() {
        let b = builder(vec![
            row("2025-06-01T00:00:00Z", 100.0, 0.0, 0.0),
            row("2025-06-01T01:00:00Z", 40.0, 30.0, 10.0),
            row("2025-06-01T02:00:00Z", 40.0, 40.0, 0.0),
        ]);
        let candidate = b.build(42).await.expect("digest").expect("forecast present");
        assert_eq!(candidate.plan.version, 42);
        assert_eq!(candidate.hours, 3);
        assert!(candidate.plan.series.is_aligned());
        assert!(candidate.shifted > 0.0);
        assert!(candidate.plan.metrics.peak_reduction_pct > 0.0);

        let again = b.build(43).await.expect("digest").expect("forecast present");
        assert_eq!(candidate.digest, again.digest);
        assert_eq!(candidate.plan.series, again.plan.series);
    }

    #[tokio::test]
    async fn preview_modes_differ_in_signal() {
        let b = builder(vec![
            row("2025-06-01T00:00:00Z", 100.0, 0.0, 0.0),
            row("2025-06-01T01:00:00Z", 50.0, 0.0, 0.0),
            row("2025-06-01T02:00:00Z", 50.0, 40.0, 0.0),
        ]);
        let renewable = b.preview(PreviewMode::Renewable).await.expect("forecast");
        assert_eq!(renewable.optimized, vec![90.0, 50.0, 60.0]);
        assert_eq!(renewable.shifts, 10.0);

        let carbon = b.preview(PreviewMode::Carbon).await.expect("forecast");
        let total: f64 = carbon.optimized.iter().sum();
        assert!((total - 200.0).abs() < 1e-9);
    }
}
