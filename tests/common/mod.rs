//! Shared test fixtures for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use carbon_shift::audit::MemoryAuditLog;
use carbon_shift::config::ServiceConfig;
use carbon_shift::forecast::{ForecastRow, ForecastStore, MemoryForecastStore};
use carbon_shift::plan::{Metrics, Plan, PlanBuilder, SeriesBundle};
use carbon_shift::runner::Orchestrator;
use carbon_shift::scheduler::{
    ActorDeps, MemoryPlanStore, PlanStore, Scheduler, SchedulerSettings,
};

/// Hourly forecast starting at midnight with the given loads and an evening
/// wind bump.
pub fn forecast(loads: &[f64]) -> Vec<ForecastRow> {
    loads
        .iter()
        .enumerate()
        .map(|(h, &load)| ForecastRow {
            wind_mw: Some(if h >= loads.len() / 2 { 30.0 } else { 5.0 }),
            ..ForecastRow::new(format!("2025-06-01T{h:02}:00:00Z"), load)
        })
        .collect()
}

/// Morning-peaked forecast (six hours).
pub fn peaked_forecast() -> Vec<ForecastRow> {
    forecast(&[120.0, 110.0, 60.0, 50.0, 40.0, 40.0])
}

/// Same shape as [`peaked_forecast`] with a taller peak.
pub fn drifted_forecast() -> Vec<ForecastRow> {
    forecast(&[150.0, 110.0, 60.0, 50.0, 40.0, 40.0])
}

/// A plan not derived from any forecast.
pub fn manual_plan(version: u64) -> Plan {
    Plan {
        version,
        series: SeriesBundle {
            base: vec![10.0, 20.0],
            renewable: vec![0.0, 5.0],
            intensity: None,
            optimized: vec![10.0, 20.0],
        },
        metrics: Metrics::default(),
    }
}

/// Fully wired in-memory service.
pub struct Harness {
    pub forecasts: Arc<MemoryForecastStore>,
    pub audit: Arc<MemoryAuditLog>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub fn new(rows: Vec<ForecastRow>) -> Self {
        Self::with_store(rows, Arc::new(MemoryPlanStore::new()))
    }

    pub fn with_store(rows: Vec<ForecastRow>, store: Arc<dyn PlanStore>) -> Self {
        Self::with_settings(rows, store, SchedulerSettings::default())
    }

    pub fn with_settings(
        rows: Vec<ForecastRow>,
        store: Arc<dyn PlanStore>,
        settings: SchedulerSettings,
    ) -> Self {
        let forecasts = Arc::new(MemoryForecastStore::with_rows(rows));
        let builder = Arc::new(PlanBuilder::from_config(
            forecasts.clone(),
            &ServiceConfig::default(),
        ));
        let audit = Arc::new(MemoryAuditLog::new());
        let scheduler = Arc::new(Scheduler::new(ActorDeps {
            store,
            builder: Arc::clone(&builder),
            audit: audit.clone(),
            settings,
        }));
        let orchestrator = Arc::new(Orchestrator::new(builder, scheduler, audit.clone()));
        Self {
            forecasts,
            audit,
            orchestrator,
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        self.orchestrator.scheduler()
    }

    /// Replaces the live forecast.
    pub async fn set_forecast(&self, rows: Vec<ForecastRow>) {
        self.forecasts.write(rows).await.expect("valid forecast");
    }
}
