/// Forecast-to-plan orchestration.
pub mod builder;
pub mod metrics;
pub mod optimizer;
/// Plan, metrics and stored-record types.
pub mod types;

pub use builder::{CandidatePlan, PlanBuilder, Preview, PreviewMode, derive_series};
pub use metrics::MetricsEngine;
pub use optimizer::{Optimizer, ShiftLimits, ShiftOutcome, Signal};
pub use types::{Metrics, Plan, SeriesBundle, StoredPlanRecord, Trigger, version_now};
