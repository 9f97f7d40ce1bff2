//! Carbon-aware load shifting with per-tenant plan scheduling.

pub mod audit;
pub mod config;
pub mod error;
pub mod forecast;
pub mod insight;
/// Optimizer, metrics engine and plan builder.
pub mod plan;
pub mod runner;
pub mod scheduler;

#[cfg(feature = "api")]
pub mod api;
