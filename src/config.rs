//! TOML-based service configuration.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Top-level service configuration parsed from TOML.
///
/// All fields have defaults, so an empty file is a valid configuration.
/// Load with [`ServiceConfig::from_toml_file`] or start from
/// [`ServiceConfig::default`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Load-shifting optimizer parameters.
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    /// Plan scoring parameters.
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Carbon intensity estimation used when a row carries no explicit intensity.
    #[serde(default)]
    pub estimation: EstimationConfig,
    /// Per-tenant scheduling actor parameters.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// File locations for the forecast snapshot, plan state and audit log.
    #[serde(default)]
    pub storage: StorageConfig,
    /// HTTP listener.
    #[serde(default)]
    pub server: ServerConfig,
    /// Log filtering.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Load-shifting optimizer parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizerConfig {
    /// Destination hours must stay below this fraction of the peak load.
    pub peak_threshold_ratio: f64,
    /// Per-hour transfer cap as a fraction of the peak load.
    pub max_shift_ratio: f64,
    /// Fraction of `hours * max_shift_per_hour` available for the whole run.
    pub budget_ratio: f64,
    /// Minimum intensity gap (kg CO₂/MWh) between a source and a destination hour.
    pub min_intensity_delta: f64,
    /// Floor of the per-hour transfer cap (MW).
    pub min_shift_per_hour: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            peak_threshold_ratio: 0.9,
            max_shift_ratio: 0.05,
            budget_ratio: 0.4,
            min_intensity_delta: 15.0,
            min_shift_per_hour: 10.0,
        }
    }
}

/// Plan scoring parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    /// Peak threshold as a fraction of the baseline maximum.
    pub peak_threshold_ratio: f64,
    /// Constant intensity applied to renewable overlap gains when no
    /// intensity series is available.
    pub fallback_intensity_factor: f64,
    /// Decimal places kept in reported metrics.
    pub decimals: u32,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            peak_threshold_ratio: 0.9,
            fallback_intensity_factor: 0.4,
            decimals: 2,
        }
    }
}

/// Linear intensity heuristic: `floor + (ceiling - floor) * (1 - renewable_share)`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EstimationConfig {
    /// Intensity of a fully renewable hour (kg CO₂/MWh).
    pub floor_kg_per_mwh: f64,
    /// Intensity of an hour with no renewable supply (kg CO₂/MWh).
    pub ceiling_kg_per_mwh: f64,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            floor_kg_per_mwh: 80.0,
            ceiling_kg_per_mwh: 450.0,
        }
    }
}

/// Upper bound of the drift-check and cron intervals (30 days).
pub const MAX_INTERVAL_SECS: u64 = 30 * 24 * 60 * 60;

/// Per-tenant scheduling actor parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Interval between forecast drift checks after a digest-backed apply.
    pub drift_check_interval_secs: u64,
    /// Consecutive wakes without a usable forecast before a staleness alert.
    pub stale_after_failed_wakes: u32,
    /// Tenant label used when no caller or stored label names one.
    pub default_tenant: String,
    /// Bounded mailbox size of each tenant actor.
    pub mailbox_capacity: usize,
    /// Periodic reoptimization interval; `0` disables the cron loop.
    pub cron_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            drift_check_interval_secs: 15 * 60,
            stale_after_failed_wakes: 4,
            default_tenant: "demo".to_string(),
            mailbox_capacity: 32,
            cron_interval_secs: 0,
        }
    }
}

impl SchedulerConfig {
    /// Drift-check interval as a `Duration`.
    pub fn drift_check_interval(&self) -> Duration {
        Duration::from_secs(self.drift_check_interval_secs)
    }

    /// Cron interval, or `None` when the loop is disabled.
    pub fn cron_interval(&self) -> Option<Duration> {
        (self.cron_interval_secs > 0).then(|| Duration::from_secs(self.cron_interval_secs))
    }
}

/// File locations used by the binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// JSON forecast snapshot.
    pub forecast_path: PathBuf,
    /// Directory holding one plan state file per tenant.
    pub state_dir: PathBuf,
    /// CSV audit/impact log.
    pub audit_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            forecast_path: PathBuf::from("data/forecast.json"),
            state_dir: PathBuf::from("data/plans"),
            audit_path: PathBuf::from("data/audit.csv"),
        }
    }
}

/// HTTP listener.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Bind address.
    pub bind: String,
    /// TCP port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8787,
        }
    }
}

/// Log filtering.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default level for this crate when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Configuration error with field path and constraint description.
#[derive(Debug)]
pub struct ConfigError {
    /// Dotted field path (e.g., `"optimizer.budget_ratio"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigError {}

fn unit_ratio(errors: &mut Vec<ConfigError>, field: &str, value: f64) {
    if !(value > 0.0 && value <= 1.0) {
        errors.push(ConfigError {
            field: field.to_string(),
            message: format!("must be in (0.0, 1.0], got {value}"),
        });
    }
}

impl ServiceConfig {
    /// Parses a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            field: "config".to_string(),
            message: format!("cannot read \"{}\": {e}", path.display()),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError {
            field: "toml".to_string(),
            message: e.to_string(),
        })
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        let o = &self.optimizer;
        unit_ratio(&mut errors, "optimizer.peak_threshold_ratio", o.peak_threshold_ratio);
        unit_ratio(&mut errors, "optimizer.max_shift_ratio", o.max_shift_ratio);
        unit_ratio(&mut errors, "optimizer.budget_ratio", o.budget_ratio);
        if !(o.min_intensity_delta >= 0.0) {
            errors.push(ConfigError {
                field: "optimizer.min_intensity_delta".into(),
                message: "must be >= 0".into(),
            });
        }
        if !(o.min_shift_per_hour >= 0.0) {
            errors.push(ConfigError {
                field: "optimizer.min_shift_per_hour".into(),
                message: "must be >= 0".into(),
            });
        }

        let m = &self.metrics;
        unit_ratio(&mut errors, "metrics.peak_threshold_ratio", m.peak_threshold_ratio);
        if !(m.fallback_intensity_factor >= 0.0) {
            errors.push(ConfigError {
                field: "metrics.fallback_intensity_factor".into(),
                message: "must be >= 0".into(),
            });
        }
        if m.decimals > 9 {
            errors.push(ConfigError {
                field: "metrics.decimals".into(),
                message: "must be <= 9".into(),
            });
        }

        let e = &self.estimation;
        if !(e.floor_kg_per_mwh >= 0.0) {
            errors.push(ConfigError {
                field: "estimation.floor_kg_per_mwh".into(),
                message: "must be >= 0".into(),
            });
        }
        if !(e.floor_kg_per_mwh <= e.ceiling_kg_per_mwh) {
            errors.push(ConfigError {
                field: "estimation.floor_kg_per_mwh".into(),
                message: "must be <= estimation.ceiling_kg_per_mwh".into(),
            });
        }

        let s = &self.scheduler;
        if s.drift_check_interval_secs == 0 {
            errors.push(ConfigError {
                field: "scheduler.drift_check_interval_secs".into(),
                message: "must be > 0".into(),
            });
        }
        if s.drift_check_interval_secs > MAX_INTERVAL_SECS {
            errors.push(ConfigError {
                field: "scheduler.drift_check_interval_secs".into(),
                message: format!("must be <= {MAX_INTERVAL_SECS}"),
            });
        }
        if s.cron_interval_secs > MAX_INTERVAL_SECS {
            errors.push(ConfigError {
                field: "scheduler.cron_interval_secs".into(),
                message: format!("must be <= {MAX_INTERVAL_SECS}"),
            });
        }
        if s.stale_after_failed_wakes == 0 {
            errors.push(ConfigError {
                field: "scheduler.stale_after_failed_wakes".into(),
                message: "must be > 0".into(),
            });
        }
        if s.mailbox_capacity == 0 {
            errors.push(ConfigError {
                field: "scheduler.mailbox_capacity".into(),
                message: "must be > 0".into(),
            });
        }
        if s.default_tenant.trim().is_empty() {
            errors.push(ConfigError {
                field: "scheduler.default_tenant".into(),
                message: "must not be empty".into(),
            });
        }

        if self.server.port == 0 {
            errors.push(ConfigError {
                field: "server.port".into(),
                message: "must be > 0".into(),
            });
        }

        errors
    }
}
