//! Audit and impact log for applied plans.
//!
//! Best-effort telemetry: a failed write is reported to the caller but never
//! undoes the plan it describes.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::AuditError;
use crate::forecast::ForecastDigest;
use crate::plan::{Metrics, Plan, Trigger};

/// CSV column header of the audit log.
const HEADER: &str = "recorded_at,tenant,trigger,version,forecast_digest,\
                      peak_reduction_pct,renewable_gain_pct,co2_avoided_kg,plan_json";

/// One applied plan, as written to the audit log.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub recorded_at: DateTime<Utc>,
    pub tenant: String,
    pub trigger: Trigger,
    pub version: u64,
    pub forecast_digest: Option<ForecastDigest>,
    pub metrics: Metrics,
    pub plan: Plan,
}

impl AuditEntry {
    /// Creates an entry stamped with the current time.
    pub fn new(
        tenant: impl Into<String>,
        trigger: Trigger,
        plan: &Plan,
        forecast_digest: Option<&ForecastDigest>,
    ) -> Self {
        Self {
            recorded_at: Utc::now(),
            tenant: tenant.into(),
            trigger,
            version: plan.version,
            forecast_digest: forecast_digest.cloned(),
            metrics: plan.metrics,
            plan: plan.clone(),
        }
    }
}

/// Sink for audit entries.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> Result<(), AuditError>;
}

/// Keeps entries in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded entries, oldest first.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn record(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }
}

/// Appends one CSV row per entry to a file.
#[derive(Debug, Clone)]
pub struct CsvAuditLog {
    path: PathBuf,
}

impl CsvAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditLog for CsvAuditLog {
    async fn record(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        let path = self.path.clone();
        let entry = entry.clone();
        tokio::task::spawn_blocking(move || append_row(&path, &entry))
            .await
            .map_err(|e| AuditError::Task(e.to_string()))?
    }
}

fn append_row(path: &Path, entry: &AuditEntry) -> Result<(), AuditError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let needs_header = file.metadata()?.len() == 0;
    write_row(entry, file, needs_header)
}

/// Writes `entry` as CSV to any writer, optionally preceded by the header.
///
/// # Errors
///
/// Returns an `AuditError` if serialization or writing fails.
pub fn write_row(entry: &AuditEntry, writer: impl Write, header: bool) -> Result<(), AuditError> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);

    if header {
        wtr.write_record(HEADER.split(',').map(str::trim))?;
    }

    wtr.write_record(&[
        entry.recorded_at.to_rfc3339(),
        entry.tenant.clone(),
        entry.trigger.to_string(),
        entry.version.to_string(),
        entry
            .forecast_digest
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default(),
        format!("{:.2}", entry.metrics.peak_reduction_pct),
        format!("{:.2}", entry.metrics.renewable_gain_pct),
        format!("{:.2}", entry.metrics.co2_avoided_kg),
        serde_json::to_string(&entry.plan.series)?,
    ])?;

    wtr.flush()?;
    Ok(())
}
