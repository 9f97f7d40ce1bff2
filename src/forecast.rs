//! Hourly forecast rows, their validation, storage and content digest.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{DigestError, ForecastError};

/// One hourly forecast sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRow {
    /// ISO-8601 timestamp of the hour.
    pub ds: String,
    /// Predicted load (MW).
    pub load_pred_mw: f64,
    /// Predicted solar generation (MW).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solar_mw: Option<f64>,
    /// Predicted wind generation (MW).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind_mw: Option<f64>,
    /// Share of demand met by renewables, in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renewable_share: Option<f64>,
    /// Grid carbon intensity (kg CO₂/MWh).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carbon_intensity_kg_per_mwh: Option<f64>,
}

impl ForecastRow {
    /// Creates a row carrying only a timestamp and load.
    pub fn new(ds: impl Into<String>, load_pred_mw: f64) -> Self {
        Self {
            ds: ds.into(),
            load_pred_mw,
            solar_mw: None,
            wind_mw: None,
            renewable_share: None,
            carbon_intensity_kg_per_mwh: None,
        }
    }

    /// Solar plus wind availability (MW); missing sources count as zero.
    pub fn renewable_mw(&self) -> f64 {
        self.solar_mw.unwrap_or(0.0) + self.wind_mw.unwrap_or(0.0)
    }
}

fn invalid(index: usize, field: &'static str, message: &str) -> ForecastError {
    ForecastError::Invalid {
        index,
        field,
        message: message.to_string(),
    }
}

fn check_non_negative(
    index: usize,
    field: &'static str,
    value: Option<f64>,
) -> Result<(), ForecastError> {
    match value {
        Some(v) if !v.is_finite() => Err(invalid(index, field, "must be finite")),
        Some(v) if v < 0.0 => Err(invalid(index, field, "must be >= 0")),
        _ => Ok(()),
    }
}

/// Checks the forecast invariants: non-empty, parseable and strictly
/// increasing timestamps, finite load, and in-range optional fields.
///
/// # Errors
///
/// Returns the first violation found, tagged with its row index and field.
pub fn validate_rows(rows: &[ForecastRow]) -> Result<(), ForecastError> {
    if rows.is_empty() {
        return Err(ForecastError::Empty);
    }

    let mut previous: Option<DateTime<FixedOffset>> = None;
    for (index, row) in rows.iter().enumerate() {
        let ts = DateTime::parse_from_rfc3339(&row.ds)
            .map_err(|e| invalid(index, "ds", &format!("is not an RFC 3339 timestamp ({e})")))?;
        if previous.is_some_and(|p| ts <= p) {
            return Err(invalid(index, "ds", "must be later than the previous row"));
        }
        previous = Some(ts);

        if !row.load_pred_mw.is_finite() {
            return Err(invalid(index, "load_pred_mw", "must be finite"));
        }
        check_non_negative(index, "solar_mw", row.solar_mw)?;
        check_non_negative(index, "wind_mw", row.wind_mw)?;
        check_non_negative(
            index,
            "carbon_intensity_kg_per_mwh",
            row.carbon_intensity_kg_per_mwh,
        )?;
        if let Some(share) = row.renewable_share {
            if !(0.0..=1.0).contains(&share) {
                return Err(invalid(index, "renewable_share", "must be in [0.0, 1.0]"));
            }
        }
    }
    Ok(())
}

/// SHA-256 of the canonical JSON serialization of a forecast snapshot.
///
/// Used only for equality checks between snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ForecastDigest(String);

impl ForecastDigest {
    /// Hashes the rows in their serialized order.
    ///
    /// # Errors
    ///
    /// Returns a `DigestError` if the rows cannot be serialized.
    pub fn of(rows: &[ForecastRow]) -> Result<Self, DigestError> {
        let bytes = serde_json::to_vec(rows)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(Self(format!("{:x}", hasher.finalize())))
    }

    /// Lowercase hex rendering.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ForecastDigest {
    fn from(hex: String) -> Self {
        Self(hex)
    }
}

impl fmt::Display for ForecastDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage for the current forecast snapshot.
#[async_trait]
pub trait ForecastStore: Send + Sync {
    /// Returns the stored snapshot, or `None` when nothing usable is stored.
    async fn read(&self) -> Option<Vec<ForecastRow>>;

    /// Validates and replaces the stored snapshot.
    async fn write(&self, rows: Vec<ForecastRow>) -> Result<(), ForecastError>;
}

/// In-process forecast store.
#[derive(Debug, Default)]
pub struct MemoryForecastStore {
    rows: RwLock<Option<Vec<ForecastRow>>>,
}

impl MemoryForecastStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-loaded with `rows`, bypassing validation.
    pub fn with_rows(rows: Vec<ForecastRow>) -> Self {
        Self {
            rows: RwLock::new(Some(rows)),
        }
    }

    /// Drops the stored snapshot.
    pub fn clear(&self) {
        *self.rows.write() = None;
    }
}

#[async_trait]
impl ForecastStore for MemoryForecastStore {
    async fn read(&self) -> Option<Vec<ForecastRow>> {
        self.rows.read().clone().filter(|rows| !rows.is_empty())
    }

    async fn write(&self, rows: Vec<ForecastRow>) -> Result<(), ForecastError> {
        validate_rows(&rows)?;
        *self.rows.write() = Some(rows);
        Ok(())
    }
}

/// Forecast snapshot persisted as a JSON array on disk.
#[derive(Debug, Clone)]
pub struct FileForecastStore {
    path: PathBuf,
}

impl FileForecastStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ForecastStore for FileForecastStore {
    async fn read(&self) -> Option<Vec<ForecastRow>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot read forecast");
                return None;
            }
        };
        let rows: Vec<ForecastRow> = match serde_json::from_slice(&raw) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring malformed forecast");
                return None;
            }
        };
        if let Err(e) = validate_rows(&rows) {
            warn!(path = %self.path.display(), error = %e, "ignoring invalid forecast");
            return None;
        }
        Some(rows)
    }

    async fn write(&self, rows: Vec<ForecastRow>) -> Result<(), ForecastError> {
        validate_rows(&rows)?;
        let content = serde_json::to_vec_pretty(&rows)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Atomic write
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, content).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;
        debug!(path = %self.path.display(), rows = rows.len(), "forecast written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<ForecastRow> {
        vec![
            ForecastRow::new("2025-06-01T00:00:00Z", 100.0),
            ForecastRow::new("2025-06-01T01:00:00Z", 90.0),
        ]
    }

    #[test]
    fn renewable_sums_present_sources() {
        let mut row = ForecastRow::new("2025-06-01T00:00:00Z", 10.0);
        assert_eq!(row.renewable_mw(), 0.0);
        row.solar_mw = Some(3.0);
        row.wind_mw = Some(4.5);
        assert_eq!(row.renewable_mw(), 7.5);
    }

    #[test]
    fn validation_accepts_ordered_rows() {
        assert!(validate_rows(&rows()).is_ok());
    }

    #[test]
    fn validation_rejects_empty() {
        assert!(matches!(validate_rows(&[]), Err(ForecastError::Empty)));
    }

    #[test]
    fn validation_rejects_unordered_timestamps() {
        let mut r = rows();
        r.swap(0, 1);
        let err = validate_rows(&r);
        assert!(matches!(
            err,
            Err(ForecastError::Invalid {
                index: 1,
                field: "ds",
                ..
            })
        ));
    }

    #[test]
    fn validation_rejects_bad_fields() {
        let mut r = rows();
        r[1].load_pred_mw = f64::NAN;
        assert!(matches!(
            validate_rows(&r),
            Err(ForecastError::Invalid {
                field: "load_pred_mw",
                ..
            })
        ));

        let mut r = rows();
        r[0].renewable_share = Some(1.2);
        assert!(matches!(
            validate_rows(&r),
            Err(ForecastError::Invalid {
                field: "renewable_share",
                ..
            })
        ));

        let mut r = rows();
        r[0].carbon_intensity_kg_per_mwh = Some(-1.0);
        assert!(validate_rows(&r).is_err());

        let mut r = rows();
        r[0].ds = "yesterday".to_string();
        assert!(validate_rows(&r).is_err());
    }

    #[test]
    fn digest_is_stable_and_content_sensitive() {
        let a = ForecastDigest::of(&rows()).expect("digest");
        let b = ForecastDigest::of(&rows()).expect("digest");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);

        let mut changed = rows();
        changed[1].load_pred_mw = 91.0;
        let c = ForecastDigest::of(&changed).expect("digest");
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn memory_store_rejects_invalid_write() {
        let store = MemoryForecastStore::new();
        assert!(store.read().await.is_none());
        assert!(store.write(Vec::new()).await.is_err());
        assert!(store.read().await.is_none());

        store.write(rows()).await.expect("valid rows");
        assert_eq!(store.read().await, Some(rows()));
    }

    #[tokio::test]
    async fn file_store_round_trips_and_ignores_garbage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileForecastStore::new(dir.path().join("nested").join("forecast.json"));
        assert!(store.read().await.is_none());

        store.write(rows()).await.expect("write");
        assert_eq!(store.read().await, Some(rows()));

        std::fs::write(store.path(), b"{not json").expect("overwrite");
        assert!(store.read().await.is_none());
    }
}
