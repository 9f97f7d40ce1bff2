//! Integration tests for the run orchestrator.

mod common;

use std::sync::Arc;

use async_trait::async_trait;

use carbon_shift::audit::{AuditEntry, AuditLog, CsvAuditLog};
use carbon_shift::config::ServiceConfig;
use carbon_shift::error::{AuditError, RunError};
use carbon_shift::forecast::{FileForecastStore, ForecastStore, MemoryForecastStore};
use carbon_shift::plan::{PlanBuilder, Trigger};
use carbon_shift::runner::{Orchestrator, RunOutcome};
use carbon_shift::scheduler::{ActorDeps, MemoryPlanStore, Scheduler, SchedulerSettings};

use common::{Harness, manual_plan, peaked_forecast};

#[tokio::test]
async fn empty_forecast_applies_and_audits_nothing() {
    let h = Harness::new(Vec::new());
    let outcome = h
        .orchestrator
        .run_reoptimization(None, Trigger::Cron, None)
        .await
        .expect("nothing to do is not an error");
    assert!(matches!(outcome, RunOutcome::NothingToDo));
    assert!(h.audit.is_empty());
    assert!(h.scheduler().plan(None).await.expect("read").is_none());
}

#[tokio::test]
async fn run_applies_and_audits_once() {
    let h = Harness::new(peaked_forecast());
    let outcome = h
        .orchestrator
        .run_reoptimization(Some("plant-a"), Trigger::Reoptimize, Some(42))
        .await
        .expect("run");
    let applied = outcome.applied().expect("applied");
    assert_eq!(applied.receipt.tenant, "plant-a");
    assert_eq!(applied.receipt.version, 42);
    assert!(applied.digest.is_some());
    assert!(applied.audit_error.is_none());
    assert!(applied.plan.metrics.peak_reduction_pct > 0.0);

    let entries = h.audit.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].trigger, Trigger::Reoptimize);
    assert_eq!(entries[0].forecast_digest, applied.digest);
}

#[tokio::test]
async fn conflict_is_surfaced_without_retry() {
    let h = Harness::new(peaked_forecast());
    h.orchestrator
        .apply_manual(None, manual_plan(1_000), None, Trigger::Apply)
        .await
        .expect("manual apply");

    let err = h
        .orchestrator
        .run_reoptimization(None, Trigger::Reoptimize, Some(999))
        .await
        .expect_err("stale");
    assert!(matches!(
        err,
        RunError::Conflict {
            current: 1_000,
            attempted: 999
        }
    ));
    let record = h.scheduler().plan(None).await.expect("read").expect("record");
    assert_eq!(record.plan.version, 1_000);
    assert_eq!(h.audit.len(), 1);
}

struct BrokenAudit;

#[async_trait]
impl AuditLog for BrokenAudit {
    async fn record(&self, _entry: &AuditEntry) -> Result<(), AuditError> {
        Err(AuditError::Task("disk full".to_string()))
    }
}

#[tokio::test]
async fn audit_failure_keeps_plan_applied() {
    let builder = Arc::new(PlanBuilder::from_config(
        Arc::new(MemoryForecastStore::with_rows(peaked_forecast())),
        &ServiceConfig::default(),
    ));
    let audit: Arc<dyn AuditLog> = Arc::new(BrokenAudit);
    let scheduler = Arc::new(Scheduler::new(ActorDeps {
        store: Arc::new(MemoryPlanStore::new()),
        builder: Arc::clone(&builder),
        audit: Arc::clone(&audit),
        settings: SchedulerSettings::default(),
    }));
    let orchestrator = Orchestrator::new(builder, scheduler, audit);

    let outcome = orchestrator
        .run_reoptimization(None, Trigger::Manual, Some(7))
        .await
        .expect("plan applied despite audit failure");
    let applied = outcome.applied().expect("applied");
    assert!(matches!(applied.audit_error, Some(AuditError::Task(_))));

    let record = orchestrator
        .scheduler()
        .plan(None)
        .await
        .expect("read")
        .expect("record");
    assert_eq!(record.plan.version, 7);
}

#[tokio::test]
async fn file_backed_run_writes_csv_audit() {
    let dir = tempfile::tempdir().expect("tempdir");
    let forecasts = Arc::new(FileForecastStore::new(dir.path().join("forecast.json")));
    forecasts.write(peaked_forecast()).await.expect("store forecast");

    let builder = Arc::new(PlanBuilder::from_config(forecasts, &ServiceConfig::default()));
    let audit_path = dir.path().join("audit.csv");
    let audit: Arc<dyn AuditLog> = Arc::new(CsvAuditLog::new(&audit_path));
    let scheduler = Arc::new(Scheduler::new(ActorDeps {
        store: Arc::new(MemoryPlanStore::new()),
        builder: Arc::clone(&builder),
        audit: Arc::clone(&audit),
        settings: SchedulerSettings::default(),
    }));
    let orchestrator = Orchestrator::new(builder, scheduler, audit);

    orchestrator
        .run_reoptimization(None, Trigger::Manual, Some(1))
        .await
        .expect("first run");
    orchestrator
        .run_reoptimization(None, Trigger::Manual, Some(2))
        .await
        .expect("second run");

    let mut rdr = csv::Reader::from_path(&audit_path).expect("audit log");
    let rows: Vec<csv::StringRecord> = rdr.records().filter_map(Result::ok).collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(&rows[0][1], "demo");
    assert_eq!(&rows[0][2], "manual");
    assert_eq!(&rows[1][3], "2");
}
