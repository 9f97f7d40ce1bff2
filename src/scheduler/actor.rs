//! Per-tenant scheduling actor.
//!
//! Each actor is a single tokio task that owns its tenant's plan record.
//! Commands arrive over a bounded mailbox and the drift-check timer is a
//! branch of the same `select!`, so applies, reads and alarms for one tenant
//! are strictly serialized without any lock.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditEntry, AuditLog};
use crate::config::SchedulerConfig;
use crate::error::{AuditError, SchedulerError, StoreError};
use crate::forecast::ForecastDigest;
use crate::plan::{Plan, PlanBuilder, SeriesBundle, StoredPlanRecord, Trigger, version_now};

use super::store::{ActorState, PlanStore};

/// Tunables shared by all actors.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub drift_check_interval: Duration,
    pub stale_after_failed_wakes: u32,
    pub default_tenant: String,
    pub mailbox_capacity: usize,
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(cfg: &SchedulerConfig) -> Self {
        Self {
            drift_check_interval: cfg.drift_check_interval(),
            stale_after_failed_wakes: cfg.stale_after_failed_wakes,
            default_tenant: cfg.default_tenant.clone(),
            mailbox_capacity: cfg.mailbox_capacity,
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

/// Collaborators handed to every actor.
#[derive(Clone)]
pub struct ActorDeps {
    pub store: Arc<dyn PlanStore>,
    pub builder: Arc<PlanBuilder>,
    pub audit: Arc<dyn AuditLog>,
    pub settings: SchedulerSettings,
}

impl std::fmt::Debug for ActorDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorDeps")
            .field("builder", &self.builder)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// A candidate plan submitted to a tenant's actor.
#[derive(Debug, Clone)]
pub struct ApplyRequest {
    pub plan: Plan,
    /// Digest of the forecast behind `plan`; `None` opts out of drift checks.
    pub forecast_digest: Option<ForecastDigest>,
    pub trigger: Trigger,
    /// Explicit tenant label; cached and persisted when given.
    pub tenant: Option<String>,
}

/// Acknowledgement of an accepted apply.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyReceipt {
    pub tenant: String,
    pub version: u64,
    pub next_alarm_at: Option<DateTime<Utc>>,
}

/// What a drift check did.
#[derive(Debug)]
pub enum AlarmOutcome {
    /// No digest-backed plan is held; nothing to watch.
    Idle,
    /// The forecast could not be read; the check was rescheduled.
    ForecastUnavailable { consecutive_failures: u32 },
    /// The forecast still matches the stored digest; the check was rescheduled.
    Unchanged,
    /// The forecast drifted and a new plan replaced the old one.
    Reoptimized {
        version: u64,
        audit_error: Option<AuditError>,
    },
}

enum Command {
    Apply {
        request: ApplyRequest,
        reply: oneshot::Sender<Result<ApplyReceipt, SchedulerError>>,
    },
    Plan {
        reply: oneshot::Sender<Result<Option<StoredPlanRecord>, SchedulerError>>,
    },
    Alarm {
        reply: oneshot::Sender<Result<AlarmOutcome, SchedulerError>>,
    },
}

/// Cloneable address of one tenant's actor.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    actor_id: Arc<str>,
    tx: mpsc::Sender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Apply { request, .. } => f
                .debug_struct("Apply")
                .field("version", &request.plan.version)
                .finish_non_exhaustive(),
            Self::Plan { .. } => f.write_str("Plan"),
            Self::Alarm { .. } => f.write_str("Alarm"),
        }
    }
}

impl SchedulerHandle {
    /// Spawns the actor for `actor_id` on the current tokio runtime.
    ///
    /// State is loaded from the store on first use; a persisted wake time
    /// is re-armed once loaded.
    pub fn spawn(actor_id: impl Into<String>, deps: ActorDeps) -> Self {
        let actor_id: String = actor_id.into();
        let (tx, rx) = mpsc::channel(deps.settings.mailbox_capacity.max(1));
        let actor = SchedulerActor {
            id: actor_id.clone(),
            deps,
            rx,
            slot: Slot::Unloaded,
            tenant_cache: None,
            persisted_tenant: None,
            wake_at: None,
            failed_wakes: 0,
        };
        tokio::spawn(actor.run());
        Self {
            actor_id: actor_id.into(),
            tx,
        }
    }

    /// Stable identity of the actor.
    pub fn id(&self) -> &str {
        &self.actor_id
    }

    /// True once the actor task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Submits a candidate plan.
    ///
    /// # Errors
    ///
    /// `InvalidPlan` when the plan's series are empty or of unequal length.
    /// `VersionConflict` when `request.plan.version` is not newer than the
    /// held plan; the held record is untouched. `Store` when the record
    /// could not be persisted, also leaving the held record untouched.
    pub async fn apply(&self, request: ApplyRequest) -> Result<ApplyReceipt, SchedulerError> {
        self.call(|reply| Command::Apply { request, reply }).await
    }

    /// Returns the held record, or `None` before the first apply.
    pub async fn plan(&self) -> Result<Option<StoredPlanRecord>, SchedulerError> {
        self.call(|reply| Command::Plan { reply }).await
    }

    /// Runs a drift check now.
    pub async fn alarm(&self) -> Result<AlarmOutcome, SchedulerError> {
        self.call(|reply| Command::Alarm { reply }).await
    }

    async fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T, SchedulerError>>) -> Command,
    ) -> Result<T, SchedulerError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| SchedulerError::Closed(self.actor_id.to_string()))?;
        response
            .await
            .map_err(|_| SchedulerError::Closed(self.actor_id.to_string()))?
    }
}

enum Slot {
    Unloaded,
    Empty,
    Holding(StoredPlanRecord),
}

struct SchedulerActor {
    id: String,
    deps: ActorDeps,
    rx: mpsc::Receiver<Command>,
    slot: Slot,
    tenant_cache: Option<String>,
    persisted_tenant: Option<String>,
    wake_at: Option<Instant>,
    failed_wakes: u32,
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

/// Monotonic deadline `delay` from now, or `None` past the clock's range.
fn deadline_after(delay: Duration) -> Option<Instant> {
    Instant::now().checked_add(delay)
}

fn wall_clock_after(now: DateTime<Utc>, delay: Duration) -> Option<DateTime<Utc>> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
}

fn non_blank(label: Option<&str>) -> Option<&str> {
    label.map(str::trim).filter(|l| !l.is_empty())
}

fn check_series(series: &SeriesBundle) -> Result<(), SchedulerError> {
    if series.is_empty() {
        return Err(SchedulerError::InvalidPlan("plan covers no hours".into()));
    }
    if !series.is_aligned() {
        let intensity = series
            .intensity
            .as_ref()
            .map_or_else(|| "-".to_string(), |i| i.len().to_string());
        return Err(SchedulerError::InvalidPlan(format!(
            "series lengths differ: base {}, renewable {}, intensity {intensity}, optimized {}",
            series.len(),
            series.renewable.len(),
            series.optimized.len(),
        )));
    }
    Ok(())
}

impl SchedulerActor {
    async fn run(mut self) {
        if let Err(e) = self.ensure_loaded().await {
            warn!(actor = %self.id, error = %e, "cannot load plan state, will retry");
        }

        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                () = wait_until(self.wake_at) => {
                    self.wake_at = None;
                    match self.on_alarm().await {
                        Ok(outcome) => debug!(actor = %self.id, ?outcome, "drift check finished"),
                        Err(e) => warn!(actor = %self.id, error = %e, "drift check failed"),
                    }
                }
            }
        }
        debug!(actor = %self.id, "scheduler stopped");
    }

    async fn handle(&mut self, command: Command) {
        // A dropped receiver only means the caller stopped waiting.
        match command {
            Command::Apply { request, reply } => {
                let _ = reply.send(self.apply(request).await);
            }
            Command::Plan { reply } => {
                let _ = reply.send(self.current().await);
            }
            Command::Alarm { reply } => {
                let _ = reply.send(self.on_alarm().await);
            }
        }
    }

    async fn ensure_loaded(&mut self) -> Result<(), StoreError> {
        if !matches!(self.slot, Slot::Unloaded) {
            return Ok(());
        }

        let ActorState { tenant, record } = self.deps.store.load(&self.id).await?;
        self.persisted_tenant = tenant;
        self.slot = match record {
            Some(record) => {
                if let (Some(_), Some(at)) = (&record.forecast_digest, record.next_alarm_at) {
                    let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    self.wake_at = deadline_after(delay);
                }
                debug!(actor = %self.id, version = record.plan.version, "plan state restored");
                Slot::Holding(record)
            }
            None => Slot::Empty,
        };
        Ok(())
    }

    /// Resolves the tenant label: explicit argument, cached label, persisted
    /// label, actor identity, then the configured default.
    fn resolve_tenant(&mut self, explicit: Option<&str>) -> String {
        if let Some(label) = non_blank(explicit) {
            self.tenant_cache = Some(label.to_string());
            return label.to_string();
        }
        if let Some(label) = non_blank(self.tenant_cache.as_deref())
            .or_else(|| non_blank(self.persisted_tenant.as_deref()))
            .or_else(|| non_blank(Some(self.id.as_str())))
        {
            return label.to_string();
        }
        self.deps.settings.default_tenant.clone()
    }

    async fn current(&mut self) -> Result<Option<StoredPlanRecord>, SchedulerError> {
        self.ensure_loaded().await?;
        Ok(match &self.slot {
            Slot::Holding(record) => Some(record.clone()),
            Slot::Empty | Slot::Unloaded => None,
        })
    }

    fn held_version(&self) -> Option<u64> {
        match &self.slot {
            Slot::Holding(record) => Some(record.plan.version),
            Slot::Empty | Slot::Unloaded => None,
        }
    }

    /// Persists `record` and only then makes it the held record, arming or
    /// cancelling the wake to match it.
    async fn commit(
        &mut self,
        record: StoredPlanRecord,
        tenant_label: Option<String>,
    ) -> Result<(), StoreError> {
        let label = tenant_label.or_else(|| self.persisted_tenant.clone());
        let state = ActorState {
            tenant: label.clone(),
            record: Some(record.clone()),
        };
        self.deps.store.save(&self.id, &state).await?;

        self.persisted_tenant = label;
        self.wake_at = record
            .forecast_digest
            .as_ref()
            .and_then(|_| deadline_after(self.deps.settings.drift_check_interval));
        self.slot = Slot::Holding(record);
        Ok(())
    }

    async fn apply(&mut self, request: ApplyRequest) -> Result<ApplyReceipt, SchedulerError> {
        self.ensure_loaded().await?;
        let explicit = non_blank(request.tenant.as_deref()).map(str::to_string);
        let tenant = self.resolve_tenant(explicit.as_deref());

        if let Err(e) = check_series(&request.plan.series) {
            warn!(
                tenant = %tenant,
                version = request.plan.version,
                error = %e,
                "rejected plan"
            );
            return Err(e);
        }

        if let Some(current) = self.held_version() {
            if request.plan.version <= current {
                warn!(
                    tenant = %tenant,
                    current,
                    attempted = request.plan.version,
                    "rejected stale plan"
                );
                return Err(SchedulerError::VersionConflict {
                    current,
                    attempted: request.plan.version,
                });
            }
        }

        let now = Utc::now();
        let next_alarm_at = request
            .forecast_digest
            .as_ref()
            .and_then(|_| wall_clock_after(now, self.deps.settings.drift_check_interval));
        let version = request.plan.version;
        let record = StoredPlanRecord {
            plan: request.plan,
            forecast_digest: request.forecast_digest,
            trigger: request.trigger,
            updated_at: now,
            next_alarm_at,
        };
        self.commit(record, explicit).await?;

        info!(
            tenant = %tenant,
            version,
            trigger = %request.trigger,
            drift_watch = next_alarm_at.is_some(),
            "plan applied"
        );
        Ok(ApplyReceipt {
            tenant,
            version,
            next_alarm_at,
        })
    }

    fn reschedule(&mut self) {
        self.wake_at = deadline_after(self.deps.settings.drift_check_interval);
    }

    fn note_failed_wake(&mut self, tenant: &str) -> u32 {
        self.failed_wakes = self.failed_wakes.saturating_add(1);
        if self.failed_wakes == self.deps.settings.stale_after_failed_wakes {
            error!(
                tenant = %tenant,
                failed_wakes = self.failed_wakes,
                "forecast stale: drift checks keep finding no usable forecast"
            );
        }
        self.failed_wakes
    }

    async fn on_alarm(&mut self) -> Result<AlarmOutcome, SchedulerError> {
        self.ensure_loaded().await?;
        let tenant = self.resolve_tenant(None);

        let (current_version, stored_digest) = match &self.slot {
            Slot::Holding(StoredPlanRecord {
                plan,
                forecast_digest: Some(digest),
                ..
            }) => (plan.version, digest.clone()),
            _ => {
                self.wake_at = None;
                return Ok(AlarmOutcome::Idle);
            }
        };

        let version = version_now().max(current_version.saturating_add(1));
        let candidate = match self.deps.builder.build(version).await {
            Ok(Some(candidate)) => candidate,
            Ok(None) => {
                let consecutive_failures = self.note_failed_wake(&tenant);
                self.reschedule();
                debug!(tenant = %tenant, consecutive_failures, "no forecast for drift check");
                return Ok(AlarmOutcome::ForecastUnavailable {
                    consecutive_failures,
                });
            }
            Err(e) => {
                self.note_failed_wake(&tenant);
                self.reschedule();
                return Err(e.into());
            }
        };
        self.failed_wakes = 0;

        if candidate.digest == stored_digest {
            self.reschedule();
            debug!(tenant = %tenant, version = current_version, "forecast unchanged");
            return Ok(AlarmOutcome::Unchanged);
        }

        let now = Utc::now();
        let record = StoredPlanRecord {
            plan: candidate.plan,
            forecast_digest: Some(candidate.digest),
            trigger: Trigger::Alarm,
            updated_at: now,
            next_alarm_at: wall_clock_after(now, self.deps.settings.drift_check_interval),
        };
        let entry = AuditEntry::new(
            tenant.clone(),
            Trigger::Alarm,
            &record.plan,
            record.forecast_digest.as_ref(),
        );
        if let Err(e) = self.commit(record, None).await {
            self.reschedule();
            return Err(e.into());
        }
        info!(
            tenant = %tenant,
            previous = current_version,
            version,
            "forecast drifted, plan reoptimized"
        );

        let audit_error = self.deps.audit.record(&entry).await.err();
        if let Some(e) = &audit_error {
            warn!(tenant = %tenant, version, error = %e, "audit write failed");
        }
        Ok(AlarmOutcome::Reoptimized {
            version,
            audit_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(
        base: usize,
        renewable: usize,
        intensity: Option<usize>,
        optimized: usize,
    ) -> SeriesBundle {
        SeriesBundle {
            base: vec![1.0; base],
            renewable: vec![0.0; renewable],
            intensity: intensity.map(|n| vec![100.0; n]),
            optimized: vec![1.0; optimized],
        }
    }

    #[test]
    fn series_check_rejects_misaligned_and_empty() {
        assert!(check_series(&bundle(3, 3, Some(3), 3)).is_ok());
        assert!(check_series(&bundle(3, 3, None, 3)).is_ok());

        let err = check_series(&bundle(3, 1, Some(2), 0)).expect_err("misaligned");
        assert_eq!(
            err.to_string(),
            "invalid plan: series lengths differ: base 3, renewable 1, intensity 2, optimized 0"
        );
        assert!(matches!(
            check_series(&bundle(0, 0, None, 0)),
            Err(SchedulerError::InvalidPlan(_))
        ));
    }

    #[tokio::test]
    async fn out_of_range_delay_has_no_deadline() {
        assert!(deadline_after(Duration::from_secs(60)).is_some());
        assert!(deadline_after(Duration::MAX).is_none());
        assert!(wall_clock_after(Utc::now(), Duration::MAX).is_none());
    }
}
