//! Run orchestration: forecast → plan builder → scheduler apply → audit log.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::audit::{AuditEntry, AuditLog};
use crate::error::{AuditError, RunError};
use crate::forecast::ForecastDigest;
use crate::plan::{Plan, PlanBuilder, Trigger, version_now};
use crate::scheduler::{ApplyReceipt, ApplyRequest, Scheduler};

/// A plan accepted by the scheduler.
#[derive(Debug)]
pub struct AppliedPlan {
    pub receipt: ApplyReceipt,
    pub plan: Plan,
    pub digest: Option<ForecastDigest>,
    /// Set when the plan was applied but the audit write failed.
    pub audit_error: Option<AuditError>,
}

/// Result of one reoptimization run.
#[derive(Debug)]
pub enum RunOutcome {
    /// No forecast was available; nothing was applied or audited.
    NothingToDo,
    Applied(AppliedPlan),
}

impl RunOutcome {
    pub fn applied(&self) -> Option<&AppliedPlan> {
        match self {
            Self::Applied(applied) => Some(applied),
            Self::NothingToDo => None,
        }
    }
}

/// Glue between the plan builder, the scheduler and the audit log.
pub struct Orchestrator {
    builder: Arc<PlanBuilder>,
    scheduler: Arc<Scheduler>,
    audit: Arc<dyn AuditLog>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("builder", &self.builder)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        builder: Arc<PlanBuilder>,
        scheduler: Arc<Scheduler>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            builder,
            scheduler,
            audit,
        }
    }

    pub fn builder(&self) -> &Arc<PlanBuilder> {
        &self.builder
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Builds a plan from the live forecast and applies it to `tenant`.
    ///
    /// `version` defaults to the current time in milliseconds. A version
    /// conflict is returned as-is; the run never retries with a bumped
    /// version.
    ///
    /// # Errors
    ///
    /// `RunError::Conflict` for a stale version, `RunError::Digest` when the
    /// forecast cannot be hashed, `RunError::Scheduler` for persistence or
    /// actor failures. An audit failure is not an error; it is reported in
    /// [`AppliedPlan::audit_error`].
    pub async fn run_reoptimization(
        &self,
        tenant: Option<&str>,
        trigger: Trigger,
        version: Option<u64>,
    ) -> Result<RunOutcome, RunError> {
        let version = version.unwrap_or_else(version_now);
        let Some(candidate) = self.builder.build(version).await? else {
            info!(trigger = %trigger, "no forecast available, nothing to do");
            return Ok(RunOutcome::NothingToDo);
        };
        debug!(
            version,
            hours = candidate.hours,
            shifted = candidate.shifted,
            "candidate plan built"
        );

        let applied = self
            .apply(
                tenant,
                candidate.plan,
                Some(candidate.digest),
                trigger,
            )
            .await?;
        Ok(RunOutcome::Applied(applied))
    }

    /// Applies an externally supplied plan, recorded and audited under
    /// `trigger`.
    ///
    /// # Errors
    ///
    /// `RunError::InvalidPlan` when the plan's series are empty or of unequal
    /// length; otherwise the same as [`Orchestrator::run_reoptimization`],
    /// minus the forecast read.
    pub async fn apply_manual(
        &self,
        tenant: Option<&str>,
        plan: Plan,
        digest: Option<ForecastDigest>,
        trigger: Trigger,
    ) -> Result<AppliedPlan, RunError> {
        self.apply(tenant, plan, digest, trigger).await
    }

    async fn apply(
        &self,
        tenant: Option<&str>,
        plan: Plan,
        digest: Option<ForecastDigest>,
        trigger: Trigger,
    ) -> Result<AppliedPlan, RunError> {
        let receipt = self
            .scheduler
            .apply(ApplyRequest {
                plan: plan.clone(),
                forecast_digest: digest.clone(),
                trigger,
                tenant: tenant.map(str::to_string),
            })
            .await?;

        let entry = AuditEntry::new(receipt.tenant.clone(), trigger, &plan, digest.as_ref());
        let audit_error = self.audit.record(&entry).await.err();
        if let Some(e) = &audit_error {
            warn!(
                tenant = %receipt.tenant,
                version = receipt.version,
                error = %e,
                "audit write failed, plan stays applied"
            );
        }

        Ok(AppliedPlan {
            receipt,
            plan,
            digest,
            audit_error,
        })
    }
}

/// Runs a `cron` reoptimization for `tenant` every `every`, forever.
///
/// The first run happens one full period after the call.
pub async fn run_cron(orchestrator: Arc<Orchestrator>, tenant: Option<String>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match orchestrator
            .run_reoptimization(tenant.as_deref(), Trigger::Cron, None)
            .await
        {
            Ok(RunOutcome::NothingToDo) => debug!("cron run found no forecast"),
            Ok(RunOutcome::Applied(applied)) => info!(
                tenant = %applied.receipt.tenant,
                version = applied.receipt.version,
                "cron run applied plan"
            ),
            Err(e) => warn!(error = %e, "cron run failed"),
        }
    }
}
