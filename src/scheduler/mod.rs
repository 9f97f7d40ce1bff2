//! Per-tenant plan scheduling.
//!
//! [`Scheduler`] maps tenant labels to long-lived actors; each actor owns one
//! tenant's plan record, enforces version monotonicity and runs the periodic
//! forecast drift check. Tenants without saved state get no actor until their
//! first apply.

pub mod actor;
pub mod store;

use std::collections::HashMap;

use parking_lot::Mutex;

pub use actor::{
    ActorDeps, AlarmOutcome, ApplyReceipt, ApplyRequest, SchedulerHandle, SchedulerSettings,
};
pub use store::{ActorState, JsonPlanStore, MemoryPlanStore, PlanStore};

use tracing::info;

use crate::error::{SchedulerError, StoreError};
use crate::plan::StoredPlanRecord;

/// Registry of tenant actors, spawning each on first use.
#[derive(Debug)]
pub struct Scheduler {
    deps: ActorDeps,
    actors: Mutex<HashMap<String, SchedulerHandle>>,
}

impl Scheduler {
    pub fn new(deps: ActorDeps) -> Self {
        Self {
            deps,
            actors: Mutex::new(HashMap::new()),
        }
    }

    /// Normalized actor key for a tenant label; blank labels map to the
    /// configured default tenant.
    pub fn tenant_key(&self, tenant: Option<&str>) -> String {
        tenant
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.deps.settings.default_tenant)
            .to_string()
    }

    /// Handle to the actor for `tenant`, spawning it if needed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn handle(&self, tenant: Option<&str>) -> SchedulerHandle {
        let key = self.tenant_key(tenant);
        let mut actors = self.actors.lock();
        if let Some(handle) = actors.get(&key).filter(|h| !h.is_closed()) {
            return handle.clone();
        }
        let handle = SchedulerHandle::spawn(key.clone(), self.deps.clone());
        actors.insert(key, handle.clone());
        handle
    }

    fn running(&self, key: &str) -> Option<SchedulerHandle> {
        self.actors
            .lock()
            .get(key)
            .filter(|h| !h.is_closed())
            .cloned()
    }

    /// Running actor for `key`, or a fresh one when the tenant has saved
    /// state. `None` for a tenant the store has never seen.
    async fn existing(&self, key: &str) -> Result<Option<SchedulerHandle>, SchedulerError> {
        if let Some(handle) = self.running(key) {
            return Ok(Some(handle));
        }
        let state = self.deps.store.load(key).await?;
        Ok(state.record.map(|_| self.handle(Some(key))))
    }

    /// Spawns an actor for every tenant with saved state, so persisted drift
    /// checks are re-armed without waiting for a request.
    ///
    /// # Errors
    ///
    /// Returns the store error if saved tenants cannot be listed.
    pub async fn restore(&self) -> Result<Vec<String>, StoreError> {
        let ids = self.deps.store.actor_ids().await?;
        for id in &ids {
            self.handle(Some(id.as_str()));
        }
        info!(tenants = ids.len(), "tenant schedulers restored");
        Ok(ids)
    }

    /// Tenants with a running actor, sorted.
    pub fn tenants(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.actors.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Submits `request` to the actor of its tenant.
    pub async fn apply(&self, request: ApplyRequest) -> Result<ApplyReceipt, SchedulerError> {
        let handle = self.handle(request.tenant.as_deref());
        handle.apply(request).await
    }

    /// Current record of `tenant`.
    pub async fn plan(
        &self,
        tenant: Option<&str>,
    ) -> Result<Option<StoredPlanRecord>, SchedulerError> {
        match self.existing(&self.tenant_key(tenant)).await? {
            Some(handle) => handle.plan().await,
            None => Ok(None),
        }
    }

    /// Runs a drift check for `tenant` now.
    pub async fn alarm(&self, tenant: Option<&str>) -> Result<AlarmOutcome, SchedulerError> {
        match self.existing(&self.tenant_key(tenant)).await? {
            Some(handle) => handle.alarm().await,
            None => Ok(AlarmOutcome::Idle),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::audit::MemoryAuditLog;
    use crate::config::ServiceConfig;
    use crate::forecast::MemoryForecastStore;
    use crate::plan::{Metrics, Plan, PlanBuilder, SeriesBundle, Trigger};

    fn scheduler() -> Scheduler {
        let builder = PlanBuilder::from_config(
            Arc::new(MemoryForecastStore::new()),
            &ServiceConfig::default(),
        );
        Scheduler::new(ActorDeps {
            store: Arc::new(MemoryPlanStore::new()),
            builder: Arc::new(builder),
            audit: Arc::new(MemoryAuditLog::new()),
            settings: SchedulerSettings::default(),
        })
    }

    fn request(tenant: &str, version: u64) -> ApplyRequest {
        ApplyRequest {
            plan: Plan {
                version,
                series: SeriesBundle {
                    base: vec![1.0],
                    renewable: vec![0.0],
                    intensity: None,
                    optimized: vec![1.0],
                },
                metrics: Metrics::default(),
            },
            forecast_digest: None,
            trigger: Trigger::Apply,
            tenant: Some(tenant.to_string()),
        }
    }

    #[test]
    fn blank_tenant_maps_to_default() {
        let s = scheduler();
        assert_eq!(s.tenant_key(None), "demo");
        assert_eq!(s.tenant_key(Some("   ")), "demo");
        assert_eq!(s.tenant_key(Some(" plant-a ")), "plant-a");
    }

    #[tokio::test]
    async fn tenants_are_isolated() {
        let s = scheduler();
        s.apply(request("a", 10)).await.expect("apply a");
        s.apply(request("b", 5)).await.expect("apply b");

        let err = s.apply(request("a", 9)).await.expect_err("stale for a");
        assert!(err.is_conflict());

        let a = s.plan(Some("a")).await.expect("read").expect("record");
        let b = s.plan(Some("b")).await.expect("read").expect("record");
        assert_eq!((a.plan.version, b.plan.version), (10, 5));
        assert_eq!(s.tenants(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn same_tenant_shares_one_actor() {
        let s = scheduler();
        let first = s.handle(Some("a"));
        let second = s.handle(Some("a"));
        assert_eq!(first.id(), second.id());
        assert_eq!(s.tenants().len(), 1);
    }

    #[tokio::test]
    async fn unknown_tenants_spawn_no_actor() {
        let s = scheduler();
        for i in 0..50 {
            let tenant = format!("ghost-{i}");
            assert!(s.plan(Some(tenant.as_str())).await.expect("read").is_none());
            let outcome = s.alarm(Some(tenant.as_str())).await.expect("alarm");
            assert!(matches!(outcome, AlarmOutcome::Idle));
        }
        assert!(s.tenants().is_empty());

        s.apply(request("real", 1)).await.expect("apply");
        assert_eq!(s.tenants(), vec!["real".to_string()]);
    }

    #[tokio::test]
    async fn saved_tenant_respawns_on_read() {
        let store = Arc::new(MemoryPlanStore::new());
        let builder = PlanBuilder::from_config(
            Arc::new(MemoryForecastStore::new()),
            &ServiceConfig::default(),
        );
        let deps = ActorDeps {
            store: store.clone(),
            builder: Arc::new(builder),
            audit: Arc::new(MemoryAuditLog::new()),
            settings: SchedulerSettings::default(),
        };
        Scheduler::new(deps.clone())
            .apply(request("a", 4))
            .await
            .expect("apply");

        let restarted = Scheduler::new(deps);
        let record = restarted.plan(Some("a")).await.expect("read").expect("record");
        assert_eq!(record.plan.version, 4);
        assert_eq!(restarted.restore().await.expect("restore"), vec!["a".to_string()]);
        assert_eq!(restarted.tenants(), vec!["a".to_string()]);
    }
}
