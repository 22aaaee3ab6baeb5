//! Plan catalog and per-tenant quota tracking (spec.md §4.7).
//!
//! No billing concept exists upstream; grounded in
//! `settld_spec::DomainError::EntitlementLimitExceeded` for the error shape
//! and in the tenant store's single-`RwLock`-per-collection pattern for the
//! usage counters.

use std::collections::HashMap;

use parking_lot::RwLock;

use settld_spec::{DomainError, Plan, TenantId};

/// Static limits attached to a plan tier.
#[derive(Debug, Clone, Copy)]
pub struct PlanLimits {
    /// Maximum verified runs per calendar month.
    pub monthly_runs: u64,
    /// Maximum configured webhook endpoints.
    pub webhooks: u64,
    /// Maximum vendor ingest keys.
    pub ingest_keys: u64,
}

/// Return the static limits for a plan tier.
pub fn limits_for(plan: Plan) -> PlanLimits {
    match plan {
        Plan::Free => PlanLimits { monthly_runs: 100, webhooks: 1, ingest_keys: 1 },
        Plan::Builder => PlanLimits { monthly_runs: 1_000, webhooks: 3, ingest_keys: 5 },
        Plan::Growth => PlanLimits { monthly_runs: 100_000, webhooks: 10, ingest_keys: 25 },
        Plan::Scale => PlanLimits { monthly_runs: 1_000_000, webhooks: 50, ingest_keys: 100 },
        Plan::Enterprise => PlanLimits { monthly_runs: u64::MAX, webhooks: u64::MAX, ingest_keys: u64::MAX },
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct TenantUsage {
    monthly_runs: u64,
    webhooks: u64,
    ingest_keys: u64,
}

/// Tracks current usage per tenant against its plan's limits.
#[derive(Default)]
pub struct EntitlementTracker {
    usage: RwLock<HashMap<TenantId, TenantUsage>>,
}

impl EntitlementTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset a tenant's monthly run counter (called on billing period rollover).
    pub fn reset_monthly_runs(&self, tenant_id: &str) {
        self.usage.write().entry(tenant_id.to_string()).or_default().monthly_runs = 0;
    }

    /// Record a verified run and enforce the monthly quota. A usage-based
    /// quota (spec.md §4.7), not a feature-gating entitlement: exhaustion
    /// surfaces as `429 QUOTA_EXCEEDED`, never blocks dedupe/rerun of an
    /// already-stored run.
    pub fn record_run(&self, tenant_id: &str, plan: Plan) -> Result<(), DomainError> {
        let limit = limits_for(plan).monthly_runs;
        let mut usage = self.usage.write();
        let entry = usage.entry(tenant_id.to_string()).or_default();
        if entry.monthly_runs >= limit {
            return Err(DomainError::QuotaExceeded { feature: "monthly_runs".into(), limit, used: entry.monthly_runs });
        }
        entry.monthly_runs += 1;
        Ok(())
    }

    /// Check whether another webhook endpoint may be registered.
    pub fn check_webhook_quota(&self, plan: Plan, configured: u64) -> Result<(), DomainError> {
        let limit = limits_for(plan).webhooks;
        if configured >= limit {
            return Err(DomainError::EntitlementLimitExceeded { feature: "webhooks".into(), limit, used: configured });
        }
        Ok(())
    }

    /// Check whether another ingest key may be issued.
    pub fn check_ingest_key_quota(&self, plan: Plan, issued: u64) -> Result<(), DomainError> {
        let limit = limits_for(plan).ingest_keys;
        if issued >= limit {
            return Err(DomainError::EntitlementLimitExceeded { feature: "ingest_keys".into(), limit, used: issued });
        }
        Ok(())
    }

    /// Current monthly run usage for a tenant.
    pub fn monthly_runs_used(&self, tenant_id: &str) -> u64 {
        self.usage.read().get(tenant_id).map(|u| u.monthly_runs).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_plan_run_quota_is_enforced() {
        let tracker = EntitlementTracker::new();
        for _ in 0..100 {
            tracker.record_run("acme", Plan::Free).unwrap();
        }
        let err = tracker.record_run("acme", Plan::Free).unwrap_err();
        assert!(matches!(err, DomainError::QuotaExceeded { feature, .. } if feature == "monthly_runs"));
    }

    #[test]
    fn enterprise_plan_never_hits_run_quota() {
        let tracker = EntitlementTracker::new();
        for _ in 0..10_000 {
            tracker.record_run("acme", Plan::Enterprise).unwrap();
        }
    }

    #[test]
    fn webhook_quota_respects_plan_limit() {
        let tracker = EntitlementTracker::new();
        assert!(tracker.check_webhook_quota(Plan::Free, 0).is_ok());
        assert!(tracker.check_webhook_quota(Plan::Free, 1).is_err());
    }

    #[test]
    fn monthly_reset_clears_usage() {
        let tracker = EntitlementTracker::new();
        tracker.record_run("acme", Plan::Free).unwrap();
        assert_eq!(tracker.monthly_runs_used("acme"), 1);
        tracker.reset_monthly_runs("acme");
        assert_eq!(tracker.monthly_runs_used("acme"), 0);
    }
}
