//! Shared application state: every store from `settld-core`, plus the
//! per-tenant audit logs, metrics registry, and signing keys the HTTP layer
//! needs on every request.
//!
//! Grounded in `StatusState`/`AppContext`'s shape: one struct wrapping
//! every long-lived component, constructed once in `main` and shared
//! behind an `Arc` via axum's `State` extractor.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use ed25519_dalek::SigningKey;

use settld_core::audit::TenantAuditLog;
use settld_core::entitlements::EntitlementTracker;
use settld_core::outbox::OutboxManager;
use settld_core::pipeline::DecisionStore;
use settld_core::ratelimit::RateLimiter;
use settld_core::tenant::TenantStore;
use settld_core::vault::{ArtifactStore, IngestKeyStore, MagicLinkStore, OtpStore};
use settld_spec::token::MagicLinkToken;
use settld_spec::TenantId;

use crate::config::RuntimeConfig;
use crate::metrics::ControlPlaneMetrics;

/// Every long-lived component the HTTP handlers operate on.
pub struct AppState {
    /// Resolved process configuration.
    pub config: RuntimeConfig,
    /// Tenant directory and settings.
    pub tenants: TenantStore,
    /// Content-addressed uploaded-bundle storage.
    pub artifacts: ArtifactStore,
    /// Magic link issuance/redemption.
    pub magic_links: MagicLinkStore,
    /// Vendor ingest key issuance/authentication.
    pub ingest_keys: IngestKeyStore,
    /// Buyer decision one-time-code issuance/verification.
    pub otp: OtpStore,
    /// One-decision-per-run lock and the recorded decisions themselves.
    pub decisions: DecisionStore,
    /// Per-tenant plan usage tracking.
    pub entitlements: EntitlementTracker,
    /// Sliding-window call limits per `(tenantId, verb)`.
    pub rate_limiter: RateLimiter,
    /// In-flight webhook delivery queue.
    pub outbox: OutboxManager,
    /// Lazily-opened per-tenant hash-chained audit trail.
    audit_logs: DashMap<TenantId, Arc<TenantAuditLog>>,
    /// Dedupe index from `"{tenantId}:{zipSha256}"` to the token already
    /// issued for that upload, so a repeat upload reuses its token rather
    /// than minting a fresh one (spec.md §4.4 step 2).
    upload_index: DashMap<String, MagicLinkToken>,
    /// Prometheus registry and counters.
    pub metrics: ControlPlaneMetrics,
}

impl AppState {
    /// Construct a fresh application state from a resolved configuration.
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            tenants: TenantStore::new(),
            artifacts: ArtifactStore::new(),
            magic_links: MagicLinkStore::new(),
            ingest_keys: IngestKeyStore::new(),
            otp: OtpStore::new(),
            decisions: DecisionStore::new(),
            entitlements: EntitlementTracker::new(),
            rate_limiter: RateLimiter::new(),
            outbox: OutboxManager::new(),
            audit_logs: DashMap::new(),
            upload_index: DashMap::new(),
            metrics: ControlPlaneMetrics::new(),
        }
    }

    /// Dedupe key for an upload.
    fn upload_key(tenant_id: &str, artifact_hash: &str) -> String {
        format!("{tenant_id}:{artifact_hash}")
    }

    /// Look up a previously issued token for this exact `(tenant, artifactHash)` pair.
    pub fn existing_upload_token(&self, tenant_id: &str, artifact_hash: &str) -> Option<MagicLinkToken> {
        self.upload_index.get(&Self::upload_key(tenant_id, artifact_hash)).map(|entry| entry.clone())
    }

    /// Record the token issued for a `(tenant, artifactHash)` pair.
    pub fn record_upload_token(&self, tenant_id: &str, artifact_hash: &str, token: MagicLinkToken) {
        self.upload_index.insert(Self::upload_key(tenant_id, artifact_hash), token);
    }

    /// Ed25519 key the control plane signs settlement decisions with.
    pub fn decision_signer(&self) -> &SigningKey {
        &self.config.decision_signing_key
    }

    fn audit_log_dir(&self, tenant_id: &str) -> PathBuf {
        self.config.data_dir.join("audit").join(tenant_id)
    }

    /// Fetch (opening on first use) a tenant's hash-chained audit log.
    pub fn audit_log_for(&self, tenant_id: &str) -> anyhow::Result<Arc<TenantAuditLog>> {
        if let Some(existing) = self.audit_logs.get(tenant_id) {
            return Ok(existing.clone());
        }
        let log = Arc::new(TenantAuditLog::open(self.audit_log_dir(tenant_id))?);
        self.audit_logs.insert(tenant_id.to_string(), log.clone());
        Ok(log)
    }
}

/// Shared, reference-counted handle to [`AppState`] used by every axum handler.
pub type SharedState = Arc<AppState>;
