//! Tenant store: tenant records, vendor policies, auto-decision policy, and
//! sealed secrets.
//!
//! Grounded in `AppContext`/`register_and_seal_model`'s naming
//! (a shared context wrapping a signer plus a "seal" verb for sensitive
//! payloads) but retargeted: here the thing sealed is not a model blob but a
//! tenant-held secret such as a webhook signing key or an x402 wallet seed,
//! and the seal is AES-256-GCM rather than a content-addressed blob ref.

use std::collections::HashMap;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use parking_lot::RwLock;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use settld_spec::policy::{AutoDecisionPolicy, VendorPolicy};
use settld_spec::{Plan, TenantId};

/// Errors raised by the tenant store.
#[derive(Debug, Error)]
pub enum TenantError {
    /// No tenant exists with the given id.
    #[error("tenant not found: {0}")]
    NotFound(TenantId),
    /// A tenant with the given slug already exists.
    #[error("tenant already exists: {0}")]
    AlreadyExists(TenantId),
    /// A sealed secret could not be unsealed (wrong key, corrupt ciphertext).
    #[error("secret unseal failed")]
    UnsealFailed,
    /// A secret string did not match the `enc:v1:<nonce>:<ciphertext>` shape.
    #[error("malformed sealed secret")]
    MalformedSeal,
}

/// Per-tenant configuration, mirroring spec.md §3 `TenantSettings`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantSettings {
    /// Default verification mode applied when a vendor has none configured.
    pub default_verification_mode: settld_spec::VerificationMode,
    /// Per-vendor policy overrides, keyed by vendor id.
    pub vendor_policies: HashMap<String, VendorPolicy>,
    /// Auto-decision policy, if configured.
    pub auto_decision: AutoDecisionPolicy,
    /// Webhook delivery URL, if configured.
    pub webhook_url: Option<String>,
    /// Sealed webhook HMAC signing secret (`enc:v1:<nonce>:<ciphertext>`).
    pub sealed_webhook_secret: Option<String>,
    /// Buyer allowlist of email domains permitted to authenticate via OTP.
    pub buyer_email_allowlist: Vec<String>,
    /// Key ids of the governance attestation roots this tenant trusts.
    /// Empty means no roots are configured; `strict` mode then refuses to
    /// verify (spec.md §4.4 step 4) and `auto`/`compat` fall back to a
    /// lenient warning.
    pub governance_trust_root_key_ids: Vec<String>,
}

/// A tenant account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    /// Slug identifier, stable and URL-safe.
    pub id: TenantId,
    /// Display name.
    pub name: String,
    /// Billing plan tier.
    pub plan: Plan,
    /// Tenant-scoped settings.
    pub settings: TenantSettings,
    /// Unix millis creation timestamp.
    pub created_at_ms: u64,
    /// Generation counter bumped every time [`TenantStore::update_settings`]
    /// applies a change. A stored bundle's `verified_settings_version`
    /// (spec.md §3, §4.4 step 3) is compared against this to decide whether
    /// a deduped re-upload must be rerun rather than served from cache.
    pub settings_version: u64,
}

/// In-memory tenant directory guarded by a single lock, mirroring the
/// single-`RwLock`-over-state shape used for small, frequently-read
/// collections.
#[derive(Default)]
pub struct TenantStore {
    tenants: RwLock<HashMap<TenantId, Tenant>>,
}

impl TenantStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new tenant.
    pub fn create(&self, id: TenantId, name: String, created_at_ms: u64) -> Result<Tenant, TenantError> {
        let mut tenants = self.tenants.write();
        if tenants.contains_key(&id) {
            return Err(TenantError::AlreadyExists(id));
        }
        let tenant = Tenant {
            id: id.clone(),
            name,
            plan: Plan::default(),
            settings: TenantSettings::default(),
            created_at_ms,
            settings_version: 0,
        };
        tenants.insert(id, tenant.clone());
        Ok(tenant)
    }

    /// Fetch a tenant by id.
    pub fn get(&self, id: &str) -> Result<Tenant, TenantError> {
        self.tenants
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| TenantError::NotFound(id.to_string()))
    }

    /// Apply an update function to a tenant's settings, persisting the result.
    pub fn update_settings<F>(&self, id: &str, f: F) -> Result<Tenant, TenantError>
    where
        F: FnOnce(&mut TenantSettings),
    {
        let mut tenants = self.tenants.write();
        let tenant = tenants.get_mut(id).ok_or_else(|| TenantError::NotFound(id.to_string()))?;
        f(&mut tenant.settings);
        tenant.settings_version += 1;
        Ok(tenant.clone())
    }

    /// Update a tenant's plan (e.g. after a successful autopay upgrade).
    pub fn set_plan(&self, id: &str, plan: Plan) -> Result<Tenant, TenantError> {
        let mut tenants = self.tenants.write();
        let tenant = tenants.get_mut(id).ok_or_else(|| TenantError::NotFound(id.to_string()))?;
        tenant.plan = plan;
        Ok(tenant.clone())
    }

    /// List all tenant ids.
    pub fn list_ids(&self) -> Vec<TenantId> {
        self.tenants.read().keys().cloned().collect()
    }
}

const SEAL_PREFIX: &str = "enc:v1:";

/// Seal a secret under a 256-bit key, producing `enc:v1:<nonce-b64url>:<ciphertext-b64url>`.
pub fn seal_secret(key: &[u8; 32], plaintext: &str) -> String {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .expect("AES-256-GCM encryption over a bounded plaintext cannot fail");
    format!(
        "{SEAL_PREFIX}{}:{}",
        settld_spec::canon::base64url_encode(&nonce_bytes),
        settld_spec::canon::base64url_encode(&ciphertext)
    )
}

/// Unseal a secret previously produced by [`seal_secret`].
pub fn unseal_secret(key: &[u8; 32], sealed: &str) -> Result<String, TenantError> {
    let rest = sealed.strip_prefix(SEAL_PREFIX).ok_or(TenantError::MalformedSeal)?;
    let mut parts = rest.splitn(2, ':');
    let nonce_part = parts.next().ok_or(TenantError::MalformedSeal)?;
    let ciphertext_part = parts.next().ok_or(TenantError::MalformedSeal)?;
    let nonce_bytes = settld_spec::canon::base64url_decode(nonce_part).map_err(|_| TenantError::MalformedSeal)?;
    if nonce_bytes.len() != 12 {
        return Err(TenantError::MalformedSeal);
    }
    let ciphertext = settld_spec::canon::base64url_decode(ciphertext_part).map_err(|_| TenantError::MalformedSeal)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(&nonce_bytes);
    let plaintext = cipher
        .decrypt(nonce, ciphertext.as_ref())
        .map_err(|_| TenantError::UnsealFailed)?;
    String::from_utf8(plaintext).map_err(|_| TenantError::UnsealFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> [u8; 32] {
        [7u8; 32]
    }

    #[test]
    fn seal_roundtrips() {
        let sealed = seal_secret(&key(), "whsec_abc123");
        assert!(sealed.starts_with("enc:v1:"));
        let unsealed = unseal_secret(&key(), &sealed).unwrap();
        assert_eq!(unsealed, "whsec_abc123");
    }

    #[test]
    fn wrong_key_fails_to_unseal() {
        let sealed = seal_secret(&key(), "whsec_abc123");
        let err = unseal_secret(&[9u8; 32], &sealed).unwrap_err();
        assert!(matches!(err, TenantError::UnsealFailed));
    }

    #[test]
    fn two_seals_of_same_plaintext_differ() {
        let a = seal_secret(&key(), "same");
        let b = seal_secret(&key(), "same");
        assert_ne!(a, b, "nonces must differ between calls");
    }

    #[test]
    fn store_rejects_duplicate_tenant_ids() {
        let store = TenantStore::new();
        store.create("acme".into(), "Acme".into(), 0).unwrap();
        let err = store.create("acme".into(), "Acme Again".into(), 0).unwrap_err();
        assert!(matches!(err, TenantError::AlreadyExists(_)));
    }

    #[test]
    fn update_settings_persists_across_reads() {
        let store = TenantStore::new();
        store.create("acme".into(), "Acme".into(), 0).unwrap();
        store
            .update_settings("acme", |s| s.webhook_url = Some("https://example.com/hook".into()))
            .unwrap();
        let tenant = store.get("acme").unwrap();
        assert_eq!(tenant.settings.webhook_url.as_deref(), Some("https://example.com/hook"));
    }

    #[test]
    fn update_settings_bumps_the_version_counter() {
        let store = TenantStore::new();
        store.create("acme".into(), "Acme".into(), 0).unwrap();
        assert_eq!(store.get("acme").unwrap().settings_version, 0);
        store.update_settings("acme", |s| s.webhook_url = Some("https://example.com/hook".into())).unwrap();
        assert_eq!(store.get("acme").unwrap().settings_version, 1);
        store.update_settings("acme", |s| s.governance_trust_root_key_ids = vec!["root_1".into()]).unwrap();
        assert_eq!(store.get("acme").unwrap().settings_version, 2);
    }
}
