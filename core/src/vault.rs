//! Token and artifact vault: magic link tokens, vendor ingest keys, and
//! content-addressed storage of uploaded settlement bundles.
//!
//! The content-addressed store is adapted from `brainstem::ContentStore`
//! (a `DashMap<[u8;32], Vec<u8>>` keyed by digest): here the digest is a
//! sha256 `artifactHash` rather than a blake3
//! CAS key, and entries additionally carry the uploading vendor and upload
//! timestamp needed to answer `GET /v1/runs/:runId`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;

use settld_spec::token::{IngestKey, MagicLinkToken, TokenError};
use settld_spec::{Sha256Hex, TenantId};

/// Errors raised by the vault.
#[derive(Debug, Error)]
pub enum VaultError {
    /// No bundle exists with the given artifact hash.
    #[error("artifact not found: {0}")]
    ArtifactNotFound(Sha256Hex),
    /// The magic link token is malformed or unknown.
    #[error("invalid or expired magic link")]
    InvalidMagicLink,
    /// The magic link token was explicitly revoked.
    #[error("magic link revoked")]
    Revoked,
    /// The ingest key is malformed or unknown.
    #[error("invalid ingest key")]
    InvalidIngestKey,
    /// The one-time code is unknown, expired, already consumed, or wrong.
    #[error("invalid or expired one-time code")]
    InvalidOtp,
    /// Token parse failure, wrapped for context.
    #[error(transparent)]
    Token(#[from] TokenError),
}

/// A stored settlement bundle: canonical JSON body plus vendor/upload metadata.
#[derive(Debug, Clone)]
pub struct StoredBundle {
    /// Uploading tenant.
    pub tenant_id: TenantId,
    /// Vendor id the bundle was uploaded under.
    pub vendor_id: String,
    /// Resolved verification mode the bundle was (or will be) checked under.
    pub mode: settld_spec::VerificationMode,
    /// Canonical bundle body (already stamped with `artifactHash`).
    pub body: Value,
    /// Unix millis upload timestamp.
    pub uploaded_at_ms: u64,
    /// The tenant's `settings_version` this bundle was last verified
    /// against (spec.md §3, §4.4 step 3). A re-upload whose tenant
    /// `settings_version` has since advanced must be rerun rather than
    /// served from cache.
    pub verified_settings_version: u64,
}

/// Content-addressed store of uploaded bundles, keyed by artifact hash.
#[derive(Default)]
pub struct ArtifactStore {
    bundles: DashMap<Sha256Hex, StoredBundle>,
}

impl ArtifactStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a stamped bundle, keyed by its own `artifactHash` field.
    pub fn put(&self, artifact_hash: Sha256Hex, bundle: StoredBundle) {
        self.bundles.insert(artifact_hash, bundle);
    }

    /// Fetch a bundle by artifact hash.
    pub fn get(&self, artifact_hash: &str) -> Result<StoredBundle, VaultError> {
        self.bundles
            .get(artifact_hash)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| VaultError::ArtifactNotFound(artifact_hash.to_string()))
    }
}

struct IssuedMagicLink {
    tenant_id: TenantId,
    buyer_email: String,
    run_id: String,
    revoked: bool,
}

/// Issues and resolves magic link tokens bound to a single verification run
/// (spec.md §4.3). Unlike a login link, this token is not time-boxed or
/// single-use on read: it is the receipt URL a buyer repeatedly opens to
/// view `verify.json`, `receipt.json`, and the decision form. Revoking it is
/// the only way to invalidate it (`GET` after revoke → `410 GONE`). The
/// one-decision-per-run lock is a separate concern, enforced by
/// [`crate::pipeline::DecisionStore`].
#[derive(Default)]
pub struct MagicLinkStore {
    links: RwLock<HashMap<String, IssuedMagicLink>>,
}

impl MagicLinkStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token bound to a tenant/run/buyer-email triple.
    pub fn issue(&self, tenant_id: TenantId, run_id: String, buyer_email: String) -> MagicLinkToken {
        let token = MagicLinkToken::issue();
        self.links
            .write()
            .insert(token.as_str().to_string(), IssuedMagicLink { tenant_id, buyer_email, run_id, revoked: false });
        token
    }

    /// Resolve a token to the `(tenant_id, run_id, buyer_email)` it was
    /// issued for, without consuming it.
    pub fn resolve(&self, raw: &str) -> Result<(TenantId, String, String), VaultError> {
        MagicLinkToken::parse(raw)?;
        let links = self.links.read();
        let link = links.get(raw).ok_or(VaultError::InvalidMagicLink)?;
        if link.revoked {
            return Err(VaultError::Revoked);
        }
        Ok((link.tenant_id.clone(), link.run_id.clone(), link.buyer_email.clone()))
    }

    /// Revoke a token so subsequent [`Self::resolve`] calls return
    /// [`VaultError::Revoked`].
    pub fn revoke(&self, raw: &str) -> Result<(), VaultError> {
        let mut links = self.links.write();
        let link = links.get_mut(raw).ok_or(VaultError::InvalidMagicLink)?;
        link.revoked = true;
        Ok(())
    }
}

/// Issues and validates per-vendor ingest keys used as bearer tokens against
/// `POST /v1/ingest/:tenantId` (spec.md §4.2, §6.1).
#[derive(Default)]
pub struct IngestKeyStore {
    keys: RwLock<HashMap<String, (TenantId, String)>>,
}

impl IngestKeyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh ingest key bound to a tenant/vendor pair.
    pub fn issue(&self, tenant_id: TenantId, vendor_id: String) -> IngestKey {
        let key = IngestKey::issue();
        self.keys.write().insert(key.as_str().to_string(), (tenant_id, vendor_id));
        key
    }

    /// Revoke an ingest key so it no longer authenticates.
    pub fn revoke(&self, raw: &str) {
        self.keys.write().remove(raw);
    }

    /// Resolve an ingest key to its owning `(tenant_id, vendor_id)`.
    pub fn authenticate(&self, raw: &str) -> Result<(TenantId, String), VaultError> {
        IngestKey::parse(raw)?;
        self.keys.read().get(raw).cloned().ok_or(VaultError::InvalidIngestKey)
    }
}

const OTP_TTL: Duration = Duration::from_secs(10 * 60);

struct PendingOtp {
    code: String,
    issued_at: Instant,
    consumed: bool,
}

/// Issues and verifies 6-digit one-time codes used to authenticate a buyer
/// decision when no session cookie is present (spec.md §4.5 step 2).
#[derive(Default)]
pub struct OtpStore {
    pending: RwLock<HashMap<String, PendingOtp>>,
}

impl OtpStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh 6-digit code bound to a tenant/run/email triple,
    /// keyed by that triple so a re-request replaces the outstanding code.
    pub fn request(&self, tenant_id: TenantId, run_id: String, email: String) -> String {
        let mut bytes = [0u8; 4];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
        let code = format!("{:06}", u32::from_be_bytes(bytes) % 1_000_000);
        let key = format!("{tenant_id}:{run_id}:{email}");
        self.pending.write().insert(key, PendingOtp { code: code.clone(), issued_at: Instant::now(), consumed: false });
        code
    }

    /// Verify and consume a code for a tenant/run/email triple.
    pub fn verify(&self, tenant_id: &str, run_id: &str, email: &str, code: &str) -> Result<(), VaultError> {
        let key = format!("{tenant_id}:{run_id}:{email}");
        let mut pending = self.pending.write();
        let entry = pending.get_mut(&key).ok_or(VaultError::InvalidOtp)?;
        if entry.consumed || entry.issued_at.elapsed() > OTP_TTL || entry.code != code {
            return Err(VaultError::InvalidOtp);
        }
        entry.consumed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn artifact_store_roundtrips() {
        let store = ArtifactStore::new();
        store.put(
            "deadbeef".into(),
            StoredBundle {
                tenant_id: "acme".into(),
                vendor_id: "v1".into(),
                mode: settld_spec::VerificationMode::Auto,
                body: json!({"a": 1}),
                uploaded_at_ms: 0,
                verified_settings_version: 0,
            },
        );
        let fetched = store.get("deadbeef").unwrap();
        assert_eq!(fetched.vendor_id, "v1");
    }

    #[test]
    fn artifact_store_reports_missing() {
        let store = ArtifactStore::new();
        assert!(matches!(store.get("missing"), Err(VaultError::ArtifactNotFound(_))));
    }

    #[test]
    fn magic_link_resolves_repeatedly_until_revoked() {
        let store = MagicLinkStore::new();
        let token = store.issue("acme".into(), "run_1".into(), "buyer@example.com".into());
        let (tenant, run, email) = store.resolve(token.as_str()).unwrap();
        assert_eq!(tenant, "acme");
        assert_eq!(run, "run_1");
        assert_eq!(email, "buyer@example.com");
        // Resolving again does not consume the token.
        store.resolve(token.as_str()).unwrap();
        store.revoke(token.as_str()).unwrap();
        assert!(matches!(store.resolve(token.as_str()), Err(VaultError::Revoked)));
    }

    #[test]
    fn magic_link_resolve_rejects_unknown_token() {
        let store = MagicLinkStore::new();
        let token = MagicLinkToken::issue();
        assert!(matches!(store.resolve(token.as_str()), Err(VaultError::InvalidMagicLink)));
    }

    #[test]
    fn ingest_key_authenticates_until_revoked() {
        let store = IngestKeyStore::new();
        let key = store.issue("acme".into(), "vendor-1".into());
        let (tenant, vendor) = store.authenticate(key.as_str()).unwrap();
        assert_eq!((tenant.as_str(), vendor.as_str()), ("acme", "vendor-1"));
        store.revoke(key.as_str());
        assert!(matches!(store.authenticate(key.as_str()), Err(VaultError::InvalidIngestKey)));
    }

    #[test]
    fn otp_is_single_use_and_code_checked() {
        let store = OtpStore::new();
        let code = store.request("acme".into(), "run_1".into(), "buyer@example.com".into());
        assert_eq!(code.len(), 6);
        let wrong = if code == "999999" { "888888" } else { "999999" };
        assert!(matches!(store.verify("acme", "run_1", "buyer@example.com", wrong), Err(VaultError::InvalidOtp)));
        store.verify("acme", "run_1", "buyer@example.com", &code).unwrap();
        assert!(matches!(store.verify("acme", "run_1", "buyer@example.com", &code), Err(VaultError::InvalidOtp)));
    }
}
