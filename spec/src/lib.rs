//! Canonical types, hashing, hash-chain validation, and policy model shared
//! across the Settld control plane.
//!
//! This crate defines the wire-stable vocabulary (token shapes, canonical
//! JSON, sha256 artifact addressing, chained-event validation) that every
//! other crate in the workspace builds on, the same role `ledger-spec` plays
//! for the ledger daemon this workspace was adapted from.
#![deny(missing_docs)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical JSON serialization and sha256 artifact hashing.
pub mod canon;
/// Hash-chained event/audit-row validation.
pub mod chain;
/// Declarative vendor and auto-decision policy model.
pub mod policy;
/// Opaque token shapes (magic link tokens, ingest keys, api keys).
pub mod token;
/// Deterministic ZIP building.
pub mod zipfile;

pub use canon::{canonical_json, sha256_hex, stamp_artifact_hash, CanonError};
pub use chain::{ChainError, ChainLink, ChainState};
pub use token::{IngestKey, MagicLinkToken, TokenError};

/// Sha256 hex digest, lowercase, 64 characters.
pub type Sha256Hex = String;

/// Tenant identifier (slug).
pub type TenantId = String;

/// Verification mode requested or resolved for an upload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VerificationMode {
    /// Caller left mode unset; resolved from tenant defaults / trust roots.
    Auto,
    /// Require trusted governance root keys.
    Strict,
    /// Lenient mode, trusted roots optional.
    Compat,
}

impl Default for VerificationMode {
    fn default() -> Self {
        VerificationMode::Auto
    }
}

impl VerificationMode {
    /// Parse from an optional query-string value, defaulting to `Auto`.
    pub fn parse_opt(raw: Option<&str>) -> Result<Self, CanonError> {
        match raw.map(str::to_ascii_lowercase).as_deref() {
            None | Some("") | Some("auto") => Ok(Self::Auto),
            Some("strict") => Ok(Self::Strict),
            Some("compat") => Ok(Self::Compat),
            Some(other) => Err(CanonError::InvalidEnum {
                field: "mode",
                value: other.to_string(),
            }),
        }
    }
}

/// Resolved run status after verification and policy application.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Verification passed with no warnings hitting the trust-anchor set.
    Green,
    /// Verification passed but at least one warning matched the trust anchor set.
    Amber,
    /// Verification failed.
    Red,
    /// Run is being verified; not yet resolved (used for async verifier backends).
    Processing,
}

/// Billing plan tiers, ordered from least to most capable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    /// Free tier.
    Free,
    /// Self-serve paid tier.
    Builder,
    /// Mid-market tier.
    Growth,
    /// Usage-heavy tier.
    Scale,
    /// Custom-contract tier.
    Enterprise,
}

impl Default for Plan {
    fn default() -> Self {
        Plan::Free
    }
}

/// Buyer/decision-actor authentication method, recorded on every decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// No tenant allowlist configured; body accepted as-is.
    Unauthenticated,
    /// Buyer authenticated via a one-time email code.
    EmailOtp,
    /// Buyer authenticated via an existing session cookie.
    BuyerSession,
    /// Decision was made automatically by tenant auto-decision policy.
    SystemAutoDecision,
}

/// A decision verb.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DecisionVerb {
    /// Approve the bundle.
    Approve,
    /// Hold the bundle for further review.
    Hold,
}

/// Canonical error-code vocabulary surfaced over HTTP (spec.md §7).
///
/// Kept as a plain string wrapper rather than a closed enum: new codes are
/// added by outbound collaborators (the ops API, the verifier) faster than
/// this crate ships, and the HTTP layer needs to be able to pass through
/// unrecognized upstream codes verbatim (see the `BOOTSTRAP_DOWN` row).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorCode(pub String);

impl ErrorCode {
    /// Build from a `&'static str` literal.
    pub fn new(code: &str) -> Self {
        Self(code.to_string())
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors raised while validating request-shaped input independent of any
/// particular store or transport (shared vocabulary for `settld-core` and
/// `settld-httpd`).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    /// A required field was absent or malformed.
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        /// Field name.
        field: String,
        /// Human-readable reason.
        reason: String,
    },
    /// A named entitlement limit was exceeded (feature-gating: webhooks,
    /// ingest keys, policy versions).
    #[error("entitlement limit exceeded: {feature}")]
    EntitlementLimitExceeded {
        /// Feature name (e.g. "webhooks").
        feature: String,
        /// Configured limit.
        limit: u64,
        /// Current usage.
        used: u64,
    },
    /// A usage-based monthly quota was exhausted (verifications, stored
    /// bundles). Distinct from [`Self::EntitlementLimitExceeded`] because
    /// spec.md §4.7 surfaces it as `429 QUOTA_EXCEEDED`, not `403`.
    #[error("quota exceeded: {feature}")]
    QuotaExceeded {
        /// Feature name (e.g. "monthly_runs").
        feature: String,
        /// Configured limit.
        limit: u64,
        /// Current usage.
        used: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_mode_defaults_to_auto() {
        assert_eq!(VerificationMode::parse_opt(None).unwrap(), VerificationMode::Auto);
        assert_eq!(VerificationMode::parse_opt(Some("")).unwrap(), VerificationMode::Auto);
    }

    #[test]
    fn verification_mode_rejects_unknown() {
        assert!(VerificationMode::parse_opt(Some("bogus")).is_err());
    }

    #[test]
    fn plan_default_is_free() {
        assert_eq!(Plan::default(), Plan::Free);
    }
}
