//! HTTP error envelope: every non-2xx response is
//! `{ok: false, code, message, detail?, upgradeHint?}` (spec.md §7).
//!
//! Grounded in `ledger_core::AppendError`/`ValidationError`'s layering:
//! internal domain errors convert into a single boundary error type via
//! `From`, and that boundary type alone knows how to render itself over
//! the wire. Here, spec.md §7 pins one HTTP status and one machine-readable
//! code per error kind, so this type carries both explicitly rather than
//! deriving a status from the variant alone.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use settld_core::pipeline::DecisionError;
use settld_core::tenant::TenantError;
use settld_core::vault::VaultError;
use settld_spec::chain::ChainError;
use settld_spec::{CanonError, DomainError};

/// The single error type every handler returns in its `Result` error arm.
///
/// Each variant pins the `(StatusCode, code)` pair spec.md §7 assigns to
/// that error kind; callers choose the specific `code` within a kind (e.g.
/// `RUN_NOT_FOUND` vs `TOKEN_NOT_FOUND`, both 404).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 400: the request body, query string, or decision policy check failed.
    #[error("{message}")]
    BadRequest {
        /// Machine-readable code.
        code: &'static str,
        /// Human-readable detail.
        message: String,
    },
    /// 401: missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,
    /// 403: authenticated, but not permitted to perform this action.
    #[error("forbidden")]
    Forbidden {
        /// Machine-readable code (e.g. `FORBIDDEN`).
        code: &'static str,
    },
    /// 403: a plan-based entitlement limit was exceeded.
    #[error("entitlement limit exceeded: {feature}")]
    EntitlementExceeded {
        /// Feature name.
        feature: String,
        /// Configured limit.
        limit: u64,
        /// Current usage.
        used: u64,
    },
    /// 429: a usage-based monthly quota was exhausted.
    #[error("quota exceeded: {feature}")]
    QuotaExceeded {
        /// Feature name.
        feature: String,
        /// Configured limit.
        limit: u64,
        /// Current usage.
        used: u64,
    },
    /// 404: no such resource.
    #[error("not found")]
    NotFound {
        /// Machine-readable code (e.g. `RUN_NOT_FOUND`, `TOKEN_NOT_FOUND`).
        code: &'static str,
    },
    /// 410: the token was explicitly revoked.
    #[error("revoked")]
    Revoked,
    /// 409: optimistic-concurrency or state-machine precondition failed.
    #[error("{message}")]
    Conflict {
        /// Machine-readable code (e.g. `DECISION_ALREADY_RECORDED`).
        code: &'static str,
        /// Human-readable detail.
        message: String,
    },
    /// 429: a sliding-window rate limit was exhausted.
    #[error("rate limited")]
    RateLimited {
        /// Seconds the client should wait before retrying; mirrored into
        /// both the `Retry-After` header and the body `detail`.
        retry_after_secs: u64,
    },
    /// 502: the upstream ops API is unreachable or returned an error.
    #[error("upstream error: {message}")]
    Upstream {
        /// Code surfaced verbatim from the upstream, or `BOOTSTRAP_DOWN`.
        code: String,
        /// Human-readable detail.
        message: String,
    },
    /// 401: an inbound webhook's `x-settld-timestamp`/`x-settld-signature`
    /// failed verification (spec.md §4.6 ¶2).
    #[error("{message}")]
    WebhookVerificationFailed {
        /// Machine-readable code (`SETTLD_WEBHOOK_TIMESTAMP_OUTSIDE_TOLERANCE`
        /// or `SETTLD_WEBHOOK_SIGNATURE_NO_MATCH`).
        code: &'static str,
        /// Human-readable detail.
        message: String,
    },
    /// 500: unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<settld_transport::WebhookVerificationError> for ApiError {
    fn from(err: settld_transport::WebhookVerificationError) -> Self {
        use settld_transport::WebhookVerificationError::*;
        match err {
            SignatureHeaderInvalid => {
                ApiError::BadRequest { code: "SETTLD_WEBHOOK_SIGNATURE_HEADER_INVALID", message: err.to_string() }
            }
            TimestampOutsideTolerance => {
                ApiError::WebhookVerificationFailed { code: "SETTLD_WEBHOOK_TIMESTAMP_OUTSIDE_TOLERANCE", message: err.to_string() }
            }
            SignatureNoMatch => {
                ApiError::WebhookVerificationFailed { code: "SETTLD_WEBHOOK_SIGNATURE_NO_MATCH", message: err.to_string() }
            }
            RawBodyRequired => ApiError::BadRequest { code: "SETTLD_WEBHOOK_RAW_BODY_REQUIRED", message: err.to_string() },
        }
    }
}

impl From<settld_core::outbox::OutboxError> for ApiError {
    fn from(err: settld_core::outbox::OutboxError) -> Self {
        match err {
            settld_core::outbox::OutboxError::NotFound(_) => ApiError::NotFound { code: "RUN_NOT_FOUND" },
            settld_core::outbox::OutboxError::NotDeadLettered(_) => {
                ApiError::Conflict { code: "OUTBOX_NOT_DEAD_LETTERED", message: err.to_string() }
            }
            settld_core::outbox::OutboxError::ProviderMismatch { .. } => {
                ApiError::Conflict { code: "PROVIDER_MISMATCH", message: err.to_string() }
            }
        }
    }
}

impl From<TenantError> for ApiError {
    fn from(err: TenantError) -> Self {
        match err {
            TenantError::NotFound(_) => ApiError::NotFound { code: "TENANT_NOT_FOUND" },
            TenantError::AlreadyExists(id) => {
                ApiError::Conflict { code: "TENANT_ALREADY_EXISTS", message: format!("tenant already exists: {id}") }
            }
            TenantError::UnsealFailed | TenantError::MalformedSeal => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<VaultError> for ApiError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::ArtifactNotFound(_) => ApiError::NotFound { code: "RUN_NOT_FOUND" },
            VaultError::InvalidMagicLink => ApiError::NotFound { code: "TOKEN_NOT_FOUND" },
            VaultError::Revoked => ApiError::Revoked,
            VaultError::InvalidIngestKey => ApiError::Unauthorized,
            VaultError::InvalidOtp => ApiError::BadRequest { code: "INVALID_OTP", message: err.to_string() },
            VaultError::Token(_) => ApiError::NotFound { code: "TOKEN_NOT_FOUND" },
        }
    }
}

impl From<DecisionError> for ApiError {
    fn from(err: DecisionError) -> Self {
        match err {
            DecisionError::PolicyForbidden(code) => ApiError::BadRequest { code, message: err.to_string() },
            DecisionError::AlreadyRecorded(_) => {
                ApiError::Conflict { code: "DECISION_ALREADY_RECORDED", message: err.to_string() }
            }
        }
    }
}

impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::PrevHashMismatch { .. } => {
                ApiError::Conflict { code: "PREV_CHAIN_HASH_MISMATCH", message: err.to_string() }
            }
            ChainError::Canon(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<CanonError> for ApiError {
    fn from(err: CanonError) -> Self {
        ApiError::BadRequest { code: "INVALID_JSON", message: err.to_string() }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InvalidField { field, reason } => {
                ApiError::BadRequest { code: "INVALID_JSON", message: format!("{field}: {reason}") }
            }
            DomainError::EntitlementLimitExceeded { feature, limit, used } => {
                ApiError::EntitlementExceeded { feature, limit, used }
            }
            DomainError::QuotaExceeded { feature, limit, used } => ApiError::QuotaExceeded { feature, limit, used },
        }
    }
}

impl From<settld_core::AppendError> for ApiError {
    fn from(err: settld_core::AppendError) -> Self {
        match err {
            settld_core::AppendError::Chain(e) => e.into(),
            settld_core::AppendError::Storage(e) => ApiError::Internal(e.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    ok: bool,
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "upgradeHint")]
    upgrade_hint: Option<Value>,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, String) {
        match self {
            ApiError::BadRequest { code, .. } => (StatusCode::BAD_REQUEST, code.to_string()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED".to_string()),
            ApiError::Forbidden { code } => (StatusCode::FORBIDDEN, code.to_string()),
            ApiError::EntitlementExceeded { .. } => (StatusCode::FORBIDDEN, "ENTITLEMENT_LIMIT_EXCEEDED".to_string()),
            ApiError::QuotaExceeded { .. } => (StatusCode::TOO_MANY_REQUESTS, "QUOTA_EXCEEDED".to_string()),
            ApiError::NotFound { code } => (StatusCode::NOT_FOUND, code.to_string()),
            ApiError::Revoked => (StatusCode::GONE, "REVOKED".to_string()),
            ApiError::Conflict { code, .. } => (StatusCode::CONFLICT, code.to_string()),
            ApiError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED".to_string()),
            ApiError::Upstream { code, .. } => (StatusCode::BAD_GATEWAY, code.clone()),
            ApiError::WebhookVerificationFailed { code, .. } => (StatusCode::UNAUTHORIZED, code.to_string()),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR".to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let (detail, upgrade_hint) = match &self {
            ApiError::EntitlementExceeded { limit, used, feature } => (
                Some(serde_json::json!({"feature": feature, "limit": limit, "used": used})),
                Some(serde_json::json!({"suggestedPlans": ["builder", "growth", "scale"]})),
            ),
            ApiError::QuotaExceeded { limit, used, feature } => (
                Some(serde_json::json!({"feature": feature, "limit": limit, "used": used})),
                Some(serde_json::json!({"suggestedPlans": ["builder", "growth", "scale"]})),
            ),
            ApiError::RateLimited { retry_after_secs } => (Some(serde_json::json!({"retryAfterSeconds": retry_after_secs})), None),
            _ => (None, None),
        };
        let body = ErrorBody { ok: false, code, message: self.to_string(), detail, upgrade_hint };
        let mut response = (status, Json(body)).into_response();
        if let ApiError::RateLimited { retry_after_secs } = &self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(axum::http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}
