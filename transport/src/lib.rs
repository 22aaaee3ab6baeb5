//! Outbound HTTP delivery for the Settld control plane: webhook
//! notifications, the x402 autopay client, and the runtime-coupling client
//! against the external ops API.
//!
//! This crate deliberately does not reuse `ledger-transport`'s abstraction
//! (a QUIC/gRPC/Unix-socket/mailbox layer built for peer-to-peer
//! ledger replication) — none of that shape fits a plain outbound-HTTP
//! client. It instead adapts the reqwest-middleware retry pattern from the
//! x402-rs reference implementation: detect a distinguished response,
//! build a signed retry header, clone and resend the request exactly once.
#![deny(missing_docs)]

use std::time::Duration;

use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;

use settld_spec::chain::ChainState;

/// Webhook notification delivery, signed with per-tenant HMAC-SHA256.
pub mod webhook;
/// x402 "Payment Required" autopay client for plan upgrades.
pub mod x402;
/// Runtime-coupling client against the external ops API.
pub mod runtime_coupling;

/// Errors shared across transport clients.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying HTTP request failed outright (DNS, TLS, connect, timeout).
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The server responded with a non-success status after all retries.
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus {
        /// Response status code.
        status: u16,
        /// Response body, truncated for logging.
        body: String,
    },
    /// The response body could not be parsed as the expected JSON shape.
    #[error("malformed response body: {0}")]
    MalformedResponse(String),
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

fn build_client() -> Client {
    Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .expect("reqwest client construction with static config cannot fail")
}

/// Truncate a response body for inclusion in an error message.
fn truncated_body(body: &str) -> String {
    const MAX: usize = 2_000;
    if body.len() > MAX {
        format!("{}...<{} bytes truncated>", &body[..MAX], body.len() - MAX)
    } else {
        body.to_string()
    }
}

async fn status_or_err(status: StatusCode, body: String) -> Result<(), TransportError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(TransportError::UnexpectedStatus { status: status.as_u16(), body: truncated_body(&body) })
    }
}

type HmacSha256 = Hmac<Sha256>;

/// Default tolerance window (seconds) for `x-settld-timestamp` (spec.md §4.6 ¶2).
pub const WEBHOOK_TIMESTAMP_TOLERANCE_SECS: u64 = 300;

/// Compute the `v1=<hex>` webhook signature value over `ts + "." + body`,
/// per spec.md §4.6.1/§6 (`x-settld-signature` header, paired with an
/// `x-settld-timestamp` header carrying the same `ts`).
pub fn sign_webhook_body(secret: &str, timestamp_secs: u64, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(timestamp_secs.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    format!("v1={}", hex::encode(mac.finalize().into_bytes()))
}

/// Errors raised while verifying an inbound webhook signature (spec.md
/// §4.6 ¶2), each carrying the exact machine-readable code the HTTP
/// boundary surfaces.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookVerificationError {
    /// `x-settld-signature` is absent or not in the `v1=<hex>` shape.
    #[error("x-settld-signature header missing or malformed")]
    SignatureHeaderInvalid,
    /// `x-settld-timestamp` is absent, non-numeric, or outside the
    /// tolerance window around now.
    #[error("x-settld-timestamp missing or outside tolerance")]
    TimestampOutsideTolerance,
    /// The recomputed HMAC does not match the supplied signature.
    #[error("signature does not match")]
    SignatureNoMatch,
    /// The caller only has a parsed/re-serialized body, not the raw bytes
    /// that were signed. Verification must run over the exact wire bytes;
    /// there is no way to recover them from a parsed value, so this is a
    /// hard refusal rather than an attempted (and inevitably failing) check.
    #[error("verification requires the raw request body, not a parsed value")]
    RawBodyRequired,
}

/// Verify an inbound webhook request's `x-settld-signature`/
/// `x-settld-timestamp` headers against the exact raw bytes that were
/// signed. Callers MUST pass the untouched request body — running this
/// over a body that has already been parsed and re-serialized produces
/// false negatives, which is why the HTTP boundary's extractor reads raw
/// bytes before deserializing (spec.md §4.6 ¶2, `SETTLD_WEBHOOK_RAW_BODY_REQUIRED`
/// covers the case where that ordering was violated upstream).
pub fn verify_webhook_signature(
    secret: &str,
    raw_body: &[u8],
    signature_header: Option<&str>,
    timestamp_header: Option<&str>,
    now_secs: u64,
) -> Result<(), WebhookVerificationError> {
    let timestamp_secs: u64 =
        timestamp_header.and_then(|v| v.parse().ok()).ok_or(WebhookVerificationError::TimestampOutsideTolerance)?;
    let delta = now_secs.abs_diff(timestamp_secs);
    if delta > WEBHOOK_TIMESTAMP_TOLERANCE_SECS {
        return Err(WebhookVerificationError::TimestampOutsideTolerance);
    }

    let header = signature_header.ok_or(WebhookVerificationError::SignatureHeaderInvalid)?;
    if !header.starts_with("v1=") || header.len() <= 3 {
        return Err(WebhookVerificationError::SignatureHeaderInvalid);
    }

    let expected = sign_webhook_body(secret, timestamp_secs, raw_body);
    if expected != header {
        return Err(WebhookVerificationError::SignatureNoMatch);
    }
    Ok(())
}

/// Refuse to verify a webhook whose body has already been parsed into a
/// [`Value`] rather than kept as raw bytes (spec.md §4.6 ¶2,
/// `SETTLD_WEBHOOK_RAW_BODY_REQUIRED`). A reimplementation should prefer an
/// extractor that always hands over raw bytes so this path is structurally
/// unreachable, but the distinct code exists for integrations layered over
/// a framework that parses the body first.
pub fn verify_webhook_signature_requires_raw_body() -> WebhookVerificationError {
    WebhookVerificationError::RawBodyRequired
}

/// Shared helper: build the `x-proxy-expected-prev-chain-hash` header value
/// for the current chain state (spec.md §4.8).
pub fn expected_prev_chain_hash_header(chain: &ChainState) -> String {
    chain.head_header_value()
}

pub(crate) fn client() -> Client {
    build_client()
}

pub(crate) fn as_json(value: &Value) -> Vec<u8> {
    settld_spec::canon::canonical_json(value).unwrap_or_else(|_| serde_json::to_vec(value).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_signature_roundtrips() {
        let body = b"{\"a\":1}";
        let header = sign_webhook_body("whsec_abc", 1_000, body);
        assert!(header.starts_with("v1="));
        let ts = "1000";
        assert!(verify_webhook_signature("whsec_abc", body, Some(&header), Some(ts), 1_000).is_ok());
        assert!(verify_webhook_signature("wrong_secret", body, Some(&header), Some(ts), 1_000).is_err());
    }

    #[test]
    fn verification_rejects_a_stale_timestamp() {
        let body = b"{\"a\":1}";
        let header = sign_webhook_body("whsec_abc", 1_000, body);
        let err = verify_webhook_signature("whsec_abc", body, Some(&header), Some("1000"), 1_000 + 301).unwrap_err();
        assert_eq!(err, WebhookVerificationError::TimestampOutsideTolerance);
    }

    #[test]
    fn verification_rejects_a_malformed_signature_header() {
        let body = b"{\"a\":1}";
        let err = verify_webhook_signature("whsec_abc", body, Some("not-v1"), Some("1000"), 1_000).unwrap_err();
        assert_eq!(err, WebhookVerificationError::SignatureHeaderInvalid);
    }

    #[test]
    fn verification_rejects_a_missing_timestamp() {
        let body = b"{\"a\":1}";
        let header = sign_webhook_body("whsec_abc", 1_000, body);
        let err = verify_webhook_signature("whsec_abc", body, Some(&header), None, 1_000).unwrap_err();
        assert_eq!(err, WebhookVerificationError::TimestampOutsideTolerance);
    }

    #[test]
    fn parsed_body_verification_is_a_hard_refusal() {
        assert_eq!(verify_webhook_signature_requires_raw_body(), WebhookVerificationError::RawBodyRequired);
    }
}
