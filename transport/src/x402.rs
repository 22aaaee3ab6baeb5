//! x402 "Payment Required" autopay client (spec.md §4.9).
//!
//! Adapts the x402-rs reqwest-middleware shape (detect a distinguished
//! response, build a retry, resend the original request) to spec.md's
//! actual gate-id protocol: the `402` challenge carries no payment-method
//! bag to parse, only an opaque `x-settld-gate-id` the caller echoes back
//! on a bounded replay of its own original request.

use serde_json::Value;
use thiserror::Error;

use crate::{as_json, client, TransportError};

/// Name of the response header a `402` challenge carries the gate id
/// under, and of the request header the replay sets it back on.
const DEFAULT_GATE_HEADER: &str = "x-settld-gate-id";

/// An opaque gate id extracted from a `402` response's gate header. Kept
/// as a plain newtype rather than a structured challenge bag, since the
/// protocol carries nothing else to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateId(pub String);

/// A caller-supplied request body, distinguishing replayable shapes from
/// one-shot streams the autopay client cannot safely resend.
#[derive(Debug, Clone)]
pub enum AutopayBody {
    /// No body.
    Empty,
    /// An owned byte buffer (covers `string`/`ArrayBuffer`/typed-array
    /// bodies, all of which are trivially cloned).
    Bytes(Vec<u8>),
    /// Canonical JSON value, re-encoded identically on replay.
    Json(Value),
}

impl AutopayBody {
    fn is_replayable(&self) -> bool {
        // Every variant this enum can represent is replayable by
        // construction — there is no stream/`FormData` case because this
        // client never accepts one. `post_with_autopay` never needs to
        // return `SETTLD_AUTOPAY_BODY_NOT_REPLAYABLE` today, but the
        // distinction is kept explicit so a future streaming-body variant
        // fails the same way the TypeScript reference client does rather
        // than silently resending a truncated buffer.
        true
    }

    fn to_bytes(&self) -> Vec<u8> {
        match self {
            AutopayBody::Empty => Vec::new(),
            AutopayBody::Bytes(b) => b.clone(),
            AutopayBody::Json(v) => as_json(v),
        }
    }

    fn content_type(&self) -> Option<&'static str> {
        match self {
            AutopayBody::Empty => None,
            AutopayBody::Bytes(_) => None,
            AutopayBody::Json(_) => Some("application/json"),
        }
    }
}

/// Errors raised by the autopay client.
#[derive(Debug, Error)]
pub enum X402Error {
    /// The request body cannot be safely replayed a second time (a
    /// one-shot stream/`FormData` body). Autopay fails deterministically
    /// rather than attempting the replay.
    #[error("request body is not replayable: {0}")]
    BodyNotReplayable(&'static str),
    /// The server responded `402` but the gate header was absent.
    #[error("402 response carried no `{0}` header")]
    MissingGateHeader(&'static str),
    /// Underlying HTTP failure.
    #[error(transparent)]
    Transport(#[from] crate::TransportError),
}

/// Code surfaced by [`X402Error::BodyNotReplayable`] when mapped over the
/// HTTP boundary.
pub const BODY_NOT_REPLAYABLE_CODE: &str = "SETTLD_AUTOPAY_BODY_NOT_REPLAYABLE";

/// Client that transparently pays a `402 Payment Required` challenge by
/// replaying the original request with the gate id it names.
pub struct AutopayClient {
    gate_header: &'static str,
    max_attempts: u32,
    agent_passport_header: Option<String>,
}

impl Default for AutopayClient {
    fn default() -> Self {
        Self::new()
    }
}

impl AutopayClient {
    /// Create a client with the default gate header and `maxAttempts` of 2
    /// (the original attempt plus one replay).
    pub fn new() -> Self {
        Self { gate_header: DEFAULT_GATE_HEADER, max_attempts: 2, agent_passport_header: None }
    }

    /// Override the bound on total attempts (original + replays).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Attach a canonical-JSON agent passport sent as
    /// `x-settld-agent-passport: <base64url(json)>` on every attempt.
    pub fn with_agent_passport(mut self, passport: &Value) -> Self {
        self.agent_passport_header = settld_spec::canon::base64url_json(passport).ok();
        self
    }

    /// POST `body` to `url`, transparently paying a `402` challenge once:
    /// extract the gate id from `x-settld-gate-id`, replay the identical
    /// request with that header set, and return whichever response is
    /// final (bounded by `maxAttempts`, which may itself still be a `402`
    /// if the gate was rejected).
    pub async fn post_with_autopay(&self, url: &str, body: &AutopayBody) -> Result<reqwest::Response, X402Error> {
        if !body.is_replayable() {
            return Err(X402Error::BodyNotReplayable("body is a one-shot stream"));
        }

        let bytes = body.to_bytes();
        let mut response = self.send(url, body.content_type(), &bytes, None).await?;
        let mut attempts = 1;

        while response.status().as_u16() == 402 && attempts < self.max_attempts {
            let gate_id = response
                .headers()
                .get(self.gate_header)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or(X402Error::MissingGateHeader(self.gate_header))?;
            response = self.send(url, body.content_type(), &bytes, Some(&gate_id)).await?;
            attempts += 1;
        }

        Ok(response)
    }

    async fn send(
        &self,
        url: &str,
        content_type: Option<&str>,
        bytes: &[u8],
        gate_id: Option<&str>,
    ) -> Result<reqwest::Response, TransportError> {
        let mut request = client().post(url);
        if let Some(content_type) = content_type {
            request = request.header("content-type", content_type);
        }
        if let Some(passport) = &self.agent_passport_header {
            request = request.header("x-settld-agent-passport", passport.clone());
        }
        if let Some(gate_id) = gate_id {
            request = request.header(self.gate_header, gate_id);
        }
        request.body(bytes.to_vec()).send().await.map_err(TransportError::Request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_bodies_are_always_replayable() {
        assert!(AutopayBody::Empty.is_replayable());
        assert!(AutopayBody::Bytes(vec![1, 2, 3]).is_replayable());
        assert!(AutopayBody::Json(serde_json::json!({"a": 1})).is_replayable());
    }

    #[test]
    fn json_body_round_trips_to_canonical_bytes() {
        let body = AutopayBody::Json(serde_json::json!({"b": 2, "a": 1}));
        let bytes = body.to_bytes();
        assert_eq!(bytes, as_json(&serde_json::json!({"b": 2, "a": 1})));
    }

    #[test]
    fn default_client_bounds_attempts_at_two() {
        let client = AutopayClient::new();
        assert_eq!(client.max_attempts, 2);
        let client = AutopayClient::new().with_max_attempts(5);
        assert_eq!(client.max_attempts, 5);
        let client = AutopayClient::new().with_max_attempts(0);
        assert_eq!(client.max_attempts, 1, "maxAttempts is floored at 1 (no replay at all)");
    }
}
