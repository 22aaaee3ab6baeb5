//! Runtime-coupling client: writes chained events to the external ops API
//! under an `expected-prev-chain-hash` precondition (spec.md §4.8).
//!
//! The precondition check itself (does the claimed prev-hash match what we
//! last observed) is `settld_spec::chain::ChainState`'s job; this client's
//! only responsibility is shipping the header and reacting to the
//! `409 PREV_CHAIN_HASH_MISMATCH` the ops API returns when another writer
//! raced us, by refreshing local chain state from the response body and
//! letting the caller decide whether to retry.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use settld_spec::chain::ChainState;

use crate::{as_json, client, expected_prev_chain_hash_header};

/// Errors raised while writing a chained event to the ops API.
#[derive(Debug, Error)]
pub enum RuntimeCouplingError {
    /// Underlying HTTP failure.
    #[error(transparent)]
    Transport(#[from] crate::TransportError),
    /// The ops API rejected our claimed prev-hash; `server_head` is what it
    /// actually expects next.
    #[error("prev chain hash mismatch: server expects {server_head:?}")]
    PrevHashMismatch {
        /// The hash (or `None`) the server says is the current head.
        server_head: Option<String>,
    },
    /// Response body wasn't the expected JSON shape.
    #[error("malformed ops-api response: {0}")]
    MalformedResponse(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct ConflictBody {
    #[serde(rename = "expectedPrevChainHash")]
    expected_prev_chain_hash: Option<String>,
}

/// Client for the external ops API's chained-event write endpoint.
pub struct RuntimeCouplingClient {
    base_url: String,
    bearer_token: String,
}

impl RuntimeCouplingClient {
    /// Create a client against `base_url`, authenticating with `bearer_token`.
    pub fn new(base_url: String, bearer_token: String) -> Self {
        Self { base_url, bearer_token }
    }

    /// Write `event` to `path`, claiming `chain`'s current head as the
    /// precondition. On success, advances `chain` to the new head the
    /// server returns. On a `409`, returns
    /// [`RuntimeCouplingError::PrevHashMismatch`] without mutating `chain`,
    /// so the caller can refresh and retry.
    pub async fn write_event(
        &self,
        path: &str,
        chain: &mut ChainState,
        event: &Value,
    ) -> Result<String, RuntimeCouplingError> {
        let url = format!("{}{}", self.base_url, path);
        let response = client()
            .post(&url)
            .bearer_auth(&self.bearer_token)
            .header("content-type", "application/json")
            .header("x-proxy-expected-prev-chain-hash", expected_prev_chain_hash_header(chain))
            .body(as_json(event))
            .send()
            .await
            .map_err(crate::TransportError::Request)?;

        if response.status().as_u16() == 409 {
            let text = response.text().await.unwrap_or_default();
            let body: ConflictBody = serde_json::from_str(&text).unwrap_or(ConflictBody { expected_prev_chain_hash: None });
            return Err(RuntimeCouplingError::PrevHashMismatch { server_head: body.expected_prev_chain_hash });
        }

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        crate::status_or_err(status, text.clone()).await.map_err(RuntimeCouplingError::Transport)?;

        #[derive(Deserialize)]
        struct Accepted {
            #[serde(rename = "newChainHash")]
            new_chain_hash: String,
        }
        let accepted: Accepted = serde_json::from_str(&text)?;
        chain.advance(accepted.new_chain_hash.clone());
        Ok(accepted.new_chain_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_chain_state_renders_null_header() {
        let chain = ChainState::default();
        assert_eq!(expected_prev_chain_hash_header(&chain), "null");
    }
}
