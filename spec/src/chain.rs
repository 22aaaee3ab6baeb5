//! Hash-chained event/audit-row validation.
//!
//! Grounded in `ledger_spec::{ChannelState, validate_envelope}`: a chain is a
//! sequence of rows each carrying the hash of its predecessor, and the
//! validator's only job is to confirm the claimed predecessor matches the
//! last observed hash before accepting the next row. Here it backs two
//! distinct uses described in spec.md: the runtime-coupling client's
//! `expected-prev-chain-hash` precondition against the external ops API
//! (§4.8), and this workspace's own tenant audit log, which chains its rows
//! the same way so a security-controls packet can prove it wasn't edited
//! after the fact (SPEC_FULL.md §3.1).

use serde_json::Value;
use thiserror::Error;

use crate::canon::{canonical_json, sha256_hex, CanonError};

/// Errors raised while validating or extending a hash chain.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    /// The claimed previous-hash did not match the chain's last observed hash.
    #[error("PREV_CHAIN_HASH_MISMATCH")]
    PrevHashMismatch {
        /// Hash the chain actually expects next.
        expected: Option<String>,
        /// Hash the caller supplied.
        got: Option<String>,
    },
    /// Failed to canonicalize the row being appended.
    #[error(transparent)]
    Canon(#[from] CanonError),
}

/// A single link appended to a chain: canonical content plus a claimed
/// previous-hash precondition.
pub trait ChainLink {
    /// Canonical JSON body of this link (excluding any chain metadata).
    fn body(&self) -> &Value;
}

/// Running state of a hash chain: the hash of the last accepted link, or
/// `None` before the first link.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainState {
    /// Hash of the most recently accepted link, hex-encoded.
    pub head: Option<String>,
}

impl ChainState {
    /// Render the head as the literal the wire protocol expects in the
    /// `x-proxy-expected-prev-chain-hash` header: the hex hash, or the
    /// literal string `"null"` before any link has been accepted.
    pub fn head_header_value(&self) -> String {
        self.head.clone().unwrap_or_else(|| "null".to_string())
    }

    /// Validate a claimed previous-hash against the current head and, if it
    /// matches, compute and return the new head after accepting `link`.
    pub fn try_append<L: ChainLink>(
        &self,
        claimed_prev: Option<&str>,
        link: &L,
    ) -> Result<String, ChainError> {
        let matches = match (&self.head, claimed_prev) {
            (None, None) => true,
            (Some(h), Some(c)) => h == c,
            _ => false,
        };
        if !matches {
            return Err(ChainError::PrevHashMismatch {
                expected: self.head.clone(),
                got: claimed_prev.map(str::to_string),
            });
        }
        let bytes = canonical_json(link.body())?;
        let mut domain = format!("{}.", self.head_header_value());
        domain.push_str(&String::from_utf8_lossy(&bytes));
        Ok(sha256_hex(domain.as_bytes()))
    }

    /// Advance the head after a link has been accepted.
    pub fn advance(&mut self, new_head: String) {
        self.head = Some(new_head);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Row(Value);
    impl ChainLink for Row {
        fn body(&self) -> &Value {
            &self.0
        }
    }

    #[test]
    fn first_link_requires_null_prev() {
        let state = ChainState::default();
        assert_eq!(state.head_header_value(), "null");
        let row = Row(json!({"event": "A"}));
        let head = state.try_append(None, &row).unwrap();
        assert_eq!(head.len(), 64);
    }

    #[test]
    fn mismatched_prev_is_rejected() {
        let mut state = ChainState::default();
        let row = Row(json!({"event": "A"}));
        let head = state.try_append(None, &row).unwrap();
        state.advance(head.clone());

        let row2 = Row(json!({"event": "B"}));
        let err = state.try_append(Some("deadbeef"), &row2).unwrap_err();
        assert_eq!(
            err,
            ChainError::PrevHashMismatch {
                expected: Some(head),
                got: Some("deadbeef".to_string())
            }
        );
    }

    #[test]
    fn chain_advances_deterministically() {
        let mut state = ChainState::default();
        let row = Row(json!({"event": "A"}));
        let head1 = state.try_append(None, &row).unwrap();
        state.advance(head1.clone());

        let mut replay = ChainState::default();
        let head1_replay = replay.try_append(None, &row).unwrap();
        assert_eq!(head1, head1_replay);
    }
}
