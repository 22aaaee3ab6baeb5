//! Opaque token shapes issued by the control plane: magic link tokens and
//! vendor ingest keys.

use rand_core::{OsRng, RngCore};
use std::fmt;
use thiserror::Error;

/// Errors raised while parsing or validating a token.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    /// The string did not match the expected `ml_<48-hex>` shape.
    #[error("malformed magic link token")]
    MalformedMagicLink,
    /// The string did not match the expected `igk_<hex>` shape.
    #[error("malformed ingest key")]
    MalformedIngestKey,
}

/// A magic link token: `ml_` followed by 48 lowercase hex characters (192
/// bits of CSPRNG output), per spec.md §4.3.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MagicLinkToken(String);

const MAGIC_LINK_PREFIX: &str = "ml_";
const MAGIC_LINK_HEX_LEN: usize = 48;

impl MagicLinkToken {
    /// Issue a fresh token from the OS CSPRNG.
    pub fn issue() -> Self {
        let mut bytes = [0u8; 24]; // 192 bits
        OsRng.fill_bytes(&mut bytes);
        Self(format!("{MAGIC_LINK_PREFIX}{}", hex::encode(bytes)))
    }

    /// Parse and validate an existing token string.
    pub fn parse(raw: &str) -> Result<Self, TokenError> {
        let hex_part = raw
            .strip_prefix(MAGIC_LINK_PREFIX)
            .ok_or(TokenError::MalformedMagicLink)?;
        if hex_part.len() != MAGIC_LINK_HEX_LEN
            || !hex_part.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
        {
            return Err(TokenError::MalformedMagicLink);
        }
        Ok(Self(raw.to_string()))
    }

    /// Borrow the token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MagicLinkToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A vendor ingest key: `igk_` followed by hex CSPRNG output, presented as a
/// bearer token against `POST /v1/ingest/:tenantId`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestKey(String);

const INGEST_KEY_PREFIX: &str = "igk_";

impl IngestKey {
    /// Issue a fresh ingest key.
    pub fn issue() -> Self {
        let mut bytes = [0u8; 24];
        OsRng.fill_bytes(&mut bytes);
        Self(format!("{INGEST_KEY_PREFIX}{}", hex::encode(bytes)))
    }

    /// Parse and validate an existing ingest key string.
    pub fn parse(raw: &str) -> Result<Self, TokenError> {
        let hex_part = raw
            .strip_prefix(INGEST_KEY_PREFIX)
            .ok_or(TokenError::MalformedIngestKey)?;
        if hex_part.is_empty() || !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(TokenError::MalformedIngestKey);
        }
        Ok(Self(raw.to_string()))
    }

    /// Borrow the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IngestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_tokens_round_trip_through_parse() {
        let token = MagicLinkToken::issue();
        let parsed = MagicLinkToken::parse(token.as_str()).unwrap();
        assert_eq!(token, parsed);
    }

    #[test]
    fn token_shape_matches_spec() {
        let token = MagicLinkToken::issue();
        let s = token.as_str();
        assert!(s.starts_with("ml_"));
        assert_eq!(s.len(), 3 + 48);
        assert!(s[3..].bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn rejects_wrong_prefix() {
        assert_eq!(
            MagicLinkToken::parse("xx_deadbeef"),
            Err(TokenError::MalformedMagicLink)
        );
    }

    #[test]
    fn rejects_uppercase_hex() {
        let bad = format!("ml_{}", "A".repeat(48));
        assert_eq!(MagicLinkToken::parse(&bad), Err(TokenError::MalformedMagicLink));
    }

    #[test]
    fn ingest_keys_round_trip() {
        let key = IngestKey::issue();
        let parsed = IngestKey::parse(key.as_str()).unwrap();
        assert_eq!(key, parsed);
    }
}
