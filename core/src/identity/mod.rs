// Identity tokens: self-asserted addressing keys
//
// Clients generate their own identity and announce it on registration. Nothing
// proves ownership; the coordinator only checks that the token is well formed
// before it is allowed anywhere near the registry or the pairing tables.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;

/// Hard upper bound applied when decoding tokens off the wire.
///
/// The coordinator may enforce a tighter bound at registration time.
pub const MAX_IDENTITY_LEN: usize = 128;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Identity is empty")]
    Empty,
    #[error("Identity exceeds {max} characters")]
    TooLong { max: usize },
    #[error("Identity contains invalid character {0:?}")]
    InvalidCharacter(char),
}

/// A validated identity token.
///
/// Accepted characters are ASCII alphanumerics plus `-`, `_`, `.` and `:`,
/// which covers both the numeric ids and the `USER-XXXXXXXXX` style ids
/// clients generate. Surrounding whitespace is trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Parse a token using the wire bound [`MAX_IDENTITY_LEN`]
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, IdentityError> {
        Self::parse_bounded(raw, MAX_IDENTITY_LEN)
    }

    /// Parse a token, rejecting anything longer than `max_len` characters
    pub fn parse_bounded(raw: impl AsRef<str>, max_len: usize) -> Result<Self, IdentityError> {
        let token = raw.as_ref().trim();

        if token.is_empty() {
            return Err(IdentityError::Empty);
        }
        if token.chars().count() > max_len {
            return Err(IdentityError::TooLong { max: max_len });
        }
        if let Some(bad) = token.chars().find(|c| !is_token_char(*c)) {
            return Err(IdentityError::InvalidCharacter(bad));
        }

        Ok(Self(token.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in characters (tokens are ASCII, so this equals the byte length)
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Clients send identities either as JSON strings or as bare numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawIdentity {
    Text(String),
    Number(u64),
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = match RawIdentity::deserialize(deserializer)? {
            RawIdentity::Text(text) => text,
            RawIdentity::Number(number) => number.to_string(),
        };
        Identity::parse(raw).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// TESTS
// ============================================================================
