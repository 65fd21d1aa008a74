//! Session identifiers
//!
//! A session scopes the client cache and the accumulated assembly references
//! of one UI attachment. The host supplies the identifier; the installer never
//! invents one.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Longest accepted session identifier
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Errors raised when validating a session identifier
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Empty identifier
    #[error("Session id must not be empty")]
    Empty,

    /// Identifier longer than [`MAX_SESSION_ID_LEN`]
    #[error("Session id is too long ({0} chars, max {MAX_SESSION_ID_LEN})")]
    TooLong(usize),

    /// Identifier contains a character outside `[A-Za-z0-9_-]`
    #[error("Session id contains invalid character {0:?}")]
    InvalidChar(char),
}

/// Identifier of an install session
///
/// Only ASCII alphanumerics, `-` and `_` are allowed since the on-disk cache
/// uses the identifier as a directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Validate and wrap a host-supplied identifier
    pub fn new(id: impl Into<String>) -> Result<Self, SessionError> {
        let id = id.into();

        if id.is_empty() {
            return Err(SessionError::Empty);
        }

        if id.len() > MAX_SESSION_ID_LEN {
            return Err(SessionError::TooLong(id.len()));
        }

        if let Some(c) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(SessionError::InvalidChar(c));
        }

        Ok(Self(id))
    }

    /// Generate a random identifier
    ///
    /// For hosts without an attachment lifecycle of their own (the CLI).
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::thread_rng().gen();
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = SessionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl std::str::FromStr for SessionId {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
