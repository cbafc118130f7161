//! Sessions and session codes.
//!
//! A `Session` is one sitting of a class or meeting during which attendance
//! is collected. Its `SessionCode` is a short fixed-length token the host
//! advertises and rotates; a peer must present the current code during the
//! handshake, so possession of the code stands in for physical proximity.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier of a session.
pub type SessionId = Uuid;

/// Unique identifier of a participant device.
pub type ParticipantId = Uuid;

// ── Session code ──────────────────────────────────────────────────────────────

/// Number of characters in a session code.
pub const CODE_LENGTH: usize = 6;

/// Characters per display group (codes are shown as "AB1-2CD").
pub const CODE_GROUP_LENGTH: usize = 3;

/// Characters a session code may contain.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Errors from parsing a session-code string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodeParseError {
    /// The normalized input is not exactly [`CODE_LENGTH`] characters.
    #[error("session code must be {expected} characters, got {actual}")]
    WrongLength { expected: usize, actual: usize },

    /// The input contains a character outside A–Z / 0–9.
    #[error("session code contains invalid character {0:?}")]
    InvalidCharacter(char),
}

/// A validated session code: exactly [`CODE_LENGTH`] uppercase A–Z / 0–9
/// characters.
///
/// Construction always goes through [`SessionCode::parse`] or
/// [`SessionCode::generate`], so a value of this type is known to be
/// well-formed. Users see codes in grouped form ([`SessionCode::grouped`]);
/// the wire carries the raw characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionCode(String);

impl SessionCode {
    /// Parses a user-entered or received code string.
    ///
    /// Normalizes first: surrounding whitespace, group separators (`-`) and
    /// inner spaces are stripped, letters are uppercased. Manual entry of
    /// "ab1-2cd" therefore parses to the same code as "AB12CD".
    ///
    /// # Errors
    ///
    /// Returns [`CodeParseError`] when the normalized string has the wrong
    /// length or contains characters outside the code alphabet.
    pub fn parse(input: &str) -> Result<Self, CodeParseError> {
        let normalized: String = input
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != ' ')
            .map(|c| c.to_ascii_uppercase())
            .collect();

        // Count characters, not bytes, so multibyte input reports the
        // length the user actually typed.
        let length = normalized.chars().count();
        if length != CODE_LENGTH {
            return Err(CodeParseError::WrongLength {
                expected: CODE_LENGTH,
                actual: length,
            });
        }
        if let Some(bad) = normalized
            .chars()
            .find(|c| !c.is_ascii_uppercase() && !c.is_ascii_digit())
        {
            return Err(CodeParseError::InvalidCharacter(bad));
        }
        Ok(SessionCode(normalized))
    }

    /// Generates a fresh random code from the code alphabet.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let code: String = (0..CODE_LENGTH)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        SessionCode(code)
    }

    /// The raw code characters, e.g. `"AB12CD"`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The code in display grouping, e.g. `"AB1-2CD"`.
    pub fn grouped(&self) -> String {
        self.0
            .as_bytes()
            .chunks(CODE_GROUP_LENGTH)
            .map(|chunk| std::str::from_utf8(chunk).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("-")
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionCode {
    type Error = CodeParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        SessionCode::parse(&value)
    }
}

impl From<SessionCode> for String {
    fn from(code: SessionCode) -> String {
        code.0
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Accepting check-ins; its current code validates.
    Active,
    /// Finished. Immutable; its codes are rejected everywhere.
    Ended,
}

/// One sitting during which attendance is collected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Unique id of this session.
    pub id: SessionId,
    /// The code currently proving proximity to this session's host.
    pub code: SessionCode,
    /// Reference to the owning class/course/meeting, opaque to the core.
    pub context_ref: String,
    /// Whether the session is still accepting check-ins.
    pub status: SessionStatus,
    /// Seconds since the Unix epoch when the session started.
    pub started_at_secs: u64,
}

impl Session {
    /// Creates a new Active session with a fresh id.
    pub fn new(code: SessionCode, context_ref: impl Into<String>, started_at_secs: u64) -> Self {
        Session {
            id: Uuid::new_v4(),
            code,
            context_ref: context_ref.into(),
            status: SessionStatus::Active,
            started_at_secs,
        }
    }

    /// Returns `true` while the session accepts check-ins.
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
