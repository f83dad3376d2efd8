use std::fmt;

use crate::error::PersistenceError;

// ============================================================================
// Global Position - Opaque Feed Cursor
// ============================================================================
//
// A position is either the start-of-feed sentinel or a value only the
// backend type that produced it can parse. Positions round-trip through
// their string form: parse(format(p)) == p, sentinel included.
//
// ============================================================================

/// Resumption token for the globally-ordered all-events feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GlobalPosition(Option<String>);

impl GlobalPosition {
    /// The start-of-feed sentinel.
    pub const fn start() -> Self {
        Self(None)
    }

    /// Rebuild a position from its string form. The empty string is the
    /// start sentinel; anything else is kept verbatim for the owning
    /// backend to interpret.
    pub fn from_value(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.is_empty() {
            Self(None)
        } else {
            Self(Some(value))
        }
    }

    pub fn is_start(&self) -> bool {
        self.0.is_none()
    }

    pub fn value(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// Interpret this cursor in the single-integer family used by the
    /// sequence-numbered backends. The sentinel maps to `start_value`.
    pub(crate) fn to_sequence(&self, start_value: u64) -> Result<u64, PersistenceError> {
        match &self.0 {
            None => Ok(start_value),
            Some(value) => value.parse::<u64>().map_err(|e| PersistenceError::MalformedPosition {
                value: value.clone(),
                reason: format!("expected a non-negative integer: {e}"),
            }),
        }
    }
}

impl Default for GlobalPosition {
    fn default() -> Self {
        Self::start()
    }
}

impl fmt::Display for GlobalPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value().unwrap_or(""))
    }
}

impl From<u64> for GlobalPosition {
    fn from(sequence: u64) -> Self {
        Self(Some(sequence.to_string()))
    }
}
