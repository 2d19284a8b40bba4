//! Query compilation errors, all citing a byte position in the input.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("unexpected character '{ch}' at position {pos}")]
    BadChar { pos: usize, ch: char },

    #[error("unterminated string starting at position {pos}")]
    UnterminatedString { pos: usize },

    #[error("malformed number '{text}' at position {pos}")]
    BadNumber { pos: usize, text: String },

    #[error("expected {expected} but found {found} at position {pos}")]
    UnexpectedToken {
        pos: usize,
        expected: String,
        found: String,
    },

    #[error("unknown field '{field}' at position {pos}")]
    UnknownField { pos: usize, field: String },

    #[error("operator {op} is not valid for field '{field}' at position {pos}")]
    BadOperator {
        pos: usize,
        field: String,
        op: String,
    },

    #[error("invalid status '{value}' at position {pos}")]
    BadStatus { pos: usize, value: String },

    #[error("invalid issue type '{value}' at position {pos}")]
    BadType { pos: usize, value: String },

    #[error("priority must be between 0 and 4 (got {value}) at position {pos}")]
    BadPriority { pos: usize, value: i64 },

    #[error("invalid value for field '{field}' at position {pos}: {reason}")]
    BadValue {
        pos: usize,
        field: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, QueryError>;

impl QueryError {
    pub fn bad_char(pos: usize, ch: char) -> Self {
        Self::BadChar { pos, ch }
    }

    pub fn unterminated_string(pos: usize) -> Self {
        Self::UnterminatedString { pos }
    }

    pub fn bad_number(pos: usize, text: &str) -> Self {
        Self::BadNumber {
            pos,
            text: text.to_string(),
        }
    }

    /// Byte offset the error points at.
    pub fn position(&self) -> usize {
        match self {
            Self::BadChar { pos, .. }
            | Self::UnterminatedString { pos }
            | Self::BadNumber { pos, .. }
            | Self::UnexpectedToken { pos, .. }
            | Self::UnknownField { pos, .. }
            | Self::BadOperator { pos, .. }
            | Self::BadStatus { pos, .. }
            | Self::BadType { pos, .. }
            | Self::BadPriority { pos, .. }
            | Self::BadValue { pos, .. } => *pos,
        }
    }
}
