//! Parse error taxonomy shared by every detector.
//!
//! All variants are handled inside a carve attempt. Only [`ParseError::Cancelled`]
//! ends an attempt early; everything else discards the current candidate and
//! resynchronizes.

use thiserror::Error;

/// Failure of a single parse step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Read past the end of the input (or of the current unit).
    #[error("read past end of input")]
    Overflow,

    /// Grammar, adjacency or parent violation.
    #[error("structurally invalid: {0}")]
    StructuralInvalid(&'static str),

    /// A field outside its declared legal range that is critical to the unit.
    #[error("field `{field}` out of range: {value}")]
    SemanticInvalid { field: &'static str, value: i64 },

    /// A recognized construct this carver does not implement.
    #[error("unsupported construct: {0}")]
    UnsupportedConstruct(&'static str),

    /// The byte source was cancelled while a read was in progress.
    #[error("input cancelled")]
    Cancelled,
}

impl ParseError {
    /// True when the whole carve attempt must stop, not just the current unit.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ParseError::Cancelled)
    }

    pub(crate) fn semantic(field: &'static str, value: impl Into<i64>) -> Self {
        ParseError::SemanticInvalid {
            field,
            value: value.into(),
        }
    }
}

pub type ParseResult<T> = std::result::Result<T, ParseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_cancellation_is_fatal() {
        assert!(ParseError::Cancelled.is_fatal());
        assert!(!ParseError::Overflow.is_fatal());
        assert!(!ParseError::StructuralInvalid("gap").is_fatal());
        assert!(!ParseError::UnsupportedConstruct("data partition").is_fatal());
        assert!(!ParseError::semantic("slice_type", 12).is_fatal());
    }

    #[test]
    fn semantic_error_renders_field_and_value() {
        let err = ParseError::semantic("first_mb_in_slice", 9000u32);
        assert_eq!(err.to_string(), "field `first_mb_in_slice` out of range: 9000");
    }
}
