/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! Error types shared across the storage layer and the query engine.

use std::fmt;
use thiserror::Error;

/// A single validation problem with optional context describing where in the
/// submitted query it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    pub error: String,
    pub context: String,
}

/// Accumulates validation problems so that a submitted query can be rejected
/// with every problem reported at once instead of failing on the first one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationError {
    pub problems: Vec<Problem>,
}

impl ValidationError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, error: impl Into<String>, context: impl Into<String>) {
        self.problems.push(Problem {
            error: error.into(),
            context: context.into(),
        });
    }

    /// Merge another error into this one. Validation errors contribute all of
    /// their problems; any other error becomes a single problem.
    pub fn extend(&mut self, other: EngineError) {
        match other {
            EngineError::Validation(v) => self.problems.extend(v.problems),
            other => self.add(other.to_string(), ""),
        }
    }

    pub fn has_problems(&self) -> bool {
        !self.problems.is_empty()
    }

    /// Ok when no problems were collected, the aggregated error otherwise.
    pub fn into_result(self) -> Result<(), EngineError> {
        if self.has_problems() {
            Err(EngineError::Validation(self))
        } else {
            Ok(())
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation failed with {} problems", self.problems.len())?;
        for p in &self.problems {
            if p.context.is_empty() {
                write!(f, "; {}", p.error)?;
            } else {
                write!(f, "; {} ({})", p.error, p.context)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// A submitted query failed validation. Carries every detected problem.
    #[error("{0}")]
    Validation(ValidationError),

    /// A named table or query does not exist.
    #[error("{0}")]
    NotFound(String),

    /// A table with the requested name already exists.
    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    /// A data or catalog file violates its structural format (bad magic,
    /// malformed metadata, out-of-range offsets).
    #[error("{0}")]
    Format(String),

    /// A column block failed to decode (truncated varint, row count mismatch,
    /// decompressor failure).
    #[error("{0}")]
    Codec(String),

    /// An execution-time failure that planning should have precluded, plus
    /// data-dependent failures such as division by zero.
    #[error("{0}")]
    Runtime(String),
}

impl EngineError {
    /// Single-problem validation error.
    pub fn validation(error: impl Into<String>, context: impl Into<String>) -> Self {
        let mut v = ValidationError::new();
        v.add(error, context);
        EngineError::Validation(v)
    }

    /// Structure-preserving copy. `std::io::Error` and `csv::Error` are not
    /// clonable, so those degrade to their rendered message.
    pub fn duplicate(&self) -> EngineError {
        match self {
            EngineError::Validation(v) => EngineError::Validation(v.clone()),
            EngineError::NotFound(s) => EngineError::NotFound(s.clone()),
            EngineError::Conflict(s) => EngineError::Conflict(s.clone()),
            EngineError::Io(e) => {
                EngineError::Io(std::io::Error::new(e.kind(), e.to_string()))
            }
            EngineError::Csv(e) => EngineError::Format(e.to_string()),
            EngineError::Format(s) => EngineError::Format(s.clone()),
            EngineError::Codec(s) => EngineError::Codec(s.clone()),
            EngineError::Runtime(s) => EngineError::Runtime(s.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_accumulates() {
        let mut v = ValidationError::new();
        assert!(!v.has_problems());

        v.add("unknown column x", "columnClauses[0]");
        v.add("limit must be non-negative", "limitClause");
        assert!(v.has_problems());
        assert_eq!(v.problems.len(), 2);

        let rendered = v.to_string();
        assert!(rendered.contains("2 problems"));
        assert!(rendered.contains("unknown column x"));
    }

    #[test]
    fn test_extend_flattens_validation_errors() {
        let mut outer = ValidationError::new();
        outer.add("a", "");

        let mut inner = ValidationError::new();
        inner.add("b", "");
        inner.add("c", "");
        outer.extend(EngineError::Validation(inner));
        outer.extend(EngineError::NotFound("table t does not exist".into()));

        assert_eq!(outer.problems.len(), 4);
    }

    #[test]
    fn test_into_result() {
        assert!(ValidationError::new().into_result().is_ok());

        let mut v = ValidationError::new();
        v.add("bad", "");
        assert!(matches!(
            v.into_result(),
            Err(EngineError::Validation(v)) if v.problems.len() == 1
        ));
    }

    #[test]
    fn test_duplicate_preserves_problems() {
        let e = EngineError::validation("where expression must return boolean", "whereClause");
        match e.duplicate() {
            EngineError::Validation(v) => {
                assert_eq!(v.problems.len(), 1);
                assert_eq!(v.problems[0].context, "whereClause");
            }
            other => panic!("unexpected duplicate: {other:?}"),
        }
    }
}
