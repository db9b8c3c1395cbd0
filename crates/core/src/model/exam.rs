use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::model::ids::SubjectId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExamTypeError {
    #[error("exam type cannot be empty")]
    EmptyName,

    #[error("exam type contains whitespace: {0:?}")]
    InvalidName(String),
}

/// Named testing program that scopes which questions are eligible.
///
/// Names are trimmed and lower-cased, so `"UTME"` and `" utme "` are the same
/// exam type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExamType(String);

impl ExamType {
    /// Create a validated exam type.
    ///
    /// # Errors
    ///
    /// Returns `ExamTypeError::EmptyName` if the name is blank, or
    /// `ExamTypeError::InvalidName` if it contains inner whitespace.
    pub fn new(value: impl Into<String>) -> Result<Self, ExamTypeError> {
        let raw = value.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ExamTypeError::EmptyName);
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(ExamTypeError::InvalidName(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_lowercase()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ExamType {
    type Error = ExamTypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ExamType> for String {
    fn from(value: ExamType) -> Self {
        value.0
    }
}

/// A `(subject, year)` pair chosen by the learner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Selection {
    pub subject_id: SubjectId,
    pub year: u16,
}

impl Selection {
    #[must_use]
    pub fn new(subject_id: SubjectId, year: u16) -> Self {
        Self { subject_id, year }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subject_id, self.year)
    }
}
