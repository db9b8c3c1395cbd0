use std::collections::BTreeMap;

use thiserror::Error;

use crate::model::ExamType;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SettingsError {
    #[error("time budget for {0} must be > 0 seconds")]
    InvalidBudget(String),
}

/// Default time budgets, per exam type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamSettings {
    budgets: BTreeMap<ExamType, u32>,
    fallback_budget_secs: u32,
}

impl ExamSettings {
    /// Budgets for the two standard exam tracks.
    ///
    /// - `utme`: 2 hours
    /// - `wassce`: 3 hours
    /// - anything else: 1 hour
    #[must_use]
    pub fn standard() -> Self {
        let mut budgets = BTreeMap::new();
        if let Ok(utme) = ExamType::new("utme") {
            budgets.insert(utme, 7_200);
        }
        if let Ok(wassce) = ExamType::new("wassce") {
            budgets.insert(wassce, 10_800);
        }
        Self {
            budgets,
            fallback_budget_secs: 3_600,
        }
    }

    /// Creates settings with only a fallback budget.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::InvalidBudget` if the fallback is zero.
    pub fn new(fallback_budget_secs: u32) -> Result<Self, SettingsError> {
        if fallback_budget_secs == 0 {
            return Err(SettingsError::InvalidBudget("fallback".into()));
        }
        Ok(Self {
            budgets: BTreeMap::new(),
            fallback_budget_secs,
        })
    }

    /// Set the default budget for one exam type.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::InvalidBudget` if `secs` is zero.
    pub fn with_budget(mut self, exam_type: ExamType, secs: u32) -> Result<Self, SettingsError> {
        if secs == 0 {
            return Err(SettingsError::InvalidBudget(exam_type.to_string()));
        }
        self.budgets.insert(exam_type, secs);
        Ok(self)
    }

    /// Fresh time budget for a new session of `exam_type`.
    #[must_use]
    pub fn budget_for(&self, exam_type: &ExamType) -> u32 {
        self.budgets
            .get(exam_type)
            .copied()
            .unwrap_or(self.fallback_budget_secs)
    }

    #[must_use]
    pub fn fallback_budget_secs(&self) -> u32 {
        self.fallback_budget_secs
    }
}

impl Default for ExamSettings {
    fn default() -> Self {
        Self::standard()
    }
}
