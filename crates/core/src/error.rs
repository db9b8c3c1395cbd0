use thiserror::Error;

use crate::model::{AssemblyError, ExamTypeError, QuestionError, UserIdError};
use crate::scoring::ScoringError;
use crate::settings::SettingsError;
use crate::tracker::TrackerError;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Question(#[from] QuestionError),
    #[error(transparent)]
    ExamType(#[from] ExamTypeError),
    #[error(transparent)]
    UserId(#[from] UserIdError),
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Scoring(#[from] ScoringError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
}
