use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::model::exam::ExamType;
use crate::model::ids::{AttemptId, QuestionId, SubjectId};

/// One historical answer row with the question metadata embedded.
///
/// Correctness is always recomputed from `selected_option` and
/// `correct_option`; stores never hand back a precomputed flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryAnswer {
    pub attempt_id: AttemptId,
    pub question_id: QuestionId,
    pub subject_id: SubjectId,
    pub subject: String,
    pub year: u16,
    pub exam_type: ExamType,
    pub selected_option: Option<usize>,
    pub correct_option: usize,
    pub option_count: usize,
    pub attempt_started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
}

/// One summarized row per historical attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamRollupRow {
    pub attempt_id: AttemptId,
    pub date: NaiveDate,
    pub exam_type: ExamType,
    pub distinct_subject_count: usize,
    pub total_questions: u32,
    pub correct_answers: u32,
    pub percentage: u8,
}
