use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::ids::{SessionId, SubjectId};

/// Half-up rounded percentage of `correct` out of `total`.
///
/// Returns `None` when `total` is zero so callers never divide by zero.
#[must_use]
pub fn percentage(correct: u32, total: u32) -> Option<u8> {
    if total == 0 {
        return None;
    }
    let correct = u64::from(correct.min(total));
    let total = u64::from(total);
    // round(c / t * 100) half-up == floor((200c + t) / 2t)
    let pct = (correct * 200 + total) / (2 * total);
    u8::try_from(pct).ok()
}

/// Per-subject result of scoring one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub session_id: SessionId,
    pub subject_id: SubjectId,
    pub subject: String,
    pub total_questions: u32,
    pub correct_count: u32,
    pub percentage: u8,
}

impl ScoreSummary {
    /// Build a summary, computing the percentage.
    ///
    /// Returns `None` if `total_questions` is zero or `correct_count` exceeds it.
    #[must_use]
    pub fn new(
        session_id: SessionId,
        subject_id: SubjectId,
        subject: impl Into<String>,
        total_questions: u32,
        correct_count: u32,
    ) -> Option<Self> {
        if correct_count > total_questions {
            return None;
        }
        let percentage = percentage(correct_count, total_questions)?;
        Some(Self {
            session_id,
            subject_id,
            subject: subject.into(),
            total_questions,
            correct_count,
            percentage,
        })
    }

    /// Checks the internal consistency of a summary read back from history.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.total_questions > 0
            && self.correct_count <= self.total_questions
            && percentage(self.correct_count, self.total_questions) == Some(self.percentage)
    }
}

/// Whole-session score derived from per-subject summaries; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverallScore {
    pub total_questions: u32,
    pub correct_count: u32,
    pub percentage: u8,
}

impl OverallScore {
    /// Weighted combination of subject summaries (weights are question counts).
    #[must_use]
    pub fn from_summaries(summaries: &[ScoreSummary]) -> Option<Self> {
        let total = summaries
            .iter()
            .fold(0_u32, |acc, s| acc.saturating_add(s.total_questions));
        let correct = summaries
            .iter()
            .fold(0_u32, |acc, s| acc.saturating_add(s.correct_count));
        let percentage = percentage(correct, total)?;
        Some(Self {
            total_questions: total,
            correct_count: correct,
            percentage,
        })
    }
}

/// A single subject result on a given day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPoint {
    date: NaiveDate,
    subject_id: SubjectId,
    percentage: u8,
}

impl HistoryPoint {
    #[must_use]
    pub fn new(date: NaiveDate, subject_id: SubjectId, percentage: u8) -> Self {
        Self {
            date,
            subject_id,
            percentage,
        }
    }

    #[must_use]
    pub fn from_summary(date: NaiveDate, summary: &ScoreSummary) -> Self {
        Self::new(date, summary.subject_id, summary.percentage)
    }

    #[must_use]
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    #[must_use]
    pub fn subject_id(&self) -> SubjectId {
        self.subject_id
    }

    #[must_use]
    pub fn percentage(&self) -> u8 {
        self.percentage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_rounds_half_up() {
        assert_eq!(percentage(6, 10), Some(60));
        assert_eq!(percentage(8, 12), Some(67));
        assert_eq!(percentage(1, 8), Some(13)); // 12.5
        assert_eq!(percentage(1, 3), Some(33));
        assert_eq!(percentage(0, 5), Some(0));
        assert_eq!(percentage(5, 5), Some(100));
    }

    #[test]
    fn percentage_is_undefined_without_questions() {
        assert_eq!(percentage(0, 0), None);
        assert!(ScoreSummary::new(SessionId::new(1), SubjectId::new(1), "Maths", 0, 0).is_none());
    }

    #[test]
    fn overall_score_weights_by_question_count() {
        let maths =
            ScoreSummary::new(SessionId::new(1), SubjectId::new(1), "Maths", 10, 6).unwrap();
        let english =
            ScoreSummary::new(SessionId::new(1), SubjectId::new(2), "English", 2, 2).unwrap();

        let overall = OverallScore::from_summaries(&[maths, english]).unwrap();
        assert_eq!(overall.total_questions, 12);
        assert_eq!(overall.correct_count, 8);
        assert_eq!(overall.percentage, 67);
        assert!(OverallScore::from_summaries(&[]).is_none());
    }

    #[test]
    fn consistency_check_flags_tampered_percentage() {
        let mut summary =
            ScoreSummary::new(SessionId::new(1), SubjectId::new(1), "Maths", 4, 3).unwrap();
        assert!(summary.is_consistent());
        summary.percentage = 80;
        assert!(!summary.is_consistent());
    }
}
