use std::collections::BTreeMap;
use std::sync::Arc;

use exam_core::model::{ExamRollupRow, HistoryPoint, SubjectId, UserId};
use exam_core::report::{AggregationReporter, Report, TrendGranularity, TrendPoint};
use storage::repository::{AttemptRepository, ScoreRepository, StorageError};

/// Read-side reports over stored scores and answers.
#[derive(Clone)]
pub struct HistoryService {
    scores: Arc<dyn ScoreRepository>,
    attempts: Arc<dyn AttemptRepository>,
}

impl HistoryService {
    #[must_use]
    pub fn new(scores: Arc<dyn ScoreRepository>, attempts: Arc<dyn AttemptRepository>) -> Self {
        Self { scores, attempts }
    }

    async fn points(&self, user_id: &UserId) -> Result<Vec<HistoryPoint>, StorageError> {
        let rows = self.scores.list_scores(user_id).await?;
        Ok(rows
            .iter()
            .map(|row| HistoryPoint::from_summary(row.completed_at.date_naive(), &row.summary))
            .collect())
    }

    /// Mean percentage per period and subject.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if scores cannot be loaded.
    pub async fn trend(
        &self,
        user_id: &UserId,
        granularity: TrendGranularity,
    ) -> Result<Report<Vec<TrendPoint>>, StorageError> {
        let points = self.points(user_id).await?;
        Ok(AggregationReporter::build_trend(&points, granularity))
    }

    /// Mean percentage per subject over all of a user's sessions.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if scores cannot be loaded.
    pub async fn subject_means(
        &self,
        user_id: &UserId,
    ) -> Result<Report<BTreeMap<SubjectId, f64>>, StorageError> {
        let rows = self.scores.list_scores(user_id).await?;
        let summaries: Vec<_> = rows.into_iter().map(|row| row.summary).collect();
        Ok(AggregationReporter::build_subject_means(&summaries))
    }

    /// One row per attempt, recomputed from the stored answers.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if answers cannot be loaded.
    pub async fn exam_rollup(&self, user_id: &UserId) -> Result<Report<Vec<ExamRollupRow>>, StorageError> {
        let records = self.attempts.fetch_answer_history(user_id).await?;
        Ok(AggregationReporter::build_exam_rollup(&records))
    }
}
