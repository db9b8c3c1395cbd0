use chrono::{DateTime, Utc};
use exam_core::model::{ScoreSummary, SessionId, UserId};

use super::SqliteRepository;
use super::mapping::{conn, id_i64, map_score_row, usize_i64};
use crate::repository::{ScoreRepository, ScoreRow, StorageError};

#[async_trait::async_trait]
impl ScoreRepository for SqliteRepository {
    async fn save_scores(
        &self,
        user_id: &UserId,
        completed_at: DateTime<Utc>,
        summaries: &[ScoreSummary],
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;

        for (position, summary) in summaries.iter().enumerate() {
            sqlx::query(
                r"
                INSERT INTO score_summaries (
                    session_id, subject_id, user_id, subject, position,
                    total_questions, correct_count, percentage, completed_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(session_id, subject_id) DO UPDATE SET
                    subject = excluded.subject,
                    position = excluded.position,
                    total_questions = excluded.total_questions,
                    correct_count = excluded.correct_count,
                    percentage = excluded.percentage,
                    completed_at = excluded.completed_at
                ",
            )
            .bind(id_i64("session_id", summary.session_id.value())?)
            .bind(id_i64("subject_id", summary.subject_id.value())?)
            .bind(user_id.as_str())
            .bind(summary.subject.as_str())
            .bind(usize_i64("position", position)?)
            .bind(i64::from(summary.total_questions))
            .bind(i64::from(summary.correct_count))
            .bind(i64::from(summary.percentage))
            .bind(completed_at)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        }

        tx.commit().await.map_err(conn)?;
        Ok(())
    }

    async fn scores_for_session(&self, id: SessionId) -> Result<Vec<ScoreSummary>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT
                session_id, subject_id, subject, total_questions,
                correct_count, percentage, completed_at
            FROM score_summaries
            WHERE session_id = ?1
            ORDER BY position ASC
            ",
        )
        .bind(id_i64("session_id", id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter()
            .map(|row| map_score_row(row).map(|r| r.summary))
            .collect()
    }

    async fn list_scores(&self, user_id: &UserId) -> Result<Vec<ScoreRow>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT
                session_id, subject_id, subject, total_questions,
                correct_count, percentage, completed_at
            FROM score_summaries
            WHERE user_id = ?1
            ORDER BY completed_at ASC, session_id ASC, position ASC
            ",
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(map_score_row).collect()
    }
}
