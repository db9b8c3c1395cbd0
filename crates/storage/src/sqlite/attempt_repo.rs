use chrono::{DateTime, Utc};
use exam_core::model::{
    AnswerRecord, AttemptId, ExamType, HistoryAnswer, SubjectId, UserId,
};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{
    conn, encode_selections, id_i64, map_answer_row, map_attempt_row, map_history_row,
    question_id_from_i64, selected_to_i64, ser,
};
use crate::repository::{AttemptHeader, AttemptRepository, IncompleteAttempt, StorageError, SubmitAck};

impl SqliteRepository {
    async fn write_answers(
        &self,
        id: AttemptId,
        answers: &[AnswerRecord],
        replace: bool,
    ) -> Result<SubmitAck, StorageError> {
        let attempt = id_i64("attempt_id", id.value())?;
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let exists = sqlx::query("SELECT 1 FROM attempts WHERE id = ?1")
            .bind(attempt)
            .fetch_optional(&mut *tx)
            .await
            .map_err(conn)?;
        if exists.is_none() {
            return Err(StorageError::NotFound);
        }

        if replace {
            sqlx::query("DELETE FROM attempt_answers WHERE attempt_id = ?1")
                .bind(attempt)
                .execute(&mut *tx)
                .await
                .map_err(conn)?;
        }

        for record in answers {
            if record.session_id != id {
                return Err(StorageError::Conflict);
            }
            // subject and year are copied from the question so the lookup
            // index never has to join.
            let res = sqlx::query(
                r"
                INSERT INTO attempt_answers (
                    attempt_id, question_id, subject_id, year, selected_option, answered_at
                )
                SELECT ?1, q.id, q.subject_id, q.year, ?3, ?4
                FROM questions q
                WHERE q.id = ?2
                ON CONFLICT(attempt_id, question_id) DO UPDATE SET
                    selected_option = excluded.selected_option,
                    answered_at = excluded.answered_at
                ",
            )
            .bind(attempt)
            .bind(id_i64("question_id", record.question_id.value())?)
            .bind(selected_to_i64(record.selected_option)?)
            .bind(record.answered_at)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

            if res.rows_affected() == 0 {
                return Err(StorageError::NotFound);
            }
        }

        tx.commit().await.map_err(conn)?;
        Ok(SubmitAck {
            attempt_id: id,
            stored: answers.len(),
        })
    }
}

#[async_trait::async_trait]
impl AttemptRepository for SqliteRepository {
    async fn create_attempt(
        &self,
        user_id: &UserId,
        exam_type: &ExamType,
        created_at: DateTime<Utc>,
    ) -> Result<AttemptId, StorageError> {
        let res = sqlx::query(
            r"
            INSERT INTO attempts (user_id, exam_type, status, created_at)
            VALUES (?1, ?2, 'created', ?3)
            ",
        )
        .bind(user_id.as_str())
        .bind(exam_type.as_str())
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        let id = u64::try_from(res.last_insert_rowid())
            .map_err(|_| StorageError::Serialization("attempt_id sign overflow".into()))?;
        Ok(AttemptId::new(id))
    }

    async fn save_attempt(&self, header: &AttemptHeader) -> Result<(), StorageError> {
        let res = sqlx::query(
            r"
            UPDATE attempts SET
                user_id = ?2,
                exam_type = ?3,
                selections_json = ?4,
                status = ?5,
                time_limit_secs = ?6,
                remaining_secs = ?7,
                total_questions = ?8,
                started_at = ?9,
                finished_at = ?10
            WHERE id = ?1
              AND (CASE status
                     WHEN 'scored' THEN 2
                     WHEN 'submitted' THEN 1
                     WHEN 'expired' THEN 1
                     ELSE 0
                   END) <= ?11
            ",
        )
        .bind(id_i64("attempt_id", header.id.value())?)
        .bind(header.user_id.as_str())
        .bind(header.exam_type.as_str())
        .bind(encode_selections(&header.selections)?)
        .bind(header.status.as_str())
        .bind(i64::from(header.time_limit_secs))
        .bind(i64::from(header.remaining_secs))
        .bind(i64::from(header.total_questions))
        .bind(header.started_at)
        .bind(header.finished_at)
        .bind(i64::from(header.status.stage()))
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        if res.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM attempts WHERE id = ?1")
                .bind(id_i64("attempt_id", header.id.value())?)
                .fetch_optional(&self.pool)
                .await
                .map_err(conn)?;
            return Err(if exists.is_some() {
                StorageError::Conflict
            } else {
                StorageError::NotFound
            });
        }
        Ok(())
    }

    async fn get_attempt(&self, id: AttemptId) -> Result<AttemptHeader, StorageError> {
        let row = sqlx::query(
            r"
            SELECT
                id, user_id, exam_type, selections_json, status, time_limit_secs,
                remaining_secs, total_questions, created_at, started_at, finished_at
            FROM attempts
            WHERE id = ?1
            ",
        )
        .bind(id_i64("attempt_id", id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?
        .ok_or(StorageError::NotFound)?;

        map_attempt_row(&row)
    }

    async fn replace_answer_sheet(
        &self,
        id: AttemptId,
        answers: &[AnswerRecord],
    ) -> Result<SubmitAck, StorageError> {
        self.write_answers(id, answers, true).await
    }

    async fn submit_answers(
        &self,
        id: AttemptId,
        answers: &[AnswerRecord],
    ) -> Result<SubmitAck, StorageError> {
        self.write_answers(id, answers, false).await
    }

    async fn fetch_incomplete_attempts(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<IncompleteAttempt>, StorageError> {
        let headers = sqlx::query(
            r"
            SELECT
                id, user_id, exam_type, selections_json, status, time_limit_secs,
                remaining_secs, total_questions, created_at, started_at, finished_at
            FROM attempts
            WHERE user_id = ?1 AND status IN ('created', 'in_progress')
            ORDER BY id ASC
            ",
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut out = Vec::new();
        for row in &headers {
            let header = map_attempt_row(row)?;
            for selection in &header.selections {
                let rows = sqlx::query(
                    r"
                    SELECT a.question_id AS question_id,
                           a.selected_option AS selected_option,
                           q.subject AS subject
                    FROM attempt_answers a
                    LEFT JOIN questions q ON q.id = a.question_id
                    WHERE a.subject_id = ?1 AND a.year = ?2 AND a.attempt_id = ?3
                    ORDER BY a.question_id ASC
                    ",
                )
                .bind(id_i64("subject_id", selection.subject_id.value())?)
                .bind(i64::from(selection.year))
                .bind(id_i64("attempt_id", header.id.value())?)
                .fetch_all(&self.pool)
                .await
                .map_err(conn)?;

                let mut subject = String::new();
                let mut answered = Vec::new();
                for answer in &rows {
                    if subject.is_empty() {
                        if let Some(name) = answer.try_get::<Option<String>, _>("subject").map_err(ser)? {
                            subject = name;
                        }
                    }
                    let selected: Option<i64> = answer.try_get("selected_option").map_err(ser)?;
                    if selected.is_some() {
                        answered.push(question_id_from_i64(
                            answer.try_get::<i64, _>("question_id").map_err(ser)?,
                        )?);
                    }
                }

                out.push(IncompleteAttempt {
                    attempt_id: header.id,
                    subject_id: selection.subject_id,
                    subject,
                    year: selection.year,
                    exam_type: header.exam_type.clone(),
                    answered_question_ids: answered,
                    total_questions: u32::try_from(rows.len()).unwrap_or(u32::MAX),
                });
            }
        }
        Ok(out)
    }

    async fn attempt_answers(
        &self,
        id: AttemptId,
        subject_id: SubjectId,
        year: u16,
    ) -> Result<Vec<AnswerRecord>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT attempt_id, question_id, selected_option, answered_at
            FROM attempt_answers
            WHERE subject_id = ?1 AND year = ?2 AND attempt_id = ?3
            ORDER BY question_id ASC
            ",
        )
        .bind(id_i64("subject_id", subject_id.value())?)
        .bind(i64::from(year))
        .bind(id_i64("attempt_id", id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(map_answer_row).collect()
    }

    async fn fetch_answer_history(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<HistoryAnswer>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT
                a.attempt_id AS attempt_id,
                a.question_id AS question_id,
                q.subject_id AS subject_id,
                q.subject AS subject,
                q.year AS year,
                t.exam_type AS exam_type,
                a.selected_option AS selected_option,
                q.correct_option AS correct_option,
                q.options_json AS options_json,
                t.started_at AS started_at,
                t.created_at AS created_at,
                a.answered_at AS answered_at
            FROM attempt_answers a
            JOIN attempts t ON t.id = a.attempt_id
            JOIN questions q ON q.id = a.question_id
            WHERE t.user_id = ?1
            ORDER BY a.attempt_id ASC, a.question_id ASC
            ",
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(map_history_row).collect()
    }
}
