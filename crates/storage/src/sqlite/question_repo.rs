use exam_core::model::{ExamType, Question, SubjectId};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{
    conn, encode_options, id_i64, map_question_row, ser, subject_id_from_i64, usize_i64,
    year_from_i64,
};
use crate::repository::{QuestionRepository, StorageError, SubjectYears};

#[async_trait::async_trait]
impl QuestionRepository for SqliteRepository {
    async fn upsert_question(&self, question: &Question) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO questions (
                id, subject_id, subject, year, exam_type, prompt,
                options_json, option_count, correct_option, explanation
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                subject_id = excluded.subject_id,
                subject = excluded.subject,
                year = excluded.year,
                exam_type = excluded.exam_type,
                prompt = excluded.prompt,
                options_json = excluded.options_json,
                option_count = excluded.option_count,
                correct_option = excluded.correct_option,
                explanation = excluded.explanation
            ",
        )
        .bind(id_i64("question_id", question.id().value())?)
        .bind(id_i64("subject_id", question.subject_id().value())?)
        .bind(question.subject())
        .bind(i64::from(question.year()))
        .bind(question.exam_type().as_str())
        .bind(question.prompt())
        .bind(encode_options(question.options())?)
        .bind(usize_i64("option_count", question.options().len())?)
        .bind(usize_i64("correct_option", question.correct_option())?)
        .bind(question.explanation())
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(())
    }

    async fn questions_for(
        &self,
        exam_type: &ExamType,
        subject_id: SubjectId,
        year: u16,
    ) -> Result<Vec<Question>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT
                id, subject_id, subject, year, exam_type, prompt,
                options_json, correct_option, explanation
            FROM questions
            WHERE exam_type = ?1 AND subject_id = ?2 AND year = ?3
            ORDER BY id ASC
            ",
        )
        .bind(exam_type.as_str())
        .bind(id_i64("subject_id", subject_id.value())?)
        .bind(i64::from(year))
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(map_question_row).collect()
    }

    async fn list_subjects(&self, exam_type: &ExamType) -> Result<Vec<SubjectYears>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT subject_id, MIN(subject) AS subject, year
            FROM questions
            WHERE exam_type = ?1
            GROUP BY subject_id, year
            ORDER BY subject_id ASC, year ASC
            ",
        )
        .bind(exam_type.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut out: Vec<SubjectYears> = Vec::new();
        for row in rows {
            let subject_id = subject_id_from_i64(row.try_get::<i64, _>("subject_id").map_err(ser)?)?;
            let year = year_from_i64(row.try_get::<i64, _>("year").map_err(ser)?)?;
            match out.last_mut() {
                Some(last) if last.subject_id == subject_id => last.years.push(year),
                _ => out.push(SubjectYears {
                    subject_id,
                    subject: row.try_get("subject").map_err(ser)?,
                    years: vec![year],
                }),
            }
        }
        Ok(out)
    }
}
