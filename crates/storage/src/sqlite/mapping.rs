use chrono::{DateTime, Utc};
use exam_core::model::{
    AnswerRecord, AttemptId, ExamType, HistoryAnswer, Question, QuestionId, ScoreSummary,
    Selection, SessionId, SessionStatus, SubjectId, UserId,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::{AttemptHeader, ScoreRow, StorageError};

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn(e: sqlx::Error) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn usize_i64(field: &'static str, v: usize) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

fn u16_from_i64(field: &'static str, v: i64) -> Result<u16, StorageError> {
    u16::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

fn usize_from_i64(field: &'static str, v: i64) -> Result<usize, StorageError> {
    usize::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn question_id_from_i64(v: i64) -> Result<QuestionId, StorageError> {
    Ok(QuestionId::new(i64_to_u64("question_id", v)?))
}

pub(crate) fn subject_id_from_i64(v: i64) -> Result<SubjectId, StorageError> {
    Ok(SubjectId::new(i64_to_u64("subject_id", v)?))
}

pub(crate) fn attempt_id_from_i64(v: i64) -> Result<AttemptId, StorageError> {
    Ok(AttemptId::new(i64_to_u64("attempt_id", v)?))
}

pub(crate) fn year_from_i64(v: i64) -> Result<u16, StorageError> {
    u16_from_i64("year", v)
}

fn exam_type_from(s: String) -> Result<ExamType, StorageError> {
    ExamType::new(s).map_err(ser)
}

fn selected_from(v: Option<i64>) -> Result<Option<usize>, StorageError> {
    v.map(|s| usize_from_i64("selected_option", s)).transpose()
}

pub(crate) fn selected_to_i64(v: Option<usize>) -> Result<Option<i64>, StorageError> {
    v.map(|s| usize_i64("selected_option", s)).transpose()
}

pub(crate) fn encode_selections(selections: &[Selection]) -> Result<String, StorageError> {
    serde_json::to_string(selections).map_err(ser)
}

pub(crate) fn encode_options(options: &[String]) -> Result<String, StorageError> {
    serde_json::to_string(options).map_err(ser)
}

pub(crate) fn map_question_row(row: &SqliteRow) -> Result<Question, StorageError> {
    let options_json: String = row.try_get("options_json").map_err(ser)?;
    let options: Vec<String> = serde_json::from_str(&options_json).map_err(ser)?;

    Question::new(
        question_id_from_i64(row.try_get::<i64, _>("id").map_err(ser)?)?,
        subject_id_from_i64(row.try_get::<i64, _>("subject_id").map_err(ser)?)?,
        row.try_get::<String, _>("subject").map_err(ser)?,
        year_from_i64(row.try_get::<i64, _>("year").map_err(ser)?)?,
        exam_type_from(row.try_get::<String, _>("exam_type").map_err(ser)?)?,
        row.try_get::<String, _>("prompt").map_err(ser)?,
        options,
        usize_from_i64(
            "correct_option",
            row.try_get::<i64, _>("correct_option").map_err(ser)?,
        )?,
        row.try_get::<Option<String>, _>("explanation")
            .map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn map_attempt_row(row: &SqliteRow) -> Result<AttemptHeader, StorageError> {
    let selections_json: String = row.try_get("selections_json").map_err(ser)?;
    let selections: Vec<Selection> = serde_json::from_str(&selections_json).map_err(ser)?;
    let status: String = row.try_get("status").map_err(ser)?;

    Ok(AttemptHeader {
        id: attempt_id_from_i64(row.try_get::<i64, _>("id").map_err(ser)?)?,
        user_id: UserId::new(row.try_get::<String, _>("user_id").map_err(ser)?).map_err(ser)?,
        exam_type: exam_type_from(row.try_get::<String, _>("exam_type").map_err(ser)?)?,
        selections,
        status: status.parse::<SessionStatus>().map_err(ser)?,
        time_limit_secs: u32_from_i64(
            "time_limit_secs",
            row.try_get::<i64, _>("time_limit_secs").map_err(ser)?,
        )?,
        remaining_secs: u32_from_i64(
            "remaining_secs",
            row.try_get::<i64, _>("remaining_secs").map_err(ser)?,
        )?,
        total_questions: u32_from_i64(
            "total_questions",
            row.try_get::<i64, _>("total_questions").map_err(ser)?,
        )?,
        created_at: row.try_get("created_at").map_err(ser)?,
        started_at: row.try_get("started_at").map_err(ser)?,
        finished_at: row.try_get("finished_at").map_err(ser)?,
    })
}

pub(crate) fn map_answer_row(row: &SqliteRow) -> Result<AnswerRecord, StorageError> {
    Ok(AnswerRecord {
        session_id: attempt_id_from_i64(row.try_get::<i64, _>("attempt_id").map_err(ser)?)?,
        question_id: question_id_from_i64(row.try_get::<i64, _>("question_id").map_err(ser)?)?,
        selected_option: selected_from(row.try_get("selected_option").map_err(ser)?)?,
        answered_at: row.try_get("answered_at").map_err(ser)?,
    })
}

/// Raw history rows are decoded leniently: option indices are passed through
/// so the reporter can flag out-of-range values.
pub(crate) fn map_history_row(row: &SqliteRow) -> Result<HistoryAnswer, StorageError> {
    let options_json: String = row.try_get("options_json").map_err(ser)?;
    let options: Vec<String> = serde_json::from_str(&options_json).map_err(ser)?;
    let started_at: Option<DateTime<Utc>> = row.try_get("started_at").map_err(ser)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(ser)?;

    Ok(HistoryAnswer {
        attempt_id: attempt_id_from_i64(row.try_get::<i64, _>("attempt_id").map_err(ser)?)?,
        question_id: question_id_from_i64(row.try_get::<i64, _>("question_id").map_err(ser)?)?,
        subject_id: subject_id_from_i64(row.try_get::<i64, _>("subject_id").map_err(ser)?)?,
        subject: row.try_get("subject").map_err(ser)?,
        year: year_from_i64(row.try_get::<i64, _>("year").map_err(ser)?)?,
        exam_type: exam_type_from(row.try_get::<String, _>("exam_type").map_err(ser)?)?,
        selected_option: selected_from(row.try_get("selected_option").map_err(ser)?)?,
        correct_option: usize_from_i64(
            "correct_option",
            row.try_get::<i64, _>("correct_option").map_err(ser)?,
        )?,
        option_count: options.len(),
        attempt_started_at: started_at.unwrap_or(created_at),
        answered_at: row.try_get("answered_at").map_err(ser)?,
    })
}

pub(crate) fn map_score_row(row: &SqliteRow) -> Result<ScoreRow, StorageError> {
    let summary = ScoreSummary {
        session_id: SessionId::new(i64_to_u64(
            "session_id",
            row.try_get::<i64, _>("session_id").map_err(ser)?,
        )?),
        subject_id: subject_id_from_i64(row.try_get::<i64, _>("subject_id").map_err(ser)?)?,
        subject: row.try_get("subject").map_err(ser)?,
        total_questions: u32_from_i64(
            "total_questions",
            row.try_get::<i64, _>("total_questions").map_err(ser)?,
        )?,
        correct_count: u32_from_i64(
            "correct_count",
            row.try_get::<i64, _>("correct_count").map_err(ser)?,
        )?,
        percentage: u8::try_from(row.try_get::<i64, _>("percentage").map_err(ser)?)
            .map_err(ser)?,
    };
    Ok(ScoreRow {
        summary,
        completed_at: row.try_get("completed_at").map_err(ser)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_ids_are_rejected() {
        assert!(question_id_from_i64(-1).is_err());
        assert_eq!(question_id_from_i64(7).unwrap(), QuestionId::new(7));
    }

    #[test]
    fn selections_encode_as_json() {
        let json = encode_selections(&[Selection::new(SubjectId::new(1), 2020)]).unwrap();
        let back: Vec<Selection> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vec![Selection::new(SubjectId::new(1), 2020)]);
    }

    #[test]
    fn year_must_fit_u16() {
        assert!(year_from_i64(70_000).is_err());
        assert_eq!(year_from_i64(2020).unwrap(), 2020);
    }
}
