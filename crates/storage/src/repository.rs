use async_trait::async_trait;
use chrono::{DateTime, Utc};
use exam_core::model::{
    AnswerRecord, AttemptId, ExamType, HistoryAnswer, Question, QuestionId, ScoreSummary,
    Selection, Session, SessionId, SessionStatus, SubjectId, UserId,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

//
// ─── RECORDS ───────────────────────────────────────────────────────────────────
//

/// A subject and the exam years that have questions for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectYears {
    pub subject_id: SubjectId,
    pub subject: String,
    pub years: Vec<u16>,
}

/// Persisted header of an attempt; everything but the answer sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptHeader {
    pub id: AttemptId,
    pub user_id: UserId,
    pub exam_type: ExamType,
    pub selections: Vec<Selection>,
    pub status: SessionStatus,
    pub time_limit_secs: u32,
    pub remaining_secs: u32,
    pub total_questions: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl AttemptHeader {
    #[must_use]
    pub fn from_session(session: &Session) -> Self {
        Self {
            id: session.id(),
            user_id: session.user_id().clone(),
            exam_type: session.exam_type().clone(),
            selections: session.selections().to_vec(),
            status: session.status(),
            time_limit_secs: session.time_limit_secs(),
            remaining_secs: session.remaining_secs(),
            total_questions: u32::try_from(session.len()).unwrap_or(u32::MAX),
            created_at: session.created_at(),
            started_at: session.started_at(),
            finished_at: session.finished_at(),
        }
    }
}

/// Acknowledgement for a batch of persisted answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitAck {
    pub attempt_id: AttemptId,
    pub stored: usize,
}

/// One selection of an attempt that was never finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncompleteAttempt {
    pub attempt_id: AttemptId,
    pub subject_id: SubjectId,
    pub subject: String,
    pub year: u16,
    pub exam_type: ExamType,
    pub answered_question_ids: Vec<QuestionId>,
    pub total_questions: u32,
}

/// A stored score summary with its completion time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreRow {
    pub summary: ScoreSummary,
    pub completed_at: DateTime<Utc>,
}

//
// ─── CONTRACTS ─────────────────────────────────────────────────────────────────
//

/// Read side of the question content store.
#[async_trait]
pub trait QuestionRepository: Send + Sync {
    /// Persist or replace a question.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the question cannot be stored.
    async fn upsert_question(&self, question: &Question) -> Result<(), StorageError>;

    /// Questions for one exam, subject and year, ordered by question id.
    ///
    /// An unknown filter yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the store is unreachable, or
    /// `StorageError::Serialization` if a row cannot be decoded.
    async fn questions_for(
        &self,
        exam_type: &ExamType,
        subject_id: SubjectId,
        year: u16,
    ) -> Result<Vec<Question>, StorageError>;

    /// Subjects with questions for `exam_type`, ordered by subject id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the listing fails.
    async fn list_subjects(&self, exam_type: &ExamType) -> Result<Vec<SubjectYears>, StorageError>;
}

#[async_trait]
pub trait AttemptRepository: Send + Sync {
    /// Allocate a new attempt id in `created` state.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the attempt cannot be created.
    async fn create_attempt(
        &self,
        user_id: &UserId,
        exam_type: &ExamType,
        created_at: DateTime<Utc>,
    ) -> Result<AttemptId, StorageError>;

    /// Overwrite the header of an existing attempt.
    ///
    /// A finished attempt is never reopened and a scored one is never
    /// unscored; see [`SessionStatus::stage`].
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the attempt was never created, or
    /// `StorageError::Conflict` if the write would move it to an earlier stage.
    async fn save_attempt(&self, header: &AttemptHeader) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_attempt(&self, id: AttemptId) -> Result<AttemptHeader, StorageError>;

    /// Replace the whole answer sheet of an attempt.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the attempt or a question is
    /// unknown, or `StorageError::Conflict` if a record belongs to another
    /// session.
    async fn replace_answer_sheet(
        &self,
        id: AttemptId,
        answers: &[AnswerRecord],
    ) -> Result<SubmitAck, StorageError>;

    /// Upsert answers by (attempt, question).
    ///
    /// # Errors
    ///
    /// Same conditions as [`AttemptRepository::replace_answer_sheet`].
    async fn submit_answers(
        &self,
        id: AttemptId,
        answers: &[AnswerRecord],
    ) -> Result<SubmitAck, StorageError>;

    /// Created or in-progress attempts of a user, one entry per selection,
    /// ordered by attempt id then selection order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the listing fails.
    async fn fetch_incomplete_attempts(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<IncompleteAttempt>, StorageError>;

    /// Stored answers of one attempt for one selection, ordered by question id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the lookup fails.
    async fn attempt_answers(
        &self,
        id: AttemptId,
        subject_id: SubjectId,
        year: u16,
    ) -> Result<Vec<AnswerRecord>, StorageError>;

    /// Every stored answer of a user's attempts joined with question metadata.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the lookup fails.
    async fn fetch_answer_history(&self, user_id: &UserId)
    -> Result<Vec<HistoryAnswer>, StorageError>;
}

#[async_trait]
pub trait ScoreRepository: Send + Sync {
    /// Upsert summaries keyed by (session, subject). Saving the same summaries
    /// twice leaves a single copy.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the summaries cannot be stored.
    async fn save_scores(
        &self,
        user_id: &UserId,
        completed_at: DateTime<Utc>,
        summaries: &[ScoreSummary],
    ) -> Result<(), StorageError>;

    /// Summaries of one session in the order they were saved.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the lookup fails.
    async fn scores_for_session(&self, id: SessionId) -> Result<Vec<ScoreSummary>, StorageError>;

    /// Every stored summary of a user, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the lookup fails.
    async fn list_scores(&self, user_id: &UserId) -> Result<Vec<ScoreRow>, StorageError>;
}

//
// ─── IN-MEMORY ─────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone)]
struct StoredAnswer {
    record: AnswerRecord,
    subject_id: SubjectId,
    year: u16,
}

#[derive(Debug, Clone)]
struct StoredScore {
    user_id: UserId,
    position: usize,
    completed_at: DateTime<Utc>,
    summary: ScoreSummary,
}

/// Simple in-memory repository implementation for testing and prototyping.
///
/// Locks are always taken in field order.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    questions: Arc<Mutex<BTreeMap<QuestionId, Question>>>,
    attempts: Arc<Mutex<BTreeMap<AttemptId, AttemptHeader>>>,
    answers: Arc<Mutex<BTreeMap<(AttemptId, QuestionId), StoredAnswer>>>,
    scores: Arc<Mutex<BTreeMap<(SessionId, SubjectId), StoredScore>>>,
    next_attempt: Arc<AtomicU64>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StorageError> {
    mutex
        .lock()
        .map_err(|e| StorageError::Connection(e.to_string()))
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn write_answers(
        &self,
        id: AttemptId,
        answers: &[AnswerRecord],
        replace: bool,
    ) -> Result<SubmitAck, StorageError> {
        let questions = lock(&self.questions)?;
        let attempts = lock(&self.attempts)?;
        let mut stored = lock(&self.answers)?;

        if !attempts.contains_key(&id) {
            return Err(StorageError::NotFound);
        }
        let mut rows = Vec::with_capacity(answers.len());
        for record in answers {
            if record.session_id != id {
                return Err(StorageError::Conflict);
            }
            let question = questions
                .get(&record.question_id)
                .ok_or(StorageError::NotFound)?;
            rows.push(StoredAnswer {
                record: record.clone(),
                subject_id: question.subject_id(),
                year: question.year(),
            });
        }

        if replace {
            stored.retain(|(attempt, _), _| *attempt != id);
        }
        for row in rows {
            stored.insert((id, row.record.question_id), row);
        }
        Ok(SubmitAck {
            attempt_id: id,
            stored: answers.len(),
        })
    }
}

#[async_trait]
impl QuestionRepository for InMemoryRepository {
    async fn upsert_question(&self, question: &Question) -> Result<(), StorageError> {
        let mut guard = lock(&self.questions)?;
        guard.insert(question.id(), question.clone());
        Ok(())
    }

    async fn questions_for(
        &self,
        exam_type: &ExamType,
        subject_id: SubjectId,
        year: u16,
    ) -> Result<Vec<Question>, StorageError> {
        let guard = lock(&self.questions)?;
        Ok(guard
            .values()
            .filter(|q| {
                q.exam_type() == exam_type && q.subject_id() == subject_id && q.year() == year
            })
            .cloned()
            .collect())
    }

    async fn list_subjects(&self, exam_type: &ExamType) -> Result<Vec<SubjectYears>, StorageError> {
        let guard = lock(&self.questions)?;
        let mut subjects: BTreeMap<SubjectId, (String, BTreeSet<u16>)> = BTreeMap::new();
        for question in guard.values().filter(|q| q.exam_type() == exam_type) {
            subjects
                .entry(question.subject_id())
                .or_insert_with(|| (question.subject().to_owned(), BTreeSet::new()))
                .1
                .insert(question.year());
        }
        Ok(subjects
            .into_iter()
            .map(|(subject_id, (subject, years))| SubjectYears {
                subject_id,
                subject,
                years: years.into_iter().collect(),
            })
            .collect())
    }
}

#[async_trait]
impl AttemptRepository for InMemoryRepository {
    async fn create_attempt(
        &self,
        user_id: &UserId,
        exam_type: &ExamType,
        created_at: DateTime<Utc>,
    ) -> Result<AttemptId, StorageError> {
        let mut guard = lock(&self.attempts)?;
        let id = AttemptId::new(self.next_attempt.fetch_add(1, Ordering::Relaxed) + 1);
        guard.insert(
            id,
            AttemptHeader {
                id,
                user_id: user_id.clone(),
                exam_type: exam_type.clone(),
                selections: Vec::new(),
                status: SessionStatus::Created,
                time_limit_secs: 0,
                remaining_secs: 0,
                total_questions: 0,
                created_at,
                started_at: None,
                finished_at: None,
            },
        );
        Ok(id)
    }

    async fn save_attempt(&self, header: &AttemptHeader) -> Result<(), StorageError> {
        let mut guard = lock(&self.attempts)?;
        let slot = guard.get_mut(&header.id).ok_or(StorageError::NotFound)?;
        if header.status.stage() < slot.status.stage() {
            return Err(StorageError::Conflict);
        }
        *slot = header.clone();
        Ok(())
    }

    async fn get_attempt(&self, id: AttemptId) -> Result<AttemptHeader, StorageError> {
        let guard = lock(&self.attempts)?;
        guard.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn replace_answer_sheet(
        &self,
        id: AttemptId,
        answers: &[AnswerRecord],
    ) -> Result<SubmitAck, StorageError> {
        self.write_answers(id, answers, true)
    }

    async fn submit_answers(
        &self,
        id: AttemptId,
        answers: &[AnswerRecord],
    ) -> Result<SubmitAck, StorageError> {
        self.write_answers(id, answers, false)
    }

    async fn fetch_incomplete_attempts(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<IncompleteAttempt>, StorageError> {
        let questions = lock(&self.questions)?;
        let attempts = lock(&self.attempts)?;
        let answers = lock(&self.answers)?;

        let mut out = Vec::new();
        for header in attempts.values().filter(|h| {
            &h.user_id == user_id
                && matches!(h.status, SessionStatus::Created | SessionStatus::InProgress)
        }) {
            for selection in &header.selections {
                let rows: Vec<&StoredAnswer> = answers
                    .range((header.id, QuestionId::new(0))..=(header.id, QuestionId::new(u64::MAX)))
                    .map(|(_, row)| row)
                    .filter(|row| row.subject_id == selection.subject_id && row.year == selection.year)
                    .collect();
                let subject = rows
                    .iter()
                    .find_map(|row| questions.get(&row.record.question_id))
                    .map(|q| q.subject().to_owned())
                    .unwrap_or_default();
                out.push(IncompleteAttempt {
                    attempt_id: header.id,
                    subject_id: selection.subject_id,
                    subject,
                    year: selection.year,
                    exam_type: header.exam_type.clone(),
                    answered_question_ids: rows
                        .iter()
                        .filter(|row| row.record.is_answered())
                        .map(|row| row.record.question_id)
                        .collect(),
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
        let guard = lock(&self.answers)?;
        Ok(guard
            .range((id, QuestionId::new(0))..=(id, QuestionId::new(u64::MAX)))
            .map(|(_, row)| row)
            .filter(|row| row.subject_id == subject_id && row.year == year)
            .map(|row| row.record.clone())
            .collect())
    }

    async fn fetch_answer_history(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<HistoryAnswer>, StorageError> {
        let questions = lock(&self.questions)?;
        let attempts = lock(&self.attempts)?;
        let answers = lock(&self.answers)?;

        let mut out = Vec::new();
        for ((attempt_id, question_id), row) in answers.iter() {
            let Some(header) = attempts.get(attempt_id).filter(|h| &h.user_id == user_id) else {
                continue;
            };
            let Some(question) = questions.get(question_id) else {
                continue;
            };
            out.push(HistoryAnswer {
                attempt_id: *attempt_id,
                question_id: *question_id,
                subject_id: question.subject_id(),
                subject: question.subject().to_owned(),
                year: question.year(),
                exam_type: header.exam_type.clone(),
                selected_option: row.record.selected_option,
                correct_option: question.correct_option(),
                option_count: question.options().len(),
                attempt_started_at: header.started_at.unwrap_or(header.created_at),
                answered_at: row.record.answered_at,
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl ScoreRepository for InMemoryRepository {
    async fn save_scores(
        &self,
        user_id: &UserId,
        completed_at: DateTime<Utc>,
        summaries: &[ScoreSummary],
    ) -> Result<(), StorageError> {
        let mut guard = lock(&self.scores)?;
        for (position, summary) in summaries.iter().enumerate() {
            guard.insert(
                (summary.session_id, summary.subject_id),
                StoredScore {
                    user_id: user_id.clone(),
                    position,
                    completed_at,
                    summary: summary.clone(),
                },
            );
        }
        Ok(())
    }

    async fn scores_for_session(&self, id: SessionId) -> Result<Vec<ScoreSummary>, StorageError> {
        let guard = lock(&self.scores)?;
        let mut rows: Vec<&StoredScore> = guard
            .values()
            .filter(|s| s.summary.session_id == id)
            .collect();
        rows.sort_by_key(|s| s.position);
        Ok(rows.into_iter().map(|s| s.summary.clone()).collect())
    }

    async fn list_scores(&self, user_id: &UserId) -> Result<Vec<ScoreRow>, StorageError> {
        let guard = lock(&self.scores)?;
        let mut rows: Vec<&StoredScore> = guard.values().filter(|s| &s.user_id == user_id).collect();
        rows.sort_by_key(|s| (s.completed_at, s.summary.session_id, s.position));
        Ok(rows
            .into_iter()
            .map(|s| ScoreRow {
                summary: s.summary.clone(),
                completed_at: s.completed_at,
            })
            .collect())
    }
}

/// Aggregates the repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub questions: Arc<dyn QuestionRepository>,
    pub attempts: Arc<dyn AttemptRepository>,
    pub scores: Arc<dyn ScoreRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let questions: Arc<dyn QuestionRepository> = Arc::new(repo.clone());
        let attempts: Arc<dyn AttemptRepository> = Arc::new(repo.clone());
        let scores: Arc<dyn ScoreRepository> = Arc::new(repo);
        Self {
            questions,
            attempts,
            scores,
        }
    }
}
