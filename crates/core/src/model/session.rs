use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::exam::{ExamType, Selection};
use crate::model::ids::{QuestionId, SessionId, UserId};
use crate::model::question::Question;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AssemblyError {
    #[error("at least one selection is required")]
    EmptySelection,

    #[error("selection {0} was given more than once")]
    DuplicateSelection(Selection),

    #[error("no questions resolved for any selection")]
    NoQuestions,

    #[error("question {0} appears more than once in the sequence")]
    DuplicateQuestion(QuestionId),

    #[error("time limit must be > 0 seconds")]
    InvalidTimeLimit,

    #[error("selections can only change before the session starts (status: {0})")]
    AlreadyStarted(SessionStatus),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid session status: {0}")]
pub struct ParseStatusError(String);

//
// ─── STATUS ────────────────────────────────────────────────────────────────────
//

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    InProgress,
    Expired,
    Submitted,
    Scored,
}

impl SessionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Expired => "expired",
            SessionStatus::Submitted => "submitted",
            SessionStatus::Scored => "scored",
        }
    }

    /// Submitted and Expired sessions are waiting to be scored.
    #[must_use]
    pub fn is_scorable(self) -> bool {
        matches!(
            self,
            SessionStatus::Submitted | SessionStatus::Expired | SessionStatus::Scored
        )
    }

    /// Returns true once the attempt can no longer be answered.
    #[must_use]
    pub fn is_finished(self) -> bool {
        self.is_scorable()
    }

    /// Lifecycle stage: open, finished, scored. A stored attempt never moves
    /// back to an earlier stage.
    #[must_use]
    pub fn stage(self) -> u8 {
        match self {
            SessionStatus::Created | SessionStatus::InProgress => 0,
            SessionStatus::Expired | SessionStatus::Submitted => 1,
            SessionStatus::Scored => 2,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(SessionStatus::Created),
            "in_progress" => Ok(SessionStatus::InProgress),
            "expired" => Ok(SessionStatus::Expired),
            "submitted" => Ok(SessionStatus::Submitted),
            "scored" => Ok(SessionStatus::Scored),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

//
// ─── ANSWER RECORD ─────────────────────────────────────────────────────────────
//

/// The learner's selection for one question in a session.
///
/// Every question in a session has exactly one record; an unanswered question
/// carries `selected_option: None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub session_id: SessionId,
    pub question_id: QuestionId,
    pub selected_option: Option<usize>,
    pub answered_at: Option<DateTime<Utc>>,
}

impl AnswerRecord {
    #[must_use]
    pub fn unanswered(session_id: SessionId, question_id: QuestionId) -> Self {
        Self {
            session_id,
            question_id,
            selected_option: None,
            answered_at: None,
        }
    }

    #[must_use]
    pub fn answered(
        session_id: SessionId,
        question_id: QuestionId,
        selected_option: usize,
        answered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            question_id,
            selected_option: Some(selected_option),
            answered_at: Some(answered_at),
        }
    }

    #[must_use]
    pub fn is_answered(&self) -> bool {
        self.selected_option.is_some()
    }
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

/// One timed run through a fixed question sequence.
///
/// The question order and the answer sheet are fixed when the session is
/// built. Mutation goes through [`crate::tracker::AttemptTracker`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    user_id: UserId,
    exam_type: ExamType,
    selections: Vec<Selection>,
    question_ids: Vec<QuestionId>,
    answers: Vec<AnswerRecord>,
    status: SessionStatus,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    time_limit_secs: u32,
    remaining_secs: u32,
    current_index: usize,
}

/// Reject an empty or repeating selection list.
///
/// # Errors
///
/// Returns `AssemblyError::EmptySelection` or
/// `AssemblyError::DuplicateSelection`.
pub fn validate_selections(selections: &[Selection]) -> Result<(), AssemblyError> {
    if selections.is_empty() {
        return Err(AssemblyError::EmptySelection);
    }
    let mut seen = HashSet::with_capacity(selections.len());
    for selection in selections {
        if !seen.insert(*selection) {
            return Err(AssemblyError::DuplicateSelection(*selection));
        }
    }
    Ok(())
}

fn sequence_from(questions: &[Question]) -> Result<Vec<QuestionId>, AssemblyError> {
    if questions.is_empty() {
        return Err(AssemblyError::NoQuestions);
    }
    let mut seen = HashSet::with_capacity(questions.len());
    let mut ids = Vec::with_capacity(questions.len());
    for question in questions {
        if !seen.insert(question.id()) {
            return Err(AssemblyError::DuplicateQuestion(question.id()));
        }
        ids.push(question.id());
    }
    Ok(ids)
}

impl Session {
    /// Build a new session in `Created` state from an ordered question list.
    ///
    /// # Errors
    ///
    /// Returns `AssemblyError` if there are no selections, a selection repeats,
    /// no questions were resolved, a question repeats, or the time limit is zero.
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        id: SessionId,
        user_id: UserId,
        exam_type: ExamType,
        selections: Vec<Selection>,
        questions: &[Question],
        time_limit_secs: u32,
        created_at: DateTime<Utc>,
    ) -> Result<Self, AssemblyError> {
        validate_selections(&selections)?;
        if time_limit_secs == 0 {
            return Err(AssemblyError::InvalidTimeLimit);
        }
        let question_ids = sequence_from(questions)?;
        let answers = question_ids
            .iter()
            .map(|qid| AnswerRecord::unanswered(id, *qid))
            .collect();

        Ok(Self {
            id,
            user_id,
            exam_type,
            selections,
            question_ids,
            answers,
            status: SessionStatus::Created,
            created_at,
            started_at: None,
            finished_at: None,
            time_limit_secs,
            remaining_secs: time_limit_secs,
            current_index: 0,
        })
    }

    /// Rebuild an in-progress session from reconciled parts.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn hydrated(
        id: SessionId,
        user_id: UserId,
        exam_type: ExamType,
        selections: Vec<Selection>,
        answers: Vec<AnswerRecord>,
        created_at: DateTime<Utc>,
        started_at: DateTime<Utc>,
        time_limit_secs: u32,
        remaining_secs: u32,
    ) -> Self {
        let question_ids = answers.iter().map(|a| a.question_id).collect();
        Self {
            id,
            user_id,
            exam_type,
            selections,
            question_ids,
            answers,
            status: SessionStatus::InProgress,
            created_at,
            started_at: Some(started_at),
            finished_at: None,
            time_limit_secs,
            remaining_secs: remaining_secs.min(time_limit_secs),
            current_index: 0,
        }
    }

    /// Replace the selection set of a session that has not started yet.
    ///
    /// The answer sheet is rebuilt and the countdown restarts from
    /// `time_limit_secs`; no running total carries over.
    ///
    /// # Errors
    ///
    /// Returns `AssemblyError::AlreadyStarted` unless the session is `Created`,
    /// plus the validation errors of [`Session::assemble`].
    pub fn switch_selections(
        &mut self,
        selections: Vec<Selection>,
        questions: &[Question],
        time_limit_secs: u32,
    ) -> Result<(), AssemblyError> {
        if self.status != SessionStatus::Created {
            return Err(AssemblyError::AlreadyStarted(self.status));
        }
        validate_selections(&selections)?;
        if time_limit_secs == 0 {
            return Err(AssemblyError::InvalidTimeLimit);
        }
        let question_ids = sequence_from(questions)?;

        self.answers = question_ids
            .iter()
            .map(|qid| AnswerRecord::unanswered(self.id, *qid))
            .collect();
        self.question_ids = question_ids;
        self.selections = selections;
        self.time_limit_secs = time_limit_secs;
        self.remaining_secs = time_limit_secs;
        self.current_index = 0;
        Ok(())
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    #[must_use]
    pub fn exam_type(&self) -> &ExamType {
        &self.exam_type
    }

    #[must_use]
    pub fn selections(&self) -> &[Selection] {
        &self.selections
    }

    #[must_use]
    pub fn question_ids(&self) -> &[QuestionId] {
        &self.question_ids
    }

    #[must_use]
    pub fn answers(&self) -> &[AnswerRecord] {
        &self.answers
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    #[must_use]
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    #[must_use]
    pub fn time_limit_secs(&self) -> u32 {
        self.time_limit_secs
    }

    #[must_use]
    pub fn remaining_secs(&self) -> u32 {
        self.remaining_secs
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    #[must_use]
    pub fn current_question_id(&self) -> Option<QuestionId> {
        self.question_ids.get(self.current_index).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.question_ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.question_ids.is_empty()
    }

    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.answers.iter().filter(|a| a.is_answered()).count()
    }

    #[must_use]
    pub fn answer_for(&self, question_id: QuestionId) -> Option<&AnswerRecord> {
        self.position_of(question_id).map(|idx| &self.answers[idx])
    }

    pub(crate) fn position_of(&self, question_id: QuestionId) -> Option<usize> {
        self.question_ids.iter().position(|id| *id == question_id)
    }

    pub(crate) fn answer_mut(&mut self, idx: usize) -> &mut AnswerRecord {
        &mut self.answers[idx]
    }

    pub(crate) fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
    }

    pub(crate) fn set_started_at(&mut self, at: DateTime<Utc>) {
        self.started_at = Some(at);
    }

    pub(crate) fn set_finished_at(&mut self, at: DateTime<Utc>) {
        self.finished_at = Some(at);
    }

    pub(crate) fn set_remaining_secs(&mut self, secs: u32) {
        self.remaining_secs = secs;
    }

    pub(crate) fn set_current_index(&mut self, idx: usize) {
        self.current_index = idx;
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
