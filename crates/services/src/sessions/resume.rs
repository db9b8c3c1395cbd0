use std::sync::Arc;

use exam_core::Clock;
use exam_core::model::{AttemptId, Question, QuestionId, ScoreSummary, Session, SessionStatus, UserId};
use exam_core::reconcile::{ResumeContext, ResumeReconciler};
use exam_core::settings::ExamSettings;
use exam_core::tracker::{AttemptTracker, TrackerError};
use storage::repository::{AttemptHeader, AttemptRepository, IncompleteAttempt};

use super::attempt::AttemptService;
use super::scoring::ScoringService;
use crate::catalog::Catalog;
use crate::error::{CountdownError, SessionError};

/// A rehydrated attempt: live again, or scored if its clock had run out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resumed {
    pub session: Session,
    /// Prior answers whose question no longer exists.
    pub dropped: Vec<QuestionId>,
    pub questions: Vec<Question>,
    /// Set when the attempt had no time left and was scored instead.
    pub scores: Option<Vec<ScoreSummary>>,
}

/// Lists and reopens interrupted attempts.
#[derive(Clone)]
pub struct ResumeService {
    clock: Clock,
    settings: Arc<ExamSettings>,
    catalog: Catalog,
    attempts: Arc<dyn AttemptRepository>,
    scoring: ScoringService,
    live: AttemptService,
}

impl ResumeService {
    #[must_use]
    pub fn new(
        clock: Clock,
        settings: Arc<ExamSettings>,
        catalog: Catalog,
        attempts: Arc<dyn AttemptRepository>,
        scoring: ScoringService,
        live: AttemptService,
    ) -> Self {
        Self {
            clock,
            settings,
            catalog,
            attempts,
            scoring,
            live,
        }
    }

    /// Created or in-progress attempts of `user_id`, one entry per selection.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` if the listing fails.
    pub async fn list_incomplete(&self, user_id: &UserId) -> Result<Vec<IncompleteAttempt>, SessionError> {
        Ok(self.attempts.fetch_incomplete_attempts(user_id).await?)
    }

    /// Rebuild an interrupted attempt from a fresh question fetch and its
    /// stored answers, persist the merged sheet and restart its countdown.
    ///
    /// An attempt that was in progress keeps its remaining time; one that never
    /// started gets the exam's default budget. An attempt with no time left is
    /// expired and scored rather than restarted.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Countdown` if the attempt is still live,
    /// `SessionError::Forbidden` if it belongs to another user,
    /// `SessionError::Tracker` if it is already finished,
    /// `SessionError::Validation` if nothing can be resolved any more, or
    /// storage and catalog failures.
    pub async fn resume(&self, user_id: &UserId, attempt_id: AttemptId) -> Result<Resumed, SessionError> {
        if self.live.is_live(attempt_id) {
            return Err(CountdownError::AlreadyRunning(attempt_id).into());
        }
        let header = self.attempts.get_attempt(attempt_id).await?;
        if &header.user_id != user_id {
            return Err(SessionError::Forbidden(attempt_id));
        }
        let persisted_remaining = match header.status {
            SessionStatus::InProgress => Some(header.remaining_secs),
            SessionStatus::Created => None,
            status => {
                return Err(TrackerError::InvalidState {
                    operation: "resume",
                    status,
                }
                .into());
            }
        };

        let mut fresh = Vec::new();
        let mut prior = Vec::new();
        for selection in &header.selections {
            let mut questions = self
                .catalog
                .questions_for(&header.exam_type, selection.subject_id, selection.year)
                .await?;
            fresh.append(&mut questions);
            let mut answers = self
                .attempts
                .attempt_answers(attempt_id, selection.subject_id, selection.year)
                .await?;
            prior.append(&mut answers);
        }

        let ctx = ResumeContext {
            session_id: attempt_id,
            user_id: header.user_id,
            exam_type: header.exam_type,
            selections: header.selections,
            created_at: header.created_at,
            started_at: header.started_at.unwrap_or_else(|| self.clock.now()),
            resumed_at: self.clock.now(),
        };
        let reconciled = ResumeReconciler::new(&self.settings).reconcile(
            ctx,
            &prior,
            &fresh,
            persisted_remaining,
        )?;
        let session = reconciled.session;

        self.attempts
            .save_attempt(&AttemptHeader::from_session(&session))
            .await?;
        self.attempts
            .replace_answer_sheet(session.id(), session.answers())
            .await?;

        tracing::info!(
            session = %attempt_id,
            answered = session.answered_count(),
            dropped = reconciled.dropped.len(),
            remaining_secs = session.remaining_secs(),
            "attempt reconciled"
        );

        if session.status() == SessionStatus::Expired {
            tracing::info!(session = %attempt_id, "no time left; scoring instead of resuming");
            let scores = self.scoring.finalize(session.clone(), &fresh).await?;
            let mut tracker = AttemptTracker::new(session);
            tracker.mark_scored()?;
            return Ok(Resumed {
                session: tracker.into_session(),
                dropped: reconciled.dropped,
                questions: fresh,
                scores: Some(scores),
            });
        }

        self.live.attach(session.clone(), fresh.clone())?;
        Ok(Resumed {
            session,
            dropped: reconciled.dropped,
            questions: fresh,
            scores: None,
        })
    }
}
