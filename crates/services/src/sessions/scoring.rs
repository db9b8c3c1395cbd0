use std::sync::Arc;

use exam_core::Clock;
use exam_core::model::{OverallScore, Question, ScoreSummary, Session, SessionId, SessionStatus};
use exam_core::scoring::ScoringEngine;
use exam_core::tracker::AttemptTracker;
use storage::repository::{AttemptHeader, AttemptRepository, ScoreRepository};

use crate::error::SessionError;

/// Scores finished sessions and stores the result exactly once per
/// (session, subject).
#[derive(Clone)]
pub struct ScoringService {
    clock: Clock,
    attempts: Arc<dyn AttemptRepository>,
    scores: Arc<dyn ScoreRepository>,
}

impl ScoringService {
    #[must_use]
    pub fn new(
        clock: Clock,
        attempts: Arc<dyn AttemptRepository>,
        scores: Arc<dyn ScoreRepository>,
    ) -> Self {
        Self {
            clock,
            attempts,
            scores,
        }
    }

    /// Score a submitted or expired session, persist the summaries and mark
    /// the attempt scored.
    ///
    /// A session that is already scored returns its stored summaries instead
    /// of being scored again.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Scoring` if the session is not finished or a
    /// question is missing, or `SessionError::Storage` if persistence fails.
    pub async fn finalize(
        &self,
        session: Session,
        questions: &[Question],
    ) -> Result<Vec<ScoreSummary>, SessionError> {
        if session.status() == SessionStatus::Scored {
            return self.scores_for(session.id()).await;
        }

        let summaries = ScoringEngine::score(&session, session.answers(), questions)?;
        let completed_at = session.finished_at().unwrap_or_else(|| self.clock.now());
        self.scores
            .save_scores(session.user_id(), completed_at, &summaries)
            .await?;

        let mut tracker = AttemptTracker::new(session);
        tracker.mark_scored()?;
        self.attempts
            .save_attempt(&AttemptHeader::from_session(tracker.session()))
            .await?;

        let overall = OverallScore::from_summaries(&summaries);
        tracing::info!(
            session = %tracker.session().id(),
            subjects = summaries.len(),
            percentage = overall.map(|o| o.percentage),
            "session scored"
        );
        Ok(summaries)
    }

    /// Stored summaries of a session, in subject order.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` if the lookup fails.
    pub async fn scores_for(&self, id: SessionId) -> Result<Vec<ScoreSummary>, SessionError> {
        Ok(self.scores.scores_for_session(id).await?)
    }

    /// Whole-session score, or `None` if nothing was stored.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` if the lookup fails.
    pub async fn overall(&self, id: SessionId) -> Result<Option<OverallScore>, SessionError> {
        let summaries = self.scores_for(id).await?;
        Ok(OverallScore::from_summaries(&summaries))
    }
}
