//! Attempt state machine.
//!
//! ```text
//! Created --start--> InProgress --submit--> Submitted --mark_scored--> Scored
//!                        |                                  ^
//!                        +--tick to 0 / expire--> Expired --+
//! ```

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{AnswerRecord, QuestionId, Session, SessionStatus};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TrackerError {
    #[error("cannot {operation} while session is {status}")]
    InvalidState {
        operation: &'static str,
        status: SessionStatus,
    },

    #[error("question {0} is not part of this session")]
    UnknownQuestion(QuestionId),
}

/// Navigation request for the current-question pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    Next,
    Previous,
    /// Relative move; negative steps go backwards.
    Step(i64),
    /// Absolute index into the sequence.
    Goto(usize),
}

/// Result of applying one countdown tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Running { remaining_secs: u32 },
    /// The tick that moved the session into `Expired`. Emitted once per session.
    Expired,
    /// The session is not in progress; the tick was ignored.
    Inactive(SessionStatus),
}

/// Owns a [`Session`] and applies the only legal mutations to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptTracker {
    session: Session,
}

impl AttemptTracker {
    #[must_use]
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn into_session(self) -> Session {
        self.session
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    fn require(&self, status: SessionStatus, operation: &'static str) -> Result<(), TrackerError> {
        let current = self.session.status();
        if current == status {
            Ok(())
        } else {
            Err(TrackerError::InvalidState {
                operation,
                status: current,
            })
        }
    }

    /// Begin the attempt.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::InvalidState` unless the session is `Created`.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), TrackerError> {
        self.require(SessionStatus::Created, "start")?;
        self.session.set_started_at(now);
        self.session.set_status(SessionStatus::InProgress);
        Ok(())
    }

    /// Record (or overwrite) the selection for a question.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::InvalidState` unless the session is `InProgress`,
    /// or `TrackerError::UnknownQuestion` if the question is not in the session.
    pub fn record_answer(
        &mut self,
        question_id: QuestionId,
        option: usize,
        now: DateTime<Utc>,
    ) -> Result<&AnswerRecord, TrackerError> {
        self.require(SessionStatus::InProgress, "record an answer")?;
        let idx = self
            .session
            .position_of(question_id)
            .ok_or(TrackerError::UnknownQuestion(question_id))?;
        let record = self.session.answer_mut(idx);
        record.selected_option = Some(option);
        record.answered_at = Some(now);
        Ok(record)
    }

    /// Reset a question back to unanswered.
    ///
    /// # Errors
    ///
    /// Same conditions as [`AttemptTracker::record_answer`].
    pub fn clear_answer(&mut self, question_id: QuestionId) -> Result<&AnswerRecord, TrackerError> {
        self.require(SessionStatus::InProgress, "clear an answer")?;
        let idx = self
            .session
            .position_of(question_id)
            .ok_or(TrackerError::UnknownQuestion(question_id))?;
        let record = self.session.answer_mut(idx);
        record.selected_option = None;
        record.answered_at = None;
        Ok(record)
    }

    /// Move the current-question pointer, clamping at the sequence bounds.
    ///
    /// Outside `InProgress` the pointer does not move. Returns the new index.
    pub fn navigate(&mut self, target: Navigation) -> usize {
        let current = self.session.current_index();
        if self.session.status() != SessionStatus::InProgress || self.session.is_empty() {
            return current;
        }
        let last = self.session.len() - 1;
        let next = match target {
            Navigation::Next => current.saturating_add(1).min(last),
            Navigation::Previous => current.saturating_sub(1),
            Navigation::Step(step) => {
                let magnitude = usize::try_from(step.unsigned_abs()).unwrap_or(usize::MAX);
                if step >= 0 {
                    current.saturating_add(magnitude).min(last)
                } else {
                    current.saturating_sub(magnitude)
                }
            }
            Navigation::Goto(idx) => idx.min(last),
        };
        self.session.set_current_index(next);
        next
    }

    /// Finish the attempt on the learner's request, freezing the clock.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::InvalidState` unless the session is `InProgress`.
    pub fn submit(&mut self, now: DateTime<Utc>) -> Result<(), TrackerError> {
        self.require(SessionStatus::InProgress, "submit")?;
        self.finish(SessionStatus::Submitted, now);
        Ok(())
    }

    /// Force the attempt into `Expired`, freezing the clock.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::InvalidState` unless the session is `InProgress`.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<(), TrackerError> {
        self.require(SessionStatus::InProgress, "expire")?;
        self.session.set_remaining_secs(0);
        self.finish(SessionStatus::Expired, now);
        Ok(())
    }

    /// Charge `elapsed_secs` against the remaining budget.
    ///
    /// Reaching zero moves the session to `Expired`; later ticks are ignored.
    pub fn tick(&mut self, elapsed_secs: u32, now: DateTime<Utc>) -> TickOutcome {
        let status = self.session.status();
        if status != SessionStatus::InProgress {
            return TickOutcome::Inactive(status);
        }
        let remaining = self.session.remaining_secs().saturating_sub(elapsed_secs);
        self.session.set_remaining_secs(remaining);
        if remaining == 0 {
            self.finish(SessionStatus::Expired, now);
            return TickOutcome::Expired;
        }
        TickOutcome::Running {
            remaining_secs: remaining,
        }
    }

    /// Mark a finished session as scored. Returns false if it already was.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::InvalidState` if the session is not finished.
    pub fn mark_scored(&mut self) -> Result<bool, TrackerError> {
        match self.session.status() {
            SessionStatus::Scored => Ok(false),
            SessionStatus::Submitted | SessionStatus::Expired => {
                self.session.set_status(SessionStatus::Scored);
                Ok(true)
            }
            status => Err(TrackerError::InvalidState {
                operation: "mark scored",
                status,
            }),
        }
    }

    fn finish(&mut self, status: SessionStatus, now: DateTime<Utc>) {
        self.session.set_status(status);
        self.session.set_finished_at(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExamType, Question, Selection, SessionId, SubjectId, UserId};
    use crate::time::fixed_now;
    use chrono::Duration;

    fn questions(n: u64) -> Vec<Question> {
        (1..=n)
            .map(|id| {
                Question::new(
                    QuestionId::new(id),
                    SubjectId::new(1),
                    "Mathematics",
                    2020,
                    ExamType::new("utme").unwrap(),
                    format!("Q{id}"),
                    vec!["a".into(), "b".into(), "c".into()],
                    1,
                    None,
                )
                .unwrap()
            })
            .collect()
    }

    fn tracker(n: u64, budget: u32) -> AttemptTracker {
        let session = Session::assemble(
            SessionId::new(1),
            UserId::new("u1").unwrap(),
            ExamType::new("utme").unwrap(),
            vec![Selection::new(SubjectId::new(1), 2020)],
            &questions(n),
            budget,
            fixed_now(),
        )
        .unwrap();
        AttemptTracker::new(session)
    }

    fn started(n: u64, budget: u32) -> AttemptTracker {
        let mut t = tracker(n, budget);
        t.start(fixed_now()).unwrap();
        t
    }

    #[test]
    fn answers_require_in_progress() {
        let mut t = tracker(3, 60);
        let err = t
            .record_answer(QuestionId::new(1), 0, fixed_now())
            .unwrap_err();
        assert_eq!(
            err,
            TrackerError::InvalidState {
                operation: "record an answer",
                status: SessionStatus::Created
            }
        );
    }

    #[test]
    fn unknown_question_is_rejected() {
        let mut t = started(3, 60);
        let err = t
            .record_answer(QuestionId::new(99), 0, fixed_now())
            .unwrap_err();
        assert_eq!(err, TrackerError::UnknownQuestion(QuestionId::new(99)));
    }

    #[test]
    fn last_write_wins_and_record_count_is_stable() {
        let mut t = started(3, 60);
        let later = fixed_now() + Duration::seconds(5);
        t.record_answer(QuestionId::new(2), 0, fixed_now()).unwrap();
        t.record_answer(QuestionId::new(2), 2, later).unwrap();

        let record = t.session().answer_for(QuestionId::new(2)).unwrap();
        assert_eq!(record.selected_option, Some(2));
        assert_eq!(record.answered_at, Some(later));
        assert_eq!(t.session().answers().len(), 3);

        t.clear_answer(QuestionId::new(2)).unwrap();
        assert_eq!(t.session().answered_count(), 0);
        assert_eq!(t.session().answers().len(), 3);
    }

    #[test]
    fn navigation_clamps_at_bounds() {
        let mut t = started(3, 60);
        assert_eq!(t.navigate(Navigation::Previous), 0);
        assert_eq!(t.navigate(Navigation::Next), 1);
        assert_eq!(t.navigate(Navigation::Step(10)), 2);
        assert_eq!(t.navigate(Navigation::Next), 2);
        assert_eq!(t.navigate(Navigation::Step(-7)), 0);
        assert_eq!(t.navigate(Navigation::Goto(1)), 1);
        assert_eq!(t.navigate(Navigation::Goto(usize::MAX)), 2);
        assert_eq!(t.navigate(Navigation::Step(i64::MIN)), 0);
    }

    #[test]
    fn navigation_is_a_no_op_before_start() {
        let mut t = tracker(3, 60);
        assert_eq!(t.navigate(Navigation::Next), 0);
    }

    #[test]
    fn submit_freezes_remaining_time() {
        let mut t = started(2, 60);
        t.tick(10, fixed_now());
        t.submit(fixed_now()).unwrap();

        assert_eq!(t.status(), SessionStatus::Submitted);
        assert_eq!(t.session().remaining_secs(), 50);
        assert_eq!(
            t.tick(1, fixed_now()),
            TickOutcome::Inactive(SessionStatus::Submitted)
        );
        assert_eq!(t.session().remaining_secs(), 50);
        assert_eq!(t.session().finished_at(), Some(fixed_now()));
    }

    #[test]
    fn ticks_are_monotonic_and_expire_exactly_once() {
        let mut t = started(2, 3);
        let mut last = t.session().remaining_secs();
        let mut expiries = 0;
        for _ in 0..10 {
            if t.tick(1, fixed_now()) == TickOutcome::Expired {
                expiries += 1;
            }
            assert!(t.session().remaining_secs() <= last);
            last = t.session().remaining_secs();
        }
        assert_eq!(expiries, 1);
        assert_eq!(t.status(), SessionStatus::Expired);
        assert_eq!(t.session().remaining_secs(), 0);
    }

    #[test]
    fn first_terminal_transition_wins() {
        let mut t = started(2, 1);
        assert_eq!(t.tick(1, fixed_now()), TickOutcome::Expired);
        let err = t.submit(fixed_now()).unwrap_err();
        assert_eq!(
            err,
            TrackerError::InvalidState {
                operation: "submit",
                status: SessionStatus::Expired
            }
        );
    }

    #[test]
    fn mark_scored_is_idempotent_and_needs_finish() {
        let mut t = started(1, 60);
        assert!(t.mark_scored().is_err());
        t.submit(fixed_now()).unwrap();
        assert!(t.mark_scored().unwrap());
        assert!(!t.mark_scored().unwrap());
        assert_eq!(t.status(), SessionStatus::Scored);
    }

    #[test]
    fn start_only_once() {
        let mut t = started(1, 60);
        assert!(t.start(fixed_now()).is_err());
    }
}
