//! Live attempts.
//!
//! Every live session sits behind its own async mutex, so answers, navigation,
//! timer ticks and the terminal transition are applied one at a time. Changes
//! that must be persisted are applied to a copy of the tracker and committed
//! only after storage accepts them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use exam_core::Clock;
use exam_core::model::{Question, QuestionId, ScoreSummary, Session, SessionId, SessionStatus};
use exam_core::tracker::{AttemptTracker, Navigation, TickOutcome, TrackerError};
use storage::repository::{AttemptHeader, AttemptRepository};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use super::assembler::Assembled;
use super::scoring::ScoringService;
use crate::countdown::{CountdownController, CountdownPhase, CountdownTarget};
use crate::error::{CountdownError, SessionError, ValidationError};

/// Remaining time is written back to storage whenever it crosses a multiple
/// of this many seconds.
const CHECKPOINT_EVERY_SECS: u32 = 30;

/// Latest state of a live session, as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveUpdate {
    Status(SessionStatus),
    Scored(Vec<ScoreSummary>),
    ScoringFailed(String),
}

/// Point-in-time copy of a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSnapshot {
    pub session: Session,
    pub current_question: Option<Question>,
}

/// Returned by a successful submit; scoring continues in the background.
#[derive(Debug)]
pub struct SubmitReceipt {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub scoring: JoinHandle<Result<Vec<ScoreSummary>, SessionError>>,
}

struct LiveState {
    tracker: AttemptTracker,
    handed_off: bool,
}

struct LiveSession {
    id: SessionId,
    state: Mutex<LiveState>,
    questions: Arc<[Question]>,
    updates: watch::Sender<LiveUpdate>,
}

impl LiveSession {
    fn question(&self, id: QuestionId) -> Option<&Question> {
        self.questions.iter().find(|q| q.id() == id)
    }
}

struct Shared {
    clock: Clock,
    attempts: Arc<dyn AttemptRepository>,
    scoring: ScoringService,
    live: StdMutex<HashMap<SessionId, Arc<LiveSession>>>,
}

impl Shared {
    fn live_map(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<LiveSession>>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn persist(&self, session: &Session) -> Result<(), SessionError> {
        self.attempts
            .save_attempt(&AttemptHeader::from_session(session))
            .await?;
        self.attempts
            .submit_answers(session.id(), session.answers())
            .await?;
        Ok(())
    }

    /// Spawn scoring for a finished session and drop it from the live set.
    fn hand_off(
        &self,
        live: &Arc<LiveSession>,
        session: Session,
    ) -> JoinHandle<Result<Vec<ScoreSummary>, SessionError>> {
        self.live_map().remove(&live.id);

        let scoring = self.scoring.clone();
        let live = Arc::clone(live);
        tokio::spawn(async move {
            let result = scoring.finalize(session, &live.questions).await;
            match &result {
                Ok(summaries) => {
                    live.updates.send_replace(LiveUpdate::Scored(summaries.clone()));
                }
                Err(err) => {
                    tracing::error!(session = %live.id, error = %err, "scoring failed");
                    live.updates
                        .send_replace(LiveUpdate::ScoringFailed(err.to_string()));
                }
            }
            result
        })
    }
}

/// Connects a session's countdown to its tracker.
struct LiveTimer {
    shared: Arc<Shared>,
    live: Arc<LiveSession>,
}

#[async_trait]
impl CountdownTarget for LiveTimer {
    async fn tick(&self, elapsed_secs: u32) -> TickOutcome {
        let mut state = self.live.state.lock().await;
        if state.handed_off {
            return TickOutcome::Inactive(state.tracker.status());
        }
        let outcome = state.tracker.tick(elapsed_secs, self.shared.clock.now());
        match outcome {
            TickOutcome::Running { remaining_secs }
                if remaining_secs % CHECKPOINT_EVERY_SECS == 0 =>
            {
                // Written under the lock so it cannot land after a terminal write.
                let header = AttemptHeader::from_session(state.tracker.session());
                if let Err(err) = self.shared.attempts.save_attempt(&header).await {
                    tracing::warn!(session = %self.live.id, error = %err, "countdown checkpoint failed");
                }
            }
            TickOutcome::Expired => {
                self.live
                    .updates
                    .send_replace(LiveUpdate::Status(SessionStatus::Expired));
            }
            TickOutcome::Running { .. } | TickOutcome::Inactive(_) => {}
        }
        outcome
    }

    async fn on_expired(&self) {
        let mut state = self.live.state.lock().await;
        if state.handed_off {
            return;
        }
        let session = state.tracker.session().clone();
        if let Err(err) = self.shared.persist(&session).await {
            // Left live so a later submit can retry the hand-off.
            tracing::error!(session = %self.live.id, error = %err, "failed to persist expired session");
            return;
        }
        state.handed_off = true;
        drop(state);
        drop(self.shared.hand_off(&self.live, session));
    }
}

/// Runs live attempts: answers, navigation, the countdown and submission.
#[derive(Clone)]
pub struct AttemptService {
    shared: Arc<Shared>,
    countdown: Arc<CountdownController>,
}

impl AttemptService {
    #[must_use]
    pub fn new(
        clock: Clock,
        attempts: Arc<dyn AttemptRepository>,
        scoring: ScoringService,
        countdown: Arc<CountdownController>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                clock,
                attempts,
                scoring,
                live: StdMutex::new(HashMap::new()),
            }),
            countdown,
        }
    }

    fn live(&self, id: SessionId) -> Result<Arc<LiveSession>, SessionError> {
        self.shared
            .live_map()
            .get(&id)
            .cloned()
            .ok_or(SessionError::NotLive(id))
    }

    fn register(&self, tracker: AttemptTracker, questions: Vec<Question>) -> Result<SessionId, SessionError> {
        let id = tracker.session().id();
        let status = tracker.status();
        let live = Arc::new(LiveSession {
            id,
            state: Mutex::new(LiveState {
                tracker,
                handed_off: false,
            }),
            questions: questions.into(),
            updates: watch::channel(LiveUpdate::Status(status)).0,
        });

        {
            let mut map = self.shared.live_map();
            if map.contains_key(&id) {
                return Err(CountdownError::AlreadyRunning(id).into());
            }
            map.insert(id, Arc::clone(&live));
        }

        let timer = Arc::new(LiveTimer {
            shared: Arc::clone(&self.shared),
            live,
        });
        if let Err(err) = self.countdown.start(id, timer) {
            self.shared.live_map().remove(&id);
            return Err(err.into());
        }
        Ok(id)
    }

    /// Start a freshly assembled session and its countdown.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Tracker` unless the session is `Created`,
    /// `SessionError::Storage` if the start cannot be persisted, or
    /// `SessionError::Countdown` if the session is already live.
    pub async fn begin(&self, assembled: Assembled) -> Result<SessionId, SessionError> {
        let mut tracker = AttemptTracker::new(assembled.session);
        tracker.start(self.shared.clock.now())?;
        self.shared
            .attempts
            .save_attempt(&AttemptHeader::from_session(tracker.session()))
            .await?;

        let id = self.register(tracker, assembled.questions)?;
        tracing::info!(session = %id, "session started");
        Ok(id)
    }

    /// Make a rehydrated in-progress session live and restart its countdown.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Tracker` unless the session is `InProgress`, or
    /// `SessionError::Countdown` if it is already live.
    pub fn attach(&self, session: Session, questions: Vec<Question>) -> Result<SessionId, SessionError> {
        if session.status() != SessionStatus::InProgress {
            return Err(TrackerError::InvalidState {
                operation: "attach",
                status: session.status(),
            }
            .into());
        }
        let id = self.register(AttemptTracker::new(session), questions)?;
        tracing::info!(session = %id, "session resumed");
        Ok(id)
    }

    /// Record (or overwrite) the answer to a question and persist it.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotLive` for unknown sessions,
    /// `SessionError::Validation` for an option outside the question's range,
    /// `SessionError::Tracker` if the session is not in progress or the
    /// question is not part of it, or `SessionError::Storage`.
    pub async fn record_answer(
        &self,
        id: SessionId,
        question_id: QuestionId,
        option: usize,
    ) -> Result<(), SessionError> {
        let live = self.live(id)?;
        if let Some(question) = live.question(question_id) {
            if option >= question.options().len() {
                return Err(ValidationError::OptionOutOfRange {
                    question: question_id,
                    option,
                    options: question.options().len(),
                }
                .into());
            }
        }

        let mut state = live.state.lock().await;
        let mut next = state.tracker.clone();
        let record = next
            .record_answer(question_id, option, self.shared.clock.now())?
            .clone();
        self.shared.attempts.submit_answers(id, &[record]).await?;
        state.tracker = next;
        Ok(())
    }

    /// Reset a question to unanswered and persist it.
    ///
    /// # Errors
    ///
    /// Same conditions as [`AttemptService::record_answer`].
    pub async fn clear_answer(&self, id: SessionId, question_id: QuestionId) -> Result<(), SessionError> {
        let live = self.live(id)?;
        let mut state = live.state.lock().await;
        let mut next = state.tracker.clone();
        let record = next.clear_answer(question_id)?.clone();
        self.shared.attempts.submit_answers(id, &[record]).await?;
        state.tracker = next;
        Ok(())
    }

    /// Move the current-question pointer. Returns the new index.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotLive` for unknown sessions.
    pub async fn navigate(&self, id: SessionId, target: Navigation) -> Result<usize, SessionError> {
        let live = self.live(id)?;
        let mut state = live.state.lock().await;
        Ok(state.tracker.navigate(target))
    }

    /// Finish the attempt and hand it to scoring.
    ///
    /// Persistence happens under the session lock and the transition commits
    /// only once it succeeds. An expired session whose hand-off failed is
    /// retried here.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotLive` for unknown sessions,
    /// `SessionError::Tracker` if the session is not in progress, or
    /// `SessionError::Storage` if persistence fails.
    pub async fn submit(&self, id: SessionId) -> Result<SubmitReceipt, SessionError> {
        let live = self.live(id)?;
        let mut state = live.state.lock().await;
        if state.handed_off {
            return Err(SessionError::NotLive(id));
        }

        let mut next = state.tracker.clone();
        if next.status() != SessionStatus::Expired {
            next.submit(self.shared.clock.now())?;
        }
        self.shared.persist(next.session()).await?;

        let session = next.session().clone();
        let status = session.status();
        state.tracker = next;
        state.handed_off = true;
        drop(state);

        self.countdown.cancel(id);
        live.updates.send_replace(LiveUpdate::Status(status));
        tracing::info!(session = %id, %status, "session submitted");

        let scoring = self.shared.hand_off(&live, session);
        Ok(SubmitReceipt {
            session_id: id,
            status,
            scoring,
        })
    }

    /// Stop charging time and checkpoint the remaining budget.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotLive`, `SessionError::Tracker` if the session
    /// is no longer in progress, `SessionError::Countdown`, or
    /// `SessionError::Storage`.
    pub async fn pause(&self, id: SessionId) -> Result<(), SessionError> {
        let live = self.live(id)?;
        let state = live.state.lock().await;
        if state.handed_off {
            return Err(SessionError::NotLive(id));
        }
        let status = state.tracker.status();
        if status != SessionStatus::InProgress {
            return Err(TrackerError::InvalidState {
                operation: "pause",
                status,
            }
            .into());
        }
        self.countdown.pause(id)?;
        self.shared
            .attempts
            .save_attempt(&AttemptHeader::from_session(state.tracker.session()))
            .await?;
        Ok(())
    }

    /// Resume charging time.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotLive` or `SessionError::Countdown`.
    pub fn resume(&self, id: SessionId) -> Result<(), SessionError> {
        self.live(id)?;
        self.countdown.resume(id)?;
        Ok(())
    }

    /// Leave the attempt unfinished: cancel the countdown, persist what there
    /// is, and drop it from the live set. It can be resumed later.
    ///
    /// A session that expired while the abandon was waiting is handed to
    /// scoring instead; the returned session then carries `Expired`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotLive` or `SessionError::Storage`.
    pub async fn abandon(&self, id: SessionId) -> Result<Session, SessionError> {
        let live = self.live(id)?;
        self.countdown.cancel(id);
        let mut state = live.state.lock().await;
        if state.handed_off {
            return Err(SessionError::NotLive(id));
        }
        let session = state.tracker.session().clone();
        self.shared.persist(&session).await?;
        state.handed_off = true;
        drop(state);

        if session.status().is_finished() {
            tracing::info!(session = %id, status = %session.status(), "session finished before it was abandoned");
            drop(self.shared.hand_off(&live, session.clone()));
        } else {
            self.shared.live_map().remove(&id);
            tracing::info!(session = %id, remaining_secs = session.remaining_secs(), "session abandoned");
        }
        Ok(session)
    }

    /// # Errors
    ///
    /// Returns `SessionError::NotLive` for unknown sessions.
    pub async fn snapshot(&self, id: SessionId) -> Result<LiveSnapshot, SessionError> {
        let live = self.live(id)?;
        let state = live.state.lock().await;
        let session = state.tracker.session().clone();
        let current_question = session
            .current_question_id()
            .and_then(|qid| live.question(qid))
            .cloned();
        Ok(LiveSnapshot {
            session,
            current_question,
        })
    }

    /// # Errors
    ///
    /// Returns `SessionError::NotLive` for unknown sessions.
    pub fn subscribe(&self, id: SessionId) -> Result<watch::Receiver<LiveUpdate>, SessionError> {
        Ok(self.live(id)?.updates.subscribe())
    }

    #[must_use]
    pub fn countdown_phase(&self, id: SessionId) -> Option<CountdownPhase> {
        self.countdown.phase(id)
    }

    #[must_use]
    pub fn is_live(&self, id: SessionId) -> bool {
        self.shared.live_map().contains_key(&id)
    }
}
