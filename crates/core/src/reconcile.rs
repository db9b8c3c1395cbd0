use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::model::{
    AnswerRecord, AssemblyError, ExamType, Question, QuestionId, Selection, Session, SessionId,
    UserId, validate_selections,
};
use crate::settings::ExamSettings;
use crate::tracker::AttemptTracker;

/// Attempt header the resumed session is rebuilt under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeContext {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub exam_type: ExamType,
    pub selections: Vec<Selection>,
    pub created_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    /// When the attempt is being reopened; stamps `finished_at` if the
    /// persisted clock had already run out.
    pub resumed_at: DateTime<Utc>,
}

/// Output of a reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub session: Session,
    /// Prior answers whose question no longer exists in the fresh set.
    pub dropped: Vec<QuestionId>,
}

/// Rehydrates an interrupted attempt from its prior answers and a fresh
/// question fetch.
#[derive(Debug, Clone, Copy)]
pub struct ResumeReconciler<'a> {
    settings: &'a ExamSettings,
}

impl<'a> ResumeReconciler<'a> {
    #[must_use]
    pub fn new(settings: &'a ExamSettings) -> Self {
        Self { settings }
    }

    /// Merge `prior` answers into `fresh` questions, yielding an `InProgress`
    /// session, or an `Expired` one when the persisted clock is at zero.
    ///
    /// The fresh order is authoritative. Repeated fresh questions keep their
    /// first position; repeated prior answers keep the latest `answered_at`.
    ///
    /// # Errors
    ///
    /// Returns `AssemblyError` if the context has no (or repeated) selections,
    /// or if `fresh` is empty.
    pub fn reconcile(
        &self,
        ctx: ResumeContext,
        prior: &[AnswerRecord],
        fresh: &[Question],
        persisted_remaining_secs: Option<u32>,
    ) -> Result<Reconciled, AssemblyError> {
        validate_selections(&ctx.selections)?;
        if fresh.is_empty() {
            return Err(AssemblyError::NoQuestions);
        }

        let mut latest: HashMap<QuestionId, &AnswerRecord> = HashMap::with_capacity(prior.len());
        for record in prior {
            let keep_existing = latest
                .get(&record.question_id)
                .is_some_and(|existing| existing.answered_at > record.answered_at);
            if !keep_existing {
                latest.insert(record.question_id, record);
            }
        }

        let mut order = Vec::with_capacity(fresh.len());
        let mut fresh_ids = HashSet::with_capacity(fresh.len());
        for question in fresh {
            if fresh_ids.insert(question.id()) {
                order.push(question.id());
            }
        }

        let answers: Vec<AnswerRecord> = order
            .iter()
            .map(|qid| match latest.get(qid) {
                Some(prev) => AnswerRecord {
                    session_id: ctx.session_id,
                    question_id: *qid,
                    selected_option: prev.selected_option,
                    answered_at: prev.selected_option.and(prev.answered_at),
                },
                None => AnswerRecord::unanswered(ctx.session_id, *qid),
            })
            .collect();

        let dropped: Vec<QuestionId> = latest
            .keys()
            .filter(|qid| !fresh_ids.contains(qid))
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if !dropped.is_empty() {
            tracing::info!(
                session = %ctx.session_id,
                dropped = dropped.len(),
                "prior answers no longer match any fresh question"
            );
        }

        let time_limit = self.settings.budget_for(&ctx.exam_type);
        let remaining = persisted_remaining_secs.unwrap_or(time_limit);

        let resumed_at = ctx.resumed_at;
        let session = Session::hydrated(
            ctx.session_id,
            ctx.user_id,
            ctx.exam_type,
            ctx.selections,
            answers,
            ctx.created_at,
            ctx.started_at,
            time_limit,
            remaining,
        );
        if session.remaining_secs() > 0 {
            return Ok(Reconciled { session, dropped });
        }

        // Out of time already; the session is expired, not resumable.
        let mut tracker = AttemptTracker::new(session);
        if let Err(err) = tracker.expire(resumed_at) {
            tracing::warn!(error = %err, "could not expire a reconciled session");
        }
        Ok(Reconciled {
            session: tracker.into_session(),
            dropped,
        })
    }
}
