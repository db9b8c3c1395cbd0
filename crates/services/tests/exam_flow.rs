use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use exam_core::model::{
    AnswerRecord, AttemptId, ExamType, HistoryAnswer, Question, QuestionId, ScoreSummary,
    Selection, SessionStatus, SubjectId, UserId,
};
use exam_core::report::{TrendGranularity, TrendPeriod};
use exam_core::settings::ExamSettings;
use exam_core::time::{fixed_clock, fixed_now};
use services::{
    AppServices, CountdownConfig, CountdownError, LiveUpdate, SessionError, ValidationError,
};
use storage::repository::{
    AttemptHeader, AttemptRepository, InMemoryRepository, IncompleteAttempt, Storage,
    StorageError, SubmitAck,
};
use tokio::sync::watch;
use tokio::time::sleep;

fn utme() -> ExamType {
    ExamType::new("utme").unwrap()
}

fn user() -> UserId {
    UserId::new("ada").unwrap()
}

fn question(id: u64, subject_id: u64, correct: usize) -> Question {
    let subject = if subject_id == 1 { "Mathematics" } else { "Physics" };
    Question::new(
        QuestionId::new(id),
        SubjectId::new(subject_id),
        subject,
        2020,
        utme(),
        format!("Question {id}"),
        vec!["a".into(), "b".into(), "c".into(), "d".into()],
        correct,
        None,
    )
    .unwrap()
}

fn selections() -> Vec<Selection> {
    vec![
        Selection::new(SubjectId::new(1), 2020),
        Selection::new(SubjectId::new(2), 2020),
    ]
}

async fn seeded(storage: &Storage, settings: ExamSettings) -> AppServices {
    let services =
        AppServices::from_storage(storage, fixed_clock(), settings, CountdownConfig::default());
    services
        .catalog()
        .import(&[
            question(1, 1, 1),
            question(2, 1, 1),
            question(3, 1, 2),
            question(4, 2, 0),
            question(5, 2, 3),
        ])
        .await
        .unwrap();
    services
}

#[tokio::test(start_paused = true)]
async fn answered_and_submitted_session_is_scored_per_subject() {
    let storage = Storage::in_memory();
    let services = seeded(&storage, ExamSettings::standard()).await;
    let attempts = services.attempts();

    let assembled = services
        .assembler()
        .assemble(user(), utme(), selections())
        .await
        .unwrap();
    let id = attempts.begin(assembled).await.unwrap();
    assert!(attempts.is_live(id));

    attempts.record_answer(id, QuestionId::new(1), 1).await.unwrap();
    attempts.record_answer(id, QuestionId::new(2), 0).await.unwrap();
    attempts.record_answer(id, QuestionId::new(4), 0).await.unwrap();

    let err = attempts
        .record_answer(id, QuestionId::new(3), 7)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::Validation(ValidationError::OptionOutOfRange { options: 4, .. })
    ));

    let receipt = attempts.submit(id).await.unwrap();
    assert_eq!(receipt.status, SessionStatus::Submitted);
    let summaries = receipt.scoring.await.unwrap().unwrap();

    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].subject_id, SubjectId::new(1));
    assert_eq!((summaries[0].correct_count, summaries[0].total_questions), (1, 3));
    assert_eq!(summaries[0].percentage, 33);
    assert_eq!((summaries[1].correct_count, summaries[1].total_questions), (1, 2));
    assert_eq!(summaries[1].percentage, 50);

    assert!(!attempts.is_live(id));
    assert!(matches!(
        attempts.record_answer(id, QuestionId::new(3), 0).await,
        Err(SessionError::NotLive(_))
    ));

    let header = storage.attempts.get_attempt(id).await.unwrap();
    assert_eq!(header.status, SessionStatus::Scored);

    let overall = services.scoring().overall(id).await.unwrap().unwrap();
    assert_eq!((overall.correct_count, overall.total_questions), (2, 5));
    assert_eq!(overall.percentage, 40);

    let rollup = services.history().exam_rollup(&user()).await.unwrap();
    assert!(rollup.is_clean());
    assert_eq!(rollup.value.len(), 1);
    let row = &rollup.value[0];
    assert_eq!(row.attempt_id, id);
    assert_eq!(row.total_questions, 5);
    assert_eq!(row.correct_answers, 2);
    assert_eq!(row.distinct_subject_count, 2);

    let trend = services
        .history()
        .trend(&user(), TrendGranularity::Day)
        .await
        .unwrap();
    assert_eq!(trend.value.len(), 2);
    assert_eq!(trend.value[0].period, TrendPeriod::Day(fixed_now().date_naive()));
}

#[tokio::test(start_paused = true)]
async fn expired_session_is_scored_without_a_submit() {
    let storage = Storage::in_memory();
    let settings = ExamSettings::standard().with_budget(utme(), 3).unwrap();
    let services = seeded(&storage, settings).await;
    let attempts = services.attempts();

    let assembled = services
        .assembler()
        .assemble(user(), utme(), vec![Selection::new(SubjectId::new(1), 2020)])
        .await
        .unwrap();
    let id = attempts.begin(assembled).await.unwrap();
    attempts.record_answer(id, QuestionId::new(2), 1).await.unwrap();
    let mut updates = attempts.subscribe(id).unwrap();

    let done = updates
        .wait_for(|u| matches!(u, LiveUpdate::Scored(_) | LiveUpdate::ScoringFailed(_)))
        .await
        .unwrap()
        .clone();
    let LiveUpdate::Scored(summaries) = done else {
        panic!("scoring failed: {done:?}");
    };
    assert_eq!(summaries.len(), 1);
    assert_eq!((summaries[0].correct_count, summaries[0].total_questions), (1, 3));

    assert!(!attempts.is_live(id));
    let header = storage.attempts.get_attempt(id).await.unwrap();
    assert_eq!(header.status, SessionStatus::Scored);
    assert_eq!(header.remaining_secs, 0);
}

#[tokio::test(start_paused = true)]
async fn abandoned_session_resumes_with_its_answers() {
    let storage = Storage::in_memory();
    let services = seeded(&storage, ExamSettings::standard()).await;
    let attempts = services.attempts();

    let assembled = services
        .assembler()
        .assemble(user(), utme(), selections())
        .await
        .unwrap();
    let id = attempts.begin(assembled).await.unwrap();
    attempts.record_answer(id, QuestionId::new(5), 3).await.unwrap();
    let abandoned = attempts.abandon(id).await.unwrap();
    assert!(!attempts.is_live(id));

    // New content arrives while the attempt is parked.
    services
        .catalog()
        .import(&[question(6, 1, 0)])
        .await
        .unwrap();

    let incomplete = services.resume().list_incomplete(&user()).await.unwrap();
    assert_eq!(incomplete.len(), 2);
    assert!(incomplete.iter().all(|entry| entry.attempt_id == id));
    let physics = incomplete
        .iter()
        .find(|entry| entry.subject_id == SubjectId::new(2))
        .unwrap();
    assert_eq!(physics.answered_question_ids, vec![QuestionId::new(5)]);

    let stranger = UserId::new("grace").unwrap();
    assert!(matches!(
        services.resume().resume(&stranger, id).await,
        Err(SessionError::Forbidden(_))
    ));

    let resumed = services.resume().resume(&user(), id).await.unwrap();
    assert!(resumed.dropped.is_empty());
    assert_eq!(resumed.session.status(), SessionStatus::InProgress);
    assert_eq!(resumed.session.len(), 6);
    assert_eq!(resumed.session.remaining_secs(), abandoned.remaining_secs());
    assert_eq!(
        resumed
            .session
            .answer_for(QuestionId::new(5))
            .and_then(|a| a.selected_option),
        Some(3)
    );
    assert!(attempts.is_live(id));

    let receipt = attempts.submit(id).await.unwrap();
    let summaries = receipt.scoring.await.unwrap().unwrap();
    assert_eq!(summaries[0].total_questions, 4);
    assert_eq!(summaries[1].correct_count, 1);
}

#[tokio::test(start_paused = true)]
async fn paused_session_can_still_be_submitted() {
    let storage = Storage::in_memory();
    let services = seeded(&storage, ExamSettings::standard()).await;
    let attempts = services.attempts();

    let assembled = services
        .assembler()
        .assemble(user(), utme(), selections())
        .await
        .unwrap();
    let id = attempts.begin(assembled).await.unwrap();
    attempts.pause(id).await.unwrap();

    let snapshot = attempts.snapshot(id).await.unwrap();
    assert_eq!(snapshot.current_question.map(|q| q.id()), Some(QuestionId::new(1)));

    attempts.resume(id).unwrap();
    let receipt = attempts.submit(id).await.unwrap();
    assert_eq!(receipt.status, SessionStatus::Submitted);
    assert!(attempts.countdown_phase(id).is_none());
    receipt.scoring.await.unwrap().unwrap();
}

/// Attempt storage whose in-progress header writes and answer writes can be
/// made to take a while.
#[derive(Default)]
struct SlowAttempts {
    inner: InMemoryRepository,
    checkpoint_delay_ms: AtomicU64,
    answer_delay_ms: AtomicU64,
}

impl SlowAttempts {
    fn slow_checkpoints(&self, delay: Duration) {
        self.checkpoint_delay_ms
            .store(u64::try_from(delay.as_millis()).unwrap(), Ordering::SeqCst);
    }

    fn slow_answers(&self, delay: Duration) {
        self.answer_delay_ms
            .store(u64::try_from(delay.as_millis()).unwrap(), Ordering::SeqCst);
    }

    async fn wait(delay_ms: &AtomicU64) {
        let ms = delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait]
impl AttemptRepository for SlowAttempts {
    async fn create_attempt(
        &self,
        user_id: &UserId,
        exam_type: &ExamType,
        created_at: DateTime<Utc>,
    ) -> Result<AttemptId, StorageError> {
        self.inner.create_attempt(user_id, exam_type, created_at).await
    }

    async fn save_attempt(&self, header: &AttemptHeader) -> Result<(), StorageError> {
        if header.status == SessionStatus::InProgress {
            Self::wait(&self.checkpoint_delay_ms).await;
        }
        self.inner.save_attempt(header).await
    }

    async fn get_attempt(&self, id: AttemptId) -> Result<AttemptHeader, StorageError> {
        self.inner.get_attempt(id).await
    }

    async fn replace_answer_sheet(
        &self,
        id: AttemptId,
        answers: &[AnswerRecord],
    ) -> Result<SubmitAck, StorageError> {
        self.inner.replace_answer_sheet(id, answers).await
    }

    async fn submit_answers(
        &self,
        id: AttemptId,
        answers: &[AnswerRecord],
    ) -> Result<SubmitAck, StorageError> {
        Self::wait(&self.answer_delay_ms).await;
        self.inner.submit_answers(id, answers).await
    }

    async fn fetch_incomplete_attempts(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<IncompleteAttempt>, StorageError> {
        self.inner.fetch_incomplete_attempts(user_id).await
    }

    async fn attempt_answers(
        &self,
        id: AttemptId,
        subject_id: SubjectId,
        year: u16,
    ) -> Result<Vec<AnswerRecord>, StorageError> {
        self.inner.attempt_answers(id, subject_id, year).await
    }

    async fn fetch_answer_history(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<HistoryAnswer>, StorageError> {
        self.inner.fetch_answer_history(user_id).await
    }
}

fn slow_storage() -> (Storage, Arc<SlowAttempts>) {
    let repo = InMemoryRepository::new();
    let slow = Arc::new(SlowAttempts {
        inner: repo.clone(),
        ..SlowAttempts::default()
    });
    let storage = Storage {
        questions: Arc::new(repo.clone()),
        attempts: Arc::clone(&slow) as Arc<dyn AttemptRepository>,
        scores: Arc::new(repo),
    };
    (storage, slow)
}

/// Two-second mathematics session with one correct answer recorded. An answer
/// write started at 1.5s holds the session until 2.5s, so the expiring tick
/// due at 2.0s queues behind it and anything called at 2.2s queues behind the
/// tick, ahead of the expiry hand-off.
async fn expiring_behind_a_slow_answer() -> (Storage, AppServices, AttemptId) {
    let (storage, slow) = slow_storage();
    let settings = ExamSettings::standard().with_budget(utme(), 2).unwrap();
    let services = seeded(&storage, settings).await;
    let attempts = services.attempts();

    let assembled = services
        .assembler()
        .assemble(user(), utme(), vec![Selection::new(SubjectId::new(1), 2020)])
        .await
        .unwrap();
    let id = attempts.begin(assembled).await.unwrap();
    attempts.record_answer(id, QuestionId::new(1), 1).await.unwrap();

    slow.slow_answers(Duration::from_secs(1));
    sleep(Duration::from_millis(1_500)).await;
    let writer = Arc::clone(&attempts);
    tokio::spawn(async move { writer.record_answer(id, QuestionId::new(2), 0).await });
    sleep(Duration::from_millis(700)).await;
    (storage, services, id)
}

async fn scored(updates: &mut watch::Receiver<LiveUpdate>) -> Vec<ScoreSummary> {
    let done = updates
        .wait_for(|u| matches!(u, LiveUpdate::Scored(_) | LiveUpdate::ScoringFailed(_)))
        .await
        .unwrap()
        .clone();
    match done {
        LiveUpdate::Scored(summaries) => summaries,
        other => panic!("scoring failed: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn submit_during_a_slow_checkpoint_stays_scored() {
    let (storage, slow) = slow_storage();
    let settings = ExamSettings::standard().with_budget(utme(), 31).unwrap();
    let services = seeded(&storage, settings).await;
    let attempts = services.attempts();

    let assembled = services
        .assembler()
        .assemble(user(), utme(), selections())
        .await
        .unwrap();
    let id = attempts.begin(assembled).await.unwrap();

    // The first tick reaches 30s and checkpoints from 1.0s until 1.5s.
    slow.slow_checkpoints(Duration::from_millis(500));
    sleep(Duration::from_millis(1_200)).await;
    let receipt = attempts.submit(id).await.unwrap();
    assert_eq!(receipt.status, SessionStatus::Submitted);
    receipt.scoring.await.unwrap().unwrap();

    sleep(Duration::from_secs(2)).await;
    let header = storage.attempts.get_attempt(id).await.unwrap();
    assert_eq!(header.status, SessionStatus::Scored);
    assert_eq!(header.remaining_secs, 30);

    assert!(services.resume().list_incomplete(&user()).await.unwrap().is_empty());
    assert!(matches!(
        services.resume().resume(&user(), id).await,
        Err(SessionError::Tracker(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn abandon_racing_expiry_still_scores_the_attempt() {
    let (storage, services, id) = expiring_behind_a_slow_answer().await;
    let attempts = services.attempts();
    let mut updates = attempts.subscribe(id).unwrap();

    let session = attempts.abandon(id).await.unwrap();
    assert_eq!(session.status(), SessionStatus::Expired);
    assert_eq!(session.remaining_secs(), 0);
    assert!(!attempts.is_live(id));

    let summaries = scored(&mut updates).await;
    assert_eq!((summaries[0].correct_count, summaries[0].total_questions), (1, 3));

    let header = storage.attempts.get_attempt(id).await.unwrap();
    assert_eq!(header.status, SessionStatus::Scored);
    assert!(services.resume().list_incomplete(&user()).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn submit_racing_expiry_scores_once_as_expired() {
    let (storage, services, id) = expiring_behind_a_slow_answer().await;
    let attempts = services.attempts();

    let receipt = attempts.submit(id).await.unwrap();
    assert_eq!(receipt.status, SessionStatus::Expired);
    let summaries = receipt.scoring.await.unwrap().unwrap();
    assert_eq!(summaries.len(), 1);

    sleep(Duration::from_secs(2)).await;
    assert!(!attempts.is_live(id));
    let header = storage.attempts.get_attempt(id).await.unwrap();
    assert_eq!(header.status, SessionStatus::Scored);
    assert_eq!(header.finished_at, Some(fixed_now()));
    let stored = services.scoring().scores_for(id).await.unwrap();
    assert_eq!(stored, summaries);
}

#[tokio::test(start_paused = true)]
async fn pause_racing_expiry_is_refused() {
    let (storage, services, id) = expiring_behind_a_slow_answer().await;
    let attempts = services.attempts();
    let mut updates = attempts.subscribe(id).unwrap();

    assert!(matches!(attempts.pause(id).await, Err(SessionError::Tracker(_))));
    assert_eq!(scored(&mut updates).await.len(), 1);

    let header = storage.attempts.get_attempt(id).await.unwrap();
    assert_eq!(header.status, SessionStatus::Scored);
    assert_eq!(header.remaining_secs, 0);
}

#[tokio::test(start_paused = true)]
async fn resuming_a_live_attempt_leaves_it_untouched() {
    let storage = Storage::in_memory();
    let services = seeded(&storage, ExamSettings::standard()).await;
    let attempts = services.attempts();

    let assembled = services
        .assembler()
        .assemble(user(), utme(), selections())
        .await
        .unwrap();
    let id = attempts.begin(assembled).await.unwrap();
    attempts.record_answer(id, QuestionId::new(4), 0).await.unwrap();
    sleep(Duration::from_millis(3_500)).await;
    attempts.pause(id).await.unwrap();
    let before = storage.attempts.get_attempt(id).await.unwrap();

    assert!(matches!(
        services.resume().resume(&user(), id).await,
        Err(SessionError::Countdown(CountdownError::AlreadyRunning(_)))
    ));
    assert_eq!(storage.attempts.get_attempt(id).await.unwrap(), before);
    assert!(attempts.is_live(id));
    let snapshot = attempts.snapshot(id).await.unwrap();
    assert_eq!(snapshot.session.remaining_secs(), before.remaining_secs);
    assert_eq!(snapshot.session.answered_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn resuming_with_no_time_left_scores_instead() {
    let storage = Storage::in_memory();
    let services = seeded(&storage, ExamSettings::standard()).await;
    let attempts = services.attempts();

    let assembled = services
        .assembler()
        .assemble(user(), utme(), vec![Selection::new(SubjectId::new(2), 2020)])
        .await
        .unwrap();
    let id = attempts.begin(assembled).await.unwrap();
    attempts.record_answer(id, QuestionId::new(5), 3).await.unwrap();
    attempts.abandon(id).await.unwrap();

    let mut header = storage.attempts.get_attempt(id).await.unwrap();
    header.remaining_secs = 0;
    storage.attempts.save_attempt(&header).await.unwrap();

    let resumed = services.resume().resume(&user(), id).await.unwrap();
    assert_eq!(resumed.session.status(), SessionStatus::Scored);
    assert_eq!(resumed.session.remaining_secs(), 0);
    let scores = resumed.scores.unwrap();
    assert_eq!((scores[0].correct_count, scores[0].total_questions), (1, 2));
    assert!(!attempts.is_live(id));

    let header = storage.attempts.get_attempt(id).await.unwrap();
    assert_eq!(header.status, SessionStatus::Scored);
    assert!(services.resume().list_incomplete(&user()).await.unwrap().is_empty());
}
