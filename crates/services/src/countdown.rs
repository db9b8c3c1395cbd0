//! Per-session countdown timers.
//!
//! Each live session gets at most one timer task. The task charges a fixed
//! number of seconds to its [`CountdownTarget`] once per period and stops when
//! the target reports expiry, when the target is no longer in progress, or when
//! the timer is cancelled. Time spent paused is never charged; the unfinished
//! part of the current period carries over to the resume.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use exam_core::model::SessionId;
use exam_core::tracker::TickOutcome;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::error::CountdownError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownConfig {
    /// Wall time between ticks.
    pub tick: Duration,
    /// Seconds charged against the budget on each tick.
    pub seconds_per_tick: u32,
}

impl Default for CountdownConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            seconds_per_tick: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownPhase {
    Running,
    Paused,
    Expired,
    Cancelled,
}

impl CountdownPhase {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, CountdownPhase::Expired | CountdownPhase::Cancelled)
    }
}

/// What a timer drives.
#[async_trait]
pub trait CountdownTarget: Send + Sync + 'static {
    /// Charge `elapsed_secs` against the remaining budget.
    async fn tick(&self, elapsed_secs: u32) -> TickOutcome;

    /// Called once, after the tick that reported expiry.
    async fn on_expired(&self);
}

/// Owns one timer task. Dropping the handle cancels the task.
struct CountdownHandle {
    generation: u64,
    cancel: CancellationToken,
    pause: watch::Sender<bool>,
    phase: watch::Receiver<CountdownPhase>,
    _task: JoinHandle<()>,
}

impl Drop for CountdownHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

type Registry = Arc<Mutex<HashMap<SessionId, CountdownHandle>>>;

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<SessionId, CountdownHandle>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct CountdownController {
    config: CountdownConfig,
    timers: Registry,
    generations: AtomicU64,
}

impl CountdownController {
    #[must_use]
    pub fn new(config: CountdownConfig) -> Self {
        Self {
            config,
            timers: Arc::new(Mutex::new(HashMap::new())),
            generations: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn config(&self) -> CountdownConfig {
        self.config
    }

    /// Spawn the timer for `session_id`.
    ///
    /// # Errors
    ///
    /// Returns `CountdownError::AlreadyRunning` if the session already has a
    /// timer.
    pub fn start(
        &self,
        session_id: SessionId,
        target: Arc<dyn CountdownTarget>,
    ) -> Result<watch::Receiver<CountdownPhase>, CountdownError> {
        let mut timers = lock(&self.timers);
        if timers.contains_key(&session_id) {
            return Err(CountdownError::AlreadyRunning(session_id));
        }

        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let (pause_tx, pause_rx) = watch::channel(false);
        let (phase_tx, phase_rx) = watch::channel(CountdownPhase::Running);

        let task = tokio::spawn(run_timer(TimerTask {
            config: self.config,
            session_id,
            generation,
            target,
            cancel: cancel.clone(),
            pause: pause_rx,
            phase: phase_tx,
            registry: Arc::clone(&self.timers),
        }));

        timers.insert(
            session_id,
            CountdownHandle {
                generation,
                cancel,
                pause: pause_tx,
                phase: phase_rx.clone(),
                _task: task,
            },
        );
        tracing::debug!(session = %session_id, "countdown started");
        Ok(phase_rx)
    }

    /// Stop charging time. Pausing a paused timer is a no-op.
    ///
    /// The part of the current period already elapsed is kept, so pausing and
    /// resuming faster than the tick period still lets the clock run.
    ///
    /// # Errors
    ///
    /// Returns `CountdownError::NotRunning` if the session has no timer.
    pub fn pause(&self, session_id: SessionId) -> Result<(), CountdownError> {
        self.set_paused(session_id, true)
    }

    /// Resume charging time. The next tick lands once the rest of the period
    /// interrupted by the pause has elapsed.
    ///
    /// # Errors
    ///
    /// Returns `CountdownError::NotRunning` if the session has no timer.
    pub fn resume(&self, session_id: SessionId) -> Result<(), CountdownError> {
        self.set_paused(session_id, false)
    }

    fn set_paused(&self, session_id: SessionId, paused: bool) -> Result<(), CountdownError> {
        let timers = lock(&self.timers);
        let handle = timers
            .get(&session_id)
            .ok_or(CountdownError::NotRunning(session_id))?;
        handle.pause.send_if_modified(|current| {
            let changed = *current != paused;
            *current = paused;
            changed
        });
        Ok(())
    }

    /// Cancel and dispose of the timer. Returns false if there was none.
    pub fn cancel(&self, session_id: SessionId) -> bool {
        let removed = lock(&self.timers).remove(&session_id);
        match removed {
            Some(handle) => {
                tracing::debug!(session = %session_id, "countdown cancelled");
                drop(handle);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_running(&self, session_id: SessionId) -> bool {
        lock(&self.timers).contains_key(&session_id)
    }

    #[must_use]
    pub fn phase(&self, session_id: SessionId) -> Option<CountdownPhase> {
        lock(&self.timers)
            .get(&session_id)
            .map(|handle| *handle.phase.borrow())
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        lock(&self.timers).len()
    }
}

impl Default for CountdownController {
    fn default() -> Self {
        Self::new(CountdownConfig::default())
    }
}

impl Drop for CountdownController {
    fn drop(&mut self) {
        // Tasks hold the registry too, so clear it to release the handles.
        lock(&self.timers).clear();
    }
}

//
// ─── TIMER TASK ────────────────────────────────────────────────────────────────
//

struct TimerTask {
    config: CountdownConfig,
    session_id: SessionId,
    generation: u64,
    target: Arc<dyn CountdownTarget>,
    cancel: CancellationToken,
    pause: watch::Receiver<bool>,
    phase: watch::Sender<CountdownPhase>,
    registry: Registry,
}

impl TimerTask {
    fn finish(&self, phase: CountdownPhase) {
        self.phase.send_replace(phase);
        let mut timers = lock(&self.registry);
        let own = timers
            .get(&self.session_id)
            .is_some_and(|handle| handle.generation == self.generation);
        if own {
            timers.remove(&self.session_id);
        }
    }

    /// Returns false if the timer was cancelled while paused.
    async fn wait_while_paused(&mut self) -> bool {
        loop {
            let paused = *self.pause.borrow_and_update();
            if !paused {
                return true;
            }
            self.phase.send_replace(CountdownPhase::Paused);
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return false,
                changed = self.pause.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }
}

async fn run_timer(mut task: TimerTask) {
    let period = task.config.tick;
    let charge = task.config.seconds_per_tick;
    // Wall time still owed on the current period.
    let mut owed = period;

    loop {
        if !task.wait_while_paused().await {
            task.finish(CountdownPhase::Cancelled);
            return;
        }
        task.phase.send_replace(CountdownPhase::Running);
        let mut due = Instant::now() + owed;

        loop {
            tokio::select! {
                biased;
                () = task.cancel.cancelled() => {
                    task.finish(CountdownPhase::Cancelled);
                    return;
                }
                changed = task.pause.changed() => {
                    if changed.is_err() {
                        task.finish(CountdownPhase::Cancelled);
                        return;
                    }
                    if *task.pause.borrow() {
                        owed = due.saturating_duration_since(Instant::now());
                        break;
                    }
                }
                () = sleep_until(due) => {
                    due = Instant::now() + period;
                    match task.target.tick(charge).await {
                        TickOutcome::Running { .. } => {}
                        TickOutcome::Expired => {
                            tracing::info!(session = %task.session_id, "countdown expired");
                            task.phase.send_replace(CountdownPhase::Expired);
                            task.target.on_expired().await;
                            task.finish(CountdownPhase::Expired);
                            return;
                        }
                        TickOutcome::Inactive(status) => {
                            tracing::debug!(session = %task.session_id, %status, "countdown stopped");
                            task.finish(CountdownPhase::Cancelled);
                            return;
                        }
                    }
                }
            }
        }
    }
}
