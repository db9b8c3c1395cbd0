use std::sync::Arc;

use exam_core::settings::ExamSettings;
use storage::repository::Storage;

use crate::Clock;
use crate::catalog::Catalog;
use crate::countdown::{CountdownConfig, CountdownController};
use crate::error::AppServicesError;
use crate::history::HistoryService;
use crate::sessions::{AttemptService, ResumeService, ScoringService, SessionAssembler};

/// Assembles app-facing services over one storage backend.
#[derive(Clone)]
pub struct AppServices {
    catalog: Catalog,
    assembler: Arc<SessionAssembler>,
    attempts: Arc<AttemptService>,
    resume: Arc<ResumeService>,
    scoring: Arc<ScoringService>,
    history: Arc<HistoryService>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if the database cannot be opened or migrated.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        settings: ExamSettings,
        countdown: CountdownConfig,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::from_storage(&storage, clock, settings, countdown))
    }

    /// Build services over in-memory repositories.
    #[must_use]
    pub fn in_memory(clock: Clock, settings: ExamSettings, countdown: CountdownConfig) -> Self {
        Self::from_storage(&Storage::in_memory(), clock, settings, countdown)
    }

    #[must_use]
    pub fn from_storage(
        storage: &Storage,
        clock: Clock,
        settings: ExamSettings,
        countdown: CountdownConfig,
    ) -> Self {
        let settings = Arc::new(settings);
        let catalog = Catalog::new(Arc::clone(&storage.questions));
        let scoring = ScoringService::new(
            clock,
            Arc::clone(&storage.attempts),
            Arc::clone(&storage.scores),
        );
        let attempts = AttemptService::new(
            clock,
            Arc::clone(&storage.attempts),
            scoring.clone(),
            Arc::new(CountdownController::new(countdown)),
        );
        let assembler = SessionAssembler::new(
            clock,
            Arc::clone(&settings),
            catalog.clone(),
            Arc::clone(&storage.attempts),
        );
        let resume = ResumeService::new(
            clock,
            settings,
            catalog.clone(),
            Arc::clone(&storage.attempts),
            scoring.clone(),
            attempts.clone(),
        );
        let history = HistoryService::new(Arc::clone(&storage.scores), Arc::clone(&storage.attempts));

        Self {
            catalog,
            assembler: Arc::new(assembler),
            attempts: Arc::new(attempts),
            resume: Arc::new(resume),
            scoring: Arc::new(scoring),
            history: Arc::new(history),
        }
    }

    #[must_use]
    pub fn catalog(&self) -> Catalog {
        self.catalog.clone()
    }

    #[must_use]
    pub fn assembler(&self) -> Arc<SessionAssembler> {
        Arc::clone(&self.assembler)
    }

    #[must_use]
    pub fn attempts(&self) -> Arc<AttemptService> {
        Arc::clone(&self.attempts)
    }

    #[must_use]
    pub fn resume(&self) -> Arc<ResumeService> {
        Arc::clone(&self.resume)
    }

    #[must_use]
    pub fn scoring(&self) -> Arc<ScoringService> {
        Arc::clone(&self.scoring)
    }

    #[must_use]
    pub fn history(&self) -> Arc<HistoryService> {
        Arc::clone(&self.history)
    }
}
