use std::sync::Arc;

use quiz_core::model::{Language, Subject, SubjectId, UserProfile};
use storage::repository::{ProfileRepository, Storage};
use tracing::info;

use crate::Clock;
use crate::config::QuizConfig;
use crate::error::AppServicesError;
use crate::generator::{HttpQuestionGenerator, QuestionGenerator};
use crate::quiz::QuizSessionService;
use crate::recovery_service::RecoveryService;
use crate::stats_service::StatsService;

/// Assembles the stores, the question provider and per-subject sessions.
#[derive(Clone)]
pub struct AppServices {
    clock: Clock,
    language: Language,
    stats: Arc<StatsService>,
    recovery: Arc<RecoveryService>,
    generator: Arc<dyn QuestionGenerator>,
    profile: Arc<dyn ProfileRepository>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage and the HTTP provider.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails.
    pub async fn new_sqlite(config: &QuizConfig, clock: Clock) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(&config.db_url).await?;
        let generator = HttpQuestionGenerator::new(config.generator.clone());
        info!(
            db_url = %config.db_url,
            language = config.language.code(),
            generation_enabled = generator.enabled(),
            "app services ready"
        );
        Ok(Self::from_storage(
            &storage,
            Arc::new(generator),
            config.language,
            clock,
        ))
    }

    /// Build services over in-memory storage with the given provider.
    #[must_use]
    pub fn in_memory(generator: Arc<dyn QuestionGenerator>, clock: Clock) -> Self {
        Self::from_storage(&Storage::in_memory(), generator, Language::default(), clock)
    }

    #[must_use]
    pub fn from_storage(
        storage: &Storage,
        generator: Arc<dyn QuestionGenerator>,
        language: Language,
        clock: Clock,
    ) -> Self {
        Self {
            clock,
            language,
            stats: Arc::new(StatsService::new(clock, Arc::clone(&storage.stats))),
            recovery: Arc::new(RecoveryService::new(clock, Arc::clone(&storage.progress))),
            generator,
            profile: Arc::clone(&storage.profile),
        }
    }

    #[must_use]
    pub fn language(&self) -> Language {
        self.language
    }

    #[must_use]
    pub fn stats(&self) -> Arc<StatsService> {
        Arc::clone(&self.stats)
    }

    #[must_use]
    pub fn recovery(&self) -> Arc<RecoveryService> {
        Arc::clone(&self.recovery)
    }

    /// Fresh session for `subject` in the configured language.
    #[must_use]
    pub fn open_quiz(&self, subject: SubjectId) -> QuizSessionService {
        QuizSessionService::new(
            subject,
            self.language,
            Arc::clone(&self.stats),
            Arc::clone(&self.recovery),
            Arc::clone(&self.generator),
            self.clock,
        )
    }

    /// The practice catalogue shown on the dashboard.
    #[must_use]
    pub fn subjects(&self) -> &'static [Subject] {
        &quiz_core::model::SUBJECTS
    }

    /// Signed-in user, if any. Sign-in itself lives outside this crate.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError::Storage` if the profile cannot be read.
    pub async fn current_user(&self) -> Result<Option<UserProfile>, AppServicesError> {
        Ok(self.profile.current_user().await?)
    }
}
