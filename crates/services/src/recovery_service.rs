use std::sync::Arc;

use quiz_core::model::{Difficulty, PersistedSession, QuizState, SessionMode, SubjectId};
use storage::repository::{ProgressRepository, StorageError};
use tracing::{debug, warn};

use crate::Clock;
use crate::error::RecoveryError;

/// Saved practice sessions, one slot per subject.
#[derive(Clone)]
pub struct RecoveryService {
    clock: Clock,
    repo: Arc<dyn ProgressRepository>,
}

impl RecoveryService {
    #[must_use]
    pub fn new(clock: Clock, repo: Arc<dyn ProgressRepository>) -> Self {
        Self { clock, repo }
    }

    /// Whether the subject's slot holds anything, even an unreadable blob.
    ///
    /// # Errors
    ///
    /// Returns `RecoveryError::Storage` if the backend cannot be read.
    pub async fn has_saved_session(&self, subject: &SubjectId) -> Result<bool, RecoveryError> {
        Ok(self.repo.has_progress(subject).await?)
    }

    /// Write a snapshot of a practice session. Exam sessions are never written.
    ///
    /// Returns whether a snapshot was stored.
    ///
    /// # Errors
    ///
    /// Returns `RecoveryError::Storage` if the snapshot cannot be written.
    pub async fn save(
        &self,
        subject: &SubjectId,
        difficulty: Difficulty,
        mode: SessionMode,
        state: &QuizState,
    ) -> Result<bool, RecoveryError> {
        if mode == SessionMode::Exam {
            debug!(%subject, "exam sessions are not saved");
            return Ok(false);
        }
        let snapshot = PersistedSession {
            subject: subject.clone(),
            difficulty,
            mode,
            state: state.clone(),
            date: self.clock.now(),
        };
        self.repo.save_progress(&snapshot).await?;
        debug!(%subject, questions = state.len(), answered = state.answered_count(), "progress saved");
        Ok(true)
    }

    /// Load and check the snapshot for `subject`.
    ///
    /// # Errors
    ///
    /// Returns `RecoveryError::Corrupt` or `RecoveryError::Snapshot` if the
    /// stored blob cannot be resumed; the blob stays in storage.
    pub async fn load(&self, subject: &SubjectId) -> Result<Option<PersistedSession>, RecoveryError> {
        let snapshot = match self.repo.load_progress(subject).await {
            Ok(snapshot) => snapshot,
            Err(StorageError::Corrupt { key, reason }) => {
                warn!(%key, %reason, "saved session does not parse");
                return Err(RecoveryError::Corrupt(reason));
            }
            Err(err) => return Err(err.into()),
        };
        let Some(snapshot) = snapshot else {
            return Ok(None);
        };
        if let Err(err) = snapshot.validate_for(subject) {
            warn!(%subject, error = %err, "saved session is not resumable");
            return Err(err.into());
        }
        Ok(Some(snapshot))
    }

    /// # Errors
    ///
    /// Returns `RecoveryError::Storage` if the slot cannot be removed.
    pub async fn clear(&self, subject: &SubjectId) -> Result<(), RecoveryError> {
        self.repo.clear_progress(subject).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiz_core::model::{QuestionDraft, QuestionId};
    use quiz_core::time::fixed_clock;
    use storage::keys::progress_key;
    use storage::repository::{InMemoryStore, KeyValueStore, Storage};

    fn state() -> QuizState {
        let question = QuestionDraft {
            id: QuestionId::new("q1"),
            question_text: "Synonym of rapid?".into(),
            options: vec!["slow".into(), "fast".into()],
            correct_answer_index: 1,
            explanation: String::new(),
            explanation_summary: None,
            subject: SubjectId::new("english"),
            difficulty: Difficulty::Easy,
        }
        .validate()
        .unwrap();
        let mut state = QuizState::new();
        state.append(vec![question]);
        state
    }

    fn service(store: Arc<InMemoryStore>) -> RecoveryService {
        RecoveryService::new(fixed_clock(), Storage::from_store(store).progress)
    }

    #[tokio::test]
    async fn exam_save_writes_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let svc = service(Arc::clone(&store));
        let saved = svc
            .save(&SubjectId::new("english"), Difficulty::Easy, SessionMode::Exam, &state())
            .await
            .unwrap();
        assert!(!saved);
        assert_eq!(store.len().unwrap(), 0);
    }

    #[tokio::test]
    async fn practice_save_then_load() {
        let store = Arc::new(InMemoryStore::new());
        let svc = service(Arc::clone(&store));
        let english = SubjectId::new("english");
        assert!(svc.save(&english, Difficulty::Easy, SessionMode::Practice, &state()).await.unwrap());
        assert!(svc.has_saved_session(&english).await.unwrap());

        let loaded = svc.load(&english).await.unwrap().unwrap();
        assert_eq!(loaded.state, state());
        assert_eq!(loaded.difficulty, Difficulty::Easy);

        svc.clear(&english).await.unwrap();
        assert!(svc.load(&english).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_blob_is_reported_and_kept() {
        let store = Arc::new(InMemoryStore::new());
        let english = SubjectId::new("english");
        store.set(&progress_key(&english), "{\"subject\":").await.unwrap();
        let svc = service(Arc::clone(&store));

        let err = svc.load(&english).await.unwrap_err();
        assert!(err.is_corrupt());
        assert!(svc.has_saved_session(&english).await.unwrap());
    }

    #[tokio::test]
    async fn snapshot_for_other_subject_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let svc = service(Arc::clone(&store));
        let english = SubjectId::new("english");
        svc.save(&english, Difficulty::Easy, SessionMode::Practice, &state()).await.unwrap();
        let raw = store.get(&progress_key(&english)).await.unwrap().unwrap();
        store.set(&progress_key(&SubjectId::new("gk")), &raw).await.unwrap();

        let err = svc.load(&SubjectId::new("gk")).await.unwrap_err();
        assert!(matches!(err, RecoveryError::Snapshot(_)));
    }
}
