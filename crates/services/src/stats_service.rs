use std::sync::Arc;

use quiz_core::model::{
    BookmarkedQuestion, ExamResult, Question, QuestionId, StatsOverview, SubjectId, UserStats,
};
use storage::repository::StatsRepository;
use tracing::debug;

use crate::Clock;
use crate::error::StatsError;

/// Read-modify-write operations over the aggregate stats record.
///
/// Every mutation re-reads the full record from the repository and writes it
/// back; nothing is cached between calls, so two writers sharing the same
/// storage can overwrite each other's updates.
#[derive(Clone)]
pub struct StatsService {
    clock: Clock,
    repo: Arc<dyn StatsRepository>,
}

impl StatsService {
    #[must_use]
    pub fn new(clock: Clock, repo: Arc<dyn StatsRepository>) -> Self {
        Self { clock, repo }
    }

    /// Full record, repaired to the current schema.
    ///
    /// # Errors
    ///
    /// Returns `StatsError::Storage` if the backend cannot be read.
    pub async fn get_stats(&self) -> Result<UserStats, StatsError> {
        Ok(self.repo.read_stats().await?)
    }

    /// Count one answered question.
    ///
    /// # Errors
    ///
    /// Returns `StatsError::Storage` if the record cannot be read or written.
    pub async fn update_stats(
        &self,
        subject: &SubjectId,
        is_correct: bool,
    ) -> Result<UserStats, StatsError> {
        let mut stats = self.repo.read_stats().await?;
        stats.record_answer(subject, is_correct);
        self.repo.write_stats(&stats).await?;
        debug!(%subject, is_correct, total = stats.total_questions, "stats updated");
        Ok(stats)
    }

    /// Prepend a completed session to the history.
    ///
    /// # Errors
    ///
    /// Returns `StatsError::Storage` if the record cannot be read or written.
    pub async fn add_exam_result(&self, result: ExamResult) -> Result<(), StatsError> {
        let mut stats = self.repo.read_stats().await?;
        debug!(subject = %result.subject_id, score = result.score, total = result.total_questions, mode = %result.mode, "exam result recorded");
        stats.push_result(result);
        self.repo.write_stats(&stats).await?;
        Ok(())
    }

    /// Save or unsave `question`. Returns whether it is bookmarked afterwards.
    ///
    /// # Errors
    ///
    /// Returns `StatsError::Storage` if the record cannot be read or written.
    pub async fn toggle_bookmark(&self, question: &Question) -> Result<bool, StatsError> {
        let mut stats = self.repo.read_stats().await?;
        let now_saved = stats.toggle_bookmark(question, self.clock.now());
        self.repo.write_stats(&stats).await?;
        debug!(question = %question.id(), now_saved, "bookmark toggled");
        Ok(now_saved)
    }

    /// Saved questions, most recent first.
    ///
    /// # Errors
    ///
    /// Returns `StatsError::Storage` if the backend cannot be read.
    pub async fn bookmarks(&self) -> Result<Vec<BookmarkedQuestion>, StatsError> {
        Ok(self.repo.read_stats().await?.bookmarks)
    }

    /// # Errors
    ///
    /// Returns `StatsError::Storage` if the backend cannot be read.
    pub async fn is_bookmarked(&self, id: &QuestionId) -> Result<bool, StatsError> {
        Ok(self.repo.read_stats().await?.is_bookmarked(id))
    }

    /// Dashboard figures: overall accuracy, ranked subjects, weakest subject.
    ///
    /// # Errors
    ///
    /// Returns `StatsError::Storage` if the backend cannot be read.
    pub async fn overview(&self) -> Result<StatsOverview, StatsError> {
        Ok(self.repo.read_stats().await?.overview())
    }
}
