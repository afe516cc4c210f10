use std::collections::VecDeque;
use std::sync::Arc;

use quiz_core::model::{Difficulty, Language, Question, SessionMode, SubjectId};
use tracing::{debug, warn};

use super::machine::{AnswerOutcome, Effect, LoadOutcome, LoadTicket, QuizMachine, QuizPhase};
use super::progress::{QuizProgress, QuizReview};
use super::timer::{TICK_PERIOD, Ticker, TimerTick};
use crate::Clock;
use crate::error::QuizError;
use crate::generator::QuestionGenerator;
use crate::recovery_service::RecoveryService;
use crate::stats_service::StatsService;

const NOTICE_SAVED: &str = "Progress saved successfully!";
const NOTICE_RESUMED: &str = "Session resumed successfully!";
const NOTICE_BOOKMARKED: &str = "Question bookmarked";
const NOTICE_UNBOOKMARKED: &str = "Bookmark removed";
const MSG_RESUME_FAILED: &str = "Failed to load saved session.";
const MSG_STATS_FAILED: &str = "Could not update your stats.";

/// Drives a `QuizMachine` against the question provider, the stats store and
/// the recovery store, and owns the exam countdown task.
///
/// Background writes (answer counts, results, clearing the saved slot) never
/// fail an operation; a failure is logged and shown as a banner. Writes stay
/// queued on the service until they complete, so an operation future dropped
/// mid-write leaves them to the next call.
pub struct QuizSessionService {
    machine: QuizMachine,
    stats: Arc<StatsService>,
    recovery: Arc<RecoveryService>,
    generator: Arc<dyn QuestionGenerator>,
    clock: Clock,
    ticker: Option<Ticker>,
    pending: VecDeque<Effect>,
    bookmarked: bool,
}

impl QuizSessionService {
    #[must_use]
    pub fn new(
        subject: SubjectId,
        language: Language,
        stats: Arc<StatsService>,
        recovery: Arc<RecoveryService>,
        generator: Arc<dyn QuestionGenerator>,
        clock: Clock,
    ) -> Self {
        Self {
            machine: QuizMachine::new(subject, language),
            stats,
            recovery,
            generator,
            clock,
            ticker: None,
            pending: VecDeque::new(),
            bookmarked: false,
        }
    }

    #[must_use]
    pub fn machine(&self) -> &QuizMachine {
        &self.machine
    }

    #[must_use]
    pub fn phase(&self) -> &QuizPhase {
        self.machine.phase()
    }

    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        self.machine.current_question()
    }

    #[must_use]
    pub fn progress(&self) -> QuizProgress {
        self.machine.progress()
    }

    #[must_use]
    pub fn review(&self) -> Option<QuizReview<'_>> {
        self.machine.review()
    }

    /// Membership of the current question, refreshed whenever it changes.
    #[must_use]
    pub fn is_bookmarked(&self) -> bool {
        self.bookmarked
    }

    #[must_use]
    pub fn is_timer_running(&self) -> bool {
        self.ticker.is_some()
    }

    /// Background writes queued but not yet completed.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.pending.len() + self.machine.pending_effects()
    }

    pub fn clear_messages(&mut self) {
        self.machine.clear_messages();
    }

    // ─── Setup ─────────────────────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns `QuizError::InvalidPhase` once a difficulty has been chosen.
    pub fn set_mode(&mut self, mode: SessionMode) -> Result<(), QuizError> {
        self.machine.set_mode(mode)
    }

    /// Whether a saved practice session exists for this subject.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::Recovery` if storage cannot be read.
    pub async fn has_saved_session(&self) -> Result<bool, QuizError> {
        Ok(self
            .recovery
            .has_saved_session(self.machine.subject())
            .await?)
    }

    /// Choose a difficulty and load the first batch.
    ///
    /// A provider failure is not an error here; it leaves the session in
    /// `QuizPhase::Error`.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::InvalidPhase` outside difficulty selection.
    pub async fn select_difficulty(&mut self, level: Difficulty) -> Result<LoadOutcome, QuizError> {
        self.flush_writes().await;
        let ticket = self.machine.select_difficulty(level)?;
        Ok(self.load(ticket).await)
    }

    /// # Errors
    ///
    /// Returns `QuizError::InvalidPhase` when there is nothing to retry.
    pub async fn retry(&mut self) -> Result<LoadOutcome, QuizError> {
        self.flush_writes().await;
        let ticket = self.machine.retry()?;
        Ok(self.load(ticket).await)
    }

    /// Fetch a batch while the countdown keeps running. Time running out
    /// mid-fetch finishes the session and abandons the batch.
    async fn load(&mut self, ticket: LoadTicket) -> LoadOutcome {
        self.sync_ticker();
        let generator = Arc::clone(&self.generator);
        let request = ticket.request.clone();
        let fetch = generator.generate(&request);
        tokio::pin!(fetch);
        let result = loop {
            let Some(ticker) = self.ticker.as_mut() else {
                break (&mut fetch).await;
            };
            tokio::select! {
                result = &mut fetch => break result,
                Some(()) = ticker.recv() => {
                    self.apply_tick().await;
                    if self.machine.is_stale(&ticket) {
                        debug!(subject = %self.machine.subject(), "session ended while a batch was loading");
                        self.refresh_bookmark().await;
                        return LoadOutcome::Discarded;
                    }
                }
            }
        };
        let outcome = self.machine.complete_load(ticket, result);
        self.sync_ticker();
        self.refresh_bookmark().await;
        outcome
    }

    // ─── Answering and navigation ──────────────────────────────────────────────

    /// Answer the current question and count it in the stats.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::InvalidPhase` or `QuizError::InvalidOption` for
    /// calls the session cannot accept.
    pub async fn submit_answer(&mut self, option: usize) -> Result<Option<AnswerOutcome>, QuizError> {
        self.flush_writes().await;
        let outcome = self.machine.submit_answer(option)?;
        self.apply_effects().await;
        Ok(outcome)
    }

    /// Next question; loads another batch past the end.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::InvalidPhase` outside `Active`.
    pub async fn advance(&mut self) -> Result<Option<LoadOutcome>, QuizError> {
        self.flush_writes().await;
        let outcome = match self.machine.advance()? {
            Some(ticket) => Some(self.load(ticket).await),
            None => {
                self.refresh_bookmark().await;
                None
            }
        };
        Ok(outcome)
    }

    /// # Errors
    ///
    /// Returns `QuizError::InvalidPhase` outside `Active` and
    /// `QuizError::IndexOutOfRange` for an index that is not loaded.
    pub async fn jump_to(&mut self, index: usize) -> Result<(), QuizError> {
        self.flush_writes().await;
        self.machine.jump_to(index)?;
        self.refresh_bookmark().await;
        Ok(())
    }

    /// End the session, record the result and clear the saved slot.
    /// Returns whether this call did the finishing.
    pub async fn finish(&mut self) -> bool {
        let finished = self.machine.finish(self.clock.now());
        self.sync_ticker();
        self.apply_effects().await;
        finished
    }

    /// Back to difficulty selection. Stops the countdown.
    pub fn restart(&mut self) {
        self.machine.restart();
        self.ticker = None;
        self.bookmarked = false;
    }

    /// Wait for the next countdown tick and apply it.
    ///
    /// Returns `None` once no countdown is running. Safe to race in `select!`:
    /// a tick is applied in full before any write starts, and writes cut
    /// short are finished by the next call on this session.
    pub async fn wait_tick(&mut self) -> Option<TimerTick> {
        self.flush_writes().await;
        let ticker = self.ticker.as_mut()?;
        ticker.recv().await?;
        Some(self.apply_tick().await)
    }

    /// Complete any background writes still queued.
    pub async fn flush_writes(&mut self) {
        self.apply_effects().await;
    }

    // ─── Persistence ───────────────────────────────────────────────────────────

    /// Save the session for later. Does nothing outside an active practice session.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::Recovery` if the snapshot cannot be written.
    pub async fn save(&mut self) -> Result<bool, QuizError> {
        self.flush_writes().await;
        let Some(difficulty) = self.machine.saveable() else {
            debug!(subject = %self.machine.subject(), phase = %self.machine.phase(), "nothing to save");
            return Ok(false);
        };
        let saved = self
            .recovery
            .save(
                self.machine.subject(),
                difficulty,
                self.machine.mode(),
                self.machine.state(),
            )
            .await?;
        if saved {
            self.machine.set_notice(NOTICE_SAVED);
        }
        Ok(saved)
    }

    /// Restore the saved session for this subject.
    ///
    /// Returns `false` when there is nothing usable to resume; an unreadable
    /// snapshot also sets a banner and stays in storage.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::InvalidPhase` outside difficulty selection and
    /// `QuizError::Recovery` if storage cannot be read.
    pub async fn resume(&mut self) -> Result<bool, QuizError> {
        self.flush_writes().await;
        self.machine.ensure_can_resume()?;
        let snapshot = match self.recovery.load(self.machine.subject()).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Ok(false),
            Err(err) if err.is_corrupt() => {
                self.machine.set_banner(MSG_RESUME_FAILED);
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        };
        self.machine.restore(snapshot)?;
        self.machine.set_notice(NOTICE_RESUMED);
        self.sync_ticker();
        self.refresh_bookmark().await;
        Ok(true)
    }

    /// Save or unsave the current question. Returns membership afterwards.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::InvalidPhase` without a current question and
    /// `QuizError::Stats` if the stats record cannot be written.
    pub async fn toggle_bookmark(&mut self) -> Result<bool, QuizError> {
        self.flush_writes().await;
        let Some(question) = self.machine.current_question() else {
            return Err(QuizError::InvalidPhase {
                operation: "toggle_bookmark",
                phase: self.machine.phase().name(),
            });
        };
        let now_saved = self.stats.toggle_bookmark(question).await?;
        self.bookmarked = now_saved;
        self.machine.set_notice(if now_saved {
            NOTICE_BOOKMARKED
        } else {
            NOTICE_UNBOOKMARKED
        });
        Ok(now_saved)
    }

    // ─── Internals ─────────────────────────────────────────────────────────────

    async fn apply_tick(&mut self) -> TimerTick {
        let tick = self.machine.tick(self.clock.now());
        self.sync_ticker();
        if tick == TimerTick::Expired {
            self.apply_effects().await;
        }
        tick
    }

    /// Writes queued effects in order. An effect leaves the queue only once
    /// its write has returned.
    async fn apply_effects(&mut self) {
        self.pending.extend(self.machine.drain_effects());
        while let Some(effect) = self.pending.front() {
            let result = self.write_effect(effect).await;
            self.pending.pop_front();
            if let Err(err) = result {
                warn!(subject = %self.machine.subject(), error = %err, "background write failed");
                self.machine.set_banner(MSG_STATS_FAILED);
            }
        }
    }

    async fn write_effect(&self, effect: &Effect) -> Result<(), QuizError> {
        match effect {
            Effect::RecordAnswer { subject, is_correct } => {
                self.stats.update_stats(subject, *is_correct).await?;
            }
            Effect::RecordResult(result) => {
                self.stats.add_exam_result(result.clone()).await?;
            }
            Effect::ClearProgress(subject) => self.recovery.clear(subject).await?,
        }
        Ok(())
    }

    async fn refresh_bookmark(&mut self) {
        let Some(question) = self.machine.current_question() else {
            self.bookmarked = false;
            return;
        };
        self.bookmarked = match self.stats.is_bookmarked(question.id()).await {
            Ok(saved) => saved,
            Err(err) => {
                warn!(error = %err, "bookmark lookup failed");
                false
            }
        };
    }

    fn sync_ticker(&mut self) {
        match (self.machine.timer_should_run(), self.ticker.is_some()) {
            (true, false) => {
                debug!(subject = %self.machine.subject(), remaining = self.machine.remaining_seconds(), "countdown started");
                self.ticker = Some(Ticker::spawn(TICK_PERIOD));
            }
            (false, true) => {
                debug!(subject = %self.machine.subject(), "countdown stopped");
                self.ticker = None;
            }
            _ => {}
        }
    }
}
