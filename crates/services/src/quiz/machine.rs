use chrono::{DateTime, Utc};
use std::fmt;

use quiz_core::model::{
    Difficulty, ExamResult, ExamResultId, Language, PersistedSession, Question, QuizState,
    SessionMode, SubjectId,
};
use tracing::{debug, info, warn};

use super::progress::{QuizProgress, QuizReview};
use super::timer::{ExamTimer, TimerTick};
use crate::error::{GenerationError, QuizError};
use crate::generator::BatchRequest;

pub(crate) const MSG_NO_QUESTIONS: &str = "No questions generated. Please try again.";
pub(crate) const MSG_LOAD_FAILED: &str = "Failed to load questions. Check your connection.";
pub(crate) const MSG_LOAD_MORE_FAILED: &str = "Failed to load more questions. Try again.";

//
// ─── PHASES ────────────────────────────────────────────────────────────────────
//

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuizPhase {
    SelectingDifficulty,
    /// Waiting for the first batch.
    Loading,
    Active,
    /// The learner moved past the last loaded question; `pending_index` is
    /// the position the next batch will fill.
    LoadingMore { pending_index: usize },
    Finished,
    /// The first batch failed; `retry` reissues it.
    Error { message: String },
}

impl QuizPhase {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            QuizPhase::SelectingDifficulty => "selecting difficulty",
            QuizPhase::Loading => "loading",
            QuizPhase::Active => "active",
            QuizPhase::LoadingMore { .. } => "loading more",
            QuizPhase::Finished => "finished",
            QuizPhase::Error { .. } => "in error",
        }
    }
}

impl fmt::Display for QuizPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Side effects the owner must carry out after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    RecordAnswer { subject: SubjectId, is_correct: bool },
    RecordResult(ExamResult),
    ClearProgress(SubjectId),
}

/// A batch request issued by the machine, to be answered via `complete_load`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub request: BatchRequest,
    generation: u64,
    initial: bool,
}

impl LoadTicket {
    #[must_use]
    pub fn is_initial(&self) -> bool {
        self.initial
    }
}

/// How a batch result was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Appended { added: usize },
    Failed { message: String },
    /// The session moved on (restart, finish) before the batch arrived.
    Discarded,
}

/// What a submitted answer did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerOutcome {
    pub index: usize,
    pub selected: usize,
    pub correct_index: usize,
    pub is_correct: bool,
    /// Practice mode reveals correctness immediately; exam mode defers it.
    pub reveal: bool,
}

//
// ─── MACHINE ───────────────────────────────────────────────────────────────────
//

/// In-memory quiz session for one subject.
///
/// Performs no I/O: loads are requested through `LoadTicket`s and persisted
/// writes are queued as `Effect`s for the owner to drain.
#[derive(Debug)]
pub struct QuizMachine {
    subject: SubjectId,
    language: Language,
    mode: SessionMode,
    difficulty: Option<Difficulty>,
    state: QuizState,
    phase: QuizPhase,
    timer: ExamTimer,
    generation: u64,
    /// Set when the last append failed; `retry` reissues it.
    append_failed: bool,
    banner: Option<String>,
    notice: Option<String>,
    effects: Vec<Effect>,
}

impl QuizMachine {
    #[must_use]
    pub fn new(subject: SubjectId, language: Language) -> Self {
        Self {
            subject,
            language,
            mode: SessionMode::Practice,
            difficulty: None,
            state: QuizState::new(),
            phase: QuizPhase::SelectingDifficulty,
            timer: ExamTimer::default(),
            generation: 0,
            append_failed: false,
            banner: None,
            notice: None,
            effects: Vec::new(),
        }
    }

    #[must_use]
    pub fn subject(&self) -> &SubjectId {
        &self.subject
    }

    #[must_use]
    pub fn language(&self) -> Language {
        self.language
    }

    #[must_use]
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    #[must_use]
    pub fn difficulty(&self) -> Option<Difficulty> {
        self.difficulty
    }

    #[must_use]
    pub fn state(&self) -> &QuizState {
        &self.state
    }

    #[must_use]
    pub fn phase(&self) -> &QuizPhase {
        &self.phase
    }

    #[must_use]
    pub fn remaining_seconds(&self) -> u32 {
        self.timer.remaining()
    }

    /// Transient error shown over the current screen (failed append, bad resume).
    #[must_use]
    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    /// Transient confirmation ("Progress saved successfully!", ...).
    #[must_use]
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn set_notice(&mut self, notice: impl Into<String>) {
        self.notice = Some(notice.into());
    }

    pub fn set_banner(&mut self, banner: impl Into<String>) {
        self.banner = Some(banner.into());
    }

    pub fn clear_messages(&mut self) {
        self.banner = None;
        self.notice = None;
    }

    #[must_use]
    pub fn pending_effects(&self) -> usize {
        self.effects.len()
    }

    /// Effects queued since the last drain, oldest first.
    pub fn drain_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        match self.phase {
            QuizPhase::Active | QuizPhase::Finished => self.state.current_question(),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_current_answered(&self) -> bool {
        self.state.is_answered(self.state.current_index())
    }

    /// Skipping is offered only in practice mode or once the question is answered.
    #[must_use]
    pub fn can_skip(&self) -> bool {
        self.mode == SessionMode::Practice || self.is_current_answered()
    }

    /// Whether `ticket` was issued for a session that has since ended or restarted.
    #[must_use]
    pub fn is_stale(&self, ticket: &LoadTicket) -> bool {
        ticket.generation != self.generation
    }

    /// Whether the exam countdown should be ticking right now.
    #[must_use]
    pub fn timer_should_run(&self) -> bool {
        self.mode == SessionMode::Exam
            && !self.state.is_finished()
            && self.timer.remaining() > 0
            && matches!(
                self.phase,
                QuizPhase::Active | QuizPhase::LoadingMore { .. }
            )
    }

    fn invalid(&self, operation: &'static str) -> QuizError {
        QuizError::InvalidPhase {
            operation,
            phase: self.phase.name(),
        }
    }

    fn ticket(&self, difficulty: Difficulty, initial: bool) -> LoadTicket {
        LoadTicket {
            request: BatchRequest {
                subject: self.subject.clone(),
                language: self.language,
                difficulty,
                count: self.subject.batch_size(),
            },
            generation: self.generation,
            initial,
        }
    }

    // ─── Setup ─────────────────────────────────────────────────────────────────

    /// Choose practice or exam before picking a difficulty.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::InvalidPhase` once a difficulty has been chosen.
    pub fn set_mode(&mut self, mode: SessionMode) -> Result<(), QuizError> {
        if self.phase != QuizPhase::SelectingDifficulty {
            return Err(self.invalid("set_mode"));
        }
        self.mode = mode;
        Ok(())
    }

    /// Fix the difficulty and request the first batch.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::InvalidPhase` outside `SelectingDifficulty`.
    pub fn select_difficulty(&mut self, level: Difficulty) -> Result<LoadTicket, QuizError> {
        if self.phase != QuizPhase::SelectingDifficulty {
            return Err(self.invalid("select_difficulty"));
        }
        self.difficulty = Some(level);
        self.phase = QuizPhase::Loading;
        self.banner = None;
        info!(subject = %self.subject, difficulty = %level, mode = %self.mode, "session started");
        Ok(self.ticket(level, true))
    }

    /// Apply the provider's answer to a ticket.
    pub fn complete_load(
        &mut self,
        ticket: LoadTicket,
        result: Result<Vec<Question>, GenerationError>,
    ) -> LoadOutcome {
        if self.is_stale(&ticket) {
            debug!(subject = %self.subject, "discarding batch for a previous session");
            return LoadOutcome::Discarded;
        }
        let expected = if ticket.initial {
            matches!(self.phase, QuizPhase::Loading)
        } else {
            matches!(self.phase, QuizPhase::LoadingMore { .. })
        };
        if !expected {
            debug!(subject = %self.subject, phase = %self.phase, "discarding unexpected batch");
            return LoadOutcome::Discarded;
        }

        let batch = match result {
            Ok(batch) if batch.is_empty() => Err(MSG_NO_QUESTIONS),
            Ok(batch) => Ok(batch),
            Err(err) => {
                warn!(subject = %self.subject, error = %err, initial = ticket.initial, "question batch failed");
                Err(if ticket.initial {
                    MSG_LOAD_FAILED
                } else {
                    MSG_LOAD_MORE_FAILED
                })
            }
        };

        match batch {
            Ok(batch) => {
                let added = self.state.append(batch);
                if self.mode == SessionMode::Exam {
                    self.timer.extend_for(added);
                }
                if let QuizPhase::LoadingMore { pending_index } = self.phase {
                    self.state.set_current_index(pending_index);
                }
                self.phase = QuizPhase::Active;
                self.banner = None;
                debug!(subject = %self.subject, added, loaded = self.state.len(), "batch appended");
                LoadOutcome::Appended { added }
            }
            Err(message) => {
                if ticket.initial {
                    self.phase = QuizPhase::Error {
                        message: message.to_string(),
                    };
                } else {
                    // Roll the optimistic move back onto the last loaded question.
                    let last = self.state.len().saturating_sub(1);
                    self.state.set_current_index(last);
                    self.phase = QuizPhase::Active;
                    self.append_failed = true;
                    self.banner = Some(message.to_string());
                }
                LoadOutcome::Failed {
                    message: message.to_string(),
                }
            }
        }
    }

    /// Reissue the failed load for the same difficulty.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::InvalidPhase` unless the first batch failed or an
    /// append failed and the learner has not moved since.
    pub fn retry(&mut self) -> Result<LoadTicket, QuizError> {
        let difficulty = self.difficulty.ok_or_else(|| self.invalid("retry"))?;
        match self.phase {
            QuizPhase::Error { .. } => {
                self.phase = QuizPhase::Loading;
                Ok(self.ticket(difficulty, true))
            }
            QuizPhase::Active if self.append_failed => {
                let pending_index = self.state.len();
                self.state.set_current_index(pending_index);
                self.phase = QuizPhase::LoadingMore { pending_index };
                self.append_failed = false;
                self.banner = None;
                Ok(self.ticket(difficulty, false))
            }
            _ => Err(self.invalid("retry")),
        }
    }

    // ─── Answering and navigation ──────────────────────────────────────────────

    /// Record the learner's choice for the current question.
    ///
    /// Returns `Ok(None)` without changing anything if the question was
    /// already answered.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::InvalidPhase` outside `Active` and
    /// `QuizError::InvalidOption` for an index past the options.
    pub fn submit_answer(&mut self, option: usize) -> Result<Option<AnswerOutcome>, QuizError> {
        if self.phase != QuizPhase::Active {
            return Err(self.invalid("submit_answer"));
        }
        let index = self.state.current_index();
        let Some(question) = self.state.current_question() else {
            return Err(self.invalid("submit_answer"));
        };
        if self.state.is_answered(index) {
            return Ok(None);
        }
        let len = question.options().len();
        if option >= len {
            return Err(QuizError::InvalidOption { option, len });
        }
        let correct_index = question.correct_answer_index();

        let Some(is_correct) = self.state.record_answer(index, option) else {
            return Ok(None);
        };
        self.effects.push(Effect::RecordAnswer {
            subject: self.subject.clone(),
            is_correct,
        });
        debug!(subject = %self.subject, index, is_correct, score = self.state.score(), "answer recorded");
        Ok(Some(AnswerOutcome {
            index,
            selected: option,
            correct_index,
            is_correct,
            reveal: self.mode == SessionMode::Practice,
        }))
    }

    /// Move to the next question, requesting another batch at the end.
    ///
    /// Unanswered questions may be skipped in both modes; exam-mode skipping
    /// is a presentation rule (see `can_skip`).
    ///
    /// # Errors
    ///
    /// Returns `QuizError::InvalidPhase` outside `Active`.
    pub fn advance(&mut self) -> Result<Option<LoadTicket>, QuizError> {
        if self.phase != QuizPhase::Active {
            return Err(self.invalid("advance"));
        }
        let next = self.state.current_index() + 1;
        self.append_failed = false;
        self.banner = None;
        if next < self.state.len() {
            self.state.set_current_index(next);
            return Ok(None);
        }
        let Some(difficulty) = self.difficulty else {
            return Err(self.invalid("advance"));
        };
        self.state.set_current_index(next);
        self.phase = QuizPhase::LoadingMore {
            pending_index: next,
        };
        debug!(subject = %self.subject, pending_index = next, "loading next batch");
        Ok(Some(self.ticket(difficulty, false)))
    }

    /// Jump to any loaded question (question grid).
    ///
    /// # Errors
    ///
    /// Returns `QuizError::InvalidPhase` outside `Active` and
    /// `QuizError::IndexOutOfRange` for an index that is not loaded.
    pub fn jump_to(&mut self, index: usize) -> Result<(), QuizError> {
        if self.phase != QuizPhase::Active {
            return Err(self.invalid("jump_to"));
        }
        if index >= self.state.len() {
            return Err(QuizError::IndexOutOfRange {
                index,
                len: self.state.len(),
            });
        }
        self.state.set_current_index(index);
        self.append_failed = false;
        Ok(())
    }

    // ─── Completion ────────────────────────────────────────────────────────────

    /// End the session. Later calls do nothing.
    ///
    /// Returns whether this call finished the session.
    pub fn finish(&mut self, now: DateTime<Utc>) -> bool {
        if self.state.is_finished() {
            return false;
        }
        if !matches!(
            self.phase,
            QuizPhase::Active | QuizPhase::LoadingMore { .. }
        ) {
            return false;
        }
        let Some(difficulty) = self.difficulty else {
            return false;
        };

        if let QuizPhase::LoadingMore { .. } = self.phase {
            let last = self.state.len().saturating_sub(1);
            self.state.set_current_index(last);
        }
        // Any batch still in flight belongs to a session that is over.
        self.generation += 1;
        self.state.mark_finished();
        self.phase = QuizPhase::Finished;
        self.append_failed = false;
        self.banner = None;

        let result = ExamResult {
            id: ExamResultId::generate(),
            date: now,
            subject_id: self.subject.clone(),
            subject_name: self.subject.display_name(),
            score: self.state.score(),
            total_questions: u32::try_from(self.state.len()).unwrap_or(u32::MAX),
            difficulty,
            mode: self.mode,
        };
        info!(
            subject = %self.subject,
            score = result.score,
            total = result.total_questions,
            mode = %self.mode,
            "session finished"
        );
        self.effects.push(Effect::RecordResult(result));
        self.effects.push(Effect::ClearProgress(self.subject.clone()));
        true
    }

    /// Feed one countdown tick; expiry finishes the session.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TimerTick {
        if !self.timer_should_run() {
            return TimerTick::Idle;
        }
        let tick = self.timer.tick();
        if tick == TimerTick::Expired {
            info!(subject = %self.subject, "exam time expired");
            self.finish(now);
        }
        tick
    }

    /// Back to difficulty selection with an empty session. Mode is kept.
    pub fn restart(&mut self) {
        self.generation += 1;
        self.state = QuizState::new();
        self.difficulty = None;
        self.phase = QuizPhase::SelectingDifficulty;
        self.timer.reset();
        self.append_failed = false;
        self.clear_messages();
        debug!(subject = %self.subject, "session restarted");
    }

    // ─── Persistence ───────────────────────────────────────────────────────────

    /// Difficulty to save with, when the session is in a saveable state.
    ///
    /// Only an active practice session with no batch in flight is saveable.
    #[must_use]
    pub fn saveable(&self) -> Option<Difficulty> {
        if self.mode != SessionMode::Practice || self.phase != QuizPhase::Active {
            return None;
        }
        self.difficulty
    }

    /// # Errors
    ///
    /// Returns `QuizError::InvalidPhase` outside `SelectingDifficulty`.
    pub fn ensure_can_resume(&self) -> Result<(), QuizError> {
        if self.phase == QuizPhase::SelectingDifficulty {
            Ok(())
        } else {
            Err(self.invalid("resume"))
        }
    }

    /// Restore a checked snapshot verbatim.
    ///
    /// # Errors
    ///
    /// Returns `QuizError::InvalidPhase` outside `SelectingDifficulty`.
    pub fn restore(&mut self, snapshot: PersistedSession) -> Result<(), QuizError> {
        self.ensure_can_resume()?;
        self.difficulty = Some(snapshot.difficulty);
        self.mode = snapshot.mode;
        self.state = snapshot.state;
        self.phase = QuizPhase::Active;
        self.timer.reset();
        self.banner = None;
        info!(
            subject = %self.subject,
            questions = self.state.len(),
            answered = self.state.answered_count(),
            "session resumed"
        );
        Ok(())
    }

    // ─── Views ─────────────────────────────────────────────────────────────────

    #[must_use]
    pub fn progress(&self) -> QuizProgress {
        let timed = self.mode == SessionMode::Exam;
        QuizProgress {
            loaded: self.state.len(),
            answered: self.state.answered_count(),
            current_index: self.state.current_index(),
            score: self.state.score(),
            remaining_seconds: timed.then(|| self.timer.remaining()),
            countdown: timed.then(|| self.timer.formatted()),
            is_loading_more: matches!(self.phase, QuizPhase::LoadingMore { .. }),
        }
    }

    /// Post-session review; `None` until the session is finished.
    #[must_use]
    pub fn review(&self) -> Option<QuizReview<'_>> {
        if self.phase != QuizPhase::Finished {
            return None;
        }
        Some(QuizReview::build(&self.state, self.mode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiz_core::model::{QuestionDraft, QuestionId};
    use quiz_core::time::fixed_now;

    fn batch(subject: &str, start: usize, n: usize) -> Vec<Question> {
        (start..start + n)
            .map(|i| {
                QuestionDraft {
                    id: QuestionId::new(format!("q{i}")),
                    question_text: format!("Question {i}"),
                    options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                    correct_answer_index: i % 4,
                    explanation: format!("Because {i}"),
                    explanation_summary: None,
                    subject: SubjectId::new(subject),
                    difficulty: Difficulty::Medium,
                }
                .validate()
                .unwrap()
            })
            .collect()
    }

    fn active(mode: SessionMode, n: usize) -> QuizMachine {
        let mut machine = QuizMachine::new(SubjectId::new("math"), Language::English);
        machine.set_mode(mode).unwrap();
        let ticket = machine.select_difficulty(Difficulty::Medium).unwrap();
        machine.complete_load(ticket, Ok(batch("math", 0, n)));
        machine
    }

    fn correct_of(machine: &QuizMachine) -> usize {
        machine.current_question().unwrap().correct_answer_index()
    }

    #[test]
    fn batch_size_follows_subject() {
        let mut math = QuizMachine::new(SubjectId::new("math"), Language::English);
        assert_eq!(math.select_difficulty(Difficulty::Easy).unwrap().request.count, 5);
        let mut mock = QuizMachine::new(SubjectId::new("all_subjects"), Language::Hindi);
        let ticket = mock.select_difficulty(Difficulty::Hard).unwrap();
        assert_eq!(ticket.request.count, 25);
        assert_eq!(ticket.request.language, Language::Hindi);
        assert!(ticket.is_initial());
    }

    #[test]
    fn select_difficulty_only_from_selection() {
        let mut machine = active(SessionMode::Practice, 5);
        assert!(matches!(
            machine.select_difficulty(Difficulty::Hard),
            Err(QuizError::InvalidPhase { .. })
        ));
        assert!(machine.set_mode(SessionMode::Exam).is_err());
    }

    #[test]
    fn empty_batch_is_a_failure() {
        let mut machine = QuizMachine::new(SubjectId::new("math"), Language::English);
        let ticket = machine.select_difficulty(Difficulty::Easy).unwrap();
        let outcome = machine.complete_load(ticket, Ok(Vec::new()));
        assert_eq!(
            outcome,
            LoadOutcome::Failed {
                message: MSG_NO_QUESTIONS.into()
            }
        );
        assert_eq!(
            machine.phase(),
            &QuizPhase::Error {
                message: MSG_NO_QUESTIONS.into()
            }
        );

        let retry = machine.retry().unwrap();
        assert_eq!(retry.request.difficulty, Difficulty::Easy);
        machine.complete_load(retry, Ok(batch("math", 0, 5)));
        assert_eq!(machine.phase(), &QuizPhase::Active);
    }

    #[test]
    fn provider_error_on_first_batch_enters_error() {
        let mut machine = QuizMachine::new(SubjectId::new("math"), Language::English);
        let ticket = machine.select_difficulty(Difficulty::Easy).unwrap();
        machine.complete_load(ticket, Err(GenerationError::Provider("offline".into())));
        assert!(matches!(machine.phase(), QuizPhase::Error { message } if message == MSG_LOAD_FAILED));
    }

    #[test]
    fn second_answer_changes_nothing() {
        let mut machine = active(SessionMode::Practice, 5);
        let correct = correct_of(&machine);
        let first = machine.submit_answer(correct).unwrap().unwrap();
        assert!(first.is_correct);
        assert!(first.reveal);

        assert!(machine.submit_answer((correct + 1) % 4).unwrap().is_none());
        assert_eq!(machine.state().score(), 1);
        assert_eq!(machine.state().answer(0), Some(correct));
        assert_eq!(machine.drain_effects().len(), 1);
    }

    #[test]
    fn out_of_range_option_is_rejected() {
        let mut machine = active(SessionMode::Practice, 5);
        assert!(matches!(
            machine.submit_answer(4),
            Err(QuizError::InvalidOption { option: 4, len: 4 })
        ));
        assert!(!machine.is_current_answered());
    }

    #[test]
    fn score_always_matches_answer_sheet() {
        let mut machine = active(SessionMode::Practice, 5);
        let picks = [Some(0), Some(0), None, Some(3), Some(2)];
        for pick in picks {
            if let Some(option) = pick {
                machine.submit_answer(option).unwrap();
                machine.submit_answer((option + 1) % 4).unwrap();
            }
            if machine.state().current_index() + 1 < machine.state().len() {
                machine.advance().unwrap();
            }
        }
        assert_eq!(machine.state().score(), machine.state().computed_score());
    }

    #[test]
    fn advancing_past_last_question_loads_more() {
        let mut machine = active(SessionMode::Practice, 2);
        machine.advance().unwrap();
        let ticket = machine.advance().unwrap().expect("needs a batch");
        assert!(!ticket.is_initial());
        assert_eq!(
            machine.phase(),
            &QuizPhase::LoadingMore { pending_index: 2 }
        );
        assert_eq!(machine.state().current_index(), 2);
        assert!(machine.current_question().is_none());
        assert!(machine.submit_answer(0).is_err());

        machine.complete_load(ticket, Ok(batch("math", 2, 2)));
        assert_eq!(machine.phase(), &QuizPhase::Active);
        assert_eq!(machine.state().len(), 4);
        assert_eq!(machine.current_question().unwrap().id(), &QuestionId::new("q2"));
    }

    #[test]
    fn failed_append_keeps_answers_and_rolls_back() {
        let mut machine = active(SessionMode::Practice, 2);
        machine.submit_answer(0).unwrap();
        machine.advance().unwrap();
        let ticket = machine.advance().unwrap().unwrap();
        machine.complete_load(ticket, Err(GenerationError::Provider("timeout".into())));

        assert_eq!(machine.phase(), &QuizPhase::Active);
        assert_eq!(machine.banner(), Some(MSG_LOAD_MORE_FAILED));
        assert_eq!(machine.state().current_index(), 1);
        assert_eq!(machine.state().answer(0), Some(0));
        assert_eq!(machine.state().len(), 2);

        machine.clear_messages();
        let retry = machine.retry().unwrap();
        machine.complete_load(retry, Ok(batch("math", 2, 5)));
        assert_eq!(machine.state().current_index(), 2);
        assert_eq!(machine.state().len(), 7);
        assert!(machine.banner().is_none());
    }

    #[test]
    fn finish_is_idempotent() {
        let mut machine = active(SessionMode::Practice, 5);
        machine.drain_effects();
        assert!(machine.finish(fixed_now()));
        assert!(!machine.finish(fixed_now()));

        let effects = machine.drain_effects();
        let results = effects
            .iter()
            .filter(|e| matches!(e, Effect::RecordResult(_)))
            .count();
        assert_eq!(results, 1);
        assert!(effects.contains(&Effect::ClearProgress(SubjectId::new("math"))));
    }

    #[test]
    fn batch_arriving_after_finish_is_discarded() {
        let mut machine = active(SessionMode::Practice, 1);
        let ticket = machine.advance().unwrap().unwrap();
        machine.finish(fixed_now());
        assert_eq!(machine.state().current_index(), 0);

        let outcome = machine.complete_load(ticket, Ok(batch("math", 1, 5)));
        assert_eq!(outcome, LoadOutcome::Discarded);
        assert_eq!(machine.state().len(), 1);
    }

    #[test]
    fn batch_arriving_after_restart_is_discarded() {
        let mut machine = QuizMachine::new(SubjectId::new("math"), Language::English);
        let stale = machine.select_difficulty(Difficulty::Easy).unwrap();
        machine.restart();
        let fresh = machine.select_difficulty(Difficulty::Hard).unwrap();

        assert_eq!(machine.complete_load(stale, Ok(batch("math", 0, 5))), LoadOutcome::Discarded);
        assert_eq!(machine.complete_load(fresh, Ok(batch("math", 0, 5))), LoadOutcome::Appended { added: 5 });
        assert_eq!(machine.difficulty(), Some(Difficulty::Hard));
    }

    #[test]
    fn exam_timer_grows_per_batch() {
        let mut machine = active(SessionMode::Exam, 5);
        assert_eq!(machine.remaining_seconds(), 300);
        assert!(machine.timer_should_run());

        for _ in 0..4 {
            machine.advance().unwrap();
        }
        let ticket = machine.advance().unwrap().unwrap();
        machine.complete_load(ticket, Ok(batch("math", 5, 5)));
        assert_eq!(machine.remaining_seconds(), 600);
    }

    #[test]
    fn exam_timer_extension_adds_to_elapsed_clock() {
        let mut machine = active(SessionMode::Exam, 5);
        for _ in 0..30 {
            machine.tick(fixed_now());
        }
        for _ in 0..4 {
            machine.advance().unwrap();
        }
        let ticket = machine.advance().unwrap().unwrap();
        machine.complete_load(ticket, Ok(batch("math", 5, 5)));
        assert_eq!(machine.remaining_seconds(), 270 + 300);
    }

    #[test]
    fn timer_does_not_run_while_first_batch_loads_or_in_practice() {
        let mut machine = QuizMachine::new(SubjectId::new("math"), Language::English);
        machine.set_mode(SessionMode::Exam).unwrap();
        machine.select_difficulty(Difficulty::Easy).unwrap();
        assert!(!machine.timer_should_run());
        assert_eq!(machine.tick(fixed_now()), TimerTick::Idle);

        let practice = active(SessionMode::Practice, 5);
        assert_eq!(practice.remaining_seconds(), 0);
        assert!(!practice.timer_should_run());
    }

    #[test]
    fn timer_keeps_running_while_loading_more() {
        let mut machine = active(SessionMode::Exam, 1);
        machine.advance().unwrap().unwrap();
        assert!(machine.timer_should_run());
        assert_eq!(machine.tick(fixed_now()), TimerTick::Running { remaining: 59 });
    }

    #[test]
    fn expiry_finishes_exactly_once() {
        let mut machine = active(SessionMode::Exam, 1);
        machine.drain_effects();
        let mut expired = 0;
        for _ in 0..200 {
            if machine.tick(fixed_now()) == TimerTick::Expired {
                expired += 1;
            }
        }
        assert_eq!(expired, 1);
        assert_eq!(machine.phase(), &QuizPhase::Finished);
        assert!(!machine.timer_should_run());
        let results = machine
            .drain_effects()
            .into_iter()
            .filter(|e| matches!(e, Effect::RecordResult(_)))
            .count();
        assert_eq!(results, 1);
    }

    #[test]
    fn exam_allows_skip_only_after_answering() {
        let mut machine = active(SessionMode::Exam, 3);
        assert!(!machine.can_skip());
        // The machine itself does not block the move.
        assert!(machine.advance().is_ok());
        machine.submit_answer(0).unwrap();
        assert!(machine.can_skip());
        assert!(active(SessionMode::Practice, 3).can_skip());
    }

    #[test]
    fn exam_answers_do_not_reveal() {
        let mut machine = active(SessionMode::Exam, 3);
        let outcome = machine.submit_answer(0).unwrap().unwrap();
        assert!(!outcome.reveal);
    }

    #[test]
    fn only_active_practice_is_saveable() {
        assert_eq!(active(SessionMode::Practice, 5).saveable(), Some(Difficulty::Medium));
        assert_eq!(active(SessionMode::Exam, 5).saveable(), None);
        let mut finished = active(SessionMode::Practice, 5);
        finished.finish(fixed_now());
        assert_eq!(finished.saveable(), None);
    }

    #[test]
    fn jump_to_bounds_checked() {
        let mut machine = active(SessionMode::Practice, 5);
        machine.jump_to(3).unwrap();
        assert_eq!(machine.state().current_index(), 3);
        assert!(matches!(
            machine.jump_to(5),
            Err(QuizError::IndexOutOfRange { index: 5, len: 5 })
        ));
    }

    #[test]
    fn restart_resets_session_but_keeps_mode() {
        let mut machine = active(SessionMode::Exam, 5);
        machine.submit_answer(0).unwrap();
        machine.restart();
        assert_eq!(machine.phase(), &QuizPhase::SelectingDifficulty);
        assert!(machine.state().is_empty());
        assert_eq!(machine.remaining_seconds(), 0);
        assert_eq!(machine.difficulty(), None);
        assert_eq!(machine.mode(), SessionMode::Exam);
    }

    #[test]
    fn resume_only_from_selection() {
        let machine = active(SessionMode::Practice, 5);
        assert!(machine.ensure_can_resume().is_err());
    }
}
