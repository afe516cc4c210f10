use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::model::ids::SubjectId;
use crate::model::question::{Difficulty, Question};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SnapshotError {
    #[error("snapshot belongs to subject {found}, expected {expected}")]
    SubjectMismatch { expected: String, found: String },

    #[error("exam sessions cannot be resumed")]
    ExamMode,

    #[error("snapshot has no questions")]
    NoQuestions,

    #[error("snapshot is already finished")]
    Finished,

    #[error("current index {index} is outside {len} questions")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("{answers} answers recorded for {len} questions")]
    TooManyAnswers { answers: usize, len: usize },

    #[error("answer {option} for question {index} is not a valid option")]
    InvalidAnswer { index: usize, option: usize },

    #[error("stored score {stored} does not match recomputed score {computed}")]
    ScoreMismatch { stored: u32, computed: u32 },
}

//
// ─── MODE ─────────────────────────────────────────────────────────────────────
//

/// How a session is run. Fixed once the difficulty is chosen.
///
/// - `Practice`: immediate feedback, skippable, resumable, untimed
/// - `Exam`: deferred feedback, unskippable by policy, timed, never saved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    #[default]
    Practice,
    Exam,
}

impl SessionMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SessionMode::Practice => "practice",
            SessionMode::Exam => "exam",
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//
// ─── QUIZ STATE ───────────────────────────────────────────────────────────────
//

/// Question list and answer sheet of one session.
///
/// `answers` is positional: slot `i` holds the option picked for question `i`,
/// `None` when skipped or not reached yet. The list may be shorter than
/// `questions`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizState {
    questions: Vec<Question>,
    current_index: usize,
    score: u32,
    #[serde(default)]
    answers: Vec<Option<usize>>,
    #[serde(default)]
    is_finished: bool,
}

impl QuizState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    #[must_use]
    pub fn score(&self) -> u32 {
        self.score
    }

    #[must_use]
    pub fn answers(&self) -> &[Option<usize>] {
        &self.answers
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.is_finished
    }

    #[must_use]
    pub fn answer(&self, index: usize) -> Option<usize> {
        self.answers.get(index).copied().flatten()
    }

    #[must_use]
    pub fn is_answered(&self, index: usize) -> bool {
        self.answer(index).is_some()
    }

    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.answers.iter().filter(|a| a.is_some()).count()
    }

    /// The question at `current_index`, if it has been loaded.
    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.current_index)
    }

    /// Appends a batch at the end. Existing questions and answers are untouched.
    pub fn append(&mut self, batch: Vec<Question>) -> usize {
        let added = batch.len();
        self.questions.extend(batch);
        added
    }

    /// Records the first answer for `index`.
    ///
    /// Returns `Some(is_correct)` when recorded, `None` when the slot was
    /// already answered or `index` is not loaded.
    pub fn record_answer(&mut self, index: usize, option: usize) -> Option<bool> {
        let question = self.questions.get(index)?;
        if self.is_answered(index) {
            return None;
        }
        let is_correct = question.is_correct(option);
        if self.answers.len() <= index {
            self.answers.resize(index + 1, None);
        }
        self.answers[index] = Some(option);
        if is_correct {
            self.score += 1;
        }
        Some(is_correct)
    }

    pub fn set_current_index(&mut self, index: usize) {
        self.current_index = index;
    }

    pub fn mark_finished(&mut self) {
        self.is_finished = true;
    }

    /// Score derived from the answer sheet.
    #[must_use]
    pub fn computed_score(&self) -> u32 {
        let correct = self
            .questions
            .iter()
            .enumerate()
            .filter(|(i, q)| self.answer(*i).is_some_and(|a| q.is_correct(a)))
            .count();
        u32::try_from(correct).unwrap_or(u32::MAX)
    }

    /// Checks that a stored sheet can be continued.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotError` if the state is empty, finished, points past its
    /// questions, holds invalid answers, or its score disagrees with the sheet.
    pub fn validate_resumable(&self) -> Result<(), SnapshotError> {
        if self.questions.is_empty() {
            return Err(SnapshotError::NoQuestions);
        }
        if self.is_finished {
            return Err(SnapshotError::Finished);
        }
        if self.current_index >= self.questions.len() {
            return Err(SnapshotError::IndexOutOfRange {
                index: self.current_index,
                len: self.questions.len(),
            });
        }
        if self.answers.len() > self.questions.len() {
            return Err(SnapshotError::TooManyAnswers {
                answers: self.answers.len(),
                len: self.questions.len(),
            });
        }
        for (index, answer) in self.answers.iter().enumerate() {
            if let Some(option) = *answer {
                if option >= self.questions[index].options().len() {
                    return Err(SnapshotError::InvalidAnswer { index, option });
                }
            }
        }
        let computed = self.computed_score();
        if computed != self.score {
            return Err(SnapshotError::ScoreMismatch {
                stored: self.score,
                computed,
            });
        }
        Ok(())
    }
}

//
// ─── PERSISTED SESSION ────────────────────────────────────────────────────────
//

/// Practice session snapshot stored under `quiz_progress_<subject>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    pub subject: SubjectId,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub mode: SessionMode,
    pub state: QuizState,
    pub date: DateTime<Utc>,
}

impl PersistedSession {
    /// Checks the snapshot can resume a session for `subject`.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotError` if it belongs to another subject, was taken in
    /// exam mode, or its state is not resumable.
    pub fn validate_for(&self, subject: &SubjectId) -> Result<(), SnapshotError> {
        if &self.subject != subject {
            return Err(SnapshotError::SubjectMismatch {
                expected: subject.to_string(),
                found: self.subject.to_string(),
            });
        }
        if self.mode == SessionMode::Exam {
            return Err(SnapshotError::ExamMode);
        }
        self.state.validate_resumable()
    }
}
