use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::ids::{QuestionId, SubjectId};

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuestionError {
    #[error("question text cannot be empty")]
    EmptyText,

    #[error("a question needs at least two options, got {0}")]
    TooFewOptions(usize),

    #[error("correct answer index {index} is out of range for {len} options")]
    CorrectIndexOutOfRange { index: usize, len: usize },

    #[error("unknown difficulty: {0}")]
    UnknownDifficulty(String),

    #[error("unknown language: {0}")]
    UnknownLanguage(String),
}

//
// ─── DIFFICULTY ───────────────────────────────────────────────────────────────
//

/// Difficulty level chosen at the start of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Difficulty {
    #[serde(alias = "easy")]
    Easy,
    #[serde(alias = "medium")]
    Medium,
    #[serde(alias = "hard")]
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "Easy",
            Difficulty::Medium => "Medium",
            Difficulty::Hard => "Hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = QuestionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            _ => Err(QuestionError::UnknownDifficulty(s.to_string())),
        }
    }
}

//
// ─── LANGUAGE ─────────────────────────────────────────────────────────────────
//

/// Language the provider should write questions in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Language {
    #[default]
    English,
    Bengali,
    Hindi,
}

impl Language {
    /// Short ISO 639-1 code.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Bengali => "bn",
            Language::Hindi => "hi",
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Bengali => "Bengali",
            Language::Hindi => "Hindi",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Language {
    type Err = QuestionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" | "english" => Ok(Self::English),
            "bn" | "bengali" => Ok(Self::Bengali),
            "hi" | "hindi" => Ok(Self::Hindi),
            _ => Err(QuestionError::UnknownLanguage(s.to_string())),
        }
    }
}

//
// ─── QUESTION ─────────────────────────────────────────────────────────────────
//

/// Unvalidated question as produced by a provider or read from storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDraft {
    pub id: QuestionId,
    pub question_text: String,
    pub options: Vec<String>,
    pub correct_answer_index: usize,
    #[serde(default)]
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation_summary: Option<String>,
    pub subject: SubjectId,
    pub difficulty: Difficulty,
}

impl QuestionDraft {
    /// Check the draft and freeze it into a `Question`.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError` if the text is blank, fewer than two options
    /// are given, or the correct index does not point at an option.
    pub fn validate(self) -> Result<Question, QuestionError> {
        if self.question_text.trim().is_empty() {
            return Err(QuestionError::EmptyText);
        }
        if self.options.len() < 2 {
            return Err(QuestionError::TooFewOptions(self.options.len()));
        }
        if self.correct_answer_index >= self.options.len() {
            return Err(QuestionError::CorrectIndexOutOfRange {
                index: self.correct_answer_index,
                len: self.options.len(),
            });
        }
        Ok(Question { draft: self })
    }
}

/// A validated multiple-choice question. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "QuestionDraft", into = "QuestionDraft")]
pub struct Question {
    draft: QuestionDraft,
}

impl TryFrom<QuestionDraft> for Question {
    type Error = QuestionError;

    fn try_from(draft: QuestionDraft) -> Result<Self, Self::Error> {
        draft.validate()
    }
}

impl From<Question> for QuestionDraft {
    fn from(question: Question) -> Self {
        question.draft
    }
}

impl Question {
    #[must_use]
    pub fn id(&self) -> &QuestionId {
        &self.draft.id
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.draft.question_text
    }

    #[must_use]
    pub fn options(&self) -> &[String] {
        &self.draft.options
    }

    #[must_use]
    pub fn correct_answer_index(&self) -> usize {
        self.draft.correct_answer_index
    }

    #[must_use]
    pub fn explanation(&self) -> &str {
        &self.draft.explanation
    }

    #[must_use]
    pub fn explanation_summary(&self) -> Option<&str> {
        self.draft.explanation_summary.as_deref()
    }

    #[must_use]
    pub fn subject(&self) -> &SubjectId {
        &self.draft.subject
    }

    #[must_use]
    pub fn difficulty(&self) -> Difficulty {
        self.draft.difficulty
    }

    #[must_use]
    pub fn is_correct(&self, option_index: usize) -> bool {
        option_index == self.draft.correct_answer_index
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
