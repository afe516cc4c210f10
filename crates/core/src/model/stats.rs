use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::ids::{ExamResultId, QuestionId, SubjectId};
use crate::model::question::{Difficulty, Question};
use crate::model::session::SessionMode;
use crate::model::subject::SUBJECTS;

/// Number of completed sessions kept in the history.
pub const HISTORY_LIMIT: usize = 50;

/// Accuracy below which an attempted subject is flagged as weakest.
pub const WEAK_ACCURACY_THRESHOLD: u32 = 50;

//
// ─── RECORDS ──────────────────────────────────────────────────────────────────
//

/// Attempted/correct counters for one subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStats {
    #[serde(default)]
    pub total_attempted: u32,
    #[serde(default)]
    pub total_correct: u32,
}

impl SubjectStats {
    #[must_use]
    pub fn accuracy(&self) -> u32 {
        accuracy(self.total_correct, self.total_attempted)
    }
}

/// One completed session, appended exactly once when it finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamResult {
    pub id: ExamResultId,
    pub date: DateTime<Utc>,
    pub subject_id: SubjectId,
    #[serde(default)]
    pub subject_name: String,
    #[serde(default)]
    pub score: u32,
    #[serde(default)]
    pub total_questions: u32,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub mode: SessionMode,
}

impl ExamResult {
    /// Score as a rounded percentage of the questions loaded.
    #[must_use]
    pub fn percentage(&self) -> u32 {
        accuracy(self.score, self.total_questions)
    }
}

/// A question saved for later, with the time it was saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkedQuestion {
    #[serde(flatten)]
    pub question: Question,
    pub saved_at: DateTime<Utc>,
}

/// The single aggregate record behind the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    #[serde(default)]
    pub total_questions: u32,
    #[serde(default)]
    pub total_correct: u32,
    #[serde(default)]
    pub subject_stats: BTreeMap<SubjectId, SubjectStats>,
    #[serde(default)]
    pub history: Vec<ExamResult>,
    #[serde(default)]
    pub bookmarks: Vec<BookmarkedQuestion>,
}

impl UserStats {
    /// Fresh record with every catalog subject zeroed.
    #[must_use]
    pub fn initial() -> Self {
        let mut stats = Self::default();
        stats.fill_missing_subjects();
        stats
    }

    /// Adds zeroed counters for catalog subjects the record does not know yet.
    pub fn fill_missing_subjects(&mut self) {
        for subject in SUBJECTS {
            self.subject_stats.entry(subject.subject_id()).or_default();
        }
    }

    pub fn record_answer(&mut self, subject: &SubjectId, is_correct: bool) {
        self.total_questions = self.total_questions.saturating_add(1);
        let entry = self.subject_stats.entry(subject.clone()).or_default();
        entry.total_attempted = entry.total_attempted.saturating_add(1);
        if is_correct {
            self.total_correct = self.total_correct.saturating_add(1);
            entry.total_correct = entry.total_correct.saturating_add(1);
        }
    }

    /// Puts `result` at the head of the history and drops the oldest entries
    /// beyond `HISTORY_LIMIT`. A result whose id is already recorded is ignored.
    pub fn push_result(&mut self, result: ExamResult) {
        if self.history.iter().any(|r| r.id == result.id) {
            return;
        }
        self.history.insert(0, result);
        self.history.truncate(HISTORY_LIMIT);
    }

    #[must_use]
    pub fn is_bookmarked(&self, id: &QuestionId) -> bool {
        self.bookmarks.iter().any(|b| b.question.id() == id)
    }

    /// Adds the question at the head, or removes it if already saved.
    ///
    /// Returns whether the question is bookmarked afterwards.
    pub fn toggle_bookmark(&mut self, question: &Question, saved_at: DateTime<Utc>) -> bool {
        if let Some(pos) = self
            .bookmarks
            .iter()
            .position(|b| b.question.id() == question.id())
        {
            self.bookmarks.remove(pos);
            false
        } else {
            self.bookmarks.insert(
                0,
                BookmarkedQuestion {
                    question: question.clone(),
                    saved_at,
                },
            );
            true
        }
    }

    /// Dashboard figures derived from the counters.
    #[must_use]
    pub fn overview(&self) -> StatsOverview {
        let mut subjects: Vec<SubjectPerformance> = SUBJECTS
            .iter()
            .map(|subject| {
                let counters = self
                    .subject_stats
                    .get(&subject.subject_id())
                    .copied()
                    .unwrap_or_default();
                SubjectPerformance {
                    subject_id: subject.subject_id(),
                    name: subject.name.to_string(),
                    total_attempted: counters.total_attempted,
                    total_correct: counters.total_correct,
                    accuracy: counters.accuracy(),
                }
            })
            .collect();
        subjects.sort_by(|a, b| b.accuracy.cmp(&a.accuracy));

        let weakest = subjects
            .iter()
            .rev()
            .find(|s| s.total_attempted > 0 && s.accuracy < WEAK_ACCURACY_THRESHOLD)
            .cloned();

        StatsOverview {
            total_questions: self.total_questions,
            total_correct: self.total_correct,
            accuracy: accuracy(self.total_correct, self.total_questions),
            subjects,
            weakest,
            exams_taken: self.history.len(),
            bookmark_count: self.bookmarks.len(),
        }
    }
}

//
// ─── OVERVIEW ─────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectPerformance {
    pub subject_id: SubjectId,
    pub name: String,
    pub total_attempted: u32,
    pub total_correct: u32,
    pub accuracy: u32,
}

/// Aggregated dashboard view; subjects are ordered best accuracy first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsOverview {
    pub total_questions: u32,
    pub total_correct: u32,
    pub accuracy: u32,
    pub subjects: Vec<SubjectPerformance>,
    pub weakest: Option<SubjectPerformance>,
    pub exams_taken: usize,
    pub bookmark_count: usize,
}

/// Rounded percentage, 0 when nothing was attempted.
#[must_use]
pub fn accuracy(correct: u32, attempted: u32) -> u32 {
    if attempted == 0 {
        return 0;
    }
    let pct = (f64::from(correct) / f64::from(attempted) * 100.0).round();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        pct as u32
    }
}
