use quiz_core::model::stats::accuracy;
use quiz_core::model::{Question, QuizState, SessionMode};

/// Presentation-agnostic snapshot of where the learner is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizProgress {
    pub loaded: usize,
    pub answered: usize,
    pub current_index: usize,
    pub score: u32,
    /// Exam mode only.
    pub remaining_seconds: Option<u32>,
    /// Exam mode only, as `m:ss`.
    pub countdown: Option<String>,
    pub is_loading_more: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionOutcome {
    Correct,
    Wrong,
    Skipped,
}

/// One line of the post-session review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewItem<'a> {
    pub question: &'a Question,
    pub selected: Option<usize>,
    pub outcome: QuestionOutcome,
}

/// Results screen data for a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizReview<'a> {
    pub mode: SessionMode,
    pub items: Vec<ReviewItem<'a>>,
    pub score: u32,
    pub total: usize,
    pub attempted: usize,
    /// `round(score / attempted * 100)`, 0 when nothing was attempted.
    pub accuracy: u32,
}

impl<'a> QuizReview<'a> {
    pub(crate) fn build(state: &'a QuizState, mode: SessionMode) -> Self {
        let items: Vec<ReviewItem<'a>> = state
            .questions()
            .iter()
            .enumerate()
            .map(|(i, question)| {
                let selected = state.answer(i);
                let outcome = match selected {
                    None => QuestionOutcome::Skipped,
                    Some(option) if question.is_correct(option) => QuestionOutcome::Correct,
                    Some(_) => QuestionOutcome::Wrong,
                };
                ReviewItem {
                    question,
                    selected,
                    outcome,
                }
            })
            .collect();
        let attempted = state.answered_count();
        let attempted_u32 = u32::try_from(attempted).unwrap_or(u32::MAX);
        Self {
            mode,
            score: state.score(),
            total: items.len(),
            attempted,
            accuracy: accuracy(state.score(), attempted_u32),
            items,
        }
    }

    /// Explanations are part of the review in practice mode only.
    #[must_use]
    pub fn show_explanations(&self) -> bool {
        self.mode == SessionMode::Practice
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.total - self.attempted
    }
}
