use crate::model::ids::SubjectId;

/// Identifier of the full mock exam spanning every subject.
pub const COMPREHENSIVE_SUBJECT_ID: &str = "all_subjects";

/// Questions requested per batch for the full mock exam.
pub const COMPREHENSIVE_BATCH_SIZE: usize = 25;

/// Questions requested per batch for a single subject.
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// A practice subject shown on the home screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subject {
    pub id: &'static str,
    pub name: &'static str,
}

/// Subjects tracked in the stats record. The mock exam is not part of it.
pub const SUBJECTS: [Subject; 8] = [
    Subject { id: "gen_science", name: "General Science" },
    Subject { id: "gk", name: "General Knowledge" },
    Subject { id: "current_affairs", name: "Current Affairs" },
    Subject { id: "english", name: "English" },
    Subject { id: "math", name: "Mathematics" },
    Subject { id: "reasoning", name: "Reasoning" },
    Subject { id: "history", name: "History" },
    Subject { id: "geography", name: "Geography" },
];

impl Subject {
    #[must_use]
    pub fn subject_id(&self) -> SubjectId {
        SubjectId::new(self.id)
    }

    /// Looks up a catalog subject by id.
    #[must_use]
    pub fn find(id: &SubjectId) -> Option<Subject> {
        SUBJECTS.iter().copied().find(|s| s.id == id.as_str())
    }
}

impl SubjectId {
    #[must_use]
    pub fn is_comprehensive(&self) -> bool {
        self.as_str() == COMPREHENSIVE_SUBJECT_ID
    }

    /// Number of questions to request for each batch of this subject.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        if self.is_comprehensive() {
            COMPREHENSIVE_BATCH_SIZE
        } else {
            DEFAULT_BATCH_SIZE
        }
    }

    /// Human readable name; unknown ids fall back to the raw id.
    #[must_use]
    pub fn display_name(&self) -> String {
        if self.is_comprehensive() {
            return "Full Mock Exam".to_string();
        }
        Subject::find(self).map_or_else(|| self.as_str().to_string(), |s| s.name.to_string())
    }
}
