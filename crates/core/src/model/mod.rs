mod ids;
mod profile;
mod question;
mod session;
pub mod stats;
pub mod subject;

pub use ids::{ExamResultId, QuestionId, SubjectId};
pub use profile::UserProfile;
pub use question::{Difficulty, Language, Question, QuestionDraft, QuestionError};
pub use session::{PersistedSession, QuizState, SessionMode, SnapshotError};
pub use stats::{
    BookmarkedQuestion, ExamResult, StatsOverview, SubjectPerformance, SubjectStats, UserStats,
};
pub use subject::{Subject, SUBJECTS};
