//! Durable key space shared by every backend.

use quiz_core::model::SubjectId;

/// Aggregate stats, history and bookmarks.
pub const STATS_KEY: &str = "prepMasterStats";

/// Signed-in learner profile.
pub const PROFILE_KEY: &str = "prepMasterUser";

const PROGRESS_PREFIX: &str = "quiz_progress_";

/// Slot holding the saved practice session of `subject`.
#[must_use]
pub fn progress_key(subject: &SubjectId) -> String {
    format!("{PROGRESS_PREFIX}{subject}")
}
