use serde::{Deserialize, Serialize};

/// Locally stored identity of the learner. Read-only for the quiz core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub is_verified: bool,
}
