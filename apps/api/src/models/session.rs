use serde::{Deserialize, Serialize};

/// Tracked action kinds. Rows in `user_sessions` without a `user_id` are guest activity
/// and expire after 24h.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    CvAnalysis,
    InterviewQuestions,
    CvOptimization,
    Login,
    Logout,
}
