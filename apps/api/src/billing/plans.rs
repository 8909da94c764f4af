use serde::Serialize;

use crate::models::profile::SubscriptionStatus;
use crate::models::session::ActivityType;

/// Monthly allowance per feature; `None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageLimits {
    pub cv_analysis: Option<u32>,
    pub interview_questions: Option<u32>,
    pub cv_optimization: Option<u32>,
}

impl UsageLimits {
    pub fn limit_for(&self, activity: ActivityType) -> Option<u32> {
        match activity {
            ActivityType::CvAnalysis => self.cv_analysis,
            ActivityType::InterviewQuestions => self.interview_questions,
            ActivityType::CvOptimization => self.cv_optimization,
            ActivityType::Login | ActivityType::Logout => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Plan {
    pub name: &'static str,
    pub price: f64,
    pub limits: UsageLimits,
}

pub const FREE: Plan = Plan {
    name: "Free",
    price: 0.0,
    limits: UsageLimits {
        cv_analysis: Some(1),
        interview_questions: Some(5),
        cv_optimization: Some(1),
    },
};

pub const PREMIUM: Plan = Plan {
    name: "Premium",
    price: 9.99,
    limits: UsageLimits {
        cv_analysis: None,
        interview_questions: None,
        cv_optimization: None,
    },
};

pub fn plan_for(status: SubscriptionStatus) -> &'static Plan {
    match status {
        SubscriptionStatus::Free => &FREE,
        SubscriptionStatus::Premium => &PREMIUM,
    }
}
