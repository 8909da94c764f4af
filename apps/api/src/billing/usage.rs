//! Monthly usage gating for the generation endpoints.

use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Utc};
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::gateway::{row_into, DataGateway, Filter, Row, RowLock, Table};
use crate::models::profile::ProfileRow;
use crate::models::session::ActivityType;

use super::plans::{plan_for, Plan};

/// Table holding the artifacts counted against an activity's allowance.
/// Session events such as logins produce no artifact.
pub fn artifact_table(activity: ActivityType) -> Option<Table> {
    match activity {
        ActivityType::CvAnalysis => Some(Table::CvAnalyses),
        ActivityType::InterviewQuestions => Some(Table::InterviewQuestions),
        ActivityType::CvOptimization => Some(Table::CvOptimizations),
        ActivityType::Login | ActivityType::Logout => None,
    }
}

fn activity_label(activity: ActivityType) -> &'static str {
    match activity {
        ActivityType::CvAnalysis => "CV analyses",
        ActivityType::InterviewQuestions => "interview question sets",
        ActivityType::CvOptimization => "CV optimizations",
        ActivityType::Login => "logins",
        ActivityType::Logout => "logouts",
    }
}

/// A metered activity that passed the usage check, carrying the plan it was checked against.
#[derive(Debug, Clone, Copy)]
pub struct Allowance {
    user_id: Uuid,
    activity: ActivityType,
    table: Table,
    plan: &'static Plan,
}

impl Allowance {
    fn limit(&self) -> Option<u32> {
        self.plan.limits.limit_for(self.activity)
    }
}

fn metered_table(activity: ActivityType) -> Result<Table, AppError> {
    artifact_table(activity).ok_or_else(|| {
        AppError::Validation(format!("{} are not metered", activity_label(activity)))
    })
}

fn usage_filter(user_id: Uuid, now: DateTime<Utc>) -> Filter {
    Filter::new()
        .eq("user_id", user_id)
        .gte("created_at", month_start(now))
}

fn limit_reached(allowance: &Allowance, limit: u32) -> AppError {
    AppError::UsageLimitReached(format!(
        "The {} plan includes {limit} {} per month. Upgrade to Premium for unlimited access.",
        allowance.plan.name,
        activity_label(allowance.activity)
    ))
}

/// Midnight UTC on the first day of `now`'s month.
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let first = now.date_naive().with_day(1).unwrap_or(now.date_naive());
    Utc.from_utc_datetime(&first.and_time(NaiveTime::MIN))
}

pub async fn load_profile(gateway: &dyn DataGateway, user_id: Uuid) -> Result<ProfileRow, AppError> {
    let row = gateway
        .select(Table::Profiles, &Filter::new().eq("id", user_id).limit(1))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NotFound(format!("Profile {user_id} not found")))?;
    Ok(row_into(row)?)
}

/// Fails with `UsageLimitReached` once a free user has used this month's allowance.
/// Runs before generation; [`insert_within_limit`] enforces the limit again at write time.
pub async fn ensure_within_limit(
    gateway: &dyn DataGateway,
    user_id: Uuid,
    activity: ActivityType,
    now: DateTime<Utc>,
) -> Result<Allowance, AppError> {
    let table = metered_table(activity)?;
    let profile = load_profile(gateway, user_id).await?;
    let allowance = Allowance {
        user_id,
        activity,
        table,
        plan: plan_for(profile.subscription_status),
    };
    let Some(limit) = allowance.limit() else {
        return Ok(allowance);
    };

    let used = gateway.count(table, &usage_filter(user_id, now)).await?;
    if used >= u64::from(limit) {
        info!(%user_id, ?activity, used, limit, "Usage limit reached");
        return Err(limit_reached(&allowance, limit));
    }
    Ok(allowance)
}

/// Stores the artifact for `allowance`. Limited plans count and insert while holding the
/// owner's profile row, so concurrent requests cannot both take the last slot.
pub async fn insert_within_limit(
    gateway: &dyn DataGateway,
    allowance: &Allowance,
    row: Row,
    now: DateTime<Utc>,
) -> Result<Row, AppError> {
    let Some(limit) = allowance.limit() else {
        return Ok(gateway.insert(allowance.table, row).await?);
    };

    let lock = RowLock {
        table: Table::Profiles,
        id: allowance.user_id,
    };
    let filter = usage_filter(allowance.user_id, now);
    match gateway
        .insert_below_limit(lock, allowance.table, &filter, u64::from(limit), row)
        .await?
    {
        Some(inserted) => Ok(inserted),
        None => {
            info!(user_id = %allowance.user_id, activity = ?allowance.activity, limit,
                "Usage limit reached while saving");
            Err(limit_reached(allowance, limit))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::memory::MemoryGateway;
    use chrono::Duration;
    use serde_json::json;

    fn seed_profile(gateway: &MemoryGateway, status: &str) -> Uuid {
        let id = Uuid::new_v4();
        gateway.seed(
            Table::Profiles,
            json!({
                "id": id,
                "email": "grace@example.com",
                "subscription_status": status,
                "created_at": "2025-01-01T00:00:00Z",
            }),
        );
        id
    }

    fn seed_analysis(gateway: &MemoryGateway, user: Uuid, at: DateTime<Utc>) {
        gateway.seed(
            Table::CvAnalyses,
            json!({ "id": Uuid::new_v4(), "user_id": user, "created_at": at }),
        );
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_month_start() {
        assert_eq!(
            month_start(now()),
            Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_free_user_blocked_at_limit() {
        let gateway = MemoryGateway::new();
        let user = seed_profile(&gateway, "free");

        assert!(ensure_within_limit(&gateway, user, ActivityType::CvAnalysis, now())
            .await
            .is_ok());

        seed_analysis(&gateway, user, now() - Duration::days(2));
        let err = ensure_within_limit(&gateway, user, ActivityType::CvAnalysis, now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UsageLimitReached(_)));
    }

    #[tokio::test]
    async fn test_previous_month_usage_does_not_count() {
        let gateway = MemoryGateway::new();
        let user = seed_profile(&gateway, "free");
        seed_analysis(&gateway, user, now() - Duration::days(20));

        assert!(ensure_within_limit(&gateway, user, ActivityType::CvAnalysis, now())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_premium_is_never_blocked() {
        let gateway = MemoryGateway::new();
        let user = seed_profile(&gateway, "premium");
        for _ in 0..10 {
            seed_analysis(&gateway, user, now() - Duration::hours(1));
        }
        assert!(ensure_within_limit(&gateway, user, ActivityType::CvAnalysis, now())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_insert_refused_once_the_slot_is_taken() {
        let gateway = MemoryGateway::new();
        let user = seed_profile(&gateway, "free");
        let allowance = ensure_within_limit(&gateway, user, ActivityType::CvAnalysis, now())
            .await
            .unwrap();

        // Another request saves its analysis between our check and our insert.
        seed_analysis(&gateway, user, now() - Duration::minutes(1));

        let row = json!({ "user_id": user }).as_object().cloned().unwrap();
        let err = insert_within_limit(&gateway, &allowance, row, now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UsageLimitReached(_)));
        assert_eq!(gateway.rows(Table::CvAnalyses).len(), 1);
    }

    #[tokio::test]
    async fn test_premium_insert_is_unguarded() {
        let gateway = MemoryGateway::new();
        let user = seed_profile(&gateway, "premium");
        seed_analysis(&gateway, user, now() - Duration::hours(1));
        let allowance = ensure_within_limit(&gateway, user, ActivityType::CvAnalysis, now())
            .await
            .unwrap();

        let row = json!({ "user_id": user }).as_object().cloned().unwrap();
        insert_within_limit(&gateway, &allowance, row, now()).await.unwrap();
        assert_eq!(gateway.rows(Table::CvAnalyses).len(), 2);
    }

    #[tokio::test]
    async fn test_session_events_are_not_metered() {
        let gateway = MemoryGateway::new();
        let user = seed_profile(&gateway, "free");
        for activity in [ActivityType::Login, ActivityType::Logout] {
            assert!(artifact_table(activity).is_none());
            let err = ensure_within_limit(&gateway, user, activity, now())
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
        }
    }

    #[tokio::test]
    async fn test_unknown_profile_is_not_found() {
        let gateway = MemoryGateway::new();
        let err = ensure_within_limit(&gateway, Uuid::new_v4(), ActivityType::CvOptimization, now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
