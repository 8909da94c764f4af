//! Maintenance: scheduled data-retention routines.
//!
//! Three independent cleanups, each scoped so premium-owned data is never touched:
//! - guest sessions (no owner) older than 24h
//! - free-tier CV documents older than 30 days, plus their stored files
//! - free-tier CV analyses older than 90 days
//!
//! Every routine catches its own failure and reports it in a `TaskOutcome`, so
//! `run_maintenance_tasks` always returns a full report. There is no retry and no
//! transaction across the CV file/row delete: a crash between the two leaves orphaned
//! blobs, which the next run does not revisit.

pub mod backup;
pub mod health;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::gateway::{ids_of, DataGateway, Filter, GatewayError, Table};
use crate::models::profile::SubscriptionStatus;
use crate::storage::ObjectStorage;

/// Age thresholds after which free-tier and guest data is reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub guest_session_ttl: Duration,
    pub cv_document_ttl: Duration,
    pub analysis_ttl: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            guest_session_ttl: Duration::hours(24),
            cv_document_ttl: Duration::days(30),
            analysis_ttl: Duration::days(90),
        }
    }
}

#[derive(Debug, Error)]
enum TaskError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("retention period must be positive, got {0}")]
    NonPositiveRetention(Duration),

    #[error("retention period {0} reaches past the earliest representable time")]
    CutoffOutOfRange(Duration),
}

/// `now - ttl`, refusing periods that would reach into the future or overflow.
fn cutoff(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, TaskError> {
    if ttl <= Duration::zero() {
        return Err(TaskError::NonPositiveRetention(ttl));
    }
    now.checked_sub_signed(ttl)
        .ok_or(TaskError::CutoffOutOfRange(ttl))
}

/// Result of one routine: a count, or zero plus the error message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskOutcome {
    pub deleted: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskOutcome {
    pub fn ok(deleted: u64) -> Self {
        Self {
            deleted,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            deleted: 0,
            error: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub guest_sessions: TaskOutcome,
    pub old_cv_files: TaskOutcome,
    pub old_analyses: TaskOutcome,
}

impl MaintenanceReport {
    pub fn total_deleted(&self) -> u64 {
        self.guest_sessions.deleted + self.old_cv_files.deleted + self.old_analyses.deleted
    }

    pub fn failure_count(&self) -> usize {
        [&self.guest_sessions, &self.old_cv_files, &self.old_analyses]
            .iter()
            .filter(|outcome| !outcome.is_ok())
            .count()
    }
}

pub struct DatabaseMaintenance {
    gateway: Arc<dyn DataGateway>,
    storage: Arc<dyn ObjectStorage>,
    policy: RetentionPolicy,
}

impl DatabaseMaintenance {
    pub fn new(
        gateway: Arc<dyn DataGateway>,
        storage: Arc<dyn ObjectStorage>,
        policy: RetentionPolicy,
    ) -> Self {
        Self {
            gateway,
            storage,
            policy,
        }
    }

    /// Deletes ownerless session rows older than the guest TTL.
    pub async fn cleanup_guest_sessions(&self) -> TaskOutcome {
        into_outcome("guest_sessions", self.try_cleanup_guest_sessions(Utc::now()).await)
    }

    /// Deletes free-tier CV documents past retention; their stored files go first, best effort.
    pub async fn cleanup_old_cv_files(&self) -> TaskOutcome {
        into_outcome("old_cv_files", self.try_cleanup_old_cv_files(Utc::now()).await)
    }

    /// Hard-deletes free-tier analyses past retention. Nothing is copied elsewhere.
    pub async fn archive_old_analyses(&self) -> TaskOutcome {
        into_outcome("old_analyses", self.try_archive_old_analyses(Utc::now()).await)
    }

    /// Runs the three routines concurrently and joins them into one report. Never fails.
    pub async fn run_maintenance_tasks(&self) -> MaintenanceReport {
        info!("Starting maintenance run");

        let (guest_sessions, old_cv_files, old_analyses) = tokio::join!(
            self.cleanup_guest_sessions(),
            self.cleanup_old_cv_files(),
            self.archive_old_analyses(),
        );

        let report = MaintenanceReport {
            guest_sessions,
            old_cv_files,
            old_analyses,
        };
        info!(
            total_deleted = report.total_deleted(),
            failures = report.failure_count(),
            "Maintenance run finished"
        );
        report
    }

    async fn try_cleanup_guest_sessions(&self, now: DateTime<Utc>) -> Result<u64, TaskError> {
        let cutoff = cutoff(now, self.policy.guest_session_ttl)?;
        let deleted = self
            .gateway
            .delete(
                Table::UserSessions,
                &Filter::new().is_null("user_id").lt("created_at", cutoff),
            )
            .await?;
        Ok(deleted)
    }

    async fn try_cleanup_old_cv_files(&self, now: DateTime<Utc>) -> Result<u64, TaskError> {
        let cutoff = cutoff(now, self.policy.cv_document_ttl)?;
        let free_users = self.free_tier_user_ids().await?;
        if free_users.is_empty() {
            return Ok(0);
        }

        let old_cvs = self
            .gateway
            .select(
                Table::CvDocuments,
                &Filter::new()
                    .lt("created_at", cutoff)
                    .in_list("user_id", free_users),
            )
            .await?;
        if old_cvs.is_empty() {
            return Ok(0);
        }

        let files: Vec<String> = old_cvs
            .iter()
            .filter_map(|row| row.get("file_url").and_then(Value::as_str))
            .filter(|key| !key.is_empty())
            .map(String::from)
            .collect();

        // Row deletion proceeds even if the storage cleanup fails.
        if !files.is_empty() {
            if let Err(err) = self.storage.remove_objects(&files).await {
                warn!(
                    files = files.len(),
                    error = %err,
                    "Some CV files could not be deleted from storage"
                );
            }
        }

        let ids = ids_of(&old_cvs, "id");
        let deleted = self
            .gateway
            .delete(Table::CvDocuments, &Filter::new().in_list("id", ids))
            .await?;
        Ok(deleted)
    }

    async fn try_archive_old_analyses(&self, now: DateTime<Utc>) -> Result<u64, TaskError> {
        let cutoff = cutoff(now, self.policy.analysis_ttl)?;
        let free_users = self.free_tier_user_ids().await?;
        if free_users.is_empty() {
            return Ok(0);
        }

        let deleted = self
            .gateway
            .delete(
                Table::CvAnalyses,
                &Filter::new()
                    .lt("created_at", cutoff)
                    .in_list("user_id", free_users),
            )
            .await?;
        Ok(deleted)
    }

    async fn free_tier_user_ids(&self) -> Result<Vec<Uuid>, GatewayError> {
        let profiles = self
            .gateway
            .select(
                Table::Profiles,
                &Filter::new().eq("subscription_status", SubscriptionStatus::Free.as_str()),
            )
            .await?;
        Ok(ids_of(&profiles, "id"))
    }
}

fn into_outcome(task: &'static str, result: Result<u64, TaskError>) -> TaskOutcome {
    match result {
        Ok(deleted) => {
            info!(task, deleted, "Maintenance task finished");
            TaskOutcome::ok(deleted)
        }
        Err(err) => {
            error!(task, error = %err, "Maintenance task failed");
            TaskOutcome::failed(err.to_string())
        }
    }
}
