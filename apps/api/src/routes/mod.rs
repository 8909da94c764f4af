pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::billing::handlers as billing;
use crate::documents::{handlers as documents, MAX_UPLOAD_BYTES};
use crate::insights::handlers as insights;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Diagnostics (unauthenticated)
        .route("/api/test", get(health::diagnostics_handler))
        .route("/api/v1/admin/db-health", get(health::db_health_handler))
        // Documents API
        .route(
            "/api/v1/cvs",
            // multipart overhead on top of the file itself
            post(documents::handle_upload_cv).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + 64 * 1024)),
        )
        .route(
            "/api/v1/job-descriptions",
            post(documents::handle_create_job_description),
        )
        // Insights API (usage-gated)
        .route("/api/v1/analyses", post(insights::handle_create_analysis))
        .route(
            "/api/v1/interview-questions",
            post(insights::handle_create_interview_questions),
        )
        .route(
            "/api/v1/optimizations",
            post(insights::handle_create_optimization),
        )
        // Billing API
        .route("/api/v1/billing/checkout", post(billing::handle_create_checkout))
        .route(
            "/api/v1/billing/subscriptions/:id",
            get(billing::handle_get_subscription),
        )
        .route("/api/v1/billing/webhook", post(billing::handle_webhook))
        .with_state(state)
}
