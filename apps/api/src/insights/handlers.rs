//! Axum route handlers for the Insights API.

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::insights::generator::{
    analyze_cv, generate_interview_questions, optimize_cv, Requester,
};
use crate::models::insights::{CvAnalysisRow, CvOptimizationRow, InterviewQuestionsRow};
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CvAndJobRequest {
    pub user_id: Uuid,
    pub cv_document_id: Uuid,
    pub job_description_id: Uuid,
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InterviewQuestionsRequest {
    pub user_id: Uuid,
    pub job_description_id: Uuid,
    pub session_id: Option<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/analyses
///
/// Usage-gated. Free users get one analysis per calendar month.
pub async fn handle_create_analysis(
    State(state): State<AppState>,
    Json(request): Json<CvAndJobRequest>,
) -> Result<(StatusCode, Json<CvAnalysisRow>), AppError> {
    let requester = Requester {
        user_id: request.user_id,
        session_id: request.session_id,
    };
    let row = analyze_cv(
        state.gateway.as_ref(),
        &state.llm,
        &requester,
        request.cv_document_id,
        request.job_description_id,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(row)))
}

/// POST /api/v1/interview-questions
pub async fn handle_create_interview_questions(
    State(state): State<AppState>,
    Json(request): Json<InterviewQuestionsRequest>,
) -> Result<(StatusCode, Json<InterviewQuestionsRow>), AppError> {
    let requester = Requester {
        user_id: request.user_id,
        session_id: request.session_id,
    };
    let row = generate_interview_questions(
        state.gateway.as_ref(),
        &state.llm,
        &requester,
        request.job_description_id,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(row)))
}

/// POST /api/v1/optimizations
pub async fn handle_create_optimization(
    State(state): State<AppState>,
    Json(request): Json<CvAndJobRequest>,
) -> Result<(StatusCode, Json<CvOptimizationRow>), AppError> {
    let requester = Requester {
        user_id: request.user_id,
        session_id: request.session_id,
    };
    let row = optimize_cv(
        state.gateway.as_ref(),
        &state.llm,
        &requester,
        request.cv_document_id,
        request.job_description_id,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(row)))
}
