//! Axum route handlers for the Documents API.

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use tracing::warn;
use uuid::Uuid;

use crate::documents::{create_job_description, store_cv, CvUpload, NewJobDescription};
use crate::errors::AppError;
use crate::models::documents::{CvDocumentRow, JobDescriptionRow};
use crate::state::AppState;

/// POST /api/v1/cvs
///
/// Multipart fields: `user_id`, optional `title`, and `file` (PDF or plain text).
pub async fn handle_upload_cv(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<CvDocumentRow>), AppError> {
    let mut user_id: Option<Uuid> = None;
    let mut title: Option<String> = None;
    let mut file: Option<(Option<String>, Option<String>, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        warn!(error = %err, "invalid multipart data");
        AppError::Validation(format!("invalid multipart data: {err}"))
    })? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "user_id" => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| AppError::Validation(format!("invalid user_id: {err}")))?;
                let parsed = Uuid::parse_str(value.trim())
                    .map_err(|_| AppError::Validation("user_id must be a valid UUID".to_string()))?;
                user_id = Some(parsed);
            }
            "title" => {
                title = Some(
                    field
                        .text()
                        .await
                        .map_err(|err| AppError::Validation(format!("invalid title: {err}")))?,
                );
            }
            "file" => {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(|err| {
                    warn!(error = %err, "failed to read file bytes");
                    AppError::Validation(format!("failed to read file bytes: {err}"))
                })?;
                file = Some((file_name, content_type, data.to_vec()));
            }
            _ => {}
        }
    }

    let user_id =
        user_id.ok_or_else(|| AppError::Validation("user_id field is required".to_string()))?;
    let (file_name, content_type, bytes) =
        file.ok_or_else(|| AppError::Validation("file field is required".to_string()))?;

    let document = store_cv(
        state.gateway.as_ref(),
        state.storage.as_ref(),
        CvUpload {
            user_id,
            title,
            file_name,
            content_type,
            bytes,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(document)))
}

/// POST /api/v1/job-descriptions
pub async fn handle_create_job_description(
    State(state): State<AppState>,
    Json(request): Json<NewJobDescription>,
) -> Result<(StatusCode, Json<JobDescriptionRow>), AppError> {
    let job = create_job_description(state.gateway.as_ref(), request).await?;
    Ok((StatusCode::CREATED, Json(job)))
}
