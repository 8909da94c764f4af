//! Documents: CV uploads and job descriptions.
//!
//! Uploaded files land in the CV bucket under `<user_id>/<uuid>.<ext>`; the extracted
//! text is stored on the `cv_documents` row so generation never re-reads the blob.

pub mod extract;
pub mod handlers;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::billing::usage::load_profile;
use crate::errors::AppError;
use crate::gateway::{row_into, to_row, DataGateway, Table};
use crate::models::documents::{CvDocumentRow, JobDescriptionRow};
use crate::storage::ObjectStorage;

use extract::{extract_text, DocumentKind};

/// Largest accepted CV upload.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

const MAX_TITLE_CHARS: usize = 200;

/// A CV as received from the client, before extraction.
#[derive(Debug, Clone)]
pub struct CvUpload {
    pub user_id: Uuid,
    pub title: Option<String>,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Serialize)]
struct NewCvDocument<'a> {
    user_id: Uuid,
    title: &'a str,
    content: &'a str,
    file_url: &'a str,
    file_type: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJobDescription {
    pub user_id: Uuid,
    pub title: String,
    pub company: Option<String>,
    pub description: String,
    pub requirements: Option<String>,
}

pub fn object_key(user_id: Uuid, file_id: Uuid, kind: DocumentKind) -> String {
    format!("{user_id}/{file_id}.{}", kind.extension())
}

/// Extracts text, uploads the file and records the document.
pub async fn store_cv(
    gateway: &dyn DataGateway,
    storage: &dyn ObjectStorage,
    upload: CvUpload,
) -> Result<CvDocumentRow, AppError> {
    if upload.bytes.is_empty() {
        return Err(AppError::Validation("file must not be empty".to_string()));
    }
    if upload.bytes.len() > MAX_UPLOAD_BYTES {
        return Err(AppError::Validation(format!(
            "file exceeds the {} MB limit",
            MAX_UPLOAD_BYTES / (1024 * 1024)
        )));
    }

    let kind = DocumentKind::detect(upload.file_name.as_deref(), upload.content_type.as_deref())
        .map_err(|e| AppError::Validation(e.to_string()))?;
    let title = resolve_title(upload.title.as_deref(), upload.file_name.as_deref())?;

    load_profile(gateway, upload.user_id).await?;

    let CvUpload { user_id, bytes, .. } = upload;
    let (content, bytes) = tokio::task::spawn_blocking(move || {
        let text = extract_text(kind, &bytes);
        (text, bytes)
    })
    .await
    .map_err(|e| {
        if e.is_panic() {
            AppError::Validation("could not read file".to_string())
        } else {
            AppError::Internal(e.into())
        }
    })?;
    let content = content.map_err(|e| AppError::Validation(e.to_string()))?;

    let key = object_key(user_id, Uuid::new_v4(), kind);
    storage
        .put_object(&key, bytes, kind.mime_type())
        .await
        .map_err(|e| AppError::Storage(format!("{e:#}")))?;

    let row = to_row(&NewCvDocument {
        user_id,
        title: &title,
        content: &content,
        file_url: &key,
        file_type: kind.mime_type(),
    })?;
    let document: CvDocumentRow = row_into(gateway.insert(Table::CvDocuments, row).await?)?;

    info!(
        %user_id,
        document_id = %document.id,
        chars = document.content.len(),
        "Stored CV document"
    );
    Ok(document)
}

pub async fn create_job_description(
    gateway: &dyn DataGateway,
    mut request: NewJobDescription,
) -> Result<JobDescriptionRow, AppError> {
    request.title = request.title.trim().to_string();
    request.description = request.description.trim().to_string();
    if request.title.is_empty() {
        return Err(AppError::Validation("title cannot be empty".to_string()));
    }
    if request.description.is_empty() {
        return Err(AppError::Validation("description cannot be empty".to_string()));
    }

    load_profile(gateway, request.user_id).await?;

    let inserted = gateway
        .insert(Table::JobDescriptions, to_row(&request)?)
        .await?;
    let job: JobDescriptionRow = row_into(inserted)?;
    info!(user_id = %job.user_id, job_description_id = %job.id, "Created job description");
    Ok(job)
}

fn resolve_title(title: Option<&str>, file_name: Option<&str>) -> Result<String, AppError> {
    let from_file = file_name.map(|name| name.rsplit_once('.').map_or(name, |(stem, _)| stem));
    let title = title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .or(from_file.map(str::trim).filter(|t| !t.is_empty()))
        .ok_or_else(|| AppError::Validation("title is required".to_string()))?;

    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(AppError::Validation(format!(
            "title must be at most {MAX_TITLE_CHARS} characters"
        )));
    }
    Ok(title.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::memory::MemoryGateway;
    use crate::storage::memory::MemoryStorage;
    use chrono::Utc;
    use serde_json::json;

    fn seed_user(gateway: &MemoryGateway) -> Uuid {
        let id = Uuid::new_v4();
        gateway.seed(
            Table::Profiles,
            json!({
                "id": id,
                "email": "sam@example.com",
                "subscription_status": "free",
                "created_at": Utc::now(),
            }),
        );
        id
    }

    fn text_upload(user_id: Uuid, bytes: &[u8]) -> CvUpload {
        CvUpload {
            user_id,
            title: None,
            file_name: Some("jane-doe.txt".to_string()),
            content_type: Some("text/plain".to_string()),
            bytes: bytes.to_vec(),
        }
    }

    #[test]
    fn test_object_key_layout() {
        let user = Uuid::nil();
        let file = Uuid::from_u128(1);
        assert_eq!(
            object_key(user, file, DocumentKind::Pdf),
            format!("{user}/{file}.pdf")
        );
    }

    #[test]
    fn test_title_falls_back_to_file_stem() {
        assert_eq!(resolve_title(None, Some("My CV.pdf")).unwrap(), "My CV");
        assert_eq!(resolve_title(Some("  Main "), Some("x.pdf")).unwrap(), "Main");
        assert!(resolve_title(Some(" "), None).is_err());
    }

    #[tokio::test]
    async fn test_store_text_cv_uploads_and_inserts() {
        let gateway = MemoryGateway::new();
        let storage = MemoryStorage::new();
        let user = seed_user(&gateway);

        let document = store_cv(&gateway, &storage, text_upload(user, b"Jane Doe\nRust engineer"))
            .await
            .unwrap();

        assert_eq!(document.title, "jane-doe");
        assert_eq!(document.content, "Jane Doe\nRust engineer");
        let key = document.file_url.clone().unwrap();
        assert!(key.starts_with(&format!("{user}/")));
        assert!(key.ends_with(".txt"));

        let (bytes, content_type) = storage.get(&key).unwrap();
        assert_eq!(bytes, b"Jane Doe\nRust engineer");
        assert_eq!(content_type, "text/plain");
        assert_eq!(gateway.rows(Table::CvDocuments).len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_uploads_store_nothing() {
        let gateway = MemoryGateway::new();
        let storage = MemoryStorage::new();
        let user = seed_user(&gateway);

        let empty = store_cv(&gateway, &storage, text_upload(user, b"")).await;
        assert!(matches!(empty, Err(AppError::Validation(_))));

        let mut docx = text_upload(user, b"PK\x03\x04");
        docx.file_name = Some("cv.docx".to_string());
        docx.content_type = None;
        let unsupported = store_cv(&gateway, &storage, docx).await;
        assert!(matches!(unsupported, Err(AppError::Validation(_))));

        let unknown_user = store_cv(&gateway, &storage, text_upload(Uuid::new_v4(), b"text")).await;
        assert!(matches!(unknown_user, Err(AppError::NotFound(_))));

        assert!(storage.keys().is_empty());
        assert!(gateway.rows(Table::CvDocuments).is_empty());
    }

    #[tokio::test]
    async fn test_create_job_description_trims_and_validates() {
        let gateway = MemoryGateway::new();
        let user = seed_user(&gateway);

        let job = create_job_description(
            &gateway,
            NewJobDescription {
                user_id: user,
                title: "  Backend Engineer ".to_string(),
                company: Some("Acme".to_string()),
                description: "Build services.".to_string(),
                requirements: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(job.title, "Backend Engineer");
        assert_eq!(job.company.as_deref(), Some("Acme"));

        let err = create_job_description(
            &gateway,
            NewJobDescription {
                user_id: user,
                title: "Anything".to_string(),
                company: None,
                description: "   ".to_string(),
                requirements: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
