//! Document upload endpoint.

use std::path::Path;

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use docuquery_core::types::{Document, ExtractionMethod, ExtractionStatus};

use crate::error::{extraction_status, ApiError, ApiResult};
use crate::state::AppState;

/// Response for an upload.
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub processed_files: usize,
    pub failed_files: usize,
    pub files: Vec<IngestedFile>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FileError>,
}

#[derive(Debug, Serialize)]
pub struct IngestedFile {
    pub document_id: String,
    pub file_name: Option<String>,
    pub size_bytes: usize,
    pub mime_type: String,
    pub result_id: Uuid,
    pub status: ExtractionStatus,
    pub method: ExtractionMethod,
    pub pages: usize,
}

#[derive(Debug, Serialize)]
pub struct FileError {
    pub file_index: usize,
    pub file_name: Option<String>,
    pub document_id: String,
    pub code: String,
    pub error: String,
    pub status_code: u16,
}

/// Ingest one or more files.
/// POST /ingest
///
/// Every multipart part with a file name is a document. Returns `202` when at least
/// one file was ingested and `400` when none was.
pub async fn ingest_files(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<IngestResponse>)> {
    let mut documents = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(e.status(), "BAD_MULTIPART", e.body_text()))?
    {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let declared = field
            .content_type()
            .filter(|ct| *ct != "application/octet-stream")
            .map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::new(e.status(), "BAD_MULTIPART", e.body_text()))?;

        let mime_type = declared
            .or_else(|| mime_from_file_name(&file_name).map(str::to_string))
            .unwrap_or_else(|| "application/octet-stream".to_string());
        documents.push(Document::new(bytes.to_vec(), mime_type).with_file_name(file_name));
    }

    let limit = state.workers.max_batch_size();
    if documents.is_empty() {
        return Err(ApiError::bad_request("At least one file must be provided"));
    }
    if documents.len() > limit {
        return Err(
            ApiError::bad_request(format!("Too many files. Maximum {limit} files per request"))
                .with_details(json!({ "max_files": limit, "received": documents.len() })),
        );
    }

    let received = documents.clone();
    let outcomes = state.workers.ingest_batch(documents).await;

    let mut files = Vec::new();
    let mut errors = Vec::new();
    for (index, (document, outcome)) in received.into_iter().zip(outcomes).enumerate() {
        match outcome {
            Ok(result) => files.push(IngestedFile {
                document_id: document.id().to_string(),
                file_name: document.file_name().map(str::to_string),
                size_bytes: document.size(),
                mime_type: document.mime_type().to_string(),
                result_id: result.id,
                status: result.status,
                method: result.method,
                pages: result.page_count(),
            }),
            Err(e) => errors.push(FileError {
                file_index: index,
                file_name: document.file_name().map(str::to_string),
                document_id: document.id().to_string(),
                code: e.code().as_str().to_string(),
                error: e.to_string(),
                status_code: extraction_status(&e).as_u16(),
            }),
        }
    }

    let response = IngestResponse {
        processed_files: files.len(),
        failed_files: errors.len(),
        files,
        errors,
    };

    if response.processed_files > 0 {
        info!(
            processed = response.processed_files,
            failed = response.failed_files,
            "Upload ingested"
        );
        Ok((StatusCode::ACCEPTED, Json(response)))
    } else {
        warn!(failed = response.failed_files, "No file in upload could be ingested");
        Ok((StatusCode::BAD_REQUEST, Json(response)))
    }
}

/// MIME type for the extensions the pipeline accepts.
fn mime_from_file_name(file_name: &str) -> Option<&'static str> {
    let extension = Path::new(file_name).extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "pdf" => Some("application/pdf"),
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "tif" | "tiff" => Some("image/tiff"),
        "bmp" => Some("image/bmp"),
        "txt" => Some("text/plain"),
        _ => None,
    }
}
