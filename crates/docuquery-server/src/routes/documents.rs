//! Document query endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use docuquery_core::types::{ExtractionResult, MetadataRecord};

use crate::error::ApiResult;
use crate::state::AppState;

/// Latest extraction result of a document.
/// GET /documents/:id
pub async fn get_document(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> ApiResult<Json<ExtractionResult>> {
    let result = state.query.query(&document_id).await?;
    Ok(Json(result))
}

/// Metadata record with the full attempt history.
/// GET /documents/:id/history
pub async fn get_document_history(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> ApiResult<Json<MetadataRecord>> {
    let record = state.query.history(&document_id).await?;
    Ok(Json(record))
}
