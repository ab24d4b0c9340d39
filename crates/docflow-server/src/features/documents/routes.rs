use crate::api::response::{ApiResponse, ErrorResponse};
use crate::features::FeatureState;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use super::commands::{
    upload, ReprocessDocumentError, UploadDocumentCommand, UploadDocumentError,
};
use super::queries::{GetDocumentError, ListDocumentsError, ListDocumentsQuery};

pub fn documents_routes() -> Router<FeatureState> {
    Router::new()
        .route("/", post(upload_document).get(list_documents))
        .route("/:id", get(get_document))
        .route("/:id/reprocess", post(reprocess_document))
}

#[tracing::instrument(skip(state, multipart))]
async fn upload_document(
    State(state): State<FeatureState>,
    mut multipart: Multipart,
) -> Result<Response, DocumentApiError> {
    let mut filename: Option<String> = None;
    let mut uploaded_by: Option<String> = None;
    let mut content: Option<Vec<u8>> = None;
    let mut content_type: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        DocumentApiError::Upload(UploadDocumentError::Storage(format!(
            "Failed to read multipart field: {}",
            e
        )))
    })? {
        let field_name = field.name().unwrap_or("").to_string();

        if field_name == "file" {
            filename = field.file_name().map(|s| s.to_string());
            content_type = field.content_type().map(|s| s.to_string());
            let data = field.bytes().await.map_err(|e| {
                DocumentApiError::Upload(UploadDocumentError::Storage(format!(
                    "Failed to read file bytes: {}",
                    e
                )))
            })?;
            content = Some(data.to_vec());
        } else if field_name == "uploaded_by" {
            uploaded_by = field.text().await.ok();
        }
    }

    let command = UploadDocumentCommand {
        filename: filename.unwrap_or_default(),
        uploaded_by,
        content: content.unwrap_or_default(),
        content_type,
    };

    let response = upload::handle(&state, command).await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(response))).into_response())
}

#[tracing::instrument(skip(state))]
async fn list_documents(
    State(state): State<FeatureState>,
    Query(query): Query<ListDocumentsQuery>,
) -> Result<Response, DocumentApiError> {
    let page = super::queries::list::handle(&state, query).await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(page))).into_response())
}

#[tracing::instrument(skip(state))]
async fn get_document(
    State(state): State<FeatureState>,
    Path(id): Path<Uuid>,
) -> Result<Response, DocumentApiError> {
    let view = super::queries::get::handle(&state, id).await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(view))).into_response())
}

#[tracing::instrument(skip(state))]
async fn reprocess_document(
    State(state): State<FeatureState>,
    Path(id): Path<Uuid>,
) -> Result<Response, DocumentApiError> {
    let response = super::commands::reprocess::handle(&state, id).await?;
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(response))).into_response())
}

#[derive(Debug)]
enum DocumentApiError {
    Upload(UploadDocumentError),
    Reprocess(ReprocessDocumentError),
    Get(GetDocumentError),
    List(ListDocumentsError),
}

impl From<UploadDocumentError> for DocumentApiError {
    fn from(err: UploadDocumentError) -> Self {
        Self::Upload(err)
    }
}

impl From<ReprocessDocumentError> for DocumentApiError {
    fn from(err: ReprocessDocumentError) -> Self {
        Self::Reprocess(err)
    }
}

impl From<GetDocumentError> for DocumentApiError {
    fn from(err: GetDocumentError) -> Self {
        Self::Get(err)
    }
}

impl From<ListDocumentsError> for DocumentApiError {
    fn from(err: ListDocumentsError) -> Self {
        Self::List(err)
    }
}

impl IntoResponse for DocumentApiError {
    fn into_response(self) -> Response {
        match self {
            DocumentApiError::Upload(UploadDocumentError::FilenameRequired)
            | DocumentApiError::Upload(UploadDocumentError::FilenameLength)
            | DocumentApiError::Upload(UploadDocumentError::UnsupportedExtension(_))
            | DocumentApiError::Upload(UploadDocumentError::ContentRequired)
            | DocumentApiError::Upload(UploadDocumentError::ContentTooLarge) => {
                let error = ErrorResponse::new("VALIDATION_ERROR", self.to_string());
                (StatusCode::BAD_REQUEST, Json(error)).into_response()
            },
            DocumentApiError::Upload(UploadDocumentError::Storage(ref message)) => {
                tracing::error!("Storage error during document upload: {}", message);
                let error = ErrorResponse::new("STORAGE_ERROR", "A storage error occurred");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response()
            },
            DocumentApiError::Upload(UploadDocumentError::Aborted {
                ref message,
                rollback_complete,
                conflict,
            }) => {
                tracing::error!(
                    rollback_complete,
                    "Document upload aborted: {}",
                    message
                );
                let (status, code) = if conflict {
                    (StatusCode::CONFLICT, "CONFLICT")
                } else {
                    (StatusCode::INTERNAL_SERVER_ERROR, "UPLOAD_FAILED")
                };
                let error = ErrorResponse::with_details(
                    code,
                    self.to_string(),
                    serde_json::json!({ "rollback_complete": rollback_complete }),
                );
                (status, Json(error)).into_response()
            },

            DocumentApiError::Reprocess(ReprocessDocumentError::NotFound(_)) => {
                let error = ErrorResponse::new("NOT_FOUND", self.to_string());
                (StatusCode::NOT_FOUND, Json(error)).into_response()
            },
            DocumentApiError::Reprocess(ref e) => {
                tracing::error!("Reprocess failed: {}", e);
                let error = ErrorResponse::new("INTERNAL_ERROR", self.to_string());
                (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response()
            },

            DocumentApiError::Get(GetDocumentError::NotFound(_)) => {
                let error = ErrorResponse::new("NOT_FOUND", self.to_string());
                (StatusCode::NOT_FOUND, Json(error)).into_response()
            },
            DocumentApiError::Get(GetDocumentError::Store(ref message)) => {
                tracing::error!("Status store error: {}", message);
                let error = ErrorResponse::new("INTERNAL_ERROR", "An internal error occurred");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response()
            },

            DocumentApiError::List(ListDocumentsError::InvalidStatus(_))
            | DocumentApiError::List(ListDocumentsError::InvalidPagination(_)) => {
                let error = ErrorResponse::new("VALIDATION_ERROR", self.to_string());
                (StatusCode::BAD_REQUEST, Json(error)).into_response()
            },
            DocumentApiError::List(ListDocumentsError::Store(ref message)) => {
                tracing::error!("Status store error: {}", message);
                let error = ErrorResponse::new("INTERNAL_ERROR", "An internal error occurred");
                (StatusCode::INTERNAL_SERVER_ERROR, Json(error)).into_response()
            },
        }
    }
}

impl std::fmt::Display for DocumentApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Upload(e) => write!(f, "{}", e),
            Self::Reprocess(e) => write!(f, "{}", e),
            Self::Get(e) => write!(f, "{}", e),
            Self::List(e) => write!(f, "{}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DocumentApiError::Upload(UploadDocumentError::FilenameRequired);
        assert!(err.to_string().contains("Filename is required"));
    }

    #[test]
    fn test_routes_structure() {
        let router = documents_routes();
        assert!(format!("{:?}", router).contains("Router"));
    }
}
