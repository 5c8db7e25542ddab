use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use jarvis_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Face image not found: {0}")]
    ImageNotFound(String),

    #[error("Face image too large: {size} bytes (max {max})")]
    ImageTooLarge { size: usize, max: usize },

    #[error("Face image upload is empty")]
    EmptyImage,

    #[error("Invalid image extension: {0}")]
    InvalidExtension(String),

    #[error("Face storage error: {0}")]
    FaceStorage(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::ImageNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::ImageTooLarge { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, self.to_string())
            }
            ServerError::EmptyImage
            | ServerError::InvalidExtension(_)
            | ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::FaceStorage(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Face storage error".to_string())
            }
            ServerError::Store(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
