use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UserError {
    #[error("User not found")]
    NotFound,

    #[error("Email already exists")]
    EmailTaken,

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] sqlx::Error),
}

pub type UserResult<T> = Result<T, UserError>;

impl IntoResponse for UserError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            UserError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            UserError::EmailTaken => (StatusCode::CONFLICT, self.to_string()),
            UserError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            UserError::Store(err) => {
                tracing::error!(error = %err, "store failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "success": false, "message": message }))).into_response()
    }
}
