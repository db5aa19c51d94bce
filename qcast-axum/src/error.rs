use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use qcast_core::QcastError;

#[derive(Debug)]
pub struct QcastAxumError(pub anyhow::Error);

impl From<anyhow::Error> for QcastAxumError {
    fn from(e: anyhow::Error) -> Self {
        Self(e)
    }
}

impl From<QcastError> for QcastAxumError {
    fn from(e: QcastError) -> Self {
        Self(e.into_anyhow())
    }
}

impl IntoResponse for QcastAxumError {
    fn into_response(self) -> Response {
        // A QcastError anywhere in the chain keeps its kind, message and data.
        let safe = QcastError::normalize(self.0);
        let status = StatusCode::from_u16(safe.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(safe.to_json())).into_response()
    }
}
