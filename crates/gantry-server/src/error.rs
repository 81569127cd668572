use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gantry_types::GantryError;
use serde::Serialize;

/// Wraps `GantryError` so it can be returned directly from a handler via
/// `?`. The response body always carries both `error` (human-readable) and
/// `kind` (the stable taxonomy string from §7) so a CLI or chat adapter can
/// branch on `kind` without parsing prose.
pub struct ApiError(pub GantryError);

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            error: self.0.to_string(),
            kind: self.0.kind(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<GantryError> for ApiError {
    fn from(err: GantryError) -> Self {
        ApiError(err)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
