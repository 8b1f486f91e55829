//! Maps a terminal `supernode_types::Status` (and the rare raw `CoreError`
//! that never made it into one) to an HTTP response.
//!
//! Grounded directly on `sem_os_server::error::AppError`'s
//! `From<DomainError> for AppError` / `IntoResponse` shape.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use supernode_runtime::CoreError;
use supernode_types::{ErrorCode, RpcError, Status};

/// A finished task's outcome, rendered as an HTTP response:
/// client/upstream/internal failures all carry a JSON-RPC-shaped error
/// envelope with a negative-namespace code; success carries the task's
/// own `Output` body verbatim.
pub struct TaskError {
    pub status: Status,
    pub message: String,
}

impl TaskError {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }
}

impl From<CoreError> for TaskError {
    fn from(e: CoreError) -> Self {
        let status = if e.is_fatal_table_gap() { Status::InternalError } else { Status::Error };
        Self { status, message: e.to_string() }
    }
}

impl IntoResponse for TaskError {
    fn into_response(self) -> Response {
        let http_status = self.status.terminal_http_code().unwrap_or(500);
        let code = match self.status {
            Status::Drop => ErrorCode::ClientProtocolError,
            Status::Busy => ErrorCode::Overloaded,
            Status::InternalError => ErrorCode::Internal,
            _ => ErrorCode::HandlerError,
        };
        let body = RpcError::new(code, self.message);
        let status =
            StatusCode::from_u16(http_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(json!({ "error": body.to_json() }))).into_response();
        response
            .headers_mut()
            .insert(axum::http::header::CONNECTION, axum::http::HeaderValue::from_static("close"));
        response
    }
}
