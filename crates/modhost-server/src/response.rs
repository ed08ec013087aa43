//! HTTP responses for module calls and API errors.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use modhost_common::{ExecutionMode, RuntimeError};
use modhost_core::{Backend, CallOutcome, LogEntry, Strategy, Value};

/// Body of a successful call.
#[derive(Debug, Serialize)]
pub struct CallResponse {
    pub request_id: String,
    pub module: String,
    pub export: String,
    pub values: Vec<Value>,
    pub logs: Vec<LogEntry>,
    pub execution: ExecutionInfo,
}

/// How a call was executed.
#[derive(Debug, Serialize)]
pub struct ExecutionInfo {
    pub mode: ExecutionMode,
    pub backend: Backend,
    pub fuel_consumed: u64,
    pub duration_us: u128,
}

impl CallResponse {
    pub fn new(
        request_id: String,
        module: String,
        export: String,
        strategy: Strategy,
        outcome: CallOutcome,
    ) -> Self {
        Self {
            request_id,
            module,
            export,
            values: outcome.values,
            logs: outcome.logs,
            execution: ExecutionInfo {
                mode: strategy.mode,
                backend: strategy.backend,
                fuel_consumed: outcome.fuel_consumed,
                duration_us: outcome.duration.as_micros(),
            },
        }
    }
}

/// An error rendered as a JSON body `{"error": ..., "type": ...}`.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }
}

impl From<RuntimeError> for ApiError {
    fn from(error: RuntimeError) -> Self {
        let (status, kind) = match &error {
            RuntimeError::ModuleNotFound { .. } => (StatusCode::NOT_FOUND, "module_not_found"),
            RuntimeError::ExportNotFound { .. } => (StatusCode::NOT_FOUND, "export_not_found"),
            RuntimeError::InvalidArgument { .. } => (StatusCode::BAD_REQUEST, "invalid_argument"),
            RuntimeError::ParseFailed { .. } => (StatusCode::BAD_REQUEST, "parse_failed"),
            RuntimeError::MissingPayload { .. } => (StatusCode::CONFLICT, "missing_payload"),
            RuntimeError::InvalidConfig { .. } => (StatusCode::CONFLICT, "invalid_config"),
            RuntimeError::FuelExhausted => (StatusCode::TOO_MANY_REQUESTS, "fuel_exhausted"),
            RuntimeError::Unusable { .. } => (StatusCode::SERVICE_UNAVAILABLE, "unusable"),
            RuntimeError::Trap { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "trap"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        Self::new(status, kind, error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
            "type": self.kind,
        });
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_not_found_mapping() {
        let err = ApiError::from(RuntimeError::module_not_found("test"));
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err = ApiError::from(RuntimeError::ExportNotFound {
            module: "m".into(),
            export: "f".into(),
        });
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.kind, "export_not_found");
    }

    #[test]
    fn test_fuel_exhausted_mapping() {
        let err = ApiError::from(RuntimeError::FuelExhausted);
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_client_error_mapping() {
        assert_eq!(
            ApiError::from(RuntimeError::invalid_argument("arity")).status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(RuntimeError::missing_payload("m2")).status,
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_unusable_mapping() {
        let err = ApiError::from(RuntimeError::Unusable {
            module: "m".into(),
            cause: Arc::new(RuntimeError::compilation_failed("boom")),
        });
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.message.contains("boom"));
    }

    #[test]
    fn test_into_response() {
        let response = ApiError::bad_request("nope").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
