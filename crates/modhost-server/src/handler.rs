//! Request handlers for module calls.
//!
//! Resolution and calls are synchronous and may compile a module, so they
//! run on tokio's blocking pool.

use std::time::Instant;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use modhost_common::RuntimeError;
use modhost_core::{ContextInfo, Value};

use crate::request::CallRequest;
use crate::response::{ApiError, CallResponse};
use crate::state::AppState;

/// Call an exported function of a registered module.
///
/// This handler:
/// 1. Reloads the module from disk if it changed (dev deployments only)
/// 2. Looks up the context and resolves its execution handle
/// 3. Calls the export with the JSON arguments
/// 4. Returns result values, guest logs and metrics
#[instrument(skip(state, body), fields(module = %name, export = %export))]
pub async fn call_export(
    State(state): State<AppState>,
    Path((name, export)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<CallResponse>, ApiError> {
    let start = Instant::now();
    let request_id = Uuid::new_v4().to_string();
    let args = parse_args(&body)?;

    info!(request_id = %request_id, args = args.len(), "Handling call request");

    let registry = std::sync::Arc::clone(state.registry());
    let module = name.clone();
    let function = export.clone();

    let result = tokio::task::spawn_blocking(move || {
        if let Err(e) = registry.refresh(&module) {
            warn!(module = %module, error = %e, "Reload failed, serving previous version");
        }

        let context = registry
            .get(&module)
            .ok_or_else(|| RuntimeError::module_not_found(&module))?;
        let handle = context.resolve_handle()?;
        let outcome = handle.call(&function, &args)?;
        Ok::<_, RuntimeError>((handle.strategy(), outcome))
    })
    .await
    .map_err(|e| {
        error!(error = %e, "Call task failed");
        ApiError::internal("Internal server error")
    })?;

    let duration = start.elapsed();

    match result {
        Ok((strategy, outcome)) => {
            info!(
                request_id = %request_id,
                duration_ms = duration.as_millis(),
                fuel_consumed = outcome.fuel_consumed,
                log_count = outcome.logs.len(),
                "Request completed"
            );
            Ok(Json(CallResponse::new(
                request_id, name, export, strategy, outcome,
            )))
        }
        Err(e) => {
            error!(
                request_id = %request_id,
                error = %e,
                duration_ms = duration.as_millis(),
                "Request failed"
            );
            Err(ApiError::from(e))
        }
    }
}

/// Arguments from a call body; an empty body means no arguments.
fn parse_args(body: &[u8]) -> Result<Vec<Value>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    serde_json::from_slice::<CallRequest>(body)
        .map(|request| request.args)
        .map_err(|e| {
            warn!(error = %e, "Rejected call body");
            ApiError::bad_request(format!("Invalid JSON body: {e}"))
        })
}

/// Health check handler.
///
/// Returns 200 OK if the server is running.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness check handler.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "ready",
        "deployment": state.deployment(),
        "modules_loaded": state.registry().len(),
    });

    (StatusCode::OK, Json(body))
}

/// List registered modules in registration order.
pub async fn list_modules(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.registry().all();
    let modules: Vec<ContextInfo> = snapshot.iter().map(|c| c.info()).collect();

    Json(serde_json::json!({
        "count": modules.len(),
        "modules": modules,
    }))
}
