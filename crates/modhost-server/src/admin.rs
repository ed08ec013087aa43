//! Admin API handlers for registry management.
//!
//! # Authentication
//!
//! All Admin API endpoints require the `X-Admin-Token` header
//! to match the configured admin token.
//!
//! # Endpoints
//!
//! - `POST /admin/modules` - Supply a dynamic module payload
//! - `GET /admin/modules` - List all contexts (detailed)
//! - `GET /admin/modules/:name` - Get context info
//! - `DELETE /admin/modules/:name` - Remove a context

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{DefaultBodyLimit, Path},
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
};
use axum_extra::extract::Multipart;
use subtle::ConstantTimeEq;
use tracing::{info, instrument, warn};

use modhost_common::{ExecutionMode, RuntimeError};
use modhost_core::{ContextInfo, MAX_MODULE_SIZE};

use crate::response::ApiError;
use crate::state::AppState;

const TOKEN_HEADER: &str = "X-Admin-Token";

/// Room for the multipart framing and text fields around a module payload.
const UPLOAD_OVERHEAD: usize = 64 * 1024;

/// Admin API state containing app state and auth token.
#[derive(Clone)]
pub struct AdminState {
    pub app_state: AppState,
    pub admin_token: String,
}

/// Build the Admin API router.
///
/// The admin state travels as an [`Extension`] so the router can be nested
/// into the main router whose state is [`AppState`].
pub fn build_admin_router(admin_state: AdminState) -> Router<AppState> {
    Router::new()
        .route("/modules", post(upload_module).get(list_modules_admin))
        .route("/modules/:name", get(get_module_info).delete(delete_module))
        .layer(DefaultBodyLimit::max(MAX_MODULE_SIZE + UPLOAD_OVERHEAD))
        .layer(Extension(admin_state))
}

/// Verify the admin token from request headers in constant time.
fn verify_token(headers: &HeaderMap, expected: &str) -> Result<(), ApiError> {
    let Some(token) = headers.get(TOKEN_HEADER) else {
        return Err(ApiError::unauthorized("Missing X-Admin-Token header"));
    };

    if bool::from(token.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err(ApiError::unauthorized("Invalid admin token"))
    }
}

/// A dynamic module payload extracted from a multipart upload.
#[derive(Debug)]
struct Upload {
    name: String,
    bytes: Vec<u8>,
    mode: Option<ExecutionMode>,
}

/// Supply the payload of a dynamic module.
///
/// # Request
///
/// `POST /admin/modules`, `multipart/form-data` with fields:
/// - `name` (or `id`): module name, defaults to the file stem
/// - `module` (or `file`, `wasm`): the WebAssembly binary
/// - `execution-mode` (optional): `interpreter` or `compiler`
///
/// # Response
///
/// ```json
/// { "name": "m2", "content_hash": "abc123...", "mode": "interpreter", "backend": "interpret" }
/// ```
#[instrument(skip(admin_state, headers, multipart))]
pub async fn upload_module(
    Extension(admin_state): Extension<AdminState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    verify_token(&headers, &admin_state.admin_token)?;

    let upload = extract_upload(multipart).await.map_err(|msg| {
        warn!(error = %msg, "Failed to extract module from request");
        ApiError::bad_request(msg)
    })?;

    let registry = Arc::clone(admin_state.app_state.registry());
    let name = upload.name.clone();
    let context = tokio::task::spawn_blocking(move || {
        registry.register_dynamic(&upload.name, &upload.bytes, upload.mode)
    })
    .await
    .map_err(|e| ApiError::internal(format!("Upload task failed: {e}")))?
    .map_err(|e| {
        warn!(module = %name, error = %e, "Module registration failed");
        ApiError::from(e)
    })?;

    let info = context.info();
    info!(module = %name, strategy = %context.strategy(), "Dynamic module registered");

    Ok(Json(serde_json::json!({
        "name": info.name,
        "content_hash": info.content_hash,
        "mode": info.mode,
        "backend": info.backend,
        "message": "Module registered successfully"
    })))
}

/// Remove a context from the registry.
///
/// In-flight calls holding the context finish normally.
#[instrument(skip(admin_state, headers))]
pub async fn delete_module(
    Extension(admin_state): Extension<AdminState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    verify_token(&headers, &admin_state.admin_token)?;

    admin_state
        .app_state
        .registry()
        .remove(&name)
        .ok_or_else(|| ApiError::from(RuntimeError::module_not_found(&name)))?;

    info!(module = %name, "Module removed");
    Ok(Json(serde_json::json!({
        "name": name,
        "message": "Module removed successfully"
    })))
}

/// Get context information.
#[instrument(skip(admin_state, headers))]
pub async fn get_module_info(
    Extension(admin_state): Extension<AdminState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Json<ContextInfo>, ApiError> {
    verify_token(&headers, &admin_state.admin_token)?;

    admin_state
        .app_state
        .registry()
        .get(&name)
        .map(|context| Json(context.info()))
        .ok_or_else(|| ApiError::from(RuntimeError::module_not_found(&name)))
}

/// List all contexts (detailed).
#[instrument(skip(admin_state, headers))]
pub async fn list_modules_admin(
    Extension(admin_state): Extension<AdminState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    verify_token(&headers, &admin_state.admin_token)?;

    let snapshot = admin_state.app_state.registry().all();
    let modules: Vec<ContextInfo> = snapshot.iter().map(|c| c.info()).collect();

    Ok(Json(serde_json::json!({
        "deployment": admin_state.app_state.deployment(),
        "count": modules.len(),
        "modules": modules,
    })))
}

async fn extract_upload(mut multipart: Multipart) -> Result<Upload, String> {
    let mut name: Option<String> = None;
    let mut bytes: Option<Vec<u8>> = None;
    let mut mode: Option<ExecutionMode> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| format!("Invalid multipart body: {e}"))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "name" | "id" | "module_id" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| format!("Invalid name field: {e}"))?;
                name = Some(text);
            }
            "execution-mode" | "execution_mode" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| format!("Invalid execution mode field: {e}"))?;
                mode = Some(text.parse().map_err(|e: RuntimeError| e.to_string())?);
            }
            "module" | "file" | "wasm" => {
                if name.is_none() {
                    name = field
                        .file_name()
                        .and_then(|f| std::path::Path::new(f).file_stem())
                        .and_then(|s| s.to_str())
                        .map(ToString::to_string);
                }
                let payload = field
                    .bytes()
                    .await
                    .map_err(|e| format!("Failed to read module: {e}"))?;
                bytes = Some(payload.to_vec());
            }
            _ => {}
        }
    }

    match (name, bytes) {
        (Some(name), Some(bytes)) if !name.is_empty() => Ok(Upload { name, bytes, mode }),
        (_, Some(_)) => Err("Missing module name".to_string()),
        (_, None) => Err("Missing module payload".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_verify_token_valid() {
        let mut headers = HeaderMap::new();
        headers.insert(TOKEN_HEADER, "secret".parse().unwrap());

        assert!(verify_token(&headers, "secret").is_ok());
    }

    #[test]
    fn test_verify_token_invalid() {
        let mut headers = HeaderMap::new();
        headers.insert(TOKEN_HEADER, "wrong".parse().unwrap());

        let err = verify_token(&headers, "secret").unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.message, "Invalid admin token");
    }

    #[test]
    fn test_verify_token_prefix_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(TOKEN_HEADER, "secr".parse().unwrap());

        assert!(verify_token(&headers, "secret").is_err());
    }

    #[test]
    fn test_verify_token_missing() {
        let err = verify_token(&HeaderMap::new(), "secret").unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert!(err.message.contains("Missing"));
    }
}
