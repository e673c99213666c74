//! HTTP surface: `POST /api` with `{ "inputs": "<prompt>" }`.
//!
//! Responds `200 { decryptedString }` on success, `403 { error }` when the
//! signer fails the access condition and `500 { error }` for everything
//! else, unreadable request bodies included.

use crate::orchestrator::{RequestError, RequestOrchestrator, ACCESS_DENIED_MESSAGE};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct ApiRequest {
    pub inputs: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub decrypted_string: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    #[serde(skip)]
    pub kind: &'static str,
    pub error: String,
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status = match self.kind {
            "access_denied" => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

impl From<RequestError> for ErrorResponse {
    fn from(e: RequestError) -> Self {
        if e.is_authorization_denied() {
            return ErrorResponse {
                kind: "access_denied",
                error: ACCESS_DENIED_MESSAGE.to_string(),
            };
        }
        let kind = match &e {
            RequestError::Configuration(_) => "configuration_missing",
            RequestError::Upstream(_) => "upstream_unavailable",
            RequestError::Serialization(_) => "internal_error",
            RequestError::Crypto(_) => "decryption_failed",
        };
        ErrorResponse {
            kind,
            error: e.to_string(),
        }
    }
}

pub fn router(orchestrator: Arc<RequestOrchestrator>) -> Router {
    Router::new()
        .route("/api", post(handle_api))
        .with_state(orchestrator)
}

async fn handle_api(
    State(orchestrator): State<Arc<RequestOrchestrator>>,
    payload: Result<Json<ApiRequest>, JsonRejection>,
) -> Result<Json<ApiResponse>, ErrorResponse> {
    let Json(request) = payload.map_err(|rejection| {
        warn!("Rejected request body: {}", rejection.body_text());
        ErrorResponse {
            kind: "invalid_request",
            error: rejection.body_text(),
        }
    })?;
    info!("Received prompt of {} bytes", request.inputs.len());

    let decrypted = orchestrator.handle(&request.inputs).await?;
    Ok(Json(ApiResponse {
        decrypted_string: decrypted,
    }))
}
