//! Pairing handshake and device management routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::server::{AppState, error_response};

/// Body of `POST /pair`.
#[derive(Debug, Deserialize)]
pub struct PairRequest {
    pub device_id: String,
    pub name: String,
    /// Hex-encoded x25519 public key.
    pub public_key: String,
}

/// Device summary returned by `GET /devices`.
///
/// The public key stays server-side; clients only need identity and
/// activity.
#[derive(Debug, Serialize)]
pub struct DeviceSummary {
    pub id: String,
    pub name: String,
    pub paired_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

pub async fn request_pairing(
    State(state): State<AppState>,
    Json(body): Json<PairRequest>,
) -> Response {
    match state
        .registry
        .add_pending_pairing(body.device_id, body.name, body.public_key)
        .await
    {
        // The host public key rides along so the device can derive the
        // shared keys once the pairing is approved.
        Ok(pending) => Json(serde_json::json!({
            "id": pending.id,
            "name": pending.name,
            "public_key": pending.public_key,
            "requested_at": pending.requested_at,
            "host_public_key": state.registry.host_public_key(),
        }))
        .into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, "invalid_public_key", e.to_string()),
    }
}

pub async fn list_pending(State(state): State<AppState>) -> Response {
    Json(state.registry.list_pending().await).into_response()
}

pub async fn approve(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.registry.approve_pairing(&id).await {
        Ok(Some(device)) => Json(device).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            "no_pending_pairing",
            format!("No pending pairing for device {id}"),
        ),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage_error",
            e.to_string(),
        ),
    }
}

pub async fn reject(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let existed = state.registry.reject_pairing(&id).await;
    Json(serde_json::json!({ "success": existed })).into_response()
}

pub async fn list_devices(State(state): State<AppState>) -> Response {
    match state.registry.list_devices().await {
        Ok(devices) => {
            let summaries: Vec<DeviceSummary> = devices
                .into_iter()
                .map(|d| DeviceSummary {
                    id: d.id,
                    name: d.name,
                    paired_at: d.paired_at,
                    last_seen: d.last_seen,
                })
                .collect();
            Json(summaries).into_response()
        }
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage_error",
            e.to_string(),
        ),
    }
}

pub async fn remove_device(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.registry.remove_device(&id).await {
        Ok(true) => Json(serde_json::json!({ "success": true })).into_response(),
        Ok(false) => error_response(
            StatusCode::NOT_FOUND,
            "device_not_found",
            format!("No paired device {id}"),
        ),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage_error",
            e.to_string(),
        ),
    }
}

pub async fn revoke_all(State(state): State<AppState>) -> Response {
    match state.registry.revoke_all_devices().await {
        Ok(count) => Json(serde_json::json!({ "revoked_count": count })).into_response(),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage_error",
            e.to_string(),
        ),
    }
}
