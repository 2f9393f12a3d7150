//! Authenticated message forwarding.
//!
//! `POST /messages` is the bridge's "dumb pipe": it never interprets
//! the payload, only relays it to the local sink. Devices may wrap the
//! payload in an AEAD envelope; the bridge decrypts with the calling
//! device's derived key and re-encrypts the sink's response the same
//! way.

use axum::Extension;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::Value;

use crate::crypto::SecureChannel;
use crate::error::ForwardError;
use crate::server::{AppState, AuthContext, error_response};

/// Body of `POST /messages`.
#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    /// Plain payload, forwarded as-is.
    #[serde(default)]
    pub payload: Option<Value>,
    /// AEAD envelope holding the payload; requires device auth.
    #[serde(default)]
    pub envelope: Option<String>,
}

pub async fn forward_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<MessageRequest>,
) -> Response {
    let caller = auth.device_id.as_deref().unwrap_or("loopback");

    let (payload, channel) = match (body.payload, body.envelope) {
        (Some(payload), None) => (payload, None),
        (None, Some(envelope)) => {
            // The AEAD key is per-device, so the loopback bypass cannot
            // carry encrypted envelopes.
            let Some(device_id) = auth.device_id.as_deref() else {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "envelope_requires_device",
                    "Encrypted envelopes require device authentication",
                );
            };

            let key = match state.registry.get_device_encryption_key(device_id).await {
                Ok(Some(key)) => key,
                Ok(None) => {
                    return error_response(
                        StatusCode::UNAUTHORIZED,
                        "unknown_device",
                        "Device is not paired or its pairing has expired",
                    );
                }
                Err(e) => {
                    return error_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "storage_error",
                        e.to_string(),
                    );
                }
            };

            let channel = SecureChannel::new(&key);
            match channel.decrypt_json::<Value>(&envelope) {
                Ok(payload) => (payload, Some(channel)),
                Err(e) => {
                    return error_response(
                        StatusCode::BAD_REQUEST,
                        "decryption_failed",
                        e.to_string(),
                    );
                }
            }
        }
        _ => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_message",
                "Provide exactly one of 'payload' or 'envelope'",
            );
        }
    };

    match state.forwarder.forward(caller, payload).await {
        Ok(sink_response) => match channel {
            Some(channel) => match channel.encrypt_json(&sink_response) {
                Ok(envelope) => Json(serde_json::json!({ "envelope": envelope })).into_response(),
                Err(e) => error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "encryption_failed",
                    e.to_string(),
                ),
            },
            None => Json(sink_response).into_response(),
        },
        Err(e @ ForwardError::SinkUnavailable { .. }) => (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({
                "error": {
                    "kind": "sink_unavailable",
                    "message": e.to_string(),
                    "hint": "Is the companion message service running on this machine?",
                },
            })),
        )
            .into_response(),
        Err(e @ ForwardError::SinkRejected { .. }) => {
            error_response(StatusCode::BAD_GATEWAY, "sink_rejected", e.to_string())
        }
    }
}
