//! HTTP bridge server.
//!
//! Assembles the route fragments into one axum `Router`, wraps the
//! non-exempt surface in the authentication middleware, and owns the
//! listener lifecycle. Handlers receive process-scoped state through
//! [`AppState`]; nothing is an ambient singleton, so tests build
//! isolated instances per case.

mod matching;
mod messages;
mod pairing;
mod sessions;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{NonceStore, RequestAuthenticator, is_exempt};
use crate::config::BridgeConfig;
use crate::crypto::KeyStore;
use crate::error::{AuthError, BridgeError};
use crate::forward::{ForwardConfig, MessageForwarder};
use crate::matching::{ConfirmedMappings, FuzzyMatcher, SystemWindowSource, WindowSource};
use crate::pairing::{DeviceRegistry, DeviceStore, FileDeviceStore};
use crate::sessions::SessionCache;

/// Maximum buffered request body.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Identity of the caller as established by the auth middleware.
///
/// `device_id` is `None` for loopback callers admitted through the
/// local-trust bypass.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub device_id: Option<String>,
}

/// Process-scoped state shared by all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BridgeConfig>,
    pub registry: Arc<DeviceRegistry>,
    pub authenticator: Arc<RequestAuthenticator>,
    pub sessions: Arc<SessionCache>,
    pub matcher: Arc<FuzzyMatcher>,
    pub forwarder: Arc<MessageForwarder>,
}

impl AppState {
    /// Wire up the full component graph from configuration.
    pub async fn from_config(config: BridgeConfig) -> Result<Self, BridgeError> {
        let windows: Arc<dyn WindowSource> = Arc::new(SystemWindowSource::new());
        Self::with_window_source(config, windows).await
    }

    /// Like [`Self::from_config`] with an injected window source, so
    /// tests never shell out to OS automation.
    pub async fn with_window_source(
        config: BridgeConfig,
        windows: Arc<dyn WindowSource>,
    ) -> Result<Self, BridgeError> {
        config.validate()?;

        let identity = KeyStore::new(config.identity_path()).get_or_create().await?;
        let store: Arc<dyn DeviceStore> = Arc::new(FileDeviceStore::new(config.devices_path()));
        let registry = Arc::new(DeviceRegistry::new(
            identity,
            store,
            config.device_expiry_days,
        ));

        let nonces = NonceStore::new(
            config.nonce_ttl,
            config.nonce_max_size,
            config.nonce_cleanup_interval,
        );
        let authenticator = Arc::new(RequestAuthenticator::new(
            Arc::clone(&registry),
            nonces,
            config.timestamp_window,
        ));

        let sessions = Arc::new(SessionCache::new(
            config.session_root.clone(),
            config.session_poll,
            config.session_live_window,
        ));

        let confirmed = Arc::new(ConfirmedMappings::load(config.confirmed_mappings_path()).await?);
        let matcher = Arc::new(FuzzyMatcher::new(
            windows,
            Arc::clone(&sessions),
            confirmed,
            config.match_weights.clone(),
            config.match_min_confidence,
            config.match_stale,
        ));

        let forwarder = Arc::new(MessageForwarder::new(ForwardConfig {
            sink_url: config.sink_url.clone(),
            max_attempts: config.forward_max_attempts,
            base_delay: config.forward_base_delay,
        }));

        Ok(Self {
            config: Arc::new(config),
            registry,
            authenticator,
            sessions,
            matcher,
            forwarder,
        })
    }
}

/// Build the full route table with authentication applied.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/pair", post(pairing::request_pairing))
        .route("/pair/pending", get(pairing::list_pending))
        .route("/pair/{id}/approve", post(pairing::approve))
        .route("/pair/{id}/reject", post(pairing::reject))
        .route("/devices", get(pairing::list_devices).delete(pairing::revoke_all))
        .route("/devices/{id}", delete(pairing::remove_device))
        .route("/sessions", get(sessions::list_sessions))
        .route("/sessions/status", get(sessions::cache_status))
        .route("/sessions/{id}", get(sessions::get_session))
        .route("/match", get(matching::get_matches))
        .route("/match/scan", post(matching::scan))
        .route("/match/confirm", post(matching::confirm))
        .route("/match/confirmed", get(matching::list_confirmed))
        .route("/match/confirmed/{fingerprint}", delete(matching::remove_confirmed))
        .route("/messages", post(messages::forward_message))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    auth_middleware,
                )),
        )
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Authentication gate for every non-exempt route.
///
/// Buffers the body (it is part of the signed canonical string), then
/// rebuilds the request for the inner handler. Loopback peers may skip
/// verification when the local-trust bypass is enabled; the bypass is
/// keyed on the peer socket address only, never on request contents.
async fn auth_middleware(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    if is_exempt(&method, &path) {
        return next.run(request).await;
    }

    if state.config.allow_loopback_bypass && peer.ip().is_loopback() {
        let mut request = request;
        request
            .extensions_mut()
            .insert(AuthContext { device_id: None });
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                "Request body exceeds limit",
            );
        }
    };

    match state
        .authenticator
        .verify(&method, &path, &parts.headers, &bytes)
        .await
    {
        Ok(device_id) => {
            tracing::debug!(device_id = %device_id, path = %path, "Request authenticated");
            let mut request = Request::from_parts(parts, Body::from(bytes));
            request.extensions_mut().insert(AuthContext {
                device_id: Some(device_id),
            });
            next.run(request).await
        }
        Err(e) => {
            tracing::warn!(kind = e.kind(), path = %path, "Request rejected");
            auth_error_response(e)
        }
    }
}

fn auth_error_response(error: AuthError) -> Response {
    error_response(StatusCode::UNAUTHORIZED, error.kind(), error.to_string())
}

/// Uniform machine-readable error body.
pub(crate) fn error_response(
    status: StatusCode,
    kind: &str,
    message: impl Into<String>,
) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": { "kind": kind, "message": message.into() },
        })),
    )
        .into_response()
}

/// Owns the bound listener and the serve task.
pub struct BridgeServer {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl BridgeServer {
    /// Bind the configured address and spawn the server task.
    pub async fn start(state: AppState) -> Result<Self, BridgeError> {
        let router = build_router(state.clone());
        let listener = tokio::net::TcpListener::bind(state.config.bind_addr)
            .await
            .map_err(|e| {
                BridgeError::Config(crate::error::ConfigError::InvalidValue {
                    key: "DESKBRIDGE_BIND".to_string(),
                    message: format!("failed to bind {}: {e}", state.config.bind_addr),
                })
            })?;
        let local_addr = listener.local_addr().map_err(crate::error::ConfigError::Io)?;

        tracing::info!(addr = %local_addr, "Bridge listening");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Bridge shutting down");
            })
            .await
            {
                tracing::error!(error = %e, "Bridge server error");
            }
        });

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            local_addr,
        })
    }

    /// The address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal graceful shutdown and wait for in-flight requests to
    /// drain.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}
