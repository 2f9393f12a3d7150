//! Session listing and cache status routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use crate::server::{AppState, error_response};

#[derive(Debug, Deserialize)]
pub struct FreshQuery {
    #[serde(default)]
    pub fresh: bool,
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<FreshQuery>,
) -> Response {
    match state.sessions.get_sessions(query.fresh).await {
        Ok(sessions) => Json(sessions).into_response(),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "scan_failed",
            e.to_string(),
        ),
    }
}

pub async fn cache_status(State(state): State<AppState>) -> Response {
    Json(state.sessions.get_status().await).into_response()
}

/// Targeted lookup with one forced retry: a session created moments ago
/// may not be in cache yet.
pub async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.sessions.get_session_with_retry(&id).await {
        Ok(Some(session)) => Json(session).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            "session_not_found",
            format!("Session not found: {id}"),
        ),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "scan_failed",
            e.to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use crate::server::{build_router, test_support};
    use axum::body::{Body, to_bytes};
    use axum::extract::ConnectInfo;
    use axum::http::{Method, Request, StatusCode};
    use std::net::SocketAddr;
    use tower::ServiceExt;

    fn local_get(path: &str) -> Request<Body> {
        let mut request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Body::empty())
            .unwrap();
        request.extensions_mut().insert(ConnectInfo::<SocketAddr>(
            "127.0.0.1:9999".parse().unwrap(),
        ));
        request
    }

    async fn json_of(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_sessions_list_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_support::test_state(dir.path()).await;

        let folder = dir.path().join("sessions").join("-Users-sam-notes");
        tokio::fs::create_dir_all(&folder).await.unwrap();
        tokio::fs::write(folder.join("sess-a.jsonl"), "{}\n{}\n{}\n")
            .await
            .unwrap();

        let router = build_router(state);

        let cold = json_of(
            router
                .clone()
                .oneshot(local_get("/sessions/status"))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(cold["state"], "cold");

        let sessions = json_of(router.clone().oneshot(local_get("/sessions")).await.unwrap()).await;
        assert_eq!(sessions.as_array().unwrap().len(), 1);
        assert_eq!(sessions[0]["id"], "sess-a");
        assert_eq!(sessions[0]["message_count"], 3);

        let warm = json_of(
            router
                .clone()
                .oneshot(local_get("/sessions/status"))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(warm["state"], "warm");
    }

    #[tokio::test]
    async fn test_unknown_session_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(test_support::test_state(dir.path()).await);

        let response = router.oneshot(local_get("/sessions/ghost")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = json_of(response).await;
        assert_eq!(body["error"]["kind"], "session_not_found");
    }

    #[tokio::test]
    async fn test_session_created_after_warmup_found_via_retry() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_support::test_state(dir.path()).await;
        let router = build_router(state);

        // Warm the cache while the store is empty.
        router.clone().oneshot(local_get("/sessions")).await.unwrap();

        let folder = dir.path().join("sessions").join("proj");
        tokio::fs::create_dir_all(&folder).await.unwrap();
        tokio::fs::write(folder.join("sess-new.jsonl"), "{}\n")
            .await
            .unwrap();

        // The targeted lookup misses the cache, retries with a forced
        // rescan, and finds the new session.
        let response = router.oneshot(local_get("/sessions/sess-new")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
