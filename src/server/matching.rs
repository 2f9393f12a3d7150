//! Terminal/session matching routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use crate::error::MatchError;
use crate::server::sessions::FreshQuery;
use crate::server::{AppState, error_response};

pub async fn get_matches(
    State(state): State<AppState>,
    Query(query): Query<FreshQuery>,
) -> Response {
    Json(state.matcher.match_route(query.fresh).await).into_response()
}

pub async fn scan(State(state): State<AppState>) -> Response {
    let summary = state.matcher.scan().await;
    Json(serde_json::json!({
        "success": true,
        "matches": summary.matches,
        "timestamp": summary.timestamp,
        "confirmed_count": summary.confirmed_count,
    }))
    .into_response()
}

/// Body of `POST /match/confirm`.
#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub terminal_fingerprint: String,
    pub session_id: String,
}

pub async fn confirm(State(state): State<AppState>, Json(body): Json<ConfirmRequest>) -> Response {
    // Refuse to pin a fingerprint to a session that does not exist; the
    // retry covers sessions created moments ago.
    match state.sessions.get_session_with_retry(&body.session_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return error_response(
                StatusCode::NOT_FOUND,
                "session_not_found",
                format!("Session not found: {}", body.session_id),
            );
        }
        Err(e) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "scan_failed",
                e.to_string(),
            );
        }
    }

    match state
        .matcher
        .confirmed()
        .confirm(body.terminal_fingerprint, body.session_id)
        .await
    {
        Ok(count) => Json(serde_json::json!({
            "success": true,
            "confirmed_count": count,
        }))
        .into_response(),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage_error",
            e.to_string(),
        ),
    }
}

pub async fn list_confirmed(State(state): State<AppState>) -> Response {
    let mappings = state.matcher.confirmed().all().await;
    Json(serde_json::json!({
        "count": mappings.len(),
        "mappings": mappings,
    }))
    .into_response()
}

pub async fn remove_confirmed(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
) -> Response {
    match state.matcher.confirmed().remove(&fingerprint).await {
        Ok(()) => Json(serde_json::json!({ "success": true })).into_response(),
        Err(MatchError::MappingNotFound { fingerprint }) => error_response(
            StatusCode::NOT_FOUND,
            "mapping_not_found",
            format!("No confirmed mapping for {fingerprint}"),
        ),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage_error",
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

    fn local_request(method: Method, path: &str, body: serde_json::Value) -> Request<Body> {
        let mut request = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
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

    async fn seed_session(dir: &std::path::Path, folder: &str, id: &str) {
        let path = dir.join("sessions").join(folder);
        tokio::fs::create_dir_all(&path).await.unwrap();
        tokio::fs::write(path.join(format!("{id}.jsonl")), "{}\n")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_match_route_reports_empty_scan() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(test_support::test_state(dir.path()).await);

        let body = json_of(
            router
                .oneshot(local_request(
                    Method::GET,
                    "/match?fresh=true",
                    serde_json::Value::Null,
                ))
                .await
                .unwrap(),
        )
        .await;

        assert_eq!(body["matches"].as_array().unwrap().len(), 0);
        assert_eq!(body["confirmed_count"], 0);
    }

    #[tokio::test]
    async fn test_confirm_requires_existing_session() {
        let dir = tempfile::tempdir().unwrap();
        let router = build_router(test_support::test_state(dir.path()).await);

        let response = router
            .oneshot(local_request(
                Method::POST,
                "/match/confirm",
                serde_json::json!({
                    "terminal_fingerprint": "kitty|notes",
                    "session_id": "ghost",
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_confirm_list_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        seed_session(dir.path(), "-Users-sam-notes", "sess-a").await;
        let router = build_router(test_support::test_state(dir.path()).await);

        let confirmed = json_of(
            router
                .clone()
                .oneshot(local_request(
                    Method::POST,
                    "/match/confirm",
                    serde_json::json!({
                        "terminal_fingerprint": "kitty|notes",
                        "session_id": "sess-a",
                    }),
                ))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(confirmed["success"], true);
        assert_eq!(confirmed["confirmed_count"], 1);

        let listed = json_of(
            router
                .clone()
                .oneshot(local_request(
                    Method::GET,
                    "/match/confirmed",
                    serde_json::Value::Null,
                ))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(listed["count"], 1);
        assert_eq!(listed["mappings"]["kitty|notes"], "sess-a");

        let deleted = router
            .clone()
            .oneshot(local_request(
                Method::DELETE,
                "/match/confirmed/kitty%7Cnotes",
                serde_json::Value::Null,
            ))
            .await
            .unwrap();
        assert_eq!(deleted.status(), StatusCode::OK);

        let missing = router
            .oneshot(local_request(
                Method::DELETE,
                "/match/confirmed/kitty%7Cnotes",
                serde_json::Value::Null,
            ))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
