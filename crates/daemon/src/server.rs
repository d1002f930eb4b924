//! HTTP routes: the WebSocket entry point, session removal and the index page.

use std::path::PathBuf;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{any, get};
use axum::Router;
use protocol::{ErrorResponse, RemoveResponse};
use serde::Deserialize;
use tower_http::services::ServeFile;
use tower_http::trace::TraceLayer;

use crate::transport::controller::{ConnectionState, StateTracker};
use crate::transport::{ConnectError, TransportController};

/// Terminal page served when no index file is configured.
const DEFAULT_INDEX: &str = include_str!("../assets/index.html");

/// Application state shared across routes.
#[derive(Clone)]
pub struct AppState {
    pub controller: TransportController,
}

/// Query string of both entry points.
#[derive(Debug, Default, Deserialize)]
pub struct SidQuery {
    pub sid: Option<String>,
}

/// Builds the router, with every route under `prefix_path`.
pub fn create_router(
    controller: TransportController,
    prefix_path: &str,
    index_file: Option<PathBuf>,
) -> Router {
    let base = prefix_path.trim_end_matches('/');

    let mut router = Router::new()
        .route(&format!("{base}/ws"), get(websocket_handler))
        .route(&format!("{base}/remove_session"), any(remove_handler));

    router = match index_file {
        Some(index) => router.route_service(&format!("{base}/"), ServeFile::new(index)),
        None => {
            let page = render_index(&format!("{base}/"));
            router.route(
                &format!("{base}/"),
                get(move || {
                    let page = page.clone();
                    async move { Html(page) }
                }),
            )
        }
    };

    router
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { controller })
}

/// GET {prefix}/ws?sid=<id> - attach to a session
async fn websocket_handler(
    State(state): State<AppState>,
    Query(query): Query<SidQuery>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(sid) = query.sid.filter(|sid| !sid.is_empty()) else {
        let mut tracker = StateTracker::new("", ConnectionState::Connecting);
        tracker.advance(ConnectionState::MissingIdentifier);
        return error_response(ConnectError::MissingIdentifier);
    };

    let mut tracker = StateTracker::new(&sid, ConnectionState::Connecting);
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            tracker.advance(ConnectionState::UpgradeFailed);
            tracing::warn!(session_id = %sid, error = %rejection, "Rejected WebSocket upgrade");
            return error_response(ConnectError::UpgradeFailed);
        }
    };

    let controller = state.controller.clone();
    let failed_sid = sid.clone();
    upgrade
        .on_failed_upgrade(move |e| {
            tracing::warn!(session_id = %failed_sid, error = %e, "WebSocket upgrade failed");
        })
        .on_upgrade(move |socket| async move {
            if let Err(e) = controller.connect(&sid, socket).await {
                tracing::debug!(session_id = %sid, error = %e, "Connection ended with error");
            }
        })
}

/// ANY {prefix}/remove_session?sid=<id> - close and forget a session
async fn remove_handler(
    State(state): State<AppState>,
    Query(query): Query<SidQuery>,
) -> Json<RemoveResponse> {
    let sid = query.sid.unwrap_or_default();
    Json(state.controller.remove(&sid).await)
}

/// Fills the prefix into the built-in page.
fn render_index(prefix: &str) -> String {
    let escaped = prefix
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    DEFAULT_INDEX.replace("{{prefix_path}}", &escaped)
}

fn error_response(err: ConnectError) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::new(err.to_string())),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::MockBackend;
    use crate::session::{Backend, SessionError, SessionRegistry};
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    fn controller() -> TransportController {
        let factory =
            || -> Result<Box<dyn Backend>, SessionError> { Ok(Box::new(MockBackend::new())) };
        TransportController::new(
            Arc::new(SessionRegistry::new()),
            Arc::new(factory),
            CancellationToken::new(),
        )
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn call(router: Router, uri: &str) -> Response {
        router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_sid_is_bad_request() {
        let router = create_router(controller(), "/", None);
        let response = call(router, "/ws").await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"error": "sid is required"})
        );
    }

    #[tokio::test]
    async fn test_empty_sid_is_bad_request() {
        let router = create_router(controller(), "/", None);
        let response = call(router, "/ws?sid=").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_plain_request_fails_upgrade() {
        let router = create_router(controller(), "/", None);
        let response = call(router, "/ws?sid=abc").await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"error": "failed to upgrade connection"})
        );
    }

    #[tokio::test]
    async fn test_remove_session() {
        let controller = controller();
        let registry = Arc::clone(controller.registry());
        let factory =
            || -> Result<Box<dyn Backend>, SessionError> { Ok(Box::new(MockBackend::new())) };
        registry.get_or_create("abc", Arc::new(factory)).await.unwrap();

        let router = create_router(controller, "/", None);
        let response = call(router, "/remove_session?sid=abc").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!({"sid": "abc"}));
        assert!(!registry.has("abc").await);
    }

    #[tokio::test]
    async fn test_remove_unknown_session_succeeds() {
        let router = create_router(controller(), "/", None);
        let response = call(router, "/remove_session?sid=nope").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!({"sid": "nope"}));
    }

    #[tokio::test]
    async fn test_prefix_path() {
        let router = create_router(controller(), "/tty/", None);

        let response = call(router.clone(), "/tty/remove_session?sid=x").await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = call(router, "/remove_session?sid=x").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_index_file_served() {
        let dir = tempfile::tempdir().unwrap();
        let index = dir.path().join("index.html");
        std::fs::write(&index, "<html>ttyweb</html>").unwrap();

        let router = create_router(controller(), "/", Some(index));
        let response = call(router, "/").await;

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"<html>ttyweb</html>");
    }

    #[tokio::test]
    async fn test_default_index_page() {
        let router = create_router(controller(), "/tty", None);
        let response = call(router, "/tty/").await;

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let page = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(page.contains(r#"<meta name="ttyweb-prefix" content="/tty/">"#));
        assert!(!page.contains("{{prefix_path}}"));
    }

    #[test]
    fn test_render_index_escapes_prefix() {
        let page = render_index(r#"/a"b/"#);
        assert!(page.contains(r#"content="/a&quot;b/""#));
    }
}
