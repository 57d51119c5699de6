//! HTTP surface: the viewer page, the live line stream and a full-content
//! snapshot.
//!
//! | Route | Response |
//! |---|---|
//! | `GET /` | HTML viewer for the watched file |
//! | `GET /logs` | server-sent events, one `data:` event per appended line |
//! | `GET /content` | the current file contents as `text/plain` |

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chrono::Local;
use futures_util::stream::StreamExt;
use tera::{Context, Tera};
use tracing::{debug, warn};

use crate::error::Result;
use crate::hub::Hub;
use crate::tail::TailDetector;

const INDEX_TEMPLATE: &str = "index.html";
const INDEX_HTML: &str = include_str!("../static/index.html");

/// Layout of the page generation time, e.g. `March 4, 2025 at 3:04:05 PM +01:00`.
const GENERATED_AT_FORMAT: &str = "%B %-d, %Y at %-I:%M:%S %p %Z";

fn load_templates() -> Result<Tera> {
    let mut tera = Tera::default();
    tera.add_raw_templates(vec![(INDEX_TEMPLATE, INDEX_HTML)])?;
    Ok(tera)
}

/// Shared state for the handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    hub: Hub,
    detector: Arc<TailDetector>,
    templates: Arc<Tera>,
}

impl AppState {
    /// Fails only if the embedded page template does not parse.
    pub fn new(hub: Hub, detector: Arc<TailDetector>) -> Result<Self> {
        Ok(AppState {
            hub,
            detector,
            templates: Arc::new(load_templates()?),
        })
    }
}

/// Build the viewer router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/logs", get(stream_lines))
        .route("/content", get(initial_content))
        .with_state(state)
}

async fn index(State(state): State<AppState>) -> Response {
    let path = state.detector.path().await;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut context = Context::new();
    context.insert("filename", &name);
    context.insert(
        "generated_at",
        &Local::now().format(GENERATED_AT_FORMAT).to_string(),
    );

    match state.templates.render(INDEX_TEMPLATE, &context) {
        Ok(page) => Html(page).into_response(),
        Err(e) => {
            warn!(error = %e, "failed to render viewer page");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}

async fn stream_lines(State(state): State<AppState>) -> impl IntoResponse {
    // Dropping the stream on disconnect drops the subscription with it.
    let subscription = state.hub.subscribe();
    debug!(subscriber = %subscription.id(), "viewer connected");

    let events = subscription.map(|line| Ok::<_, Infallible>(line_event(line)));

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        Sse::new(events).keep_alive(KeepAlive::default()),
    )
}

async fn initial_content(State(state): State<AppState>) -> Response {
    match state.detector.snapshot().await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], bytes).into_response(),
        Err(e) => {
            warn!(error = %e, "failed to read log file for initial content");
            (StatusCode::INTERNAL_SERVER_ERROR, "Could not open log file").into_response()
        }
    }
}

fn line_event(line: String) -> Event {
    // SSE cannot carry a bare carriage return inside a data field.
    if line.contains('\r') {
        Event::default().data(line.replace('\r', ""))
    } else {
        Event::default().data(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tail::LineBatch;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::time::timeout;
    use tower::ServiceExt;

    fn app(path: &Path, hub: &Hub) -> Router {
        let state = AppState::new(hub.clone(), Arc::new(TailDetector::new(path))).unwrap();
        build_router(state)
    }

    fn request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_index_names_file() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("service.log");
        let hub = Hub::default();

        let response = app(&path, &hub).oneshot(request("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("<title>service.log - tailcast</title>"));
        assert!(body.contains("<header>service.log"));
        assert!(!body.contains("{{"));

        let year = Local::now().format("%Y").to_string();
        let generated = body
            .split("<span class=\"generated\">")
            .nth(1)
            .and_then(|rest| rest.split("</span>").next())
            .unwrap();
        assert!(generated.starts_with("generated "));
        assert!(generated.contains(&year));
        assert!(generated.contains(" at "));
    }

    #[tokio::test]
    async fn test_index_escapes_file_name() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("<script>alert(1)<b>.log");
        let hub = Hub::default();

        let response = app(&path, &hub).oneshot(request("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("<header>&lt;script&gt;alert(1)&lt;b&gt;.log"));
        assert!(!body.contains("<script>alert(1)"));
    }

    #[tokio::test]
    async fn test_content_returns_whole_file() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("app.log");
        std::fs::write(&path, "one\ntwo\nunfinished").unwrap();
        let hub = Hub::default();

        let response = app(&path, &hub).oneshot(request("/content")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"one\ntwo\nunfinished");
    }

    #[tokio::test]
    async fn test_content_missing_file() {
        let tmp_dir = tempdir().unwrap();
        let hub = Hub::default();

        let response = app(&tmp_dir.path().join("gone.log"), &hub)
            .oneshot(request("/content"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_logs_streams_lines() {
        let tmp_dir = tempdir().unwrap();
        let path = tmp_dir.path().join("app.log");
        let hub = Hub::default();

        let response = app(&path, &hub).oneshot(request("/logs")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(hub.subscriber_count(), 1);

        hub.publish(&LineBatch::new(&path, vec!["hello world".to_string()]))
            .await;

        let mut body = response.into_body().into_data_stream();
        let chunk = timeout(Duration::from_secs(1), body.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(String::from_utf8_lossy(&chunk).contains("data: hello world"));

        drop(body);
        assert_eq!(hub.subscriber_count(), 0);
    }
}
