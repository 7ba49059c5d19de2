//! Push stream HTTP surface.
//!
//! Serves the long-lived `GET /sse` stream plus the ad hoc event and mock
//! start endpoints that operate on open streams:
//! - `GET  /sse`       - open a push stream (identity via header field)
//! - `POST /sse/event` - send an event to one/many/all connections
//! - `GET  /sse/event` - list open connections
//! - `POST /sse/mock`  - start a mock on already-open connections

use crate::engine::{keep_alive_frame, EngineError, PushEngine};
use crate::mock::MockDefinition;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Frame, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Header fields accepted as the stream's target identity, in priority
/// order.
const IDENTITY_HEADERS: [&str; 3] = ["x-sse-url", "url", "sse-url"];
/// Header fields accepted as the optional scenario.
const SCENARIO_HEADERS: [&str; 2] = ["scenario", "x-scenario"];

/// Response body: either a buffered JSON reply or a live event stream.
pub enum ApiBody {
    Full(Full<Bytes>),
    Stream(EventStreamBody),
}

/// Streaming body fed by a connection's sink channel. Ends when every
/// sender is gone.
pub struct EventStreamBody {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

impl Body for ApiBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        match self.get_mut() {
            ApiBody::Full(body) => Pin::new(body).poll_frame(cx),
            ApiBody::Stream(body) => match body.rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => Poll::Ready(Some(Ok(Frame::data(chunk)))),
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            },
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            ApiBody::Full(body) => body.is_end_stream(),
            ApiBody::Stream(_) => false,
        }
    }
}

/// Push API server.
pub struct PushApiServer {
    addr: SocketAddr,
    engine: Arc<PushEngine>,
}

impl PushApiServer {
    pub fn new(addr: SocketAddr, engine: Arc<PushEngine>) -> Self {
        Self { addr, engine }
    }

    /// Run the push API listener. Bind failure is fatal to the caller.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("Push API listening on http://{}", self.addr);

        loop {
            let (stream, _) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let engine = Arc::clone(&self.engine);

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let engine = Arc::clone(&engine);
                    async move { handle_push_request(req, engine).await }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Push API connection error: {}", e);
                }
            });
        }
    }
}

async fn handle_push_request(
    req: Request<Incoming>,
    engine: Arc<PushEngine>,
) -> Result<Response<ApiBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("Push API: {} {}", method, path);

    let response = match (&method, path.as_str()) {
        (&Method::GET, "/sse") => handle_open_stream(req, engine),
        (&Method::POST, "/sse/event") => handle_send_event(req, engine).await,
        (&Method::GET, "/sse/event") => handle_list_connections(engine),
        (&Method::POST, "/sse/mock") => handle_start_mock(req, engine).await,
        _ => not_found(),
    };

    Ok(with_cors(response))
}

/// GET /sse - open a push stream.
fn handle_open_stream(req: Request<Incoming>, engine: Arc<PushEngine>) -> Response<ApiBody> {
    let Some(identity) = header_value(&req, &IDENTITY_HEADERS) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Missing url header (x-sse-url, url, or sse-url)",
        );
    };
    let scenario = header_value(&req, &SCENARIO_HEADERS);

    let (tx, rx) = mpsc::unbounded_channel();
    // The keep-alive comment is queued first so it precedes any scheduled
    // delivery, including zero-offset ones.
    let _ = tx.send(keep_alive_frame());

    let connection_id = engine.open_stream(&identity, scenario.as_deref(), tx.clone());

    // Client disconnect drops the body receiver; the watcher then retires
    // the connection and its schedule.
    let watcher_engine = Arc::clone(&engine);
    tokio::spawn(async move {
        tx.closed().await;
        watcher_engine.close(&connection_id);
    });

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/event-stream")
        .header("Cache-Control", "no-cache")
        .body(ApiBody::Stream(EventStreamBody { rx }))
        .unwrap_or_else(|_| error_response(StatusCode::INTERNAL_SERVER_ERROR, "stream setup failed"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventRequest {
    #[serde(default)]
    connection_id: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
}

/// POST /sse/event - ad hoc dispatch to one connection, one identity, or
/// everyone.
async fn handle_send_event(
    req: Request<Incoming>,
    engine: Arc<PushEngine>,
) -> Response<ApiBody> {
    let body = match collect_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e),
    };
    let event: EventRequest = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, &format!("Invalid event JSON: {e}"))
        }
    };

    if let Some(connection_id) = &event.connection_id {
        engine.dispatcher().send_to(connection_id, &event.data, 200);
    } else if let Some(url) = &event.url {
        engine.dispatcher().send_to_identity(url, &event.data);
    } else {
        engine.dispatcher().send_to_all(&event.data);
    }

    json_response(StatusCode::ACCEPTED, &serde_json::json!({"success": true}))
}

/// GET /sse/event - list open connections.
fn handle_list_connections(engine: Arc<PushEngine>) -> Response<ApiBody> {
    json_response(StatusCode::OK, &engine.registry().list())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartMockRequest {
    #[serde(default)]
    connection_id: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    scenario: Option<String>,
    /// Inline definition, used instead of store resolution when present.
    #[serde(default)]
    definition: Option<MockDefinition>,
}

/// POST /sse/mock - start a mock on already-open connections, either from
/// an inline definition or by resolving the store.
async fn handle_start_mock(
    req: Request<Incoming>,
    engine: Arc<PushEngine>,
) -> Response<ApiBody> {
    let body = match collect_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e),
    };
    let start: StartMockRequest = match serde_json::from_slice(&body) {
        Ok(s) => s,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, &format!("Invalid mock JSON: {e}"))
        }
    };

    if let Some(definition) = &start.definition {
        return start_inline_mock(&engine, &start, definition);
    }

    let Some(url) = &start.url else {
        return error_response(StatusCode::BAD_REQUEST, "Missing url or definition parameter");
    };

    let Some(stored) = engine.resolve(url, start.scenario.as_deref()) else {
        return error_response(StatusCode::NOT_FOUND, "Mock not found for URL");
    };

    if let Some(connection_id) = &start.connection_id {
        return match engine.start_mock_for_connection(connection_id, &stored.definition) {
            Ok(()) => started_response(1),
            Err(EngineError::ConnectionNotFound(id)) => {
                error_response(StatusCode::NOT_FOUND, &format!("Connection not found: {id}"))
            }
            Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        };
    }

    let started =
        engine.start_mock_for_identity(url, stored.definition.scenario.as_deref(), &stored.definition);
    if started > 0 {
        started_response(started)
    } else {
        error_response(StatusCode::NOT_FOUND, "No matching connections found for URL")
    }
}

fn start_inline_mock(
    engine: &Arc<PushEngine>,
    start: &StartMockRequest,
    definition: &MockDefinition,
) -> Response<ApiBody> {
    if let Some(connection_id) = &start.connection_id {
        return match engine.start_mock_for_connection(connection_id, definition) {
            Ok(()) => started_response(1),
            Err(EngineError::ConnectionNotFound(id)) => {
                error_response(StatusCode::NOT_FOUND, &format!("Connection not found: {id}"))
            }
            Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        };
    }
    if let Some(url) = &start.url {
        let started = engine.start_mock_for_identity(url, start.scenario.as_deref(), definition);
        return if started > 0 {
            started_response(started)
        } else {
            error_response(StatusCode::NOT_FOUND, "No matching connections found")
        };
    }
    error_response(
        StatusCode::BAD_REQUEST,
        "Missing connectionId or url parameter when using definition",
    )
}

fn header_value(req: &Request<Incoming>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| req.headers().get(*name))
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn started_response(count: usize) -> Response<ApiBody> {
    json_response(
        StatusCode::ACCEPTED,
        &serde_json::json!({
            "success": true,
            "message": format!("Mock started for {count} connection(s)")
        }),
    )
}

/// Helper: Collect request body
async fn collect_body(req: Request<Incoming>) -> Result<Bytes, String> {
    req.collect()
        .await
        .map(|c| c.to_bytes())
        .map_err(|e| format!("Failed to read request body: {e}"))
}

/// Helper: JSON response
fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<ApiBody> {
    let json = serde_json::to_string_pretty(body).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(ApiBody::Full(Full::new(Bytes::from(json))))
        .unwrap_or_else(|_| {
            let mut fallback = Response::new(ApiBody::Full(Full::new(Bytes::new())));
            *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        })
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Helper: Error response
fn error_response(status: StatusCode, message: &str) -> Response<ApiBody> {
    let error = ErrorResponse {
        errors: vec![ErrorDetail {
            code: status.as_str().to_string(),
            message: message.to_string(),
        }],
    };
    json_response(status, &error)
}

/// Helper: Not found response
fn not_found() -> Response<ApiBody> {
    error_response(StatusCode::NOT_FOUND, "Not Found")
}

/// The UI and test clients connect cross-origin.
fn with_cors(mut response: Response<ApiBody>) -> Response<ApiBody> {
    use hyper::header::HeaderValue;

    let headers = response.headers_mut();
    headers.insert("Access-Control-Allow-Origin", HeaderValue::from_static("*"));
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static("Cache-Control, X-SSE-URL, url, sse-url, scenario, x-scenario"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_format() {
        let resp = error_response(StatusCode::BAD_REQUEST, "Test error");
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_json_response_content_type() {
        let resp = json_response(StatusCode::OK, &serde_json::json!({"ok": true}));
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("Content-Type").unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_with_cors_adds_headers() {
        let resp = with_cors(not_found());
        assert_eq!(
            resp.headers().get("Access-Control-Allow-Origin").unwrap(),
            "*"
        );
    }

    #[test]
    fn test_event_request_deserialization() {
        let json = r#"{"connectionId": "abc", "data": {"k": 1}}"#;
        let req: EventRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.connection_id.as_deref(), Some("abc"));
        assert!(req.url.is_none());
        assert_eq!(req.data["k"], 1);
    }

    #[test]
    fn test_event_request_defaults() {
        let req: EventRequest = serde_json::from_str("{}").unwrap();
        assert!(req.connection_id.is_none());
        assert!(req.url.is_none());
        assert!(req.data.is_null());
    }

    #[test]
    fn test_start_mock_request_with_inline_definition() {
        let json = r#"{
            "url": "https://api/x",
            "definition": {
                "url": "https://api/x",
                "responses": [{"time": 0, "response": 0}],
                "data": [{"ok": true}]
            }
        }"#;
        let req: StartMockRequest = serde_json::from_str(json).unwrap();
        assert!(req.definition.is_some());
        assert_eq!(req.url.as_deref(), Some("https://api/x"));
    }
}
