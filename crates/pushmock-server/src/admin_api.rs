//! Admin REST API for mock document management.
//!
//! This surface drives the on-disk store and the engine's control
//! operations:
//! - Creating, updating, deleting, and listing mock documents
//! - Listing open connections
//! - Starting a stored mock against open connections
//! - Health endpoint
//!
//! The API listens on its own port, separate from the push listener.

use crate::engine::{EngineError, PushEngine};
use crate::mock::{MatchingConfig, MockDefinition, TimelineEntry, DEFAULT_DOMAIN};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Admin API server.
pub struct AdminApiServer {
    addr: SocketAddr,
    engine: Arc<PushEngine>,
}

impl AdminApiServer {
    pub fn new(addr: SocketAddr, engine: Arc<PushEngine>) -> Self {
        Self { addr, engine }
    }

    /// Run the admin API listener. Bind failure is fatal to the caller.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("Admin API listening on http://{}", self.addr);

        loop {
            let (stream, _) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let engine = Arc::clone(&self.engine);

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let engine = Arc::clone(&engine);
                    async move { handle_admin_request(req, engine).await }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Admin API connection error: {}", e);
                }
            });
        }
    }
}

/// Stored document as exposed over the API.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MockDocument {
    id: String,
    domain: String,
    file_name: String,
    #[serde(flatten)]
    definition: MockDefinition,
}

impl MockDocument {
    fn from_stored(stored: crate::mock::StoredMock) -> Self {
        Self {
            id: stored.file_id.clone(),
            domain: stored.domain,
            file_name: format!("{}.json", stored.file_id),
            definition: stored.definition,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveMockRequest {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    scenario: Option<String>,
    #[serde(default)]
    matching: Option<MatchingConfig>,
    #[serde(default)]
    responses: Option<Vec<TimelineEntry>>,
    #[serde(default)]
    data: Option<Vec<serde_json::Value>>,
    #[serde(default = "default_domain")]
    domain: String,
}

fn default_domain() -> String {
    DEFAULT_DOMAIN.to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartStoredMockRequest {
    #[serde(default)]
    connection_id: Option<String>,
    #[serde(default)]
    url: Option<String>,
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

/// Main request handler
async fn handle_admin_request(
    req: Request<Incoming>,
    engine: Arc<PushEngine>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(|s| s.to_string());

    debug!("Admin API: {} {}", method, path);

    let response = match (&method, path.as_str()) {
        (&Method::GET, "/") => handle_root(),

        (&Method::GET, "/api/mocks") => handle_list_mocks(engine),
        (&Method::POST, "/api/mocks") => handle_create_mock(req, engine).await,

        (&Method::GET, "/api/connections") => handle_list_connections(engine),
        (&Method::GET, "/health") => handle_health(),

        _ if path.starts_with("/api/mocks/") => {
            handle_mock_routes(&method, &path, query.as_deref(), req, engine).await
        }

        _ => not_found(),
    };

    Ok(response)
}

/// Handle id-scoped mock routes
async fn handle_mock_routes(
    method: &Method,
    path: &str,
    query: Option<&str>,
    req: Request<Incoming>,
    engine: Arc<PushEngine>,
) -> Response<Full<Bytes>> {
    let parts: Vec<&str> = path.trim_start_matches('/').split('/').collect();

    match (method, parts.as_slice()) {
        // GET /api/mocks/:id
        (&Method::GET, ["api", "mocks", id]) => handle_get_mock(id, engine),

        // PUT /api/mocks/:id - Update in place
        (&Method::PUT, ["api", "mocks", id]) => handle_update_mock(id, req, engine).await,

        // DELETE /api/mocks/:id?domain=...
        (&Method::DELETE, ["api", "mocks", id]) => handle_delete_mock(id, query, engine),

        // POST /api/mocks/:id/start - Arm a stored mock
        (&Method::POST, ["api", "mocks", id, "start"]) => {
            handle_start_stored_mock(id, req, engine).await
        }

        _ => not_found(),
    }
}

/// GET / - Root endpoint
fn handle_root() -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "name": "pushmock",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Pushmock server-push mock API",
        "_links": {
            "mocks": {"href": "/api/mocks"},
            "connections": {"href": "/api/connections"},
            "health": {"href": "/health"}
        }
    });
    json_response(StatusCode::OK, &body)
}

/// GET /api/mocks - List every stored mock document
fn handle_list_mocks(engine: Arc<PushEngine>) -> Response<Full<Bytes>> {
    use crate::mock::MockStore;

    let mocks: Vec<MockDocument> = engine
        .store()
        .list_all()
        .into_iter()
        .map(MockDocument::from_stored)
        .collect();
    json_response(StatusCode::OK, &mocks)
}

/// GET /api/mocks/:id - Fetch one document by file id
fn handle_get_mock(id: &str, engine: Arc<PushEngine>) -> Response<Full<Bytes>> {
    match engine.store().find_by_id(id) {
        Some(stored) => json_response(StatusCode::OK, &MockDocument::from_stored(stored)),
        None => error_response(StatusCode::NOT_FOUND, "Mock not found"),
    }
}

/// POST /api/mocks - Create or overwrite a document
async fn handle_create_mock(
    req: Request<Incoming>,
    engine: Arc<PushEngine>,
) -> Response<Full<Bytes>> {
    let body = match collect_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e),
    };
    let save: SaveMockRequest = match serde_json::from_slice(&body) {
        Ok(s) => s,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, &format!("Invalid mock JSON: {e}"))
        }
    };

    let (Some(url), Some(responses), Some(data)) = (save.url, save.responses, save.data) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Missing required fields: url, responses, data",
        );
    };

    let definition = MockDefinition {
        url,
        scenario: save.scenario,
        matching: save.matching,
        responses,
        data,
    };

    match engine.store().save(&save.domain, &definition) {
        Ok(stored) => {
            info!("Saved mock {}/{}", stored.domain, stored.file_id);
            json_response(StatusCode::OK, &MockDocument::from_stored(stored))
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

/// PUT /api/mocks/:id - Update an existing document in place
async fn handle_update_mock(
    id: &str,
    req: Request<Incoming>,
    engine: Arc<PushEngine>,
) -> Response<Full<Bytes>> {
    let body = match collect_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e),
    };
    let save: SaveMockRequest = match serde_json::from_slice(&body) {
        Ok(s) => s,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, &format!("Invalid mock JSON: {e}"))
        }
    };

    let Some(existing) = engine.store().get(&save.domain, id) else {
        return error_response(StatusCode::NOT_FOUND, "Mock not found");
    };

    let definition = MockDefinition {
        url: save.url.unwrap_or(existing.definition.url),
        scenario: save.scenario.or(existing.definition.scenario),
        matching: save.matching.or(existing.definition.matching),
        responses: save.responses.unwrap_or_default(),
        data: save.data.unwrap_or_default(),
    };

    match engine.store().save_with_id(&save.domain, id, &definition) {
        Ok(stored) => json_response(StatusCode::OK, &MockDocument::from_stored(stored)),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

/// DELETE /api/mocks/:id?domain= - Remove a document
fn handle_delete_mock(
    id: &str,
    query: Option<&str>,
    engine: Arc<PushEngine>,
) -> Response<Full<Bytes>> {
    let domain = query_param(query, "domain").unwrap_or_else(default_domain);

    match engine.store().delete(&domain, id) {
        Ok(true) => {
            info!("Deleted mock {}/{}", domain, id);
            json_response(StatusCode::OK, &serde_json::json!({"success": true}))
        }
        Ok(false) => error_response(StatusCode::NOT_FOUND, "Mock not found"),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

/// GET /api/connections - Registry snapshot
fn handle_list_connections(engine: Arc<PushEngine>) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, &engine.registry().list())
}

/// POST /api/mocks/:id/start - Arm a stored mock against connections
async fn handle_start_stored_mock(
    id: &str,
    req: Request<Incoming>,
    engine: Arc<PushEngine>,
) -> Response<Full<Bytes>> {
    let body = match collect_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e),
    };
    let start: StartStoredMockRequest = match serde_json::from_slice(&body) {
        Ok(s) => s,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, &format!("Invalid JSON: {e}"))
        }
    };

    let Some(stored) = engine.store().find_by_id(id) else {
        return error_response(StatusCode::NOT_FOUND, "Mock not found");
    };

    if let Some(connection_id) = &start.connection_id {
        return match engine.start_mock_for_connection(connection_id, &stored.definition) {
            Ok(()) => json_response(
                StatusCode::OK,
                &serde_json::json!({"success": true, "message": "Mock started for connection"}),
            ),
            Err(EngineError::ConnectionNotFound(id)) => {
                error_response(StatusCode::NOT_FOUND, &format!("Connection not found: {id}"))
            }
            Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
        };
    }

    if let Some(url) = &start.url {
        let started = engine.start_mock_for_identity(
            url,
            stored.definition.scenario.as_deref(),
            &stored.definition,
        );
        if started == 0 {
            return error_response(StatusCode::NOT_FOUND, "No matching connections found");
        }
        return json_response(
            StatusCode::OK,
            &serde_json::json!({
                "success": true,
                "message": format!("Mock started for {started} connection(s)")
            }),
        );
    }

    error_response(StatusCode::BAD_REQUEST, "Missing connectionId or url parameter")
}

/// GET /health - Health check
fn handle_health() -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, &serde_json::json!({"status": "ok"}))
}

/// Helper: first value of a query parameter
fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    let query = query?;
    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            if key == name {
                return Some(
                    urlencoding::decode(value)
                        .map(|v| v.into_owned())
                        .unwrap_or_else(|_| value.to_string()),
                );
            }
        }
    }
    None
}

/// Helper: Collect request body
async fn collect_body(req: Request<Incoming>) -> Result<Bytes, String> {
    req.collect()
        .await
        .map(|c| c.to_bytes())
        .map_err(|e| format!("Failed to read request body: {e}"))
}

/// Helper: JSON response
fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string_pretty(body).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(json)))
        .unwrap_or_else(|_| {
            let mut fallback = Response::new(Full::new(Bytes::new()));
            *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        })
}

/// Helper: Error response
fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let error = ErrorResponse {
        errors: vec![ErrorDetail {
            code: status.as_str().to_string(),
            message: message.to_string(),
        }],
    };
    json_response(status, &error)
}

/// Helper: Not found response
fn not_found() -> Response<Full<Bytes>> {
    error_response(StatusCode::NOT_FOUND, "Not Found")
}
