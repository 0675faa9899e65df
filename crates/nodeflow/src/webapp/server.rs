//! Web application server for the program API.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use nodeflow_program::ProgramNode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::net::TcpListener;
use tracing::{error, info};
use uuid::Uuid;

use super::types::{
    HealthResponse, InputRequest, MessagesResponse, ProgramListResponse, ProgramStatusResponse,
    StartProgramResponse, WebappConfig,
};
use crate::client::{ClientError, ProgramClient};

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

/// Webapp server handle.
pub struct WebappServer {
    addr: SocketAddr,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
}

impl WebappServer {
    /// Start the webapp server.
    ///
    /// Returns None if the webapp is disabled via configuration.
    pub async fn start(config: WebappConfig, client: ProgramClient) -> Result<Option<Self>> {
        if !config.enabled {
            info!("webapp disabled (set NODEFLOW_WEBAPP_ENABLED=true to enable)");
            return Ok(None);
        }

        let bind_addr = config.bind_addr();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("failed to bind webapp listener on {bind_addr}"))?;

        let actual_addr = listener.local_addr()?;
        let state = WebappState { client };
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(run_server(listener, state, shutdown_rx));

        info!(addr = %actual_addr, "webapp server started");

        Ok(Some(Self {
            addr: actual_addr,
            shutdown_tx,
        }))
    }

    /// Get the address the server is bound to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shutdown the server.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[derive(Clone)]
struct WebappState {
    client: ProgramClient,
}

async fn run_server(
    listener: TcpListener,
    state: WebappState,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) {
    let app = build_router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .await
        .ok();
}

fn build_router(state: WebappState) -> Router {
    use axum::routing::post;

    Router::new()
        .route("/api/programs", get(list_programs).post(start_program))
        .route("/api/programs/{root_unit_id}", get(program_status))
        .route("/api/programs/{root_unit_id}/messages", get(program_messages))
        .route("/api/programs/{root_unit_id}/cancel", post(cancel_program))
        .route("/api/units/{unit_id}/input", post(send_input))
        .route("/healthz", get(healthz))
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "nodeflow-webapp",
    })
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
}

async fn list_programs(
    State(state): State<WebappState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ProgramListResponse>, HttpError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let roots = state.client.list_programs(limit).await?;
    Ok(Json(ProgramListResponse {
        programs: roots.into_iter().map(ProgramStatusResponse::from).collect(),
    }))
}

async fn start_program(
    State(state): State<WebappState>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<(StatusCode, Json<StartProgramResponse>), HttpError> {
    let program: ProgramNode = parse_body(body, "invalid program")?;
    let root_unit_id = state.client.start_program(&program).await?;
    Ok((
        StatusCode::CREATED,
        Json(StartProgramResponse { root_unit_id }),
    ))
}

async fn program_status(
    State(state): State<WebappState>,
    Path(root_unit_id): Path<Uuid>,
) -> Result<Json<ProgramStatusResponse>, HttpError> {
    let root = state.client.root(root_unit_id).await?;
    Ok(Json(root.into()))
}

async fn program_messages(
    State(state): State<WebappState>,
    Path(root_unit_id): Path<Uuid>,
) -> Result<Json<MessagesResponse>, HttpError> {
    let messages = state.client.query_messages(root_unit_id).await?;
    Ok(Json(MessagesResponse {
        root_unit_id,
        messages,
    }))
}

async fn cancel_program(
    State(state): State<WebappState>,
    Path(root_unit_id): Path<Uuid>,
) -> Result<StatusCode, HttpError> {
    state.client.cancel(root_unit_id).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn send_input(
    State(state): State<WebappState>,
    Path(unit_id): Path<Uuid>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<StatusCode, HttpError> {
    let request: InputRequest = parse_body(body, "invalid input")?;
    state.client.send_input(unit_id, &request.text).await?;
    Ok(StatusCode::ACCEPTED)
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
struct HttpError {
    status: StatusCode,
    message: String,
}

/// Decode a JSON body, reporting both unreadable JSON and documents of the
/// wrong shape as 400 with a JSON error body.
fn parse_body<T: DeserializeOwned>(
    body: Result<Json<serde_json::Value>, JsonRejection>,
    context: &str,
) -> Result<T, HttpError> {
    let bad_request = |detail: String| HttpError {
        status: StatusCode::BAD_REQUEST,
        message: format!("{context}: {detail}"),
    };
    let Json(document) = body.map_err(|rejection| bad_request(rejection.body_text()))?;
    serde_json::from_value(document).map_err(|err| bad_request(err.to_string()))
}

impl From<ClientError> for HttpError {
    fn from(err: ClientError) -> Self {
        let status = match &err {
            ClientError::UnknownUnit(_) | ClientError::NotRoot(_) => StatusCode::NOT_FOUND,
            ClientError::Program(_) => StatusCode::BAD_REQUEST,
            ClientError::Cancelled(_) => StatusCode::CONFLICT,
            ClientError::Backend(_) => {
                error!(?err, "backend request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "message": self.message }));
        (self.status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use http_body_util::BodyExt;
    use nodeflow_backend_memory::MemoryBackend;
    use nodeflow_runner_state::{MessagePayload, UnitStatus};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use tower::util::ServiceExt;
    use uuid::Uuid;

    use super::{WebappState, build_router};
    use crate::client::ProgramClient;
    use crate::runloop::{RunLoopSupervisorConfig, runloop_supervisor};
    use crate::webapp::types::{MessagesResponse, ProgramStatusResponse, StartProgramResponse};

    async fn call_route(
        client: &ProgramClient,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, String) {
        let app = build_router(WebappState {
            client: client.clone(),
        });

        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .expect("route request");

        let response = app.oneshot(request).await.expect("route response");

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("route body")
            .to_bytes();
        let body = String::from_utf8(body.to_vec()).expect("route body utf8");
        (status, body)
    }

    fn greeting() -> serde_json::Value {
        json!({
            "type": "root",
            "uuid": "root",
            "children": [{
                "type": "print",
                "uuid": "p",
                "children": [
                    { "type": "value", "uuid": "v", "value": "hi", "valueType": "string" }
                ]
            }]
        })
    }

    #[tokio::test]
    async fn healthz_reports_service() {
        let client = ProgramClient::new(MemoryBackend::new());
        let (status, body) = call_route(&client, "GET", "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"status\":\"ok\""));
        assert!(body.contains("\"service\":\"nodeflow-webapp\""));
    }

    #[tokio::test]
    async fn started_programs_are_listed_and_readable() {
        let backend = MemoryBackend::new();
        let client = ProgramClient::new(backend.clone());
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(runloop_supervisor(
            backend,
            RunLoopSupervisorConfig {
                poll_interval: Duration::from_millis(5),
                ..RunLoopSupervisorConfig::default()
            },
            shutdown.clone(),
        ));

        let (status, body) = call_route(&client, "POST", "/api/programs", Some(greeting())).await;
        assert_eq!(status, StatusCode::CREATED, "body={body}");
        let started: StartProgramResponse = serde_json::from_str(&body).expect("start body");
        client
            .wait_for_result(started.root_unit_id, Duration::from_millis(5))
            .await
            .expect("program finishes");

        let route = format!("/api/programs/{}", started.root_unit_id);
        let (status, body) = call_route(&client, "GET", &route, None).await;
        assert_eq!(status, StatusCode::OK);
        let program: ProgramStatusResponse = serde_json::from_str(&body).expect("status body");
        assert_eq!(program.status, UnitStatus::Completed);
        assert!(program.result.is_some());

        let route = format!("/api/programs/{}/messages", started.root_unit_id);
        let (status, body) = call_route(&client, "GET", &route, None).await;
        assert_eq!(status, StatusCode::OK);
        let messages: MessagesResponse = serde_json::from_str(&body).expect("messages body");
        assert!(matches!(
            &messages.messages[..],
            [entry] if entry.payload == MessagePayload::Print { text: "hi".to_string() }
        ));

        let (status, body) = call_route(&client, "GET", "/api/programs?limit=10", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(&started.root_unit_id.to_string()));

        shutdown.cancel();
        handle.await.expect("supervisor exits");
    }

    #[tokio::test]
    async fn unknown_programs_and_units_are_not_found() {
        let client = ProgramClient::new(MemoryBackend::new());
        let missing = Uuid::new_v4();

        for (method, route, body) in [
            ("GET", format!("/api/programs/{missing}"), None),
            ("GET", format!("/api/programs/{missing}/messages"), None),
            ("POST", format!("/api/programs/{missing}/cancel"), None),
            (
                "POST",
                format!("/api/units/{missing}/input"),
                Some(json!({ "text": "1" })),
            ),
        ] {
            let (status, body) = call_route(&client, method, &route, body).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "route={route}");
            assert!(body.contains(&missing.to_string()), "route={route}");
        }
    }

    #[tokio::test]
    async fn malformed_program_documents_are_bad_requests() {
        let client = ProgramClient::new(MemoryBackend::new());
        let unknown_kind = json!({ "type": "goto", "uuid": "g" });
        let (status, body) = call_route(&client, "POST", "/api/programs", Some(unknown_kind)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body={body}");
        let error: serde_json::Value = serde_json::from_str(&body).expect("json error body");
        let message = error["message"].as_str().expect("message field");
        assert!(message.starts_with("invalid program"), "message={message}");

        let (status, body) = call_route(&client, "POST", "/api/programs", Some(json!([1, 2]))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body={body}");
        assert!(body.contains("\"message\""));
    }

    #[tokio::test]
    async fn input_bodies_without_text_are_bad_requests() {
        let client = ProgramClient::new(MemoryBackend::new());
        let route = format!("/api/units/{}/input", Uuid::new_v4());
        let (status, body) = call_route(&client, "POST", &route, Some(json!({ "answer": 1 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body={body}");
        assert!(body.contains("invalid input"));
    }

    #[tokio::test]
    async fn programs_with_duplicate_ids_are_rejected() {
        let client = ProgramClient::new(MemoryBackend::new());
        let duplicate = json!({
            "type": "root",
            "uuid": "same",
            "children": [{ "type": "value", "uuid": "same", "value": "1", "valueType": "number" }]
        });
        let (status, body) = call_route(&client, "POST", "/api/programs", Some(duplicate)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("invalid program"));
    }
}
