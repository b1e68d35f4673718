//! HTTP control surface
//!
//! | Method   | Path                         | Effect                          |
//! |----------|------------------------------|---------------------------------|
//! | `PUT`    | `/set/:set/:address`         | add address to `<set>4`/`<set>6` |
//! | `DELETE` | `/set/:set/:address`         | remove address                  |
//! | `POST`   | `/set/:set/flush`            | flush `<set>` verbatim          |
//! | `POST`   | `/set/:set/flush?families=all` | flush `<set>4` and `<set>6`   |
//! | `GET`    | `/health`                    | liveness                        |
//! | `GET`    | `/audit?limit=N`             | most recent audit records       |

use crate::audit::{AuditEvent, AuditLog};
use crate::core::backend::Connector;
use crate::core::engine::{Engine, Outcome, Task};
use crate::core::error::Failure;
use crate::validators::validate_set_prefix;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared state for all handlers.
pub struct AppState<C: Connector> {
    pub engine: Engine<C>,
    pub audit: Option<AuditLog>,
    pub request_timeout: Duration,
}

impl<C: Connector> AppState<C> {
    pub fn new(engine: Engine<C>, request_timeout: Duration) -> Self {
        Self {
            engine,
            audit: None,
            request_timeout,
        }
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }
}

/// Error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Advisory outcome label; empty when nothing was staged
    #[serde(default)]
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default)]
    pub retryable: bool,
}

impl ErrorResponse {
    fn message(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            outcome: String::new(),
            hint: None,
            retryable: false,
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Table the sets live in
    pub table: String,
}

#[derive(Debug, Deserialize)]
pub struct FlushParams {
    /// `all` flushes both per-family sets of the prefix
    families: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuditParams {
    limit: Option<usize>,
}

const DEFAULT_AUDIT_LIMIT: usize = 50;
const MAX_AUDIT_LIMIT: usize = 1000;

struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse::message(message),
        }
    }

    fn deadline() -> Self {
        Self {
            status: StatusCode::GATEWAY_TIMEOUT,
            body: ErrorResponse {
                retryable: true,
                ..ErrorResponse::message("request deadline exceeded")
            },
        }
    }
}

impl From<&Failure> for ApiError {
    fn from(failure: &Failure) -> Self {
        let status = if failure.error.is_input_error() {
            StatusCode::BAD_REQUEST
        } else if failure.is_retryable() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };

        Self {
            status,
            body: ErrorResponse {
                error: failure.to_string(),
                outcome: failure.label().to_string(),
                hint: failure.hint().map(|t| t.user_message),
                retryable: failure.is_retryable(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Builds the router over `state`.
pub fn router<C: Connector>(state: Arc<AppState<C>>) -> Router {
    Router::new()
        .route("/health", get(health_handler::<C>))
        .route("/audit", get(audit_handler::<C>))
        .route(
            "/set/:set/:value",
            put(add_handler::<C>)
                .delete(delete_handler::<C>)
                .post(flush_handler::<C>),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves `app` on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health_handler<C: Connector>(State(state): State<Arc<AppState<C>>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        table: state.engine.config().table.clone(),
    })
}

/// Newest audit records first; 404 when auditing is off.
async fn audit_handler<C: Connector>(
    State(state): State<Arc<AppState<C>>>,
    Query(params): Query<AuditParams>,
) -> Response {
    let Some(audit) = &state.audit else {
        return ApiError::new(StatusCode::NOT_FOUND, "audit log is not enabled").into_response();
    };

    let limit = params
        .limit
        .unwrap_or(DEFAULT_AUDIT_LIMIT)
        .min(MAX_AUDIT_LIMIT);

    match audit.read_recent(limit).await {
        Ok(events) => Json(events).into_response(),
        // Nothing has been recorded yet
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Json(Vec::<AuditEvent>::new()).into_response()
        }
        Err(e) => {
            warn!(path = %audit.path().display(), "Failed to read audit log: {}", e);
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("cannot read audit log: {e}"),
            )
            .into_response()
        }
    }
}

async fn add_handler<C: Connector>(
    State(state): State<Arc<AppState<C>>>,
    Path((set, value)): Path<(String, String)>,
) -> Response {
    mutate(&state, Task::Add, &set, &value).await
}

async fn delete_handler<C: Connector>(
    State(state): State<Arc<AppState<C>>>,
    Path((set, value)): Path<(String, String)>,
) -> Response {
    mutate(&state, Task::Delete, &set, &value).await
}

async fn flush_handler<C: Connector>(
    State(state): State<Arc<AppState<C>>>,
    Path((set, value)): Path<(String, String)>,
    Query(params): Query<FlushParams>,
) -> Response {
    let deadline = Instant::now() + state.request_timeout;

    if value != "flush" {
        return ApiError::bad_request("only flush is supported for POST").into_response();
    }
    if let Err(reason) = validate_set_prefix(&set) {
        return ApiError::bad_request(format!("invalid set name: {reason}")).into_response();
    }

    let all_families = match params.families.as_deref() {
        None => false,
        Some("all") => true,
        Some(other) => {
            return ApiError::bad_request(format!("unsupported families value '{other}'"))
                .into_response();
        }
    };

    let result = run_before(deadline, async {
        if all_families {
            state.engine.flush_families(&set).await
        } else {
            state.engine.reconcile(Task::Flush, &set, "").await
        }
    })
    .await;

    finish(&state, Task::Flush, &set, None, result, |outcome| {
        serde_json::json!({ "result": outcome.as_str() })
    })
    .await
}

async fn mutate<C: Connector>(state: &AppState<C>, task: Task, set: &str, value: &str) -> Response {
    let deadline = Instant::now() + state.request_timeout;

    if value.parse::<IpAddr>().is_err() {
        info!(%task, set, value, "rejected non-address value");
        return ApiError::bad_request("only flush or IP addresses are supported").into_response();
    }
    if let Err(reason) = validate_set_prefix(set) {
        return ApiError::bad_request(format!("invalid set name: {reason}")).into_response();
    }

    let result = run_before(deadline, state.engine.reconcile(task, set, value)).await;

    finish(state, task, set, Some(value), result, |outcome| {
        serde_json::json!({ "success": outcome.as_str() })
    })
    .await
}

/// Why a request produced no outcome.
enum Aborted {
    Failed(Failure),
    Deadline,
}

/// Runs `fut` unless `deadline` has already passed, and at most until it does.
async fn run_before<F>(deadline: Instant, fut: F) -> Result<Outcome, Aborted>
where
    F: Future<Output = Result<Outcome, Failure>>,
{
    if Instant::now() >= deadline {
        return Err(Aborted::Deadline);
    }

    match tokio::time::timeout_at(deadline, fut).await {
        Ok(result) => result.map_err(Aborted::Failed),
        Err(_) => Err(Aborted::Deadline),
    }
}

async fn finish<C: Connector>(
    state: &AppState<C>,
    task: Task,
    set: &str,
    address: Option<&str>,
    result: Result<Outcome, Aborted>,
    body: impl FnOnce(Outcome) -> serde_json::Value,
) -> Response {
    let (response, audit_result) = match result {
        Ok(outcome) => {
            info!(%task, set, address, %outcome, "request completed");
            ((StatusCode::OK, Json(body(outcome))).into_response(), Ok(outcome))
        }
        Err(Aborted::Failed(failure)) => {
            let error = ApiError::from(&failure);
            warn!(
                %task,
                set,
                address,
                status = error.status.as_u16(),
                retryable = error.body.retryable,
                "request failed: {}",
                failure
            );
            let audit_result = Err((failure.label(), failure.to_string()));
            (error.into_response(), audit_result)
        }
        Err(Aborted::Deadline) => {
            warn!(%task, set, address, "request deadline exceeded");
            (
                ApiError::deadline().into_response(),
                Err(("", "request deadline exceeded".to_string())),
            )
        }
    };

    if let Some(audit) = &state.audit {
        audit
            .record(&AuditEvent::mutation(task, set, address, audit_result))
            .await;
    }

    response
}
