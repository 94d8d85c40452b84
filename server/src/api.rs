//! HTTP surface (spec §6/§7): five command paths, each wrapped in the
//! `{code, msg, data, hint}` envelope, every response HTTP 200. Grounded on
//! the teacher's `create_router`/`AppState` pattern, with the request-scoped
//! trace headers from `taskcore::trace` attached on every inbound hop.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use axum::extract::{Extension, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use taskcore::error::CoreError;
use taskcore::model::{CallbackSrv, NewTaskInput, Route, SchedMode, Task, TaskResp, TaskStatus};
use taskcore::repo::{TaskLogRepo, TaskRepo};
use taskcore::trace::{TraceContext, HEADER_PARENT_SPAN_ID, HEADER_SPAN_ID, HEADER_TRACE_ID};
use taskcore::wire::Envelope;
use tracing::{info, warn};

use crate::registry::Registry;
use crate::worker::Confirmer;

/// Request-rejection guard for the server's own lifecycle (SPEC_FULL.md §3
/// supplement): requests are refused before `start()` completes and after
/// `stop()` begins, distinct from any per-task or per-route error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum LifecycleState {
    Starting = 0,
    Started = 1,
    Stopped = 2,
}

pub struct Lifecycle(AtomicU8);

impl Lifecycle {
    pub fn new() -> Self {
        Lifecycle(AtomicU8::new(LifecycleState::Starting as u8))
    }

    pub fn mark_started(&self) {
        self.0.store(LifecycleState::Started as u8, Ordering::SeqCst);
    }

    pub fn mark_stopped(&self) {
        self.0.store(LifecycleState::Stopped as u8, Ordering::SeqCst);
    }

    fn guard(&self) -> Result<(), CoreError> {
        match self.0.load(Ordering::SeqCst) {
            v if v == LifecycleState::Started as u8 => Ok(()),
            v if v == LifecycleState::Stopped as u8 => Err(CoreError::ServerStopped),
            _ => Err(CoreError::ServerStarted),
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub task_repo: Arc<dyn TaskRepo>,
    pub log_repo: Arc<dyn TaskLogRepo>,
    pub registry: Arc<Registry>,
    pub confirmer: Arc<Confirmer>,
    pub lifecycle: Arc<Lifecycle>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/task/add", post(add_task))
        .route("/task/stop", post(stop_task))
        .route("/task/confirm", post(confirm_task))
        .route("/callback_srv/register", post(register_callback_srv))
        .route("/callback_srv/unregister", post(unregister_callback_srv))
        .with_state(state)
        .layer(middleware::from_fn(trace_middleware))
}

/// Attaches a [`TraceContext`] to every request, reusing inbound trace
/// headers if present, starting a fresh root otherwise (spec §6), and
/// stores it as a request extension so handlers can stamp it onto their
/// response envelope's `hint` field.
async fn trace_middleware(headers: HeaderMap, mut request: axum::extract::Request, next: Next) -> Response {
    let ctx = match (
        headers.get(HEADER_TRACE_ID).and_then(|v| v.to_str().ok()),
        headers.get(HEADER_SPAN_ID).and_then(|v| v.to_str().ok()),
    ) {
        (Some(trace_id), Some(span_id)) => TraceContext::from_parts(
            trace_id.to_string(),
            span_id.to_string(),
            headers
                .get(HEADER_PARENT_SPAN_ID)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string(),
        ),
        _ => TraceContext::new_root(),
    };
    info!(trace_id = ctx.trace_id(), "handling request");
    request.extensions_mut().insert(ctx);
    next.run(request).await
}

pub struct ApiError {
    err: CoreError,
    trace_id: String,
}

/// Lets handlers turn a `Result<T, CoreError>` into `Result<T, ApiError>`
/// by stamping the request's trace id on, in one call at each fallible step.
trait WithTrace<T> {
    fn trace(self, trace_id: &str) -> Result<T, ApiError>;
}

impl<T> WithTrace<T> for Result<T, CoreError> {
    fn trace(self, trace_id: &str) -> Result<T, ApiError> {
        self.map_err(|err| ApiError {
            err,
            trace_id: trace_id.to_string(),
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(error = %self.err, code = self.err.code(), trace_id = %self.trace_id, "request failed");
        let env: Envelope<()> = Envelope::error(self.err.code(), self.err.to_string()).with_hint(self.trace_id);
        (StatusCode::OK, Json(env)).into_response()
    }
}

fn ok<T: Serialize>(data: T, trace_id: &str) -> Response {
    (StatusCode::OK, Json(Envelope::ok(data).with_hint(trace_id))).into_response()
}

fn guard(state: &AppState, trace_id: &str) -> Result<(), ApiError> {
    state.lifecycle.guard().trace(trace_id)
}

#[derive(Debug, Deserialize)]
struct RouteWire {
    scheme: String,
    host: String,
    port: u16,
    #[serde(default)]
    callback_timeout_sec: i64,
    #[serde(default)]
    health_check_enabled: bool,
}

impl From<RouteWire> for Route {
    fn from(r: RouteWire) -> Self {
        Route {
            id: 0,
            scheme: r.scheme,
            host: r.host,
            port: r.port,
            callback_timeout_sec: r.callback_timeout_sec,
            health_check_enabled: r.health_check_enabled,
            last_healthy_at: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallbackSrvWire {
    name: String,
    routes: Vec<RouteWire>,
}

impl From<CallbackSrvWire> for CallbackSrv {
    fn from(s: CallbackSrvWire) -> Self {
        CallbackSrv {
            id: 0,
            name: s.name,
            has_enable_health_check: false,
            last_healthy_at: 0,
            routes: s.routes.into_iter().map(Route::from).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AddTaskReq {
    #[serde(default)]
    biz_id: String,
    name: String,
    callback_srv_name: String,
    #[serde(default)]
    callback_path: String,
    #[serde(default)]
    arg: String,
    sched_mode: i32,
    #[serde(default)]
    time_spec_at: Option<i64>,
    #[serde(default)]
    time_interval_sec: Option<i64>,
    #[serde(default)]
    time_cron_expr: Option<String>,
    #[serde(default)]
    max_run_time_sec: i64,
}

#[derive(Debug, Serialize)]
struct AddTaskResp {
    task_id: i64,
}

async fn add_task(
    State(state): State<AppState>,
    Extension(ctx): Extension<TraceContext>,
    Json(req): Json<AddTaskReq>,
) -> Result<Response, ApiError> {
    let trace_id = ctx.trace_id().to_string();
    guard(&state, &trace_id)?;

    let callback_srv = state
        .registry
        .discover(&req.callback_srv_name)
        .await
        .trace(&trace_id)?;

    let sched_mode = SchedMode::from_wire(req.sched_mode)
        .ok_or_else(|| CoreError::ArgsInvalid(format!("unknown sched_mode: {}", req.sched_mode)))
        .trace(&trace_id)?;

    let input = NewTaskInput {
        biz_id: req.biz_id,
        name: req.name,
        callback_srv: Some(callback_srv),
        callback_path: req.callback_path,
        arg: req.arg,
        sched_mode: Some(sched_mode),
        time_spec_at: req.time_spec_at,
        time_interval_sec: req.time_interval_sec,
        time_cron_expr: req.time_cron_expr,
        max_run_time_sec: req.max_run_time_sec,
    };

    let now = taskcore::utils::current_timestamp();
    let task = Task::new(input, now).trace(&trace_id)?;
    let task_id = state.task_repo.add_task(&task).await.trace(&trace_id)?;

    Ok(ok(AddTaskResp { task_id }, &trace_id))
}

#[derive(Debug, Deserialize)]
struct StopTaskReq {
    task_id: i64,
}

async fn stop_task(
    State(state): State<AppState>,
    Extension(ctx): Extension<TraceContext>,
    Json(req): Json<StopTaskReq>,
) -> Result<Response, ApiError> {
    let trace_id = ctx.trace_id().to_string();
    guard(&state, &trace_id)?;
    state.task_repo.del_task_by_id(req.task_id).await.trace(&trace_id)?;
    Ok(ok((), &trace_id))
}

#[derive(Debug, Deserialize)]
struct ConfirmTaskReq {
    task_id: i64,
    run_times: i64,
    is_success: bool,
    #[serde(default)]
    is_run_in_async: bool,
    #[serde(default)]
    extra: Option<serde_json::Value>,
}

async fn confirm_task(
    State(state): State<AppState>,
    Extension(ctx): Extension<TraceContext>,
    Json(req): Json<ConfirmTaskReq>,
) -> Result<Response, ApiError> {
    let trace_id = ctx.trace_id().to_string();
    guard(&state, &trace_id)?;

    let status = if !req.is_success {
        TaskStatus::Failed
    } else if req.is_run_in_async {
        TaskStatus::Running
    } else {
        TaskStatus::Success
    };

    let resp = TaskResp {
        task_id: req.task_id,
        run_times: req.run_times,
        status,
        is_run_in_async: req.is_run_in_async,
        extra: req.extra,
    };

    state.confirmer.confirm(&resp).await.trace(&trace_id)?;
    Ok(ok((), &trace_id))
}

async fn register_callback_srv(
    State(state): State<AppState>,
    Extension(ctx): Extension<TraceContext>,
    Json(req): Json<CallbackSrvWire>,
) -> Result<Response, ApiError> {
    let trace_id = ctx.trace_id().to_string();
    guard(&state, &trace_id)?;
    let srv: CallbackSrv = req.into();
    state.registry.register(&srv).await.trace(&trace_id)?;
    Ok(ok((), &trace_id))
}

async fn unregister_callback_srv(
    State(state): State<AppState>,
    Extension(ctx): Extension<TraceContext>,
    Json(req): Json<CallbackSrvWire>,
) -> Result<Response, ApiError> {
    let trace_id = ctx.trace_id().to_string();
    guard(&state, &trace_id)?;
    let srv: CallbackSrv = req.into();
    state.registry.unregister(&srv).await.trace(&trace_id)?;
    Ok(ok((), &trace_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_rejects_before_start_and_after_stop() {
        let lc = Lifecycle::new();
        assert!(matches!(lc.guard(), Err(CoreError::ServerStarted)));
        lc.mark_started();
        assert!(lc.guard().is_ok());
        lc.mark_stopped();
        assert!(matches!(lc.guard(), Err(CoreError::ServerStopped)));
    }

    #[test]
    fn trace_stamps_hint_on_both_success_and_error_envelopes() {
        let ok_resp = ok((), "trace-abc");
        assert_eq!(ok_resp.status(), StatusCode::OK);

        let err: Result<(), CoreError> = Err(CoreError::TaskNotFound);
        let api_err = err.trace("trace-abc").unwrap_err();
        assert_eq!(api_err.trace_id, "trace-abc");
    }
}
