//! Core data model: routes, callback servers, tasks, task responses and
//! task log entries (spec §3), plus the task-entity and callback-executor
//! operations that act on them (spec §4.1, §4.2).

use std::str::FromStr;

use chrono::Utc;
use cron::Schedule;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// A single concrete endpoint a callback server exposes. Immutable after
/// creation except for `last_healthy_at` and the soft-delete marker -
/// identity is `(srv_id, scheme, host, port)`, enforced by the repository's
/// unique constraint, not by this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: i64,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub callback_timeout_sec: i64,
    pub health_check_enabled: bool,
    pub last_healthy_at: i64,
}

impl Route {
    pub fn base_url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            format!("{}://{}:{}", self.scheme, self.host, self.port)
        } else {
            format!("{}://{}:{}/{}", self.scheme, self.host, self.port, path)
        }
    }
}

/// A named, logical callback server: a set of routes any of which may serve
/// a given callback invocation. `name` is globally unique (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackSrv {
    pub id: i64,
    pub name: String,
    pub has_enable_health_check: bool,
    pub last_healthy_at: i64,
    pub routes: Vec<Route>,
}

impl CallbackSrv {
    /// Combines the denormalized flag with a live scan of routes, so a
    /// stale flag never causes health checking to wrongly skip a server
    /// that does have a health-checked route (spec §9 supplement).
    pub fn has_enable_health_check_route(&self) -> bool {
        self.has_enable_health_check || self.routes.iter().any(|r| r.health_check_enabled)
    }

    /// Picks one route uniformly at random (spec §4.2 `CallbackSrv`).
    pub fn random_route(&self) -> Option<&Route> {
        self.routes.choose(&mut rand::rng())
    }
}

/// How a [`Task`] is scheduled to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum SchedMode {
    /// Wire value `1` per spec §6.
    TimeCron = 1,
    /// Wire value `2` per spec §6.
    TimeSpec = 2,
    /// Wire value `3` per spec §6.
    TimeInterval = 3,
}

impl SchedMode {
    pub fn from_wire(v: i32) -> Option<Self> {
        match v {
            1 => Some(SchedMode::TimeCron),
            2 => Some(SchedMode::TimeSpec),
            3 => Some(SchedMode::TimeInterval),
            _ => None,
        }
    }
}

/// Task lifecycle state (spec §3 `TaskResp`, §4.5 state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum TaskStatus {
    Ready = 0,
    Running = 1,
    Success = 2,
    Failed = 3,
}

impl TaskStatus {
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(TaskStatus::Ready),
            1 => Some(TaskStatus::Running),
            2 => Some(TaskStatus::Success),
            3 => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

/// A scheduled, parameterized unit of work bound to a callback server.
/// Dedup identity is `(name, biz_id)` (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub biz_id: String,
    pub name: String,
    pub callback_srv: CallbackSrv,
    pub callback_path: String,
    pub arg: String,
    pub sched_mode: SchedMode,
    pub time_spec_at: Option<i64>,
    pub time_interval_sec: Option<i64>,
    pub time_cron_expr: Option<String>,
    pub plan_sched_next_at: i64,
    pub last_run_at: i64,
    pub run_times: i64,
    pub allow_max_run_times: i64,
    pub max_run_time_sec: i64,
    pub last_success_at: i64,
    pub last_failed_at: i64,
}

/// Input to [`Task::new`]. Mirrors the original's `NewTaskInput` validated
/// struct (spec §4.1 `NewTask`).
pub struct NewTaskInput {
    pub biz_id: String,
    pub name: String,
    pub callback_srv: Option<CallbackSrv>,
    pub callback_path: String,
    pub arg: String,
    pub sched_mode: Option<SchedMode>,
    pub time_spec_at: Option<i64>,
    pub time_interval_sec: Option<i64>,
    pub time_cron_expr: Option<String>,
    pub max_run_time_sec: i64,
}

impl Task {
    /// Validates `input` and fills in the invariants spec §3/§4.1 require:
    /// `allow_max_run_times = 1` for `TimeSpec`, unbounded for
    /// `TimeInterval`/`TimeCron`, and an initial `plan_sched_next_at`
    /// computed from `NextFireAt`.
    pub fn new(input: NewTaskInput, now: i64) -> Result<Task> {
        let callback_srv = input
            .callback_srv
            .ok_or_else(|| CoreError::ArgsInvalid("callback server is required".into()))?;

        if input.name.trim().is_empty() {
            return Err(CoreError::ArgsInvalid("task name is required".into()));
        }

        let sched_mode = input
            .sched_mode
            .ok_or_else(|| CoreError::ArgsInvalid("sched mode is required".into()))?;

        match sched_mode {
            SchedMode::TimeSpec if input.time_spec_at.is_none() => {
                return Err(CoreError::ArgsInvalid(
                    "time_spec_at is required for TimeSpec mode".into(),
                ));
            }
            SchedMode::TimeInterval if input.time_interval_sec.is_none_or(|v| v <= 0) => {
                return Err(CoreError::ArgsInvalid(
                    "time_interval_sec must be positive for TimeInterval mode".into(),
                ));
            }
            SchedMode::TimeCron if input.time_cron_expr.as_deref().unwrap_or("").is_empty() => {
                return Err(CoreError::ArgsInvalid(
                    "time_cron_expr is required for TimeCron mode".into(),
                ));
            }
            _ => {}
        }

        let allow_max_run_times = match sched_mode {
            SchedMode::TimeSpec => 1,
            SchedMode::TimeInterval | SchedMode::TimeCron => crate::defaults::unbounded_run_times(),
        };

        let mut task = Task {
            id: 0,
            biz_id: input.biz_id,
            name: input.name,
            callback_srv,
            callback_path: input.callback_path,
            arg: input.arg,
            sched_mode,
            time_spec_at: input.time_spec_at,
            time_interval_sec: input.time_interval_sec,
            time_cron_expr: input.time_cron_expr,
            plan_sched_next_at: 0,
            last_run_at: 0,
            run_times: 0,
            allow_max_run_times,
            max_run_time_sec: if input.max_run_time_sec > 0 {
                input.max_run_time_sec
            } else {
                crate::defaults::default_max_run_time_sec()
            },
            last_success_at: 0,
            last_failed_at: 0,
        };
        task.plan_sched_next_at = task.next_fire_at(now)?;
        Ok(task)
    }

    /// Computes the next time this task should fire (spec §4.1 `NextFireAt`).
    pub fn next_fire_at(&self, now: i64) -> Result<i64> {
        match self.sched_mode {
            SchedMode::TimeInterval => {
                let interval = self
                    .time_interval_sec
                    .ok_or(CoreError::UnknownSchedAt)?;
                Ok(now + interval)
            }
            SchedMode::TimeCron => {
                let expr = self
                    .time_cron_expr
                    .as_deref()
                    .ok_or(CoreError::UnknownSchedAt)?;
                let schedule = Schedule::from_str(expr)
                    .map_err(|e| CoreError::ArgsInvalid(format!("invalid cron expression: {e}")))?;
                let now_dt = chrono::DateTime::<Utc>::from_timestamp(now, 0)
                    .ok_or_else(|| CoreError::ArgsInvalid("invalid timestamp".into()))?;
                schedule
                    .after(&now_dt)
                    .next()
                    .map(|dt| dt.timestamp())
                    .ok_or(CoreError::UnknownSchedAt)
            }
            SchedMode::TimeSpec => self.time_spec_at.ok_or(CoreError::UnknownSchedAt),
        }
    }

    /// Runs the task against its callback server and maps the response
    /// into a terminal or deferred-terminal [`TaskResp`] (spec §4.1 `Run`).
    pub async fn run(&self, exec: &dyn CallbackExecutor) -> Result<TaskResp> {
        let resp = exec.callback_srv(self).await?;

        let status = if !resp.is_success {
            TaskStatus::Failed
        } else if resp.is_run_in_async {
            TaskStatus::Running
        } else {
            TaskStatus::Success
        };

        Ok(TaskResp {
            task_id: self.id,
            run_times: self.run_times,
            status,
            is_run_in_async: resp.is_run_in_async,
            extra: resp.extra,
        })
    }
}

/// The externally-observable outcome of one run attempt (spec §3 `TaskResp`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResp {
    pub task_id: i64,
    pub run_times: i64,
    pub status: TaskStatus,
    pub is_run_in_async: bool,
    pub extra: Option<serde_json::Value>,
}

/// Synthetic response wrapping a transport/parse failure into a terminal
/// `Failed` `TaskResp`, carrying the error and when it occurred, the way
/// the original's `InternalErrTaskRespDetail` does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalErrTaskRespDetail {
    pub err: String,
    pub occurred_at: i64,
}

/// One row per attempt of a task. Identity is `(task_id, run_times)`,
/// written across up to three phases (spec §3 `TaskLog`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLog {
    pub task_id: i64,
    pub run_times: i64,
    pub started_at: i64,
    pub ended_at: i64,
    pub status: TaskStatus,
    pub is_run_in_async: bool,
    pub req_snapshot: Option<String>,
    pub resp_snapshot: Option<String>,
    pub err_text: Option<String>,
}

/// Response payload from invoking a callback route (spec §4.2).
#[derive(Debug, Clone)]
pub struct TaskCallbackSrvResp {
    pub is_run_in_async: bool,
    pub is_success: bool,
    pub extra: Option<serde_json::Value>,
}

/// Result of fanning a heartbeat out to every route of a server
/// (spec §4.2 `HeartBeat`).
#[derive(Debug, Clone)]
pub struct HeartBeatResp {
    pub reply_routes: Vec<Route>,
    pub no_reply_routes: Vec<Route>,
}

/// Polymorphic callback transport (spec §4.2, §9 "polymorphic over
/// transport"). The HTTP implementation lives in `server::executor`; tests
/// can substitute a fake.
#[async_trait::async_trait]
pub trait CallbackExecutor: Send + Sync {
    async fn callback_srv(&self, task: &Task) -> Result<TaskCallbackSrvResp>;
    async fn heart_beat(&self, srv: &CallbackSrv) -> Result<HeartBeatResp>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn srv_with_routes(n: usize) -> CallbackSrv {
        CallbackSrv {
            id: 1,
            name: "svc".into(),
            has_enable_health_check: false,
            last_healthy_at: 0,
            routes: (0..n)
                .map(|i| Route {
                    id: i as i64 + 1,
                    scheme: "http".into(),
                    host: "localhost".into(),
                    port: 8000 + i as u16,
                    callback_timeout_sec: 5,
                    health_check_enabled: false,
                    last_healthy_at: 0,
                })
                .collect(),
        }
    }

    #[test]
    fn new_task_requires_callback_srv() {
        let input = NewTaskInput {
            biz_id: "".into(),
            name: "t1".into(),
            callback_srv: None,
            callback_path: "".into(),
            arg: "".into(),
            sched_mode: Some(SchedMode::TimeSpec),
            time_spec_at: Some(100),
            time_interval_sec: None,
            time_cron_expr: None,
            max_run_time_sec: 0,
        };
        let err = Task::new(input, 0).unwrap_err();
        assert!(matches!(err, CoreError::ArgsInvalid(_)));
    }

    #[test]
    fn new_task_time_spec_has_single_allowed_run() {
        let input = NewTaskInput {
            biz_id: "b1".into(),
            name: "t1".into(),
            callback_srv: Some(srv_with_routes(1)),
            callback_path: "/cb".into(),
            arg: "{}".into(),
            sched_mode: Some(SchedMode::TimeSpec),
            time_spec_at: Some(1_700_000_000),
            time_interval_sec: None,
            time_cron_expr: None,
            max_run_time_sec: 0,
        };
        let task = Task::new(input, 1_699_999_000).unwrap();
        assert_eq!(task.allow_max_run_times, 1);
        assert_eq!(task.plan_sched_next_at, 1_700_000_000);
        assert_eq!(task.max_run_time_sec, crate::defaults::default_max_run_time_sec());
    }

    #[test]
    fn new_task_interval_is_unbounded_and_fires_relative_to_now() {
        let input = NewTaskInput {
            biz_id: "".into(),
            name: "t1".into(),
            callback_srv: Some(srv_with_routes(1)),
            callback_path: "".into(),
            arg: "".into(),
            sched_mode: Some(SchedMode::TimeInterval),
            time_spec_at: None,
            time_interval_sec: Some(60),
            time_cron_expr: None,
            max_run_time_sec: 10,
        };
        let task = Task::new(input, 1000).unwrap();
        assert_eq!(task.allow_max_run_times, i64::MAX);
        assert_eq!(task.plan_sched_next_at, 1060);
    }

    #[test]
    fn new_task_cron_requires_expr() {
        let input = NewTaskInput {
            biz_id: "".into(),
            name: "t1".into(),
            callback_srv: Some(srv_with_routes(1)),
            callback_path: "".into(),
            arg: "".into(),
            sched_mode: Some(SchedMode::TimeCron),
            time_spec_at: None,
            time_interval_sec: None,
            time_cron_expr: None,
            max_run_time_sec: 0,
        };
        assert!(Task::new(input, 0).is_err());
    }

    #[test]
    fn cron_next_fire_is_in_the_future() {
        let input = NewTaskInput {
            biz_id: "".into(),
            name: "t1".into(),
            callback_srv: Some(srv_with_routes(1)),
            callback_path: "".into(),
            arg: "".into(),
            sched_mode: Some(SchedMode::TimeCron),
            time_spec_at: None,
            time_interval_sec: None,
            time_cron_expr: Some("0 * * * * *".into()),
            max_run_time_sec: 0,
        };
        let now = 1_700_000_000;
        let task = Task::new(input, now).unwrap();
        assert!(task.plan_sched_next_at > now);
    }

    #[test]
    fn random_route_none_when_empty() {
        let srv = srv_with_routes(0);
        assert!(srv.random_route().is_none());
    }

    #[test]
    fn random_route_some_when_present() {
        let srv = srv_with_routes(3);
        assert!(srv.random_route().is_some());
    }

    #[test]
    fn has_enable_health_check_route_scans_routes() {
        let mut srv = srv_with_routes(1);
        assert!(!srv.has_enable_health_check_route());
        srv.routes[0].health_check_enabled = true;
        assert!(srv.has_enable_health_check_route());
    }
}
