//! Repository contracts (spec §4.6). These are interfaces only; the SQLite
//! implementations live in `server::db`. Keeping the contracts here lets
//! `core::model` operations and tests depend on them without depending on
//! any particular storage engine.

use crate::error::Result;
use crate::model::{CallbackSrv, Task, TaskLog, TaskResp};

/// One page of a cursor-ordered sweep (spec §4.4, §4.6 `TimeoutTasks`).
pub struct TaskPage {
    pub tasks: Vec<Task>,
    /// Id of the last row in `tasks`, to resume from on the next call.
    /// `None` when `tasks` is empty.
    pub next_cursor: Option<i64>,
}

#[async_trait::async_trait]
pub trait TaskRepo: Send + Sync {
    async fn add_task(&self, task: &Task) -> Result<i64>;
    async fn del_task_by_id(&self, id: i64) -> Result<()>;
    async fn get_task_by_id(&self, id: i64) -> Result<Option<Task>>;

    /// Ordered-ascending-by-id page where `run_times < allow_max_run_times
    /// AND plan_sched_next_at <= now AND id > cursor`, at most `size` rows.
    /// A page shorter than `size` is itself the end-of-sweep signal
    /// (spec §9) — callers reset their cursor on it, not only on empty.
    async fn timeout_tasks(&self, size: i64, cursor: i64, now: i64) -> Result<TaskPage>;

    /// Optimistic-locking CAS claim (spec §4.5 step 2). Returns `true` iff
    /// this call was the one that transitioned the row.
    async fn lock_task(&self, task: &Task, next_plan_sched_next_at: i64) -> Result<bool>;

    /// Applies the terminal/deferred-terminal transition for `resp` (spec
    /// §4.5 step 4). No-op if the task's current status isn't `Running`
    /// (guards against a late/duplicate confirm overtaking an earlier one).
    async fn confirm_task(&self, resp: &TaskResp) -> Result<()>;

    /// Bulk-deletes tasks matching `query` (spec §4.6 `DelTasks`), honoring
    /// `in_ids`, `eq_name`, `created_exceed`, and `task_finished`
    /// (`run_times >= allow_max_run_times`) as a maintenance sweep, not the
    /// per-row `del_task_by_id` used by the API's `StopTask`.
    async fn del_tasks(&self, query: &QueryStream) -> Result<()>;
}

/// Optional filter keys a [`QueryStream`] can carry (spec §4.6).
#[derive(Debug, Clone, Default)]
pub struct QueryStream {
    pub in_ids: Option<Vec<i64>>,
    pub eq_name: Option<String>,
    pub enabled_health_check: bool,
    pub checked_health_lt: Option<i64>,
    pub created_exceed: Option<i64>,
    pub task_finished: bool,
    pub limit: i64,
    pub offset: i64,
}

impl QueryStream {
    pub fn new(limit: i64, offset: i64) -> Self {
        QueryStream {
            limit,
            offset,
            ..Default::default()
        }
    }

    pub fn with_eq_name(mut self, name: impl Into<String>) -> Self {
        self.eq_name = Some(name.into());
        self
    }

    pub fn with_in_ids(mut self, ids: Vec<i64>) -> Self {
        self.in_ids = Some(ids);
        self
    }

    pub fn with_enabled_health_check(mut self) -> Self {
        self.enabled_health_check = true;
        self
    }
}

#[async_trait::async_trait]
pub trait TaskCallbackSrvRepo: Send + Sync {
    /// Additive: upserts the server row by name, upserts routes by
    /// `(srv_id, scheme, host, port)`, undeletes soft-deleted rows, and
    /// flips `has_enable_health_check` true if any incoming route enables
    /// it and the flag isn't already true (spec §4.3 `Register`).
    async fn add_srv_routes(&self, srv: &CallbackSrv) -> Result<()>;

    /// Subtractive: hard-deletes the named routes, then recomputes the
    /// server's aggregates — deletes the server if no routes remain, else
    /// clears the flag if no remaining route enables health checking
    /// (spec §4.3 `Unregister`).
    async fn del_srv_routes(&self, srv: &CallbackSrv) -> Result<()>;

    /// Marks every route named on `srv` as healthy (`last_healthy_at =
    /// now`), used for the reply-routes branch of a health sweep.
    async fn set_srv_routes_pass_health_check(&self, srv: &CallbackSrv) -> Result<()>;

    async fn get_srvs_by_ids(&self, ids: &[i64]) -> Result<Vec<CallbackSrv>>;
    async fn get_srvs(&self, query: &QueryStream) -> Result<Vec<CallbackSrv>>;
}

#[async_trait::async_trait]
pub trait TaskLogRepo: Send + Sync {
    async fn save_task_started_log(&self, log: &TaskLog) -> Result<()>;
    async fn save_task_callback_log(&self, log: &TaskLog) -> Result<()>;
    async fn save_task_confirmed_log(&self, log: &TaskLog) -> Result<()>;

    /// Bulk-deletes logs matching `query` (spec §4.6 `DelLogs`), honoring
    /// `in_ids` (against `task_id`) and `created_exceed` (against
    /// `started_at`).
    async fn del_logs(&self, query: &QueryStream) -> Result<()>;
}
