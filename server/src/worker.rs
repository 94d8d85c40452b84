//! Worker engine (spec §4.5): a fixed pool that claims due tasks via
//! optimistic locking, executes their callback, and confirms the result.
//! Lifecycle mirrors the registry's (paused flag + 2s pause-check tick +
//! wait-group-style drain on `stop()`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use taskcore::error::Result;
use taskcore::model::{CallbackExecutor, InternalErrTaskRespDetail, Task, TaskLog, TaskResp, TaskStatus};
use taskcore::repo::{TaskLogRepo, TaskRepo};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::scheduler::WorkerSlot;

/// Applies a [`TaskResp`]'s terminal/deferred-terminal transition to both
/// the task row and its log row. Shared by the worker loop (after running
/// a task) and the `ConfirmTaskCmdPath` HTTP handler (spec §4.5, §6).
pub struct Confirmer {
    task_repo: Arc<dyn TaskRepo>,
    log_repo: Arc<dyn TaskLogRepo>,
}

impl Confirmer {
    pub fn new(task_repo: Arc<dyn TaskRepo>, log_repo: Arc<dyn TaskLogRepo>) -> Self {
        Confirmer { task_repo, log_repo }
    }

    pub async fn confirm(&self, resp: &TaskResp) -> Result<()> {
        self.task_repo.confirm_task(resp).await?;

        let log = TaskLog {
            task_id: resp.task_id,
            run_times: resp.run_times,
            started_at: 0,
            ended_at: taskcore::utils::current_timestamp(),
            status: resp.status,
            is_run_in_async: resp.is_run_in_async,
            req_snapshot: None,
            resp_snapshot: resp.extra.as_ref().map(|v| v.to_string()),
            err_text: None,
        };
        self.log_repo.save_task_confirmed_log(&log).await
    }
}

pub struct WorkerEngine {
    task_repo: Arc<dyn TaskRepo>,
    log_repo: Arc<dyn TaskLogRepo>,
    callback_exec: Arc<dyn CallbackExecutor>,
    confirmer: Arc<Confirmer>,
    pool_size: usize,
    paused: Arc<AtomicBool>,
    done_tx: mpsc::Sender<()>,
    done_rx: tokio::sync::Mutex<mpsc::Receiver<()>>,
}

impl WorkerEngine {
    pub fn new(
        task_repo: Arc<dyn TaskRepo>,
        log_repo: Arc<dyn TaskLogRepo>,
        callback_exec: Arc<dyn CallbackExecutor>,
        pool_size: usize,
    ) -> Self {
        let pool_size = if pool_size == 0 {
            taskcore::defaults::default_task_worker_pool_size()
        } else {
            pool_size
        };
        let (done_tx, done_rx) = mpsc::channel(pool_size.max(1));
        WorkerEngine {
            confirmer: Arc::new(Confirmer::new(task_repo.clone(), log_repo.clone())),
            task_repo,
            log_repo,
            callback_exec,
            pool_size,
            paused: Arc::new(AtomicBool::new(false)),
            done_tx,
            done_rx: tokio::sync::Mutex::new(done_rx),
        }
    }

    pub fn confirmer(&self) -> Arc<Confirmer> {
        self.confirmer.clone()
    }

    pub async fn stop(&self) {
        self.paused.store(true, Ordering::SeqCst);
        let mut received = 0usize;
        let mut rx = self.done_rx.lock().await;
        while received < self.pool_size {
            if rx.recv().await.is_none() {
                break;
            }
            received += 1;
        }
    }

    /// Spawns the fixed worker pool, each registering readiness on
    /// `ready_tx` (the scheduler's [`WorkerSlot`] channel).
    pub fn run(self: Arc<Self>, ready_tx: mpsc::Sender<WorkerSlot>) {
        info!(size = self.pool_size, "starting task worker pool");
        for id in 0..self.pool_size {
            let engine = self.clone();
            let ready_tx = ready_tx.clone();
            tokio::spawn(async move { engine.run_worker(id, ready_tx).await });
        }
    }

    async fn run_worker(&self, id: usize, ready_tx: mpsc::Sender<WorkerSlot>) {
        debug!(worker = id, "task worker running");
        let mut pause_tick = tokio::time::interval(Duration::from_secs(2));

        loop {
            if self.paused.load(Ordering::SeqCst) {
                let _ = self.done_tx.send(()).await;
                return;
            }

            let (slot_tx, slot_rx) = oneshot::channel();
            tokio::select! {
                res = ready_tx.send(slot_tx) => {
                    if res.is_err() {
                        warn!(worker = id, "scheduler gone, stopping worker");
                        return;
                    }
                }
                _ = pause_tick.tick() => {
                    continue;
                }
            }

            let task = tokio::select! {
                t = slot_rx => t.ok(),
                _ = pause_tick.tick() => None,
            };

            let Some(task) = task else { continue };

            if let Err(e) = self.process_task(task).await {
                error!(worker = id, error = %e, "task processing failed");
            }
        }
    }

    async fn process_task(&self, mut task: Task) -> Result<()> {
        if task.callback_srv.routes.is_empty() {
            warn!(task_id = task.id, "callback server has no routes, dropping this attempt");
            return Ok(());
        }

        let now = taskcore::utils::current_timestamp();
        let next_fire_at = task.next_fire_at(now).unwrap_or(now);

        let locked = self.task_repo.lock_task(&task, next_fire_at).await?;
        if !locked {
            // Another worker or the next sweep already claimed this row;
            // this is not an error, just a lost race (spec §4.5 step 2).
            debug!(task_id = task.id, "lock lost to another worker");
            return Ok(());
        }

        task.run_times += 1;
        task.last_run_at = now;

        self.log_repo
            .save_task_started_log(&TaskLog {
                task_id: task.id,
                run_times: task.run_times,
                started_at: now,
                ended_at: 0,
                status: TaskStatus::Running,
                is_run_in_async: false,
                req_snapshot: Some(task.arg.clone()),
                resp_snapshot: None,
                err_text: None,
            })
            .await?;

        let resp = match task.run(self.callback_exec.as_ref()).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(task_id = task.id, error = %e, "callback execution failed");
                TaskResp {
                    task_id: task.id,
                    run_times: task.run_times,
                    status: TaskStatus::Failed,
                    is_run_in_async: false,
                    extra: serde_json::to_value(InternalErrTaskRespDetail {
                        err: e.to_string(),
                        occurred_at: taskcore::utils::current_timestamp(),
                    })
                    .ok(),
                }
            }
        };

        self.log_repo
            .save_task_callback_log(&TaskLog {
                task_id: task.id,
                run_times: task.run_times,
                started_at: now,
                ended_at: 0,
                status: resp.status,
                is_run_in_async: resp.is_run_in_async,
                req_snapshot: None,
                resp_snapshot: resp.extra.as_ref().map(|v| v.to_string()),
                err_text: None,
            })
            .await?;

        self.confirmer.confirm(&resp).await
    }
}
