//! Registry engine (spec §4.3): discovery, additive/subtractive
//! registration, and a leader-gated periodic health sweep fanned out to a
//! bounded worker pool. Grounded on the original's `internal/registry/
//! registry.go` and the teacher's `health_monitor.rs` periodic-sweep
//! pattern.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use taskcore::error::{CoreError, Result};
use taskcore::model::CallbackSrv;
use taskcore::repo::{QueryStream, TaskCallbackSrvRepo};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::election::Elector;
use taskcore::model::CallbackExecutor;

const HEALTH_CHECK_PAGE_SIZE: i64 = 1000;

pub struct Registry {
    srv_repo: Arc<dyn TaskCallbackSrvRepo>,
    callback_exec: Arc<dyn CallbackExecutor>,
    elector: Arc<dyn Elector>,
    check_health_interval_sec: u64,
    worker_pool_size: usize,

    ready_check_srv_tx: mpsc::Sender<CallbackSrv>,
    ready_check_srv_rx: Arc<Mutex<mpsc::Receiver<CallbackSrv>>>,

    paused: Arc<AtomicBool>,
    worker_done_tx: mpsc::Sender<()>,
    worker_done_rx: Mutex<mpsc::Receiver<()>>,

    exit_sched_tx: mpsc::Sender<()>,
    exit_sched_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl Registry {
    pub fn new(
        worker_pool_size: usize,
        srv_repo: Arc<dyn TaskCallbackSrvRepo>,
        callback_exec: Arc<dyn CallbackExecutor>,
        elector: Arc<dyn Elector>,
        check_health_interval_sec: u64,
    ) -> Self {
        let worker_pool_size = if worker_pool_size == 0 {
            taskcore::defaults::default_health_worker_pool_size()
        } else {
            worker_pool_size
        };
        // Default of 5s applies even if the caller passes 0 — one revision
        // of the original never set this field, silently disabling health
        // checks forever (SPEC_FULL.md §5, decision 3).
        let check_health_interval_sec = if check_health_interval_sec == 0 {
            5
        } else {
            check_health_interval_sec
        };

        let (ready_tx, ready_rx) = mpsc::channel(1);
        let (done_tx, done_rx) = mpsc::channel(worker_pool_size.max(1));
        let (exit_tx, exit_rx) = mpsc::channel(1);

        Registry {
            srv_repo,
            callback_exec,
            elector,
            check_health_interval_sec,
            worker_pool_size,
            ready_check_srv_tx: ready_tx,
            ready_check_srv_rx: Arc::new(Mutex::new(ready_rx)),
            paused: Arc::new(AtomicBool::new(false)),
            worker_done_tx: done_tx,
            worker_done_rx: Mutex::new(done_rx),
            exit_sched_tx: exit_tx,
            exit_sched_rx: Mutex::new(Some(exit_rx)),
        }
    }

    pub async fn stop(&self) {
        self.paused.store(true, Ordering::SeqCst);
        let _ = self.exit_sched_tx.send(()).await;
        let mut received = 0usize;
        let mut rx = self.worker_done_rx.lock().await;
        while received < self.worker_pool_size {
            if rx.recv().await.is_none() {
                break;
            }
            received += 1;
        }
    }

    pub async fn discover(&self, name: &str) -> Result<CallbackSrv> {
        let query = QueryStream::new(1, 0).with_eq_name(name);
        let srvs = self.srv_repo.get_srvs(&query).await?;
        srvs.into_iter()
            .next()
            .ok_or(CoreError::TaskCallbackSrvNotFound)
    }

    /// Additive registration (spec §4.3 `Register`).
    pub async fn register(&self, srv: &CallbackSrv) -> Result<()> {
        self.srv_repo.add_srv_routes(srv).await.map_err(|e| {
            error!(error = %e, "register failed");
            e
        })
    }

    /// Subtractive registration (spec §4.3 `Unregister`).
    pub async fn unregister(&self, srv: &CallbackSrv) -> Result<()> {
        self.srv_repo.del_srv_routes(srv).await.map_err(|e| {
            error!(error = %e, "unregister failed");
            e
        })
    }

    /// One full sweep: pages every health-checked server and fans it onto
    /// the worker channel (spec §4.3 `HealthCheck`).
    pub async fn health_check(&self) -> Result<()> {
        if !self.elector.is_master() {
            return Err(CoreError::NotMaster);
        }

        let mut offset = 0i64;
        loop {
            let query = QueryStream::new(HEALTH_CHECK_PAGE_SIZE, offset).with_enabled_health_check();
            let srvs = self.srv_repo.get_srvs(&query).await?;
            if srvs.is_empty() {
                debug!("no more servers need checking");
                break;
            }
            offset += HEALTH_CHECK_PAGE_SIZE;

            debug!(count = srvs.len(), "checking servers");
            for srv in srvs {
                // Blocking send is the backpressure mechanism (spec §4.3).
                if self.ready_check_srv_tx.send(srv).await.is_err() {
                    break;
                }
            }
        }
        Ok(())
    }

    pub async fn run(self: Arc<Self>) {
        let worker_self = self.clone();
        tokio::spawn(async move { worker_self.create_worker_pool().await });
        self.sched().await;
    }

    async fn sched(&self) {
        let mut exit_rx = self
            .exit_sched_rx
            .lock()
            .await
            .take()
            .expect("sched() must only run once");

        loop {
            if exit_rx.try_recv().is_ok() {
                break;
            }

            debug!("checking health");
            if let Err(e) = self.health_check().await {
                error!(error = %e, "health check sweep failed");
            }
            debug!("checked health");

            tokio::time::sleep(Duration::from_secs(self.check_health_interval_sec)).await;
        }
    }

    async fn create_worker_pool(&self) {
        info!(size = self.worker_pool_size, "starting health check worker pool");
        let mut handles = Vec::with_capacity(self.worker_pool_size);
        for id in 0..self.worker_pool_size {
            let rx = self.ready_check_srv_rx.clone();
            let paused = self.paused.clone();
            let done_tx = self.worker_done_tx.clone();
            let callback_exec = self.callback_exec.clone();
            let srv_repo = self.srv_repo.clone();
            handles.push(tokio::spawn(run_health_worker(
                id, rx, paused, done_tx, callback_exec, srv_repo,
            )));
        }
        for h in handles {
            let _ = h.await;
        }
    }
}

async fn run_health_worker(
    id: usize,
    ready_rx: Arc<Mutex<mpsc::Receiver<CallbackSrv>>>,
    paused: Arc<AtomicBool>,
    done_tx: mpsc::Sender<()>,
    callback_exec: Arc<dyn CallbackExecutor>,
    srv_repo: Arc<dyn TaskCallbackSrvRepo>,
) {
    debug!(worker = id, "health worker running");
    let mut pause_tick = tokio::time::interval(Duration::from_secs(2));
    loop {
        let srv = {
            let mut rx = ready_rx.lock().await;
            tokio::select! {
                s = rx.recv() => s,
                _ = pause_tick.tick() => {
                    if paused.load(Ordering::SeqCst) {
                        let _ = done_tx.send(()).await;
                        return;
                    }
                    None
                }
            }
        };

        let Some(srv) = srv else { continue };

        debug!(worker = id, srv = %srv.name, "checking server");
        let heartbeat = match callback_exec.heart_beat(&srv).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(srv = %srv.name, error = %e, "heartbeat failed");
                continue;
            }
        };

        if !heartbeat.reply_routes.is_empty() {
            let reachable = CallbackSrv {
                routes: heartbeat.reply_routes,
                ..srv.clone()
            };
            if let Err(e) = srv_repo.set_srv_routes_pass_health_check(&reachable).await {
                error!(srv = %srv.name, error = %e, "failed to mark routes healthy");
            }
        }

        if !heartbeat.no_reply_routes.is_empty() {
            let unreachable = CallbackSrv {
                routes: heartbeat.no_reply_routes,
                ..srv
            };
            if let Err(e) = srv_repo.del_srv_routes(&unreachable).await {
                error!(srv = %unreachable.name, error = %e, "failed to evict dead routes");
            }
        }
    }
}
