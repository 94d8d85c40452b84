//! Scheduler (spec §4.4): a single logical sweep loop that pages due tasks
//! in strictly-ascending-id order and hands each one off to an idle
//! worker, leader-gated so only one node in a cluster schedules at a time.
//!
//! The worker hand-off is a readiness-registration rendezvous: each idle
//! worker registers a one-shot slot on `ready_rx`, and the scheduler
//! receives one slot per due task and completes it. This is the direct
//! analogue of the original's `taskWorkerCh chan chan *Task` — `tokio::
//! sync::mpsc::Receiver` isn't `Clone`, so a literal unbuffered multi-
//! consumer channel of tasks isn't expressible directly, but a channel of
//! one-shot slots gives the same "push blocks until an idle worker takes
//! it" behavior (SPEC_FULL.md §5, decision 1).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use taskcore::model::Task;
use taskcore::repo::TaskRepo;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

use crate::election::Elector;

/// A slot an idle worker has registered; the scheduler fulfills it with
/// exactly one task.
pub type WorkerSlot = oneshot::Sender<Task>;

pub struct Scheduler {
    task_repo: Arc<dyn TaskRepo>,
    elector: Arc<dyn Elector>,
    sweep_page_size: i64,

    ready_tx: mpsc::Sender<WorkerSlot>,
    ready_rx: Mutex<mpsc::Receiver<WorkerSlot>>,

    paused: Arc<AtomicBool>,
    exit_tx: mpsc::Sender<()>,
    exit_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl Scheduler {
    pub fn new(task_repo: Arc<dyn TaskRepo>, elector: Arc<dyn Elector>, sweep_page_size: i64, worker_pool_size: usize) -> Self {
        let (ready_tx, ready_rx) = mpsc::channel(worker_pool_size.max(1));
        let (exit_tx, exit_rx) = mpsc::channel(1);
        Scheduler {
            task_repo,
            elector,
            sweep_page_size: if sweep_page_size > 0 {
                sweep_page_size
            } else {
                taskcore::defaults::default_sweep_page_size()
            },
            ready_tx,
            ready_rx: Mutex::new(ready_rx),
            paused: Arc::new(AtomicBool::new(false)),
            exit_tx,
            exit_rx: Mutex::new(Some(exit_rx)),
        }
    }

    /// The channel workers register readiness on: a worker builds its own
    /// `oneshot::channel()`, sends the sender half here, then awaits the
    /// receiver half for its next task.
    pub fn worker_slot_sender(&self) -> mpsc::Sender<WorkerSlot> {
        self.ready_tx.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub async fn stop(&self) {
        self.paused.store(true, Ordering::SeqCst);
        let _ = self.exit_tx.send(()).await;
    }

    pub async fn run(&self) {
        let mut exit_rx = self
            .exit_rx
            .lock()
            .await
            .take()
            .expect("run() must only be called once");

        let mut cursor: i64 = 0;
        loop {
            if exit_rx.try_recv().is_ok() {
                break;
            }

            if !self.elector.is_master() {
                debug!("not leader, deferring sweep");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }

            let now = taskcore::utils::current_timestamp();
            let page = match self.task_repo.timeout_tasks(self.sweep_page_size, cursor, now).await {
                Ok(p) => p,
                Err(e) => {
                    error!(error = %e, "sweep query failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            if page.tasks.is_empty() {
                cursor = 0;
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }

            let page_len = page.tasks.len() as i64;
            cursor = page.next_cursor.unwrap_or(0);

            let mut ready_rx = self.ready_rx.lock().await;
            for task in page.tasks {
                let Some(slot) = ready_rx.recv().await else {
                    warn!("no worker slots available, dropping remainder of sweep page");
                    break;
                };
                if slot.send(task).is_err() {
                    warn!("worker slot closed before task could be delivered");
                }
            }
            drop(ready_rx);

            // A short page is itself the end-of-sweep signal (spec §9):
            // reset the cursor whether or not the page was empty.
            if page_len < self.sweep_page_size {
                cursor = 0;
            }
        }
    }
}
