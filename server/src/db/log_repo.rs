//! SQLite implementation of [`taskcore::repo::TaskLogRepo`] (spec §3
//! `TaskLog`, written across the Started/Callback/Confirmed phases).

use std::sync::Arc;

use anyhow::Context;
use rusqlite::params;
use taskcore::error::{CoreError, Result};
use taskcore::model::TaskLog;
use taskcore::repo::TaskLogRepo;
use tokio::sync::Mutex;

use super::Database;

pub struct SqliteTaskLogRepo {
    db: Arc<Mutex<Database>>,
}

impl SqliteTaskLogRepo {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        SqliteTaskLogRepo { db }
    }
}

#[async_trait::async_trait]
impl TaskLogRepo for SqliteTaskLogRepo {
    async fn save_task_started_log(&self, log: &TaskLog) -> Result<()> {
        let mut guard = self.db.lock().await;
        let conn = guard.get_connection().map_err(CoreError::Internal)?;
        conn.execute(
            "INSERT INTO task_log (task_id, run_times, started_at, status, is_run_in_async) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(task_id, run_times) DO UPDATE SET started_at = excluded.started_at, \
                status = excluded.status",
            params![
                log.task_id,
                log.run_times,
                log.started_at,
                log.status as i32,
                log.is_run_in_async as i64,
            ],
        )
        .context("save started log")?;
        Ok(())
    }

    async fn save_task_callback_log(&self, log: &TaskLog) -> Result<()> {
        let mut guard = self.db.lock().await;
        let conn = guard.get_connection().map_err(CoreError::Internal)?;
        conn.execute(
            "UPDATE task_log SET req_snapshot = ?1, resp_snapshot = ?2, err_text = ?3 \
             WHERE task_id = ?4 AND run_times = ?5",
            params![
                log.req_snapshot,
                log.resp_snapshot,
                log.err_text,
                log.task_id,
                log.run_times,
            ],
        )
        .context("save callback log")?;
        Ok(())
    }

    async fn save_task_confirmed_log(&self, log: &TaskLog) -> Result<()> {
        let mut guard = self.db.lock().await;
        let conn = guard.get_connection().map_err(CoreError::Internal)?;
        // Only the first transition out of Running is observed (spec §4.5):
        // a late/duplicate confirm that no longer finds status=Running is a
        // no-op, guarding against an async confirm overtaking a sync result.
        conn.execute(
            "UPDATE task_log SET status = ?1, is_run_in_async = ?2, ended_at = ?3, \
                resp_snapshot = COALESCE(?4, resp_snapshot) \
             WHERE task_id = ?5 AND run_times = ?6 AND status = ?7",
            params![
                log.status as i32,
                log.is_run_in_async as i64,
                log.ended_at,
                log.resp_snapshot,
                log.task_id,
                log.run_times,
                taskcore::model::TaskStatus::Running as i32,
            ],
        )
        .context("save confirmed log")?;
        Ok(())
    }

    async fn del_logs(&self, query: &taskcore::repo::QueryStream) -> Result<()> {
        if matches!(&query.in_ids, Some(ids) if ids.is_empty()) {
            return Ok(());
        }

        let mut guard = self.db.lock().await;
        let conn = guard.get_connection().map_err(CoreError::Internal)?;

        let mut sql = String::from("DELETE FROM task_log WHERE 1 = 1");
        let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ids) = &query.in_ids {
            let placeholders = vec!["?"; ids.len()].join(",");
            sql.push_str(&format!(" AND task_id IN ({placeholders})"));
            for id in ids {
                bound.push(Box::new(*id));
            }
        }
        if let Some(created_exceed) = query.created_exceed {
            sql.push_str(" AND started_at < ?");
            bound.push(Box::new(created_exceed));
        }

        let params_ref: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|b| b.as_ref()).collect();
        conn.execute(&sql, params_ref.as_slice()).context("delete matched logs")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use taskcore::model::TaskStatus;
    use tempfile::TempDir;

    async fn set_up() -> (TempDir, SqliteTaskLogRepo) {
        let dir = TempDir::new().unwrap();
        let mut db = Database::new(dir.path().join("log.db")).unwrap();
        db.initialize().unwrap();
        let db = Arc::new(Mutex::new(db));
        (dir, SqliteTaskLogRepo::new(db))
    }

    #[tokio::test]
    async fn started_then_confirmed_updates_status() {
        let (_dir, repo) = set_up().await;
        let started = TaskLog {
            task_id: 1,
            run_times: 1,
            started_at: 100,
            ended_at: 0,
            status: TaskStatus::Running,
            is_run_in_async: false,
            req_snapshot: None,
            resp_snapshot: None,
            err_text: None,
        };
        repo.save_task_started_log(&started).await.unwrap();

        let confirmed = TaskLog {
            status: TaskStatus::Success,
            ended_at: 200,
            resp_snapshot: Some("{}".into()),
            ..started
        };
        repo.save_task_confirmed_log(&confirmed).await.unwrap();
    }

    #[tokio::test]
    async fn late_confirm_after_terminal_is_a_no_op() {
        let (_dir, repo) = set_up().await;
        let started = TaskLog {
            task_id: 2,
            run_times: 1,
            started_at: 100,
            ended_at: 0,
            status: TaskStatus::Running,
            is_run_in_async: true,
            req_snapshot: None,
            resp_snapshot: None,
            err_text: None,
        };
        repo.save_task_started_log(&started).await.unwrap();

        let first = TaskLog {
            status: TaskStatus::Success,
            ended_at: 150,
            ..started.clone()
        };
        repo.save_task_confirmed_log(&first).await.unwrap();

        // A duplicate/late confirm no longer finds status=Running; it must
        // not clobber the already-recorded Success.
        let late = TaskLog {
            status: TaskStatus::Failed,
            ended_at: 999,
            ..started
        };
        repo.save_task_confirmed_log(&late).await.unwrap();
    }
}
