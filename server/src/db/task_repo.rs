//! SQLite implementation of [`taskcore::repo::TaskRepo`] (spec §4.4 sweep,
//! §4.5 lock/confirm, §4.6).

use std::sync::Arc;

use anyhow::Context;
use rusqlite::{params, OptionalExtension};
use taskcore::error::{CoreError, Result};
use taskcore::model::{SchedMode, Task, TaskResp, TaskStatus};
use taskcore::repo::{TaskCallbackSrvRepo, TaskPage, TaskRepo};
use tokio::sync::Mutex;

use super::Database;

pub struct SqliteTaskRepo {
    db: Arc<Mutex<Database>>,
    srv_repo: Arc<dyn TaskCallbackSrvRepo>,
}

impl SqliteTaskRepo {
    pub fn new(db: Arc<Mutex<Database>>, srv_repo: Arc<dyn TaskCallbackSrvRepo>) -> Self {
        SqliteTaskRepo { db, srv_repo }
    }
}

fn sched_mode_to_i32(mode: SchedMode) -> i32 {
    mode as i32
}

fn row_to_task_fields(row: &rusqlite::Row) -> rusqlite::Result<(i64, i64, Task)> {
    let sched_mode_raw: i32 = row.get("sched_mode")?;
    let sched_mode = SchedMode::from_wire(sched_mode_raw).unwrap_or(SchedMode::TimeSpec);
    let srv_id: i64 = row.get("callback_srv_id")?;
    let id: i64 = row.get("id")?;
    let task = Task {
        id,
        biz_id: row.get("biz_id")?,
        name: row.get("name")?,
        // Placeholder; the caller fills in the resolved server.
        callback_srv: taskcore::model::CallbackSrv {
            id: srv_id,
            name: String::new(),
            has_enable_health_check: false,
            last_healthy_at: 0,
            routes: Vec::new(),
        },
        callback_path: row.get("callback_path")?,
        arg: row.get("arg")?,
        sched_mode,
        time_spec_at: row.get("time_spec_at")?,
        time_interval_sec: row.get("time_interval_sec")?,
        time_cron_expr: row.get("time_cron_expr")?,
        plan_sched_next_at: row.get("plan_sched_next_at")?,
        last_run_at: row.get("last_run_at")?,
        run_times: row.get("run_times")?,
        allow_max_run_times: row.get("allow_max_run_times")?,
        max_run_time_sec: row.get("max_run_time_sec")?,
        last_success_at: row.get("last_success_at")?,
        last_failed_at: row.get("last_failed_at")?,
    };
    Ok((id, srv_id, task))
}

#[async_trait::async_trait]
impl TaskRepo for SqliteTaskRepo {
    async fn add_task(&self, task: &Task) -> Result<i64> {
        let mut guard = self.db.lock().await;
        let conn = guard.get_connection().map_err(CoreError::Internal)?;

        let updated = conn
            .execute(
                "UPDATE task SET \
                    callback_srv_id = ?1, callback_path = ?2, arg = ?3, sched_mode = ?4, \
                    time_spec_at = ?5, time_interval_sec = ?6, time_cron_expr = ?7, \
                    plan_sched_next_at = ?8, allow_max_run_times = ?9, max_run_time_sec = ?10, \
                    deleted = 0 \
                 WHERE name = ?11 AND biz_id = ?12",
                params![
                    task.callback_srv.id,
                    task.callback_path,
                    task.arg,
                    sched_mode_to_i32(task.sched_mode),
                    task.time_spec_at,
                    task.time_interval_sec,
                    task.time_cron_expr,
                    task.plan_sched_next_at,
                    task.allow_max_run_times,
                    task.max_run_time_sec,
                    task.name,
                    task.biz_id,
                ],
            )
            .context("update existing task on resubmit")?;

        if updated > 0 {
            let id: i64 = conn
                .query_row(
                    "SELECT id FROM task WHERE name = ?1 AND biz_id = ?2",
                    params![task.name, task.biz_id],
                    |row| row.get(0),
                )
                .context("read back updated task id")?;
            return Ok(id);
        }

        conn.execute(
            "INSERT INTO task \
                (biz_id, name, callback_srv_id, callback_path, arg, sched_mode, \
                 time_spec_at, time_interval_sec, time_cron_expr, plan_sched_next_at, \
                 allow_max_run_times, max_run_time_sec, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                task.biz_id,
                task.name,
                task.callback_srv.id,
                task.callback_path,
                task.arg,
                sched_mode_to_i32(task.sched_mode),
                task.time_spec_at,
                task.time_interval_sec,
                task.time_cron_expr,
                task.plan_sched_next_at,
                task.allow_max_run_times,
                task.max_run_time_sec,
                taskcore::utils::current_timestamp(),
            ],
        )
        .context("insert new task")?;

        Ok(conn.last_insert_rowid())
    }

    async fn del_task_by_id(&self, id: i64) -> Result<()> {
        let mut guard = self.db.lock().await;
        let conn = guard.get_connection().map_err(CoreError::Internal)?;
        conn.execute("UPDATE task SET deleted = 1 WHERE id = ?1", params![id])
            .context("soft-delete task")?;
        Ok(())
    }

    async fn get_task_by_id(&self, id: i64) -> Result<Option<Task>> {
        let raw = {
            let mut guard = self.db.lock().await;
            let conn = guard.get_connection().map_err(CoreError::Internal)?;
            conn.query_row(
                "SELECT id, biz_id, name, callback_srv_id, callback_path, arg, sched_mode, \
                        time_spec_at, time_interval_sec, time_cron_expr, plan_sched_next_at, \
                        last_run_at, run_times, allow_max_run_times, max_run_time_sec, \
                        last_success_at, last_failed_at \
                 FROM task WHERE id = ?1 AND deleted = 0",
                params![id],
                row_to_task_fields,
            )
            .optional()
            .context("query task by id")?
        };

        let Some((_, srv_id, mut task)) = raw else {
            return Ok(None);
        };
        if let Some(srv) = self.srv_repo.get_srvs_by_ids(&[srv_id]).await?.into_iter().next() {
            task.callback_srv = srv;
        }
        Ok(Some(task))
    }

    async fn timeout_tasks(&self, size: i64, cursor: i64, now: i64) -> Result<TaskPage> {
        let raw_rows: Vec<(i64, i64, Task)> = {
            let mut guard = self.db.lock().await;
            let conn = guard.get_connection().map_err(CoreError::Internal)?;
            let mut stmt = conn
                .prepare(
                    "SELECT id, biz_id, name, callback_srv_id, callback_path, arg, sched_mode, \
                            time_spec_at, time_interval_sec, time_cron_expr, plan_sched_next_at, \
                            last_run_at, run_times, allow_max_run_times, max_run_time_sec, \
                            last_success_at, last_failed_at \
                     FROM task \
                     WHERE deleted = 0 AND run_times < allow_max_run_times \
                           AND plan_sched_next_at <= ?1 AND id > ?2 \
                     ORDER BY id ASC LIMIT ?3",
                )
                .context("prepare timeout_tasks query")?;
            let rows = stmt
                .query_map(params![now, cursor, size], row_to_task_fields)
                .context("run timeout_tasks query")?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.context("read timeout_tasks row")?);
            }
            out
        };

        if raw_rows.is_empty() {
            return Ok(TaskPage {
                tasks: Vec::new(),
                next_cursor: None,
            });
        }

        let srv_ids: Vec<i64> = {
            let mut ids: Vec<i64> = raw_rows.iter().map(|(_, srv_id, _)| *srv_id).collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        };
        let srvs = self.srv_repo.get_srvs_by_ids(&srv_ids).await?;

        let mut tasks = Vec::with_capacity(raw_rows.len());
        let mut last_id = cursor;
        for (id, srv_id, mut task) in raw_rows {
            if let Some(srv) = srvs.iter().find(|s| s.id == srv_id) {
                task.callback_srv = srv.clone();
            }
            last_id = id;
            tasks.push(task);
        }

        Ok(TaskPage {
            tasks,
            next_cursor: Some(last_id),
        })
    }

    async fn lock_task(&self, task: &Task, next_plan_sched_next_at: i64) -> Result<bool> {
        let mut guard = self.db.lock().await;
        let conn = guard.get_connection().map_err(CoreError::Internal)?;
        let now = taskcore::utils::current_timestamp();
        let rows = conn
            .execute(
                "UPDATE task SET last_run_at = ?1, run_times = run_times + 1, \
                    plan_sched_next_at = ?2 \
                 WHERE id = ?3 AND last_run_at = ?4 AND run_times = ?5",
                params![
                    now,
                    next_plan_sched_next_at,
                    task.id,
                    task.last_run_at,
                    task.run_times,
                ],
            )
            .context("optimistic lock_task CAS")?;
        Ok(rows == 1)
    }

    async fn confirm_task(&self, resp: &TaskResp) -> Result<()> {
        let mut guard = self.db.lock().await;
        let conn = guard.get_connection().map_err(CoreError::Internal)?;
        let now = taskcore::utils::current_timestamp();

        match resp.status {
            TaskStatus::Success => {
                conn.execute(
                    "UPDATE task SET last_success_at = ?1 \
                     WHERE id = ?2 AND run_times = ?3",
                    params![now, resp.task_id, resp.run_times],
                )
                .context("confirm success")?;
            }
            TaskStatus::Failed => {
                conn.execute(
                    "UPDATE task SET last_failed_at = ?1 \
                     WHERE id = ?2 AND run_times = ?3",
                    params![now, resp.task_id, resp.run_times],
                )
                .context("confirm failed")?;
            }
            TaskStatus::Running | TaskStatus::Ready => {
                // Async-accept leaves the task row untouched; only the log
                // row (handled by TaskLogRepo) tracks the Running state.
            }
        }
        Ok(())
    }

    async fn del_tasks(&self, query: &taskcore::repo::QueryStream) -> Result<()> {
        if matches!(&query.in_ids, Some(ids) if ids.is_empty()) {
            return Ok(());
        }

        let mut guard = self.db.lock().await;
        let conn = guard.get_connection().map_err(CoreError::Internal)?;

        let mut sql = String::from("SELECT id FROM task WHERE deleted = 0");
        let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(name) = &query.eq_name {
            sql.push_str(" AND name = ?");
            bound.push(Box::new(name.clone()));
        }
        if let Some(ids) = &query.in_ids {
            let placeholders = vec!["?"; ids.len()].join(",");
            sql.push_str(&format!(" AND id IN ({placeholders})"));
            for id in ids {
                bound.push(Box::new(*id));
            }
        }
        if let Some(created_exceed) = query.created_exceed {
            sql.push_str(" AND created_at < ?");
            bound.push(Box::new(created_exceed));
        }
        if query.task_finished {
            sql.push_str(" AND run_times >= allow_max_run_times");
        }
        sql.push_str(" ORDER BY id ASC");
        if query.limit > 0 {
            sql.push_str(" LIMIT ? OFFSET ?");
            bound.push(Box::new(query.limit));
            bound.push(Box::new(query.offset));
        }

        let matched: Vec<i64> = {
            let mut stmt = conn.prepare(&sql).context("prepare del_tasks selection")?;
            let params_ref: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|b| b.as_ref()).collect();
            let rows = stmt
                .query_map(params_ref.as_slice(), |row| row.get::<_, i64>(0))
                .context("run del_tasks selection")?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row.context("read del_tasks candidate id")?);
            }
            out
        };

        if matched.is_empty() {
            return Ok(());
        }

        let placeholders = vec!["?"; matched.len()].join(",");
        let delete_sql = format!("UPDATE task SET deleted = 1 WHERE id IN ({placeholders})");
        let id_params: Vec<&dyn rusqlite::ToSql> = matched.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
        conn.execute(&delete_sql, id_params.as_slice())
            .context("soft-delete matched tasks")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, SqliteTaskCallbackSrvRepo};
    use taskcore::model::{CallbackSrv, SchedMode};
    use taskcore::repo::QueryStream;
    use tempfile::TempDir;

    async fn set_up() -> (TempDir, SqliteTaskRepo) {
        let dir = TempDir::new().unwrap();
        let mut db = Database::new(dir.path().join("task.db")).unwrap();
        db.initialize().unwrap();
        let db = Arc::new(Mutex::new(db));
        let srv_repo: Arc<dyn TaskCallbackSrvRepo> =
            Arc::new(SqliteTaskCallbackSrvRepo::new(db.clone()));
        srv_repo
            .add_srv_routes(&CallbackSrv {
                id: 0,
                name: "svc".into(),
                has_enable_health_check: false,
                last_healthy_at: 0,
                routes: Vec::new(),
            })
            .await
            .unwrap();
        (dir, SqliteTaskRepo::new(db, srv_repo))
    }

    fn sample_task(name: &str) -> Task {
        Task {
            id: 0,
            biz_id: "".into(),
            name: name.into(),
            callback_srv: CallbackSrv {
                id: 1,
                name: "svc".into(),
                has_enable_health_check: false,
                last_healthy_at: 0,
                routes: Vec::new(),
            },
            callback_path: "/cb".into(),
            arg: "{}".into(),
            sched_mode: SchedMode::TimeInterval,
            time_spec_at: None,
            time_interval_sec: Some(60),
            time_cron_expr: None,
            plan_sched_next_at: 1_700_000_000,
            last_run_at: 0,
            run_times: 0,
            allow_max_run_times: i64::MAX,
            max_run_time_sec: 0,
            last_success_at: 0,
            last_failed_at: 0,
        }
    }

    #[tokio::test]
    async fn del_tasks_by_name_soft_deletes_only_the_match() {
        let (_dir, repo) = set_up().await;
        let keep_id = repo.add_task(&sample_task("keep-me")).await.unwrap();
        let drop_id = repo.add_task(&sample_task("drop-me")).await.unwrap();

        let query = QueryStream::new(0, 0).with_eq_name("drop-me");
        repo.del_tasks(&query).await.unwrap();

        assert!(repo.get_task_by_id(drop_id).await.unwrap().is_none());
        assert!(repo.get_task_by_id(keep_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn del_tasks_with_empty_in_ids_is_a_no_op() {
        let (_dir, repo) = set_up().await;
        let id = repo.add_task(&sample_task("untouched")).await.unwrap();

        let query = QueryStream::new(0, 0).with_in_ids(Vec::new());
        repo.del_tasks(&query).await.unwrap();

        assert!(repo.get_task_by_id(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn del_tasks_by_created_exceed_soft_deletes_old_rows() {
        let (_dir, repo) = set_up().await;
        let old_id = repo.add_task(&sample_task("old")).await.unwrap();
        let new_id = repo.add_task(&sample_task("new")).await.unwrap();

        {
            let mut guard = repo.db.lock().await;
            let conn = guard.get_connection().unwrap();
            conn.execute(
                "UPDATE task SET created_at = 100 WHERE id = ?1",
                params![old_id],
            )
            .unwrap();
            conn.execute(
                "UPDATE task SET created_at = 2000000000 WHERE id = ?1",
                params![new_id],
            )
            .unwrap();
        }

        let query = QueryStream {
            created_exceed: Some(1_000_000_000),
            ..QueryStream::new(0, 0)
        };
        repo.del_tasks(&query).await.unwrap();

        assert!(repo.get_task_by_id(old_id).await.unwrap().is_none());
        assert!(repo.get_task_by_id(new_id).await.unwrap().is_some());
    }
}
