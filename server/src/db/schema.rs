//! DDL for the dispatch service's SQLite-backed storage (spec §6 reference
//! schema, SPEC_FULL.md §4). Creating tables is idempotent and safe to call
//! on every startup, the way the teacher's `ServerDatabase::initialize`
//! does it.

use anyhow::{Context, Result};
use rusqlite::Connection;

pub fn create_all(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS task_callback_srv (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            has_enable_health_check INTEGER NOT NULL DEFAULT 0,
            last_healthy_at INTEGER NOT NULL DEFAULT 0,
            deleted INTEGER NOT NULL DEFAULT 0
        )
        "#,
        [],
    )
    .context("failed to create task_callback_srv table")?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS task_callback_srv_route (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            srv_id INTEGER NOT NULL REFERENCES task_callback_srv(id),
            scheme TEXT NOT NULL,
            host TEXT NOT NULL,
            port INTEGER NOT NULL,
            callback_timeout_sec INTEGER NOT NULL DEFAULT 0,
            health_check_enabled INTEGER NOT NULL DEFAULT 0,
            last_healthy_at INTEGER NOT NULL DEFAULT 0,
            deleted INTEGER NOT NULL DEFAULT 0,
            UNIQUE(srv_id, scheme, host, port)
        )
        "#,
        [],
    )
    .context("failed to create task_callback_srv_route table")?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS task (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            biz_id TEXT NOT NULL DEFAULT '',
            name TEXT NOT NULL,
            callback_srv_id INTEGER NOT NULL REFERENCES task_callback_srv(id),
            callback_path TEXT NOT NULL DEFAULT '',
            arg TEXT NOT NULL DEFAULT '',
            sched_mode INTEGER NOT NULL,
            time_spec_at INTEGER,
            time_interval_sec INTEGER,
            time_cron_expr TEXT,
            plan_sched_next_at INTEGER NOT NULL,
            last_run_at INTEGER NOT NULL DEFAULT 0,
            run_times INTEGER NOT NULL DEFAULT 0,
            allow_max_run_times INTEGER NOT NULL,
            max_run_time_sec INTEGER NOT NULL DEFAULT 0,
            last_success_at INTEGER NOT NULL DEFAULT 0,
            last_failed_at INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL DEFAULT 0,
            deleted INTEGER NOT NULL DEFAULT 0,
            UNIQUE(name, biz_id)
        )
        "#,
        [],
    )
    .context("failed to create task table")?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS task_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id INTEGER NOT NULL,
            run_times INTEGER NOT NULL,
            started_at INTEGER NOT NULL DEFAULT 0,
            ended_at INTEGER NOT NULL DEFAULT 0,
            status INTEGER NOT NULL,
            is_run_in_async INTEGER NOT NULL DEFAULT 0,
            req_snapshot TEXT,
            resp_snapshot TEXT,
            err_text TEXT,
            UNIQUE(task_id, run_times)
        )
        "#,
        [],
    )
    .context("failed to create task_log table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_task_sweep ON task(plan_sched_next_at, id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_task_route_srv ON task_callback_srv_route(srv_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_srv_health_check ON task_callback_srv(has_enable_health_check)",
        [],
    )?;

    Ok(())
}
