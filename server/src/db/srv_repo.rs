//! SQLite implementation of [`taskcore::repo::TaskCallbackSrvRepo`] (spec
//! §4.3 `Register`/`Unregister`, §4.6).

use std::sync::Arc;

use anyhow::Context;
use rusqlite::{params, OptionalExtension};
use taskcore::error::{CoreError, Result};
use taskcore::model::{CallbackSrv, Route};
use taskcore::repo::{QueryStream, TaskCallbackSrvRepo};
use tokio::sync::Mutex;

use super::Database;

pub struct SqliteTaskCallbackSrvRepo {
    db: Arc<Mutex<Database>>,
}

impl SqliteTaskCallbackSrvRepo {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        SqliteTaskCallbackSrvRepo { db }
    }
}

fn row_to_route(row: &rusqlite::Row) -> rusqlite::Result<Route> {
    Ok(Route {
        id: row.get("id")?,
        scheme: row.get("scheme")?,
        host: row.get("host")?,
        port: row.get::<_, i64>("port")? as u16,
        callback_timeout_sec: row.get("callback_timeout_sec")?,
        health_check_enabled: row.get::<_, i64>("health_check_enabled")? != 0,
        last_healthy_at: row.get("last_healthy_at")?,
    })
}

#[async_trait::async_trait]
impl TaskCallbackSrvRepo for SqliteTaskCallbackSrvRepo {
    async fn add_srv_routes(&self, srv: &CallbackSrv) -> Result<()> {
        let mut guard = self.db.lock().await;
        let conn = guard.get_connection().map_err(CoreError::Internal)?;
        let tx = conn.transaction().context("begin add_srv_routes tx")?;

        let srv_id: i64 = {
            let updated = tx
                .execute(
                    "UPDATE task_callback_srv SET deleted = 0 WHERE name = ?1",
                    params![srv.name],
                )
                .context("undelete srv row")?;
            if updated == 0 {
                tx.execute(
                    "INSERT INTO task_callback_srv (name, has_enable_health_check, last_healthy_at) \
                     VALUES (?1, 0, 0)",
                    params![srv.name],
                )
                .context("insert srv row")?;
            }
            tx.query_row(
                "SELECT id FROM task_callback_srv WHERE name = ?1",
                params![srv.name],
                |row| row.get(0),
            )
            .context("read back srv id")?
        };

        let mut any_health_check_route = false;
        for route in &srv.routes {
            if route.health_check_enabled {
                any_health_check_route = true;
            }

            let updated = tx
                .execute(
                    "UPDATE task_callback_srv_route \
                     SET callback_timeout_sec = ?1, health_check_enabled = ?2, deleted = 0 \
                     WHERE srv_id = ?3 AND scheme = ?4 AND host = ?5 AND port = ?6",
                    params![
                        route.callback_timeout_sec,
                        route.health_check_enabled as i64,
                        srv_id,
                        route.scheme,
                        route.host,
                        route.port as i64,
                    ],
                )
                .context("upsert route: update")?;
            if updated == 0 {
                tx.execute(
                    "INSERT INTO task_callback_srv_route \
                     (srv_id, scheme, host, port, callback_timeout_sec, health_check_enabled, last_healthy_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
                    params![
                        srv_id,
                        route.scheme,
                        route.host,
                        route.port as i64,
                        route.callback_timeout_sec,
                        route.health_check_enabled as i64,
                    ],
                )
                .context("upsert route: insert")?;
            }
        }

        if any_health_check_route {
            tx.execute(
                "UPDATE task_callback_srv SET has_enable_health_check = 1 \
                 WHERE id = ?1 AND has_enable_health_check = 0",
                params![srv_id],
            )
            .context("flip has_enable_health_check")?;
        }

        tx.commit().context("commit add_srv_routes tx")?;
        Ok(())
    }

    async fn del_srv_routes(&self, srv: &CallbackSrv) -> Result<()> {
        let mut guard = self.db.lock().await;
        let conn = guard.get_connection().map_err(CoreError::Internal)?;
        let tx = conn.transaction().context("begin del_srv_routes tx")?;

        let srv_id: Option<i64> = tx
            .query_row(
                "SELECT id FROM task_callback_srv WHERE name = ?1 AND deleted = 0",
                params![srv.name],
                |row| row.get(0),
            )
            .optional()
            .context("look up srv id")?;

        let Some(srv_id) = srv_id else {
            return Ok(());
        };

        for route in &srv.routes {
            tx.execute(
                "DELETE FROM task_callback_srv_route \
                 WHERE srv_id = ?1 AND scheme = ?2 AND host = ?3 AND port = ?4",
                params![srv_id, route.scheme, route.host, route.port as i64],
            )
            .context("delete route")?;
        }

        let remaining: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM task_callback_srv_route WHERE srv_id = ?1 AND deleted = 0",
                params![srv_id],
                |row| row.get(0),
            )
            .context("count remaining routes")?;

        if remaining == 0 {
            tx.execute(
                "UPDATE task_callback_srv SET deleted = 1 WHERE id = ?1",
                params![srv_id],
            )
            .context("soft-delete empty srv")?;
        } else {
            let any_health_check: i64 = tx
                .query_row(
                    "SELECT COUNT(*) FROM task_callback_srv_route \
                     WHERE srv_id = ?1 AND deleted = 0 AND health_check_enabled = 1",
                    params![srv_id],
                    |row| row.get(0),
                )
                .context("count health-check routes")?;
            if any_health_check == 0 {
                tx.execute(
                    "UPDATE task_callback_srv SET has_enable_health_check = 0 WHERE id = ?1",
                    params![srv_id],
                )
                .context("clear has_enable_health_check")?;
            }
        }

        tx.commit().context("commit del_srv_routes tx")?;
        Ok(())
    }

    async fn set_srv_routes_pass_health_check(&self, srv: &CallbackSrv) -> Result<()> {
        let mut guard = self.db.lock().await;
        let conn = guard.get_connection().map_err(CoreError::Internal)?;
        let now = taskcore::utils::current_timestamp();
        for route in &srv.routes {
            conn.execute(
                "UPDATE task_callback_srv_route SET last_healthy_at = ?1 WHERE id = ?2",
                params![now, route.id],
            )
            .context("mark route healthy")?;
        }
        conn.execute(
            "UPDATE task_callback_srv SET last_healthy_at = ?1 WHERE id = ?2",
            params![now, srv.id],
        )
        .context("mark srv healthy")?;
        Ok(())
    }

    async fn get_srvs_by_ids(&self, ids: &[i64]) -> Result<Vec<CallbackSrv>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let query = QueryStream::new(ids.len() as i64, 0).with_in_ids(ids.to_vec());
        self.get_srvs(&query).await
    }

    async fn get_srvs(&self, query: &QueryStream) -> Result<Vec<CallbackSrv>> {
        let mut guard = self.db.lock().await;
        let conn = guard.get_connection().map_err(CoreError::Internal)?;

        let mut sql = String::from(
            "SELECT id, name, has_enable_health_check, last_healthy_at \
             FROM task_callback_srv WHERE deleted = 0",
        );
        let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(name) = &query.eq_name {
            sql.push_str(" AND name = ?");
            bound.push(Box::new(name.clone()));
        }
        if query.enabled_health_check {
            sql.push_str(" AND has_enable_health_check = 1");
        }
        if let Some(checked_lt) = query.checked_health_lt {
            sql.push_str(" AND last_healthy_at < ?");
            bound.push(Box::new(checked_lt));
        }
        if let Some(ids) = &query.in_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders = vec!["?"; ids.len()].join(",");
            sql.push_str(&format!(" AND id IN ({placeholders})"));
            for id in ids {
                bound.push(Box::new(*id));
            }
        }
        sql.push_str(" ORDER BY id ASC LIMIT ? OFFSET ?");
        bound.push(Box::new(query.limit));
        bound.push(Box::new(query.offset));

        let mut srvs = Vec::new();
        {
            let mut stmt = conn.prepare(&sql).context("prepare get_srvs query")?;
            let params_ref: Vec<&dyn rusqlite::ToSql> = bound.iter().map(|b| b.as_ref()).collect();
            let rows = stmt
                .query_map(params_ref.as_slice(), |row| {
                    Ok(CallbackSrv {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        has_enable_health_check: row.get::<_, i64>(2)? != 0,
                        last_healthy_at: row.get(3)?,
                        routes: Vec::new(),
                    })
                })
                .context("run get_srvs query")?;
            for row in rows {
                srvs.push(row.context("read srv row")?);
            }
        }

        for srv in &mut srvs {
            let mut stmt = conn
                .prepare(
                    "SELECT id, scheme, host, port, callback_timeout_sec, health_check_enabled, last_healthy_at \
                     FROM task_callback_srv_route WHERE srv_id = ?1 AND deleted = 0",
                )
                .context("prepare routes query")?;
            let rows = stmt
                .query_map(params![srv.id], row_to_route)
                .context("run routes query")?;
            for row in rows {
                srv.routes.push(row.context("read route row")?);
            }
        }

        Ok(srvs)
    }
}
