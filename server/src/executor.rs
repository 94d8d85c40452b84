//! HTTP callback executor (spec §4.2): invokes a callback server's route
//! with a JSON POST and parses its JSON response, and fans heartbeats out
//! to every route of a server. Grounded on the teacher's
//! `agent::send_metrics_to_server` POST-and-parse pattern, with the
//! request-scoped trace headers from `taskcore::trace` attached to every
//! outbound hop (spec §6).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use taskcore::error::{CoreError, Result};
use taskcore::model::{CallbackExecutor, CallbackSrv, HeartBeatResp, Route, Task, TaskCallbackSrvResp};
use taskcore::trace::{TraceContext, HEADER_PARENT_SPAN_ID, HEADER_SPAN_ID, HEADER_TRACE_ID};
use tracing::{debug, warn};

const CMD_TASK_CALLBACK: &str = "TaskCallback";
const CMD_TASK_SRV_HEART_BEAT: &str = "TaskSrvHeartBeat";

#[derive(Debug, Serialize)]
struct TaskCallbackReq<'a> {
    cmd: &'a str,
    task_id: i64,
    task_name: &'a str,
    arg: &'a str,
    run_times: i64,
    biz_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct TaskCallbackRawResp {
    #[serde(default)]
    is_run_in_async: bool,
    #[serde(default)]
    is_success: bool,
    #[serde(default)]
    extra: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct HeartBeatReq<'a> {
    cmd: &'a str,
}

#[derive(Debug, Deserialize)]
struct HeartBeatRawResp {
    #[serde(default)]
    pong: bool,
}

/// Effective per-invocation timeout: the smaller of the route's and the
/// task's configured timeouts, falling back to whichever one is positive
/// (spec §4.2).
fn effective_timeout_secs(route_timeout: i64, task_timeout: i64) -> i64 {
    match (route_timeout > 0, task_timeout > 0) {
        (true, true) => route_timeout.min(task_timeout),
        (true, false) => route_timeout,
        (false, true) => task_timeout,
        (false, false) => 30,
    }
}

pub struct HttpCallbackExecutor {
    client: reqwest::Client,
}

impl HttpCallbackExecutor {
    pub fn new() -> Self {
        HttpCallbackExecutor {
            client: reqwest::Client::new(),
        }
    }

    fn apply_trace_headers(req: reqwest::RequestBuilder, ctx: &TraceContext) -> reqwest::RequestBuilder {
        req.header(HEADER_TRACE_ID, ctx.trace_id())
            .header(HEADER_SPAN_ID, ctx.span_id())
            .header(HEADER_PARENT_SPAN_ID, ctx.parent_span_id())
    }
}

impl Default for HttpCallbackExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CallbackExecutor for HttpCallbackExecutor {
    async fn callback_srv(&self, task: &Task) -> Result<TaskCallbackSrvResp> {
        let route = task
            .callback_srv
            .random_route()
            .ok_or(CoreError::NoRoutes)?;

        let url = route.base_url(&task.callback_path);
        let timeout_secs = effective_timeout_secs(route.callback_timeout_sec, task.max_run_time_sec);
        let ctx = TraceContext::new_root();

        let body = TaskCallbackReq {
            cmd: CMD_TASK_CALLBACK,
            task_id: task.id,
            task_name: &task.name,
            arg: &task.arg,
            run_times: task.run_times,
            biz_id: &task.biz_id,
        };

        debug!(url = %url, task_id = task.id, "invoking callback route");

        let req = Self::apply_trace_headers(self.client.post(&url), &ctx)
            .timeout(Duration::from_secs(timeout_secs.max(1) as u64))
            .json(&body);

        let resp = req.send().await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                warn!(url = %url, error = %e, "callback transport failure");
                return Err(CoreError::Internal(anyhow::anyhow!(
                    "callback transport error: {e}"
                )));
            }
        };

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(CoreError::Internal(anyhow::anyhow!(
                "callback route returned HTTP {status}"
            )));
        }

        let parsed: TaskCallbackRawResp = resp
            .json()
            .await
            .map_err(|e| CoreError::Internal(anyhow::anyhow!("callback response parse error: {e}")))?;

        Ok(TaskCallbackSrvResp {
            is_run_in_async: parsed.is_run_in_async,
            is_success: parsed.is_success,
            extra: parsed.extra,
        })
    }

    async fn heart_beat(&self, srv: &CallbackSrv) -> Result<HeartBeatResp> {
        let mut reply_routes: Vec<Route> = Vec::new();
        let mut no_reply_routes: Vec<Route> = Vec::new();

        let checks = srv.routes.iter().map(|route| {
            let client = self.client.clone();
            let route = route.clone();
            async move {
                let url = route.base_url("");
                let timeout_secs = if route.callback_timeout_sec > 0 {
                    route.callback_timeout_sec
                } else {
                    5
                };
                let ctx = TraceContext::new_root();
                let body = HeartBeatReq {
                    cmd: CMD_TASK_SRV_HEART_BEAT,
                };
                let result = Self::apply_trace_headers(client.post(&url), &ctx)
                    .timeout(Duration::from_secs(timeout_secs.max(1) as u64))
                    .json(&body)
                    .send()
                    .await;

                let pong = match result {
                    Ok(resp) if resp.status().is_success() => resp
                        .json::<HeartBeatRawResp>()
                        .await
                        .map(|r| r.pong)
                        .unwrap_or(false),
                    _ => false,
                };
                (route, pong)
            }
        });

        for (route, pong) in futures_util::future::join_all(checks).await {
            if pong {
                reply_routes.push(route);
            } else {
                no_reply_routes.push(route);
            }
        }

        Ok(HeartBeatResp {
            reply_routes,
            no_reply_routes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_timeout_prefers_smaller_positive() {
        assert_eq!(effective_timeout_secs(10, 20), 10);
        assert_eq!(effective_timeout_secs(0, 20), 20);
        assert_eq!(effective_timeout_secs(10, 0), 10);
        assert_eq!(effective_timeout_secs(0, 0), 30);
    }
}
