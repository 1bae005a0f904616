//! Async REST client SDK for taskwire, mirroring
//! `asynx_client.taskqueue.TaskQueueClient`: `list_tasks`/`add_task`/
//! `get_task`/`delete_task` against the facade described in SPEC_FULL.md §6.

pub mod error;
mod wire;

use std::time::Duration;

use serde_json::Value;
use taskwire_core::codec::encode_new_task;
use taskwire_core::{NewTask, Task};
use url::Url;

pub use error::{ApiError, ClientError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// One page of `list_tasks`: the live tasks in `[offset, offset+len)` plus
/// the taskqueue's total live-task count.
#[derive(Debug, Clone)]
pub struct TaskPage {
    pub items: Vec<Task>,
    pub total: i64,
}

/// REST client bound to one `(base_url, app)` pair; `queue` is supplied per
/// call, matching the original's per-method `taskqueue='default'` parameter.
#[derive(Debug, Clone)]
pub struct TaskQueueClient {
    base_url: Url,
    app: String,
    http: reqwest::Client,
}

impl TaskQueueClient {
    pub fn new(base_url: &str, app: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_timeout(base_url, app, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &str,
        app: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url)?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(TaskQueueClient {
            base_url,
            app: app.into(),
            http,
        })
    }

    fn tasks_url(&self, queue: &str, suffix: &str) -> Result<Url, ClientError> {
        let path = format!("/apps/{}/taskqueues/{}/tasks{}", self.app, queue, suffix);
        Ok(self.base_url.join(&path)?)
    }

    /// `GET .../tasks?offset&limit`.
    pub async fn list_tasks(
        &self,
        queue: &str,
        offset: i64,
        limit: i64,
    ) -> Result<TaskPage, ClientError> {
        let url = self.tasks_url(queue, "")?;
        let resp = self
            .http
            .get(url)
            .query(&[("offset", offset), ("limit", limit)])
            .send()
            .await?;
        let body = Self::handle_response(resp).await?;
        let items = body
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| ClientError::Decode("missing items array".to_string()))?
            .iter()
            .map(wire::decode_task)
            .collect::<Result<Vec<_>, _>>()?;
        let total = body.get("total").and_then(Value::as_i64).unwrap_or(0);
        Ok(TaskPage { items, total })
    }

    /// `POST .../tasks`.
    pub async fn add_task(&self, queue: &str, descriptor: NewTask) -> Result<Task, ClientError> {
        let url = self.tasks_url(queue, "")?;
        let body = encode_new_task(&descriptor);
        let resp = self.http.post(url).json(&body).send().await?;
        let body = Self::handle_response(resp).await?;
        wire::decode_task(&body)
    }

    /// `GET .../tasks/id:{id}`.
    pub async fn get_task(&self, queue: &str, id: i64) -> Result<Task, ClientError> {
        self.get_by_identifier(queue, &format!("id:{id}")).await
    }

    /// `GET .../tasks/cname:{cname}`.
    pub async fn get_task_by_cname(&self, queue: &str, cname: &str) -> Result<Task, ClientError> {
        self.get_by_identifier(queue, &format!("cname:{cname}")).await
    }

    /// `GET .../tasks/uuid:{uuid}`.
    pub async fn get_task_by_uuid(&self, queue: &str, uuid: &str) -> Result<Task, ClientError> {
        self.get_by_identifier(queue, &format!("uuid:{uuid}")).await
    }

    async fn get_by_identifier(&self, queue: &str, ident: &str) -> Result<Task, ClientError> {
        let url = self.tasks_url(queue, &format!("/{ident}"))?;
        let resp = self.http.get(url).send().await?;
        let body = Self::handle_response(resp).await?;
        wire::decode_task(&body)
    }

    /// `DELETE .../tasks/id:{id}`.
    pub async fn delete_task(&self, queue: &str, id: i64) -> Result<(), ClientError> {
        self.delete_by_identifier(queue, &format!("id:{id}")).await
    }

    /// `DELETE .../tasks/cname:{cname}`.
    pub async fn delete_task_by_cname(&self, queue: &str, cname: &str) -> Result<(), ClientError> {
        self.delete_by_identifier(queue, &format!("cname:{cname}")).await
    }

    /// `DELETE .../tasks/uuid:{uuid}`.
    pub async fn delete_task_by_uuid(&self, queue: &str, uuid: &str) -> Result<(), ClientError> {
        self.delete_by_identifier(queue, &format!("uuid:{uuid}")).await
    }

    async fn delete_by_identifier(&self, queue: &str, ident: &str) -> Result<(), ClientError> {
        let url = self.tasks_url(queue, &format!("/{ident}"))?;
        let resp = self.http.delete(url).send().await?;
        Self::handle_response(resp).await?;
        Ok(())
    }

    /// Mirrors `_handle_errors`: a 200/201 JSON body passes through; any
    /// other JSON body is parsed as the facade's error envelope and raised
    /// as [`ApiError`]; a non-JSON body is [`ClientError::Decode`].
    async fn handle_response(resp: reqwest::Response) -> Result<Value, ClientError> {
        let status = resp.status();
        let is_json = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));

        if !is_json {
            return Err(ClientError::Decode(format!(
                "response content is not JSON (status {status})"
            )));
        }

        let body: Value = resp.json().await?;
        if status.is_success() {
            return Ok(body);
        }

        let code = body.get("error_code").and_then(Value::as_u64).unwrap_or(0) as u32;
        let desc = body
            .get("error_desc")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let detail = body
            .get("error_detail")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let request_uri = body
            .get("request_uri")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Err(ApiError {
            code,
            desc,
            detail,
            request_uri,
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tasks_url_joins_app_queue_and_suffix() {
        let client = TaskQueueClient::new("http://localhost:8080/", "demo").unwrap();
        let url = client.tasks_url("default", "/id:1").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/apps/demo/taskqueues/default/tasks/id:1");
    }
}
