//! Executes a single dispatched task: HTTP call, response classification,
//! callback chaining, terminal cleanup. Invoked by [`crate::worker::WorkerPool`]
//! for each job the broker hands it.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use taskwire_core::codec::ResponsePayload;
use taskwire_core::{Callback, EngineError, NewTask, Request, Status, Store, Task, TaskQueue};
use tracing::{debug, error, info, warn};

const USER_AGENT_DEFAULT: &str = "Asynx/4.0";

pub struct TaskRunner<S, B> {
    store: S,
    broker: B,
    http: reqwest::Client,
}

impl<S, B> TaskRunner<S, B>
where
    S: Store + Clone + 'static,
    B: taskwire_core::Broker + Clone + 'static,
{
    pub fn new(store: S, broker: B) -> Self {
        TaskRunner {
            store,
            broker,
            http: reqwest::Client::new(),
        }
    }

    /// Runs the task identified by `(app, queue, id)`. Silently returns if
    /// the task no longer exists or has already left `{enqueued, delayed}` —
    /// both are expected races (duplicate delivery, a concurrent delete), not
    /// faults, per spec.md §7.
    pub async fn run_task(&self, app: &str, queue: &str, id: i64) {
        let engine = TaskQueue::new(self.store.clone(), self.broker.clone(), app, queue);

        match engine
            .update_status(id, Status::Running, &[Status::Enqueued, Status::Delayed])
            .await
        {
            Ok(()) => {}
            Err(EngineError::TaskNotFound(_)) | Err(EngineError::TaskStatusNotMatched(_)) => {
                debug!(app, queue, id, "task no longer runnable, skipping");
                return;
            }
            Err(e) => {
                error!(app, queue, id, error = %e, "failed to transition task to running");
                return;
            }
        }

        let mut task = match engine.get_task(id).await {
            Ok(t) => t,
            Err(EngineError::TaskNotFound(_)) => {
                debug!(app, queue, id, "task deleted before it could run");
                return;
            }
            Err(e) => {
                error!(app, queue, id, error = %e, "failed to load task after transition");
                return;
            }
        };

        let outcome = self.execute(queue, &task).await;

        let complete_payload = match &outcome {
            Ok((payload, true)) => {
                self.dispatch_callback(&engine, &task, &task.on_success, payload).await;
                Some(payload.clone())
            }
            Ok((payload, false)) => {
                self.dispatch_callback(&engine, &task, &task.on_failure, payload).await;
                Some(payload.clone())
            }
            Err(_) => {
                self.dispatch_callback_failure(&engine, &task, &task.on_failure).await;
                None
            }
        };
        self.dispatch_callback_opt(&engine, &task, &task.on_complete, complete_payload.as_ref())
            .await;

        if task.schedule.is_some() {
            let now = Utc::now();
            if let Err(e) = engine.reschedule(&mut task, now).await {
                error!(app, queue, id, error = %e, "failed to reschedule recurring task");
            }
        } else if let Err(e) = engine.delete_task_by_uuid(&task.uuid).await {
            warn!(app, queue, id, error = %e, "failed to delete task after terminal run");
        }
    }

    /// Sends the outbound HTTP request and classifies the result.
    ///
    /// `Ok((payload, is_success))` always carries the response serialized
    /// per spec.md §4.5, success or not — spec.md §4.5 step 3 only excuses
    /// *transport* failures from carrying a body. `Err` is reserved for
    /// those transport failures (connection refused, DNS, timeout, …),
    /// where no response exists to serialize.
    async fn execute(&self, queue: &str, task: &Task) -> Result<(ResponsePayload, bool), String> {
        let req = &task.request;
        let method = match req.method.as_str() {
            "HEAD" => reqwest::Method::HEAD,
            "GET" => reqwest::Method::GET,
            "POST" => reqwest::Method::POST,
            "PUT" => reqwest::Method::PUT,
            "PATCH" => reqwest::Method::PATCH,
            "DELETE" => reqwest::Method::DELETE,
            other => return Err(format!("unsupported method: {other}")),
        };

        let mut builder = self.http.request(method, req.url.as_str());

        let mut headers = HeaderMap::new();
        if let Some(caller_headers) = &req.headers {
            for (k, v) in caller_headers {
                if let (Ok(name), Ok(value)) = (
                    HeaderName::try_from(k.as_str()),
                    HeaderValue::from_str(v),
                ) {
                    headers.insert(name, value);
                }
            }
        }
        headers.insert("X-Asynx-QueueName", HeaderValue::from_str(queue).unwrap_or(HeaderValue::from_static("")));
        headers.insert(
            "X-Asynx-TaskUUID",
            HeaderValue::from_str(&task.uuid).unwrap_or(HeaderValue::from_static("")),
        );
        let eta_header = task
            .eta
            .map(|eta| eta.timestamp().to_string())
            .unwrap_or_default();
        headers.insert("X-Asynx-TaskETA", HeaderValue::from_str(&eta_header).unwrap_or(HeaderValue::from_static("")));
        if let Some(cname) = &task.cname {
            if let Ok(value) = HeaderValue::from_str(cname) {
                headers.insert("X-Asynx-TaskCName", value);
            }
        }
        if !headers.contains_key(reqwest::header::USER_AGENT) {
            headers.insert(reqwest::header::USER_AGENT, HeaderValue::from_static(USER_AGENT_DEFAULT));
        }
        builder = builder.headers(headers);

        if req.method.allows_payload() {
            if let Some(payload) = &req.payload {
                builder = builder.body(payload.clone());
            }
        }
        if let Some(timeout) = req.timeout {
            builder = builder.timeout(Duration::from_secs_f64(timeout));
        }
        // Redirect following is a client-level policy in reqwest, not
        // per-request; a client is only built with defaults here, so an
        // explicit `allow_redirects = false` on a method that defaults to
        // following (GET) is not honored. Acceptable simplification: see
        // DESIGN.md.

        let response = builder.send().await.map_err(|e| e.to_string())?;
        let status_code = response.status().as_u16();
        let headers_map: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let url = response.url().to_string();
        let reason = response.status().canonical_reason().map(str::to_string);
        let content = response.text().await.unwrap_or_default();

        let payload = ResponsePayload {
            url,
            status_code,
            headers: headers_map,
            content,
            history: Vec::new(),
            reason,
        };

        let is_success = (200..303).contains(&status_code);
        Ok((payload, is_success))
    }

    async fn dispatch_callback_failure<St, Br>(
        &self,
        engine: &TaskQueue<St, Br>,
        task: &Task,
        callback: &Callback,
    ) where
        St: Store,
        Br: taskwire_core::Broker,
    {
        // A failed run has no response payload to chain; `Report`/`Post`/
        // `SubTask` still fire, carrying an empty body.
        let payload = ResponsePayload {
            url: task.request.url.clone(),
            status_code: 0,
            headers: HashMap::new(),
            content: String::new(),
            history: Vec::new(),
            reason: Some("request failed".to_string()),
        };
        self.dispatch_callback(engine, task, callback, &payload).await;
    }

    async fn dispatch_callback_opt<St, Br>(
        &self,
        engine: &TaskQueue<St, Br>,
        task: &Task,
        callback: &Callback,
        payload: Option<&ResponsePayload>,
    ) where
        St: Store,
        Br: taskwire_core::Broker,
    {
        let fallback;
        let payload = match payload {
            Some(p) => p,
            None => {
                fallback = ResponsePayload {
                    url: task.request.url.clone(),
                    status_code: 0,
                    headers: HashMap::new(),
                    content: String::new(),
                    history: Vec::new(),
                    reason: Some("request failed".to_string()),
                };
                &fallback
            }
        };
        self.dispatch_callback(engine, task, callback, payload).await;
    }

    /// spec.md §4.5 step 4: dispatches a single callback variant.
    async fn dispatch_callback<St, Br>(
        &self,
        engine: &TaskQueue<St, Br>,
        task: &Task,
        callback: &Callback,
        payload: &ResponsePayload,
    ) where
        St: Store,
        Br: taskwire_core::Broker,
    {
        match callback {
            Callback::None | Callback::Delete => {}
            Callback::Report => {
                info!(
                    id = task.id,
                    uuid = %task.uuid,
                    cname = ?task.cname,
                    status_code = payload.status_code,
                    "task run reported"
                );
            }
            Callback::Post(url) => {
                let mut headers = HashMap::new();
                headers.insert("X-Asynx-Callback".to_string(), url.clone());
                let new_task = NewTask::new(Request {
                    method: taskwire_core::Method::Post,
                    url: url.clone(),
                    headers: Some(headers),
                    payload: Some(payload.to_payload_string()),
                    timeout: None,
                    allow_redirects: None,
                });
                if let Err(e) = engine.add_task(new_task).await {
                    warn!(id = task.id, error = %e, "failed to chain Post callback");
                }
            }
            Callback::SubTask(descriptor) => {
                let mut chained = (**descriptor).clone();
                let mut headers = chained.request.headers.clone().unwrap_or_default();
                headers.insert("X-Asynx-Chained".to_string(), task.request.url.clone());
                headers.insert("X-Asynx-Chained-TaskUUID".to_string(), task.uuid.clone());
                headers.insert(
                    "X-Asynx-Chained-TaskETA".to_string(),
                    task.eta.map(|e| e.timestamp().to_string()).unwrap_or_default(),
                );
                if let Some(cname) = &task.cname {
                    headers.insert("X-Asynx-Chained-TaskCName".to_string(), cname.clone());
                }
                chained.request.headers = Some(headers);
                chained.request.payload = Some(payload.to_payload_string());
                if let Err(e) = engine.add_task(chained).await {
                    warn!(id = task.id, error = %e, "failed to chain SubTask callback");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use taskwire_core::store::testing::InMemoryStore;
    use taskwire_core::{Callback, Method, NewTask, Request};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default, Clone)]
    struct FakeBroker {
        next: Arc<AtomicU64>,
    }

    #[async_trait]
    impl taskwire_core::Broker for FakeBroker {
        async fn enqueue_now(
            &self,
            _app: &str,
            _queue: &str,
            _id: i64,
        ) -> Result<String, taskwire_core::BrokerError> {
            Ok(format!("job-{}", self.next.fetch_add(1, Ordering::SeqCst)))
        }

        async fn enqueue_after(
            &self,
            _app: &str,
            _queue: &str,
            _id: i64,
            _delay: Duration,
        ) -> Result<String, taskwire_core::BrokerError> {
            Ok(format!("job-{}", self.next.fetch_add(1, Ordering::SeqCst)))
        }
    }

    #[tokio::test]
    async fn execute_returns_non_success_payload_instead_of_err() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/work"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let runner = TaskRunner::new(InMemoryStore::new(), FakeBroker::default());
        let task = Task {
            id: 1,
            uuid: "job-0".to_string(),
            cname: None,
            request: Request {
                method: Method::Get,
                url: format!("{}/work", server.uri()),
                headers: None,
                payload: None,
                timeout: None,
                allow_redirects: None,
            },
            eta: None,
            schedule: None,
            last_run_at: None,
            status: Status::Running,
            on_success: Callback::Delete,
            on_failure: Callback::Report,
            on_complete: Callback::None,
        };

        let (payload, is_success) = runner.execute("default", &task).await.unwrap();
        assert!(!is_success);
        assert_eq!(payload.status_code, 500);
        assert_eq!(payload.content, "boom");
    }

    /// spec.md §4.5 step 3: a non-2xx response is still a response — the
    /// real status/body must reach `on_failure`, not the transport-failure
    /// fallback payload.
    #[tokio::test]
    async fn run_task_chains_on_failure_with_the_real_response_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/work"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
            .mount(&server)
            .await;

        let store = InMemoryStore::new();
        let broker = FakeBroker::default();
        let engine = TaskQueue::new(store.clone(), broker.clone(), "app", "default");

        let mut descriptor = NewTask::new(Request {
            method: Method::Get,
            url: format!("{}/work", server.uri()),
            headers: None,
            payload: None,
            timeout: None,
            allow_redirects: None,
        });
        descriptor.on_failure = Callback::Post("http://example.invalid/callback".to_string());
        let inserted = engine.add_task(descriptor).await.unwrap();

        let runner = TaskRunner::new(store, broker);
        runner.run_task("app", "default", inserted.id).await;

        // The original one-shot task is deleted after its terminal run; the
        // chained `on_failure` Post callback is the only task left.
        assert_eq!(engine.count_tasks().await.unwrap(), 1);
        let chained = engine.list_tasks(0, 10).await.unwrap();
        let chained = &chained[0];
        assert_eq!(chained.request.url, "http://example.invalid/callback");
        let payload = chained.request.payload.as_deref().unwrap();
        assert!(payload.contains("\"status_code\":404"));
        assert!(payload.contains("not here"));
    }
}
