//! The `TaskQueue` engine: insert, list/iterate, lookup, delete, and status
//! transition, all driven by the optimistic-transaction `Store` primitives.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::Value;

use crate::broker::Broker;
use crate::codec::{decode_task_fields, encode_eta, encode_task_fields};
use crate::error::EngineError;
use crate::keymap::KeyMap;
use crate::store::{commit_with_retry, CommitOutcome, Precondition, Store, WriteOp};
use crate::task::{NewTask, Status, Task};

/// How many tasks a single `zrange` page pulls while iterating; mirrors the
/// original's `iter_tasks(offset, per_pipeline=50)` default.
const DEFAULT_PAGE: i64 = 50;

/// Facade-enforced upper bound on `list_tasks`' `limit`, per spec.md §6/§8.
pub const MAX_LIST_LIMIT: i64 = 200;

pub struct TaskQueue<S, B> {
    store: S,
    broker: B,
    app: String,
    queue: String,
    tz: Tz,
}

impl<S: Store, B: Broker> TaskQueue<S, B> {
    /// Builds a queue evaluating recurring schedules in UTC. Use
    /// [`TaskQueue::with_timezone`] for a local-zone queue.
    pub fn new(store: S, broker: B, app: impl Into<String>, queue: impl Into<String>) -> Self {
        Self::with_timezone(store, broker, app, queue, Tz::UTC)
    }

    pub fn with_timezone(
        store: S,
        broker: B,
        app: impl Into<String>,
        queue: impl Into<String>,
        tz: Tz,
    ) -> Self {
        TaskQueue {
            store,
            broker,
            app: app.into(),
            queue: queue.into(),
            tz,
        }
    }

    fn keymap(&self) -> KeyMap<'_> {
        KeyMap::new(&self.app, &self.queue)
    }

    /// Inserts `descriptor`, allocates an id, optionally reserves a cname,
    /// writes metadata, and dispatches it to the broker. Mirrors spec.md
    /// §4.4's `add_task`.
    pub async fn add_task(&self, descriptor: NewTask) -> Result<Task, EngineError> {
        if descriptor.schedule.is_some() && descriptor.cname.is_none() {
            return Err(EngineError::TaskCNameRequired);
        }

        let now = Utc::now();
        let eta = descriptor.eta.or_else(|| {
            descriptor
                .countdown
                .map(|c| now + chrono::TimeDelta::milliseconds((c * 1000.0).round() as i64))
        });

        let (counter_hash, counter_field) = self.keymap().counter();
        let id = self.store.incr(counter_hash, &counter_field).await?;

        let mut task = Task {
            id,
            uuid: String::new(),
            cname: descriptor.cname.clone(),
            request: descriptor.request,
            eta,
            schedule: descriptor.schedule,
            last_run_at: None,
            status: Status::New,
            on_success: descriptor.on_success,
            on_failure: descriptor.on_failure,
            on_complete: descriptor.on_complete,
        };

        let meta_key = self.keymap().meta(id);
        let mut watch_keys = Vec::new();
        let mut precondition = None;
        let mut ops = Vec::new();

        if let Some(cname) = &task.cname {
            let cname_key = self.keymap().cname(cname);
            watch_keys.push(cname_key.clone());
            precondition = Some(Precondition::KeyNotExists(cname_key.clone()));
            ops.push(WriteOp::Set {
                key: cname_key,
                value: id.to_string(),
            });
        }
        ops.push(WriteOp::HsetMany {
            key: meta_key,
            fields: encode_task_fields(&task),
        });

        // Deliberately a single attempt, not `commit_with_retry`: a cname
        // collision here is a real conflict the caller should see as
        // `TaskAlreadyExists`, not something to silently retry past.
        match self.store.commit(&watch_keys, precondition, ops).await {
            Ok(CommitOutcome::Committed) => {}
            Ok(CommitOutcome::PreconditionFailed) => {
                return Err(EngineError::TaskAlreadyExists(
                    task.cname.clone().unwrap_or_default(),
                ));
            }
            Err(crate::error::StoreError::Contention) => {
                return Err(EngineError::TaskAlreadyExists(
                    task.cname.clone().unwrap_or_default(),
                ));
            }
            Err(e) => return Err(e.into()),
        }

        self.dispatch(&mut task).await?;
        Ok(task)
    }

    /// Submits `task` to the broker (immediate or delayed) and persists the
    /// resulting `uuid`/`status`. Internal: called at the end of `add_task`
    /// and when re-arming a recurring task after a successful run.
    ///
    /// A recurring task's previous `uuid` (if any) is `zrem`'d from
    /// `AX:UUID` in the same pipelined write that `zadd`s the new one, so a
    /// re-arm never leaves a stale member behind — otherwise the sorted set
    /// would hold two members scored at the same id after one recurring
    /// fire, over-counting `count_tasks`/`iter_tasks` (spec.md §3 invariant 2).
    pub(crate) async fn dispatch(&self, task: &mut Task) -> Result<(), EngineError> {
        let now = Utc::now();
        let previous_uuid = task.uuid.clone();
        let uuid = match task.eta {
            None => {
                task.status = Status::Enqueued;
                self.broker.enqueue_now(&self.app, &self.queue, task.id).await?
            }
            Some(eta) => {
                let delay = (eta - now).to_std().unwrap_or(std::time::Duration::ZERO);
                task.status = Status::Delayed;
                self.broker
                    .enqueue_after(&self.app, &self.queue, task.id, delay)
                    .await?
            }
        };
        task.uuid = uuid;

        let meta_key = self.keymap().meta(task.id);
        let mut fields = HashMap::new();
        fields.insert("uuid".to_string(), Value::String(task.uuid.clone()).to_string());
        fields.insert(
            "status".to_string(),
            Value::String(task.status.as_str().to_string()).to_string(),
        );

        let uuid_key = self.keymap().uuid_set();
        let mut ops = vec![WriteOp::HsetMany {
            key: meta_key,
            fields,
        }];
        if !previous_uuid.is_empty() && previous_uuid != task.uuid {
            ops.push(WriteOp::Zrem {
                key: uuid_key.clone(),
                member: previous_uuid,
            });
        }
        ops.push(WriteOp::Zadd {
            key: uuid_key,
            score: task.id as f64,
            member: task.uuid.clone(),
        });

        self.store.commit(&[], None, ops).await?;
        Ok(())
    }

    /// Terminal cleanup for a recurring task: advances `last_run_at`/`eta` to
    /// the schedule's next fire time, persists them, and re-dispatches.
    /// Called by the runner after a completed run; panics if `task.schedule`
    /// is `None` (callers check this first).
    pub async fn reschedule(&self, task: &mut Task, now: DateTime<Utc>) -> Result<(), EngineError> {
        let schedule = task
            .schedule
            .as_ref()
            .expect("reschedule called on a task with no schedule");
        let next = schedule.next_after(now, self.tz)?;
        task.last_run_at = Some(now);
        task.eta = Some(next);

        let meta_key = self.keymap().meta(task.id);
        let mut fields = HashMap::new();
        fields.insert("last_run_at".to_string(), encode_eta(task.last_run_at));
        fields.insert("eta".to_string(), encode_eta(task.eta));
        self.store.hset_many(&meta_key, &fields).await?;

        self.dispatch(task).await
    }

    /// A single `zrange` page starting at `offset`, batch-loading each
    /// metadata hash; empty hashes (a race with a concurrent delete) are
    /// silently skipped.
    pub async fn iter_tasks(&self, offset: i64, page: i64) -> Result<Vec<Task>, EngineError> {
        let uuid_key = self.keymap().uuid_set();
        let mut out = Vec::new();
        let mut cursor = offset;
        loop {
            let hi = cursor + page - 1;
            let pairs = self
                .store
                .zrange_with_scores(&uuid_key, cursor as isize, hi as isize)
                .await?;
            if pairs.is_empty() {
                break;
            }
            let fetched = pairs.len() as i64;
            for (_uuid, score) in &pairs {
                let id = *score as i64;
                let meta_key = self.keymap().meta(id);
                let fields = self.store.hget_all(&meta_key).await?;
                if fields.is_empty() {
                    continue;
                }
                out.push(decode_task_fields(id, &fields)?);
            }
            if fetched < page {
                break;
            }
            cursor += page;
        }
        Ok(out)
    }

    /// Materializes up to `limit` results starting at `offset`.
    pub async fn list_tasks(&self, offset: i64, limit: i64) -> Result<Vec<Task>, EngineError> {
        let limit = limit.clamp(0, MAX_LIST_LIMIT);
        let per_page = (limit + 10).clamp(1, 100).max(DEFAULT_PAGE.min(limit.max(1)));
        let mut tasks = self.iter_tasks(offset, per_page).await?;
        tasks.truncate(limit as usize);
        Ok(tasks)
    }

    pub async fn count_tasks(&self) -> Result<i64, EngineError> {
        Ok(self.store.zcard(&self.keymap().uuid_set()).await?)
    }

    pub async fn get_task(&self, id: i64) -> Result<Task, EngineError> {
        let meta_key = self.keymap().meta(id);
        let fields = self.store.hget_all(&meta_key).await?;
        if fields.is_empty() {
            return Err(EngineError::TaskNotFound(id.to_string()));
        }
        Ok(decode_task_fields(id, &fields)?)
    }

    pub async fn get_task_by_uuid(&self, uuid: &str) -> Result<Task, EngineError> {
        let score = self.store.zscore(&self.keymap().uuid_set(), uuid).await?;
        let id = score.ok_or_else(|| EngineError::TaskNotFound(uuid.to_string()))?;
        self.get_task(id as i64).await
    }

    pub async fn get_task_by_cname(&self, cname: &str) -> Result<Task, EngineError> {
        let cname_key = self.keymap().cname(cname);
        let id_str = self
            .store
            .get(&cname_key)
            .await?
            .ok_or_else(|| EngineError::TaskNotFound(cname.to_string()))?;
        let id: i64 = id_str
            .parse()
            .map_err(|_| EngineError::TaskNotFound(cname.to_string()))?;
        self.get_task(id).await
    }

    /// For the id path only: rejects deleting a `running` task. Deletion by
    /// uuid/cname (and the runner's own terminal cleanup) always succeeds,
    /// per spec.md §3 invariant 7's documented asymmetry.
    pub async fn delete_task(&self, id: i64) -> Result<(), EngineError> {
        let task = self.get_task(id).await?;
        if task.status == Status::Running {
            return Err(EngineError::TaskStatusNotMatched(id.to_string()));
        }
        self.delete_task_inner(&task).await
    }

    pub async fn delete_task_by_uuid(&self, uuid: &str) -> Result<(), EngineError> {
        let task = self.get_task_by_uuid(uuid).await?;
        self.delete_task_inner(&task).await
    }

    pub async fn delete_task_by_cname(&self, cname: &str) -> Result<(), EngineError> {
        let task = self.get_task_by_cname(cname).await?;
        self.delete_task_inner(&task).await
    }

    async fn delete_task_inner(&self, task: &Task) -> Result<(), EngineError> {
        let meta_key = self.keymap().meta(task.id);
        let uuid_key = self.keymap().uuid_set();
        let mut watch_keys = vec![meta_key.clone(), uuid_key.clone()];
        let mut ops = vec![
            WriteOp::Del { key: meta_key },
            WriteOp::Zrem {
                key: uuid_key,
                member: task.uuid.clone(),
            },
        ];
        if let Some(cname) = &task.cname {
            let cname_key = self.keymap().cname(cname);
            watch_keys.push(cname_key.clone());
            ops.push(WriteOp::Del { key: cname_key });
        }
        commit_with_retry(&self.store, &watch_keys, None, ops).await?;
        Ok(())
    }

    /// Transitions `id`'s status to `next`, asserting it was previously one
    /// of `allowed_previous`. Used by the runner to move
    /// `{enqueued,delayed} -> running` at the start of a dispatch.
    pub async fn update_status(
        &self,
        id: i64,
        next: Status,
        allowed_previous: &[Status],
    ) -> Result<(), EngineError> {
        let meta_key = self.keymap().meta(id);
        let allowed: Vec<String> = allowed_previous
            .iter()
            .map(|s| Value::String(s.as_str().to_string()).to_string())
            .collect();
        let precondition = Precondition::HashFieldIn {
            key: meta_key.clone(),
            field: "status".to_string(),
            allowed,
        };
        let mut fields = HashMap::new();
        fields.insert(
            "status".to_string(),
            Value::String(next.as_str().to_string()).to_string(),
        );
        let outcome = commit_with_retry(
            &self.store,
            &[meta_key.clone()],
            Some(precondition),
            vec![WriteOp::HsetMany {
                key: meta_key,
                fields,
            }],
        )
        .await?;
        match outcome {
            CommitOutcome::Committed => Ok(()),
            CommitOutcome::PreconditionFailed => Err(EngineError::TaskStatusNotMatched(id.to_string())),
        }
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn queue_name(&self) -> &str {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::InMemoryStore;
    use crate::task::{Method, Request};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeBroker {
        next: AtomicU64,
    }

    #[async_trait]
    impl Broker for FakeBroker {
        async fn enqueue_now(&self, _app: &str, _queue: &str, _id: i64) -> Result<String, crate::error::BrokerError> {
            Ok(format!("job-{}", self.next.fetch_add(1, Ordering::SeqCst)))
        }

        async fn enqueue_after(
            &self,
            _app: &str,
            _queue: &str,
            _id: i64,
            _delay: Duration,
        ) -> Result<String, crate::error::BrokerError> {
            Ok(format!("job-{}", self.next.fetch_add(1, Ordering::SeqCst)))
        }
    }

    fn sample_request() -> Request {
        Request {
            method: Method::Get,
            url: "http://httpbin.org/get".to_string(),
            headers: None,
            payload: None,
            timeout: None,
            allow_redirects: None,
        }
    }

    fn engine() -> TaskQueue<InMemoryStore, FakeBroker> {
        TaskQueue::new(InMemoryStore::new(), FakeBroker::default(), "test", "default")
    }

    #[tokio::test]
    async fn insert_immediate_task_is_enqueued() {
        let tq = engine();
        let task = tq.add_task(NewTask::new(sample_request())).await.unwrap();
        assert_eq!(task.id, 1);
        assert_eq!(task.status, Status::Enqueued);
        assert_eq!(task.cname, None);
        assert_eq!(task.eta, None);
        assert_eq!(tq.count_tasks().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn insert_with_countdown_is_delayed() {
        let tq = engine();
        let mut descriptor = NewTask::new(sample_request());
        descriptor.cname = Some("a".to_string());
        descriptor.countdown = Some(200.0);
        let t0 = Utc::now();
        let task = tq.add_task(descriptor).await.unwrap();
        assert_eq!(task.status, Status::Delayed);
        let countdown = task.countdown(Utc::now()).unwrap();
        assert!((195.0..=200.0).contains(&countdown), "countdown={countdown}");
        let eta = task.eta.unwrap();
        assert!(eta <= t0 + chrono::TimeDelta::seconds(205));
    }

    #[tokio::test]
    async fn duplicate_cname_is_rejected() {
        let tq = engine();
        let mut descriptor = NewTask::new(sample_request());
        descriptor.cname = Some("a".to_string());
        tq.add_task(descriptor.clone()).await.unwrap();
        let err = tq.add_task(descriptor).await.unwrap_err();
        assert!(matches!(err, EngineError::TaskAlreadyExists(c) if c == "a"));
    }

    #[tokio::test]
    async fn recurring_task_without_cname_requires_cname() {
        let tq = engine();
        let mut descriptor = NewTask::new(sample_request());
        descriptor.schedule = Some(crate::schedule::Schedule::parse("*/10 1,2-10 * * *").unwrap());
        let err = tq.add_task(descriptor).await.unwrap_err();
        assert!(matches!(err, EngineError::TaskCNameRequired));
    }

    #[tokio::test]
    async fn get_task_round_trips() {
        let tq = engine();
        let inserted = tq.add_task(NewTask::new(sample_request())).await.unwrap();
        let fetched = tq.get_task(inserted.id).await.unwrap();
        assert_eq!(fetched.request, inserted.request);
        assert_eq!(fetched.cname, inserted.cname);
        assert_eq!(fetched.status, inserted.status);
    }

    #[tokio::test]
    async fn get_task_by_uuid_and_cname() {
        let tq = engine();
        let mut descriptor = NewTask::new(sample_request());
        descriptor.cname = Some("job-x".to_string());
        let inserted = tq.add_task(descriptor).await.unwrap();
        let by_uuid = tq.get_task_by_uuid(&inserted.uuid).await.unwrap();
        assert_eq!(by_uuid.id, inserted.id);
        let by_cname = tq.get_task_by_cname("job-x").await.unwrap();
        assert_eq!(by_cname.id, inserted.id);
    }

    #[tokio::test]
    async fn delete_nonexistent_task_not_found() {
        let tq = engine();
        let err = tq.delete_task(999).await.unwrap_err();
        assert!(matches!(err, EngineError::TaskNotFound(_)));
    }

    #[tokio::test]
    async fn delete_twice_second_call_not_found() {
        let tq = engine();
        let task = tq.add_task(NewTask::new(sample_request())).await.unwrap();
        tq.delete_task(task.id).await.unwrap();
        let err = tq.delete_task(task.id).await.unwrap_err();
        assert!(matches!(err, EngineError::TaskNotFound(_)));
    }

    #[tokio::test]
    async fn delete_running_task_by_id_is_rejected() {
        let tq = engine();
        let task = tq.add_task(NewTask::new(sample_request())).await.unwrap();
        tq.update_status(task.id, Status::Running, &[Status::Enqueued, Status::Delayed])
            .await
            .unwrap();
        let err = tq.delete_task(task.id).await.unwrap_err();
        assert!(matches!(err, EngineError::TaskStatusNotMatched(_)));
    }

    #[tokio::test]
    async fn delete_running_task_by_uuid_is_allowed() {
        let tq = engine();
        let task = tq.add_task(NewTask::new(sample_request())).await.unwrap();
        tq.update_status(task.id, Status::Running, &[Status::Enqueued, Status::Delayed])
            .await
            .unwrap();
        tq.delete_task_by_uuid(&task.uuid).await.unwrap();
        assert_eq!(tq.count_tasks().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn update_status_rejects_mismatched_previous() {
        let tq = engine();
        let task = tq.add_task(NewTask::new(sample_request())).await.unwrap();
        let err = tq
            .update_status(task.id, Status::Running, &[Status::Delayed])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::TaskStatusNotMatched(_)));
    }

    #[tokio::test]
    async fn reschedule_replaces_uuid_without_leaking_the_old_one() {
        let tq = engine();
        let mut descriptor = NewTask::new(sample_request());
        descriptor.cname = Some("recurring".to_string());
        descriptor.schedule = Some(crate::schedule::Schedule::parse("*/10 1,2-10 * * *").unwrap());
        let mut task = tq.add_task(descriptor).await.unwrap();
        let first_uuid = task.uuid.clone();

        tq.reschedule(&mut task, Utc::now()).await.unwrap();

        assert_ne!(task.uuid, first_uuid);
        assert_eq!(tq.count_tasks().await.unwrap(), 1);
        let fetched = tq.get_task_by_uuid(&task.uuid).await.unwrap();
        assert_eq!(fetched.id, task.id);
        assert!(tq.get_task_by_uuid(&first_uuid).await.is_err());
    }

    #[tokio::test]
    async fn list_tasks_respects_limit_and_order() {
        let tq = engine();
        for _ in 0..5 {
            tq.add_task(NewTask::new(sample_request())).await.unwrap();
        }
        let page = tq.list_tasks(0, 3).await.unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(page.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(tq.count_tasks().await.unwrap(), 5);
    }
}
