//! The `Store` trait: a thin, store-agnostic wrapper over atomic counters,
//! hashes, sorted sets, and optimistic `WATCH`/`MULTI`/`EXEC` transactions.
//!
//! Grounded on `ferrex-core/src/database/cache.rs::RedisCache` for the
//! shared-`ConnectionManager` shape, generalized from a typed cache facade
//! into the primitive operations the task-queue engine needs.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::StoreError;

/// A single write folded into an optimistic transaction's commit batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Set { key: String, value: String },
    HsetMany { key: String, fields: HashMap<String, String> },
    Del { key: String },
    Zadd { key: String, score: f64, member: String },
    Zrem { key: String, member: String },
}

/// A check evaluated on the watched connection, after `WATCH` and before
/// `MULTI`, deciding whether the commit's writes should even be attempted.
/// Closed over the two shapes the engine actually needs (cname uniqueness,
/// status-transition assertion) rather than an arbitrary caller closure, so
/// the trait stays object-safe.
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    /// `key` must not exist (the cname uniqueness check in `add_task`).
    KeyNotExists(String),
    /// `hget(key, field)` must be one of `allowed` (the previous-status
    /// assertion in `_update_status`).
    HashFieldIn {
        key: String,
        field: String,
        allowed: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    PreconditionFailed,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn incr(&self, hashkey: &str, field: &str) -> Result<i64, StoreError>;
    async fn hset_many(&self, key: &str, fields: &HashMap<String, String>) -> Result<(), StoreError>;
    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;
    async fn del(&self, key: &str) -> Result<(), StoreError>;
    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), StoreError>;
    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError>;
    async fn zrange_with_scores(
        &self,
        key: &str,
        lo: isize,
        hi: isize,
    ) -> Result<Vec<(String, f64)>, StoreError>;
    async fn zrem(&self, key: &str, member: &str) -> Result<(), StoreError>;
    async fn zcard(&self, key: &str) -> Result<i64, StoreError>;
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Watches `watch_keys` on a connection dedicated to this single attempt,
    /// evaluates `precondition` (a read on that same connection, so any
    /// write racing with this call is visible here or causes the later
    /// `EXEC` to abort), and if it passes, atomically applies `ops`.
    ///
    /// One attempt only: `Ok(CommitOutcome::PreconditionFailed)` means the
    /// logical check failed and nothing was written; `Err(StoreError::Contention)`
    /// means the watched keys changed between `WATCH` and `EXEC`. Callers
    /// that want automatic retry use [`commit_with_retry`]; `add_task`'s
    /// cname check deliberately does not, surfacing contention directly.
    async fn commit(
        &self,
        watch_keys: &[String],
        precondition: Option<Precondition>,
        ops: Vec<WriteOp>,
    ) -> Result<CommitOutcome, StoreError>;
}

/// Retries [`Store::commit`] on `Contention`, mirroring `redis.transaction()`'s
/// `WatchError` retry loop in
/// `examples/original_source/asynx-core/asynx_core/taskqueue.py` (used by
/// `_update_status` and the delete paths). A `PreconditionFailed` outcome is
/// a logical assertion failure, not a race, and is returned immediately
/// without retry.
pub async fn commit_with_retry<S: Store + ?Sized>(
    store: &S,
    watch_keys: &[String],
    precondition: Option<Precondition>,
    ops: Vec<WriteOp>,
) -> Result<CommitOutcome, StoreError> {
    const MAX_ATTEMPTS: u32 = 20;
    let mut last_err = StoreError::Contention;
    for _ in 0..MAX_ATTEMPTS {
        match store.commit(watch_keys, precondition.clone(), ops.clone()).await {
            Err(StoreError::Contention) => {
                last_err = StoreError::Contention;
                continue;
            }
            other => return other,
        }
    }
    Err(last_err)
}

/// Redis-backed [`Store`].
///
/// Scalar reads/writes share a single auto-reconnecting `ConnectionManager`
/// per process (teacher's `RedisCache` pattern, see SPEC_FULL.md §9). `commit`
/// is the exception: `ConnectionManager` multiplexes many logical callers
/// over one physical connection, which is unsafe for `WATCH`/`MULTI`/`EXEC` —
/// a concurrent caller's command could land between this attempt's `WATCH`
/// and `EXEC` and corrupt the isolation. Each `commit` attempt therefore opens
/// its own dedicated connection via `redis::Client`, at the cost of a
/// reconnect per attempt (documented trade-off, see DESIGN.md).
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { client, conn })
    }

    async fn check_precondition(
        conn: &mut redis::aio::MultiplexedConnection,
        precondition: &Precondition,
    ) -> Result<bool, StoreError> {
        match precondition {
            Precondition::KeyNotExists(key) => {
                let exists: bool = conn.exists(key).await?;
                Ok(!exists)
            }
            Precondition::HashFieldIn { key, field, allowed } => {
                let current: Option<String> = conn.hget(key, field).await?;
                Ok(current.is_some_and(|v| allowed.contains(&v)))
            }
        }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn incr(&self, hashkey: &str, field: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.hincr(hashkey, field, 1i64).await?)
    }

    async fn hset_many(&self, key: &str, fields: &HashMap<String, String>) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let items: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let _: () = conn.hset_multiple(key, &items).await?;
        Ok(())
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.hgetall(key).await?)
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.zscore(key, member).await?)
    }

    async fn zrange_with_scores(
        &self,
        key: &str,
        lo: isize,
        hi: isize,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.zrange_withscores(key, lo, hi).await?)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.zrem(key, member).await?;
        Ok(())
    }

    async fn zcard(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.zcard(key).await?)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }

    async fn commit(
        &self,
        watch_keys: &[String],
        precondition: Option<Precondition>,
        ops: Vec<WriteOp>,
    ) -> Result<CommitOutcome, StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        if !watch_keys.is_empty() {
            let mut watch_cmd = redis::cmd("WATCH");
            for key in watch_keys {
                watch_cmd.arg(key);
            }
            let _: () = watch_cmd.query_async(&mut conn).await?;
        }

        if let Some(precondition) = &precondition {
            if !Self::check_precondition(&mut conn, precondition).await? {
                let _: () = redis::cmd("UNWATCH").query_async(&mut conn).await?;
                return Ok(CommitOutcome::PreconditionFailed);
            }
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &ops {
            match op {
                WriteOp::Set { key, value } => {
                    pipe.set(key, value);
                }
                WriteOp::HsetMany { key, fields } => {
                    let items: Vec<(&str, &str)> =
                        fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
                    pipe.hset_multiple(key, &items);
                }
                WriteOp::Del { key } => {
                    pipe.del(key);
                }
                WriteOp::Zadd { key, score, member } => {
                    pipe.zadd(key, member, *score);
                }
                WriteOp::Zrem { key, member } => {
                    pipe.zrem(key, member);
                }
            }
        }

        let response: Option<Vec<redis::Value>> = pipe.query_async(&mut conn).await?;
        match response {
            Some(_) => Ok(CommitOutcome::Committed),
            None => Err(StoreError::Contention),
        }
    }
}

/// An in-memory [`Store`] fake for unit and integration tests, following a
/// hand-rolled-fixture convention (`tests/support/`). Exposed
/// unconditionally (not `#[cfg(test)]`) so downstream crates' test suites
/// can depend on it without a real Redis instance.
///
/// A single mutex guards the whole state, so `commit`'s precondition check
/// and its writes happen in one critical section — there is no real window
/// for another caller's write to land in between, so this fake never needs
/// to manufacture `Contention`; concurrent callers are simply serialized,
/// which produces the same externally-observable outcome
/// (`PreconditionFailed` -> `TaskAlreadyExists`/`TaskStatusNotMatched`).
pub mod testing {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Debug, Default)]
    struct State {
        hashes: HashMap<String, HashMap<String, String>>,
        strings: HashMap<String, String>,
        sorted_sets: HashMap<String, HashMap<String, f64>>,
    }

    /// Clone is a cheap handle clone (`Arc`), mirroring [`super::RedisStore`]'s
    /// clone-a-connection-handle shape, so a single fake store can be shared
    /// between an engine and a runner under test.
    #[derive(Debug, Default, Clone)]
    pub struct InMemoryStore {
        state: Arc<Mutex<State>>,
    }

    impl InMemoryStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl Store for InMemoryStore {
        async fn incr(&self, hashkey: &str, field: &str) -> Result<i64, StoreError> {
            let mut state = self.state.lock().await;
            let hash = state.hashes.entry(hashkey.to_string()).or_default();
            let entry = hash.entry(field.to_string()).or_insert_with(|| "0".to_string());
            let next = entry.parse::<i64>().unwrap_or(0) + 1;
            *entry = next.to_string();
            Ok(next)
        }

        async fn hset_many(&self, key: &str, fields: &HashMap<String, String>) -> Result<(), StoreError> {
            let mut state = self.state.lock().await;
            state.hashes.entry(key.to_string()).or_default().extend(fields.clone());
            Ok(())
        }

        async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
            let state = self.state.lock().await;
            Ok(state.hashes.get(key).cloned().unwrap_or_default())
        }

        async fn del(&self, key: &str) -> Result<(), StoreError> {
            let mut state = self.state.lock().await;
            state.hashes.remove(key);
            state.strings.remove(key);
            state.sorted_sets.remove(key);
            Ok(())
        }

        async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), StoreError> {
            let mut state = self.state.lock().await;
            state
                .sorted_sets
                .entry(key.to_string())
                .or_default()
                .insert(member.to_string(), score);
            Ok(())
        }

        async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError> {
            let state = self.state.lock().await;
            Ok(state.sorted_sets.get(key).and_then(|z| z.get(member)).copied())
        }

        async fn zrange_with_scores(
            &self,
            key: &str,
            lo: isize,
            hi: isize,
        ) -> Result<Vec<(String, f64)>, StoreError> {
            let state = self.state.lock().await;
            let mut pairs: Vec<(String, f64)> = state
                .sorted_sets
                .get(key)
                .map(|z| z.iter().map(|(k, v)| (k.clone(), *v)).collect())
                .unwrap_or_default();
            pairs.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap().then_with(|| a.0.cmp(&b.0)));
            let len = pairs.len() as isize;
            let norm_start = |i: isize| -> usize {
                let idx = if i < 0 { (len + i).max(0) } else { i.min(len) };
                idx as usize
            };
            let norm_end = |i: isize| -> usize {
                let idx = if i < 0 { (len + i + 1).max(0) } else { (i + 1).min(len) };
                idx as usize
            };
            let start = norm_start(lo);
            let end = norm_end(hi);
            if start >= pairs.len() || start >= end {
                return Ok(Vec::new());
            }
            Ok(pairs[start..end.min(pairs.len())].to_vec())
        }

        async fn zrem(&self, key: &str, member: &str) -> Result<(), StoreError> {
            let mut state = self.state.lock().await;
            if let Some(z) = state.sorted_sets.get_mut(key) {
                z.remove(member);
            }
            Ok(())
        }

        async fn zcard(&self, key: &str) -> Result<i64, StoreError> {
            let state = self.state.lock().await;
            Ok(state.sorted_sets.get(key).map(|z| z.len() as i64).unwrap_or(0))
        }

        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            let state = self.state.lock().await;
            Ok(state.strings.get(key).cloned())
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            let mut state = self.state.lock().await;
            state.strings.insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn exists(&self, key: &str) -> Result<bool, StoreError> {
            let state = self.state.lock().await;
            Ok(state.strings.contains_key(key)
                || state.hashes.contains_key(key)
                || state.sorted_sets.contains_key(key))
        }

        async fn commit(
            &self,
            _watch_keys: &[String],
            precondition: Option<Precondition>,
            ops: Vec<WriteOp>,
        ) -> Result<CommitOutcome, StoreError> {
            let mut state = self.state.lock().await;

            if let Some(precondition) = &precondition {
                let passes = match precondition {
                    Precondition::KeyNotExists(key) => {
                        !(state.strings.contains_key(key)
                            || state.hashes.contains_key(key)
                            || state.sorted_sets.contains_key(key))
                    }
                    Precondition::HashFieldIn { key, field, allowed } => state
                        .hashes
                        .get(key)
                        .and_then(|h| h.get(field))
                        .is_some_and(|v| allowed.contains(v)),
                };
                if !passes {
                    return Ok(CommitOutcome::PreconditionFailed);
                }
            }

            for op in ops {
                match op {
                    WriteOp::Set { key, value } => {
                        state.strings.insert(key, value);
                    }
                    WriteOp::HsetMany { key, fields } => {
                        state.hashes.entry(key).or_default().extend(fields);
                    }
                    WriteOp::Del { key } => {
                        state.hashes.remove(&key);
                        state.strings.remove(&key);
                        state.sorted_sets.remove(&key);
                    }
                    WriteOp::Zadd { key, score, member } => {
                        state.sorted_sets.entry(key).or_default().insert(member, score);
                    }
                    WriteOp::Zrem { key, member } => {
                        if let Some(z) = state.sorted_sets.get_mut(&key) {
                            z.remove(&member);
                        }
                    }
                }
            }
            Ok(CommitOutcome::Committed)
        }
    }
}
