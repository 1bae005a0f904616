use thiserror::Error;

/// Errors surfaced by the Redis-backed [`crate::store::Store`] adapter.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A watched key changed between the optimistic read and the commit.
    ///
    /// Some callers (notably `add_task`'s cname uniqueness check) want this
    /// surfaced directly rather than retried; others (`_update_status`,
    /// delete) retry transparently. See [`crate::engine::TaskQueue`].
    #[error("a watched key was modified before the transaction could commit")]
    Contention,
}

/// Errors surfaced by a [`crate::engine::Broker`] implementation.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("broker job payload could not be encoded or decoded: {0}")]
    Codec(String),
}

/// Errors surfaced by [`crate::schedule::Schedule`] parsing and evaluation.
#[derive(Error, Debug, PartialEq, Eq, Clone)]
pub enum ScheduleError {
    #[error("schedule string did not match the interval or cron grammar: {0}")]
    Parse(String),

    #[error("cron field out of range: {0}")]
    FieldOutOfRange(String),

    #[error("schedule has no satisfiable firing time within the search horizon")]
    Unsatisfiable,
}

/// Errors surfaced by task field encode/decode.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for field {field}: {detail}")]
    InvalidField {
        field: &'static str,
        detail: String,
    },
}

/// Errors surfaced by the [`crate::engine::TaskQueue`] engine.
///
/// Mirrors spec's `TaskNotFound` / `TaskAlreadyExists` / `TaskStatusNotMatched`
/// / `TaskCNameRequired` kinds, plus the store/codec/schedule errors that can
/// bubble up through them.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("task \"{0}\" does not exist")]
    TaskNotFound(String),

    #[error("task \"{0}\" already exists")]
    TaskAlreadyExists(String),

    #[error("task \"{0}\" status did not match expectations")]
    TaskStatusNotMatched(String),

    #[error("a recurring task (schedule set) requires a cname")]
    TaskCNameRequired,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}
