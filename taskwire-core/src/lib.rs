//! Task lifecycle engine: data model, schedule grammar, key derivation, the
//! store/broker adapter traits, and the `TaskQueue` engine that ties them
//! together. See `SPEC_FULL.md` for the full component design.

pub mod broker;
pub mod codec;
pub mod engine;
pub mod error;
pub mod keymap;
pub mod schedule;
pub mod store;
pub mod task;

pub use broker::Broker;
pub use engine::{TaskQueue, MAX_LIST_LIMIT};
pub use error::{BrokerError, CodecError, EngineError, ScheduleError, StoreError};
pub use keymap::KeyMap;
pub use schedule::{CronSpec, Schedule};
pub use store::{commit_with_retry, CommitOutcome, Precondition, RedisStore, Store, WriteOp};
pub use task::{Callback, Method, NewTask, Request, Status, Task};
