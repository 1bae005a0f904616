//! Redis-backed delayed job broker, worker pool, and task runner.
//!
//! `taskwire-core` defines the `Broker` trait the engine depends on; this
//! crate supplies the concrete Redis implementation plus the consumer side
//! (worker pool + HTTP task runner) that drains it. See SPEC_FULL.md §4.6.

pub mod broker;
pub mod runner;
pub mod worker;

pub use broker::{JobRef, RedisBroker, DELAYED_KEY, READY_KEY};
pub use runner::TaskRunner;
pub use worker::{WorkerConfig, WorkerPool};
