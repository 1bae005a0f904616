//! The `Broker` trait: enqueue primitives consumed by [`crate::engine::TaskQueue::add_task`]'s
//! internal dispatch step.
//!
//! Defined here rather than in `taskwire-broker` so the engine can depend on
//! it without a reverse crate dependency; `taskwire-broker` provides the
//! concrete Redis-backed delayed-queue implementation plus the worker pool
//! that drains it (see SPEC_FULL.md §4.6).

use std::time::Duration;

use async_trait::async_trait;

use crate::error::BrokerError;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Enqueues `(app, queue, id)` for immediate delivery, returning a
    /// broker-assigned opaque job identifier.
    async fn enqueue_now(&self, app: &str, queue: &str, id: i64) -> Result<String, BrokerError>;

    /// Enqueues `(app, queue, id)` for delivery no sooner than `delay` from
    /// now, returning a broker-assigned opaque job identifier.
    async fn enqueue_after(
        &self,
        app: &str,
        queue: &str,
        id: i64,
        delay: Duration,
    ) -> Result<String, BrokerError>;
}
