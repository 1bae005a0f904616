//! Shared application state handed to every Axum handler via `State`.

use chrono_tz::Tz;
use taskwire_broker::RedisBroker;
use taskwire_core::RedisStore;

/// `(app, queue)` are URL path parameters, not part of this state — a
/// [`taskwire_core::TaskQueue`] is constructed per request from the shared
/// store/broker connections plus the request's path params. Mirrors the
/// original `asynxd.apis.TaskQueue` subclass, which is instantiated fresh
/// inside each Flask view function rather than held as app-wide state.
#[derive(Clone)]
pub struct AppState {
    pub store: RedisStore,
    pub broker: RedisBroker,
    pub tz: Tz,
}

impl AppState {
    pub fn engine(&self, app: &str, queue: &str) -> taskwire_core::TaskQueue<RedisStore, RedisBroker> {
        taskwire_core::TaskQueue::with_timezone(self.store.clone(), self.broker.clone(), app, queue, self.tz)
    }
}
