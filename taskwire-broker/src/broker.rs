//! Redis-backed delayed job broker: an immediate-delivery list plus a
//! delayed-delivery sorted set, reaped onto the ready list once due.
//!
//! Grounded in `ferrex-server/src/stream/transcoding/worker.rs`'s job-queue
//! shape, generalized from an in-process `BinaryHeap` to a Redis sorted set
//! so delayed jobs survive a worker restart.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use taskwire_core::{Broker, BrokerError};
use tracing::debug;
use uuid::Uuid;

pub const READY_KEY: &str = "AX:BROKER:READY";
pub const DELAYED_KEY: &str = "AX:BROKER:DELAYED";

/// The `(app, queue, id)` triple spec.md's broker contract specifies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRef {
    pub app: String,
    pub queue: String,
    pub id: i64,
}

#[derive(Clone)]
pub struct RedisBroker {
    conn: ConnectionManager,
}

impl RedisBroker {
    pub async fn connect(redis_url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    /// Blocks up to `timeout` waiting for the next ready job; `None` on
    /// timeout, so workers can still observe shutdown signals between polls.
    pub async fn dequeue_ready(&self, timeout: Duration) -> Result<Option<JobRef>, BrokerError> {
        let mut conn = self.conn.clone();
        let reply: Option<(String, String)> =
            conn.brpop(READY_KEY, timeout.as_secs_f64()).await?;
        match reply {
            Some((_key, payload)) => Ok(Some(
                serde_json::from_str(&payload).map_err(|e| BrokerError::Codec(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    /// One reaper pass: moves delayed jobs whose fire time has passed onto
    /// the ready list. `zrem` before `lpush` so two concurrent reaper
    /// instances never both deliver the same job.
    pub async fn reap_due(&self) -> Result<usize, BrokerError> {
        let mut conn = self.conn.clone();
        let now = now_unix();
        let due: Vec<String> = conn.zrangebyscore(DELAYED_KEY, "-inf", now).await?;
        let mut moved = 0;
        for member in due {
            let removed: i64 = conn.zrem(DELAYED_KEY, &member).await?;
            if removed == 0 {
                continue;
            }
            let _: () = conn.lpush(READY_KEY, &member).await?;
            moved += 1;
        }
        if moved > 0 {
            debug!(moved, "reaped delayed jobs onto ready queue");
        }
        Ok(moved)
    }
}

fn now_unix() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[async_trait]
impl Broker for RedisBroker {
    async fn enqueue_now(&self, app: &str, queue: &str, id: i64) -> Result<String, BrokerError> {
        let mut conn = self.conn.clone();
        let job = JobRef {
            app: app.to_string(),
            queue: queue.to_string(),
            id,
        };
        let payload = serde_json::to_string(&job).map_err(|e| BrokerError::Codec(e.to_string()))?;
        let _: () = conn.lpush(READY_KEY, payload).await?;
        Ok(Uuid::new_v4().to_string())
    }

    async fn enqueue_after(
        &self,
        app: &str,
        queue: &str,
        id: i64,
        delay: Duration,
    ) -> Result<String, BrokerError> {
        let mut conn = self.conn.clone();
        let job = JobRef {
            app: app.to_string(),
            queue: queue.to_string(),
            id,
        };
        let payload = serde_json::to_string(&job).map_err(|e| BrokerError::Codec(e.to_string()))?;
        let fire_at = now_unix() + delay.as_secs_f64();
        let _: () = conn.zadd(DELAYED_KEY, payload, fire_at).await?;
        Ok(Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ref_round_trips_through_json() {
        let job = JobRef {
            app: "demo".to_string(),
            queue: "default".to_string(),
            id: 42,
        };
        let encoded = serde_json::to_string(&job).unwrap();
        let decoded: JobRef = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.app, job.app);
        assert_eq!(decoded.queue, job.queue);
        assert_eq!(decoded.id, job.id);
    }
}
