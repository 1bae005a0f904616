//! `taskwire-worker`: standalone process draining the Redis broker's ready
//! queue and dispatching outbound HTTP calls. Runs alongside one or more
//! `taskwire-server` instances sharing the same Redis.

use std::path::PathBuf;

use clap::Parser;
use serde_json::json;
use taskwire_broker::{WorkerConfig, WorkerPool};
use taskwire_core::RedisStore;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "taskwire-worker")]
#[command(about = "Drains the taskwire broker and dispatches outbound HTTP task calls")]
struct Args {
    /// Path to a TOML config file, overriding TASKWIRE_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides `broker.worker_count`.
    #[arg(long, env = "WORKER_COUNT")]
    worker_count: Option<usize>,

    /// Overrides `redis.url`.
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let base = taskwire_config::load(args.config.as_deref())?;

    let mut broker_overlay = serde_json::Map::new();
    if let Some(worker_count) = args.worker_count {
        broker_overlay.insert("worker_count".to_string(), json!(worker_count));
    }
    let mut overlay = serde_json::Map::new();
    if !broker_overlay.is_empty() {
        overlay.insert("broker".to_string(), serde_json::Value::Object(broker_overlay));
    }
    if let Some(redis_url) = &args.redis_url {
        overlay.insert("redis".to_string(), json!({"url": redis_url}));
    }
    let config = taskwire_config::merge_cli(base, serde_json::Value::Object(overlay))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.filter.clone())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store = RedisStore::connect(&config.redis.url).await?;
    let broker = taskwire_broker::RedisBroker::connect(&config.redis.url).await?;

    let pool_config = WorkerConfig {
        worker_count: config.broker.worker_count,
        poll_timeout: config.broker.poll_timeout,
        reap_interval: config.broker.reap_interval,
    };
    let pool = WorkerPool::spawn(pool_config, broker, store);

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    pool.shutdown().await;

    Ok(())
}
