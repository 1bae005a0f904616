use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use serde_json::json;
use taskwire_broker::RedisBroker;
use taskwire_core::RedisStore;
use taskwire_server::AppState;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "taskwire-server")]
#[command(about = "HTTP facade for the taskwire task queue")]
struct Args {
    /// Path to a TOML config file, overriding TASKWIRE_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides `server.host`.
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,

    /// Overrides `server.port`.
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Overrides `redis.url`.
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let base = taskwire_config::load(args.config.as_deref())?;

    let mut server_overlay = serde_json::Map::new();
    if let Some(host) = &args.host {
        server_overlay.insert("host".to_string(), json!(host));
    }
    if let Some(port) = args.port {
        server_overlay.insert("port".to_string(), json!(port));
    }
    let mut overlay = serde_json::Map::new();
    if !server_overlay.is_empty() {
        overlay.insert("server".to_string(), serde_json::Value::Object(server_overlay));
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

    let tz = config.timezone()?;
    info!(timezone = %tz, "schedules will be evaluated in this timezone");

    let store = RedisStore::connect(&config.redis.url).await?;
    let broker = RedisBroker::connect(&config.redis.url).await?;
    let state = AppState { store, broker, tz };

    let mut app = taskwire_server::router(state).layer(TraceLayer::new_for_http());
    if config.server.cors_permissive {
        app = app.layer(CorsLayer::permissive());
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!(%addr, "taskwire-server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
