//! Event consumer process
//!
//! Polls every configured source forever, storing new events and cursors in a
//! SQLite database. Start as many copies as needed against the same database
//! file; the lock table keeps them from processing the same batch twice.
//!
//! Usage:
//!   cargo run --release --bin consume_events
//!
//! Environment variables:
//!   EVENT_DB_PATH - SQLite database path (default: event_consumer.db)
//!   EVENT_SCHEMA_DIR - Directory of .sql schema files (default: sql)
//!   EVENT_SOURCES / EVENT_SOURCES_FILE - JSON list of {"name", "url"}
//!   MIN_REQUEST_INTERVAL_MS - Per-source throttle (default: 200)
//!   LOCK_TTL_SECS - Lock expiry (default: 30)
//!   ROUND_DELAY_MS - Pause between rounds (default: 1000)
//!   REDIS_URL - Keep locks and request times in Redis (multi-host runs)

use dotenv::dotenv;
use event_ingest::consumer::{
    db::{open_database, open_shared, run_schema_migrations},
    redis_store, ConsumerConfig, EventConsumer, LockService, RedisLockService, RedisRequestTimeStore,
    RequestTimeStore, SourceRegistry, SqliteEventStorage, SqliteLockService, SqliteRequestTimeStore,
};
use log::{error, info, warn};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize environment and logging
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 Starting event consumer process");

    let config = ConsumerConfig::from_env()?;

    info!("📊 Configuration:");
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Sources: {}", config.sources.len());
    info!("   ├─ Min request interval: {}ms", config.min_request_interval_ms);
    info!("   ├─ Lock TTL: {}s", config.lock_ttl_secs);
    info!(
        "   ├─ Coordination: {}",
        if config.redis_url.is_some() { "redis" } else { "sqlite" }
    );
    info!("   └─ Fetch timeout: {}ms (limit {})", config.fetch_timeout_ms, config.fetch_page_size);

    // Schema first, on a short-lived connection (idempotent)
    let mut conn = open_database(&config.db_path)?;
    run_schema_migrations(&mut conn, &config.schema_dir)?;
    drop(conn);

    let shared = open_shared(&config.db_path)?;
    info!("✅ Database initialized");

    let (locks, request_times): (Arc<dyn LockService>, Arc<dyn RequestTimeStore>) =
        match &config.redis_url {
            Some(url) => {
                let conn = redis_store::connect(url).await?;
                let lock_service = RedisLockService::new(conn.clone());
                info!("✅ Redis coordination ready (holder {})", lock_service.holder_id());
                let locks: Arc<dyn LockService> = Arc::new(lock_service);
                let times: Arc<dyn RequestTimeStore> = Arc::new(RedisRequestTimeStore::new(conn));
                (locks, times)
            }
            None => {
                let lock_service = SqliteLockService::new(shared.clone());
                match lock_service.purge_expired() {
                    Ok(0) => {}
                    Ok(n) => info!("🧹 Purged {} expired locks", n),
                    Err(e) => warn!("⚠️  Could not purge expired locks: {}", e),
                }
                info!("✅ SQLite coordination ready (holder {})", lock_service.holder_id());
                let locks: Arc<dyn LockService> = Arc::new(lock_service);
                let times: Arc<dyn RequestTimeStore> =
                    Arc::new(SqliteRequestTimeStore::new(shared.clone()));
                (locks, times)
            }
        };

    let mut consumer = EventConsumer::new(
        Arc::new(SqliteEventStorage::new(shared)),
        locks,
        request_times,
        config.settings(),
    );

    let client = reqwest::Client::builder().build()?;
    let registry = SourceRegistry::from_descriptors(client, &config.sources, &config.http_options())?;
    registry.register_all(&mut consumer);
    for descriptor in &config.sources {
        info!("   ├─ Registered source: {} ({})", descriptor.name, descriptor.url);
    }

    let shutdown = consumer.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("⚠️  Received CTRL+C, shutting down...");
                shutdown.cancel();
            }
            Err(err) => {
                error!("❌ Failed to listen for CTRL+C: {}", err);
            }
        }
    });

    consumer.run().await;

    info!("✅ Event consumer process stopped");
    Ok(())
}
