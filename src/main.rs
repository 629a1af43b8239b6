use std::sync::Arc;

use tracing::info;

use roomkeep::compactor::compact_if_needed;
use roomkeep::config::Config;
use roomkeep::engine::Engine;
use roomkeep::notify::NotifyHub;

/// Maintenance run: replay the WAL, report per-hotel state, compact past the threshold, exit.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    std::fs::create_dir_all(&config.data_dir)?;
    info!("roomkeep maintenance");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  zone: {}", config.zone());
    info!("  lock_timeout: {:?}", config.lock_timeout);
    info!("  compact_threshold: {}", config.compact_threshold);

    let engine = Engine::with_options(
        config.wal_path(),
        Arc::new(NotifyHub::new()),
        config.engine_options(),
    )?;

    let summaries = engine.hotel_summaries().await?;
    if summaries.is_empty() {
        info!("no hotels registered");
    }
    for s in &summaries {
        info!(
            "hotel {} ({}): {} rooms, {} active bookings, {} blocks, ledger net {}",
            s.name, s.hotel_id, s.rooms, s.active_bookings, s.blocks, s.ledger.net
        );
    }

    if !compact_if_needed(&engine, config.compact_threshold).await {
        info!(
            "WAL left as is ({} appends, threshold {})",
            engine.wal_appends_since_compact().await,
            config.compact_threshold
        );
    }
    Ok(())
}
