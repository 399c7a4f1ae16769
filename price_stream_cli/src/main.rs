// price_stream: follow the shared price stream, log prices, connection statistics and,
// when a trade history is supplied, open-position profit.

use log::{info, warn};
use price_stream_core::{
    calculate_profits, ConnectionManager, StreamError, StreamSettings, TradeRecord,
};
use std::time::Duration;

type AppError = StreamError;

const STATS_LOG_INTERVAL_SECS: u64 = 30;

fn load_trades() -> Result<Vec<TradeRecord>, AppError> {
    match std::env::var("PRICE_STREAM_TRADES_PATH") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)?;
            let trades: Vec<TradeRecord> = serde_json::from_str(&raw)?;
            info!("Loaded {} trades from {}", trades.len(), path);
            Ok(trades)
        }
        Err(_) => Ok(Vec::new()),
    }
}

fn log_stats(manager: &ConnectionManager) {
    let stats = manager.get_statistics();
    let state = manager.connection_state();
    info!(
        "connected={} connections={} disconnections={} errors={} messages={} (session {}) heartbeats={} uptime={}s retries={} cached_prices={}",
        stats.is_connected,
        stats.total_connections,
        stats.disconnections,
        stats.connection_errors,
        stats.messages_received,
        stats.current_session_messages,
        stats.heartbeats_sent,
        stats.uptime_seconds,
        state.reconnect_attempts,
        manager.price_cache().len(),
    );
}

fn log_positions(trades: &[TradeRecord], manager: &ConnectionManager) {
    let profits = calculate_profits(trades, manager);
    let realized: f64 = profits.iter().filter_map(|p| p.profit).sum();
    // newest record per token carries the position left after all its trades
    let mut seen = std::collections::HashSet::new();
    let open: f64 = profits
        .iter()
        .filter(|p| seen.insert(p.token_address.as_str()))
        .map(|p| p.position_profit)
        .sum();
    info!(
        "positions: {} trades, realized {:.6} SOL, open {:.6} SOL",
        profits.len(),
        realized,
        open
    );
}

#[tokio::main(worker_threads = 2)]
async fn main() -> Result<(), AppError> {
    env_logger::init();
    println!(
        "price_stream starting (pid {}), RUST_LOG={:?}",
        std::process::id(),
        std::env::var("RUST_LOG").ok()
    );

    let config_path =
        std::env::var("PRICE_STREAM_CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let settings = StreamSettings::from_file(&config_path)?;
    let endpoint = settings.resolve_endpoint()?;
    let trades = load_trades()?;

    let manager = ConnectionManager::native(settings)?;
    manager.on_price_update(|update| info!("{} = {}", update.key, update.price));
    manager.initialize();
    manager.connect(&endpoint);
    info!("Streaming prices from {}", endpoint);

    let mut ticker = tokio::time::interval(Duration::from_secs(STATS_LOG_INTERVAL_SECS));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                log_stats(&manager);
                if !trades.is_empty() {
                    log_positions(&trades, &manager);
                }
            }
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
        }
    }

    info!("Shutting down");
    manager.disconnect();
    Ok(())
}
