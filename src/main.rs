use cache::CacheStore;
use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use core_types::{OrderSide, TradeRecord};
use database::{DbRepository, connect, run_migrations};
use engine::SyncEngine;
use rust_decimal_macros::dec;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use venue_client::{SimVenue, VenueClient, sim::spawn_valuation_feed};
use web_server::AppState;

/// The main entry point for the Meridian position/PnL tracker.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file, if present.
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = configuration::load_config()?;

    // Initialize the database connection and run migrations.
    let db_pool = connect().await?;
    run_migrations(&db_pool).await?;
    let repo = DbRepository::new(db_pool);

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve => handle_serve(config, repo).await,
        Commands::SeedDemo => handle_seed_demo(config, repo).await,
    }
}

/// A real-time brokerage position and PnL tracking service.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reconciliation engine and the API server. Orders fill against
    /// the built-in simulated paper venue; a production gateway binding
    /// plugs in behind the same venue-client trait.
    Serve,
    /// Insert a small demo trade history for the DEMO account.
    SeedDemo,
}

async fn handle_serve(config: configuration::Config, repo: DbRepository) -> anyhow::Result<()> {
    let cache = Arc::new(CacheStore::new());

    let venue = Arc::new(SimVenue::new("PAPER"));
    spawn_valuation_feed(venue.clone(), Duration::from_secs(2));
    let venue: Arc<dyn VenueClient> = venue;

    let engine = Arc::new(SyncEngine::new(
        config.clone(),
        venue,
        repo.clone(),
        cache.clone(),
    ));
    let worker = engine.clone().spawn();

    let addr: SocketAddr = config.server.listen_addr.parse()?;
    let state = Arc::new(AppState::new(config, cache, engine.clone(), repo));

    tokio::select! {
        result = web_server::run_server(addr, state) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested.");
        }
    }

    // Let the engine fail pending order waiters and close the session.
    engine.stop();
    if tokio::time::timeout(Duration::from_secs(10), worker)
        .await
        .is_err()
    {
        tracing::warn!("Engine worker did not stop in time.");
    }
    Ok(())
}

/// Seeds a deterministic little MSFT history so the read endpoints have
/// something to show without a venue connection.
async fn handle_seed_demo(
    config: configuration::Config,
    repo: DbRepository,
) -> anyhow::Result<()> {
    let account_id = repo
        .upsert_account("DEMO", &config.account.base_currency)
        .await?;
    let now = Utc::now();

    let trades = [
        (OrderSide::Buy, dec!(10), dec!(410.0), now, "demo-1"),
        (
            OrderSide::Sell,
            dec!(5),
            dec!(420.0),
            now + ChronoDuration::days(1),
            "demo-2",
        ),
        (
            OrderSide::Buy,
            dec!(4),
            dec!(415.0),
            now + ChronoDuration::days(2),
            "demo-3",
        ),
    ];

    for (side, qty, price, trade_time, exec_id) in trades {
        let inserted = repo
            .insert_trade(
                account_id,
                &TradeRecord {
                    symbol: "MSFT".to_string(),
                    exchange: "NASDAQ".to_string(),
                    currency: "USD".to_string(),
                    side,
                    qty,
                    price,
                    commission: dec!(1.0),
                    realized_pnl: dec!(0.0),
                    trade_time,
                    venue_exec_id: Some(exec_id.to_string()),
                    perm_id: None,
                },
            )
            .await?;
        if !inserted {
            tracing::info!(exec_id, "Demo trade already present, skipping.");
        }
    }

    tracing::info!(account_id, "Demo data seeded.");
    Ok(())
}
