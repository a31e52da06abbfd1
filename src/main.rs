use escrow_cache::api::{self, AppState};
use escrow_cache::cache::BulkPolicy;
use escrow_cache::config::{Config, StoreBackend};
use escrow_cache::events;
use escrow_cache::onchain::{AlloyGateway, ChainGateway};
use escrow_cache::services::{ArbiterService, EscrowService, WalletService};
use escrow_cache::store::{CacheStore, MemoryStore, PgStore};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const CONFIG_FILE: &str = "escrow-cache.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Load config
    let config = if Path::new(CONFIG_FILE).exists() {
        Config::load(Path::new(CONFIG_FILE))?
    } else {
        Config::from_env()
    };

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }

    info!("escrow-cache v{} starting", env!("CARGO_PKG_VERSION"));

    let resolved = config.resolve()?;
    info!(
        registry = %resolved.arbiter_registry,
        factory = %resolved.escrow_factory,
        user_profile = %resolved.user_profile,
        "contract addresses loaded"
    );

    // --- Chain Gateway ---
    let alloy_gateway = AlloyGateway::connect(
        &config.chain.ws_url,
        resolved.arbiter_registry,
        resolved.escrow_factory,
    )
    .await?;
    let block = alloy_gateway.latest_block().await?;
    info!(block = block, "chain reachable");
    let gateway: Arc<dyn ChainGateway> = Arc::new(alloy_gateway);

    // --- Store ---
    let store: Arc<dyn CacheStore> = match config.database.backend {
        StoreBackend::Postgres => {
            let pg = PgStore::connect(&config.database.url, config.database.max_connections).await?;
            if config.database.ensure_schema {
                pg.ensure_schema().await?;
            }
            Arc::new(pg)
        }
        StoreBackend::Memory => {
            warn!("using in-memory store, cached data is lost on exit");
            Arc::new(MemoryStore::new())
        }
    };

    // --- Services ---
    let policy = BulkPolicy {
        continue_on_entity_error: config.sync.continue_on_entity_error,
    };
    let arbiters = Arc::new(
        ArbiterService::new(gateway.clone(), store.clone())
            .with_policy(policy)
            .with_probe_limit(config.sync.arbiter_probe_limit),
    );
    let escrow = Arc::new(
        EscrowService::new(gateway.clone(), store.clone(), arbiters.clone()).with_policy(policy),
    );
    let wallets = Arc::new(WalletService::new(
        escrow.clone(),
        arbiters.clone(),
        store.clone(),
    ));

    // --- Event Fan-in ---
    let cancel = CancellationToken::new();
    let (event_tx, event_rx) = events::event_channel(config.events.channel_capacity);
    let sink = events::spawn_sink(event_rx);
    let watchers = events::spawn_watchers(
        arbiters.clone(),
        escrow.clone(),
        cancel.clone(),
        event_tx,
    );

    // --- Initial Sync ---
    let initial_sync = if config.sync.on_startup {
        let arbiters = arbiters.clone();
        let escrow = escrow.clone();
        Some(tokio::spawn(async move {
            match arbiters.get_all_arbiters().await {
                Ok(outcome) => info!(
                    arbiters = outcome.len(),
                    skipped = outcome.skipped,
                    "initial arbiter sync complete"
                ),
                Err(e) => error!(error = %e, "initial arbiter sync failed"),
            }
            match escrow.get_all_deals().await {
                Ok(outcome) => info!(
                    deals = outcome.len(),
                    skipped = outcome.skipped,
                    "initial deal sync complete"
                ),
                Err(e) => error!(error = %e, "initial deal sync failed"),
            }
        }))
    } else {
        None
    };

    // --- API ---
    let state = AppState {
        wallets,
        escrow,
        arbiters,
    };
    let mut server = tokio::spawn(api::serve(state, resolved.bind, cancel.clone()));

    tokio::select! {
        result = &mut server => {
            match result {
                Ok(Ok(())) => warn!("API server exited"),
                Ok(Err(e)) => error!(error = %e, "API server failed"),
                Err(e) => error!(error = %e, "API server task panicked"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down...");
        }
    }

    cancel.cancel();
    if let Some(task) = initial_sync {
        task.abort();
    }

    let grace = Duration::from_secs(config.api.shutdown_grace_secs);
    if !server.is_finished() {
        match tokio::time::timeout(grace, &mut server).await {
            Ok(_) => info!("in-flight requests drained"),
            Err(_) => {
                warn!(grace_secs = grace.as_secs(), "shutdown grace period elapsed");
                server.abort();
            }
        }
    }

    for mut watcher in watchers {
        if tokio::time::timeout(grace, &mut watcher).await.is_err() {
            warn!("event watcher did not stop in time");
            watcher.abort();
        }
    }
    match sink.await {
        Ok(count) => info!(updates = count, "event sink drained"),
        Err(e) => error!(error = %e, "event sink task failed"),
    }

    info!("shutdown complete");
    Ok(())
}
