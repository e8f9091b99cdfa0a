//! Airdrop Executor - batched NFT airdrops on Stacks
//!
//! Watches the chain for new blocks and, on each one, submits as many
//! contract calls as the sender's mempool backlog allows, moving recipients
//! from the pending queue to the completed log as their batches are accepted.

use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

mod api;
mod chain;
mod config;
mod error;
mod events;
mod executor;
mod metrics;
mod state;
mod tx;

use chain::{BlockListener, ChainApi, StacksApi};
use config::Settings;
use error::AirdropResult;
use events::BlockEvent;
use executor::{Executor, RunOutcome};
use metrics::MetricsServer;
use state::{FileQueueStore, QueueStore};
use tx::{ContractTarget, RemoteSigner};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Airdrop Executor v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    let network = settings.network.network()?;
    let timeout = Duration::from_secs(settings.network.request_timeout_secs);

    // Chain indexer
    let api_url = settings.network.api_url()?;
    let stacks = Arc::new(StacksApi::new(&api_url, timeout)?);
    if !stacks.health_check().await {
        info!("Indexer at {} not reachable yet, continuing", api_url);
    }
    let chain_api: Arc<dyn ChainApi> = stacks;

    // Signing service resolves the sender
    let signer = Arc::new(
        RemoteSigner::connect(&settings.signer, settings.executor.account_index, timeout).await?,
    );
    let address = signer.address().to_string();

    // Recipient queue
    let store = Arc::new(FileQueueStore::open(&settings.queue).await?);
    let completed = store.load_completed().await?.len();

    let target = ContractTarget {
        address: settings
            .contract
            .address
            .clone()
            .unwrap_or_else(|| address.clone()),
        name: settings.contract.name.clone(),
        function: settings.contract.function.clone(),
    };

    info!("- Network: {} ({})", network, api_url);
    info!("- Address: {}", address);
    info!(
        "- Contract: {}.{}::{}",
        target.address, target.name, target.function
    );
    info!("- Fee: {}", settings.executor.fee);
    info!("- Batch size: {}", settings.executor.batch_size);
    info!("- Max pending TX: {}", settings.executor.max_pending_tx);
    info!("- Already completed: {}", completed);

    let executor = Arc::new(Executor::new(
        settings.executor.clone(),
        address,
        target,
        chain_api.clone(),
        signer,
        store,
    )?);

    // Start API server
    let api_handle = if settings.api.enabled {
        let state = api::AppState::new(executor.clone(), network.to_string());
        let config = settings.api.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Capacity 1: blocks arriving during a run collapse into a single follow-up run
    let (trigger_tx, trigger_rx) = mpsc::channel(1);
    let listener = Arc::new(BlockListener::new(
        chain_api,
        Duration::from_millis(settings.listener.poll_interval_ms),
        trigger_tx,
    ));
    let listener_handle = tokio::spawn({
        let listener = listener.clone();
        async move { listener.listen().await }
    });

    let mut driver = tokio::spawn(drive(executor.clone(), trigger_rx));

    info!("Airdrop Executor is running");
    if settings.api.enabled {
        info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    }
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    let exit = tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping...");
            Ok(())
        }
        result = &mut driver => match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(anyhow!(e).context("executor stopped")),
            Err(e) => Err(anyhow!("executor task failed: {}", e)),
        },
    };

    // Graceful shutdown
    listener.stop().await;

    // Abort background tasks
    driver.abort();
    listener_handle.abort();
    if let Some(h) = api_handle {
        h.abort();
    }
    if let Some(h) = metrics_handle {
        h.abort();
    }

    let status = executor.status().await;
    info!(
        "Airdrop Executor stopped: {} recipients committed this session, drained: {}",
        status.committed_this_session, status.drained
    );
    exit
}

/// Runs the executor once per block notification until a fatal error
async fn drive(executor: Arc<Executor>, mut triggers: mpsc::Receiver<BlockEvent>) -> AirdropResult<()> {
    while let Some(block) = triggers.recv().await {
        info!("Block {}", block.label());

        match executor.run().await {
            Ok(RunOutcome::Drained { broadcasts }) if broadcasts > 0 => {
                info!("Queue drained after {} broadcasts", broadcasts);
            }
            Ok(outcome) => debug!("Run finished: {:?}", outcome),
            Err(e) if e.is_fatal() => return Err(e),
            Err(_) => {}
        }
    }

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,airdrop_executor=debug,hyper=warn,reqwest=warn")
    });

    let registry = tracing_subscriber::registry().with(filter);
    if std::env::var_os("AIRDROP_LOG_JSON").is_some() {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
