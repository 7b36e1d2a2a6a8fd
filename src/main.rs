//! # notready - NodeClaim garbage collector
//!
//! ## Startup Sequence
//!
//! 1. **Settings** - defaults, `--config` file, then CLI flags
//! 2. **Tracing** - `RUST_LOG` if set, otherwise the configured filter
//! 3. **Snapshot** - load NodeClaims and Nodes into the in-memory store
//! 4. **Controller** - reconcile every claim until Ctrl-C
//!
//! ## Shutdown
//!
//! Ctrl-C stops the controller. In-flight reconciles are cancelled and
//! pending requeues are dropped.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tap::Pipe;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use notready::cli::{Cli, Commands};
use notready::config::Settings;
use notready::report;
use notready::snapshot::Snapshot;
use notready_reconciler::{
    Clock, ClusterStore, Controller, EventMapper, InMemoryClusterStore, Reconciler, SystemClock,
    TracingClusterStore, WatchEvent,
};

/// Buffer for watch events between the feeder and the controller.
const EVENT_BUFFER: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::resolve(&cli.global).context("Failed to load settings")?;

    init_tracing(&settings.log_filter);
    info!(timeout = %settings.unreachable_timeout, "Configured timeout");

    match cli.command {
        Commands::Run { snapshot } => run(&settings, &snapshot).await,
        Commands::Check { snapshot } => check(&settings, &snapshot).await,
    }
}

/// Initialize tracing, letting `RUST_LOG` override the configured filter.
fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn load_store(path: &Path) -> Result<Arc<InMemoryClusterStore>> {
    let snapshot = Snapshot::load(path)
        .with_context(|| format!("Failed to load snapshot '{}'", path.display()))?;
    let store = InMemoryClusterStore::new_arc();
    snapshot.load_into(&store).await;
    Ok(store)
}

fn build_reconciler(settings: &Settings, store: Arc<dyn ClusterStore>) -> Result<Reconciler> {
    Reconciler::new(store, Arc::new(SystemClock), settings.reconciler_config())
        .context("Failed to build reconciler")
}

/// Run the controller over the snapshot until Ctrl-C.
async fn run(settings: &Settings, snapshot: &Path) -> Result<()> {
    let store = load_store(snapshot).await?;
    let traced: Arc<dyn ClusterStore> = Arc::new(TracingClusterStore::new(Arc::clone(&store)));

    let reconciler = build_reconciler(settings, Arc::clone(&traced))?.pipe(Arc::new);
    let controller = Controller::new(
        reconciler,
        EventMapper::new(Arc::clone(&traced)),
        settings.controller_config(),
    )
    .context("Failed to build controller")?;
    let handle = controller.handle();

    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let controller_task = tokio::spawn(async move { controller.run(events_rx).await });

    let claims = traced
        .list_node_claims()
        .await
        .context("Failed to list NodeClaims")?;
    for claim in &claims {
        if events_tx.send(WatchEvent::node_claim(claim)).await.is_err() {
            warn!("Controller stopped before all NodeClaims were queued");
            break;
        }
    }
    info!(queued = claims.len(), "Initial NodeClaims queued");

    signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    handle.stop();
    controller_task
        .await
        .context("Controller task failed")?;

    info!(
        remaining = store.node_claim_count().await,
        "NodeClaims remaining at shutdown"
    );
    Ok(())
}

/// Print what the controller would do, as JSON, without deleting anything.
async fn check(settings: &Settings, snapshot: &Path) -> Result<()> {
    let store = load_store(snapshot).await?;
    let reconciler = build_reconciler(settings, Arc::clone(&store) as Arc<dyn ClusterStore>)?;

    let reports = report::check(store.as_ref(), &reconciler, SystemClock.now())
        .await
        .context("Failed to assess NodeClaims")?;

    let rendered = serde_json::to_string_pretty(&reports).context("Failed to render report")?;
    println!("{rendered}");
    Ok(())
}
