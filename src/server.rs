use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{RwLock, watch};
use tracing::{error, info, warn};

use exportbox::api::{self, AppState};
use exportbox::clock::{Clock, SystemClock};
use exportbox::config::Config;
use exportbox::handlers::{
    BatchExportHandler, ExportContext, HandlerRegistry, PollPolicy, SingleExportHandler,
};
use exportbox::ledger::FjallLedger;
use exportbox::observability::Metrics;
use exportbox::projects::FjallProjectStore;
use exportbox::provider::{HttpRenderProvider, RenderProvider};
use exportbox::queue::{ExportScheduler, FjallQueue, JobBroker, RetryPolicy};
use exportbox::storage::StorageClient;
use exportbox::worker::spawn_workers;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Start the worker pool, the scheduler promoter and the HTTP surface; return after shutdown
pub async fn run(config: Config, address: Option<SocketAddr>) -> Result<(), AnyError> {
    let address = address.unwrap_or(config.server.bind_addr);

    info!(path = %config.server.ledger_path().display(), "Opening ledger");
    let ledger = Arc::new(FjallLedger::open(config.server.ledger_path())?);

    info!(path = %config.server.projects_path().display(), "Opening project store");
    let projects = Arc::new(FjallProjectStore::open(config.server.projects_path())?);

    info!(path = %config.server.queue_path().display(), "Opening queue");
    let queue = Arc::new(RwLock::new(FjallQueue::open(config.server.queue_path())?));

    let provider = Arc::new(HttpRenderProvider::new(&config.provider)?);
    let artifacts = Arc::new(StorageClient::from_config(&config.storage)?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let metrics = Arc::new(Metrics::new());

    let ctx = ExportContext {
        projects: projects.clone(),
        ledger: ledger.clone(),
        provider,
        artifacts,
        clock: clock.clone(),
        metrics: metrics.clone(),
        polling: PollPolicy::from(&config.polling),
    };

    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(SingleExportHandler::new(ctx.clone())));
    registry.register(Arc::new(
        BatchExportHandler::new(ctx)
            .with_concurrency(config.batch.concurrency)
            .with_item_mode(config.batch.item_mode),
    ));
    info!(job_types = ?registry.job_types(), "Handlers registered");
    let registry = Arc::new(registry);

    let (broker, receivers) = JobBroker::new(
        queue.clone(),
        config.worker.num_workers,
        config.worker.channel_size,
    );
    let broker = Arc::new(broker);
    let scheduler = Arc::new(ExportScheduler::new(
        broker.clone(),
        RetryPolicy::from(&config.retry),
        clock.clone(),
        metrics.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let workers = spawn_workers(
        receivers,
        registry,
        broker.clone(),
        scheduler.clone(),
        clock.clone(),
        shutdown_rx.clone(),
    );
    info!(num_workers = workers.len(), "Workers started");

    broker.redeliver_pending().await?;
    let promoter = scheduler
        .clone()
        .spawn_promoter(config.worker.promote_interval.as_duration(), shutdown_rx);

    let state = AppState::new(
        ledger.clone(),
        broker,
        scheduler,
        metrics,
        clock,
        config.server.max_payload_bytes.as_u64() as usize,
    );
    let app = api::router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "exportbox listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // In-flight exports finish; queued ones stay persisted for the next start
    if shutdown_tx.send(true).is_err() {
        warn!("No workers left to notify");
    }
    for handle in workers {
        if let Err(e) = handle.await {
            error!(error = %e, "Worker task panicked");
        }
    }
    if let Err(e) = promoter.await {
        error!(error = %e, "Promoter task panicked");
    }

    ledger.persist()?;
    projects.persist()?;
    queue.read().await.flush()?;
    info!("Shutdown complete");

    Ok(())
}

/// Print the formats the configured render provider accepts
pub async fn formats(config: Config) -> Result<(), AnyError> {
    let provider = HttpRenderProvider::new(&config.provider)?;
    for format in provider.supported_formats().await? {
        println!("{}", format);
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
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
    info!("Shutdown signal received");
}
