//! Tidewire worker
//!
//! Consumes the `workflows` and `events` queues, sweeps pending deliveries, and serves the
//! admin API with Prometheus metrics.
//!
//! Configuration comes from an optional TOML file (`--config` / `TW_CONFIG`) overridden by
//! `TW_*` environment variables; see `tw-config`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tw_common::tracing::init_tracing;
use tw_config::{StoreBackend, TidewireConfig};
use tw_delivery::{AmqpSender, DeliveryPipeline, HttpSender, ProcessorDispatcher};
use tw_queue::AmqpBroker;
use tw_store::{MemoryStore, MongoStore, Store};
use tw_worker::{
    build_task_router, create_router, AdminState, HttpResponseGenerator, LifecycleConfig, LifecycleTasks,
    WorkerPool,
};

#[derive(Parser, Debug)]
#[command(name = "tw-worker", version, about = "Tidewire task queue worker")]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "TW_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = TidewireConfig::load(cli.config.as_deref())?;
    init_tracing(config.logging.json);

    match &cli.config {
        Some(path) => info!(config = %path.display(), "Starting Tidewire worker"),
        None => info!("Starting Tidewire worker with default configuration"),
    }

    let prometheus = PrometheusBuilder::new().install_recorder()?;

    match config.store.backend {
        StoreBackend::Memory => {
            warn!("Using the in-memory store; all state is lost on exit");
            run(Arc::new(MemoryStore::new()), config, prometheus).await
        }
        StoreBackend::Mongo => {
            let store = MongoStore::connect(&config.store.uri, &config.store.database).await?;
            info!(database = %config.store.database, "MongoDB store initialized");
            run(Arc::new(store), config, prometheus).await
        }
    }
}

async fn run<S>(store: Arc<S>, config: TidewireConfig, prometheus: PrometheusHandle) -> Result<()>
where
    S: Store + 'static,
{
    // 1. Broker connection, shared by the consumers and the task publisher
    let broker = Arc::new(
        AmqpBroker::connect(&config.broker.url, config.broker.prefetch, config.broker.durable_queues).await?,
    );
    let task_publisher = Arc::new(broker.publisher().await?);

    // 2. Delivery pipeline
    let dispatcher = Arc::new(ProcessorDispatcher::new(
        HttpSender::new(config.delivery.connect_timeout(), config.delivery.dispatch_timeout())?,
        Arc::new(AmqpSender::new(config.delivery.connect_timeout())),
    ));
    let pipeline = DeliveryPipeline::build(
        store.clone(),
        task_publisher,
        dispatcher,
        &config.delivery,
        config.worker.routes.clone(),
    );

    // 3. Worker pool
    let generator = Arc::new(HttpResponseGenerator::new(&config.ai)?);
    let router = build_task_router(&pipeline, store, generator, config.ai.context_window);
    let pool = Arc::new(WorkerPool::new(broker.clone(), router, &config.worker));
    pool.start().await?;

    // 4. Background loops
    let lifecycle = LifecycleTasks::start(
        pipeline.runner.clone(),
        pipeline.tracker.clone(),
        pool.clone(),
        LifecycleConfig::from_delivery(&config.delivery),
    );

    // 5. Admin API and metrics
    let app = create_router(AdminState { tracker: pipeline.tracker.clone(), pool: pool.clone() })
        .route("/metrics", axum::routing::get(move || std::future::ready(prometheus.render())))
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http.port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Admin API listening");

    let server_shutdown = CancellationToken::new();
    let server_handle = {
        let shutdown = server_shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
            {
                error!(error = %e, "Admin API server failed");
            }
        })
    };

    info!(
        queues = ?config.worker.queues,
        concurrency = config.worker.concurrency,
        "Tidewire worker started. Press Ctrl+C to shutdown."
    );

    shutdown_signal().await;
    info!("Shutdown signal received...");

    // Drain order: consumers, background loops, in-process fallbacks, then the HTTP server.
    let deadline = Instant::now() + config.worker.shutdown_timeout();
    let remaining = || deadline.saturating_duration_since(Instant::now());

    pool.stop(remaining()).await;
    lifecycle.shutdown(remaining()).await;
    if !pipeline.publisher.drain_fallbacks(remaining()).await {
        warn!(
            in_flight = pipeline.publisher.fallbacks_in_flight(),
            "In-process event fallbacks still running at shutdown"
        );
    }

    server_shutdown.cancel();
    if tokio::time::timeout(remaining(), server_handle).await.is_err() {
        warn!("Admin API did not stop in time");
    }

    if let Err(e) = broker.close().await {
        warn!(error = %e, "Broker connection close failed");
    }

    info!("Tidewire worker shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
}
