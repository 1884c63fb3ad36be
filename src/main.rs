use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fleet_reporting::api::{build_router, AppState};
use fleet_reporting::app::Reporting;
use fleet_reporting::clients::{
    HttpDeploymentsClient, HttpDeviceAuthClient, HttpInventoryClient,
};
use fleet_reporting::config::Config;
use fleet_reporting::error::AppError;
use fleet_reporting::indexer::{start_pipeline, PipelineConfig, ReindexWorker, StreamConsumer};
use fleet_reporting::mapping::{Mapper, MongoMappingStore};
use fleet_reporting::store::{DocumentStore, OpenSearchStore};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "fleet-reporting")]
#[command(about = "Indexing and search service for device fleets", version)]
struct Cli {
    /// Configuration file. Supports JSON, TOML and YAML formatted configs.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API server
    Server {
        /// Run migrations before starting
        #[arg(long)]
        automigrate: bool,
    },
    /// Run the indexer process
    Indexer {
        /// Run migrations before starting
        #[arg(long)]
        automigrate: bool,
    },
    /// Run the migrations
    Migrate,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error loading configuration: {err}");
            std::process::exit(1);
        }
    };
    init_tracing(&config);

    let command = cli.command.unwrap_or(Command::Server { automigrate: false });
    let result = match command {
        Command::Server { automigrate } => cmd_server(config, automigrate).await,
        Command::Indexer { automigrate } => cmd_indexer(config, automigrate).await,
        Command::Migrate => cmd_migrate(config).await,
    };
    if let Err(err) = result {
        tracing::error!(error = %err, "fatal error");
        std::process::exit(1);
    }
}

fn init_tracing(config: &Config) {
    let default_filter = if config.debug_log {
        "fleet_reporting=debug,tower_http=debug"
    } else {
        "fleet_reporting=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

struct Components {
    store: Arc<OpenSearchStore>,
    mapping_store: Arc<MongoMappingStore>,
    mapper: Arc<Mapper>,
    worker: Arc<ReindexWorker>,
}

async fn build_components(config: &Config, automigrate: bool) -> Result<Components, AppError> {
    let store = Arc::new(OpenSearchStore::new(config)?);
    if automigrate {
        store.migrate().await?;
    }
    let mapping_store = Arc::new(MongoMappingStore::new(config).await?);
    let mapper = Arc::new(Mapper::new(mapping_store.clone()));

    let worker = Arc::new(ReindexWorker::new(
        store.clone(),
        mapper.clone(),
        Arc::new(HttpDeviceAuthClient::new(config.device_auth_addr.clone())),
        Arc::new(HttpInventoryClient::new(config.inventory_addr.clone())),
        Arc::new(HttpDeploymentsClient::new(config.deployments_addr.clone())),
    ));
    Ok(Components {
        store,
        mapping_store,
        mapper,
        worker,
    })
}

fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(sigterm) => sigterm,
                    Err(err) => {
                        tracing::error!(error = %err, "failed to install the SIGTERM handler");
                        return;
                    }
                };
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });
}

async fn cmd_server(config: Config, automigrate: bool) -> Result<(), AppError> {
    let components = build_components(&config, automigrate).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handler(shutdown_tx);

    let (jobs_tx, pipeline_handles) = start_pipeline(
        PipelineConfig::from(&config),
        components.worker.clone(),
        shutdown_rx.clone(),
    );

    let consumer = StreamConsumer::new(&config);
    let consumer_jobs = jobs_tx.clone();
    let consumer_shutdown = shutdown_rx.clone();
    let consumer_handle = tokio::spawn(async move {
        if let Err(err) = consumer.run(consumer_jobs, consumer_shutdown).await {
            tracing::error!(error = %err, "stream consumer failed");
        }
    });

    let reporting = Arc::new(Reporting::new(
        components.store,
        components.mapping_store,
        components.mapper,
        jobs_tx,
    ));
    let router = build_router(AppState::new(reporting));

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .map_err(|err| AppError::Internal(format!("listen: {err}")))?;
    tracing::info!(listen = %config.listen, "http server listening");

    let mut server_shutdown = shutdown_rx.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.changed().await;
            })
            .await
    });

    let mut shutdown = shutdown_rx;
    tokio::select! {
        result = &mut server => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    return Err(AppError::Internal(format!("http server error: {err}")));
                }
                Err(err) => {
                    return Err(AppError::Internal(format!("http server task failed: {err}")));
                }
            }
        }
        _ = shutdown.changed() => {
            tracing::info!("shutting down the server");
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut server).await.is_err() {
                tracing::warn!("graceful shutdown deadline exceeded");
                server.abort();
            }
        }
    }

    for handle in pipeline_handles {
        let _ = handle.await;
    }
    let _ = consumer_handle.await;
    Ok(())
}

async fn cmd_indexer(config: Config, automigrate: bool) -> Result<(), AppError> {
    let components = build_components(&config, automigrate).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handler(shutdown_tx);

    let (jobs_tx, pipeline_handles) = start_pipeline(
        PipelineConfig::from(&config),
        components.worker.clone(),
        shutdown_rx.clone(),
    );

    // the consumer runs in the foreground; a stream failure is fatal
    let consumer = StreamConsumer::new(&config);
    let result = consumer.run(jobs_tx, shutdown_rx).await;

    for handle in pipeline_handles {
        let _ = handle.await;
    }
    result
}

async fn cmd_migrate(config: Config) -> Result<(), AppError> {
    let store = OpenSearchStore::new(&config)?;
    store.migrate().await?;
    Ok(())
}
