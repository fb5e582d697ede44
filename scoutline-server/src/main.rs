//! # Scoutline Server
//!
//! Orchestrator process for attack-surface discovery jobs.
//!
//! Consumes job messages from RabbitMQ, expands each job into a tool
//! pipeline, runs it, and records job status in PostgreSQL. Pipeline state
//! lives in Redis. A small HTTP control plane exposes health and job
//! inspection endpoints.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use scoutline_config::{Config, ConfigLoad, ConfigLoader, ConfigLoaderOptions};
use scoutline_core::queue::{Dispatcher, QueueConsumer};
use scoutline_server::{
    AppState, create_app,
    infra::{
        amqp::AmqpSource,
        signal::shutdown_signal,
        startup::{build_registry, recover_orphans},
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "scoutline-server")]
#[command(about = "Discovery job orchestrator with an HTTP control plane")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Read settings from this env file instead of ./.env
    #[arg(long)]
    env_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mark RUNNING jobs left by a previous process as FAILED and exit
    Recover,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_runtime_config(&cli.serve)?;

    if let Some(Command::Recover) = cli.command {
        let registry = build_registry(&config)?;
        let recovered = registry
            .recover_orphaned_jobs()
            .await
            .context("orphaned job recovery failed")?;
        info!(count = recovered.len(), "recovery complete");
        return Ok(());
    }

    run_server(config).await
}

fn load_runtime_config(args: &ServeArgs) -> anyhow::Result<Config> {
    let ConfigLoad {
        mut config,
        env_file_loaded,
    } = ConfigLoader::with_options(ConfigLoaderOptions {
        env_file: args.env_file.clone(),
        ..ConfigLoaderOptions::default()
    })
    .load()
    .context("failed to load configuration")?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host.clone() {
        config.server.host = host;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Some(path) = env_file_loaded {
        info!(path = %path.display(), "loaded env file");
    }
    info!(config = %config.summary(), "configuration loaded");

    Ok(config)
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    let registry = build_registry(&config)?;

    if config.recover_on_start {
        recover_orphans(&registry).await;
    }

    let source = AmqpSource::connect(&config.queue.url, &config.queue.name)
        .await
        .context("failed to start queue consumer")?;
    let mut consumer = QueueConsumer::new(source, Dispatcher::for_registry(registry.clone()))
        .with_max_redeliveries(config.queue.max_redeliveries);

    let shutdown = CancellationToken::new();

    let listener = tokio::net::TcpListener::bind(config.server.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_address()))?;
    info!(address = %config.server.bind_address(), "control plane listening");

    let app = create_app(AppState::new(registry.clone()));
    let http_shutdown = shutdown.clone();
    let http = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(http_shutdown.cancelled_owned())
            .await
    });

    let consumer_shutdown = shutdown.clone();
    let consume = tokio::spawn(async move {
        consumer
            .run(consumer_shutdown.cancelled_owned())
            .await
    });

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_shutdown.cancel();
    });

    let consumer_result = consume.await.context("consumer task panicked")?;
    // A consumer that stops on its own (broker gone) takes the process down.
    shutdown.cancel();

    match &consumer_result {
        Ok(stats) => info!(
            acked = stats.acked,
            requeued = stats.requeued,
            rejected = stats.rejected,
            "queue consumer stopped"
        ),
        Err(err) => error!(error = %err, "queue consumer failed"),
    }

    match http.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "control plane stopped with error"),
        Err(err) => warn!(error = %err, "control plane task panicked"),
    }

    registry.shutdown().await;

    consumer_result
        .map(|_| ())
        .context("queue consumer stopped unexpectedly")
}
