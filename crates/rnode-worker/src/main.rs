//! Render node worker binary.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rnode_api::{ApiClient, ApiConfig};
use rnode_models::PROTOCOL_VERSION;
use rnode_queue::{AmqpBroker, QueueConfig};
use rnode_render::{ProcessRenderEngine, RenderEngineConfig};
use rnode_worker::{
    metrics, AssignmentProcessor, ProcessorSettings, QueueSupervisor, SupervisorSettings,
    TexturePackCache, WorkerConfig,
};

/// Exit status when the coordinator cannot be reached at startup.
const EXIT_NO_SERVICE_INFO: i32 = 1;
/// Exit status when the coordinator speaks a newer protocol.
const EXIT_UPDATE_REQUIRED: i32 = 42;

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting rnode-worker (protocol version {})", PROTOCOL_VERSION);

    if let Err(e) = run().await {
        error!("Worker failed: {:#}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

fn init_tracing() {
    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("rnode=info".parse().expect("static directive"))
        .add_directive("lapin=warn".parse().expect("static directive"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

async fn run() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        metrics::init_metrics(addr).context("failed to start metrics exporter")?;
        info!("Prometheus metrics listening on {}", addr);
    }

    let api = ApiClient::new(ApiConfig::from_env()?).context("failed to create API client")?;

    let service_info = match api.get_info().await {
        Ok(info) => info,
        Err(e) => {
            error!("Could not fetch render service info: {}", e);
            std::process::exit(EXIT_NO_SERVICE_INFO);
        }
    };
    if service_info.requires_update() {
        error!(
            "Update required: coordinator speaks protocol {}, this worker speaks {}",
            service_info.protocol_version, PROTOCOL_VERSION
        );
        std::process::exit(EXIT_UPDATE_REQUIRED);
    }

    tokio::fs::create_dir_all(&config.job_dir)
        .await
        .with_context(|| format!("failed to create job directory {}", config.job_dir.display()))?;

    let engine = ProcessRenderEngine::new(RenderEngineConfig::from_env());
    match engine.check_available() {
        Ok(path) => info!("Using render engine at {}", path.display()),
        Err(e) => warn!("{}; renders will fail until it is installed", e),
    }

    let processor = AssignmentProcessor::new(
        api,
        Arc::new(engine),
        TexturePackCache::new(&config.texture_pack_dir),
        ProcessorSettings::from(&config),
    );

    let broker = AmqpBroker::new(
        QueueConfig::new(service_info.queue_uri)
            .with_queue_name(&config.queue_name)
            .with_prefetch(config.prefetch())
            .with_worker_name(config.worker_name.clone())
            .with_protocol_version(PROTOCOL_VERSION),
    );

    let shutdown = CancellationToken::new();
    let supervisor = QueueSupervisor::new(
        broker,
        Arc::new(processor),
        SupervisorSettings::from(&config),
        shutdown.clone(),
    );

    // Setup signal handler
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        shutdown.cancel();
    });

    supervisor.run().await;
    Ok(())
}
