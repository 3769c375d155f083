//! Video pipeline worker binary.

use std::sync::Arc;

use tracing::{error, info};

use vfactory_storage::gateway_from_env;
use vfactory_worker::logging::init_tracing;
use vfactory_worker::metrics::install_prometheus;
use vfactory_worker::{FileJobStore, JobExecutor, Pipeline, WorkerConfig};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting vfactory-worker");

    let config = WorkerConfig::from_env();
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        match install_prometheus(port) {
            Ok(()) => info!(port, "Serving Prometheus metrics"),
            Err(e) => error!("{}", e),
        }
    }

    let storage = match gateway_from_env(&config.output_folder).await {
        Ok(storage) => storage,
        Err(e) => {
            error!("Failed to set up storage: {}", e);
            std::process::exit(1);
        }
    };

    let store = match FileJobStore::open(&config.jobs_folder).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open job store at {}: {}", config.jobs_folder.display(), e);
            std::process::exit(1);
        }
    };

    let pipeline = match Pipeline::from_config(&config, store, storage) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("Failed to build pipeline: {}", e);
            std::process::exit(1);
        }
    };

    let executor = Arc::new(JobExecutor::new(config, pipeline));

    // Setup signal handlers
    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
