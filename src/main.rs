mod config;
mod node;
mod simulation;

use config::MeshConfig;
use soulmesh_metrics::MemorySink;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config = match MeshConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(2);
        }
    };
    info!(
        component = %config.component,
        started = %chrono::Utc::now().to_rfc3339(),
        "soulmesh starting"
    );

    let sink = Arc::new(MemorySink::new());
    let report = simulation::run(config, sink.clone()).await;
    report.print();

    info!(recorded = sink.records().len(), "metrics recorded");
    if !report.converged {
        error!("agents did not converge");
        std::process::exit(1);
    }
}
