//! MariaDB Operator Entry Point
//!
//! Starts the Kubernetes controller and the metrics/probe server.

use std::sync::Arc;

use clap::Parser;
use mariadb_k8s::{config::OperatorConfig, controller, telemetry, Error};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = OperatorConfig::parse();
    telemetry::init_tracing(&config)?;

    info!(
        "Starting MariaDB Operator v{} ({}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_SHA"),
        env!("BUILD_DATE")
    );

    let client = kube::Client::try_default().await.map_err(Error::KubeError)?;
    info!("Connected to Kubernetes cluster");

    match &config.namespace {
        Some(namespace) => info!("Watching namespace: {}", namespace),
        None => info!("Watching all namespaces"),
    }

    let state = Arc::new(controller::ControllerState {
        client,
        namespace: config.namespace.clone(),
        settings: config.pass_settings(),
        recoveries: controller::RecoveryRegistry::new(),
    });

    #[cfg(feature = "metrics")]
    let on_ready = {
        let readiness = mariadb_k8s::server::Readiness::default();
        let addr = config.metrics_addr;
        let server_readiness = readiness.clone();
        tokio::spawn(async move {
            if let Err(e) = mariadb_k8s::server::run_server(addr, server_readiness).await {
                tracing::error!("Metrics server error: {:?}", e);
            }
        });
        move || readiness.mark_ready()
    };
    #[cfg(not(feature = "metrics"))]
    let on_ready = || {};

    // Run the main controller loop
    let result = controller::run_controller(state, on_ready).await;

    // Flush any remaining traces
    telemetry::shutdown_telemetry();

    result
}
