//! kubrun - warm pools of containerized test services on Kubernetes

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kubrun::clock::SystemClock;
use kubrun::config::{create_client, ClientMode, KubeSettings, DEFAULT_NAMESPACE};
use kubrun::factory::PodPlacement;
use kubrun::kube_client::KubeClientImpl;
use kubrun::manager::ServicePoolManager;
use kubrun::retry::RetryConfig;
use kubrun::{expire, server};

/// Pool manager for containerized test services
#[derive(Parser, Debug)]
#[command(name = "kubrun", version, about, long_about = None)]
struct Cli {
    /// HTTP listen address
    #[arg(long, default_value = "0.0.0.0:8080", env = "KUBRUN_LISTEN_ADDR")]
    listen_addr: SocketAddr,

    /// How to authenticate against the cluster
    #[arg(long, value_enum, default_value = "in-cluster", env = "KUBRUN_CLIENT_MODE")]
    client_mode: ClientMode,

    /// Kubeconfig context override (kube-config mode only)
    #[arg(long, env = "KUBRUN_CONTEXT_NAME")]
    context_name: Option<String>,

    /// Namespace the pools live in
    #[arg(long, default_value = DEFAULT_NAMESPACE, env = "KUBRUN_NAMESPACE")]
    namespace: String,

    /// Seconds between expiry sweeps
    #[arg(long, default_value = "60", env = "KUBRUN_SWEEP_INTERVAL_SECS")]
    sweep_interval_secs: u64,

    /// Max attempts for conflicting cluster writes
    #[arg(long, default_value = "3", env = "KUBRUN_WRITE_MAX_ATTEMPTS")]
    write_max_attempts: u32,

    /// Pod placement settings as JSON: {"node_selector": {...}, "tolerations": [...]}
    #[arg(long, env = "KUBRUN_PLACEMENT", value_parser = parse_placement)]
    placement: Option<PodPlacement>,
}

fn parse_placement(raw: &str) -> Result<PodPlacement, String> {
    serde_json::from_str(raw).map_err(|e| format!("invalid placement settings: {e}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let settings = KubeSettings {
        client_mode: cli.client_mode,
        context_name: cli.context_name.clone(),
        namespace: cli.namespace.clone(),
        backoff: RetryConfig::with_max_attempts(cli.write_max_attempts),
    };

    let client = create_client(&settings).await?;
    let kube = Arc::new(KubeClientImpl::new(
        client,
        settings.namespace.clone(),
        settings.backoff.clone(),
    ));

    let manager = Arc::new(ServicePoolManager::with_placement(
        kube,
        Arc::new(SystemClock),
        cli.placement.unwrap_or_default(),
    ));

    let shutdown = CancellationToken::new();
    let worker = tokio::spawn(expire::run(
        manager.clone(),
        Duration::from_secs(cli.sweep_interval_secs),
        shutdown.clone(),
    ));

    let listener = tokio::net::TcpListener::bind(cli.listen_addr).await?;
    info!(addr = %cli.listen_addr, namespace = %settings.namespace, "kubrun listening");

    axum::serve(listener, server::router(manager))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    shutdown.cancel();
    worker.await.ok();

    Ok(())
}
