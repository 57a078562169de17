//! Cluster connection settings
//!
//! The client connects either with ambient pod identity (`in-cluster`) or
//! from a local kubeconfig (`kube-config`, honoring a context override).
//! Settings failures are fatal at startup.

use std::time::Duration;

use kube::config::KubeConfigOptions;
use kube::{Client, Config};

use crate::error::Error;
use crate::retry::RetryConfig;
use crate::Result;

/// Namespace used when none is configured
pub const DEFAULT_NAMESPACE: &str = "justdev";

/// Connection timeout for the API server (local or in-cluster, 5s is plenty)
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Read timeout for API server responses
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// How the kube client authenticates
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ClientMode {
    /// Ambient pod identity (service account token)
    InCluster,
    /// Local kubeconfig file
    KubeConfig,
}

/// Settings consumed by the cluster client
#[derive(Debug, Clone)]
pub struct KubeSettings {
    /// Authentication mode
    pub client_mode: ClientMode,
    /// Kubeconfig context override, `kube-config` mode only
    pub context_name: Option<String>,
    /// Namespace all pool objects live in
    pub namespace: String,
    /// Backoff applied to conflicting writes
    pub backoff: RetryConfig,
}

/// Connect to the cluster according to the settings.
pub async fn create_client(settings: &KubeSettings) -> Result<Client> {
    let mut config = match settings.client_mode {
        ClientMode::InCluster => Config::incluster()
            .map_err(|e| Error::configuration(format!("could not load in cluster config: {e}")))?,
        ClientMode::KubeConfig => {
            let options = KubeConfigOptions {
                context: settings.context_name.clone(),
                ..Default::default()
            };
            Config::from_kubeconfig(&options)
                .await
                .map_err(|e| Error::configuration(format!("could not load kube config: {e}")))?
        }
    };

    config.connect_timeout = Some(CONNECT_TIMEOUT);
    config.read_timeout = Some(READ_TIMEOUT);

    Client::try_from(config)
        .map_err(|e| Error::configuration(format!("could not create client: {e}")))
}
