//! kubrun - warm pools of containerized test services on Kubernetes
//!
//! kubrun keeps pools of pre-provisioned auxiliary services (databases,
//! caches, object stores, HTTP mocks) running in a cluster namespace and
//! leases them to test runs over a small JSON API. Because an idle replica
//! is already up when a claim arrives, handing out a network address takes
//! milliseconds instead of a cold container start.
//!
//! # Architecture
//!
//! The process is stateless: every piece of pool state lives on the cluster
//! objects themselves as `kubrun/` labels and annotations. A claim flips an
//! idle workload+service pair to leased with a JSON-Patch; release and the
//! periodic expiry sweep delete pairs; a restart loses nothing.
//!
//! # Modules
//!
//! - [`labels`] - the label/annotation protocol and name sanitizer
//! - [`catalog`] - built-in component type to container spec map
//! - [`inputs`] - request types and the spawn capability trait
//! - [`factory`] - Deployment/Service builders for one pool replica
//! - [`kube_client`] - cluster API capability with conflict retry
//! - [`pool`] - per-pool claim/release/extend/expire state machine
//! - [`manager`] - pool registry and the expiry sweep
//! - [`expire`] - ticker-driven sweep worker
//! - [`server`] - axum routes for the JSON API
//! - [`config`] - cluster connection settings
//! - [`clock`] - injected clock for deterministic expiry
//! - [`retry`] - bounded backoff for conflicting writes
//! - [`error`] - error types

#![deny(missing_docs)]

pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod expire;
pub mod factory;
pub mod inputs;
pub mod kube_client;
pub mod labels;
pub mod manager;
pub mod pool;
pub mod retry;
pub mod server;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default period of the expiry sweep
pub const DEFAULT_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);
