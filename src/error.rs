//! Error types for kubrun

use thiserror::Error;

/// Main error type for pool operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Settings or cluster-connection error, fatal at startup
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Permanent cluster-side failure, surfaced to the caller
    #[error("{0}")]
    Cluster(String),

    /// Invalid caller input (e.g. a claim against a drained pool)
    #[error("input error: {0}")]
    Input(String),
}

impl Error {
    /// Create a configuration error with the given message
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a cluster error with the given message
    pub fn cluster(msg: impl Into<String>) -> Self {
        Self::Cluster(msg.into())
    }

    /// Create an input error with the given message
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }
}
