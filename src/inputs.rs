//! Request types and spawn polymorphism
//!
//! Both warm-up refills and claim-time spawns feed the object factory; the
//! [`SpawnTarget`] trait is the capability set the factory needs from
//! either. Durations on the wire use humantime strings (`"600s"`, `"1h"`).

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::labels::{self, LabelSet, LABEL_COMPONENT_NAME, LABEL_COMPONENT_TYPE, LABEL_POOL_ID, LABEL_TEST_ID};

/// Immutable template describing one component container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Image repository, e.g. `redis`
    pub repository: String,
    /// Image tag, e.g. `7-alpine`
    pub tag: String,
    /// Environment variables passed to the container
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Container arguments
    #[serde(default)]
    pub cmd: Vec<String>,
    /// Named ports exposed by the container
    #[serde(default)]
    pub port_bindings: BTreeMap<String, PortBinding>,
}

/// A single named port of a [`ContainerSpec`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortBinding {
    /// Port the container listens on
    pub container_port: i32,
    /// Transport protocol, `tcp` or `udp`
    pub protocol: String,
}

/// Capability set the object factory needs from a spawn request
pub trait SpawnTarget: Send + Sync {
    /// Pool the spawned pair belongs to
    fn pool_id(&self) -> &str;
    /// Component type, e.g. `mysql`
    fn component_type(&self) -> &str;
    /// Logical container name, usually `main`
    fn container_name(&self) -> &str;
    /// Container template to spawn from
    fn spec(&self) -> &ContainerSpec;
}

/// Internal spawn request used by warm-up refills
#[derive(Debug, Clone)]
pub struct WarmUpDeployment {
    /// Target pool
    pub pool_id: String,
    /// Component type from the built-in catalog
    pub component_type: String,
    /// Logical container name
    pub container_name: String,
    /// Catalog spec for the component type
    pub spec: ContainerSpec,
}

impl SpawnTarget for WarmUpDeployment {
    fn pool_id(&self) -> &str {
        &self.pool_id
    }

    fn component_type(&self) -> &str {
        &self.component_type
    }

    fn container_name(&self) -> &str {
        &self.container_name
    }

    fn spec(&self) -> &ContainerSpec {
        &self.spec
    }
}

/// Body of `POST /pool/warmup`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmUpInput {
    /// Pool to fill
    pub pool_id: String,
    /// Component type to replica count
    pub components: BTreeMap<String, u32>,
}

/// Body of `POST /pool/shutdown`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownInput {
    /// Pool to release entirely
    pub pool_id: String,
}

/// Body of `POST /run`: claim one service for a test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInput {
    /// Pool to claim from
    pub pool_id: String,
    /// Lease owner
    pub test_id: String,
    /// Human-readable test name, annotated onto the claimed pair
    #[serde(default)]
    pub test_name: String,
    /// Component type to claim
    pub component_type: String,
    /// Caller-assigned logical name for the claimed component
    pub component_name: String,
    /// Logical container name
    pub container_name: String,
    /// Spec used for the speculative refill spawn
    pub spec: ContainerSpec,
    /// Lease duration; the claimed pair expires this long after the claim
    #[serde(with = "humantime_serde")]
    pub expire_after: Duration,
}

impl RunInput {
    /// Labels identifying everything this test claimed in this pool
    pub fn labels(&self) -> LabelSet {
        LabelSet::from([
            (LABEL_POOL_ID.to_string(), labels::k8s_name(&[&self.pool_id])),
            (LABEL_TEST_ID.to_string(), labels::k8s_name(&[&self.test_id])),
            (LABEL_COMPONENT_TYPE.to_string(), labels::k8s_name(&[&self.component_type])),
            (LABEL_COMPONENT_NAME.to_string(), labels::k8s_name(&[&self.component_name])),
        ])
    }
}

impl SpawnTarget for RunInput {
    fn pool_id(&self) -> &str {
        &self.pool_id
    }

    fn component_type(&self) -> &str {
        &self.component_type
    }

    fn container_name(&self) -> &str {
        &self.container_name
    }

    fn spec(&self) -> &ContainerSpec {
        &self.spec
    }
}

/// Body of `POST /extend`: push back the lease deadline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtendInput {
    /// Pool the lease lives in
    pub pool_id: String,
    /// Lease owner
    pub test_id: String,
    /// New lease duration, measured from now
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

impl ExtendInput {
    /// Labels selecting every object of this test in this pool
    pub fn labels(&self) -> LabelSet {
        LabelSet::from([
            (LABEL_POOL_ID.to_string(), labels::k8s_name(&[&self.pool_id])),
            (LABEL_TEST_ID.to_string(), labels::k8s_name(&[&self.test_id])),
        ])
    }
}

/// Body of `POST /stop`: release everything a test claimed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopInput {
    /// Pool the lease lives in
    pub pool_id: String,
    /// Lease owner
    pub test_id: String,
}

impl StopInput {
    /// Labels selecting every object of this test in this pool
    pub fn labels(&self) -> LabelSet {
        LabelSet::from([
            (LABEL_POOL_ID.to_string(), labels::k8s_name(&[&self.pool_id])),
            (LABEL_TEST_ID.to_string(), labels::k8s_name(&[&self.test_id])),
        ])
    }
}
