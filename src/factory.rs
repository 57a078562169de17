//! Object factory for workload+service pairs
//!
//! Builds the single-replica Deployment and the ClusterIP Service that make
//! up one pool replica. Both carry the same name and label/annotation set;
//! the Service selects the Deployment's pods through the `uid` label, so
//! the pairing holds by construction.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Duration;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, ResourceRequirements, Service,
    ServicePort, ServiceSpec, Toleration,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::Deserialize;

use crate::clock::{self, Clock};
use crate::inputs::SpawnTarget;
use crate::labels::{
    k8s_name, LabelSet, ANNOTATION_COMPONENT_TYPE, ANNOTATION_CONTAINER_NAME,
    ANNOTATION_EXPIRE_AFTER, LABEL_COMPONENT_TYPE, LABEL_CONTAINER_NAME, LABEL_IDLE,
    LABEL_POOL_ID, LABEL_UID,
};

/// Fresh pairs start with a one-hour lease; a claim rewrites it.
const WARM_UP_TTL_HOURS: i64 = 1;

/// CPU request for every spawned container
const CPU_REQUEST: &str = "300m";
/// Memory request for every spawned container
const MEMORY_REQUEST: &str = "300Mi";

/// Scheduling constraints applied to every spawned pod
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PodPlacement {
    /// Node selector; backslashes in keys are stripped
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    /// Tolerations for tainted nodes
    #[serde(default)]
    pub tolerations: Vec<PlacementToleration>,
}

/// One toleration entry of [`PodPlacement`]
#[derive(Debug, Clone, Deserialize)]
pub struct PlacementToleration {
    /// Taint key
    pub key: String,
    /// Match operator
    #[serde(default = "default_toleration_operator")]
    pub operator: String,
    /// Taint value
    #[serde(default)]
    pub value: String,
    /// Taint effect, e.g. `NoSchedule`
    #[serde(default)]
    pub effect: String,
}

fn default_toleration_operator() -> String {
    "Equal".to_string()
}

/// Builds the cluster objects for one workload+service pair
#[derive(Clone)]
pub struct ObjectFactory {
    placement: PodPlacement,
    clock: Arc<dyn Clock>,
}

impl ObjectFactory {
    /// Create a factory with the given placement settings and clock
    pub fn new(placement: PodPlacement, clock: Arc<dyn Clock>) -> Self {
        Self { placement, clock }
    }

    /// Shared object name of the pair: `p-<pool>-<uid>-<type>-<container>`
    pub fn object_name(uid: &str, input: &dyn SpawnTarget) -> String {
        k8s_name(&[
            "p",
            input.pool_id(),
            uid,
            input.component_type(),
            input.container_name(),
        ])
    }

    /// Build the single-replica Deployment for a fresh idle pair
    pub fn deployment(&self, uid: &str, input: &dyn SpawnTarget) -> Deployment {
        let selector = pair_selector(uid, input);

        Deployment {
            metadata: self.object_meta(uid, input),
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(selector.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(selector),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![self.container(input)],
                        node_selector: self.node_selector(),
                        tolerations: self.tolerations(),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Build the ClusterIP Service routing to the pair's pod
    pub fn service(&self, uid: &str, input: &dyn SpawnTarget) -> Service {
        let ports = input
            .spec()
            .port_bindings
            .iter()
            .map(|(port_name, binding)| ServicePort {
                name: Some(k8s_name(&[port_name])),
                protocol: Some(binding.protocol.to_uppercase()),
                port: binding.container_port,
                target_port: Some(IntOrString::String(k8s_name(&[port_name]))),
                ..Default::default()
            })
            .collect();

        Service {
            metadata: self.object_meta(uid, input),
            spec: Some(ServiceSpec {
                selector: Some(pair_selector(uid, input)),
                ports: Some(ports),
                type_: Some("ClusterIP".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn object_meta(&self, uid: &str, input: &dyn SpawnTarget) -> ObjectMeta {
        let mut object_labels = pair_selector(uid, input);
        object_labels.insert(LABEL_IDLE.to_string(), "true".to_string());

        let expire_after = self.clock.now() + Duration::hours(WARM_UP_TTL_HOURS);

        ObjectMeta {
            name: Some(Self::object_name(uid, input)),
            labels: Some(object_labels),
            annotations: Some(BTreeMap::from([
                (
                    ANNOTATION_COMPONENT_TYPE.to_string(),
                    input.component_type().to_string(),
                ),
                (
                    ANNOTATION_CONTAINER_NAME.to_string(),
                    input.container_name().to_string(),
                ),
                (
                    ANNOTATION_EXPIRE_AFTER.to_string(),
                    clock::to_rfc3339(expire_after),
                ),
            ])),
            ..Default::default()
        }
    }

    fn container(&self, input: &dyn SpawnTarget) -> Container {
        let spec = input.spec();

        let env = spec
            .env
            .iter()
            .map(|(name, value)| EnvVar {
                name: name.clone(),
                value: Some(value.clone()),
                ..Default::default()
            })
            .collect();

        let ports = spec
            .port_bindings
            .iter()
            .map(|(port_name, binding)| ContainerPort {
                name: Some(k8s_name(&[port_name])),
                protocol: Some(binding.protocol.to_uppercase()),
                container_port: binding.container_port,
                ..Default::default()
            })
            .collect();

        Container {
            name: "main".to_string(),
            image: Some(format!("{}:{}", spec.repository, spec.tag)),
            args: Some(spec.cmd.clone()),
            env: Some(env),
            ports: Some(ports),
            resources: Some(ResourceRequirements {
                requests: Some(BTreeMap::from([
                    ("cpu".to_string(), Quantity(CPU_REQUEST.to_string())),
                    ("memory".to_string(), Quantity(MEMORY_REQUEST.to_string())),
                ])),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn node_selector(&self) -> Option<BTreeMap<String, String>> {
        if self.placement.node_selector.is_empty() {
            return None;
        }

        Some(
            self.placement
                .node_selector
                .iter()
                .map(|(key, value)| (key.replace('\\', ""), value.clone()))
                .collect(),
        )
    }

    fn tolerations(&self) -> Option<Vec<Toleration>> {
        if self.placement.tolerations.is_empty() {
            return None;
        }

        Some(
            self.placement
                .tolerations
                .iter()
                .map(|t| Toleration {
                    key: Some(t.key.clone()),
                    operator: Some(t.operator.clone()),
                    value: Some(t.value.clone()),
                    effect: Some(t.effect.clone()),
                    ..Default::default()
                })
                .collect(),
        )
    }
}

/// Labels shared by the pod template, the deployment selector, and the
/// service selector. Excludes `idle`, which changes over the lifecycle.
fn pair_selector(uid: &str, input: &dyn SpawnTarget) -> LabelSet {
    LabelSet::from([
        (LABEL_POOL_ID.to_string(), k8s_name(&[input.pool_id()])),
        (LABEL_UID.to_string(), uid.to_string()),
        (
            LABEL_COMPONENT_TYPE.to_string(),
            k8s_name(&[input.component_type()]),
        ),
        (
            LABEL_CONTAINER_NAME.to_string(),
            k8s_name(&[input.container_name()]),
        ),
    ])
}
