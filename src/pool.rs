//! Per-pool spawn/claim/extend/release logic
//!
//! A pool is a labeled bag of pre-provisioned workload+service pairs. All
//! pool state lives in the cluster; this type only holds the handles needed
//! to act on it, so a process restart loses nothing.

use std::sync::Arc;

use json_patch::{AddOperation, PatchOperation, RemoveOperation, ReplaceOperation};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::catalog;
use crate::clock::{self, Clock};
use crate::error::Error;
use crate::factory::ObjectFactory;
use crate::inputs::{ExtendInput, RunInput, SpawnTarget, WarmUpDeployment, WarmUpInput};
use crate::kube_client::KubeClient;
use crate::labels::{
    annotation_path, k8s_name, label_path, LabelSet, ANNOTATION_EXPIRE_AFTER,
    ANNOTATION_TEST_NAME, LABEL_COMPONENT_NAME, LABEL_COMPONENT_TYPE, LABEL_CONTAINER_NAME,
    LABEL_IDLE, LABEL_POOL_ID, LABEL_TEST_ID,
};
use crate::Result;

/// One pool of warm workload+service pairs
pub struct ServicePool {
    // Serializes claims end-to-end so two in-process claimers cannot pick
    // the same idle replica. Spawn/extend/release rely on label selectors
    // and cluster-side atomicity instead.
    claim_lock: Mutex<()>,
    kube: Arc<dyn KubeClient>,
    factory: ObjectFactory,
    id: String,
    clock: Arc<dyn Clock>,
}

impl ServicePool {
    /// Create a pool handle for `id`
    pub fn new(
        kube: Arc<dyn KubeClient>,
        factory: ObjectFactory,
        clock: Arc<dyn Clock>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            claim_lock: Mutex::new(()),
            kube,
            factory,
            id: id.into(),
            clock,
        }
    }

    /// Pool id this handle acts on
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Spawn `count` fresh idle pairs per component type.
    ///
    /// Types without a built-in spec are skipped with a log line. The first
    /// spawn failure aborts; pairs created before it stay behind and are
    /// reaped by the expiry sweep.
    pub async fn warm_up(&self, input: &WarmUpInput) -> Result<()> {
        for (component_type, count) in &input.components {
            let Some(spec) = catalog::builtin_spec(component_type) else {
                info!(
                    pool_id = %self.id,
                    component_type = %component_type,
                    "no warm up spec found for component type, skipping"
                );
                continue;
            };

            let warm_up = WarmUpDeployment {
                pool_id: input.pool_id.clone(),
                component_type: component_type.clone(),
                container_name: "main".to_string(),
                spec,
            };

            for _ in 0..*count {
                self.spawn_pair(&warm_up).await.map_err(|e| {
                    Error::cluster(format!("could not spawn warm up deployment: {e}"))
                })?;
            }
        }

        Ok(())
    }

    /// Release every pair of this pool
    pub async fn shutdown(&self) -> Result<()> {
        let labels = LabelSet::from([(LABEL_POOL_ID.to_string(), k8s_name(&[&self.id]))]);
        self.release_services(&labels).await
    }

    /// Claim one idle pair for a test and return its service.
    ///
    /// Spawns a speculative replacement first so a burst of claims does not
    /// drain the pool, then leases out the oldest idle replica (the one
    /// most likely to have finished starting up).
    pub async fn claim_service(&self, input: &RunInput) -> Result<Service> {
        let _guard = self.claim_lock.lock().await;

        self.spawn_pair(input)
            .await
            .map_err(|e| Error::cluster(format!("could not spawn deployment: {e}")))?;

        let idle = LabelSet::from([
            (LABEL_POOL_ID.to_string(), k8s_name(&[&self.id])),
            (
                LABEL_COMPONENT_TYPE.to_string(),
                k8s_name(&[&input.component_type]),
            ),
            (
                LABEL_CONTAINER_NAME.to_string(),
                k8s_name(&[&input.container_name]),
            ),
            (LABEL_IDLE.to_string(), "true".to_string()),
        ]);

        let mut deployments = self
            .kube
            .list_deployments(&[idle])
            .await
            .map_err(|e| Error::cluster(format!("failed to list deployments: {e}")))?;

        deployments.sort_by(|a, b| a.creation_timestamp().cmp(&b.creation_timestamp()));

        let oldest = deployments.first().ok_or_else(|| {
            Error::input(format!(
                "no idle {} replica available in pool {:?}",
                input.component_type, self.id
            ))
        })?;

        self.claim_deployment(oldest, input)
            .await
            .map_err(|e| Error::cluster(format!("could not claim deployment: {e}")))
    }

    /// Push back the lease deadline of everything a test claimed
    pub async fn extend_services(&self, input: &ExtendInput) -> Result<()> {
        let duration = chrono::Duration::from_std(input.duration)
            .map_err(|_| Error::input("duration out of range"))?;
        let expire_after = clock::to_rfc3339(self.clock.now() + duration);

        // The annotation exists on every live object, so `replace` is safe.
        let ops = vec![PatchOperation::Replace(ReplaceOperation {
            path: annotation_path(ANNOTATION_EXPIRE_AFTER),
            value: json!(expire_after),
        })];

        let labels = input.labels();

        let deployments = self
            .kube
            .list_deployments(&[labels.clone()])
            .await
            .map_err(|e| Error::cluster(format!("could not list deployments: {e}")))?;

        for deployment in &deployments {
            self.kube
                .patch_deployment(&deployment.name_any(), &ops)
                .await
                .map_err(|e| Error::cluster(format!("could not patch deployment: {e}")))?;
        }

        let services = self
            .kube
            .list_services(&[labels])
            .await
            .map_err(|e| Error::cluster(format!("could not list services: {e}")))?;

        for service in &services {
            self.kube
                .patch_service(&service.name_any(), &ops)
                .await
                .map_err(|e| Error::cluster(format!("could not patch service: {e}")))?;
        }

        Ok(())
    }

    /// Delete every workload and service matching `labels`
    pub async fn release_services(&self, labels: &LabelSet) -> Result<()> {
        let selectors = [labels.clone()];

        let deployments = self
            .kube
            .list_deployments(&selectors)
            .await
            .map_err(|e| Error::cluster(format!("could not list deployments: {e}")))?;

        for deployment in &deployments {
            self.kube
                .delete_deployment(&deployment.name_any())
                .await
                .map_err(|e| Error::cluster(format!("could not delete deployment: {e}")))?;
        }

        let services = self
            .kube
            .list_services(&selectors)
            .await
            .map_err(|e| Error::cluster(format!("could not list services: {e}")))?;

        for service in &services {
            self.kube
                .delete_service(&service.name_any())
                .await
                .map_err(|e| Error::cluster(format!("could not delete service: {e}")))?;
        }

        let ids = labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");
        info!(pool_id = %self.id, released = %ids, "released test resources");

        Ok(())
    }

    async fn spawn_pair(&self, input: &dyn SpawnTarget) -> Result<Deployment> {
        let mut uid = Uuid::new_v4().simple().to_string();
        uid.truncate(8);

        let deployment = self.factory.deployment(&uid, input);
        let deployment = self
            .kube
            .create_deployment(&deployment)
            .await
            .map_err(|e| Error::cluster(format!("could not create deployment: {e}")))?;

        let service = self.factory.service(&uid, input);
        self.kube
            .create_service(&service)
            .await
            .map_err(|e| Error::cluster(format!("could not create service: {e}")))?;

        info!(pool_id = %self.id, deployment = %deployment.name_any(), "spawned deployment");

        Ok(deployment)
    }

    async fn claim_deployment(&self, deployment: &Deployment, input: &RunInput) -> Result<Service> {
        let duration = chrono::Duration::from_std(input.expire_after)
            .map_err(|_| Error::input("expire_after out of range"))?;
        let expire_after = clock::to_rfc3339(self.clock.now() + duration);

        let mut ops = vec![
            PatchOperation::Remove(RemoveOperation {
                path: label_path(LABEL_IDLE),
            }),
            PatchOperation::Add(AddOperation {
                path: label_path(LABEL_TEST_ID),
                value: json!(k8s_name(&[&input.test_id])),
            }),
            PatchOperation::Add(AddOperation {
                path: label_path(LABEL_COMPONENT_NAME),
                value: json!(k8s_name(&[&input.component_name])),
            }),
            PatchOperation::Add(AddOperation {
                path: annotation_path(ANNOTATION_EXPIRE_AFTER),
                value: json!(expire_after),
            }),
        ];

        if !input.test_name.is_empty() {
            ops.push(PatchOperation::Add(AddOperation {
                path: annotation_path(ANNOTATION_TEST_NAME),
                value: json!(input.test_name),
            }));
        }

        let name = deployment.name_any();

        self.kube
            .patch_deployment(&name, &ops)
            .await
            .map_err(|e| Error::cluster(format!("could not patch deployment: {e}")))?;

        // Workload and service share the name by construction.
        let service = self
            .kube
            .get_service(&name)
            .await
            .map_err(|e| Error::cluster(format!("could not get service: {e}")))?;

        let service = self
            .kube
            .patch_service(&service.name_any(), &ops)
            .await
            .map_err(|e| Error::cluster(format!("could not patch service: {e}")))?;

        info!(pool_id = %self.id, deployment = %name, test_id = %input.test_id, "claimed deployment");

        Ok(service)
    }
}
