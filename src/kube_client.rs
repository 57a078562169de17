//! Kubernetes client for pool workloads and services
//!
//! Thin capability over the cluster API: list/get/create/patch/delete for
//! the two object kinds the pool manages, filtered by merged equality label
//! selectors. Patches are JSON-Patch documents and retry on write conflicts
//! with bounded backoff; every other failure is permanent and surfaces to
//! the caller.
//!
//! The trait exists so pool logic can be tested against a mock while
//! production code talks to a real API server.

use async_trait::async_trait;
use json_patch::PatchOperation;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;

#[cfg(test)]
use mockall::automock;

use crate::error::Error;
use crate::labels::LabelSet;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::Result;

/// Trait abstracting the cluster operations the pool consumes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Namespace all operations run in
    fn namespace(&self) -> String;

    /// List deployments matching the merged selectors (all, when empty)
    async fn list_deployments(&self, selectors: &[LabelSet]) -> Result<Vec<Deployment>>;

    /// Create a deployment
    async fn create_deployment(&self, object: &Deployment) -> Result<Deployment>;

    /// Apply a JSON-Patch to a deployment
    async fn patch_deployment(&self, name: &str, ops: &[PatchOperation]) -> Result<Deployment>;

    /// Delete a deployment by name
    async fn delete_deployment(&self, name: &str) -> Result<()>;

    /// List services matching the merged selectors (all, when empty)
    async fn list_services(&self, selectors: &[LabelSet]) -> Result<Vec<Service>>;

    /// Get a service by name
    async fn get_service(&self, name: &str) -> Result<Service>;

    /// Create a service
    async fn create_service(&self, object: &Service) -> Result<Service>;

    /// Apply a JSON-Patch to a service
    async fn patch_service(&self, name: &str, ops: &[PatchOperation]) -> Result<Service>;

    /// Delete a service by name
    async fn delete_service(&self, name: &str) -> Result<()>;
}

/// Real implementation backed by a kube [`Client`]
pub struct KubeClientImpl {
    client: Client,
    namespace: String,
    backoff: RetryConfig,
}

impl KubeClientImpl {
    /// Wrap a connected client, scoping all operations to `namespace`
    pub fn new(client: Client, namespace: impl Into<String>, backoff: RetryConfig) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            backoff,
        }
    }

    fn deployments(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn services(&self) -> Api<Service> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn list_params(selectors: &[LabelSet]) -> ListParams {
        let selector = merge_selectors(selectors);
        if selector.is_empty() {
            ListParams::default()
        } else {
            ListParams::default().labels(&selector)
        }
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    fn namespace(&self) -> String {
        self.namespace.clone()
    }

    async fn list_deployments(&self, selectors: &[LabelSet]) -> Result<Vec<Deployment>> {
        let objects = self
            .deployments()
            .list(&Self::list_params(selectors))
            .await
            .map_err(|e| Error::cluster(format!("could not list deployments: {e}")))?;

        Ok(objects.items)
    }

    async fn create_deployment(&self, object: &Deployment) -> Result<Deployment> {
        self.deployments()
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| Error::cluster(format!("could not create deployment: {e}")))
    }

    async fn patch_deployment(&self, name: &str, ops: &[PatchOperation]) -> Result<Deployment> {
        let api = self.deployments();
        let params = PatchParams::default();
        let patch: Patch<()> = Patch::Json(json_patch::Patch(ops.to_vec()));

        retry_with_backoff(&self.backoff, "patch deployment", is_conflict, || {
            api.patch(name, &params, &patch)
        })
        .await
        .map_err(|e| Error::cluster(format!("could not patch the deployment {name:?}: {e}")))
    }

    async fn delete_deployment(&self, name: &str) -> Result<()> {
        self.deployments()
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| Error::cluster(format!("could not delete deployment: {e}")))
    }

    async fn list_services(&self, selectors: &[LabelSet]) -> Result<Vec<Service>> {
        let objects = self
            .services()
            .list(&Self::list_params(selectors))
            .await
            .map_err(|e| Error::cluster(format!("could not list services: {e}")))?;

        Ok(objects.items)
    }

    async fn get_service(&self, name: &str) -> Result<Service> {
        self.services()
            .get(name)
            .await
            .map_err(|e| Error::cluster(format!("could not get service: {e}")))
    }

    async fn create_service(&self, object: &Service) -> Result<Service> {
        self.services()
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| Error::cluster(format!("could not create service: {e}")))
    }

    async fn patch_service(&self, name: &str, ops: &[PatchOperation]) -> Result<Service> {
        let api = self.services();
        let params = PatchParams::default();
        let patch: Patch<()> = Patch::Json(json_patch::Patch(ops.to_vec()));

        retry_with_backoff(&self.backoff, "patch service", is_conflict, || {
            api.patch(name, &params, &patch)
        })
        .await
        .map_err(|e| Error::cluster(format!("could not patch the service {name:?}: {e}")))
    }

    async fn delete_service(&self, name: &str) -> Result<()> {
        self.services()
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| Error::cluster(format!("could not delete service: {e}")))
    }
}

/// Merge label maps into one equality selector string.
///
/// Later maps win on key collisions. An empty result matches the whole
/// namespace.
fn merge_selectors(selectors: &[LabelSet]) -> String {
    let mut merged = LabelSet::new();
    for selector in selectors {
        merged.extend(selector.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    merged
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// A write conflict from the resource-version check; the only retryable
/// cluster error. 409/AlreadyExists is permanent.
fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409 && resp.reason == "Conflict")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::{LABEL_COMPONENT_TYPE, LABEL_IDLE, LABEL_POOL_ID};

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: reason.to_string(),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn merged_selector_is_sorted_equality_pairs() {
        let selector = merge_selectors(&[
            LabelSet::from([(LABEL_POOL_ID.to_string(), "pa".to_string())]),
            LabelSet::from([
                (LABEL_COMPONENT_TYPE.to_string(), "redis".to_string()),
                (LABEL_IDLE.to_string(), "true".to_string()),
            ]),
        ]);

        assert_eq!(
            selector,
            "kubrun/component-type=redis,kubrun/idle=true,kubrun/pool-id=pa"
        );
    }

    #[test]
    fn later_selectors_override_earlier_keys() {
        let selector = merge_selectors(&[
            LabelSet::from([(LABEL_POOL_ID.to_string(), "pa".to_string())]),
            LabelSet::from([(LABEL_POOL_ID.to_string(), "pb".to_string())]),
        ]);

        assert_eq!(selector, "kubrun/pool-id=pb");
    }

    #[test]
    fn empty_selectors_match_everything() {
        assert_eq!(merge_selectors(&[]), "");
        assert_eq!(merge_selectors(&[LabelSet::new()]), "");
    }

    #[test]
    fn only_resource_version_conflicts_are_retryable() {
        assert!(is_conflict(&api_error(409, "Conflict")));
        assert!(!is_conflict(&api_error(409, "AlreadyExists")));
        assert!(!is_conflict(&api_error(404, "NotFound")));
        assert!(!is_conflict(&api_error(403, "Forbidden")));
    }

    #[tokio::test]
    async fn a_lost_write_race_is_retried_to_success() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result = retry_with_backoff(
            &RetryConfig {
                max_attempts: 3,
                initial_delay: std::time::Duration::from_millis(1),
                max_delay: std::time::Duration::from_millis(5),
                backoff_multiplier: 2.0,
            },
            "patch deployment",
            is_conflict,
            move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(api_error(409, "Conflict"))
                    } else {
                        Ok("patched")
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), "patched");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn a_missing_object_fails_without_retry() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: std::result::Result<&str, kube::Error> = retry_with_backoff(
            &RetryConfig::default(),
            "patch deployment",
            is_conflict,
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(api_error(404, "NotFound"))
                }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
