//! Pool registry and expiry sweep
//!
//! Process-singleton entry point for the HTTP layer. Pools are created
//! lazily and held in a mutexed map; since ground truth lives in the
//! cluster, losing the map (or the process) loses nothing.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use tokio::sync::Mutex;
use tracing::info;

use crate::clock::Clock;
use crate::error::Error;
use crate::factory::{ObjectFactory, PodPlacement};
use crate::inputs::{ExtendInput, RunInput, ShutdownInput, StopInput, WarmUpInput};
use crate::kube_client::KubeClient;
use crate::labels::{k8s_name, LabelSet, ANNOTATION_EXPIRE_AFTER, LABEL_POOL_ID};
use crate::pool::ServicePool;
use crate::Result;

/// Creates a pool handle for a pool id
pub type PoolFactory = Box<dyn Fn(&str) -> Arc<ServicePool> + Send + Sync>;

/// Registry of [`ServicePool`]s keyed by pool id
pub struct ServicePoolManager {
    pools: Mutex<HashMap<String, Arc<ServicePool>>>,
    kube: Arc<dyn KubeClient>,
    clock: Arc<dyn Clock>,
    pool_factory: PoolFactory,
}

impl ServicePoolManager {
    /// Create a manager with a custom pool factory
    pub fn new(kube: Arc<dyn KubeClient>, clock: Arc<dyn Clock>, pool_factory: PoolFactory) -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
            kube,
            clock,
            pool_factory,
        }
    }

    /// Create a manager whose pools spawn with the given placement settings
    pub fn with_placement(
        kube: Arc<dyn KubeClient>,
        clock: Arc<dyn Clock>,
        placement: PodPlacement,
    ) -> Self {
        let factory = ObjectFactory::new(placement, clock.clone());
        let pool_kube = kube.clone();
        let pool_clock = clock.clone();

        let pool_factory: PoolFactory = Box::new(move |id| {
            Arc::new(ServicePool::new(
                pool_kube.clone(),
                factory.clone(),
                pool_clock.clone(),
                id,
            ))
        });

        Self::new(kube, clock, pool_factory)
    }

    /// Fill a pool with fresh idle pairs
    pub async fn warm_up_pool(&self, input: &WarmUpInput) -> Result<()> {
        self.get_pool(&input.pool_id).await.warm_up(input).await
    }

    /// Release every pair of a pool
    pub async fn shutdown_pool(&self, input: &ShutdownInput) -> Result<()> {
        self.get_pool(&input.pool_id).await.shutdown().await
    }

    /// Claim a service for a test run
    pub async fn fetch_service(&self, input: &RunInput) -> Result<Service> {
        self.get_pool(&input.pool_id)
            .await
            .claim_service(input)
            .await
            .map_err(|e| Error::cluster(format!("could not claim service: {e}")))
    }

    /// Push back the lease deadline of a test's claims
    pub async fn extend_services(&self, input: &ExtendInput) -> Result<()> {
        self.get_pool(&input.pool_id).await.extend_services(input).await
    }

    /// Release everything a test claimed
    pub async fn release_services(&self, input: &StopInput) -> Result<()> {
        self.get_pool(&input.pool_id)
            .await
            .release_services(&input.labels())
            .await
    }

    /// One garbage-collection pass: delete every workload and service whose
    /// lease has run out, then drop registry entries for pools with no
    /// services left. Pools are cheap and lazily re-created.
    pub async fn expire_services(&self) -> Result<()> {
        let now = self.clock.now();

        let deployments = self
            .kube
            .list_deployments(&[])
            .await
            .map_err(|e| Error::cluster(format!("could not expire deployments: {e}")))?;
        for (name, pool_id) in
            expired_objects(&deployments, now).map_err(|e| Error::cluster(format!("could not expire deployments: {e}")))?
        {
            self.kube
                .delete_deployment(&name)
                .await
                .map_err(|e| Error::cluster(format!("could not expire deployments: {e}")))?;
            info!(deployment = %name, pool_id = %pool_id, "expired deployment");
        }

        let services = self
            .kube
            .list_services(&[])
            .await
            .map_err(|e| Error::cluster(format!("could not expire services: {e}")))?;
        for (name, pool_id) in
            expired_objects(&services, now).map_err(|e| Error::cluster(format!("could not expire services: {e}")))?
        {
            self.kube
                .delete_service(&name)
                .await
                .map_err(|e| Error::cluster(format!("could not expire services: {e}")))?;
            info!(service = %name, pool_id = %pool_id, "expired service");
        }

        let mut pools = self.pools.lock().await;
        let pool_ids: Vec<String> = pools.keys().cloned().collect();
        for pool_id in pool_ids {
            let selector = LabelSet::from([(LABEL_POOL_ID.to_string(), k8s_name(&[&pool_id]))]);
            let remaining = self
                .kube
                .list_services(&[selector])
                .await
                .map_err(|e| Error::cluster(format!("failed to list services: {e}")))?;

            if remaining.is_empty() {
                pools.remove(&pool_id);
                info!(pool_id = %pool_id, "removed empty pool");
            }
        }

        Ok(())
    }

    async fn get_pool(&self, pool_id: &str) -> Arc<ServicePool> {
        let mut pools = self.pools.lock().await;

        if let Some(pool) = pools.get(pool_id) {
            return pool.clone();
        }

        let pool = (self.pool_factory)(pool_id);
        pools.insert(pool_id.to_string(), pool.clone());
        info!(pool_id = %pool_id, "created new pool");

        pool
    }
}

/// Names (with pool ids, for logging) of all objects whose `expire-after`
/// has passed. Objects without the annotation are invisible to the sweep;
/// a malformed annotation aborts it.
fn expired_objects<T: ResourceExt>(
    objects: &[T],
    now: DateTime<Utc>,
) -> Result<Vec<(String, String)>> {
    let mut expired = Vec::new();

    for object in objects {
        let Some(raw) = object.annotations().get(ANNOTATION_EXPIRE_AFTER) else {
            continue;
        };

        let expire_after = DateTime::parse_from_rfc3339(raw)
            .map_err(|e| Error::cluster(format!("could not parse annotation expire after: {e}")))?;

        if expire_after.with_timezone(&Utc) > now {
            continue;
        }

        let pool_id = object.labels().get(LABEL_POOL_ID).cloned().unwrap_or_default();
        expired.push((object.name_any(), pool_id));
    }

    Ok(expired)
}
