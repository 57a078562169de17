//! HTTP surface
//!
//! Thin adapters translating JSON requests into manager calls. Any error
//! surfaced by the core comes back as a 500 with the wrapped message as
//! body; the step messages make the response traceable against the logs.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;

use crate::error::Error;
use crate::inputs::{ExtendInput, RunInput, ShutdownInput, StopInput, WarmUpInput};
use crate::manager::ServicePoolManager;

/// Error wrapper mapping core failures onto HTTP responses
pub struct ApiError(Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

/// Build the pool API router
pub fn router(manager: Arc<ServicePoolManager>) -> Router {
    Router::new()
        .route("/pool/warmup", post(warm_up))
        .route("/pool/shutdown", post(shutdown))
        .route("/run", post(run))
        .route("/stop", post(stop))
        .route("/extend", post(extend))
        .with_state(manager)
}

async fn warm_up(
    State(manager): State<Arc<ServicePoolManager>>,
    Json(input): Json<WarmUpInput>,
) -> Result<StatusCode, ApiError> {
    manager
        .warm_up_pool(&input)
        .await
        .map_err(|e| Error::cluster(format!("could not warm up pool: {e}")))?;

    Ok(StatusCode::OK)
}

async fn shutdown(
    State(manager): State<Arc<ServicePoolManager>>,
    Json(input): Json<ShutdownInput>,
) -> Result<StatusCode, ApiError> {
    manager
        .shutdown_pool(&input)
        .await
        .map_err(|e| Error::cluster(format!("could not shut down pool: {e}")))?;

    Ok(StatusCode::OK)
}

async fn run(
    State(manager): State<Arc<ServicePoolManager>>,
    Json(input): Json<RunInput>,
) -> Result<Json<BTreeMap<String, String>>, ApiError> {
    let service = manager
        .fetch_service(&input)
        .await
        .map_err(|e| Error::cluster(format!("could not fetch service: {e}")))?;

    Ok(Json(service_bindings(&service)))
}

async fn stop(
    State(manager): State<Arc<ServicePoolManager>>,
    Json(input): Json<StopInput>,
) -> Result<StatusCode, ApiError> {
    manager
        .release_services(&input)
        .await
        .map_err(|e| Error::cluster(format!("could not release services: {e}")))?;

    Ok(StatusCode::OK)
}

async fn extend(
    State(manager): State<Arc<ServicePoolManager>>,
    Json(input): Json<ExtendInput>,
) -> Result<StatusCode, ApiError> {
    manager
        .extend_services(&input)
        .await
        .map_err(|e| Error::cluster(format!("could not extend services: {e}")))?;

    Ok(StatusCode::OK)
}

/// Port name to `host:port` bindings of a claimed service.
///
/// The host is the cluster-internal DNS name `<service>.<namespace>`.
fn service_bindings(service: &Service) -> BTreeMap<String, String> {
    let host = format!(
        "{}.{}",
        service.name_any(),
        service.namespace().unwrap_or_default()
    );

    service
        .spec
        .iter()
        .flat_map(|spec| spec.ports.iter().flatten())
        .map(|port| {
            (
                port.name.clone().unwrap_or_default(),
                format!("{host}:{}", port.port),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::kube_client::MockKubeClient;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{TimeZone, Utc};
    use http_body_util::BodyExt;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use tower::ServiceExt;

    fn fixed_clock() -> Arc<MockClock> {
        let mut clock = MockClock::new();
        clock
            .expect_now()
            .returning(|| Utc.with_ymd_and_hms(2026, 8, 2, 12, 0, 0).unwrap());
        Arc::new(clock)
    }

    fn app(kube: MockKubeClient) -> Router {
        let manager = Arc::new(ServicePoolManager::with_placement(
            Arc::new(kube),
            fixed_clock(),
            Default::default(),
        ));
        router(manager)
    }

    async fn post_json(app: Router, path: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(path)
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        (status, value)
    }

    fn claimed_service(name: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("justdev".to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    name: Some("main".to_string()),
                    port: 6379,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn idle_deployment(name: &str) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                creation_timestamp: Some(Time(
                    Utc.with_ymd_and_hms(2026, 8, 2, 11, 0, 0).unwrap(),
                )),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn warmup_returns_200() {
        let mut kube = MockKubeClient::new();
        kube.expect_create_deployment().times(2).returning(|d| Ok(d.clone()));
        kube.expect_create_service().times(2).returning(|s| Ok(s.clone()));

        let (status, _) = post_json(
            app(kube),
            "/pool/warmup",
            serde_json::json!({"pool_id": "pA", "components": {"redis": 2}}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn warmup_with_unknown_type_is_a_no_op_200() {
        let kube = MockKubeClient::new();

        let (status, _) = post_json(
            app(kube),
            "/pool/warmup",
            serde_json::json!({"pool_id": "pB", "components": {"nope": 1}}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn warmup_spawn_failure_is_a_500_with_the_wrapped_chain() {
        let mut kube = MockKubeClient::new();
        kube.expect_create_deployment()
            .returning(|_| Err(Error::cluster("could not create deployment: denied")));

        let (status, body) = post_json(
            app(kube),
            "/pool/warmup",
            serde_json::json!({"pool_id": "pA", "components": {"redis": 1}}),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let message = body["error"].as_str().unwrap();
        assert!(message.contains("could not warm up pool"));
        assert!(message.contains("could not create deployment"));
    }

    #[tokio::test]
    async fn run_returns_host_port_bindings() {
        let mut kube = MockKubeClient::new();
        kube.expect_create_deployment().returning(|d| Ok(d.clone()));
        kube.expect_create_service().returning(|s| Ok(s.clone()));
        kube.expect_list_deployments()
            .returning(|_| Ok(vec![idle_deployment("p-pa-ab12cd34-redis-main")]));
        kube.expect_patch_deployment()
            .returning(|name, _| Ok(idle_deployment(name)));
        kube.expect_get_service()
            .returning(|name| Ok(claimed_service(name)));
        kube.expect_patch_service()
            .returning(|name, _| Ok(claimed_service(name)));

        let (status, body) = post_json(
            app(kube),
            "/run",
            serde_json::json!({
                "pool_id": "pA",
                "test_id": "t1",
                "component_type": "redis",
                "component_name": "cache",
                "container_name": "main",
                "spec": {
                    "repository": "redis",
                    "tag": "7-alpine",
                    "port_bindings": {"main": {"container_port": 6379, "protocol": "tcp"}},
                },
                "expire_after": "600s",
            }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            serde_json::json!({"main": "p-pa-ab12cd34-redis-main.justdev:6379"})
        );
    }

    #[tokio::test]
    async fn stop_returns_200_after_deleting_matches() {
        let mut kube = MockKubeClient::new();
        kube.expect_list_deployments().returning(|_| Ok(vec![]));
        kube.expect_list_services().returning(|_| Ok(vec![]));

        let (status, _) = post_json(
            app(kube),
            "/stop",
            serde_json::json!({"pool_id": "pA", "test_id": "t1"}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn extend_returns_200() {
        let mut kube = MockKubeClient::new();
        kube.expect_list_deployments().returning(|_| Ok(vec![]));
        kube.expect_list_services().returning(|_| Ok(vec![]));

        let (status, _) = post_json(
            app(kube),
            "/extend",
            serde_json::json!({"pool_id": "pA", "test_id": "t1", "duration": "10m"}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn pool_shutdown_returns_200() {
        let mut kube = MockKubeClient::new();
        kube.expect_list_deployments().returning(|_| Ok(vec![]));
        kube.expect_list_services().returning(|_| Ok(vec![]));

        let (status, _) = post_json(
            app(kube),
            "/pool/shutdown",
            serde_json::json!({"pool_id": "pA"}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
    }

    #[test]
    fn bindings_join_service_dns_name_and_port() {
        let bindings = service_bindings(&claimed_service("p-pa-x-redis-main"));
        assert_eq!(bindings["main"], "p-pa-x-redis-main.justdev:6379");
    }
}
