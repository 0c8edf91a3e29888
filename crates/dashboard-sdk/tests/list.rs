use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use dashboard_sdk::{DashboardClient, DashboardError};
use watch_proto::{Channel, DevWorkspace, Pod, Resource};
use watch_sync::{CatchUpFetcher, ListError, ListOperation};

async fn pods(Path(namespace): Path<String>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer secret") {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "no token" })));
    }
    (
        StatusCode::OK,
        Json(json!({
            "apiVersion": "v1",
            "kind": "PodList",
            "metadata": { "resourceVersion": "77" },
            "items": [
                { "metadata": { "name": "web-0", "namespace": namespace, "uid": "p-1", "resourceVersion": "70" },
                  "status": { "phase": "Running" } }
            ]
        })),
    )
}

async fn devworkspaces() -> Json<Value> {
    Json(json!({ "items": [] }))
}

async fn events() -> (StatusCode, &'static str) {
    (StatusCode::INTERNAL_SERVER_ERROR, "kube unavailable")
}

async fn spawn_backend() -> SocketAddr {
    let router = Router::new()
        .route("/api/namespace/:namespace/pods", get(pods))
        .route("/api/namespace/:namespace/devworkspaces", get(devworkspaces))
        .route("/api/namespace/:namespace/events", get(events));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    addr
}

#[tokio::test]
async fn lists_pods_with_bearer_token() {
    let addr = spawn_backend().await;
    let client = DashboardClient::new(&format!("http://{addr}"), Some("secret".into())).unwrap();

    let list = client.list_pods("user-ns").await.expect("list pods");
    assert_eq!(list.metadata.resource_version.as_deref(), Some("77"));
    assert_eq!(list.items.len(), 1);
    assert_eq!(list.items[0].metadata.namespace.as_deref(), Some("user-ns"));
    assert_eq!(list.items[0].phase(), Some("Running"));
}

#[tokio::test]
async fn missing_token_surfaces_status() {
    let addr = spawn_backend().await;
    let client = DashboardClient::new(&format!("http://{addr}"), None).unwrap();

    match client.list_pods("user-ns").await {
        Err(DashboardError::UnexpectedStatus { status, .. }) => {
            assert_eq!(status, reqwest::StatusCode::UNAUTHORIZED)
        }
        other => panic!("expected unauthorized, got {other:?}"),
    }
}

#[tokio::test]
async fn serves_as_catch_up_list_operation() {
    let addr = spawn_backend().await;
    let client = Arc::new(DashboardClient::new(&format!("http://{addr}"), None).unwrap());

    let fetcher = CatchUpFetcher::<DevWorkspace>::new(client.clone());
    let listing = fetcher.fetch("user-ns").await.expect("devworkspaces");
    assert!(listing.items.is_empty());
    assert_eq!(listing.resource_version, "0");
    assert_eq!(DevWorkspace::CHANNEL, Channel::DevWorkspace);

    let err = ListOperation::<watch_proto::ClusterEvent>::list(client.as_ref(), "user-ns")
        .await
        .unwrap_err();
    assert!(matches!(err, ListError::UnexpectedStatus { status: 500, .. }));

    let unauthorized = ListOperation::<Pod>::list(client.as_ref(), "user-ns")
        .await
        .unwrap_err();
    assert!(matches!(unauthorized, ListError::UnexpectedStatus { status: 401, .. }));
}
