//! Control surface tests, driven in-process.

use std::sync::Arc;
use std::time::Duration;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde::de::DeserializeOwned;
use tower::ServiceExt;

use rotation_proxy::admin::handlers::{NodeAdded, NodeList, RebalanceResult, SchedulerStats};
use rotation_proxy::admin::{control_router, ControlState};
use rotation_proxy::config::ProxyConfig;
use rotation_proxy::Scheduler;

mod common;

fn router(scheduler: Arc<Scheduler>, api_key: Option<&str>) -> Router {
    let mut config = ProxyConfig::default();
    config.data.path = "/api".into();
    config.control.api_key = api_key.map(str::to_string);
    control_router(ControlState::new(scheduler, &config), true)
}

fn request(method: Method, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json<T: DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_add_list_remove_node() {
    let scheduler = Arc::new(Scheduler::new(64));
    let app = router(scheduler.clone(), None);

    let res = app
        .clone()
        .oneshot(request(
            Method::POST,
            "/node",
            Some(serde_json::json!({"address": "127.0.0.1", "port": 9001, "maxTransactions": 3})),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let added: NodeAdded = json(res).await;
    assert_eq!((added.address.as_str(), added.port, added.weight), ("127.0.0.1", 9001, 3));
    assert_eq!(scheduler.rotation_len(), 3);

    let res = app.clone().oneshot(request(Method::GET, "/node", None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = json(res).await;
    assert_eq!(body["nodes"][0]["maxTransactions"], 3);
    assert_eq!(body["nodes"][0]["weight"], 3);
    let list: NodeList = serde_json::from_value(body).unwrap();
    assert_eq!(list.nodes.len(), 1);
    assert_eq!(list.nodes[0].id, added.id);
    assert_eq!(list.nodes[0].effective_weight, 3);
    assert_eq!(list.nodes[0].transaction_count, 0);

    let uri = format!("/node/{}", added.id);
    let res = app.clone().oneshot(request(Method::DELETE, &uri, None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert_eq!(scheduler.live_count(), 0);

    let res = app.oneshot(request(Method::DELETE, &uri, None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_node_is_rejected() {
    let scheduler = Arc::new(Scheduler::new(64));
    let app = router(scheduler.clone(), None);

    let res = app
        .clone()
        .oneshot(request(
            Method::POST,
            "/node",
            Some(serde_json::json!({"address": "no such host.invalid", "port": 9001})),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = app
        .oneshot(request(
            Method::POST,
            "/node",
            Some(serde_json::json!({"address": "127.0.0.1", "port": 0})),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(scheduler.live_count(), 0);
}

#[tokio::test]
async fn test_scheduler_stats_and_reset() {
    let scheduler = Arc::new(Scheduler::new(64));
    let app = router(scheduler.clone(), None);

    for ms in [10, 20, 30] {
        scheduler.update_time(Duration::from_millis(ms)).await.unwrap();
    }
    scheduler.stats().flush().await.unwrap();

    let res = app.clone().oneshot(request(Method::GET, "/scheduler", None)).await.unwrap();
    let stats: SchedulerStats = json(res).await;
    assert_eq!(stats.path, "/api");
    assert_eq!(stats.transaction_count, 3);
    assert_eq!(stats.average_transaction_time_milli_sec, 20.0);
    assert_eq!(stats.minimum_transaction_time_milli_sec, 10.0);
    assert_eq!(stats.maximum_transaction_time_milli_sec, 30.0);

    let res = app
        .clone()
        .oneshot(request(Method::POST, "/scheduler/reset", None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = app.oneshot(request(Method::GET, "/scheduler", None)).await.unwrap();
    let stats: serde_json::Value = json(res).await;
    assert_eq!(stats["transactionCount"], 0);
    assert_eq!(stats["averageTransactionTimeMilliSec"], 0.0);
}

#[tokio::test]
async fn test_rebalance_on_demand() {
    let scheduler = Arc::new(Scheduler::new(64));
    let app = router(scheduler.clone(), None);

    let res = app
        .oneshot(request(Method::POST, "/scheduler/rebalance", None))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let result: RebalanceResult = json(res).await;
    assert!(result.changes.is_empty());
}

#[tokio::test]
async fn test_api_key_required_when_configured() {
    let app = router(Arc::new(Scheduler::new(8)), Some("secret"));

    let res = app.clone().oneshot(request(Method::GET, "/node", None)).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let mut req = request(Method::GET, "/node", None);
    req.headers_mut()
        .insert(header::AUTHORIZATION, "Bearer wrong".parse().unwrap());
    let res = app.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let mut req = request(Method::GET, "/node", None);
    req.headers_mut()
        .insert(header::AUTHORIZATION, "Bearer secret".parse().unwrap());
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_control_over_http() {
    let proxy = common::start_proxy(common::local_config()).await;
    let backend = common::start_mock_backend("hello").await;
    let client = common::client();

    let res = client
        .post(proxy.control_url("/node"))
        .json(&serde_json::json!({"address": "127.0.0.1", "port": backend.port(), "weight": 2}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = client.get(proxy.url("/greeting")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "hello");

    let res = client.get(proxy.control_url("/node")).send().await.unwrap();
    let list: NodeList = res.json().await.unwrap();
    assert_eq!(list.nodes.len(), 1);
    assert_eq!(list.nodes[0].weight, 2);
    assert_eq!(list.nodes[0].port, backend.port());

    proxy.stop().await;
}
