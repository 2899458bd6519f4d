//! Failure injection tests for the proxy.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use axum::http::StatusCode;

mod common;

#[tokio::test]
async fn test_no_nodes_is_unavailable() {
    let proxy = common::start_proxy(common::local_config()).await;

    let res = common::client().get(proxy.url("/")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

    proxy.stop().await;
}

#[tokio::test]
async fn test_dead_backend_returns_turn() {
    let mut config = common::local_config();
    config.timeouts.acquire_secs = 1;
    let proxy = common::start_proxy(config).await;
    let node = proxy.admit(common::dead_backend_addr().await, 1).await;

    let client = common::client();
    for _ in 0..3 {
        // 502 every time; a lost turn would surface as 503 after the acquire timeout
        let res = client.get(proxy.url("/")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    }

    assert_eq!(proxy.scheduler.rotation_len(), 1);
    node.stats().flush().await.unwrap();
    assert_eq!(node.transaction_count(), 3, "failed exchanges are still timed");

    proxy.stop().await;
}

#[tokio::test]
async fn test_backend_errors_are_relayed_not_retried() {
    let calls = Arc::new(AtomicU32::new(0));
    let seen = calls.clone();
    let backend = common::start_programmable_backend(move || {
        let seen = seen.clone();
        async move {
            seen.fetch_add(1, Ordering::SeqCst);
            (503, "Service Unavailable".into())
        }
    })
    .await;

    let proxy = common::start_proxy(common::local_config()).await;
    proxy.admit(backend, 1).await;

    let res = common::client().get(proxy.url("/")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(res.text().await.unwrap(), "Service Unavailable");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    proxy.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_busy_node_blocks_until_acquire_timeout() {
    let backend = common::start_slow_backend(Duration::from_secs(3), "slow").await;
    let mut config = common::local_config();
    config.timeouts.acquire_secs = 1;
    config.timeouts.upstream_secs = 10;
    let proxy = common::start_proxy(config).await;
    proxy.admit(backend, 1).await;

    let client = common::client();
    let first = tokio::spawn({
        let client = client.clone();
        let url = proxy.url("/");
        async move { client.get(url).send().await.unwrap() }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let start = Instant::now();
    let second = client.get(proxy.url("/")).send().await.unwrap();
    assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(start.elapsed() >= Duration::from_millis(900), "second request waited for a turn");

    let first = first.await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.text().await.unwrap(), "slow");

    proxy.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_waiter_proceeds_when_turn_returns() {
    let backend = common::start_slow_backend(Duration::from_millis(300), "ok").await;
    let proxy = common::start_proxy(common::local_config()).await;
    proxy.admit(backend, 1).await;

    let client = common::client();
    let mut tasks = Vec::new();
    for _ in 0..3 {
        let client = client.clone();
        let url = proxy.url("/");
        tasks.push(tokio::spawn(async move { client.get(url).send().await.unwrap().status() }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), StatusCode::OK);
    }

    proxy.scheduler.stats().flush().await.unwrap();
    let (min, _) = proxy.scheduler.transaction_time_range();
    assert_eq!(proxy.scheduler.transaction_count(), 3);
    assert!(min >= Duration::from_millis(300));

    proxy.stop().await;
}

#[tokio::test]
async fn test_upstream_timeout() {
    let mut config = common::local_config();
    config.timeouts.upstream_secs = 1;
    let proxy = common::start_proxy(config).await;
    proxy.admit(common::start_hanging_backend().await, 1).await;

    let res = common::client().get(proxy.url("/")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(proxy.scheduler.rotation_len(), 1);

    proxy.stop().await;
}

#[tokio::test]
async fn test_oversized_response_is_bad_gateway() {
    let backend = common::start_programmable_backend(|| async { (200, "x".repeat(4096)) }).await;
    let mut config = common::local_config();
    config.limits.max_response_bytes = 1024;
    let proxy = common::start_proxy(config).await;
    proxy.admit(backend, 1).await;

    let res = common::client().get(proxy.url("/")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);

    proxy.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_removal_wakes_waiting_request() {
    let backend = common::start_slow_backend(Duration::from_secs(2), "slow").await;
    let proxy = common::start_proxy(common::local_config()).await;
    let node = proxy.admit(backend, 1).await;

    let client = common::client();
    let holder = tokio::spawn({
        let client = client.clone();
        let url = proxy.url("/");
        async move { client.get(url).send().await.unwrap().status() }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let waiter = tokio::spawn({
        let client = client.clone();
        let url = proxy.url("/");
        async move {
            let start = Instant::now();
            let status = client.get(url).send().await.unwrap().status();
            (status, start.elapsed())
        }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let res = client
        .delete(proxy.control_url(&format!("/node/{}", node.id().as_u64())))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let (status, waited) = waiter.await.unwrap();
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(waited < Duration::from_millis(1500), "woken by removal, not by the turn");

    // In-flight work on a removed node completes normally
    assert_eq!(holder.await.unwrap(), StatusCode::OK);

    proxy.stop().await;
}
