//! Shared utilities for integration and load testing.
#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use axum::http::StatusCode;
use axum::Router;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use rotation_proxy::config::ProxyConfig;
use rotation_proxy::lifecycle::{Proxy, Shutdown, StartupError};
use rotation_proxy::load_balancer::provision;
use rotation_proxy::load_balancer::stats::DEFAULT_STATS_BUFFER;
use rotation_proxy::{Node, Scheduler};

async fn bind_ephemeral() -> TcpListener {
    TcpListener::bind("127.0.0.1:0").await.unwrap()
}

/// Start a backend that answers every request with `200 body`.
pub async fn start_mock_backend(body: &'static str) -> SocketAddr {
    start_programmable_backend(move || async move { (200, body.to_string()) }).await
}

/// Start a backend whose status and body come from `f`.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = bind_ephemeral().await;
    let addr = listener.local_addr().unwrap();
    let app = Router::new().fallback(move || {
        let f = f.clone();
        async move {
            let (status, body) = f().await;
            (StatusCode::from_u16(status).unwrap(), body)
        }
    });
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Start a backend that waits `delay` before answering `200 body`.
pub async fn start_slow_backend(delay: Duration, body: &'static str) -> SocketAddr {
    start_programmable_backend(move || async move {
        tokio::time::sleep(delay).await;
        (200, body.to_string())
    })
    .await
}

/// Start a backend that reads the request and never answers.
pub async fn start_hanging_backend() -> SocketAddr {
    let listener = bind_ephemeral().await;
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut buf = [0u8; 1024];
                        let _ = socket.read(&mut buf).await;
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}

/// An address nothing listens on.
pub async fn dead_backend_addr() -> SocketAddr {
    let listener = bind_ephemeral().await;
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Defaults with ephemeral loopback listeners and no periodic rebalancing.
pub fn local_config() -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.data.bind_address = "127.0.0.1:0".into();
    config.control.bind_address = "127.0.0.1:0".into();
    config.rebalance.enabled = false;
    config
}

/// A proxy serving on real sockets.
pub struct TestProxy {
    pub data: SocketAddr,
    pub control: Option<SocketAddr>,
    pub scheduler: Arc<Scheduler>,
    shutdown: Shutdown,
    task: JoinHandle<Result<(), StartupError>>,
}

pub async fn start_proxy(config: ProxyConfig) -> TestProxy {
    let proxy = Proxy::bind(config, None).await.unwrap();
    let data = proxy.data_addr().unwrap();
    let control = proxy.control_addr();
    let scheduler = proxy.scheduler().clone();
    let shutdown = Shutdown::new();
    let task = tokio::spawn(proxy.run(shutdown.clone()));

    TestProxy {
        data,
        control,
        scheduler,
        shutdown,
        task,
    }
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.data, path)
    }

    pub fn control_url(&self, path: &str) -> String {
        format!("http://{}{}", self.control.unwrap(), path)
    }

    /// Admit a loopback backend directly on the scheduler.
    pub async fn admit(&self, backend: SocketAddr, weight: u32) -> Arc<Node> {
        admit(&self.scheduler, backend, weight).await
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("proxy did not stop")
            .unwrap()
            .unwrap();
    }
}

pub async fn admit(scheduler: &Scheduler, backend: SocketAddr, weight: u32) -> Arc<Node> {
    provision::provision(
        scheduler,
        &backend.ip().to_string(),
        backend.port(),
        weight,
        DEFAULT_STATS_BUFFER,
    )
    .await
    .unwrap()
}

/// HTTP client that never pools, so every request is independent.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
