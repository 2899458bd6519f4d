//! Data path HTTP server.
//!
//! # Responsibilities
//! - Create the Axum router for proxied traffic
//! - Wire up middleware (tracing, request ID)
//! - Match the configured path prefix and hand requests to the dispatcher
//! - Record per-request metrics

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::ProxyConfig;
use crate::http::dispatch::Dispatcher;
use crate::http::request::{propagate_request_id, set_request_id, RequestIdExt};
use crate::lifecycle::ShutdownSignal;
use crate::load_balancer::scheduler::Scheduler;
use crate::net::listener;
use crate::observability::metrics;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    /// Path prefix served by the data path.
    pub path: Arc<str>,
}

/// HTTP server for the data path.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(scheduler: Arc<Scheduler>, config: &ProxyConfig) -> Self {
        let state = AppState {
            dispatcher: Arc::new(Dispatcher::new(scheduler, config)),
            path: Arc::from(config.data.path.as_str()),
        };
        Self {
            router: Self::build_router(state),
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .fallback(proxy_handler)
            .with_state(state)
            .layer(propagate_request_id())
            .layer(set_request_id())
            .layer(TraceLayer::new_for_http())
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        tls: Option<RustlsConfig>,
        shutdown: ShutdownSignal,
    ) -> Result<(), std::io::Error> {
        listener::serve("data", listener, self.router, tls, shutdown).await
    }
}

/// Main proxy handler: one node, one exchange.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let request_id = request.request_id().unwrap_or("unknown").to_string();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    if !in_prefix(&path, &state.path) {
        tracing::debug!(request_id = %request_id, path = %path, "Outside proxied path");
        metrics::record_request(&method, 404, "none", start_time);
        return (StatusCode::NOT_FOUND, "No such path").into_response();
    }

    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    tracing::debug!(request_id = %request_id, method = %method, path = %path, "Proxying request");

    match state.dispatcher.dispatch(request, client).await {
        Ok(dispatched) => {
            let status = dispatched.response.status();
            metrics::record_request(&method, status.as_u16(), &dispatched.node.to_string(), start_time);
            dispatched.response.into_response()
        }
        Err(e) => {
            let status = e.status();
            let node = e.node().map(|n| n.to_string());
            if status == StatusCode::SERVICE_UNAVAILABLE {
                tracing::warn!(request_id = %request_id, error = %e, "No node available");
            } else {
                tracing::error!(request_id = %request_id, node = ?node, error = %e, "Upstream error");
            }
            metrics::record_request(&method, status.as_u16(), node.as_deref().unwrap_or("none"), start_time);
            e.into_response()
        }
    }
}

/// Whether `path` lies under `prefix`, matching whole segments only.
fn in_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || prefix.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}
