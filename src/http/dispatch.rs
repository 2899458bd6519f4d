//! Request dispatch to scheduled nodes.
//!
//! # Responsibilities
//! - Acquire a node from the scheduler (bounded wait)
//! - Rewrite the request to target that node and forward it
//! - Buffer the upstream response
//! - Complete the transaction: return the node's turn, record its latency
//!
//! # Design Decisions
//! - One attempt per request; a failed exchange is reported, not retried
//! - Completion runs on every path, including cancellation of the handler
//! - The turn is returned before statistics are recorded
//!
//! # Data Flow
//! ```text
//! Request → acquire (503) → rewrite → forward (502/504) → buffer body (502)
//!     → Transaction::finish: release → node.update_time → scheduler.update_time
//! ```

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{HeaderValue, Request, Response, StatusCode, Uri};
use axum::response::IntoResponse;
use hyper::body::Incoming;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use thiserror::Error;
use tokio::runtime::Handle;

use crate::config::ProxyConfig;
use crate::error::Unavailable;
use crate::http::response;
use crate::load_balancer::node::Node;
use crate::load_balancer::scheduler::{Lease, Scheduler};

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Why a request could not be relayed.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Unavailable(#[from] Unavailable),

    #[error("timed out waiting for a free node")]
    AcquireTimeout,

    #[error("cannot address node {node}: {source}")]
    Rewrite {
        node: SocketAddr,
        #[source]
        source: axum::http::Error,
    },

    #[error("upstream request to {node} failed: {source}")]
    Upstream {
        node: SocketAddr,
        #[source]
        source: hyper_util::client::legacy::Error,
    },

    #[error("upstream response from {node} unreadable or too large: {source}")]
    Body {
        node: SocketAddr,
        #[source]
        source: axum::Error,
    },

    #[error("upstream {node} timed out")]
    UpstreamTimeout { node: SocketAddr },
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::Unavailable(_) | DispatchError::AcquireTimeout => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            DispatchError::Rewrite { .. }
            | DispatchError::Upstream { .. }
            | DispatchError::Body { .. } => StatusCode::BAD_GATEWAY,
            DispatchError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Node the failed exchange was scheduled on, if one was acquired.
    pub fn node(&self) -> Option<SocketAddr> {
        match self {
            DispatchError::Unavailable(_) | DispatchError::AcquireTimeout => None,
            DispatchError::Rewrite { node, .. }
            | DispatchError::Upstream { node, .. }
            | DispatchError::Body { node, .. }
            | DispatchError::UpstreamTimeout { node } => Some(*node),
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> axum::response::Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// A successfully relayed exchange.
#[derive(Debug)]
pub struct Dispatched {
    pub node: SocketAddr,
    pub response: Response<Body>,
}

/// Forwards requests to nodes handed out by the scheduler.
#[derive(Debug)]
pub struct Dispatcher {
    scheduler: Arc<Scheduler>,
    client: Client<HttpConnector, Body>,
    acquire_timeout: Duration,
    upstream_timeout: Duration,
    max_response_bytes: usize,
}

impl Dispatcher {
    pub fn new(scheduler: Arc<Scheduler>, config: &ProxyConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            scheduler,
            client,
            acquire_timeout: Duration::from_secs(config.timeouts.acquire_secs),
            upstream_timeout: Duration::from_secs(config.timeouts.upstream_secs),
            max_response_bytes: config.limits.max_response_bytes,
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Relay one request through the next node in the rotation.
    ///
    /// `client` is the peer address appended to `X-Forwarded-For`.
    pub async fn dispatch(
        &self,
        request: Request<Body>,
        client: Option<SocketAddr>,
    ) -> Result<Dispatched, DispatchError> {
        let lease = match tokio::time::timeout(self.acquire_timeout, self.scheduler.acquire()).await
        {
            Ok(acquired) => acquired?,
            Err(_) => return Err(DispatchError::AcquireTimeout),
        };
        let node = lease.node().addr();

        let request = rewrite(request, node, client)
            .map_err(|source| DispatchError::Rewrite { node, source })?;

        let transaction = Transaction::begin(lease, self.scheduler.clone());
        let outcome = self.forward(request, node).await;
        let elapsed = transaction.finish().await;

        tracing::trace!(node = %node, elapsed_ms = elapsed.as_millis() as u64, "Transaction complete");
        outcome.map(|response| Dispatched { node, response })
    }

    async fn forward(
        &self,
        request: Request<Body>,
        node: SocketAddr,
    ) -> Result<Response<Body>, DispatchError> {
        let exchange = async {
            let upstream: Response<Incoming> = self
                .client
                .request(request)
                .await
                .map_err(|source| DispatchError::Upstream { node, source })?;
            let (parts, body) = upstream.into_parts();
            let bytes = axum::body::to_bytes(Body::new(body), self.max_response_bytes)
                .await
                .map_err(|source| DispatchError::Body { node, source })?;
            Ok(response::from_upstream(parts, bytes))
        };

        tokio::time::timeout(self.upstream_timeout, exchange)
            .await
            .map_err(|_| DispatchError::UpstreamTimeout { node })?
    }
}

/// Point `request` at `node`, keeping path, query, method and headers.
fn rewrite(
    request: Request<Body>,
    node: SocketAddr,
    client: Option<SocketAddr>,
) -> Result<Request<Body>, axum::http::Error> {
    let (mut parts, body) = request.into_parts();

    let mut uri_parts = parts.uri.into_parts();
    uri_parts.scheme = Some(Scheme::HTTP);
    uri_parts.authority = Some(Authority::from_str(&node.to_string())?);
    if uri_parts.path_and_query.is_none() {
        uri_parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }
    parts.uri = Uri::from_parts(uri_parts)?;

    response::strip_hop_by_hop(&mut parts.headers);

    if let Some(client) = client {
        let forwarded = match parts
            .headers
            .get(X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
        {
            Some(prior) => format!("{prior}, {}", client.ip()),
            None => client.ip().to_string(),
        };
        parts
            .headers
            .insert(X_FORWARDED_FOR, HeaderValue::from_str(&forwarded)?);
    }

    Ok(Request::from_parts(parts, body))
}

/// An in-flight exchange holding a node's turn.
///
/// [`Transaction::finish`] completes it; dropping it unfinished (handler
/// cancelled or panicked) completes it on a spawned task instead.
#[derive(Debug)]
pub struct Transaction {
    lease: Option<Lease>,
    scheduler: Arc<Scheduler>,
    started: Instant,
}

impl Transaction {
    pub fn begin(lease: Lease, scheduler: Arc<Scheduler>) -> Self {
        Self {
            lease: Some(lease),
            scheduler,
            started: Instant::now(),
        }
    }

    pub fn node(&self) -> Option<&Arc<Node>> {
        self.lease.as_ref().map(Lease::node)
    }

    /// Return the node's turn and record the elapsed time.
    pub async fn finish(mut self) -> Duration {
        let elapsed = self.started.elapsed();
        if let Some(lease) = self.lease.take() {
            complete(lease, self.scheduler.clone(), elapsed).await;
        }
        elapsed
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else { return };
        let elapsed = self.started.elapsed();
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(complete(lease, self.scheduler.clone(), elapsed));
            }
            // The lease's own drop still returns the turn
            Err(_) => drop(lease),
        }
    }
}

async fn complete(lease: Lease, scheduler: Arc<Scheduler>, elapsed: Duration) {
    let node = lease.node().clone();
    if let Err(e) = lease.release().await {
        tracing::debug!(node = %node.addr(), error = %e, "Turn not returned");
    }
    if let Err(e) = node.update_time(elapsed).await {
        tracing::debug!(node = %node.addr(), error = %e, "Node statistics closed");
    }
    if let Err(e) = scheduler.update_time(elapsed).await {
        tracing::debug!(error = %e, "Scheduler statistics closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header;

    fn node_addr() -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 7], 9001))
    }

    #[test]
    fn rewrite_targets_node_and_keeps_path() {
        let req = Request::builder()
            .method("POST")
            .uri("/api/items?page=2")
            .header(header::HOST, "proxy.local")
            .header(header::CONNECTION, "close")
            .body(Body::empty())
            .unwrap();

        let out = rewrite(req, node_addr(), Some(SocketAddr::from(([192, 168, 1, 5], 5000)))).unwrap();

        assert_eq!(out.method(), "POST");
        assert_eq!(out.uri().to_string(), "http://10.0.0.7:9001/api/items?page=2");
        assert_eq!(out.headers()[header::HOST], "proxy.local");
        assert!(!out.headers().contains_key(header::CONNECTION));
        assert_eq!(out.headers()[X_FORWARDED_FOR], "192.168.1.5");
    }

    #[test]
    fn rewrite_appends_forwarded_for() {
        let req = Request::builder()
            .uri("http://proxy.local/")
            .header(X_FORWARDED_FOR, "1.2.3.4")
            .body(Body::empty())
            .unwrap();

        let out = rewrite(req, node_addr(), Some(SocketAddr::from(([5, 6, 7, 8], 1)))).unwrap();
        assert_eq!(out.headers()[X_FORWARDED_FOR], "1.2.3.4, 5.6.7.8");
        assert_eq!(out.uri().to_string(), "http://10.0.0.7:9001/");
    }

    #[test]
    fn errors_map_to_gateway_statuses() {
        assert_eq!(
            DispatchError::Unavailable(Unavailable::NoNodes).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(DispatchError::AcquireTimeout.status(), StatusCode::SERVICE_UNAVAILABLE);
        let timeout = DispatchError::UpstreamTimeout { node: node_addr() };
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(timeout.node(), Some(node_addr()));
    }

    #[tokio::test]
    async fn dropped_transaction_returns_turn_and_records() {
        let sched = Arc::new(Scheduler::new(4));
        let node = Arc::new(Node::new(node_addr(), 1));
        sched.admit(node.clone()).await.unwrap();

        let lease = sched.acquire().await.unwrap();
        assert_eq!(sched.rotation_len(), 0);
        drop(Transaction::begin(lease, sched.clone()));

        let lease = tokio::time::timeout(Duration::from_secs(1), sched.acquire())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lease.node().id(), node.id());

        // Completion records after the turn is back; wait for it to land
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                node.stats().flush().await.unwrap();
                sched.stats().flush().await.unwrap();
                if node.transaction_count() == 1 && sched.transaction_count() == 1 {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn no_nodes_is_service_unavailable() {
        let sched = Arc::new(Scheduler::new(4));
        let dispatcher = Dispatcher::new(sched, &ProxyConfig::default());
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();

        let err = dispatcher.dispatch(req, None).await.unwrap_err();
        assert!(matches!(err, DispatchError::Unavailable(Unavailable::NoNodes)));
        assert_eq!(err.node(), None);
    }
}
