//! Listener binding and serving.
//!
//! # Responsibilities
//! - Bind the data path and control surface listeners
//! - Serve a router over plain HTTP or TLS
//! - Stop accepting and drain in-flight requests on shutdown
//!
//! # Design Decisions
//! - Binding is separate from serving so callers (and tests) learn the local address first
//! - Connection info is attached to every request for `X-Forwarded-For`

use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;

use crate::lifecycle::ShutdownSignal;

/// Upper bound on draining TLS connections after shutdown.
const TLS_DRAIN_GRACE: Duration = Duration::from_secs(10);

/// Bind a TCP listener on `bind_address` (`ip:port`).
pub async fn bind(bind_address: &str) -> io::Result<TcpListener> {
    let addr: SocketAddr = bind_address
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(address = %listener.local_addr()?, "Listener bound");
    Ok(listener)
}

/// Serve `router` on `listener` until `shutdown` fires.
pub async fn serve(
    name: &'static str,
    listener: TcpListener,
    router: Router,
    tls: Option<RustlsConfig>,
    mut shutdown: ShutdownSignal,
) -> io::Result<()> {
    let addr = listener.local_addr()?;
    let app = router.into_make_service_with_connect_info::<SocketAddr>();

    match tls {
        None => {
            tracing::info!(server = name, address = %addr, "HTTP server starting");
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.recv().await })
                .await?;
        }
        Some(config) => {
            tracing::info!(server = name, address = %addr, "HTTPS server starting");
            let handle = axum_server::Handle::new();
            let trigger = handle.clone();
            tokio::spawn(async move {
                shutdown.recv().await;
                trigger.graceful_shutdown(Some(TLS_DRAIN_GRACE));
            });
            axum_server::from_tcp_rustls(listener.into_std()?, config)
                .handle(handle)
                .serve(app)
                .await?;
        }
    }

    tracing::info!(server = name, "Server stopped");
    Ok(())
}
