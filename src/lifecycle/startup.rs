//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order
//! - Bind listeners (data path, control surface)
//! - Admit configured nodes, start the rebalancer and config watcher
//! - Serve until shutdown, then close the scheduler last
//!
//! # Design Decisions
//! - Fail fast: bind and TLS errors are fatal
//! - Listeners are bound before nodes are admitted but serve only afterwards
//! - In-flight transactions drain before the scheduler closes

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use axum_server::tls_rustls::RustlsConfig;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::admin::{control_router, ControlState};
use crate::config::watcher::ConfigWatcher;
use crate::config::ProxyConfig;
use crate::http::HttpServer;
use crate::lifecycle::Shutdown;
use crate::load_balancer::provision::ConfigNodes;
use crate::load_balancer::rebalance::{spawn_rebalancer, SlowNodePolicy};
use crate::load_balancer::scheduler::Scheduler;
use crate::net::{listener, tls};
use crate::observability::metrics;

/// Fatal startup or serving failure.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind {which} listener on {address}: {source}")]
    Bind {
        which: &'static str,
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to load TLS material for {which} listener: {source}")]
    Tls {
        which: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("{which} server failed: {source}")]
    Serve {
        which: &'static str,
        #[source]
        source: io::Error,
    },
}

struct Endpoint {
    listener: TcpListener,
    tls: Option<RustlsConfig>,
}

async fn endpoint(
    which: &'static str,
    address: &str,
    tls_config: Option<&crate::config::TlsConfig>,
) -> Result<Endpoint, StartupError> {
    let tls = tls::load_optional(tls_config)
        .await
        .map_err(|source| StartupError::Tls { which, source })?;
    let listener = listener::bind(address)
        .await
        .map_err(|source| StartupError::Bind {
            which,
            address: address.to_string(),
            source,
        })?;
    Ok(Endpoint { listener, tls })
}

/// A proxy with its listeners bound, ready to serve.
pub struct Proxy {
    config: ProxyConfig,
    config_path: Option<PathBuf>,
    scheduler: Arc<Scheduler>,
    data: Endpoint,
    control: Option<Endpoint>,
}

impl Proxy {
    /// Build the scheduler and bind every configured listener.
    pub async fn bind(
        config: ProxyConfig,
        config_path: Option<PathBuf>,
    ) -> Result<Self, StartupError> {
        if config.observability.metrics_enabled {
            match config.observability.metrics_address.parse::<SocketAddr>() {
                Ok(addr) => metrics::init_metrics(addr),
                Err(e) => tracing::error!(error = %e, "Invalid metrics address; metrics disabled"),
            }
        }

        let scheduler = Arc::new(Scheduler::from_config(&config.scheduler));

        let data = endpoint("data", &config.data.bind_address, config.data.tls.as_ref()).await?;
        let control = if config.control.enabled {
            Some(
                endpoint(
                    "control",
                    &config.control.bind_address,
                    config.control.tls.as_ref(),
                )
                .await?,
            )
        } else {
            None
        };

        Ok(Self {
            config,
            config_path,
            scheduler,
            data,
            control,
        })
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn data_addr(&self) -> io::Result<SocketAddr> {
        self.data.listener.local_addr()
    }

    pub fn control_addr(&self) -> Option<SocketAddr> {
        self.control
            .as_ref()
            .and_then(|c| c.listener.local_addr().ok())
    }

    /// Serve until `shutdown` is triggered, then drain and close the scheduler.
    pub async fn run(self, shutdown: Shutdown) -> Result<(), StartupError> {
        let Self {
            config,
            config_path,
            scheduler,
            data,
            control,
        } = self;

        let mut config_nodes = ConfigNodes::new(scheduler.clone(), config.scheduler.stats_buffer);
        config_nodes.reconcile(&config.nodes).await;

        let rebalancer = config.rebalance.enabled.then(|| {
            spawn_rebalancer(
                &scheduler,
                Arc::new(SlowNodePolicy::from_config(&config.rebalance)),
                Duration::from_secs(config.rebalance.interval_secs),
            )
        });

        let watcher = config_path.and_then(|path| spawn_reloader(path, config_nodes, &shutdown));

        let control_task = control.map(|endpoint| {
            let router = control_router(
                ControlState::new(scheduler.clone(), &config),
                config.control.cors,
            );
            let signal = shutdown.subscribe();
            let on_failure = shutdown.clone();
            tokio::spawn(async move {
                let result =
                    listener::serve("control", endpoint.listener, router, endpoint.tls, signal)
                        .await;
                if let Err(e) = &result {
                    tracing::error!(error = %e, "Control server failed");
                    on_failure.trigger();
                }
                result
            })
        });

        let data_result = HttpServer::new(scheduler.clone(), &config)
            .run(data.listener, data.tls, shutdown.subscribe())
            .await;
        shutdown.trigger();

        let control_result = match control_task {
            Some(task) => match task.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(error = %e, "Control server task panicked");
                    Ok(())
                }
            },
            None => Ok(()),
        };

        tracing::info!("Listeners drained, closing scheduler");
        scheduler.shutdown().await;
        if let Some(task) = rebalancer {
            let _ = task.await;
        }
        if let Some(task) = watcher {
            let _ = task.await;
        }
        tracing::info!("Shutdown complete");

        data_result.map_err(|source| StartupError::Serve {
            which: "data",
            source,
        })?;
        control_result.map_err(|source| StartupError::Serve {
            which: "control",
            source,
        })
    }
}

/// Reconcile configured nodes whenever the config file changes.
fn spawn_reloader(
    path: PathBuf,
    mut config_nodes: ConfigNodes,
    shutdown: &Shutdown,
) -> Option<JoinHandle<()>> {
    let (watcher, mut updates) = ConfigWatcher::new(&path);
    let handle = match watcher.run() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!(path = ?path, error = %e, "Config watcher unavailable; node list is static");
            return None;
        }
    };
    let mut signal = shutdown.subscribe();

    Some(tokio::spawn(async move {
        let _watcher = handle;
        loop {
            tokio::select! {
                Some(config) = updates.recv() => {
                    config_nodes.reconcile(&config.nodes).await;
                }
                _ = signal.recv() => break,
            }
        }
    }))
}
