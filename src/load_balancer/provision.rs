//! Node provisioning.
//!
//! # Responsibilities
//! - Resolve a node definition (host, port, weight) to a socket address
//! - Construct and admit the node
//! - Keep the config-declared node set in sync with the config file
//!
//! # Design Decisions
//! - Resolution happens here, before the scheduler; the scheduler only sees valid nodes
//! - The first resolved address wins
//! - Nodes added through the control API are never touched by reconciliation

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::NodeConfig;
use crate::error::AdmissionError;
use crate::load_balancer::node::{Node, NodeId};
use crate::load_balancer::scheduler::Scheduler;

/// Resolve `address:port` to the first socket address it maps to.
pub async fn resolve(address: &str, port: u16) -> Result<SocketAddr, AdmissionError> {
    if port == 0 {
        return Err(AdmissionError::InvalidPort);
    }
    let mut addrs = tokio::net::lookup_host((address, port))
        .await
        .map_err(|source| AdmissionError::Resolve {
            address: address.to_string(),
            source,
        })?;
    addrs
        .next()
        .ok_or_else(|| AdmissionError::NoAddress(address.to_string()))
}

/// Resolve, construct and admit a node.
pub async fn provision(
    scheduler: &Scheduler,
    address: &str,
    port: u16,
    weight: u32,
    stats_buffer: usize,
) -> Result<Arc<Node>, AdmissionError> {
    let addr = resolve(address, port).await?;
    let node = Arc::new(Node::with_stats_buffer(addr, weight, stats_buffer));
    scheduler.admit(node.clone()).await?;
    Ok(node)
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub admitted: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Tracks which live nodes came from the config file.
#[derive(Debug)]
pub struct ConfigNodes {
    scheduler: Arc<Scheduler>,
    stats_buffer: usize,
    managed: HashMap<NodeConfig, NodeId>,
}

impl ConfigNodes {
    pub fn new(scheduler: Arc<Scheduler>, stats_buffer: usize) -> Self {
        Self {
            scheduler,
            stats_buffer,
            managed: HashMap::new(),
        }
    }

    /// Make the config-declared node set match `desired`.
    ///
    /// Definitions that disappeared are removed, new ones admitted. A changed
    /// weight counts as one removal plus one admission.
    pub async fn reconcile(&mut self, desired: &[NodeConfig]) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();

        let stale: Vec<NodeConfig> = self
            .managed
            .keys()
            .filter(|def| !desired.contains(def))
            .cloned()
            .collect();
        for def in stale {
            if let Some(id) = self.managed.remove(&def) {
                if self.scheduler.remove(id).is_some() {
                    summary.removed += 1;
                }
            }
        }

        for def in desired {
            if self.managed.contains_key(def) {
                continue;
            }
            match provision(
                &self.scheduler,
                &def.address,
                def.port,
                def.weight,
                self.stats_buffer,
            )
            .await
            {
                Ok(node) => {
                    self.managed.insert(def.clone(), node.id());
                    summary.admitted += 1;
                }
                Err(e) => {
                    tracing::error!(
                        address = %def.address,
                        port = def.port,
                        error = %e,
                        "Failed to admit configured node"
                    );
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            admitted = summary.admitted,
            removed = summary.removed,
            failed = summary.failed,
            "Configured nodes reconciled"
        );
        summary
    }

    pub fn managed_ids(&self) -> Vec<NodeId> {
        self.managed.values().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::stats::DEFAULT_STATS_BUFFER;

    fn def(port: u16, weight: u32) -> NodeConfig {
        NodeConfig {
            address: "127.0.0.1".into(),
            port,
            weight,
        }
    }

    #[tokio::test]
    async fn resolve_literal_and_hostname() {
        let addr = resolve("127.0.0.1", 9001).await.unwrap();
        assert_eq!(addr, SocketAddr::from(([127, 0, 0, 1], 9001)));

        let local = resolve("localhost", 9001).await.unwrap();
        assert!(local.ip().is_loopback());
        assert_eq!(local.port(), 9001);
    }

    #[tokio::test]
    async fn resolve_rejects_bad_input() {
        assert!(matches!(
            resolve("127.0.0.1", 0).await,
            Err(AdmissionError::InvalidPort)
        ));
        assert!(resolve("not a host name", 9001).await.is_err());
    }

    #[tokio::test]
    async fn provision_admits_resolved_node() {
        let sched = Scheduler::new(16);
        let node = provision(&sched, "127.0.0.1", 9001, 3, DEFAULT_STATS_BUFFER)
            .await
            .unwrap();
        assert_eq!(node.weight(), 3);
        assert_eq!(sched.live_count(), 1);
        assert_eq!(sched.rotation_len(), 3);
    }

    #[tokio::test]
    async fn reconcile_adds_and_removes() {
        let sched = Arc::new(Scheduler::new(64));
        let mut nodes = ConfigNodes::new(sched.clone(), DEFAULT_STATS_BUFFER);

        // A node added out of band must survive reconciliation
        let manual = provision(&sched, "127.0.0.1", 9100, 1, DEFAULT_STATS_BUFFER)
            .await
            .unwrap();

        let first = nodes.reconcile(&[def(9001, 1), def(9002, 2)]).await;
        assert_eq!(first.admitted, 2);
        assert_eq!(sched.live_count(), 3);

        let second = nodes.reconcile(&[def(9002, 2), def(9003, 1)]).await;
        assert_eq!(
            second,
            ReconcileSummary {
                admitted: 1,
                removed: 1,
                failed: 0
            }
        );
        assert_eq!(sched.live_count(), 3);
        assert!(sched.get(manual.id()).is_some());

        let third = nodes.reconcile(&[def(9002, 4), def(9003, 1)]).await;
        assert_eq!((third.admitted, third.removed), (1, 1));
        assert_eq!(nodes.managed_ids().len(), 2);
    }
}
