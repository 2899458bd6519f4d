//! Backend worker node.
//!
//! # Responsibilities
//! - Represent a single backend worker (address + weight)
//! - Own the node's private transaction statistics
//! - Provide a stable identity for the scheduler's live set

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::SchedulerError;
use crate::load_balancer::stats::{StatsSnapshot, TransactionStats, DEFAULT_STATS_BUFFER};

/// Global counter for node IDs.
static NODE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        Self(NODE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for NodeId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// A single backend worker.
///
/// Nodes are shared as `Arc<Node>`; the only mutable state is the statistics
/// accumulator, which is updated through [`Node::update_time`].
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    addr: SocketAddr,
    /// Number of rotation tokens granted at admission.
    weight: u32,
    stats: TransactionStats,
}

impl Node {
    /// Create a new node. Must be called from within a Tokio runtime.
    pub fn new(addr: SocketAddr, weight: u32) -> Self {
        Self::with_stats_buffer(addr, weight, DEFAULT_STATS_BUFFER)
    }

    /// Create a node whose statistics intake holds `buffer` pending updates.
    pub fn with_stats_buffer(addr: SocketAddr, weight: u32, buffer: usize) -> Self {
        Self {
            id: NodeId::next(),
            addr,
            weight,
            stats: TransactionStats::spawn(buffer),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Configured capacity weight.
    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Record the latency of one completed transaction.
    pub async fn update_time(&self, duration: Duration) -> Result<(), SchedulerError> {
        self.stats.update_time(duration).await
    }

    /// Zero the statistics. Identity, address and weight are untouched.
    pub async fn reset(&self) -> Result<(), SchedulerError> {
        self.stats.reset().await
    }

    pub fn average_transaction_time(&self) -> Duration {
        self.stats.average_transaction_time()
    }

    pub fn transaction_count(&self) -> u64 {
        self.stats.transaction_count()
    }

    pub fn transaction_time(&self) -> Duration {
        self.stats.transaction_time()
    }

    pub fn transaction_time_range(&self) -> (Duration, Duration) {
        self.stats.transaction_time_range()
    }

    pub fn stats(&self) -> &TransactionStats {
        &self.stats
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([192, 168, 10, 100], port))
    }

    #[tokio::test]
    async fn node_ids_are_unique_and_increasing() {
        let n1 = Node::new(addr(9001), 20);
        let n2 = Node::new(addr(9001), 20);
        assert_ne!(n1.id(), n2.id());
        assert!(n2.id() > n1.id());
    }

    #[tokio::test]
    async fn update_time_tracks_range() {
        let node = Node::new(addr(9001), 20);
        for nanos in [12u64, 8, 30, 15] {
            node.update_time(Duration::from_nanos(nanos)).await.unwrap();
        }
        node.stats().flush().await.unwrap();

        assert_eq!(node.transaction_count(), 4);
        assert_eq!(node.average_transaction_time(), Duration::from_nanos(16));
        assert_eq!(
            node.transaction_time_range(),
            (Duration::from_nanos(8), Duration::from_nanos(30))
        );
    }

    #[tokio::test]
    async fn reset_keeps_identity() {
        let node = Node::new(addr(9001), 20);
        let id = node.id();
        node.update_time(Duration::from_millis(3)).await.unwrap();

        node.reset().await.unwrap();

        assert_eq!(node.id(), id);
        assert_eq!(node.addr(), addr(9001));
        assert_eq!(node.weight(), 20);
        assert_eq!(node.transaction_count(), 0);
        assert_eq!(node.transaction_time(), Duration::ZERO);
        assert_eq!(node.transaction_time_range(), (Duration::ZERO, Duration::ZERO));
    }
}
