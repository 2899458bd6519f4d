//! Node scheduler: a bounded rotation of node tokens.
//!
//! # Responsibilities
//! - Admit nodes by minting `weight` tokens into the rotation
//! - Hand out exactly one token per request, blocking while every token is in use
//! - Return tokens to the tail of the rotation after the transaction completes
//! - Remove nodes in O(1) by dropping them from the live set only
//! - Accumulate scheduler-wide transaction statistics
//!
//! # Design Decisions
//! - The rotation is a bounded Tokio mpsc channel; all acquirers share the receiver
//!   behind an async mutex, which makes the queue FIFO for tokens and for waiters
//! - The live set is the source of truth; tokens of removed nodes are discarded
//!   lazily when they surface at the head of the rotation
//! - Every admission gets a fresh generation; a token is live only while its node
//!   is admitted under the generation the token was minted with
//! - A node's turns come back only when its transaction finishes, so slow nodes
//!   naturally receive fewer turns than fast ones
//! - The live-set lock is never held across a channel operation

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};

use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, Unavailable};
use crate::load_balancer::node::{Node, NodeId};
use crate::load_balancer::rebalance::{NodeSample, RebalancePolicy, WeightChange};
use crate::load_balancer::stats::{StatsSnapshot, TransactionStats, DEFAULT_STATS_BUFFER};
use crate::observability::metrics;

/// Default rotation capacity; bounds the total number of queued tokens.
pub const DEFAULT_ROTATION_CAPACITY: usize = 1000;

/// One unit of assignable capacity for a node.
#[derive(Debug)]
struct Token {
    node: Arc<Node>,
    generation: u64,
}

#[derive(Debug)]
struct Admission {
    node: Arc<Node>,
    generation: u64,
    weight: u32,
}

/// A live-set entry as seen by the control surface.
#[derive(Debug, Clone)]
pub struct LiveNode {
    pub node: Arc<Node>,
    /// Weight of the current admission (may be below the configured weight after a rebalance).
    pub effective_weight: u32,
}

/// Schedules requests onto admitted nodes.
#[derive(Debug)]
pub struct Scheduler {
    live: Mutex<HashMap<NodeId, Admission>>,
    rotation_tx: mpsc::Sender<Token>,
    rotation_rx: tokio::sync::Mutex<mpsc::Receiver<Token>>,
    capacity: usize,
    next_generation: AtomicU64,
    /// Woken whenever a node leaves the live set.
    membership: Notify,
    closed: watch::Sender<bool>,
    stats: TransactionStats,
}

impl Scheduler {
    /// Create a scheduler whose rotation holds at most `capacity` tokens (0 selects the default).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(capacity: usize) -> Self {
        Self::with_stats_buffer(capacity, DEFAULT_STATS_BUFFER)
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::with_stats_buffer(config.rotation_capacity, config.stats_buffer)
    }

    fn with_stats_buffer(capacity: usize, stats_buffer: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_ROTATION_CAPACITY
        } else {
            capacity
        };
        let (rotation_tx, rotation_rx) = mpsc::channel(capacity);
        let (closed, _) = watch::channel(false);

        Self {
            live: Mutex::new(HashMap::new()),
            rotation_tx,
            rotation_rx: tokio::sync::Mutex::new(rotation_rx),
            capacity,
            next_generation: AtomicU64::new(1),
            membership: Notify::new(),
            closed,
            stats: TransactionStats::spawn(stats_buffer),
        }
    }

    fn lock_live(&self) -> MutexGuard<'_, HashMap<NodeId, Admission>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit a node with its configured weight.
    pub async fn admit(&self, node: Arc<Node>) -> Result<(), SchedulerError> {
        let weight = node.weight();
        self.admit_with_weight(node, weight).await
    }

    /// Admit a node, minting `weight` tokens for it.
    ///
    /// Blocks while the rotation is full. A weight of zero registers the node
    /// for statistics only; it is never selected.
    pub async fn admit_with_weight(
        &self,
        node: Arc<Node>,
        weight: u32,
    ) -> Result<(), SchedulerError> {
        if self.is_closed() {
            return Err(SchedulerError::Closed);
        }
        if weight as usize > self.capacity {
            tracing::warn!(
                node = %node.id(),
                weight,
                capacity = self.capacity,
                "Node weight exceeds rotation capacity; admission will wait for tokens to drain"
            );
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let live_count = {
            let mut live = self.lock_live();
            live.insert(
                node.id(),
                Admission {
                    node: node.clone(),
                    generation,
                    weight,
                },
            );
            live.len()
        };
        metrics::record_live_nodes(live_count);

        tracing::info!(
            node = %node.id(),
            addr = %node.addr(),
            weight,
            "Node admitted"
        );

        let mut closed = self.closed.subscribe();
        for _ in 0..weight {
            let token = Token {
                node: node.clone(),
                generation,
            };
            enqueue(&self.rotation_tx, &mut closed, token).await?;
        }
        Ok(())
    }

    /// Take the next live token, waiting while every token is in use.
    ///
    /// Stale tokens (removed or re-admitted nodes) are discarded on the way.
    /// Returns [`Unavailable::NoNodes`] as soon as no live node has a positive weight.
    pub async fn acquire(&self) -> Result<Lease, Unavailable> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(Unavailable::Closed);
        }

        let mut rotation = tokio::select! {
            guard = self.rotation_rx.lock() => guard,
            _ = closed.wait_for(|c| *c) => return Err(Unavailable::Closed),
        };

        loop {
            // Register before checking membership so a concurrent removal is not missed
            let removed = self.membership.notified();
            tokio::pin!(removed);
            removed.as_mut().enable();

            if self.schedulable_count() == 0 {
                return Err(Unavailable::NoNodes);
            }

            let token = tokio::select! {
                biased;
                _ = closed.wait_for(|c| *c) => return Err(Unavailable::Closed),
                _ = &mut removed => continue,
                token = rotation.recv() => match token {
                    Some(token) => token,
                    None => return Err(Unavailable::Closed),
                },
            };

            if self.is_current(&token) {
                return Ok(self.lease(token));
            }
            discard(token);
        }
    }

    /// Take a live token if one is queued right now.
    ///
    /// Returns `None` when the rotation holds no live token or another
    /// acquirer is currently waiting on it.
    pub fn try_acquire(&self) -> Option<Lease> {
        if self.is_closed() {
            return None;
        }
        let mut rotation = self.rotation_rx.try_lock().ok()?;
        loop {
            let token = rotation.try_recv().ok()?;
            if self.is_current(&token) {
                return Some(self.lease(token));
            }
            discard(token);
        }
    }

    /// Return a leased token to the tail of the rotation.
    pub async fn release(&self, lease: Lease) -> Result<(), SchedulerError> {
        lease.release().await
    }

    /// Remove a node from the live set.
    ///
    /// The rotation is not touched; outstanding tokens are discarded as they
    /// surface. In-flight transactions on the node complete normally.
    pub fn remove(&self, id: NodeId) -> Option<Arc<Node>> {
        let (removed, live_count) = {
            let mut live = self.lock_live();
            let removed = live.remove(&id);
            (removed, live.len())
        };
        let admission = removed?;

        self.membership.notify_waiters();
        metrics::record_live_nodes(live_count);
        tracing::info!(node = %id, addr = %admission.node.addr(), "Node removed");
        Some(admission.node)
    }

    /// Look up an admitted node.
    pub fn get(&self, id: NodeId) -> Option<LiveNode> {
        self.lock_live().get(&id).map(|a| LiveNode {
            node: a.node.clone(),
            effective_weight: a.weight,
        })
    }

    /// Snapshot of the live set, ordered by node ID.
    pub fn nodes(&self) -> Vec<LiveNode> {
        let mut nodes: Vec<LiveNode> = self
            .lock_live()
            .values()
            .map(|a| LiveNode {
                node: a.node.clone(),
                effective_weight: a.weight,
            })
            .collect();
        nodes.sort_by_key(|n| n.node.id());
        nodes
    }

    pub fn live_count(&self) -> usize {
        self.lock_live().len()
    }

    /// Live nodes admitted with at least one token.
    fn schedulable_count(&self) -> usize {
        self.lock_live().values().filter(|a| a.weight > 0).count()
    }

    /// Tokens currently queued in the rotation, stale ones included.
    pub fn rotation_len(&self) -> usize {
        self.rotation_tx.max_capacity() - self.rotation_tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Receiver that flips to `true` on shutdown.
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    fn is_current(&self, token: &Token) -> bool {
        self.lock_live()
            .get(&token.node.id())
            .is_some_and(|a| a.generation == token.generation)
    }

    fn lease(&self, token: Token) -> Lease {
        Lease {
            node: token.node,
            generation: token.generation,
            released: false,
            rotation: self.rotation_tx.clone(),
            closed: self.closed.subscribe(),
        }
    }

    /// Run one rebalance round with `policy`.
    ///
    /// Each planned change removes and re-admits the node at the lower weight,
    /// which invalidates all tokens of its previous admission, then resets the
    /// node's statistics so the next round judges it on fresh samples.
    pub async fn rebalance(
        &self,
        policy: &dyn RebalancePolicy,
    ) -> Result<Vec<WeightChange>, SchedulerError> {
        if self.is_closed() {
            return Err(SchedulerError::Closed);
        }

        let samples: Vec<NodeSample> = self
            .nodes()
            .iter()
            .map(|n| NodeSample {
                id: n.node.id(),
                effective_weight: n.effective_weight,
                transaction_count: n.node.transaction_count(),
                average: n.node.average_transaction_time(),
            })
            .collect();

        let mut applied = Vec::new();
        for change in policy.plan(&samples) {
            let Some(node) = self.readmit(change.id, change.from, change.to).await? else {
                // Removed or re-weighted since sampling
                continue;
            };
            node.reset().await?;

            tracing::info!(
                node = %change.id,
                from = change.from,
                to = change.to,
                "Node weight rebalanced"
            );
            metrics::record_rebalance_change();
            applied.push(change);
        }
        Ok(applied)
    }

    /// Remove and re-admit a node at `weight` in one live-set update.
    ///
    /// Only applies while the node is admitted with `expected_weight`. The node
    /// never leaves the live set, so concurrent acquirers never observe an
    /// empty pool, but every token of the previous admission becomes stale.
    async fn readmit(
        &self,
        id: NodeId,
        expected_weight: u32,
        weight: u32,
    ) -> Result<Option<Arc<Node>>, SchedulerError> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let node = {
            let mut live = self.lock_live();
            match live.get_mut(&id) {
                Some(admission) if admission.weight == expected_weight => {
                    admission.generation = generation;
                    admission.weight = weight;
                    admission.node.clone()
                }
                _ => return Ok(None),
            }
        };

        let mut closed = self.closed.subscribe();
        for _ in 0..weight {
            let token = Token {
                node: node.clone(),
                generation,
            };
            enqueue(&self.rotation_tx, &mut closed, token).await?;
        }
        Ok(Some(node))
    }

    // --- Statistics ---

    /// Record the latency of one transaction dispatched through this scheduler.
    pub async fn update_time(&self, duration: Duration) -> Result<(), SchedulerError> {
        self.stats.update_time(duration).await
    }

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

    /// Close the rotation and the statistics intake.
    ///
    /// Waiting acquirers return [`Unavailable::Closed`]; later admissions and
    /// releases fail with [`SchedulerError::Closed`]. Idempotent.
    pub async fn shutdown(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        self.membership.notify_waiters();
        self.stats.close().await;

        let mut rotation = self.rotation_rx.lock().await;
        rotation.close();
        let mut drained = 0usize;
        while rotation.try_recv().is_ok() {
            drained += 1;
        }
        self.lock_live().clear();
        metrics::record_live_nodes(0);

        tracing::info!(drained_tokens = drained, "Scheduler shut down");
    }
}

/// Send a token into the rotation, giving up once the scheduler closes.
async fn enqueue(
    rotation: &mpsc::Sender<Token>,
    closed: &mut watch::Receiver<bool>,
    token: Token,
) -> Result<(), SchedulerError> {
    if *closed.borrow() {
        return Err(SchedulerError::Closed);
    }
    tokio::select! {
        sent = rotation.send(token) => sent.map_err(|_| SchedulerError::Closed),
        _ = closed.wait_for(|c| *c) => Err(SchedulerError::Closed),
    }
}

fn discard(token: Token) {
    tracing::trace!(
        node = %token.node.id(),
        generation = token.generation,
        "Discarding stale token"
    );
    metrics::record_stale_token();
}

/// A token checked out of the rotation.
///
/// Call [`Lease::release`] once the transaction completes. A lease dropped
/// without being released puts its token back on its own, so a failed or
/// cancelled request never strands a node outside the rotation.
#[derive(Debug)]
pub struct Lease {
    node: Arc<Node>,
    generation: u64,
    released: bool,
    rotation: mpsc::Sender<Token>,
    closed: watch::Receiver<bool>,
}

impl Lease {
    /// The node this lease grants a turn on.
    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    fn token(&self) -> Token {
        Token {
            node: self.node.clone(),
            generation: self.generation,
        }
    }

    /// Re-enqueue the token at the tail of the rotation.
    ///
    /// Waits for room if the rotation is full; fails once the scheduler is shut down.
    /// If the wait is cancelled the token goes back through `Drop`.
    pub async fn release(mut self) -> Result<(), SchedulerError> {
        if *self.closed.borrow() {
            self.released = true;
            return Err(SchedulerError::Closed);
        }

        let rotation = &self.rotation;
        let closed = &mut self.closed;
        let permit = tokio::select! {
            permit = rotation.reserve() => permit.map_err(|_| SchedulerError::Closed),
            _ = async { let _ = closed.wait_for(|c| *c).await; } => Err(SchedulerError::Closed),
        };

        // Only a token that actually made it into the rotation counts as released
        match permit {
            Ok(permit) => {
                permit.send(self.token());
                self.released = true;
                Ok(())
            }
            Err(e) => {
                self.released = true;
                Err(e)
            }
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.released || *self.closed.borrow() {
            return;
        }
        self.released = true;

        tracing::debug!(node = %self.node.id(), "Lease dropped without release, returning token");
        match self.rotation.try_send(self.token()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(token)) => {
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        let rotation = self.rotation.clone();
                        handle.spawn(async move {
                            let _ = rotation.send(token).await;
                        });
                    }
                    Err(_) => {
                        tracing::warn!(node = %self.node.id(), "No runtime to return token; turn lost");
                    }
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}
