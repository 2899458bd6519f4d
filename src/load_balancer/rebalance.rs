//! Periodic weight rebalancing.
//!
//! # Responsibilities
//! - Compare per-node average transaction times
//! - Plan lower weights for nodes that are much slower than the best node
//! - Run the scheduler's rebalance round on a fixed interval
//!
//! # Design Decisions
//! - Policy is a trait so coefficients and shape can be swapped
//! - Weights only ever go down; recovery happens by re-adding the node
//! - Rounds are infrequent; tokens of the old admission drain lazily

use std::sync::{Arc, Weak};
use std::time::Duration;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::RebalanceConfig;
use crate::load_balancer::node::NodeId;
use crate::load_balancer::scheduler::Scheduler;

/// Observed performance of one admitted node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeSample {
    pub id: NodeId,
    pub effective_weight: u32,
    pub transaction_count: u64,
    pub average: Duration,
}

/// A planned re-admission at a new weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightChange {
    #[serde(serialize_with = "serialize_node_id")]
    pub id: NodeId,
    pub from: u32,
    pub to: u32,
}

fn serialize_node_id<S: serde::Serializer>(id: &NodeId, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(id.as_u64())
}

/// Decides which nodes get a smaller share of the rotation.
pub trait RebalancePolicy: Send + Sync + std::fmt::Debug {
    fn plan(&self, samples: &[NodeSample]) -> Vec<WeightChange>;
}

/// Lowers the weight of nodes whose average exceeds the best node's by a factor.
#[derive(Debug, Clone)]
pub struct SlowNodePolicy {
    /// A node is slow when `average > best * slow_factor`.
    pub slow_factor: f64,
    /// New weight is `floor(weight * weight_factor)`.
    pub weight_factor: f64,
    pub min_weight: u32,
    /// Nodes with fewer transactions are not judged.
    pub min_samples: u64,
}

impl SlowNodePolicy {
    pub fn from_config(config: &RebalanceConfig) -> Self {
        Self {
            slow_factor: config.slow_factor,
            weight_factor: config.weight_factor,
            min_weight: config.min_weight,
            min_samples: config.min_samples,
        }
    }
}

impl Default for SlowNodePolicy {
    fn default() -> Self {
        Self::from_config(&RebalanceConfig::default())
    }
}

impl RebalancePolicy for SlowNodePolicy {
    fn plan(&self, samples: &[NodeSample]) -> Vec<WeightChange> {
        let judged: Vec<&NodeSample> = samples
            .iter()
            .filter(|s| s.effective_weight > 0 && s.transaction_count >= self.min_samples)
            .collect();

        let Some(best) = judged
            .iter()
            .map(|s| s.average)
            .filter(|avg| !avg.is_zero())
            .min()
        else {
            return Vec::new();
        };
        let threshold = best.as_secs_f64() * self.slow_factor;

        judged
            .into_iter()
            .filter(|s| s.average.as_secs_f64() > threshold)
            .filter_map(|s| {
                let scaled = (f64::from(s.effective_weight) * self.weight_factor).floor() as u32;
                let to = scaled.max(self.min_weight);
                (to < s.effective_weight).then_some(WeightChange {
                    id: s.id,
                    from: s.effective_weight,
                    to,
                })
            })
            .collect()
    }
}

/// Spawn the periodic rebalance loop. It stops when the scheduler shuts down or is dropped.
pub fn spawn_rebalancer(
    scheduler: &Arc<Scheduler>,
    policy: Arc<dyn RebalancePolicy>,
    interval: Duration,
) -> JoinHandle<()> {
    let weak: Weak<Scheduler> = Arc::downgrade(scheduler);
    let mut closed = scheduler.closed_signal();

    tokio::spawn(async move {
        tracing::info!(interval_secs = interval.as_secs(), "Rebalancer starting");

        // First round one full interval after start
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(scheduler) = weak.upgrade() else { break };
                    match scheduler.rebalance(policy.as_ref()).await {
                        Ok(changes) if changes.is_empty() => {
                            tracing::debug!("Rebalance round: no changes");
                        }
                        Ok(changes) => {
                            tracing::info!(changes = changes.len(), "Rebalance round applied");
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "Rebalance round skipped");
                            break;
                        }
                    }
                }
                _ = async { let _ = closed.wait_for(|c| *c).await; } => break,
            }
        }
        tracing::info!("Rebalancer stopped");
    })
}
