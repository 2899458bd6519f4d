//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Control API / config file
//!     → provision.rs (resolve address, build Node)
//!     → scheduler.rs admit (weight tokens into the rotation)
//!
//! Request
//!     → scheduler.rs acquire (next live token; stale tokens discarded)
//!     → [forward to node]
//!     → Lease::release (token back to the tail of the rotation)
//!     → stats.rs (node + scheduler latency, off the request path)
//!
//! Every 15 minutes:
//!     rebalance.rs → slow nodes re-admitted with fewer tokens
//! ```
//!
//! # Design Decisions
//! - Weighted round robin emerges from the rotation; no shares are computed
//! - A node gets its turn back only after its transaction completes
//! - Removal is O(1); leftover tokens are filtered lazily
//! - Statistics are single-writer and eventually consistent

pub mod node;
pub mod provision;
pub mod rebalance;
pub mod scheduler;
pub mod stats;

pub use node::{Node, NodeId};
pub use rebalance::{RebalancePolicy, SlowNodePolicy, WeightChange};
pub use scheduler::{Lease, LiveNode, Scheduler};
pub use stats::{StatsSnapshot, TransactionStats};
