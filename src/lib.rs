//! rotation-proxy library.
//!
//! Exposes the scheduler, dispatcher and control surface so the binaries and
//! integration tests share one implementation.

// Core subsystems
pub mod config;
pub mod error;
pub mod http;
pub mod net;

// Traffic management
pub mod load_balancer;

// Operator surface
pub mod admin;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::{Proxy, Shutdown};
pub use load_balancer::{Lease, Node, NodeId, Scheduler};
