//! Control surface.
//!
//! # Responsibilities
//! - Admit and remove nodes at runtime
//! - Report scheduler and per-node statistics
//! - Reset statistics and trigger a rebalance round on demand
//!
//! # Design Decisions
//! - Separate listener from the data path
//! - Read endpoints never touch the rotation
//! - Auth is optional; CORS answers preflights before auth runs

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::config::ProxyConfig;
use crate::load_balancer::rebalance::{RebalancePolicy, SlowNodePolicy};
use crate::load_balancer::scheduler::Scheduler;
use self::auth::admin_auth_middleware;
use self::handlers::*;

/// State shared by control handlers.
#[derive(Clone)]
pub struct ControlState {
    pub scheduler: Arc<Scheduler>,
    pub policy: Arc<dyn RebalancePolicy>,
    /// Data path prefix, reported by `GET /scheduler`.
    pub path: Arc<str>,
    pub stats_buffer: usize,
    pub api_key: Option<Arc<str>>,
}

impl ControlState {
    pub fn new(scheduler: Arc<Scheduler>, config: &ProxyConfig) -> Self {
        Self {
            scheduler,
            policy: Arc::new(SlowNodePolicy::from_config(&config.rebalance)),
            path: Arc::from(config.data.path.as_str()),
            stats_buffer: config.scheduler.stats_buffer,
            api_key: config.control.api_key.as_deref().map(Arc::from),
        }
    }
}

pub fn control_router(state: ControlState, cors: bool) -> Router {
    let router = Router::new()
        .route("/scheduler", get(get_scheduler_stats))
        .route("/scheduler/reset", post(reset_scheduler))
        .route("/scheduler/rebalance", post(rebalance_now))
        .route("/node", get(list_nodes).post(add_node))
        .route("/node/{id}", delete(remove_node))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state);

    if cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}
