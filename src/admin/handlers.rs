//! Control surface handlers.
//!
//! Millisecond fields are fractional; node IDs are the numeric part of `node-N`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::admin::ControlState;
use crate::error::{AdmissionError, SchedulerError};
use crate::load_balancer::node::NodeId;
use crate::load_balancer::provision;
use crate::load_balancer::rebalance::WeightChange;
use crate::load_balancer::stats::StatsSnapshot;

fn millis(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStats {
    pub path: String,
    pub transaction_count: u64,
    pub average_transaction_time_milli_sec: f64,
    pub minimum_transaction_time_milli_sec: f64,
    pub maximum_transaction_time_milli_sec: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStats {
    pub id: u64,
    pub address: String,
    pub port: u16,
    pub weight: u32,
    /// Same as `weight`, under the name `POST /node` also accepts.
    pub max_transactions: u32,
    pub effective_weight: u32,
    pub transaction_count: u64,
    pub average_transaction_time_milli_sec: f64,
    pub minimum_transaction_time_milli_sec: f64,
    pub maximum_transaction_time_milli_sec: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeList {
    pub nodes: Vec<NodeStats>,
}

/// Body of `POST /node`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddNode {
    pub address: String,
    pub port: u16,
    #[serde(default = "default_weight", alias = "maxTransactions")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeAdded {
    pub id: u64,
    pub address: String,
    pub port: u16,
    pub weight: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceResult {
    pub changes: Vec<ChangeView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeView {
    pub id: u64,
    pub from: u32,
    pub to: u32,
}

impl From<WeightChange> for ChangeView {
    fn from(change: WeightChange) -> Self {
        Self {
            id: change.id.as_u64(),
            from: change.from,
            to: change.to,
        }
    }
}

/// Control request failure.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),
    #[error("node {0} is not admitted")]
    UnknownNode(u64),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let status = match &self {
            ControlError::Admission(AdmissionError::Scheduler(_)) | ControlError::Scheduler(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ControlError::Admission(_) => StatusCode::BAD_REQUEST,
            ControlError::UnknownNode(_) => StatusCode::NOT_FOUND,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

fn scheduler_view(path: &str, snapshot: StatsSnapshot) -> SchedulerStats {
    SchedulerStats {
        path: path.to_string(),
        transaction_count: snapshot.count,
        average_transaction_time_milli_sec: millis(snapshot.average()),
        minimum_transaction_time_milli_sec: millis(snapshot.min),
        maximum_transaction_time_milli_sec: millis(snapshot.max),
    }
}

pub async fn get_scheduler_stats(State(state): State<ControlState>) -> Json<SchedulerStats> {
    Json(scheduler_view(&state.path, state.scheduler.snapshot()))
}

pub async fn list_nodes(State(state): State<ControlState>) -> Json<NodeList> {
    let nodes = state
        .scheduler
        .nodes()
        .into_iter()
        .map(|live| {
            let snapshot = live.node.snapshot();
            NodeStats {
                id: live.node.id().as_u64(),
                address: live.node.addr().ip().to_string(),
                port: live.node.addr().port(),
                weight: live.node.weight(),
                max_transactions: live.node.weight(),
                effective_weight: live.effective_weight,
                transaction_count: snapshot.count,
                average_transaction_time_milli_sec: millis(snapshot.average()),
                minimum_transaction_time_milli_sec: millis(snapshot.min),
                maximum_transaction_time_milli_sec: millis(snapshot.max),
            }
        })
        .collect();
    Json(NodeList { nodes })
}

pub async fn add_node(
    State(state): State<ControlState>,
    Json(body): Json<AddNode>,
) -> Result<(StatusCode, Json<NodeAdded>), ControlError> {
    let node = provision::provision(
        &state.scheduler,
        &body.address,
        body.port,
        body.weight,
        state.stats_buffer,
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(NodeAdded {
            id: node.id().as_u64(),
            address: node.addr().ip().to_string(),
            port: node.addr().port(),
            weight: node.weight(),
        }),
    ))
}

pub async fn remove_node(
    State(state): State<ControlState>,
    Path(id): Path<u64>,
) -> Result<StatusCode, ControlError> {
    state
        .scheduler
        .remove(NodeId::from(id))
        .ok_or(ControlError::UnknownNode(id))?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reset_scheduler(State(state): State<ControlState>) -> Result<StatusCode, ControlError> {
    state.scheduler.reset().await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn rebalance_now(
    State(state): State<ControlState>,
) -> Result<Json<RebalanceResult>, ControlError> {
    let changes = state.scheduler.rebalance(state.policy.as_ref()).await?;
    Ok(Json(RebalanceResult {
        changes: changes.into_iter().map(ChangeView::from).collect(),
    }))
}
