//! Node registry endpoints.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;
use gpubay_core::{GpuClass, NewNode};
use gpubay_db::NodeRecord;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(register_node).get(list_nodes))
        .route("/{id}", get(get_node))
        .route("/{id}/heartbeat", post(node_heartbeat))
        .route("/{id}/unavailable", post(mark_node_unavailable))
}

async fn register_node(
    State(state): State<AppState>,
    Json(req): Json<NewNode>,
) -> Result<Json<NodeRecord>, ApiError> {
    req.validate()?;
    let record = state.nodes.register(&req).await?;
    tracing::info!(
        node_id = %record.node_id,
        seller = %record.seller_address,
        gpu_class = %record.gpu_class,
        price_per_hour = record.price_per_hour,
        "Node registered"
    );
    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
struct ListNodesQuery {
    gpu_class: Option<String>,
    max_price: Option<f64>,
}

#[derive(Debug, Serialize)]
struct NodesResponse {
    nodes: Vec<NodeRecord>,
    count: usize,
}

/// Discover live nodes, cheapest first. Only nodes with a recent heartbeat
/// and the availability flag set show up.
async fn list_nodes(
    State(state): State<AppState>,
    Query(query): Query<ListNodesQuery>,
) -> Result<Json<NodesResponse>, ApiError> {
    let class = match query.gpu_class.as_deref() {
        Some(s) => {
            s.parse::<GpuClass>().map_err(ApiError::from)?;
            Some(s)
        }
        None => None,
    };
    let nodes = state
        .nodes
        .list_live(
            class,
            query.max_price,
            state.config.queue.liveness_window(),
        )
        .await?;
    Ok(Json(NodesResponse {
        count: nodes.len(),
        nodes,
    }))
}

async fn get_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<NodeRecord>, ApiError> {
    let record = state.nodes.get(&id).await?;
    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
struct HeartbeatQuery {
    available: Option<bool>,
}

#[derive(Debug, Serialize)]
struct HeartbeatResponse {
    status: String,
    node_id: String,
    last_heartbeat: DateTime<Utc>,
}

async fn node_heartbeat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HeartbeatQuery>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let record = state
        .nodes
        .heartbeat(&id, query.available.unwrap_or(true))
        .await?;
    tracing::debug!(node_id = %record.node_id, available = record.is_available, "Heartbeat received");
    Ok(Json(HeartbeatResponse {
        status: "ok".to_string(),
        node_id: record.node_id,
        last_heartbeat: record.last_heartbeat,
    }))
}

#[derive(Debug, Serialize)]
struct AvailabilityResponse {
    status: String,
    node_id: String,
}

async fn mark_node_unavailable(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AvailabilityResponse>, ApiError> {
    state.nodes.mark_unavailable(&id).await?;
    tracing::info!(node_id = %id, "Node marked unavailable");
    Ok(Json(AvailabilityResponse {
        status: "unavailable".to_string(),
        node_id: id,
    }))
}
