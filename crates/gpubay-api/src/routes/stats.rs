//! Marketplace statistics endpoints.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;
use gpubay_db::{GpuClassCount, NodeClassStats, SellerEarnings, StatusCount};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stats", get(marketplace_stats))
        .route("/sellers/{address}/earnings", get(seller_earnings))
}

#[derive(Debug, Serialize)]
struct JobStats {
    by_status: Vec<StatusCount>,
    pending_by_gpu_class: Vec<GpuClassCount>,
}

#[derive(Debug, Serialize)]
struct NodeStats {
    total_live: i64,
    by_gpu_class: Vec<NodeClassStats>,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    jobs: JobStats,
    nodes: NodeStats,
    timestamp: DateTime<Utc>,
}

/// Aggregate queue and supply counts: jobs grouped by status, pending jobs
/// by required GPU class, and live-node price statistics per class.
async fn marketplace_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let by_status = state.jobs.counts_by_status().await?;
    let pending_by_gpu_class = state.jobs.pending_counts_by_class().await?;
    let by_gpu_class = state
        .nodes
        .class_stats(state.config.queue.liveness_window())
        .await?;
    let total_live = by_gpu_class.iter().map(|c| c.count).sum();

    Ok(Json(StatsResponse {
        jobs: JobStats {
            by_status,
            pending_by_gpu_class,
        },
        nodes: NodeStats {
            total_live,
            by_gpu_class,
        },
        timestamp: Utc::now(),
    }))
}

#[derive(Debug, Serialize)]
struct EarningsResponse {
    #[serde(flatten)]
    earnings: SellerEarnings,
    timestamp: DateTime<Utc>,
}

async fn seller_earnings(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<EarningsResponse>, ApiError> {
    let earnings = state.jobs.seller_earnings(&address).await?;
    Ok(Json(EarningsResponse {
        earnings,
        timestamp: Utc::now(),
    }))
}
