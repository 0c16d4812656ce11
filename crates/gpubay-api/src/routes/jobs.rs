//! Job endpoints: submission, tracking, claiming and lifecycle reports.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;
use gpubay_core::{CapabilityOffer, GpuClass, JobStatus, NewJob};
use gpubay_db::JobRecord;
use gpubay_db::transitions::TransitionRecord;
use gpubay_queue::SettlementStatus;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(submit_job))
        .route("/claim", post(claim_job))
        .route("/estimate", post(estimate_job_cost))
        .route("/queue/pending", get(list_pending_jobs))
        .route("/buyer/{address}", get(list_buyer_jobs))
        .route("/seller/{address}", get(list_seller_jobs))
        .route("/{id}", get(get_job))
        .route("/{id}/transitions", get(get_job_transitions))
        .route("/{id}/cancel", post(cancel_job))
        .route("/{id}/start", post(start_job))
        .route("/{id}/complete", post(complete_job))
        .route("/{id}/fail", post(fail_job))
}

fn default_timeout_seconds() -> i32 {
    300
}

fn default_gpu_count() -> i32 {
    1
}

/// Validate a `?status=` filter against the job state machine.
fn parse_status_filter(status: Option<&str>) -> Result<Option<&str>, ApiError> {
    match status {
        Some(s) => {
            s.parse::<JobStatus>().map_err(ApiError::from)?;
            Ok(Some(s))
        }
        None => Ok(None),
    }
}

#[derive(Debug, Deserialize)]
struct SubmitJobRequest {
    buyer_address: String,
    script: String,
    requirements: Option<String>,
    max_price_per_hour: f64,
    #[serde(default = "default_timeout_seconds")]
    timeout_seconds: i32,
    required_gpu_class: Option<GpuClass>,
    min_vram_gb: Option<f64>,
    #[serde(default = "default_gpu_count")]
    required_gpu_count: i32,
}

#[derive(Debug, Serialize)]
struct SubmitJobResponse {
    job_id: Uuid,
    status: String,
    message: String,
    buyer_address: String,
    max_price_per_hour: f64,
}

async fn submit_job(
    State(state): State<AppState>,
    Json(req): Json<SubmitJobRequest>,
) -> Result<Json<SubmitJobResponse>, ApiError> {
    let job = NewJob {
        buyer_address: req.buyer_address,
        script: req.script,
        requirements: req.requirements,
        max_price_per_hour: req.max_price_per_hour,
        timeout_seconds: req.timeout_seconds,
        required_gpu_class: req.required_gpu_class,
        min_vram_gb: req.min_vram_gb,
        required_gpu_count: req.required_gpu_count,
    };
    job.validate()?;

    let record = state.jobs.submit(&job).await?;
    tracing::info!(
        job_id = %record.job_id,
        buyer = %record.buyer_address,
        max_price_per_hour = record.max_price_per_hour,
        "Job submitted"
    );

    Ok(Json(SubmitJobResponse {
        job_id: record.job_id,
        status: record.status,
        message: "Job submitted to queue. Sellers will claim when available.".to_string(),
        buyer_address: record.buyer_address,
        max_price_per_hour: record.max_price_per_hour,
    }))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobRecord>, ApiError> {
    let record = state.jobs.get(id.into()).await?;
    Ok(Json(record))
}

#[derive(Debug, Serialize)]
struct TransitionsResponse {
    job_id: Uuid,
    transitions: Vec<TransitionRecord>,
    count: usize,
}

async fn get_job_transitions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TransitionsResponse>, ApiError> {
    state.jobs.get(id.into()).await?;
    let transitions = state.jobs.transitions(id.into()).await?;
    Ok(Json(TransitionsResponse {
        job_id: id,
        count: transitions.len(),
        transitions,
    }))
}

#[derive(Debug, Deserialize)]
struct CancelJobRequest {
    buyer_address: String,
}

#[derive(Debug, Serialize)]
struct CancelJobResponse {
    status: String,
    job_id: Uuid,
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CancelJobRequest>,
) -> Result<Json<CancelJobResponse>, ApiError> {
    let record = state.lifecycle.cancel(id.into(), &req.buyer_address).await?;
    Ok(Json(CancelJobResponse {
        status: record.status,
        job_id: record.job_id,
    }))
}

#[derive(Debug, Deserialize)]
struct ClaimJobRequest {
    node_id: String,
    seller_address: String,
    gpu_class: GpuClass,
    price_per_hour: f64,
    vram_gb: f64,
    #[serde(default = "default_gpu_count")]
    gpu_count: i32,
}

#[derive(Debug, Serialize)]
struct ClaimJobResponse {
    claimed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    job: Option<JobRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

async fn claim_job(
    State(state): State<AppState>,
    Json(req): Json<ClaimJobRequest>,
) -> Result<Json<ClaimJobResponse>, ApiError> {
    let offer = CapabilityOffer {
        node_id: req.node_id,
        seller_address: req.seller_address,
        gpu_class: req.gpu_class,
        price_per_hour: req.price_per_hour,
        vram_gb: req.vram_gb,
        gpu_count: req.gpu_count,
    };
    offer.validate()?;

    match state.engine.claim(&offer).await? {
        Some(record) => Ok(Json(ClaimJobResponse {
            claimed: true,
            job: Some(record),
            message: None,
        })),
        None => Ok(Json(ClaimJobResponse {
            claimed: false,
            job: None,
            message: Some("No matching jobs available in queue".to_string()),
        })),
    }
}

#[derive(Debug, Deserialize)]
struct StartJobRequest {
    node_id: String,
}

#[derive(Debug, Serialize)]
struct StartJobResponse {
    status: String,
    job_id: Uuid,
    started_at: Option<DateTime<Utc>>,
}

async fn start_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<StartJobRequest>,
) -> Result<Json<StartJobResponse>, ApiError> {
    let record = state.lifecycle.start(id.into(), &req.node_id).await?;
    Ok(Json(StartJobResponse {
        status: record.status,
        job_id: record.job_id,
        started_at: record.started_at,
    }))
}

#[derive(Debug, Deserialize)]
struct CompleteJobRequest {
    node_id: String,
    output: String,
    #[serde(default)]
    exit_code: i32,
    duration_seconds: f64,
}

#[derive(Debug, Serialize)]
struct CompleteJobResponse {
    status: String,
    job_id: Uuid,
    exit_code: Option<i32>,
    total_cost_usd: Option<f64>,
    settlement: SettlementStatus,
    settlement_ref: Option<String>,
}

async fn complete_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CompleteJobRequest>,
) -> Result<Json<CompleteJobResponse>, ApiError> {
    let outcome = state
        .lifecycle
        .complete(
            id.into(),
            &req.node_id,
            &req.output,
            req.exit_code,
            req.duration_seconds,
        )
        .await?;

    Ok(Json(CompleteJobResponse {
        status: outcome.job.status,
        job_id: outcome.job.job_id,
        exit_code: outcome.job.exit_code,
        total_cost_usd: outcome.job.total_cost_usd,
        settlement: outcome.settlement,
        settlement_ref: outcome.job.settlement_ref,
    }))
}

#[derive(Debug, Deserialize)]
struct FailJobRequest {
    node_id: String,
    error: String,
    exit_code: Option<i32>,
    duration_seconds: Option<f64>,
}

#[derive(Debug, Serialize)]
struct FailJobResponse {
    status: String,
    job_id: Uuid,
}

async fn fail_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<FailJobRequest>,
) -> Result<Json<FailJobResponse>, ApiError> {
    let record = state
        .lifecycle
        .fail(
            id.into(),
            &req.node_id,
            &req.error,
            req.exit_code,
            req.duration_seconds,
        )
        .await?;
    Ok(Json(FailJobResponse {
        status: record.status,
        job_id: record.job_id,
    }))
}

#[derive(Debug, Deserialize)]
struct ListJobsQuery {
    status: Option<String>,
    limit: Option<i64>,
}

#[derive(Debug, Serialize)]
struct JobsResponse {
    jobs: Vec<JobRecord>,
    count: usize,
}

async fn list_buyer_jobs(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<JobsResponse>, ApiError> {
    let status = parse_status_filter(query.status.as_deref())?;
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let jobs = state.jobs.list_by_buyer(&address, status, limit).await?;
    Ok(Json(JobsResponse {
        count: jobs.len(),
        jobs,
    }))
}

async fn list_seller_jobs(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<JobsResponse>, ApiError> {
    let status = parse_status_filter(query.status.as_deref())?;
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let jobs = state.jobs.list_by_seller(&address, status, limit).await?;
    Ok(Json(JobsResponse {
        count: jobs.len(),
        jobs,
    }))
}

#[derive(Debug, Deserialize)]
struct PendingQueueQuery {
    gpu_class: Option<String>,
    limit: Option<i64>,
}

async fn list_pending_jobs(
    State(state): State<AppState>,
    Query(query): Query<PendingQueueQuery>,
) -> Result<Json<JobsResponse>, ApiError> {
    let class = match query.gpu_class.as_deref() {
        Some(s) => {
            s.parse::<GpuClass>().map_err(ApiError::from)?;
            Some(s)
        }
        None => None,
    };
    let limit = query.limit.unwrap_or(100).clamp(1, 500);
    let jobs = state.jobs.list_pending(class, limit).await?;
    Ok(Json(JobsResponse {
        count: jobs.len(),
        jobs,
    }))
}

fn default_estimate_timeout() -> i32 {
    3600
}

#[derive(Debug, Deserialize)]
struct EstimateRequest {
    #[serde(default = "default_estimate_timeout")]
    timeout_seconds: i32,
    required_gpu_class: Option<GpuClass>,
    min_vram_gb: Option<f64>,
    #[serde(default = "default_gpu_count")]
    required_gpu_count: i32,
}

#[derive(Debug, Serialize)]
struct CostRange {
    min_usd: f64,
    max_usd: f64,
    avg_usd: f64,
}

#[derive(Debug, Serialize)]
struct RateRange {
    min_per_hour: f64,
    max_per_hour: f64,
    avg_per_hour: f64,
}

#[derive(Debug, Serialize)]
struct QueueOutlook {
    pending_jobs: i64,
    estimated_wait_minutes: f64,
}

#[derive(Debug, Serialize)]
struct EstimateResponse {
    estimated: bool,
    matching_nodes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cost_estimate: Option<CostRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hourly_rates: Option<RateRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    queue: Option<QueueOutlook>,
}

/// Price a hypothetical job against the currently live nodes.
async fn estimate_job_cost(
    State(state): State<AppState>,
    Json(req): Json<EstimateRequest>,
) -> Result<Json<EstimateResponse>, ApiError> {
    let window = state.config.queue.liveness_window();
    let class = req.required_gpu_class.map(|c| c.as_str());
    let live = state.nodes.list_live(class, None, window).await?;

    let candidates: Vec<_> = live
        .into_iter()
        .filter(|n| {
            req.min_vram_gb
                .is_none_or(|needed| n.vram_gb.is_some_and(|have| have >= needed))
        })
        .filter(|n| n.gpu_count >= req.required_gpu_count)
        .collect();

    if candidates.is_empty() {
        return Ok(Json(EstimateResponse {
            estimated: false,
            matching_nodes: 0,
            message: Some("No matching nodes currently available".to_string()),
            cost_estimate: None,
            hourly_rates: None,
            queue: None,
        }));
    }

    let min = candidates
        .iter()
        .map(|n| n.price_per_hour)
        .fold(f64::INFINITY, f64::min);
    let max = candidates
        .iter()
        .map(|n| n.price_per_hour)
        .fold(0.0_f64, f64::max);
    let avg =
        candidates.iter().map(|n| n.price_per_hour).sum::<f64>() / candidates.len() as f64;
    let hours = f64::from(req.timeout_seconds) / 3600.0;

    let pending = state
        .jobs
        .counts_by_status()
        .await?
        .into_iter()
        .find(|c| c.status == "PENDING")
        .map_or(0, |c| c.count);
    // Rough queue outlook: each pending job takes about five minutes,
    // spread across the matching nodes.
    let estimated_wait_minutes = pending as f64 / candidates.len() as f64 * 5.0;

    Ok(Json(EstimateResponse {
        estimated: true,
        matching_nodes: candidates.len(),
        message: None,
        cost_estimate: Some(CostRange {
            min_usd: min * hours,
            max_usd: max * hours,
            avg_usd: avg * hours,
        }),
        hourly_rates: Some(RateRange {
            min_per_hour: min,
            max_per_hour: max,
            avg_per_hour: avg,
        }),
        queue: Some(QueueOutlook {
            pending_jobs: pending,
            estimated_wait_minutes,
        }),
    }))
}
