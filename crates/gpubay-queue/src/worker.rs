//! Seller-side worker loop.
//!
//! A worker wraps one registered node: it heartbeats the registry, polls
//! the claim engine with the node's capability offer, and drives each
//! claimed job through execute/report via the configured adapter.

use std::sync::Arc;
use std::time::Duration;

use gpubay_core::executor::{ExecutionAdapter, ExecutionRequest};
use gpubay_core::{CapabilityOffer, JobId, Result};
use gpubay_db::{JobRecord, NodeRepo};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::engine::ClaimEngine;
use crate::lifecycle::JobLifecycle;

/// How a single poll ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing in the queue matched the offer.
    Idle,
    /// A job was claimed, executed and reported completed.
    Completed,
    /// A job was claimed but ended in a failure report.
    Failed,
}

/// Claims and executes marketplace jobs for a single node.
pub struct Worker {
    offer: CapabilityOffer,
    engine: Arc<ClaimEngine>,
    lifecycle: Arc<JobLifecycle>,
    nodes: Arc<dyn NodeRepo>,
    executor: Arc<dyn ExecutionAdapter>,
    poll_interval: Duration,
    heartbeat_interval: Duration,
}

impl Worker {
    pub fn new(
        offer: CapabilityOffer,
        engine: Arc<ClaimEngine>,
        lifecycle: Arc<JobLifecycle>,
        nodes: Arc<dyn NodeRepo>,
        executor: Arc<dyn ExecutionAdapter>,
    ) -> Self {
        Self {
            offer,
            engine,
            lifecycle,
            nodes,
            executor,
            poll_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
        }
    }

    /// Override the poll and heartbeat cadence.
    pub fn with_intervals(mut self, poll: Duration, heartbeat: Duration) -> Self {
        self.poll_interval = poll;
        self.heartbeat_interval = heartbeat;
        self
    }

    /// Run the poll loop until the task is aborted.
    pub async fn run(&self) {
        info!(
            node_id = %self.offer.node_id,
            gpu_class = %self.offer.gpu_class,
            executor = self.executor.name(),
            "Starting worker"
        );

        let mut heartbeat_due = tokio::time::Instant::now();
        loop {
            if tokio::time::Instant::now() >= heartbeat_due {
                if let Err(err) = self.nodes.heartbeat(&self.offer.node_id, true).await {
                    warn!(node_id = %self.offer.node_id, error = %err, "Heartbeat failed");
                }
                heartbeat_due = tokio::time::Instant::now() + self.heartbeat_interval;
            }

            match self.poll_once().await {
                Ok(PollOutcome::Idle) => sleep(self.poll_interval).await,
                Ok(_) => {
                    // Just finished a job, poll again immediately.
                }
                Err(err) => {
                    warn!(node_id = %self.offer.node_id, error = %err, "Worker poll failed");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// One claim attempt and, when it lands, the full execute/report cycle.
    pub async fn poll_once(&self) -> Result<PollOutcome> {
        let Some(job) = self.engine.claim(&self.offer).await? else {
            return Ok(PollOutcome::Idle);
        };

        // The node is busy for the duration of the job; advertise that, and
        // restore availability afterwards whatever the outcome was.
        if let Err(err) = self.nodes.mark_unavailable(&self.offer.node_id).await {
            warn!(node_id = %self.offer.node_id, error = %err, "Could not mark node busy");
        }
        let outcome = self.run_job(job).await;
        if let Err(err) = self.nodes.heartbeat(&self.offer.node_id, true).await {
            warn!(node_id = %self.offer.node_id, error = %err, "Could not mark node available");
        }
        outcome
    }

    async fn run_job(&self, job: JobRecord) -> Result<PollOutcome> {
        let id = JobId::from_uuid(job.job_id);
        self.lifecycle.start(id, &self.offer.node_id).await?;

        let request = ExecutionRequest {
            job_id: id,
            script: job.script.clone(),
            requirements: job.requirements.clone(),
            timeout: Duration::from_secs(job.timeout_seconds.max(1) as u64),
            gpu_count: job.required_gpu_count,
        };

        match self.executor.execute(request).await {
            Ok(result) if result.succeeded() => {
                self.lifecycle
                    .complete(
                        id,
                        &self.offer.node_id,
                        &result.output,
                        result.exit_code,
                        result.duration_seconds,
                    )
                    .await?;
                Ok(PollOutcome::Completed)
            }
            Ok(result) => {
                let error = result
                    .error
                    .unwrap_or_else(|| format!("exited with code {}", result.exit_code));
                self.lifecycle
                    .fail(
                        id,
                        &self.offer.node_id,
                        &error,
                        Some(result.exit_code),
                        Some(result.duration_seconds),
                    )
                    .await?;
                Ok(PollOutcome::Failed)
            }
            Err(err) => {
                // The adapter broke before producing an outcome at all.
                self.lifecycle
                    .fail(id, &self.offer.node_id, &err.to_string(), None, None)
                    .await?;
                Ok(PollOutcome::Failed)
            }
        }
    }
}
