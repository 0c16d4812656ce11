//! Lifecycle reports from workers and buyers.
//!
//! Settlement is deliberately decoupled from completion: the COMPLETED row
//! commits first, then the settlement adapter is called. A settlement
//! outage therefore never rolls back or delays a finished job; the bill
//! stays unrecorded and the reaper retries it on the next sweep.

use std::sync::Arc;

use gpubay_core::settlement::{SettlementAdapter, SettlementRequest};
use gpubay_core::{Error, JobId, Result};
use gpubay_db::{JobRecord, JobRepo};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Whether a completed job's bill made it onto the settlement rail yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Settled,
    Pending,
}

/// A completion report together with its billing outcome.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionOutcome {
    pub job: JobRecord,
    pub settlement: SettlementStatus,
}

/// Applies worker and buyer state reports to the job table.
pub struct JobLifecycle {
    jobs: Arc<dyn JobRepo>,
    settlement: Arc<dyn SettlementAdapter>,
}

impl JobLifecycle {
    pub fn new(jobs: Arc<dyn JobRepo>, settlement: Arc<dyn SettlementAdapter>) -> Self {
        Self { jobs, settlement }
    }

    /// Report that execution has started on the claiming node.
    pub async fn start(&self, id: JobId, node_id: &str) -> Result<JobRecord> {
        let record = self.jobs.begin_execution(id, node_id).await?;
        info!(job_id = %id, node_id, "Execution started");
        Ok(record)
    }

    /// Report a successful execution, then settle the bill.
    pub async fn complete(
        &self,
        id: JobId,
        node_id: &str,
        output: &str,
        exit_code: i32,
        duration_seconds: f64,
    ) -> Result<CompletionOutcome> {
        let record = self
            .jobs
            .complete_execution(id, node_id, output, exit_code, duration_seconds)
            .await?;
        info!(job_id = %id, node_id, exit_code, duration_seconds, "Execution completed");

        match settle_completed(self.jobs.as_ref(), self.settlement.as_ref(), &record).await {
            Ok(settled) => Ok(CompletionOutcome {
                job: settled,
                settlement: SettlementStatus::Settled,
            }),
            Err(err) => {
                warn!(job_id = %id, error = %err, "Settlement deferred, will retry on sweep");
                Ok(CompletionOutcome {
                    job: record,
                    settlement: SettlementStatus::Pending,
                })
            }
        }
    }

    /// Report a failed execution.
    pub async fn fail(
        &self,
        id: JobId,
        node_id: &str,
        error: &str,
        exit_code: Option<i32>,
        duration_seconds: Option<f64>,
    ) -> Result<JobRecord> {
        let record = self
            .jobs
            .fail_execution(id, node_id, error, exit_code, duration_seconds)
            .await?;
        warn!(job_id = %id, node_id, error, "Execution failed");
        Ok(record)
    }

    /// Cancel a job on behalf of its buyer.
    pub async fn cancel(&self, id: JobId, buyer_address: &str) -> Result<JobRecord> {
        let record = self.jobs.cancel(id, buyer_address).await?;
        info!(job_id = %id, buyer = buyer_address, "Job cancelled");
        Ok(record)
    }
}

/// Settle a completed job and record the cost on its row.
///
/// The claim metadata (seller, locked price) and the reported duration must
/// all be present; a COMPLETED row without them indicates a bug upstream.
pub(crate) async fn settle_completed(
    jobs: &dyn JobRepo,
    settlement: &dyn SettlementAdapter,
    record: &JobRecord,
) -> Result<JobRecord> {
    let (Some(seller), Some(price), Some(duration)) = (
        record.seller_address.as_deref(),
        record.locked_price_per_hour,
        record.execution_duration_seconds,
    ) else {
        return Err(Error::Internal(format!(
            "job {} is COMPLETED but missing claim or duration metadata",
            record.job_id
        )));
    };

    let request = SettlementRequest {
        job_id: JobId::from_uuid(record.job_id),
        buyer_address: record.buyer_address.clone(),
        seller_address: seller.to_string(),
        locked_price_per_hour: price,
        duration_seconds: duration,
    };
    let receipt = settlement.settle(request).await?;

    let updated = jobs
        .record_settlement(
            JobId::from_uuid(record.job_id),
            receipt.total_cost_usd,
            &receipt.reference,
        )
        .await?;
    info!(
        job_id = %record.job_id,
        total_cost_usd = receipt.total_cost_usd,
        reference = %receipt.reference,
        "Settlement recorded"
    );
    Ok(updated)
}
