//! Background maintenance sweeps.
//!
//! Three scans run on a fixed interval, each in its own transaction so a
//! failure in one never blocks the others:
//!
//! 1. CLAIMED jobs whose worker never started inside the grace window go
//!    back to PENDING with their assignment cleared.
//! 2. EXECUTING jobs running past `timeout_seconds * hang_multiplier` are
//!    marked FAILED with a synthetic error.
//! 3. COMPLETED jobs with no recorded cost get another settlement attempt.

use std::sync::Arc;
use std::time::Duration;

use gpubay_core::settlement::SettlementAdapter;
use gpubay_db::transitions::{insert_transition, reason};
use gpubay_db::{DbResult, JobRecord, JobRepo};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::lifecycle::settle_completed;

/// Timing knobs for the sweep.
#[derive(Debug, Clone, Copy)]
pub struct ReaperConfig {
    /// How long a claim may sit without execution starting.
    pub claim_grace: Duration,
    /// An execution is hung once its runtime exceeds `timeout_seconds`
    /// times this factor.
    pub hang_multiplier: f64,
    /// Pause between sweeps.
    pub sweep_interval: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            claim_grace: Duration::from_secs(300),
            hang_multiplier: 2.0,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl From<&gpubay_config::QueueConfig> for ReaperConfig {
    fn from(config: &gpubay_config::QueueConfig) -> Self {
        Self {
            claim_grace: config.claim_grace(),
            hang_multiplier: config.hang_multiplier,
            sweep_interval: config.sweep_interval(),
        }
    }
}

/// A job touched by a sweep scan.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SweptJob {
    pub job_id: Uuid,
    pub node_id: Option<String>,
}

/// What a single sweep accomplished.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SweepReport {
    pub stale_claims_released: usize,
    pub hung_executions_failed: usize,
    pub settlements_recorded: usize,
}

/// Periodic janitor for the job table.
pub struct Reaper {
    pool: PgPool,
    jobs: Arc<dyn JobRepo>,
    settlement: Arc<dyn SettlementAdapter>,
    config: ReaperConfig,
}

impl Reaper {
    pub fn new(
        pool: PgPool,
        jobs: Arc<dyn JobRepo>,
        settlement: Arc<dyn SettlementAdapter>,
        config: ReaperConfig,
    ) -> Self {
        Self {
            pool,
            jobs,
            settlement,
            config,
        }
    }

    /// Release CLAIMED jobs whose execution never started inside the grace
    /// window. Assignment and locked price are cleared so the job competes
    /// in the queue exactly as it did before the dead claim.
    pub async fn release_stale_claims(&self) -> DbResult<Vec<SweptJob>> {
        let mut tx = self.pool.begin().await?;

        let released = sqlx::query_as::<_, SweptJob>(
            r#"
            WITH stale AS (
                SELECT job_id, node_id FROM jobs
                WHERE status = 'CLAIMED'
                  AND claimed_at < NOW() - make_interval(secs => $1)
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'PENDING',
                node_id = NULL,
                seller_address = NULL,
                locked_price_per_hour = NULL,
                claimed_at = NULL
            FROM stale
            WHERE jobs.job_id = stale.job_id
            RETURNING stale.job_id, stale.node_id
            "#,
        )
        .bind(self.config.claim_grace.as_secs_f64())
        .fetch_all(&mut *tx)
        .await?;

        for swept in &released {
            insert_transition(
                &mut tx,
                swept.job_id,
                Some("CLAIMED"),
                "PENDING",
                swept.node_id.as_deref(),
                reason::STALE_CLAIM_RELEASED,
            )
            .await?;
        }
        tx.commit().await?;

        for swept in &released {
            info!(job_id = %swept.job_id, node_id = ?swept.node_id, "Released stale claim");
        }
        Ok(released)
    }

    /// Fail EXECUTING jobs that have overrun their timeout by the hang
    /// multiplier. The worker is presumed dead; whatever it reports later
    /// is rejected by the status guards.
    pub async fn fail_hung_executions(&self) -> DbResult<Vec<SweptJob>> {
        let mut tx = self.pool.begin().await?;

        let failed = sqlx::query_as::<_, SweptJob>(
            r#"
            WITH hung AS (
                SELECT job_id, node_id FROM jobs
                WHERE status = 'EXECUTING'
                  AND started_at < NOW() - make_interval(secs => timeout_seconds * $1)
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'FAILED',
                result_error = 'execution exceeded ' || jobs.timeout_seconds::TEXT
                               || 's timeout and was reaped',
                completed_at = NOW()
            FROM hung
            WHERE jobs.job_id = hung.job_id
            RETURNING hung.job_id, hung.node_id
            "#,
        )
        .bind(self.config.hang_multiplier)
        .fetch_all(&mut *tx)
        .await?;

        for swept in &failed {
            insert_transition(
                &mut tx,
                swept.job_id,
                Some("EXECUTING"),
                "FAILED",
                swept.node_id.as_deref(),
                reason::EXECUTION_TIMEOUT,
            )
            .await?;
        }
        tx.commit().await?;

        for swept in &failed {
            warn!(job_id = %swept.job_id, node_id = ?swept.node_id, "Reaped hung execution");
        }
        Ok(failed)
    }

    /// Retry settlement for completed jobs whose bill never got recorded.
    pub async fn settle_unbilled(&self) -> DbResult<usize> {
        let unbilled = sqlx::query_as::<_, JobRecord>(
            "SELECT * FROM jobs WHERE status = 'COMPLETED' AND total_cost_usd IS NULL \
             ORDER BY completed_at ASC LIMIT 100",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut recorded = 0;
        for record in &unbilled {
            match settle_completed(self.jobs.as_ref(), self.settlement.as_ref(), record).await {
                Ok(_) => recorded += 1,
                Err(err) => {
                    warn!(job_id = %record.job_id, error = %err, "Settlement retry failed");
                }
            }
        }
        Ok(recorded)
    }

    /// Run all three scans once. Scan failures are logged, not propagated.
    pub async fn run_sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        match self.release_stale_claims().await {
            Ok(released) => report.stale_claims_released = released.len(),
            Err(err) => error!(error = %err, "Stale claim scan failed"),
        }

        match self.fail_hung_executions().await {
            Ok(failed) => report.hung_executions_failed = failed.len(),
            Err(err) => error!(error = %err, "Hung execution scan failed"),
        }

        match self.settle_unbilled().await {
            Ok(recorded) => report.settlements_recorded = recorded,
            Err(err) => error!(error = %err, "Settlement retry scan failed"),
        }

        report
    }

    /// Spawn the periodic sweep loop.
    ///
    /// The first sweep runs one full interval after startup, giving workers
    /// a chance to reconnect after a restart before anything is reaped.
    pub fn spawn(self) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            info!(
                sweep_interval_secs = self.config.sweep_interval.as_secs(),
                claim_grace_secs = self.config.claim_grace.as_secs(),
                hang_multiplier = self.config.hang_multiplier,
                "Reaper started"
            );
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.sweep_interval) => {
                        let report = self.run_sweep_once().await;
                        debug!(
                            stale = report.stale_claims_released,
                            hung = report.hung_executions_failed,
                            settled = report.settlements_recorded,
                            "Sweep finished"
                        );
                    }
                    _ = shutdown_rx.changed() => {
                        info!("Reaper stopping");
                        break;
                    }
                }
            }
        });
        ReaperHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to a running reaper loop.
pub struct ReaperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Stop the loop and wait for any in-flight sweep to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }
}
