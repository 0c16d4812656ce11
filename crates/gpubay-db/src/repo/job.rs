//! Job repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gpubay_core::{JobId, JobStatus, NewJob};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::transitions::{TransitionRecord, insert_transition, reason};
use crate::{DbError, DbResult};

/// SQL `IN (...)` list of the states the lifecycle may leave toward
/// `target`. Derived from the transition table in `gpubay-core` so the
/// conditional-update guards below cannot drift from it.
fn sources_sql(target: JobStatus) -> String {
    JobStatus::ALL
        .iter()
        .filter(|from| from.can_transition_to(target))
        .map(|from| format!("'{from}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Discriminate a guard miss on a conditional update: a state the
/// transition table rejects is `InvalidState`, a legal state under a
/// different node is `NotOwner`.
fn classify_guard_miss(current: &JobRecord, target: JobStatus) -> DbError {
    match current.status.parse::<JobStatus>() {
        Ok(from) if from.can_transition_to(target) => DbError::NotOwner(format!(
            "job {} belongs to another node",
            current.job_id
        )),
        _ => DbError::InvalidState {
            job_id: current.job_id.to_string(),
            status: current.status.clone(),
        },
    }
}

/// A job record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobRecord {
    pub job_id: uuid::Uuid,
    pub buyer_address: String,
    pub script: String,
    pub requirements: Option<String>,
    pub max_price_per_hour: f64,
    pub timeout_seconds: i32,
    pub required_gpu_class: Option<String>,
    pub min_vram_gb: Option<f64>,
    pub required_gpu_count: i32,
    pub status: String,
    pub node_id: Option<String>,
    pub seller_address: Option<String>,
    /// Seller's advertised hourly rate, fixed at claim time.
    pub locked_price_per_hour: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result_output: Option<String>,
    pub result_error: Option<String>,
    pub exit_code: Option<i32>,
    pub execution_duration_seconds: Option<f64>,
    pub total_cost_usd: Option<f64>,
    pub settlement_ref: Option<String>,
}

/// Job count for one status, for the stats endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

/// Pending-job count for one GPU class ("any" when unconstrained).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GpuClassCount {
    pub gpu_class: String,
    pub count: i64,
}

/// Aggregate earnings of one seller over completed jobs.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SellerEarnings {
    pub seller_address: String,
    pub jobs_completed: i64,
    pub total_earned_usd: f64,
    pub earned_today_usd: f64,
    pub total_compute_seconds: f64,
}

#[async_trait]
pub trait JobRepo: Send + Sync {
    async fn submit(&self, job: &NewJob) -> DbResult<JobRecord>;
    async fn get(&self, id: JobId) -> DbResult<JobRecord>;
    async fn list_by_buyer(
        &self,
        buyer_address: &str,
        status: Option<&str>,
        limit: i64,
    ) -> DbResult<Vec<JobRecord>>;
    async fn list_by_seller(
        &self,
        seller_address: &str,
        status: Option<&str>,
        limit: i64,
    ) -> DbResult<Vec<JobRecord>>;
    async fn list_pending(&self, gpu_class: Option<&str>, limit: i64) -> DbResult<Vec<JobRecord>>;

    /// CLAIMED -> EXECUTING, reported by the claiming node.
    async fn begin_execution(&self, id: JobId, node_id: &str) -> DbResult<JobRecord>;
    /// EXECUTING -> COMPLETED with results. Settlement is recorded separately.
    async fn complete_execution(
        &self,
        id: JobId,
        node_id: &str,
        output: &str,
        exit_code: i32,
        duration_seconds: f64,
    ) -> DbResult<JobRecord>;
    /// EXECUTING/CLAIMED -> FAILED with error details.
    async fn fail_execution(
        &self,
        id: JobId,
        node_id: &str,
        error: &str,
        exit_code: Option<i32>,
        duration_seconds: Option<f64>,
    ) -> DbResult<JobRecord>;
    /// PENDING/CLAIMED -> CANCELLED, buyer only.
    async fn cancel(&self, id: JobId, buyer_address: &str) -> DbResult<JobRecord>;
    /// Attach cost and settlement reference to a COMPLETED job.
    async fn record_settlement(
        &self,
        id: JobId,
        total_cost_usd: f64,
        reference: &str,
    ) -> DbResult<JobRecord>;

    async fn transitions(&self, id: JobId) -> DbResult<Vec<TransitionRecord>>;
    async fn counts_by_status(&self) -> DbResult<Vec<StatusCount>>;
    async fn pending_counts_by_class(&self) -> DbResult<Vec<GpuClassCount>>;
    async fn seller_earnings(&self, seller_address: &str) -> DbResult<SellerEarnings>;
}

/// PostgreSQL implementation of JobRepo.
pub struct PgJobRepo {
    pool: PgPool,
}

impl PgJobRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Lock a job row for the rest of the transaction, or report NotFound.
    async fn lock_row(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: JobId,
    ) -> DbResult<JobRecord> {
        sqlx::query_as::<_, JobRecord>("SELECT * FROM jobs WHERE job_id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("job {}", id)))
    }
}

#[async_trait]
impl JobRepo for PgJobRepo {
    async fn submit(&self, job: &NewJob) -> DbResult<JobRecord> {
        let mut tx = self.pool.begin().await?;
        let record = sqlx::query_as::<_, JobRecord>(
            r#"
            INSERT INTO jobs (
                job_id, buyer_address, script, requirements, max_price_per_hour,
                timeout_seconds, required_gpu_class, min_vram_gb, required_gpu_count,
                status, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'PENDING', NOW())
            RETURNING *
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(&job.buyer_address)
        .bind(&job.script)
        .bind(job.requirements.as_deref())
        .bind(job.max_price_per_hour)
        .bind(job.timeout_seconds)
        .bind(job.required_gpu_class.map(|class| class.as_str()))
        .bind(job.min_vram_gb)
        .bind(job.required_gpu_count)
        .fetch_one(&mut *tx)
        .await?;
        insert_transition(
            &mut tx,
            record.job_id,
            None,
            "PENDING",
            None,
            reason::SUBMITTED,
        )
        .await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn get(&self, id: JobId) -> DbResult<JobRecord> {
        let record = sqlx::query_as::<_, JobRecord>("SELECT * FROM jobs WHERE job_id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("job {}", id)))?;
        Ok(record)
    }

    async fn list_by_buyer(
        &self,
        buyer_address: &str,
        status: Option<&str>,
        limit: i64,
    ) -> DbResult<Vec<JobRecord>> {
        let records = sqlx::query_as::<_, JobRecord>(
            r#"
            SELECT * FROM jobs
            WHERE buyer_address = $1 AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(buyer_address)
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn list_by_seller(
        &self,
        seller_address: &str,
        status: Option<&str>,
        limit: i64,
    ) -> DbResult<Vec<JobRecord>> {
        let records = sqlx::query_as::<_, JobRecord>(
            r#"
            SELECT * FROM jobs
            WHERE seller_address = $1 AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY claimed_at DESC
            LIMIT $3
            "#,
        )
        .bind(seller_address)
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn list_pending(&self, gpu_class: Option<&str>, limit: i64) -> DbResult<Vec<JobRecord>> {
        let records = sqlx::query_as::<_, JobRecord>(
            r#"
            SELECT * FROM jobs
            WHERE status = 'PENDING'
              AND ($1::TEXT IS NULL OR required_gpu_class IS NULL OR required_gpu_class = $1)
            ORDER BY created_at ASC, job_id ASC
            LIMIT $2
            "#,
        )
        .bind(gpu_class)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn begin_execution(&self, id: JobId, node_id: &str) -> DbResult<JobRecord> {
        let mut tx = self.pool.begin().await?;
        let current = Self::lock_row(&mut tx, id).await?;

        let sql = format!(
            "UPDATE jobs SET status = 'EXECUTING', started_at = NOW() \
             WHERE job_id = $1 AND status IN ({}) AND node_id = $2 \
             RETURNING *",
            sources_sql(JobStatus::Executing)
        );
        let updated = sqlx::query_as::<_, JobRecord>(&sql)
            .bind(id.as_uuid())
            .bind(node_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(record) = updated else {
            return Err(classify_guard_miss(&current, JobStatus::Executing));
        };

        insert_transition(
            &mut tx,
            record.job_id,
            Some(current.status.as_str()),
            "EXECUTING",
            Some(node_id),
            reason::EXECUTION_STARTED,
        )
        .await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn complete_execution(
        &self,
        id: JobId,
        node_id: &str,
        output: &str,
        exit_code: i32,
        duration_seconds: f64,
    ) -> DbResult<JobRecord> {
        let mut tx = self.pool.begin().await?;
        let current = Self::lock_row(&mut tx, id).await?;

        let sql = format!(
            "UPDATE jobs \
             SET status = 'COMPLETED', \
                 result_output = $3, \
                 exit_code = $4, \
                 execution_duration_seconds = $5, \
                 completed_at = NOW() \
             WHERE job_id = $1 AND status IN ({}) AND node_id = $2 \
             RETURNING *",
            sources_sql(JobStatus::Completed)
        );
        let updated = sqlx::query_as::<_, JobRecord>(&sql)
            .bind(id.as_uuid())
            .bind(node_id)
            .bind(output)
            .bind(exit_code)
            .bind(duration_seconds)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(record) = updated else {
            return Err(classify_guard_miss(&current, JobStatus::Completed));
        };

        insert_transition(
            &mut tx,
            record.job_id,
            Some(current.status.as_str()),
            "COMPLETED",
            Some(node_id),
            reason::EXECUTION_COMPLETED,
        )
        .await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn fail_execution(
        &self,
        id: JobId,
        node_id: &str,
        error: &str,
        exit_code: Option<i32>,
        duration_seconds: Option<f64>,
    ) -> DbResult<JobRecord> {
        let mut tx = self.pool.begin().await?;
        let current = Self::lock_row(&mut tx, id).await?;

        // Sources of FAILED include CLAIMED: a worker may fail a job it
        // never got to start.
        let sql = format!(
            "UPDATE jobs \
             SET status = 'FAILED', \
                 result_error = $3, \
                 exit_code = $4, \
                 execution_duration_seconds = $5, \
                 completed_at = NOW() \
             WHERE job_id = $1 AND status IN ({}) AND node_id = $2 \
             RETURNING *",
            sources_sql(JobStatus::Failed)
        );
        let updated = sqlx::query_as::<_, JobRecord>(&sql)
            .bind(id.as_uuid())
            .bind(node_id)
            .bind(error)
            .bind(exit_code)
            .bind(duration_seconds)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(record) = updated else {
            return Err(classify_guard_miss(&current, JobStatus::Failed));
        };

        insert_transition(
            &mut tx,
            record.job_id,
            Some(current.status.as_str()),
            "FAILED",
            Some(node_id),
            reason::EXECUTION_FAILED,
        )
        .await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn cancel(&self, id: JobId, buyer_address: &str) -> DbResult<JobRecord> {
        let mut tx = self.pool.begin().await?;
        let current = Self::lock_row(&mut tx, id).await?;

        if current.buyer_address != buyer_address {
            return Err(DbError::NotOwner(format!(
                "job {} belongs to a different buyer",
                id
            )));
        }

        let sql = format!(
            "UPDATE jobs SET status = 'CANCELLED', completed_at = NOW() \
             WHERE job_id = $1 AND buyer_address = $2 AND status IN ({}) \
             RETURNING *",
            sources_sql(JobStatus::Cancelled)
        );
        let updated = sqlx::query_as::<_, JobRecord>(&sql)
            .bind(id.as_uuid())
            .bind(buyer_address)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(record) = updated else {
            return Err(DbError::InvalidState {
                job_id: id.to_string(),
                status: current.status,
            });
        };

        insert_transition(
            &mut tx,
            record.job_id,
            Some(current.status.as_str()),
            "CANCELLED",
            current.node_id.as_deref(),
            reason::CANCELLED_BY_BUYER,
        )
        .await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn record_settlement(
        &self,
        id: JobId,
        total_cost_usd: f64,
        reference: &str,
    ) -> DbResult<JobRecord> {
        let record = sqlx::query_as::<_, JobRecord>(
            r#"
            UPDATE jobs SET total_cost_usd = $2, settlement_ref = $3
            WHERE job_id = $1 AND status = 'COMPLETED'
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .bind(total_cost_usd)
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("completed job {}", id)))?;
        Ok(record)
    }

    async fn transitions(&self, id: JobId) -> DbResult<Vec<TransitionRecord>> {
        let records = sqlx::query_as::<_, TransitionRecord>(
            "SELECT * FROM job_transitions WHERE job_id = $1 ORDER BY id ASC",
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn counts_by_status(&self) -> DbResult<Vec<StatusCount>> {
        let records = sqlx::query_as::<_, StatusCount>(
            "SELECT status, COUNT(*) AS count FROM jobs GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn pending_counts_by_class(&self) -> DbResult<Vec<GpuClassCount>> {
        let records = sqlx::query_as::<_, GpuClassCount>(
            r#"
            SELECT COALESCE(required_gpu_class, 'any') AS gpu_class, COUNT(*) AS count
            FROM jobs
            WHERE status = 'PENDING'
            GROUP BY 1
            ORDER BY 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn seller_earnings(&self, seller_address: &str) -> DbResult<SellerEarnings> {
        let earnings = sqlx::query_as::<_, SellerEarnings>(
            r#"
            SELECT
                $1::TEXT AS seller_address,
                COUNT(*) AS jobs_completed,
                COALESCE(SUM(total_cost_usd), 0) AS total_earned_usd,
                COALESCE(SUM(total_cost_usd)
                    FILTER (WHERE completed_at >= date_trunc('day', NOW())), 0) AS earned_today_usd,
                COALESCE(SUM(execution_duration_seconds), 0) AS total_compute_seconds
            FROM jobs
            WHERE seller_address = $1 AND status = 'COMPLETED'
            "#,
        )
        .bind(seller_address)
        .fetch_one(&self.pool)
        .await?;
        Ok(earnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_lists_follow_the_transition_table() {
        assert_eq!(sources_sql(JobStatus::Claimed), "'PENDING'");
        assert_eq!(sources_sql(JobStatus::Executing), "'CLAIMED'");
        assert_eq!(sources_sql(JobStatus::Completed), "'EXECUTING'");
        assert_eq!(sources_sql(JobStatus::Failed), "'CLAIMED', 'EXECUTING'");
        assert_eq!(sources_sql(JobStatus::Cancelled), "'PENDING', 'CLAIMED'");
        // Only the reaper's stale-claim release re-enters PENDING.
        assert_eq!(sources_sql(JobStatus::Pending), "'CLAIMED'");
    }

    fn record_with(status: &str, node_id: Option<&str>) -> JobRecord {
        JobRecord {
            job_id: uuid::Uuid::now_v7(),
            buyer_address: "0xbuyer".to_string(),
            script: "print('hi')".to_string(),
            requirements: None,
            max_price_per_hour: 2.0,
            timeout_seconds: 600,
            required_gpu_class: None,
            min_vram_gb: None,
            required_gpu_count: 1,
            status: status.to_string(),
            node_id: node_id.map(str::to_string),
            seller_address: node_id.map(|_| "0xseller".to_string()),
            locked_price_per_hour: node_id.map(|_| 1.5),
            created_at: chrono::Utc::now(),
            claimed_at: None,
            started_at: None,
            completed_at: None,
            result_output: None,
            result_error: None,
            exit_code: None,
            execution_duration_seconds: None,
            total_cost_usd: None,
            settlement_ref: None,
        }
    }

    #[test]
    fn guard_miss_on_legal_state_is_ownership() {
        let claimed = record_with("CLAIMED", Some("node_other0000000"));
        assert!(matches!(
            classify_guard_miss(&claimed, JobStatus::Executing),
            DbError::NotOwner(_)
        ));
    }

    #[test]
    fn guard_miss_on_illegal_state_is_invalid_transition() {
        let done = record_with("COMPLETED", Some("node_done00000000"));
        assert!(matches!(
            classify_guard_miss(&done, JobStatus::Executing),
            DbError::InvalidState { ref status, .. } if status == "COMPLETED"
        ));

        let pending = record_with("PENDING", None);
        assert!(matches!(
            classify_guard_miss(&pending, JobStatus::Completed),
            DbError::InvalidState { ref status, .. } if status == "PENDING"
        ));
    }
}
