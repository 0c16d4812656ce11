//! Atomic job claiming.
//!
//! Matching and assignment happen in one SQL statement: the inner SELECT
//! picks the oldest PENDING job the offer can serve, the outer UPDATE
//! assigns it and locks the price. `FOR UPDATE SKIP LOCKED` makes
//! concurrent claimers skip rows another transaction is mid-claim on
//! instead of blocking, so two sellers can never be handed the same job.

use gpubay_core::CapabilityOffer;
use gpubay_db::transitions::{insert_transition, reason};
use gpubay_db::{DbResult, JobRecord};
use sqlx::PgPool;
use tracing::info;

/// Claims pending jobs on behalf of seller nodes.
#[derive(Clone)]
pub struct ClaimEngine {
    pool: PgPool,
}

impl ClaimEngine {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Try to claim the oldest pending job this offer can serve.
    ///
    /// A job matches when its GPU class requirement is unset or equals the
    /// offer's class, its price ceiling covers the offer's rate, and the
    /// offer has enough VRAM and GPUs. The offer's rate is captured into
    /// `locked_price_per_hour` at claim time; later node price changes do
    /// not touch it.
    ///
    /// `Ok(None)` means nothing matched, which is the normal idle case.
    pub async fn claim(&self, offer: &CapabilityOffer) -> DbResult<Option<JobRecord>> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query_as::<_, JobRecord>(
            r#"
            UPDATE jobs
            SET status = 'CLAIMED',
                node_id = $1,
                seller_address = $2,
                locked_price_per_hour = $3,
                claimed_at = NOW()
            WHERE job_id = (
                SELECT job_id FROM jobs
                WHERE status = 'PENDING'
                  AND (required_gpu_class IS NULL OR required_gpu_class = $4)
                  AND max_price_per_hour >= $3
                  AND (min_vram_gb IS NULL OR min_vram_gb <= $5)
                  AND required_gpu_count <= $6
                ORDER BY created_at ASC, job_id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(&offer.node_id)
        .bind(&offer.seller_address)
        .bind(offer.price_per_hour)
        .bind(offer.gpu_class.as_str())
        .bind(offer.vram_gb)
        .bind(offer.gpu_count)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(record) = claimed else {
            return Ok(None);
        };

        insert_transition(
            &mut tx,
            record.job_id,
            Some("PENDING"),
            "CLAIMED",
            Some(offer.node_id.as_str()),
            reason::CLAIMED,
        )
        .await?;
        tx.commit().await?;

        info!(
            job_id = %record.job_id,
            node_id = %offer.node_id,
            locked_price_per_hour = offer.price_per_hour,
            "Claimed job"
        );
        Ok(Some(record))
    }
}
