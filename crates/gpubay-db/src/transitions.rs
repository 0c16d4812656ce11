//! Append-only job transition log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::DbResult;

/// Transition reasons recorded in the audit log.
pub mod reason {
    pub const SUBMITTED: &str = "submitted";
    pub const CLAIMED: &str = "claimed";
    pub const EXECUTION_STARTED: &str = "execution_started";
    pub const EXECUTION_COMPLETED: &str = "execution_completed";
    pub const EXECUTION_FAILED: &str = "execution_failed";
    pub const CANCELLED_BY_BUYER: &str = "cancelled_by_buyer";
    pub const STALE_CLAIM_RELEASED: &str = "stale_claim_released";
    pub const EXECUTION_TIMEOUT: &str = "execution_timeout";
}

/// One row of the audit log. Rows are only ever inserted.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TransitionRecord {
    pub id: i64,
    pub job_id: Uuid,
    /// NULL for the submission row.
    pub from_status: Option<String>,
    pub to_status: String,
    pub node_id: Option<String>,
    pub reason: String,
    pub transitioned_at: DateTime<Utc>,
}

/// Append a transition row. Callers run this inside the same transaction as
/// the status change it records.
pub async fn insert_transition(
    conn: &mut PgConnection,
    job_id: Uuid,
    from_status: Option<&str>,
    to_status: &str,
    node_id: Option<&str>,
    reason: &str,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO job_transitions (job_id, from_status, to_status, node_id, reason, transitioned_at)
        VALUES ($1, $2, $3, $4, $5, NOW())
        "#,
    )
    .bind(job_id)
    .bind(from_status)
    .bind(to_status)
    .bind(node_id)
    .bind(reason)
    .execute(&mut *conn)
    .await?;
    Ok(())
}
