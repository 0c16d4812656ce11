//! Node registry repository.
//!
//! Liveness is derived from `last_heartbeat`, never stored: a node is live
//! when its latest heartbeat falls inside the configured window. Nodes are
//! never hard-deleted.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gpubay_core::NewNode;
use gpubay_core::node::generate_node_id;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::{DbError, DbResult};

/// A registered seller node.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NodeRecord {
    pub node_id: String,
    pub seller_address: String,
    pub gpu_class: String,
    pub device_name: String,
    pub vram_gb: Option<f64>,
    pub gpu_count: i32,
    pub compute_capability: Option<String>,
    pub price_per_hour: f64,
    pub is_available: bool,
    pub last_heartbeat: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Price statistics for live nodes of one GPU class.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NodeClassStats {
    pub gpu_class: String,
    pub count: i64,
    pub min_price_per_hour: f64,
    pub avg_price_per_hour: f64,
    pub max_price_per_hour: f64,
}

#[async_trait]
pub trait NodeRepo: Send + Sync {
    /// Insert a registration under a freshly generated node id.
    async fn register(&self, node: &NewNode) -> DbResult<NodeRecord>;
    /// Refresh the liveness timestamp and availability flag. Idempotent.
    async fn heartbeat(&self, node_id: &str, available: bool) -> DbResult<NodeRecord>;
    async fn mark_unavailable(&self, node_id: &str) -> DbResult<()>;
    async fn get(&self, node_id: &str) -> DbResult<NodeRecord>;
    /// Live + available nodes, cheapest first, optionally filtered.
    async fn list_live(
        &self,
        gpu_class: Option<&str>,
        max_price: Option<f64>,
        liveness_window: Duration,
    ) -> DbResult<Vec<NodeRecord>>;
    async fn class_stats(&self, liveness_window: Duration) -> DbResult<Vec<NodeClassStats>>;
}

/// PostgreSQL implementation of NodeRepo.
pub struct PgNodeRepo {
    pool: PgPool,
}

impl PgNodeRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NodeRepo for PgNodeRepo {
    async fn register(&self, node: &NewNode) -> DbResult<NodeRecord> {
        let record = sqlx::query_as::<_, NodeRecord>(
            r#"
            INSERT INTO nodes (
                node_id, seller_address, gpu_class, device_name, vram_gb,
                gpu_count, compute_capability, price_per_hour, is_available,
                last_heartbeat, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(generate_node_id())
        .bind(&node.seller_address)
        .bind(node.gpu_info.gpu_class.as_str())
        .bind(&node.gpu_info.device_name)
        .bind(node.gpu_info.vram_gb)
        .bind(node.gpu_info.gpu_count)
        .bind(node.gpu_info.compute_capability.as_deref())
        .bind(node.price_per_hour)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    async fn heartbeat(&self, node_id: &str, available: bool) -> DbResult<NodeRecord> {
        let record = sqlx::query_as::<_, NodeRecord>(
            r#"
            UPDATE nodes SET last_heartbeat = NOW(), is_available = $2
            WHERE node_id = $1
            RETURNING *
            "#,
        )
        .bind(node_id)
        .bind(available)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("node {}", node_id)))?;
        Ok(record)
    }

    async fn mark_unavailable(&self, node_id: &str) -> DbResult<()> {
        let result = sqlx::query("UPDATE nodes SET is_available = FALSE WHERE node_id = $1")
            .bind(node_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("node {}", node_id)));
        }
        Ok(())
    }

    async fn get(&self, node_id: &str) -> DbResult<NodeRecord> {
        let record = sqlx::query_as::<_, NodeRecord>("SELECT * FROM nodes WHERE node_id = $1")
            .bind(node_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("node {}", node_id)))?;
        Ok(record)
    }

    async fn list_live(
        &self,
        gpu_class: Option<&str>,
        max_price: Option<f64>,
        liveness_window: Duration,
    ) -> DbResult<Vec<NodeRecord>> {
        let records = sqlx::query_as::<_, NodeRecord>(
            r#"
            SELECT * FROM nodes
            WHERE is_available
              AND last_heartbeat > NOW() - make_interval(secs => $1)
              AND ($2::TEXT IS NULL OR gpu_class = $2)
              AND ($3::DOUBLE PRECISION IS NULL OR price_per_hour <= $3)
            ORDER BY price_per_hour ASC, node_id ASC
            "#,
        )
        .bind(liveness_window.as_secs_f64())
        .bind(gpu_class)
        .bind(max_price)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn class_stats(&self, liveness_window: Duration) -> DbResult<Vec<NodeClassStats>> {
        let records = sqlx::query_as::<_, NodeClassStats>(
            r#"
            SELECT gpu_class,
                   COUNT(*) AS count,
                   MIN(price_per_hour) AS min_price_per_hour,
                   AVG(price_per_hour) AS avg_price_per_hour,
                   MAX(price_per_hour) AS max_price_per_hour
            FROM nodes
            WHERE is_available AND last_heartbeat > NOW() - make_interval(secs => $1)
            GROUP BY gpu_class
            ORDER BY gpu_class
            "#,
        )
        .bind(liveness_window.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}
