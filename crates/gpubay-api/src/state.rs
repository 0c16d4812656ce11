//! Application state.

use std::sync::Arc;

use gpubay_config::SystemConfig;
use gpubay_core::settlement::{LocalSettlement, SettlementAdapter};
use gpubay_db::{JobRepo, NodeRepo, PgJobRepo, PgNodeRepo};
use gpubay_queue::{ClaimEngine, JobLifecycle, Reaper, ReaperConfig};
use sqlx::PgPool;

use crate::services::settlement::HttpSettlementClient;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: SystemConfig,
    pub jobs: Arc<dyn JobRepo>,
    pub nodes: Arc<dyn NodeRepo>,
    pub engine: Arc<ClaimEngine>,
    pub lifecycle: Arc<JobLifecycle>,
    pub settlement: Arc<dyn SettlementAdapter>,
}

impl AppState {
    pub fn new(pool: PgPool, config: SystemConfig) -> Self {
        let jobs: Arc<dyn JobRepo> = Arc::new(PgJobRepo::new(pool.clone()));
        let nodes: Arc<dyn NodeRepo> = Arc::new(PgNodeRepo::new(pool.clone()));

        let settlement: Arc<dyn SettlementAdapter> = match &config.settlement_endpoint {
            Some(endpoint) => Arc::new(HttpSettlementClient::new(endpoint.clone())),
            None => Arc::new(LocalSettlement),
        };

        let engine = Arc::new(ClaimEngine::new(pool.clone()));
        let lifecycle = Arc::new(JobLifecycle::new(jobs.clone(), settlement.clone()));

        Self {
            pool,
            config,
            jobs,
            nodes,
            engine,
            lifecycle,
            settlement,
        }
    }

    /// Build the maintenance reaper over this state's pool and adapters.
    pub fn reaper(&self) -> Reaper {
        Reaper::new(
            self.pool.clone(),
            self.jobs.clone(),
            self.settlement.clone(),
            ReaperConfig::from(&self.config.queue),
        )
    }
}
