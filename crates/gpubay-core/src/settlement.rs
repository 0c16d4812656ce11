//! Settlement adapter trait and billing math.
//!
//! Payment settlement (micropayment signatures, on-chain transfer) is an
//! external service. The core asks it to settle a completed job's bill and
//! stores only the resulting cost and transaction reference.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, JobId, Result};

/// Compute the total cost of a run: per-second billing at the hourly rate
/// locked when the job was claimed.
pub fn compute_cost_usd(locked_price_per_hour: f64, duration_seconds: f64) -> f64 {
    duration_seconds / 3600.0 * locked_price_per_hour
}

/// A settlement request for one completed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRequest {
    pub job_id: JobId,
    pub buyer_address: String,
    pub seller_address: String,
    pub locked_price_per_hour: f64,
    pub duration_seconds: f64,
}

impl SettlementRequest {
    pub fn cost_usd(&self) -> f64 {
        compute_cost_usd(self.locked_price_per_hour, self.duration_seconds)
    }
}

/// Outcome of a successful settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub total_cost_usd: f64,
    /// Opaque payment reference (e.g. a transaction hash).
    pub reference: String,
}

/// Settles payment for completed jobs.
///
/// Implementations must map transport/rail failures to
/// [`Error::SettlementUnavailable`]; callers treat that as retryable and never
/// let it roll back a COMPLETED job.
#[async_trait]
pub trait SettlementAdapter: Send + Sync {
    async fn settle(&self, request: SettlementRequest) -> Result<SettlementReceipt>;
}

/// Settlement without a payment rail: computes the cost and issues a local
/// reference. The default when no settlement endpoint is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSettlement;

#[async_trait]
impl SettlementAdapter for LocalSettlement {
    async fn settle(&self, request: SettlementRequest) -> Result<SettlementReceipt> {
        let cost = request.cost_usd();
        if !cost.is_finite() || cost < 0.0 {
            return Err(Error::SettlementUnavailable(format!(
                "refusing to settle non-finite or negative cost {cost} for job {}",
                request.job_id
            )));
        }
        Ok(SettlementReceipt {
            total_cost_usd: cost,
            reference: format!("local-{}", Uuid::new_v4().simple()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_second_billing() {
        // 10 seconds at $1.50/hr
        let cost = compute_cost_usd(1.5, 10.0);
        assert!((cost - 0.0041666).abs() < 1e-4, "got {cost}");

        // A full hour bills the hourly rate exactly.
        assert!((compute_cost_usd(2.0, 3600.0) - 2.0).abs() < 1e-12);

        // Zero duration is free.
        assert_eq!(compute_cost_usd(3.0, 0.0), 0.0);
    }

    #[tokio::test]
    async fn local_settlement_issues_receipt() {
        let adapter = LocalSettlement;
        let receipt = adapter
            .settle(SettlementRequest {
                job_id: JobId::new(),
                buyer_address: "0xbuyer".into(),
                seller_address: "0xseller".into(),
                locked_price_per_hour: 1.5,
                duration_seconds: 10.0,
            })
            .await
            .unwrap();
        assert!((receipt.total_cost_usd - 0.0041666).abs() < 1e-4);
        assert!(receipt.reference.starts_with("local-"));
    }

    #[tokio::test]
    async fn local_settlement_rejects_nan_rate() {
        let adapter = LocalSettlement;
        let err = adapter
            .settle(SettlementRequest {
                job_id: JobId::new(),
                buyer_address: "0xbuyer".into(),
                seller_address: "0xseller".into(),
                locked_price_per_hour: f64::NAN,
                duration_seconds: 10.0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SettlementUnavailable(_)));
    }
}
