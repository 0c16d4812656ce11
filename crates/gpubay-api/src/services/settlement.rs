//! HTTP settlement client.
//!
//! Posts the settlement request to an external payment endpoint and expects
//! a receipt back. Every transport or protocol failure maps to
//! `SettlementUnavailable` so completion handling treats it as retryable.

use async_trait::async_trait;
use gpubay_core::settlement::{SettlementAdapter, SettlementReceipt, SettlementRequest};
use gpubay_core::{Error, Result};

pub struct HttpSettlementClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSettlementClient {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl SettlementAdapter for HttpSettlementClient {
    async fn settle(&self, request: SettlementRequest) -> Result<SettlementReceipt> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::SettlementUnavailable(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::SettlementUnavailable(format!(
                "endpoint returned {status}: {text}"
            )));
        }

        let receipt: SettlementReceipt = response
            .json()
            .await
            .map_err(|e| Error::SettlementUnavailable(format!("malformed receipt: {e}")))?;

        if !receipt.total_cost_usd.is_finite() || receipt.total_cost_usd < 0.0 {
            return Err(Error::SettlementUnavailable(format!(
                "receipt carries invalid cost {}",
                receipt.total_cost_usd
            )));
        }

        Ok(receipt)
    }
}
