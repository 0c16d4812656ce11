//! Execution adapter trait and job execution types.
//!
//! The sandbox that actually runs buyer scripts (container lifecycle, network
//! isolation) is an external collaborator. The queue core only hands a claimed
//! job to an adapter and reacts to its outcome.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{JobId, Result};

/// What the worker passes to the sandbox for a claimed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub job_id: JobId,
    /// Script text to execute.
    pub script: String,
    /// Optional dependency manifest to install first.
    pub requirements: Option<String>,
    /// Buyer-declared execution timeout.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Number of GPUs to expose to the sandbox.
    pub gpu_count: i32,
}

/// What the sandbox reports back after a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Captured stdout (and interleaved stderr, if the sandbox merges them).
    pub output: String,
    /// Error text when the run went wrong.
    pub error: Option<String>,
    /// Process exit code.
    pub exit_code: i32,
    /// Wall-clock execution time, the billing basis.
    pub duration_seconds: f64,
}

impl ExecutionOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs claimed jobs in an isolated environment.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    /// Short name for logging (e.g. "docker").
    fn name(&self) -> &'static str;

    /// Execute the request to completion, or fail with
    /// [`Error::ExecutionFailed`](crate::Error::ExecutionFailed) when the
    /// sandbox itself breaks before producing an outcome.
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionOutcome>;
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
