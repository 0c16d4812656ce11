//! Job lifecycle state machine and submission types.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::node::GpuClass;

/// Maximum number of GPUs a single job may request.
pub const MAX_GPU_COUNT: i32 = 8;

/// Lifecycle states of a job.
///
/// Legal transitions:
/// - PENDING -> CLAIMED (claim engine) | CANCELLED (buyer)
/// - CLAIMED -> EXECUTING (worker start) | CANCELLED (buyer)
///            | PENDING (reaper stale-claim release) | FAILED (never started)
/// - EXECUTING -> COMPLETED | FAILED (worker report or reaper hang kill)
///
/// COMPLETED, FAILED and CANCELLED are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Claimed,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Every status, in lifecycle order. Used to exercise the full
    /// transition table in tests and stats.
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Claimed,
        JobStatus::Executing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Claimed => "CLAIMED",
            JobStatus::Executing => "EXECUTING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Claimed)
                | (Pending, Cancelled)
                | (Claimed, Executing)
                | (Claimed, Cancelled)
                | (Claimed, Pending)
                | (Claimed, Failed)
                | (Executing, Completed)
                | (Executing, Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "CLAIMED" => Ok(JobStatus::Claimed),
            "EXECUTING" => Ok(JobStatus::Executing),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            other => Err(Error::Validation(format!("unknown job status: {other}"))),
        }
    }
}

/// A job submission as received from a buyer. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    /// Wallet-style address of the submitter.
    pub buyer_address: String,
    /// Script to execute on the seller's hardware.
    pub script: String,
    /// Optional dependency manifest (e.g. pip requirements).
    pub requirements: Option<String>,
    /// Ceiling on the hourly rate the buyer will accept.
    pub max_price_per_hour: f64,
    /// Declared execution timeout.
    pub timeout_seconds: i32,
    /// Restrict to a specific GPU class, if set.
    pub required_gpu_class: Option<GpuClass>,
    /// Minimum VRAM in GB, if set.
    pub min_vram_gb: Option<f64>,
    /// Number of GPUs the job needs.
    pub required_gpu_count: i32,
}

impl NewJob {
    /// Reject malformed submissions before any state is created.
    pub fn validate(&self) -> Result<()> {
        if self.buyer_address.trim().is_empty() {
            return Err(Error::Validation("buyer_address must not be empty".into()));
        }
        if self.script.trim().is_empty() {
            return Err(Error::Validation("script must not be empty".into()));
        }
        if !self.max_price_per_hour.is_finite() || self.max_price_per_hour <= 0.0 {
            return Err(Error::Validation(format!(
                "max_price_per_hour must be positive, got {}",
                self.max_price_per_hour
            )));
        }
        if self.timeout_seconds <= 0 {
            return Err(Error::Validation(format!(
                "timeout_seconds must be positive, got {}",
                self.timeout_seconds
            )));
        }
        if let Some(vram) = self.min_vram_gb {
            if !vram.is_finite() || vram <= 0.0 {
                return Err(Error::Validation(format!(
                    "min_vram_gb must be positive, got {vram}"
                )));
            }
        }
        if self.required_gpu_count < 1 || self.required_gpu_count > MAX_GPU_COUNT {
            return Err(Error::Validation(format!(
                "required_gpu_count must be between 1 and {MAX_GPU_COUNT}, got {}",
                self.required_gpu_count
            )));
        }
        Ok(())
    }

    /// The claim-matching constraints of this submission.
    pub fn constraints(&self) -> JobConstraints {
        JobConstraints {
            required_gpu_class: self.required_gpu_class,
            max_price_per_hour: self.max_price_per_hour,
            min_vram_gb: self.min_vram_gb,
            required_gpu_count: self.required_gpu_count,
        }
    }
}

/// The subset of job fields the claim engine matches offers against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JobConstraints {
    pub required_gpu_class: Option<GpuClass>,
    pub max_price_per_hour: f64,
    pub min_vram_gb: Option<f64>,
    pub required_gpu_count: i32,
}
