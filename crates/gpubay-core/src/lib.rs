//! Core domain types and traits for the gpubay compute marketplace.
//!
//! This crate contains:
//! - Job identifiers and the job lifecycle state machine
//! - GPU classes and node capability types
//! - Submission and claim-offer types with validation
//! - ExecutionAdapter trait (sandbox is an external collaborator)
//! - SettlementAdapter trait and billing math
//! - The shared error taxonomy

pub mod error;
pub mod executor;
pub mod id;
pub mod job;
pub mod node;
pub mod settlement;

pub use error::{Error, Result};
pub use id::JobId;
pub use job::{JobConstraints, JobStatus, NewJob};
pub use node::{CapabilityOffer, GpuClass, GpuInfo, NewNode};
