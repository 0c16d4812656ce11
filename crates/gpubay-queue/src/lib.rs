//! Claim engine, job lifecycle and background maintenance for GPUBay.
//!
//! The claim path is a single atomic `UPDATE ... SKIP LOCKED` statement, so
//! any number of sellers can poll the queue concurrently without ever being
//! handed the same job. Lifecycle reports (start/complete/fail/cancel) ride
//! on the guarded transitions in `gpubay-db`, and the reaper sweeps up
//! whatever crashed workers leave behind.

pub mod engine;
pub mod lifecycle;
pub mod reaper;
pub mod worker;

pub use engine::ClaimEngine;
pub use lifecycle::{CompletionOutcome, JobLifecycle, SettlementStatus};
pub use reaper::{Reaper, ReaperConfig, ReaperHandle, SweepReport, SweptJob};
pub use worker::{PollOutcome, Worker};
