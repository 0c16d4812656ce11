//! Repository traits and implementations.

pub mod job;
pub mod node;

pub use job::{GpuClassCount, JobRecord, JobRepo, PgJobRepo, SellerEarnings, StatusCount};
pub use node::{NodeClassStats, NodeRecord, NodeRepo, PgNodeRepo};
