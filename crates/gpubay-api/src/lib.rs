//! HTTP API server for the GPUBay compute marketplace.
//!
//! Buyers submit and track jobs, sellers register nodes and claim work,
//! both sides read marketplace stats. All state lives in Postgres; this
//! crate is routing, extraction and response shaping.

pub mod error;
pub mod routes;
pub mod services;
pub mod state;

pub use state::AppState;
