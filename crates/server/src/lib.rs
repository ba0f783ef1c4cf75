//! HTTP and WebSocket surface of the tierflow run orchestrator.

pub mod api;
pub mod metrics;
pub mod state;
