//! HTTP surface of the Archivist preservation engine.
//!
//! The binary in `main.rs` wires the engine together; this library exposes the
//! router and shared state so the API can be exercised in integration tests.

pub mod api;
pub mod metrics;
pub mod state;
