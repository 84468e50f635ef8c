//! Integration tests for sheetsync-sync
//!
//! Runs the orchestrator, delta engine, transform pipeline and background
//! coordinator against wiremock servers standing in for the structured
//! endpoint and the export routes, with an in-memory cache and a manual
//! clock.

mod common;

mod test_background;
mod test_delta;
mod test_orchestrator;
mod test_pipeline;
