//! Integration tests for sheetsync-transport
//!
//! Uses wiremock to simulate the structured endpoint, the intermediary and
//! the export routes, and verifies retry, classification and route
//! fallback end to end.

mod common;

mod test_api;
mod test_export;
