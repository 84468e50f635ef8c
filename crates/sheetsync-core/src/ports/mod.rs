//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the domain core
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`ICacheBackend`] - Shared document store holding cache entries
//! - [`Transformer`] - Pure row-to-domain function run by the transform pipeline

pub mod cache_backend;
pub mod transformer;

pub use cache_backend::{CacheBackendError, ICacheBackend};
pub use transformer::{TransformFailure, TransformInput, TransformMeta, Transformer};
