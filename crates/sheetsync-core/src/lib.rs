//! SheetSync Core - Domain types and business rules
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain types** - `RawRow`, `RawTable`, `Snapshot`, `ChangeSet`, cache entries
//! - **Wire decoding** - the tagged union of structured and legacy payloads
//! - **Port definitions** - Traits for adapters: `ICacheBackend`, `Transformer`
//! - **Configuration** - YAML-backed settings with validation and a builder
//!
//! # Architecture
//!
//! The domain module is pure data with no I/O. Ports define trait interfaces
//! that the cache, transport and sync crates implement or consume.

pub mod clock;
pub mod config;
pub mod domain;
pub mod ports;

pub use clock::{Clock, ManualClock, SystemClock};
