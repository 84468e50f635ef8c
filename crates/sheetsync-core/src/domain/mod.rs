//! Domain entities
//!
//! This module contains the core domain types for SheetSync:
//! - Newtypes for cache keys, sheet names and job identifiers
//! - Tabular rows (`RawRow`, `RawTable`) and their scalar cell values
//! - Wire payloads (`Snapshot`, `ChangeSet`) and the legacy 2D array shape
//! - Cache entry shapes (TTL and version form)
//! - Domain-specific error types

pub mod cache_entry;
pub mod errors;
pub mod newtypes;
pub mod payload;
pub mod table;

// Re-export commonly used types
pub use cache_entry::{CacheDocument, CacheEntry, DeltaCacheEntry};
pub use errors::DomainError;
pub use newtypes::*;
pub use payload::{Change, ChangeSet, SheetPayload, Snapshot, SnapshotRow};
pub use table::{CellValue, DomainRow, RawRow, RawTable};
