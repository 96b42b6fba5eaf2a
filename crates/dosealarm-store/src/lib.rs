//! Medication record persistence for dosealarm.

pub mod document;
pub mod error;
pub mod memory;
pub mod model;
pub mod provider;

/// Load-time normalization report and instant parsing.
pub use document::{CURRENT_SCHEMA_VERSION, LoadIssue, LoadReport, parse_instant};
/// Store error type.
pub use error::StoreError;
/// In-memory store implementation.
pub use memory::MemoryRecordStore;
/// Medication record model.
pub use model::{ALLOWED_PRE_REMINDER_OFFSETS, MedicationRecord};
/// Record store interface and default file implementation.
pub use provider::{FileRecordStore, FileStoreOptions, RecordStore};
