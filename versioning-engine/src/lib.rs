//! Project Versioning Engine
//!
//! Snapshots a project directory into an integrity-checked ZIP archive,
//! keeps a bounded, ordered per-project history and restores any prior
//! snapshot without ever destroying the only good copy of the data.

pub mod archive;
pub mod config;
pub mod engine;
pub mod error;
pub mod integrity;
pub mod logger;
pub mod store;
pub mod walker;

// Re-export commonly used types
pub use config::Config;
pub use engine::{BulkReport, RestorePhase, SnapshotOptions, VersioningEngine};
pub use error::{EngineError, ErrorKind};
pub use store::SnapshotRecord;
pub type Result<T> = std::result::Result<T, EngineError>;
