//! Custom error types for the versioning engine.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Snapshot not found: {project}/{snapshot_id}")]
    SnapshotNotFound { project: String, snapshot_id: String },

    #[error("Invalid project name: {0:?}")]
    InvalidProjectName(String),

    #[error("Invalid snapshot id: {0:?}")]
    InvalidSnapshotId(String),

    #[error("Checksum mismatch for {}: expected {expected}, got {actual}", archive.display())]
    ChecksumMismatch {
        archive: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Missing checksum sidecar for {}", archive.display())]
    MissingSidecar { archive: PathBuf },

    #[error("Archive file missing: {}", archive.display())]
    MissingArchive { archive: PathBuf },

    #[error("Archive entry escapes extraction root: {0:?}")]
    UnsafeEntryPath(String),

    #[error("Empty archive produced for project {0}")]
    EmptyArchive(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Coarse classification used by bulk drivers to aggregate per-project
/// failures without inspecting every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Corruption,
    Io,
    Cancelled,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::ProjectNotFound(_) | EngineError::SnapshotNotFound { .. } => {
                ErrorKind::NotFound
            }
            EngineError::InvalidProjectName(_) | EngineError::InvalidSnapshotId(_) => {
                ErrorKind::Validation
            }
            EngineError::ChecksumMismatch { .. }
            | EngineError::MissingSidecar { .. }
            | EngineError::MissingArchive { .. } => ErrorKind::Corruption,
            EngineError::UnsafeEntryPath(_)
            | EngineError::EmptyArchive(_)
            | EngineError::Io(_)
            | EngineError::Zip(_)
            | EngineError::Metadata(_) => ErrorKind::Io,
            EngineError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            EngineError::ProjectNotFound("demo".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            EngineError::InvalidProjectName("../evil".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            EngineError::MissingSidecar {
                archive: PathBuf::from("demo_20250101_000000.zip")
            }
            .kind(),
            ErrorKind::Corruption
        );
        assert_eq!(
            EngineError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")).kind(),
            ErrorKind::Io
        );
        assert_eq!(EngineError::Cancelled.kind(), ErrorKind::Cancelled);
    }
}
