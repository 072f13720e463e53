//! Domain error types for diffit.
//!
//! Errors here describe failures of the reconciliation engine itself. Some of
//! them are fatal to a whole operation (a directory tree that cannot be
//! listed), others only to a single item in a batch (an image that cannot be
//! decoded) and a few are purely informational and get logged instead of
//! propagated.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use super::snapshot::ReviewStatus;

/// A directory in a reconciled tree could not be listed.
#[derive(Debug, Error)]
#[error("Failed to read directory {}: {source}", path.display())]
pub struct DirectoryReadError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Which input of a comparison an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSide {
    Base,
    Comparison,
}

impl std::fmt::Display for ImageSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Base => write!(f, "base"),
            Self::Comparison => write!(f, "comparison"),
        }
    }
}

/// One of the two images of a comparison could not be decoded.
#[derive(Debug, Error)]
#[error("Failed to decode {side} image: {message}")]
pub struct ImageDecodeError {
    pub side: ImageSide,
    pub message: String,
}

/// A baseline query failed. The resolver degrades this to "no baseline".
#[derive(Debug, Error)]
#[error("Baseline lookup failed for '{name}' on branch '{branch}': {source}")]
pub struct BaselineLookupError {
    pub name: String,
    pub branch: String,
    #[source]
    pub source: anyhow::Error,
}

/// A diff artifact could not be persisted. The comparison result survives.
#[derive(Debug, Error)]
#[error("Failed to write diff artifact for snapshot {snapshot_id}: {reason}")]
pub struct ArtifactWriteError {
    pub snapshot_id: String,
    pub reason: String,
}

/// An approved snapshot could not be turned into a baseline.
#[derive(Debug, Error)]
pub enum BaselinePromotionError {
    #[error("Snapshot {0} has no comparison image to promote")]
    MissingComparisonImage(String),

    #[error("Build {0} owning the snapshot was not found")]
    BuildNotFound(String),

    #[error("Failed to copy image for snapshot {snapshot_id}: {source}")]
    ImageCopy {
        snapshot_id: String,
        #[source]
        source: StorageError,
    },

    #[error("Failed to persist baseline: {0}")]
    Persistence(#[from] anyhow::Error),
}

/// Errors raised by a `BlobStore`.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Invalid blob path: {0}")]
    InvalidPath(String),

    #[error("Storage I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from a single comparison run by the orchestrator.
#[derive(Debug, Error)]
pub enum CompareError {
    #[error(transparent)]
    Decode(#[from] ImageDecodeError),

    #[error("Comparison timed out after {0:?}")]
    Timeout(Duration),

    #[error("Comparison worker failed: {0}")]
    Worker(String),
}

/// Domain errors related to project operations.
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("Project not found: {0}")]
    NotFound(String),

    #[error("Invalid project: {0}")]
    Invalid(String),

    #[error("Project operation failed: {0}")]
    OperationFailed(#[from] anyhow::Error),
}

/// Domain errors related to build operations.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Build not found: {0}")]
    NotFound(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Invalid build: {0}")]
    Invalid(String),

    #[error("Invalid build status transition from {current} to {next}")]
    InvalidStatusTransition { current: String, next: String },

    #[error("Build operation failed: {0}")]
    OperationFailed(#[from] anyhow::Error),
}

/// Domain errors related to snapshot ingestion.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Snapshot not found: {0}")]
    NotFound(String),

    #[error("Build not found: {0}")]
    BuildNotFound(String),

    #[error("Invalid snapshot: {0}")]
    Invalid(String),

    #[error("Snapshot storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Snapshot operation failed: {0}")]
    OperationFailed(#[from] anyhow::Error),
}

/// Domain errors related to review operations.
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("Snapshot not found: {0}")]
    NotFound(String),

    #[error("Reviewer identity is required")]
    MissingReviewer,

    #[error("Cannot set review status to {0}")]
    InvalidDecision(ReviewStatus),

    #[error(transparent)]
    Promotion(#[from] BaselinePromotionError),

    #[error("Review operation failed: {0}")]
    OperationFailed(#[from] anyhow::Error),
}

/// Domain errors related to baseline management.
#[derive(Debug, Error)]
pub enum BaselineError {
    #[error("Baseline not found: {0}")]
    NotFound(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Invalid baseline: {0}")]
    Invalid(String),

    #[error("Baseline storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Baseline operation failed: {0}")]
    OperationFailed(#[from] anyhow::Error),
}

/// Unified domain error type for the CLI and other front-ends.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryReadError),

    #[error("Project error: {0}")]
    Project(#[from] ProjectError),

    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Review error: {0}")]
    Review(#[from] ReviewError),

    #[error("Baseline error: {0}")]
    Baseline(#[from] BaselineError),

    #[error("Unknown domain error: {0}")]
    Unknown(String),
}

impl From<String> for DomainError {
    fn from(s: String) -> Self {
        DomainError::Unknown(s)
    }
}

impl From<&str> for DomainError {
    fn from(s: &str) -> Self {
        DomainError::Unknown(s.to_string())
    }
}
