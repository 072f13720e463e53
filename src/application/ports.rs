//! Collaborator contracts consumed by the reconciliation engine.
//!
//! The engine never touches the filesystem or a pixel buffer format directly;
//! everything goes through these traits so implementations can be swapped
//! (and faked in tests).

use crate::domain::{Baseline, StorageError, VariantKey};
use image::RgbaImage;
use std::fmt;

/// Decodes raw bytes into an RGBA raster.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<RgbaImage, DecodeError>;
}

/// Encodes a raster into a lossless format for diff artifacts.
pub trait ImageEncoder: Send + Sync {
    fn encode(&self, image: &RgbaImage) -> anyhow::Result<Vec<u8>>;

    /// File extension (without dot) for encoded output.
    fn extension(&self) -> &'static str {
        "png"
    }
}

/// Outcome reported by an `ImageComparator`.
#[derive(Debug, Clone)]
pub struct ComparatorOutcome {
    pub equal: bool,
    pub differing_pixels: u64,
    pub visual_diff: Option<RgbaImage>,
}

/// Pixel comparison service. `threshold` is a per-pixel tolerance in `[0, 1]`
/// and its meaning belongs to the implementation.
pub trait ImageComparator: Send + Sync {
    fn compare(
        &self,
        base: &RgbaImage,
        comparison: &RgbaImage,
        threshold: f64,
        with_visual_diff: bool,
    ) -> ComparatorOutcome;
}

/// Storage category of a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobCategory {
    Baseline,
    SnapshotComparison,
    SnapshotDiff,
}

impl BlobCategory {
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Baseline => "baselines",
            Self::SnapshotComparison => "comparisons",
            Self::SnapshotDiff => "diffs",
        }
    }
}

impl fmt::Display for BlobCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Baseline => write!(f, "baseline"),
            Self::SnapshotComparison => write!(f, "snapshot-comparison"),
            Self::SnapshotDiff => write!(f, "snapshot-diff"),
        }
    }
}

/// Path-addressable byte storage keyed by `(project, category, filename)`.
///
/// `save` and `copy` return an opaque relative path used by `get`/`delete`.
pub trait BlobStore: Send + Sync {
    fn save(
        &self,
        project_id: &str,
        category: BlobCategory,
        filename: &str,
        bytes: &[u8],
    ) -> Result<String, StorageError>;

    fn get(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    /// Deleting a missing blob succeeds.
    fn delete(&self, path: &str) -> Result<(), StorageError>;

    fn copy(
        &self,
        path: &str,
        project_id: &str,
        category: BlobCategory,
        filename: &str,
    ) -> Result<String, StorageError> {
        let bytes = self.get(path)?;
        self.save(project_id, category, filename, &bytes)
    }

    fn delete_project(&self, project_id: &str) -> Result<(), StorageError>;
}

/// Exact-key baseline lookup used by the resolver.
pub trait BaselineLookup {
    fn find_by_key(&self, key: &VariantKey) -> anyhow::Result<Option<Baseline>>;
}

/// Decoder failure with a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError(pub String);

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for DecodeError {}
