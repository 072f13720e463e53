//! Drives a single image comparison.
//!
//! The orchestrator owns the policy around the comparator: a missing baseline
//! is an automatic pass, decode failures are fatal for that comparison only,
//! the diff percentage is measured over the base image's bounds, and a diff
//! artifact that cannot be written is dropped without failing the result.

use crate::application::ports::{BlobCategory, BlobStore, ImageComparator, ImageDecoder, ImageEncoder};
use crate::domain::{ArtifactWriteError, CompareError, ImageDecodeError, ImageSide};
use image::RgbaImage;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Per-pixel tolerance used when none is configured.
pub const DEFAULT_THRESHOLD: f64 = 0.1;

/// Result of a comparison before anything is persisted.
#[derive(Debug, Clone)]
pub struct Comparison {
    pub is_equal: bool,
    pub diff_percentage: f64,
    pub visual_diff: Option<RgbaImage>,
}

impl Comparison {
    fn identical() -> Self {
        Self {
            is_equal: true,
            diff_percentage: 0.0,
            visual_diff: None,
        }
    }
}

/// Result of a comparison whose diff artifact (if any) has been stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffOutcome {
    pub is_equal: bool,
    pub diff_percentage: f64,
    /// Blob path of the stored visual diff. `None` when equal or when the
    /// artifact could not be written.
    pub diff_artifact: Option<String>,
}

/// Identity under which a diff artifact is stored.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactTarget<'a> {
    pub project_id: &'a str,
    pub snapshot_id: &'a str,
}

/// Share of differing pixels over the base image's area, in `(0, 100]`.
///
/// Only meaningful for an unequal verdict; a zero-area base counts as fully
/// different.
pub fn diff_percentage(differing_pixels: u64, width: u32, height: u32) -> f64 {
    let total = u64::from(width) * u64::from(height);
    if total == 0 {
        return 100.0;
    }
    let pct = differing_pixels as f64 / total as f64 * 100.0;
    pct.clamp(f64::MIN_POSITIVE, 100.0)
}

#[derive(Clone)]
pub struct DiffOrchestrator {
    decoder: Arc<dyn ImageDecoder>,
    comparator: Arc<dyn ImageComparator>,
    encoder: Arc<dyn ImageEncoder>,
    blobs: Arc<dyn BlobStore>,
}

impl DiffOrchestrator {
    pub fn new(
        decoder: Arc<dyn ImageDecoder>,
        comparator: Arc<dyn ImageComparator>,
        encoder: Arc<dyn ImageEncoder>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            decoder,
            comparator,
            encoder,
            blobs,
        }
    }

    /// Compare without persisting anything.
    pub fn compare_images(
        &self,
        base: Option<&[u8]>,
        comparison: &[u8],
        threshold: f64,
    ) -> Result<Comparison, ImageDecodeError> {
        let Some(base) = base else {
            return Ok(Comparison::identical());
        };

        let base_image = self.decode(base, ImageSide::Base)?;
        let comparison_image = self.decode(comparison, ImageSide::Comparison)?;

        let outcome = self
            .comparator
            .compare(&base_image, &comparison_image, threshold, true);

        if outcome.equal {
            return Ok(Comparison::identical());
        }

        Ok(Comparison {
            is_equal: false,
            diff_percentage: diff_percentage(
                outcome.differing_pixels,
                base_image.width(),
                base_image.height(),
            ),
            visual_diff: outcome.visual_diff,
        })
    }

    /// Run `compare_images` on a blocking worker, giving up after `timeout`.
    ///
    /// Nothing is persisted here: a worker that outlives the timeout finishes
    /// in the background and its result is dropped.
    pub async fn compare_with_timeout(
        &self,
        base: Option<Vec<u8>>,
        comparison: Vec<u8>,
        threshold: f64,
        timeout: Duration,
    ) -> Result<Comparison, CompareError> {
        let diff = self.clone();
        let job = tokio::task::spawn_blocking(move || {
            diff.compare_images(base.as_deref(), &comparison, threshold)
        });

        match tokio::time::timeout(timeout, job).await {
            Ok(Ok(result)) => result.map_err(CompareError::from),
            Ok(Err(join_err)) => Err(CompareError::Worker(join_err.to_string())),
            Err(_) => Err(CompareError::Timeout(timeout)),
        }
    }

    /// Compare and store the visual diff under the snapshot's identity.
    pub fn compare(
        &self,
        target: ArtifactTarget<'_>,
        base: Option<&[u8]>,
        comparison: &[u8],
        threshold: f64,
    ) -> Result<DiffOutcome, ImageDecodeError> {
        let result = self.compare_images(base, comparison, threshold)?;
        let diff_artifact = self.store_artifact(target, &result);

        Ok(DiffOutcome {
            is_equal: result.is_equal,
            diff_percentage: result.diff_percentage,
            diff_artifact,
        })
    }

    /// Persist the visual diff of an unequal comparison. Write failures are
    /// logged and yield `None`.
    pub fn store_artifact(&self, target: ArtifactTarget<'_>, result: &Comparison) -> Option<String> {
        let visual = result.visual_diff.as_ref().filter(|_| !result.is_equal)?;
        match self.write_artifact(target, visual) {
            Ok(path) => Some(path),
            Err(err) => {
                log::warn!("{err}; reporting percentage without artifact");
                None
            }
        }
    }

    /// Encode a visual diff with the configured encoder.
    pub fn encode(&self, image: &RgbaImage) -> anyhow::Result<Vec<u8>> {
        self.encoder.encode(image)
    }

    fn decode(&self, bytes: &[u8], side: ImageSide) -> Result<RgbaImage, ImageDecodeError> {
        self.decoder.decode(bytes).map_err(|err| ImageDecodeError {
            side,
            message: err.to_string(),
        })
    }

    fn write_artifact(
        &self,
        target: ArtifactTarget<'_>,
        visual: &RgbaImage,
    ) -> Result<String, ArtifactWriteError> {
        let write_error = |reason: String| ArtifactWriteError {
            snapshot_id: target.snapshot_id.to_string(),
            reason,
        };

        let bytes = self
            .encoder
            .encode(visual)
            .map_err(|err| write_error(err.to_string()))?;
        let filename = format!("{}.{}", target.snapshot_id, self.encoder.extension());
        self.blobs
            .save(target.project_id, BlobCategory::SnapshotDiff, &filename, &bytes)
            .map_err(|err| write_error(err.to_string()))
    }
}
