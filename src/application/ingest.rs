//! Snapshot upload pipeline.
//!
//! Each upload becomes a snapshot row, its image is stored, a baseline is
//! resolved and the comparison runs on a blocking worker under a timeout.
//! Batches run with bounded concurrency and one failing upload never affects
//! the others.

use crate::application::diff::{ArtifactTarget, Comparison, DiffOrchestrator};
use crate::application::ports::{BlobCategory, BlobStore};
use crate::application::resolver::BaselineResolver;
use crate::domain::{
    Baseline, Build, CompareError, NewSnapshot, Project, Snapshot, SnapshotError, SnapshotImages,
    SnapshotStatus, StorageError,
};
use crate::infra::db::Database;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

/// Knobs for running comparisons.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComparisonSettings {
    pub threshold: f64,
    pub timeout: Duration,
    pub max_concurrency: usize,
}

impl Default for ComparisonSettings {
    fn default() -> Self {
        Self {
            threshold: crate::application::diff::DEFAULT_THRESHOLD,
            timeout: Duration::from_secs(30),
            max_concurrency: 4,
        }
    }
}

/// Snapshot metadata plus the captured image, if one was sent.
#[derive(Debug, Clone, Default)]
pub struct SnapshotUpload {
    pub snapshot: NewSnapshot,
    pub image: Option<Vec<u8>>,
}

#[derive(Clone)]
pub struct SnapshotProcessor {
    db: Database,
    blobs: Arc<dyn BlobStore>,
    diff: DiffOrchestrator,
    settings: ComparisonSettings,
}

/// Build and project an upload belongs to.
#[derive(Clone)]
struct UploadContext {
    build: Build,
    project: Project,
}

/// A stored upload whose comparison has not run yet.
struct PendingComparison {
    snapshot: Snapshot,
    images: SnapshotImages,
    baseline: Option<Vec<u8>>,
    image: Vec<u8>,
}

enum Prepared {
    /// Nothing to compare; the snapshot is final as stored.
    Done(Snapshot),
    Compare(PendingComparison),
}

impl SnapshotProcessor {
    pub fn new(
        db: Database,
        blobs: Arc<dyn BlobStore>,
        diff: DiffOrchestrator,
        settings: ComparisonSettings,
    ) -> Self {
        Self {
            db,
            blobs,
            diff,
            settings,
        }
    }

    /// Ingest one upload and refresh the build's counters.
    pub async fn ingest(
        &self,
        build_id: &str,
        upload: SnapshotUpload,
    ) -> Result<Snapshot, SnapshotError> {
        let context = self.context(build_id).await?;
        let snapshot = self.process(&context, upload).await?;
        self.refresh_stats(build_id).await?;
        Ok(snapshot)
    }

    /// Ingest many uploads. Results come back in input order.
    pub async fn ingest_batch(
        &self,
        build_id: &str,
        uploads: Vec<SnapshotUpload>,
    ) -> Result<Vec<Result<Snapshot, SnapshotError>>, SnapshotError> {
        let context = self.context(build_id).await?;
        let context = &context;
        let total = uploads.len();

        let mut results: Vec<(usize, Result<Snapshot, SnapshotError>)> =
            futures::stream::iter(uploads.into_iter().enumerate())
                .map(|(index, upload)| async move { (index, self.process(context, upload).await) })
                .buffer_unordered(self.settings.max_concurrency.max(1))
                .collect()
                .await;
        results.sort_by_key(|(index, _)| *index);

        self.refresh_stats(build_id).await?;

        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        log::info!("Ingested {} snapshots into build {build_id} ({failed} failed)", total);
        Ok(results.into_iter().map(|(_, result)| result).collect())
    }

    /// Run synchronous SQLite and filesystem work on the blocking pool.
    async fn blocking<T, F>(&self, work: F) -> Result<T, SnapshotError>
    where
        T: Send + 'static,
        F: FnOnce(&SnapshotProcessor) -> Result<T, SnapshotError> + Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || work(&this))
            .await
            .map_err(|err| SnapshotError::OperationFailed(anyhow::anyhow!("snapshot worker failed: {err}")))?
    }

    async fn context(&self, build_id: &str) -> Result<UploadContext, SnapshotError> {
        let build_id = build_id.to_string();
        self.blocking(move |this| {
            let build = this
                .db
                .build_repo()
                .find_by_id(&build_id)?
                .ok_or_else(|| SnapshotError::BuildNotFound(build_id.clone()))?;
            let project = this
                .db
                .project_repo()
                .find_by_id(&build.project_id)?
                .ok_or_else(|| SnapshotError::Invalid(format!("build {build_id} has no project")))?;
            Ok(UploadContext { build, project })
        })
        .await
    }

    async fn refresh_stats(&self, build_id: &str) -> Result<(), SnapshotError> {
        let build_id = build_id.to_string();
        self.blocking(move |this| {
            this.db.build_repo().update_stats(&build_id)?;
            Ok(())
        })
        .await
    }

    async fn process(
        &self,
        context: &UploadContext,
        upload: SnapshotUpload,
    ) -> Result<Snapshot, SnapshotError> {
        if upload.snapshot.name.trim().is_empty() {
            return Err(SnapshotError::Invalid("snapshot name is required".into()));
        }

        let prepared = {
            let context = context.clone();
            self.blocking(move |this| this.prepare(&context, upload)).await?
        };
        let pending = match prepared {
            Prepared::Done(snapshot) => return Ok(snapshot),
            Prepared::Compare(pending) => pending,
        };

        let PendingComparison {
            snapshot,
            images,
            baseline,
            image,
        } = pending;
        let result = self
            .diff
            .compare_with_timeout(baseline, image, self.settings.threshold, self.settings.timeout)
            .await;

        // Only a comparison that finished in time gets to write an artifact.
        let project_id = context.project.id.clone();
        self.blocking(move |this| this.finish(&project_id, snapshot, images, result))
            .await
    }

    /// Create the row, store the image and pick the baseline to compare with.
    fn prepare(&self, context: &UploadContext, upload: SnapshotUpload) -> Result<Prepared, SnapshotError> {
        let repo = self.db.snapshot_repo();
        let snapshot = repo.create(&context.build.id, &upload.snapshot)?;

        let Some(image) = upload.image else {
            return Ok(Prepared::Done(snapshot));
        };

        let filename = format!("{}.png", snapshot.id);
        let comparison_path = match self.blobs.save(
            &context.project.id,
            BlobCategory::SnapshotComparison,
            &filename,
            &image,
        ) {
            Ok(path) => path,
            Err(err) => {
                repo.update_status(&snapshot.id, SnapshotStatus::Failed)?;
                return Err(err.into());
            }
        };
        repo.update_status(&snapshot.id, SnapshotStatus::Processing)?;

        let baseline = BaselineResolver::new(&self.db.baseline_repo()).resolve(
            &context.project,
            &snapshot.name,
            &context.build.branch,
            snapshot.browser.as_deref(),
            snapshot.viewport.as_deref(),
        );
        let baseline_bytes = baseline.as_ref().and_then(|b| self.load_baseline(b));
        // A baseline whose image is gone counts as no baseline.
        let baseline = baseline.filter(|_| baseline_bytes.is_some());

        let images = SnapshotImages {
            baseline_id: baseline.as_ref().map(|b| b.id.clone()),
            base_image_path: baseline.as_ref().map(|b| b.image_path.clone()),
            comparison_image_path: Some(comparison_path),
            ..SnapshotImages::default()
        };

        Ok(Prepared::Compare(PendingComparison {
            snapshot,
            images,
            baseline: baseline_bytes,
            image,
        }))
    }

    /// Store the artifact of a completed comparison and record the outcome.
    fn finish(
        &self,
        project_id: &str,
        snapshot: Snapshot,
        mut images: SnapshotImages,
        result: Result<Comparison, CompareError>,
    ) -> Result<Snapshot, SnapshotError> {
        let status = match result {
            Ok(comparison) => {
                let target = ArtifactTarget {
                    project_id,
                    snapshot_id: &snapshot.id,
                };
                images.diff_image_path = self.diff.store_artifact(target, &comparison);
                images.diff_percentage = Some(comparison.diff_percentage);
                SnapshotStatus::Completed
            }
            Err(err) => {
                log::warn!("Comparison failed for snapshot {} ({}): {err}", snapshot.id, snapshot.name);
                SnapshotStatus::Failed
            }
        };

        let repo = self.db.snapshot_repo();
        repo.update_images(&snapshot.id, &images, status)?;
        repo.find_by_id(&snapshot.id)?
            .ok_or_else(|| SnapshotError::NotFound(snapshot.id.clone()))
    }

    fn load_baseline(&self, baseline: &Baseline) -> Option<Vec<u8>> {
        match self.blobs.get(&baseline.image_path) {
            Ok(bytes) => Some(bytes),
            Err(StorageError::NotFound(path)) => {
                log::warn!("Baseline {} image {path} is missing", baseline.id);
                None
            }
            Err(err) => {
                log::warn!("Failed to read baseline {} image: {err}", baseline.id);
                None
            }
        }
    }
}
