//! Review decisions and baseline promotion.
//!
//! Approving a snapshot copies its comparison image into the baseline store and
//! upserts the baseline for the snapshot's variant key on the build's branch.
//! Promotion happens before the review is recorded, so a failed promotion
//! leaves the snapshot untouched.

use crate::application::ports::{BlobCategory, BlobStore};
use crate::domain::{
    Baseline, BaselinePromotionError, BaselineUpsert, ReviewDecision, ReviewError, ReviewStatus,
    Snapshot, SnapshotId, VariantKey,
};
use crate::infra::db::Database;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Result of reviewing one snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewOutcome {
    pub snapshot: Snapshot,
    /// Baseline written by an approval.
    pub promoted: Option<Baseline>,
}

/// An item of a batch review that was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedReview {
    pub snapshot_id: SnapshotId,
    pub reason: String,
}

/// Per-item results of a batch review.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReviewReport {
    pub reviewed: Vec<SnapshotId>,
    pub promoted: Vec<Baseline>,
    pub skipped: Vec<SkippedReview>,
}

#[derive(Clone)]
pub struct ReviewStateMachine {
    db: Database,
    blobs: Arc<dyn BlobStore>,
}

impl ReviewStateMachine {
    pub fn new(db: Database, blobs: Arc<dyn BlobStore>) -> Self {
        Self { db, blobs }
    }

    /// Apply `decision` to one snapshot and refresh its build's counters.
    pub fn review(
        &self,
        snapshot_id: &str,
        decision: &ReviewDecision,
    ) -> Result<ReviewOutcome, ReviewError> {
        Self::validate(decision)?;
        let outcome = self.apply(snapshot_id, decision)?;
        self.refresh_stats(&outcome.snapshot.build_id);
        Ok(outcome)
    }

    /// Apply `decision` to every snapshot independently. Failures are reported
    /// per item and never stop the rest of the batch.
    pub fn batch_review(
        &self,
        snapshot_ids: &[SnapshotId],
        decision: &ReviewDecision,
    ) -> Result<BatchReviewReport, ReviewError> {
        Self::validate(decision)?;

        let mut report = BatchReviewReport::default();
        let mut touched_builds = BTreeSet::new();

        for snapshot_id in snapshot_ids {
            match self.apply(snapshot_id, decision) {
                Ok(outcome) => {
                    touched_builds.insert(outcome.snapshot.build_id.clone());
                    report.reviewed.push(outcome.snapshot.id);
                    report.promoted.extend(outcome.promoted);
                }
                Err(err) => {
                    log::warn!("Skipping snapshot {snapshot_id} in batch review: {err}");
                    report.skipped.push(SkippedReview {
                        snapshot_id: snapshot_id.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        for build_id in &touched_builds {
            self.refresh_stats(build_id);
        }

        log::info!(
            "Batch review by {}: {} reviewed, {} promoted, {} skipped",
            decision.reviewed_by,
            report.reviewed.len(),
            report.promoted.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    fn validate(decision: &ReviewDecision) -> Result<(), ReviewError> {
        if decision.reviewed_by.trim().is_empty() {
            return Err(ReviewError::MissingReviewer);
        }
        if decision.status == ReviewStatus::Unreviewed {
            return Err(ReviewError::InvalidDecision(decision.status));
        }
        Ok(())
    }

    fn apply(&self, snapshot_id: &str, decision: &ReviewDecision) -> Result<ReviewOutcome, ReviewError> {
        let repo = self.db.snapshot_repo();
        let snapshot = repo
            .find_by_id(snapshot_id)?
            .ok_or_else(|| ReviewError::NotFound(snapshot_id.to_string()))?;

        let promoted = match decision.status {
            ReviewStatus::Approved => Some(self.promote(&snapshot)?),
            _ => None,
        };

        repo.update_review(snapshot_id, decision)?;
        let snapshot = repo
            .find_by_id(snapshot_id)?
            .ok_or_else(|| ReviewError::NotFound(snapshot_id.to_string()))?;

        log::debug!(
            "Snapshot {} marked {} by {}",
            snapshot.id,
            decision.status,
            decision.reviewed_by
        );
        Ok(ReviewOutcome { snapshot, promoted })
    }

    /// Make the snapshot's comparison image the baseline for its variant key.
    fn promote(&self, snapshot: &Snapshot) -> Result<Baseline, BaselinePromotionError> {
        let comparison_path = snapshot
            .comparison_image_path
            .as_deref()
            .ok_or_else(|| BaselinePromotionError::MissingComparisonImage(snapshot.id.clone()))?;

        let build = self
            .db
            .build_repo()
            .find_by_id(&snapshot.build_id)?
            .ok_or_else(|| BaselinePromotionError::BuildNotFound(snapshot.build_id.clone()))?;

        let filename = format!("{}.png", snapshot.id);
        let image_path = self
            .blobs
            .copy(comparison_path, &build.project_id, BlobCategory::Baseline, &filename)
            .map_err(|source| BaselinePromotionError::ImageCopy {
                snapshot_id: snapshot.id.clone(),
                source,
            })?;

        let upsert = BaselineUpsert {
            key: VariantKey::new(
                build.project_id,
                snapshot.name.clone(),
                build.branch,
                snapshot.browser.clone(),
                snapshot.viewport.clone(),
            ),
            image_path,
            width: snapshot.width,
            height: snapshot.height,
            source_snapshot_id: Some(snapshot.id.clone()),
        };
        let (baseline, replaced) = self.db.baseline_repo().upsert(&upsert)?;

        if let Some(old) = replaced
            && let Err(err) = self.blobs.delete(&old)
        {
            log::warn!("Failed to remove replaced baseline image {old}: {err}");
        }

        log::info!(
            "Promoted snapshot {} to baseline '{}' on '{}'",
            snapshot.id,
            baseline.key.name,
            baseline.key.branch
        );
        Ok(baseline)
    }

    fn refresh_stats(&self, build_id: &str) {
        if let Err(err) = self.db.build_repo().update_stats(build_id) {
            log::warn!("Failed to update stats for build {build_id}: {err}");
        }
    }
}
