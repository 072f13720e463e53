//! Whole-tree comparison: reconcile two screenshot directories and diff every
//! matched pair, writing diff images into a mirror of the tree.

use crate::application::diff::DiffOrchestrator;
use crate::application::ingest::ComparisonSettings;
use crate::application::reconcile::{ComparisonPair, PairKind, reconcile_with_diff_dir};
use crate::domain::DirectoryReadError;
use futures::StreamExt;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TreeEntryResult {
    Added,
    Removed,
    Unchanged,
    Changed {
        diff_percentage: f64,
        /// `None` when the diff image could not be written.
        diff_path: Option<PathBuf>,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct TreeEntry {
    #[serde(flatten)]
    pub pair: ComparisonPair,
    #[serde(flatten)]
    pub result: TreeEntryResult,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TreeSummary {
    pub added: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub changed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TreeReport {
    pub summary: TreeSummary,
    pub entries: Vec<TreeEntry>,
}

impl TreeReport {
    fn from_entries(entries: Vec<TreeEntry>) -> Self {
        let mut summary = TreeSummary::default();
        for entry in &entries {
            match entry.result {
                TreeEntryResult::Added => summary.added += 1,
                TreeEntryResult::Removed => summary.removed += 1,
                TreeEntryResult::Unchanged => summary.unchanged += 1,
                TreeEntryResult::Changed { .. } => summary.changed += 1,
                TreeEntryResult::Failed { .. } => summary.failed += 1,
            }
        }
        Self { summary, entries }
    }
}

/// Compare `feature` against `base`. Only an unreadable directory aborts;
/// per-file problems, timeouts included, are reported as `Failed` entries.
/// Entries keep the reconciliation order.
pub async fn compare_trees(
    diff: &DiffOrchestrator,
    base: &Path,
    feature: &Path,
    diff_dir: &Path,
    settings: &ComparisonSettings,
) -> Result<TreeReport, DirectoryReadError> {
    let pairs = reconcile_with_diff_dir(base, feature, diff_dir)?;

    let entries: Vec<TreeEntry> = futures::stream::iter(pairs)
        .map(|pair| async move {
            let result = match pair.kind() {
                PairKind::Added => TreeEntryResult::Added,
                PairKind::Removed => TreeEntryResult::Removed,
                PairKind::Matched => compare_pair(diff, &pair, settings).await,
            };
            TreeEntry { pair, result }
        })
        .buffered(settings.max_concurrency.max(1))
        .collect()
        .await;

    let report = TreeReport::from_entries(entries);
    log::info!(
        "Compared {} against {}: {} changed, {} unchanged, {} added, {} removed, {} failed",
        feature.display(),
        base.display(),
        report.summary.changed,
        report.summary.unchanged,
        report.summary.added,
        report.summary.removed,
        report.summary.failed
    );
    Ok(report)
}

async fn compare_pair(
    diff: &DiffOrchestrator,
    pair: &ComparisonPair,
    settings: &ComparisonSettings,
) -> TreeEntryResult {
    let failed = |reason: String| TreeEntryResult::Failed { reason };
    let (Some(base_path), Some(feature_path)) = (&pair.base, &pair.feature) else {
        return failed("pair is missing a side".into());
    };

    let base_bytes = match tokio::fs::read(base_path).await {
        Ok(bytes) => bytes,
        Err(err) => return failed(format!("failed to read {}: {err}", base_path.display())),
    };
    let feature_bytes = match tokio::fs::read(feature_path).await {
        Ok(bytes) => bytes,
        Err(err) => return failed(format!("failed to read {}: {err}", feature_path.display())),
    };

    let comparison = match diff
        .compare_with_timeout(
            Some(base_bytes),
            feature_bytes,
            settings.threshold,
            settings.timeout,
        )
        .await
    {
        Ok(comparison) => comparison,
        Err(err) => return failed(err.to_string()),
    };

    if comparison.is_equal {
        return TreeEntryResult::Unchanged;
    }

    let diff_path = match (&pair.diff, comparison.visual_diff) {
        (Some(target), Some(visual)) => match write_diff(diff, target, &visual).await {
            Ok(()) => Some(target.clone()),
            Err(err) => {
                log::warn!("Failed to write diff image {}: {err:#}", target.display());
                None
            }
        },
        _ => None,
    };

    TreeEntryResult::Changed {
        diff_percentage: comparison.diff_percentage,
        diff_path,
    }
}

async fn write_diff(
    diff: &DiffOrchestrator,
    target: &Path,
    visual: &image::RgbaImage,
) -> anyhow::Result<()> {
    let bytes = diff.encode(visual)?;
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(target, bytes).await?;
    Ok(())
}
