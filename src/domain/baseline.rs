use super::project::ProjectId;
use super::snapshot::SnapshotId;
use serde::{Deserialize, Serialize};

/// Unique identifier for a baseline
pub type BaselineId = String;

/// Identifies a logical screenshot across builds.
///
/// `browser` and `viewport` are discriminators: `None` only matches `None`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariantKey {
    pub project_id: ProjectId,
    pub name: String,
    pub branch: String,
    #[serde(default)]
    pub browser: Option<String>,
    #[serde(default)]
    pub viewport: Option<String>,
}

impl VariantKey {
    pub fn new(
        project_id: impl Into<ProjectId>,
        name: impl Into<String>,
        branch: impl Into<String>,
        browser: Option<String>,
        viewport: Option<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            name: name.into(),
            branch: branch.into(),
            browser,
            viewport,
        }
    }

    /// Same key on another branch.
    pub fn on_branch(&self, branch: &str) -> Self {
        Self {
            branch: branch.to_string(),
            ..self.clone()
        }
    }
}

/// The accepted reference image for a variant key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baseline {
    pub id: BaselineId,
    #[serde(flatten)]
    pub key: VariantKey,
    pub image_path: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    /// Snapshot that most recently promoted this baseline.
    #[serde(default)]
    pub source_snapshot_id: Option<SnapshotId>,
    pub created_at: String,
    pub updated_at: String,
}

/// Values written by a baseline upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineUpsert {
    pub key: VariantKey,
    pub image_path: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub source_snapshot_id: Option<SnapshotId>,
}
