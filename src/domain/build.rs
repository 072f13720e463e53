use super::project::ProjectId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for a build
pub type BuildId = String;

/// Lifecycle of a build (one CI run).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BuildStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Terminal states never change again. Re-applying the current status is allowed.
    pub fn can_transition_to(self, next: BuildStatus) -> bool {
        if self == next {
            return true;
        }
        match self {
            Self::Pending => true,
            Self::Processing => next.is_terminal(),
            Self::Completed | Self::Failed => false,
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for BuildStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown build status: {other}")),
        }
    }
}

/// Aggregate counters derived from a build's snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BuildStats {
    pub total_snapshots: u32,
    pub changed_snapshots: u32,
    pub approved_snapshots: u32,
}

/// A collection of snapshots from a single CI run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    pub id: BuildId,
    pub project_id: ProjectId,
    /// Per-project sequence number, starting at 1.
    pub build_number: u32,
    pub branch: String,
    #[serde(default)]
    pub commit_sha: Option<String>,
    #[serde(default)]
    pub commit_message: Option<String>,
    #[serde(default)]
    pub pull_request_number: Option<u32>,
    pub status: BuildStatus,
    /// Cached counters, refreshed by `update_stats`.
    #[serde(flatten)]
    pub stats: BuildStats,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub finished_at: Option<String>,
}

/// Input for creating a build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewBuild {
    pub project_id: ProjectId,
    pub branch: String,
    #[serde(default)]
    pub commit_sha: Option<String>,
    #[serde(default)]
    pub commit_message: Option<String>,
    #[serde(default)]
    pub pull_request_number: Option<u32>,
}
