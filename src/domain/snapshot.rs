//! Snapshot domain types: one captured image within a build.

use super::baseline::BaselineId;
use super::build::BuildId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for a snapshot
pub type SnapshotId = String;

/// Image processing status of a snapshot, independent of its review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for SnapshotStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown snapshot status: {other}")),
        }
    }
}

/// Human review state of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    #[default]
    Unreviewed,
    Approved,
    Rejected,
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreviewed => write!(f, "unreviewed"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

impl FromStr for ReviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unreviewed" => Ok(Self::Unreviewed),
            "approved" | "approve" => Ok(Self::Approved),
            "rejected" | "reject" => Ok(Self::Rejected),
            other => Err(format!("unknown review status: {other}")),
        }
    }
}

/// A single screenshot comparison within a build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub build_id: BuildId,
    /// Baseline this snapshot was compared against, if any.
    #[serde(default)]
    pub baseline_id: Option<BaselineId>,
    pub name: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub browser: Option<String>,
    #[serde(default)]
    pub viewport: Option<String>,
    #[serde(default)]
    pub base_image_path: Option<String>,
    #[serde(default)]
    pub comparison_image_path: Option<String>,
    /// Present only when the comparison found a difference.
    #[serde(default)]
    pub diff_image_path: Option<String>,
    #[serde(default)]
    pub diff_percentage: Option<f64>,
    pub status: SnapshotStatus,
    pub review_status: ReviewStatus,
    #[serde(default)]
    pub reviewed_by: Option<String>,
    #[serde(default)]
    pub reviewed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Snapshot {
    /// Snapshots without a baseline or with a non-zero diff need a human look.
    pub fn is_changed(&self) -> bool {
        self.baseline_id.is_none() || self.diff_percentage.is_some_and(|p| p > 0.0)
    }
}

/// Upload metadata for a new snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSnapshot {
    pub name: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub browser: Option<String>,
    #[serde(default)]
    pub viewport: Option<String>,
}

/// Result of processing a snapshot image, persisted in one update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotImages {
    pub baseline_id: Option<BaselineId>,
    pub base_image_path: Option<String>,
    pub comparison_image_path: Option<String>,
    pub diff_image_path: Option<String>,
    pub diff_percentage: Option<f64>,
}

/// A reviewer's verdict on one or more snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub status: ReviewStatus,
    pub reviewed_by: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_review_status_display_parse() {
        assert_eq!(ReviewStatus::Approved.to_string(), "approved");
        assert_eq!(
            ReviewStatus::from_str("REJECTED").unwrap(),
            ReviewStatus::Rejected
        );
        assert!(ReviewStatus::from_str("maybe").is_err());
    }

    #[test]
    fn test_snapshot_status_round_trip_through_text() {
        for status in [
            SnapshotStatus::Pending,
            SnapshotStatus::Processing,
            SnapshotStatus::Completed,
            SnapshotStatus::Failed,
        ] {
            assert_eq!(SnapshotStatus::from_str(&status.to_string()), Ok(status));
        }
    }
}
