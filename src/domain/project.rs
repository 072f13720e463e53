use serde::{Deserialize, Serialize};

/// Unique identifier for a project
pub type ProjectId = String;

/// Branch used when a project is created without one.
pub const DEFAULT_BRANCH: &str = "main";

/// A visual testing project. Owns builds and baselines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    /// URL-friendly unique handle.
    pub slug: String,
    #[serde(default)]
    pub repository_url: Option<String>,
    /// Branch the baseline resolver falls back to.
    pub default_branch: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Input for creating a project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewProject {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub repository_url: Option<String>,
    #[serde(default)]
    pub default_branch: Option<String>,
}

/// Partial update of a project's mutable fields. `None` keeps the current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub repository_url: Option<String>,
    #[serde(default)]
    pub default_branch: Option<String>,
}
