//! Project, build, snapshot and baseline management.
//!
//! Thin policy layer over the repositories: existence checks, build status
//! rules, cascading removal of stored images and direct baseline uploads.

use crate::application::ports::{BlobCategory, BlobStore, ImageDecoder};
use crate::domain::{
    Baseline, BaselineError, BaselineUpsert, Build, BuildError, BuildStatus, NewBuild,
    NewProject, Page, Pagination, Project, ProjectError, ProjectUpdate, Snapshot, SnapshotError,
    VariantKey,
};
use crate::infra::db::{Database, SnapshotFilter};
use std::sync::Arc;

#[derive(Clone)]
pub struct Catalog {
    db: Database,
    blobs: Arc<dyn BlobStore>,
    decoder: Arc<dyn ImageDecoder>,
    default_branch: String,
}

fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

impl Catalog {
    pub fn new(
        db: Database,
        blobs: Arc<dyn BlobStore>,
        decoder: Arc<dyn ImageDecoder>,
        default_branch: impl Into<String>,
    ) -> Self {
        Self {
            db,
            blobs,
            decoder,
            default_branch: default_branch.into(),
        }
    }

    // ---- projects ----

    pub fn create_project(&self, input: NewProject) -> Result<Project, ProjectError> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(ProjectError::Invalid("name is required".into()));
        }
        if !is_valid_slug(&input.slug) {
            return Err(ProjectError::Invalid(format!(
                "slug '{}' must be lowercase letters, digits and dashes",
                input.slug
            )));
        }

        let repo = self.db.project_repo();
        if repo.slug_exists(&input.slug)? {
            return Err(ProjectError::Invalid(format!(
                "slug '{}' is already taken",
                input.slug
            )));
        }

        let input = NewProject {
            name: name.to_string(),
            default_branch: input
                .default_branch
                .filter(|b| !b.trim().is_empty())
                .or_else(|| Some(self.default_branch.clone())),
            ..input
        };
        let project = repo.create(&input)?;
        log::info!("Created project {} ({})", project.slug, project.id);
        Ok(project)
    }

    pub fn project(&self, id: &str) -> Result<Project, ProjectError> {
        self.db
            .project_repo()
            .find_by_id(id)?
            .ok_or_else(|| ProjectError::NotFound(id.to_string()))
    }

    pub fn project_by_slug(&self, slug: &str) -> Result<Project, ProjectError> {
        self.db
            .project_repo()
            .find_by_slug(slug)?
            .ok_or_else(|| ProjectError::NotFound(slug.to_string()))
    }

    /// Look a project up by id, falling back to its slug.
    pub fn find_project(&self, id_or_slug: &str) -> Result<Project, ProjectError> {
        match self.project(id_or_slug) {
            Err(ProjectError::NotFound(_)) => self.project_by_slug(id_or_slug),
            other => other,
        }
    }

    pub fn list_projects(&self, pagination: Pagination) -> Result<Page<Project>, ProjectError> {
        Ok(self.db.project_repo().list(pagination)?)
    }

    pub fn update_project(&self, id: &str, update: ProjectUpdate) -> Result<Project, ProjectError> {
        if update.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(ProjectError::Invalid("name cannot be empty".into()));
        }
        if update
            .default_branch
            .as_deref()
            .is_some_and(|b| b.trim().is_empty())
        {
            return Err(ProjectError::Invalid("default branch cannot be empty".into()));
        }
        self.db
            .project_repo()
            .update(id, &update)?
            .ok_or_else(|| ProjectError::NotFound(id.to_string()))
    }

    /// Remove the project, everything it owns and its stored images.
    pub fn delete_project(&self, id: &str) -> Result<(), ProjectError> {
        if !self.db.project_repo().delete(id)? {
            return Err(ProjectError::NotFound(id.to_string()));
        }
        if let Err(err) = self.blobs.delete_project(id) {
            log::warn!("Project {id} deleted but its images could not be removed: {err}");
        }
        log::info!("Deleted project {id}");
        Ok(())
    }

    // ---- builds ----

    pub fn create_build(&self, input: NewBuild) -> Result<Build, BuildError> {
        if input.branch.trim().is_empty() {
            return Err(BuildError::Invalid("branch is required".into()));
        }
        if self.db.project_repo().find_by_id(&input.project_id)?.is_none() {
            return Err(BuildError::ProjectNotFound(input.project_id));
        }
        let build = self.db.build_repo().create(&input)?;
        log::info!(
            "Created build #{} on '{}' for project {}",
            build.build_number,
            build.branch,
            build.project_id
        );
        Ok(build)
    }

    pub fn build(&self, id: &str) -> Result<Build, BuildError> {
        self.db
            .build_repo()
            .find_by_id(id)?
            .ok_or_else(|| BuildError::NotFound(id.to_string()))
    }

    pub fn list_builds(
        &self,
        project_id: &str,
        pagination: Pagination,
    ) -> Result<Page<Build>, BuildError> {
        Ok(self.db.build_repo().list_by_project(project_id, pagination)?)
    }

    pub fn list_builds_by_branch(
        &self,
        project_id: &str,
        branch: &str,
        pagination: Pagination,
    ) -> Result<Page<Build>, BuildError> {
        Ok(self
            .db
            .build_repo()
            .list_by_branch(project_id, branch, pagination)?)
    }

    pub fn latest_build(&self, project_id: &str, branch: &str) -> Result<Build, BuildError> {
        self.db
            .build_repo()
            .latest_by_branch(project_id, branch)?
            .ok_or_else(|| BuildError::NotFound(format!("latest build on '{branch}'")))
    }

    /// Move a build to `next`. Terminal builds only accept their own status.
    pub fn update_build_status(&self, id: &str, next: BuildStatus) -> Result<Build, BuildError> {
        let build = self.build(id)?;
        if build.status == next {
            return Ok(build);
        }
        if !build.status.can_transition_to(next) {
            return Err(BuildError::InvalidStatusTransition {
                current: build.status.to_string(),
                next: next.to_string(),
            });
        }
        self.db.build_repo().update_status(id, next)?;
        log::info!("Build {id}: {} -> {next}", build.status);
        self.build(id)
    }

    /// Recompute cached counters. Allowed in every status.
    pub fn update_build_stats(&self, id: &str) -> Result<Build, BuildError> {
        if !self.db.build_repo().update_stats(id)? {
            return Err(BuildError::NotFound(id.to_string()));
        }
        self.build(id)
    }

    pub fn finalize_build(&self, id: &str) -> Result<Build, BuildError> {
        self.update_build_stats(id)?;
        self.update_build_status(id, BuildStatus::Completed)
    }

    pub fn delete_build(&self, id: &str) -> Result<(), BuildError> {
        let paths = self.db.snapshot_repo().image_paths_for_build(id)?;
        if !self.db.build_repo().delete(id)? {
            return Err(BuildError::NotFound(id.to_string()));
        }
        self.release_images(&paths);
        Ok(())
    }

    // ---- snapshots ----

    pub fn snapshot(&self, id: &str) -> Result<Snapshot, SnapshotError> {
        self.db
            .snapshot_repo()
            .find_by_id(id)?
            .ok_or_else(|| SnapshotError::NotFound(id.to_string()))
    }

    pub fn list_snapshots(
        &self,
        build_id: &str,
        filter: SnapshotFilter,
        pagination: Pagination,
    ) -> Result<Page<Snapshot>, SnapshotError> {
        Ok(self
            .db
            .snapshot_repo()
            .list_by_build(build_id, filter, pagination)?)
    }

    /// Snapshots needing attention: a non-zero diff or no baseline at all.
    pub fn changed_snapshots(&self, build_id: &str) -> Result<Vec<Snapshot>, SnapshotError> {
        if self.db.build_repo().find_by_id(build_id)?.is_none() {
            return Err(SnapshotError::BuildNotFound(build_id.to_string()));
        }
        Ok(self.db.snapshot_repo().list_changed(build_id)?)
    }

    pub fn delete_snapshot(&self, id: &str) -> Result<(), SnapshotError> {
        let snapshot = self.snapshot(id)?;
        self.db.snapshot_repo().delete(id)?;

        let paths: Vec<String> = [snapshot.comparison_image_path, snapshot.diff_image_path]
            .into_iter()
            .flatten()
            .collect();
        self.release_images(&paths);

        self.db.build_repo().update_stats(&snapshot.build_id)?;
        Ok(())
    }

    // ---- baselines ----

    /// Store `image` as the baseline for `key`, replacing any previous one.
    pub fn upload_baseline(&self, key: VariantKey, image: &[u8]) -> Result<Baseline, BaselineError> {
        if key.name.trim().is_empty() || key.branch.trim().is_empty() {
            return Err(BaselineError::Invalid("name and branch are required".into()));
        }
        if self.db.project_repo().find_by_id(&key.project_id)?.is_none() {
            return Err(BaselineError::ProjectNotFound(key.project_id));
        }
        let decoded = self
            .decoder
            .decode(image)
            .map_err(|err| BaselineError::Invalid(format!("image could not be decoded: {err}")))?;

        let filename = format!("{}.png", uuid::Uuid::new_v4());
        let image_path = self
            .blobs
            .save(&key.project_id, BlobCategory::Baseline, &filename, image)?;

        let upsert = BaselineUpsert {
            key,
            image_path: image_path.clone(),
            width: Some(decoded.width()),
            height: Some(decoded.height()),
            source_snapshot_id: None,
        };
        let (baseline, replaced) = match self.db.baseline_repo().upsert(&upsert) {
            Ok(stored) => stored,
            Err(err) => {
                self.release_images(&[image_path]);
                return Err(err.into());
            }
        };
        if let Some(old) = replaced {
            self.release_images(&[old]);
        }
        log::info!(
            "Uploaded baseline '{}' on '{}' ({})",
            baseline.key.name,
            baseline.key.branch,
            baseline.id
        );
        Ok(baseline)
    }

    pub fn baseline(&self, id: &str) -> Result<Baseline, BaselineError> {
        self.db
            .baseline_repo()
            .find_by_id(id)?
            .ok_or_else(|| BaselineError::NotFound(id.to_string()))
    }

    pub fn list_baselines(
        &self,
        project_id: &str,
        branch: Option<&str>,
        pagination: Pagination,
    ) -> Result<Page<Baseline>, BaselineError> {
        Ok(self.db.baseline_repo().list(project_id, branch, pagination)?)
    }

    pub fn delete_baseline(&self, id: &str) -> Result<(), BaselineError> {
        let baseline = self.baseline(id)?;
        self.db.baseline_repo().delete(id)?;
        self.release_images(&[baseline.image_path]);
        Ok(())
    }

    fn release_images(&self, paths: &[String]) {
        for path in paths {
            if let Err(err) = self.blobs.delete(path) {
                log::warn!("Failed to remove stored image {path}: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewSnapshot, SnapshotImages, SnapshotStatus};
    use crate::infra::image::ImageCodec;
    use crate::infra::storage::FsBlobStore;
    use crate::application::ports::ImageEncoder;
    use image::{Rgba, RgbaImage};
    use tempfile::TempDir;

    fn catalog() -> (TempDir, Catalog, Arc<FsBlobStore>) {
        let tmp = TempDir::new().unwrap();
        let blobs = Arc::new(FsBlobStore::new(tmp.path()).unwrap());
        let catalog = Catalog::new(
            Database::open_in_memory().unwrap(),
            blobs.clone(),
            Arc::new(ImageCodec),
            "main",
        );
        (tmp, catalog, blobs)
    }

    fn png() -> Vec<u8> {
        ImageCodec
            .encode(&RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 255])))
            .unwrap()
    }

    fn new_project(slug: &str) -> NewProject {
        NewProject {
            name: "Shop".into(),
            slug: slug.into(),
            ..NewProject::default()
        }
    }

    #[test]
    fn test_project_validation() {
        let (_tmp, catalog, _) = catalog();
        assert!(matches!(
            catalog.create_project(new_project("Bad Slug")),
            Err(ProjectError::Invalid(_))
        ));
        catalog.create_project(new_project("shop")).unwrap();
        assert!(matches!(
            catalog.create_project(new_project("shop")),
            Err(ProjectError::Invalid(_))
        ));
        assert!(matches!(
            catalog.project("missing"),
            Err(ProjectError::NotFound(_))
        ));
    }

    #[test]
    fn test_project_default_branch_from_settings() {
        let (tmp, _, blobs) = catalog();
        let trunk = Catalog::new(
            Database::open_in_memory().unwrap(),
            blobs,
            Arc::new(ImageCodec),
            "trunk",
        );
        let project = trunk.create_project(new_project("svc")).unwrap();
        assert_eq!(project.default_branch, "trunk");
        assert_eq!(trunk.find_project("svc").unwrap().id, project.id);
        drop(tmp);
    }

    #[test]
    fn test_build_status_rules() {
        let (_tmp, catalog, _) = catalog();
        let project = catalog.create_project(new_project("builds")).unwrap();
        let build = catalog
            .create_build(NewBuild {
                project_id: project.id.clone(),
                branch: "main".into(),
                ..NewBuild::default()
            })
            .unwrap();

        catalog
            .update_build_status(&build.id, BuildStatus::Processing)
            .unwrap();
        let done = catalog.finalize_build(&build.id).unwrap();
        assert_eq!(done.status, BuildStatus::Completed);
        assert!(done.finished_at.is_some());

        // Same status again is a no-op; leaving a terminal state is not allowed.
        catalog
            .update_build_status(&build.id, BuildStatus::Completed)
            .unwrap();
        assert!(matches!(
            catalog.update_build_status(&build.id, BuildStatus::Processing),
            Err(BuildError::InvalidStatusTransition { .. })
        ));
        // Stats stay recomputable.
        catalog.update_build_stats(&build.id).unwrap();
    }

    #[test]
    fn test_create_build_requires_project() {
        let (_tmp, catalog, _) = catalog();
        let err = catalog
            .create_build(NewBuild {
                project_id: "ghost".into(),
                branch: "main".into(),
                ..NewBuild::default()
            })
            .unwrap_err();
        assert!(matches!(err, BuildError::ProjectNotFound(_)));
    }

    #[test]
    fn test_baseline_upload_replaces_previous_image() {
        let (_tmp, catalog, blobs) = catalog();
        let project = catalog.create_project(new_project("bl")).unwrap();
        let key = VariantKey::new(project.id.clone(), "home", "main", None, None);

        let first = catalog.upload_baseline(key.clone(), &png()).unwrap();
        assert_eq!((first.width, first.height), (Some(3), Some(2)));
        let second = catalog.upload_baseline(key, &png()).unwrap();
        assert_eq!(first.id, second.id);
        assert!(blobs.get(&first.image_path).is_err());
        assert!(blobs.get(&second.image_path).is_ok());

        assert!(matches!(
            catalog.upload_baseline(
                VariantKey::new(project.id.clone(), "x", "main", None, None),
                b"nope"
            ),
            Err(BaselineError::Invalid(_))
        ));

        catalog.delete_baseline(&second.id).unwrap();
        assert!(blobs.get(&second.image_path).is_err());
    }

    #[test]
    fn test_delete_project_removes_files() {
        let (tmp, catalog, blobs) = catalog();
        let project = catalog.create_project(new_project("gone")).unwrap();
        catalog
            .upload_baseline(
                VariantKey::new(project.id.clone(), "home", "main", None, None),
                &png(),
            )
            .unwrap();
        assert!(tmp.path().join(&project.id).exists());

        catalog.delete_project(&project.id).unwrap();
        assert!(!tmp.path().join(&project.id).exists());
        assert!(matches!(
            catalog.delete_project(&project.id),
            Err(ProjectError::NotFound(_))
        ));
        drop(blobs);
    }

    #[test]
    fn test_delete_snapshot_updates_stats_and_files() {
        let (_tmp, catalog, blobs) = catalog();
        let project = catalog.create_project(new_project("snaps")).unwrap();
        let build = catalog
            .create_build(NewBuild {
                project_id: project.id.clone(),
                branch: "main".into(),
                ..NewBuild::default()
            })
            .unwrap();

        let repo = catalog.db.snapshot_repo();
        let snap = repo
            .create(&build.id, &NewSnapshot { name: "a".into(), ..Default::default() })
            .unwrap();
        let path = blobs
            .save(&project.id, BlobCategory::SnapshotComparison, "a.png", &png())
            .unwrap();
        repo.update_images(
            &snap.id,
            &SnapshotImages {
                comparison_image_path: Some(path.clone()),
                ..Default::default()
            },
            SnapshotStatus::Completed,
        )
        .unwrap();
        assert_eq!(catalog.update_build_stats(&build.id).unwrap().stats.total_snapshots, 1);
        assert_eq!(catalog.changed_snapshots(&build.id).unwrap().len(), 1);

        catalog.delete_snapshot(&snap.id).unwrap();
        assert!(blobs.get(&path).is_err());
        assert_eq!(catalog.build(&build.id).unwrap().stats.total_snapshots, 0);
    }
}
