//! Picks the baseline a new snapshot is compared against.
//!
//! Lookup order: the exact variant key on the snapshot's branch, then the same
//! key on the project's configured default branch. Browser and viewport are
//! never relaxed. Query failures count as "no match" so a flaky lookup turns a
//! snapshot into a new one instead of failing the upload.

use crate::application::ports::BaselineLookup;
use crate::domain::{Baseline, BaselineLookupError, Project, VariantKey};

pub struct BaselineResolver<'a, L: BaselineLookup + ?Sized> {
    lookup: &'a L,
}

impl<'a, L: BaselineLookup + ?Sized> BaselineResolver<'a, L> {
    pub fn new(lookup: &'a L) -> Self {
        Self { lookup }
    }

    pub fn resolve(
        &self,
        project: &Project,
        name: &str,
        branch: &str,
        browser: Option<&str>,
        viewport: Option<&str>,
    ) -> Option<Baseline> {
        let key = VariantKey::new(
            project.id.clone(),
            name,
            branch,
            browser.map(str::to_string),
            viewport.map(str::to_string),
        );
        self.resolve_key(project, &key)
    }

    pub fn resolve_key(&self, project: &Project, key: &VariantKey) -> Option<Baseline> {
        if let Some(found) = self.find(key) {
            return Some(found);
        }

        if key.branch == project.default_branch {
            return None;
        }

        let fallback = key.on_branch(&project.default_branch);
        let found = self.find(&fallback);
        if found.is_some() {
            log::debug!(
                "Baseline for '{}' not found on '{}', using default branch '{}'",
                key.name,
                key.branch,
                project.default_branch
            );
        }
        found
    }

    fn find(&self, key: &VariantKey) -> Option<Baseline> {
        match self.lookup.find_by_key(key) {
            Ok(found) => found,
            Err(source) => {
                let err = BaselineLookupError {
                    name: key.name.clone(),
                    branch: key.branch.clone(),
                    source,
                };
                log::warn!("{err}; treating as no baseline");
                None
            }
        }
    }
}
