//! Pairs files between a base directory tree and a feature directory tree.
//!
//! Every file name found on either side yields exactly one entry: a matched
//! pair when both sides have it, otherwise a one-sided entry that marks the
//! file as added (feature only) or removed (base only). Subdirectories are
//! walked depth-first with an explicit worklist; a directory that exists on
//! one side only is paired with a nonexistent path that lists as empty.

use crate::domain::DirectoryReadError;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// One reconciliation result. Immutable value, compared by all three paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ComparisonPair {
    pub base: Option<PathBuf>,
    pub feature: Option<PathBuf>,
    /// Where a diff artifact for this pair belongs. Only set for matched pairs
    /// when a diff root was supplied.
    pub diff: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PairKind {
    Matched,
    Added,
    Removed,
}

impl ComparisonPair {
    pub fn kind(&self) -> PairKind {
        match (&self.base, &self.feature) {
            (Some(_), Some(_)) => PairKind::Matched,
            (None, Some(_)) => PairKind::Added,
            _ => PairKind::Removed,
        }
    }

    pub fn is_one_sided(&self) -> bool {
        self.kind() != PairKind::Matched
    }
}

/// Reconcile two trees without computing diff artifact locations.
pub fn reconcile(base: &Path, feature: &Path) -> Result<Vec<ComparisonPair>, DirectoryReadError> {
    walk(base, feature, None)
}

/// Reconcile two trees; matched pairs get a diff path mirroring their location
/// under `diff_root`.
pub fn reconcile_with_diff_dir(
    base: &Path,
    feature: &Path,
    diff_root: &Path,
) -> Result<Vec<ComparisonPair>, DirectoryReadError> {
    walk(base, feature, Some(diff_root))
}

struct PendingDir {
    base: PathBuf,
    feature: PathBuf,
    diff: Option<PathBuf>,
}

#[derive(Default)]
struct Listing {
    files: BTreeSet<OsString>,
    dirs: BTreeSet<OsString>,
}

fn walk(
    base: &Path,
    feature: &Path,
    diff_root: Option<&Path>,
) -> Result<Vec<ComparisonPair>, DirectoryReadError> {
    // Roots must be listable; only nested paths may be absent.
    let root_listings = (list_dir(base, true)?, list_dir(feature, true)?);

    let mut results = Vec::new();
    let mut seen = HashSet::new();
    let mut stack = Vec::new();

    let mut pending_listings = Some(root_listings);
    stack.push(PendingDir {
        base: base.to_path_buf(),
        feature: feature.to_path_buf(),
        diff: diff_root.map(Path::to_path_buf),
    });

    while let Some(dir) = stack.pop() {
        let (base_listing, feature_listing) = match pending_listings.take() {
            Some(listings) => listings,
            None => (list_dir(&dir.base, false)?, list_dir(&dir.feature, false)?),
        };

        let names: BTreeSet<&OsString> = base_listing
            .files
            .iter()
            .chain(feature_listing.files.iter())
            .collect();

        for name in names {
            let in_base = base_listing.files.contains(name);
            let in_feature = feature_listing.files.contains(name);
            let pair = ComparisonPair {
                base: in_base.then(|| dir.base.join(name)),
                feature: in_feature.then(|| dir.feature.join(name)),
                diff: if in_base && in_feature {
                    dir.diff.as_ref().map(|d| d.join(name))
                } else {
                    None
                },
            };
            if seen.insert(pair.clone()) {
                results.push(pair);
            }
        }

        let subdirs: BTreeSet<&OsString> = base_listing
            .dirs
            .iter()
            .chain(feature_listing.dirs.iter())
            .collect();

        // Reverse so the stack pops children in name order.
        for name in subdirs.into_iter().rev() {
            stack.push(PendingDir {
                base: dir.base.join(name),
                feature: dir.feature.join(name),
                diff: dir.diff.as_ref().map(|d| d.join(name)),
            });
        }
    }

    log::debug!(
        "Reconciled {} against {}: {} entries",
        base.display(),
        feature.display(),
        results.len()
    );
    Ok(results)
}

fn list_dir(path: &Path, required: bool) -> Result<Listing, DirectoryReadError> {
    let read_error = |source| DirectoryReadError {
        path: path.to_path_buf(),
        source,
    };

    if !required {
        match fs::metadata(path) {
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Listing::default()),
            // A file on this side where the other side has a directory.
            Ok(meta) if !meta.is_dir() => return Ok(Listing::default()),
            Err(err) => return Err(read_error(err)),
            Ok(_) => {}
        }
    }

    let mut listing = Listing::default();
    for entry in fs::read_dir(path).map_err(read_error)? {
        let entry = entry.map_err(read_error)?;
        let entry_path = entry.path();
        // Follows symlinks so a linked directory is walked like a real one.
        let is_dir = match entry.file_type().map_err(read_error)? {
            ft if ft.is_symlink() => entry_path.is_dir(),
            ft => ft.is_dir(),
        };
        if is_dir {
            listing.dirs.insert(entry.file_name());
        } else {
            listing.files.insert(entry.file_name());
        }
    }
    Ok(listing)
}
