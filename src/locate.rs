// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Dataset root discovery.
//!
//! Figure out which dataset a path belongs to by walking up the directory
//! hierarchy until the backend recognizes a repository top-level. No dataset
//! being found is a valid outcome, and is reported as `None`.

use crate::{backend::RepoBackend, path::normalize};

use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Upward walker for dataset roots.
#[derive(Debug)]
pub struct DatasetLocator<'a, B>
where
    B: RepoBackend,
{
    backend: &'a B,
}

impl<'a, B> DatasetLocator<'a, B>
where
    B: RepoBackend,
{
    /// Construct new locator.
    pub fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    /// Find root of the dataset containing path.
    ///
    /// Walk starts at path itself if it is an existing directory, otherwise
    /// at its parent directory. A symlink is never treated as a directory,
    /// even if it points to one.
    pub fn find_dataset_root(&self, path: impl AsRef<Path>) -> Option<PathBuf> {
        let path = normalize(path);
        let is_dir = fs::symlink_metadata(&path).is_ok_and(|meta| meta.is_dir());
        let start = if is_dir {
            Some(path.as_path())
        } else {
            path.parent()
        };

        self.walk_up(start?, None)
    }

    /// Find root of the dataset containing the directory above path.
    ///
    /// Never ascends above `stop_above`, if given.
    pub fn find_parent(
        &self,
        path: impl AsRef<Path>,
        stop_above: Option<&Path>,
    ) -> Option<PathBuf> {
        let path = normalize(path);
        let stop_above = stop_above.map(normalize);
        self.walk_up(path.parent()?, stop_above.as_deref())
    }

    fn walk_up(&self, start: &Path, stop_above: Option<&Path>) -> Option<PathBuf> {
        for candidate in start.ancestors() {
            if stop_above.is_some_and(|stop| !candidate.starts_with(stop)) {
                debug!("stop dataset search above {:?}", stop_above);
                return None;
            }

            if self.backend.is_repo_root(candidate) {
                return Some(candidate.to_path_buf());
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        annex::AnnexKey,
        backend::{
            raw::RawDiffLine, AnnexInfo, DiffTarget, RawDiffOptions, Result, Submodule,
            TrackedEntry, UntrackedEntry,
        },
    };
    use pretty_assertions::assert_eq;
    use std::collections::{BTreeMap, BTreeSet};

    /// Backend that only knows a fixed set of repository roots.
    struct KnownRoots(BTreeSet<PathBuf>);

    impl RepoBackend for KnownRoots {
        fn is_repo_root(&self, path: &Path) -> bool {
            self.0.contains(path)
        }

        fn get_toppath(&self, _: &Path) -> Result<Option<PathBuf>> {
            Ok(None)
        }

        fn list_submodules(&self, _: &Path) -> Result<Vec<Submodule>> {
            Ok(Vec::new())
        }

        fn resolve_revision(&self, _: &Path, rev: &str) -> Result<String> {
            Ok(rev.to_string())
        }

        fn head_revision(&self, _: &Path) -> Result<Option<String>> {
            Ok(None)
        }

        fn raw_diff(
            &self,
            _: &Path,
            _: &str,
            _: DiffTarget<'_>,
            _: &[PathBuf],
            _: &RawDiffOptions,
        ) -> Result<Vec<RawDiffLine>> {
            Ok(Vec::new())
        }

        fn list_untracked(&self, _: &Path, _: &[PathBuf], _: bool) -> Result<Vec<UntrackedEntry>> {
            Ok(Vec::new())
        }

        fn list_tracked(&self, _: &Path, _: DiffTarget<'_>) -> Result<Vec<TrackedEntry>> {
            Ok(Vec::new())
        }

        fn is_annex(&self, _: &Path) -> bool {
            false
        }

        fn annex_content_info(
            &self,
            _: &Path,
            _: &[PathBuf],
        ) -> Result<Option<BTreeMap<PathBuf, AnnexInfo>>> {
            Ok(None)
        }

        fn blob_annex_key(&self, _: &Path, _: u32, _: &str) -> Result<Option<AnnexKey>> {
            Ok(None)
        }

        fn blob_size(&self, _: &Path, _: &str) -> Result<Option<u64>> {
            Ok(None)
        }
    }

    fn backend() -> KnownRoots {
        KnownRoots(BTreeSet::from([
            PathBuf::from("/nonexistent/super"),
            PathBuf::from("/nonexistent/super/sub"),
        ]))
    }

    #[test]
    fn find_dataset_root_walks_upward() {
        let backend = backend();
        let locator = DatasetLocator::new(&backend);

        assert_eq!(
            locator.find_dataset_root("/nonexistent/super/sub/dir/file"),
            Some(PathBuf::from("/nonexistent/super/sub"))
        );
        assert_eq!(
            locator.find_dataset_root("/nonexistent/super/file"),
            Some(PathBuf::from("/nonexistent/super"))
        );
        assert_eq!(locator.find_dataset_root("/nonexistent/elsewhere/file"), None);
    }

    #[test]
    fn find_parent_starts_one_level_up() {
        let backend = backend();
        let locator = DatasetLocator::new(&backend);

        assert_eq!(
            locator.find_parent("/nonexistent/super/sub", None),
            Some(PathBuf::from("/nonexistent/super"))
        );
        assert_eq!(locator.find_parent("/nonexistent/super", None), None);
    }

    #[test]
    fn find_parent_respects_stop_above() {
        let backend = backend();
        let locator = DatasetLocator::new(&backend);

        let stop = Path::new("/nonexistent/super/sub");
        assert_eq!(locator.find_parent("/nonexistent/super/sub", Some(stop)), None);
        assert_eq!(
            locator.find_parent("/nonexistent/super/sub/deep", Some(stop)),
            Some(PathBuf::from("/nonexistent/super/sub"))
        );
    }
}
