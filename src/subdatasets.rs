// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Subdataset registry.
//!
//! A dataset registers its subdatasets as gitlink entries in its index, with
//! optional names and URLs in `.gitmodules`. Registration says nothing about
//! installation: a mount point can be missing, be an empty directory, or
//! hold a fully checked out repository. The registry reports registrations
//! either way, and marks which ones are installed.
//!
//! Listings are produced lazily in pre-order, so a caller can start working
//! on the first subdataset before the whole hierarchy has been walked.
//! Registration data is read fresh on every listing.

use crate::{
    backend::{BackendError, RepoBackend, Submodule},
    path::is_under,
    record::{ContentState, PathRecord},
};

use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// Registration of a subdataset inside its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubdatasetRecord {
    /// Absolute mount point.
    pub path: PathBuf,
    pub parentds: PathBuf,

    /// Commit recorded by the parent.
    pub revision: String,
    pub name: Option<String>,
    pub url: Option<String>,

    /// Whether mount point holds a repository.
    pub installed: bool,
}

impl SubdatasetRecord {
    /// Turn registration into an annotated dataset record.
    ///
    /// Uninstalled subdatasets are marked absent, installed ones are left
    /// unevaluated.
    pub fn into_record(self, refds: Option<&Path>) -> PathRecord {
        let mut record = PathRecord::dataset(self.path);
        record.parentds = Some(self.parentds);
        record.refds = refds.map(Path::to_path_buf);
        record.revision = Some(self.revision);
        record.registered_subds = Some(true);
        if !self.installed {
            record.state = Some(ContentState::Absent);
        }

        record
    }
}

/// Lister of registered subdatasets.
#[derive(Debug)]
pub struct SubdatasetRegistry<'a, B>
where
    B: RepoBackend,
{
    backend: &'a B,
}

impl<'a, B> SubdatasetRegistry<'a, B>
where
    B: RepoBackend,
{
    /// Construct new registry.
    pub fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    /// List subdatasets registered under dataset root.
    ///
    /// A `recursion_limit` of `None` or below zero means no limit, `Some(0)`
    /// yields nothing, and `Some(1)` yields only direct subdatasets. Without
    /// `recursive`, only direct subdatasets are listed anyway.
    ///
    /// Recursion descends through installed subdatasets only. The
    /// `fulfilled` filter narrows what is yielded to installed (`true`) or
    /// uninstalled (`false`) subdatasets, but does not affect descent.
    #[instrument(skip(self), level = "debug")]
    pub fn list_subdatasets(
        &self,
        root: &Path,
        recursive: bool,
        recursion_limit: Option<i32>,
        fulfilled: Option<bool>,
    ) -> Subdatasets<'a, B> {
        let levels = match (recursive, recursion_limit) {
            (false, Some(0)) => Some(0),
            (false, _) => Some(1),
            (true, Some(limit)) if limit >= 0 => Some(limit as usize),
            (true, _) => None,
        };

        Subdatasets {
            backend: self.backend,
            levels,
            fulfilled,
            within: None,
            stack: vec![Frame::new(root.to_path_buf(), 1)],
        }
    }

    /// Registrations of direct subdatasets, read in one go.
    pub fn direct(&self, root: &Path) -> Result<Vec<SubdatasetRecord>> {
        self.list_subdatasets(root, false, None, None).collect()
    }
}

#[derive(Debug)]
struct Frame {
    root: PathBuf,
    depth: usize,
    pending: Option<VecDeque<Submodule>>,
}

impl Frame {
    fn new(root: PathBuf, depth: usize) -> Self {
        Self {
            root,
            depth,
            pending: None,
        }
    }
}

/// Lazy pre-order walk over subdataset registrations.
#[derive(Debug)]
pub struct Subdatasets<'a, B>
where
    B: RepoBackend,
{
    backend: &'a B,
    levels: Option<usize>,
    fulfilled: Option<bool>,
    within: Option<PathBuf>,
    stack: Vec<Frame>,
}

impl<B> Subdatasets<'_, B>
where
    B: RepoBackend,
{
    /// Skip registrations outside of a directory, without descending into
    /// them either.
    pub fn within(mut self, dir: impl Into<PathBuf>) -> Self {
        self.within = Some(dir.into());
        self
    }
}

impl<B> Iterator for Subdatasets<'_, B>
where
    B: RepoBackend,
{
    type Item = Result<SubdatasetRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.stack.last_mut()?;
            if self.levels.is_some_and(|levels| frame.depth > levels) {
                self.stack.pop();
                continue;
            }

            // INVARIANT: List submodules only once a frame is reached.
            if frame.pending.is_none() {
                match self.backend.list_submodules(&frame.root) {
                    Ok(listed) => frame.pending = Some(listed.into()),
                    Err(error) => {
                        self.stack.pop();
                        return Some(Err(error));
                    }
                }
            }

            let Some(submodule) = frame.pending.as_mut().and_then(VecDeque::pop_front) else {
                self.stack.pop();
                continue;
            };

            let parentds = frame.root.clone();
            let depth = frame.depth;
            let path = parentds.join(&submodule.path);
            if self.within.as_ref().is_some_and(|dir| !is_under(&path, dir)) {
                continue;
            }

            let installed = self.backend.is_repo_root(&path);
            debug!("found subdataset {:?}, installed: {installed}", path.display());

            if installed && self.levels.map_or(true, |levels| depth < levels) {
                self.stack.push(Frame::new(path.clone(), depth + 1));
            }

            if self.fulfilled.is_some_and(|fulfilled| fulfilled != installed) {
                continue;
            }

            return Some(Ok(SubdatasetRecord {
                path,
                parentds,
                revision: submodule.revision,
                name: submodule.name,
                url: submodule.url,
                installed,
            }));
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = BackendError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn uninstalled_registration_becomes_absent_dataset() {
        let record = SubdatasetRecord {
            path: "/data/super/sub".into(),
            parentds: "/data/super".into(),
            revision: "a".repeat(40),
            name: Some("sub".into()),
            url: None,
            installed: false,
        }
        .into_record(Some(Path::new("/data/super")));

        assert!(record.is_dataset());
        assert_eq!(record.state, Some(ContentState::Absent));
        assert_eq!(record.registered_subds, Some(true));
        assert_eq!(record.revision, Some("a".repeat(40)));
        assert_eq!(record.refds, Some(PathBuf::from("/data/super")));
    }

    #[test]
    fn installed_registration_stays_unevaluated() {
        let record = SubdatasetRecord {
            path: "/data/super/sub".into(),
            parentds: "/data/super".into(),
            revision: "a".repeat(40),
            name: None,
            url: None,
            installed: true,
        }
        .into_record(None);

        assert_eq!(record.state, None);
        assert_eq!(record.parentds, Some(PathBuf::from("/data/super")));
    }
}
