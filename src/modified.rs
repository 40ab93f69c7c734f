// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Narrow paths down to what was modified.
//!
//! Given some candidate paths inside a reference dataset and a revision to
//! compare against, keep only what actually changed. The whole dataset gets
//! compared at once, because a candidate directory can hold modifications
//! that a path-constrained comparison would miss. Modified entries at or
//! under a candidate replace that candidate.
//!
//! # Cascading Into Subdatasets
//!
//! A modified subdataset entry means the commit recorded for it changed. The
//! same filtering then repeats inside that subdataset, with its own range of
//! previously and newly recorded commits. Each hop uses the correct local
//! range, not the range of the reference dataset. A subdataset that was newly
//! added gets compared from the empty tree.

use crate::{
    backend::{RepoBackend, EMPTY_TREE},
    config::EngineConfig,
    diff::{DiffEngine, DiffEntry, DiffError, DiffOutcome, DiffRequest},
    path::{is_at_or_under, is_under, normalize, resolve_against, resolve_against_cwd},
    record::{ContentState, PathRecord, PathType},
};

use std::{
    collections::VecDeque,
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, info, instrument};

/// What to consider modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevisionSpec {
    /// Uncommitted changes in the working tree.
    Uncommitted,

    /// Changes since a revision, or within an `A..B` range.
    Since(String),
}

impl RevisionSpec {
    /// Split into a `from` revision and a `to` revision, `None` being the
    /// working tree.
    pub fn range(&self) -> (String, Option<String>) {
        match self {
            Self::Uncommitted => ("HEAD".into(), None),
            Self::Since(spec) => match spec.split_once("..") {
                Some((from, to)) if !to.is_empty() => {
                    (non_empty_or_head(from), Some(to.to_string()))
                }
                Some((from, _)) => (non_empty_or_head(from), None),
                None => (spec.clone(), None),
            },
        }
    }
}

fn non_empty_or_head(rev: &str) -> String {
    if rev.is_empty() {
        "HEAD".into()
    } else {
        rev.to_string()
    }
}

impl FromStr for RevisionSpec {
    type Err = std::convert::Infallible;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        Ok(Self::Since(data.to_string()))
    }
}

impl Display for RevisionSpec {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Uncommitted => fmt.write_str("uncommitted changes"),
            Self::Since(spec) => fmt.write_str(spec),
        }
    }
}

/// Filter for modified paths.
#[derive(Debug)]
pub struct ModificationFilter<'a, B>
where
    B: RepoBackend,
{
    backend: &'a B,
    config: &'a EngineConfig,
    recursive: bool,
    recursion_limit: Option<i32>,
}

impl<'a, B> ModificationFilter<'a, B>
where
    B: RepoBackend,
{
    /// Construct new modification filter.
    pub fn new(backend: &'a B, config: &'a EngineConfig) -> Self {
        Self {
            backend,
            config,
            recursive: true,
            recursion_limit: None,
        }
    }

    /// Limit cascading into modified subdatasets.
    ///
    /// Cascading is unlimited by default. A `recursion_limit` of `None` or
    /// below zero means no limit. A subdataset that holds a candidate is
    /// always entered, even when not recursive.
    pub fn recursive(mut self, recursive: bool, recursion_limit: Option<i32>) -> Self {
        self.recursive = recursive;
        self.recursion_limit = recursion_limit;
        self
    }

    /// Keep modified paths at or under candidates.
    ///
    /// Without `since` every candidate is passed through as is. Candidates
    /// that already carry a result status are always passed through.
    #[instrument(skip(self, candidates), level = "debug")]
    pub fn filter_modified(
        &self,
        candidates: impl IntoIterator<Item = PathRecord>,
        refds: &Path,
        since: Option<&RevisionSpec>,
    ) -> ModifiedPaths<'a, B> {
        let mut passthrough = VecDeque::new();
        let mut stack = Vec::new();
        let (refds, failure) = match resolve_against_cwd(refds) {
            Ok(refds) => (refds, None),
            Err(error) => (normalize(refds), Some(DiffError::from(error))),
        };

        match since {
            None => passthrough.extend(candidates),
            Some(since) => {
                let mut paths = Vec::new();
                for candidate in candidates {
                    if candidate.is_terminal() {
                        passthrough.push_back(candidate);
                        continue;
                    }

                    let path = resolve_against(&candidate.path, &refds);
                    if !paths.contains(&path) {
                        paths.push(path);
                    }
                }

                if !paths.is_empty() && failure.is_none() {
                    let (from, to) = since.range();
                    info!("filter modifications in {:?} since {since}", refds.display());
                    stack.push(Frame {
                        dataset: refds.clone(),
                        candidates: paths,
                        from,
                        to,
                        depth: 0,
                        pending: None,
                    });
                }
            }
        }

        ModifiedPaths {
            backend: self.backend,
            config: self.config,
            refds,
            failure,
            levels: match (self.recursive, self.recursion_limit) {
                (false, _) => Some(0),
                (true, Some(limit)) if limit >= 0 => Some(limit as usize),
                (true, _) => None,
            },
            passthrough,
            stack,
        }
    }
}

#[derive(Debug)]
struct Frame {
    dataset: PathBuf,
    candidates: Vec<PathBuf>,
    from: String,
    to: Option<String>,
    depth: usize,
    pending: Option<VecDeque<DiffEntry>>,
}

/// Lazy walk over modified paths.
#[derive(Debug)]
pub struct ModifiedPaths<'a, B>
where
    B: RepoBackend,
{
    backend: &'a B,
    config: &'a EngineConfig,
    refds: PathBuf,
    failure: Option<DiffError>,
    levels: Option<usize>,
    passthrough: VecDeque<PathRecord>,
    stack: Vec<Frame>,
}

impl<B> ModifiedPaths<'_, B>
where
    B: RepoBackend,
{
    fn compare(&self, frame: &Frame) -> Result<DiffOutcome, DiffError> {
        let request = DiffRequest {
            from: frame.from.clone(),
            to: frame.to.clone(),
            untracked: self.config.diff.modified_untracked,
            ..DiffRequest::default()
        };

        DiffEngine::new(self.backend, self.config).diff(&frame.dataset, &request)
    }

    /// Child frame for a modified subdataset entry, if it should be entered.
    fn descend(&self, frame: &Frame, entry: &DiffEntry) -> Option<Frame> {
        if entry.state == ContentState::Deleted {
            return None;
        }

        let mut candidates: Vec<PathBuf> = Vec::new();
        let mut explicit = false;
        for candidate in &frame.candidates {
            let child = if is_under(candidate, &entry.path) {
                explicit = true;
                candidate.clone()
            } else if is_at_or_under(&entry.path, candidate) {
                entry.path.clone()
            } else {
                continue;
            };

            if !candidates.contains(&child) {
                candidates.push(child);
            }
        }

        let depth = frame.depth + 1;
        let within_limit = self.levels.map_or(true, |levels| depth <= levels);
        if candidates.is_empty() || !(explicit || within_limit) {
            return None;
        }

        if !self.backend.is_repo_root(&entry.path) {
            debug!("skip uninstalled subdataset {:?}", entry.path.display());
            return None;
        }

        // INVARIANT: A range ending at the working tree keeps doing so for
        // subdatasets, otherwise it ends at the newly recorded commit.
        let to = match &frame.to {
            None => None,
            Some(_) => Some(entry.gitshasum.clone()?),
        };

        Some(Frame {
            dataset: entry.path.clone(),
            candidates,
            from: entry
                .prev_gitshasum
                .clone()
                .unwrap_or_else(|| EMPTY_TREE.to_string()),
            to,
            depth,
            pending: None,
        })
    }
}

impl<B> Iterator for ModifiedPaths<'_, B>
where
    B: RepoBackend,
{
    type Item = Result<PathRecord, DiffError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(error) = self.failure.take() {
            return Some(Err(error));
        }

        if let Some(record) = self.passthrough.pop_front() {
            return Some(Ok(record));
        }

        loop {
            let frame = self.stack.last()?;
            if frame.pending.is_none() {
                let pending = match self.compare(frame) {
                    Ok(DiffOutcome::Compared(entries)) => entries.into_values().collect(),
                    Ok(DiffOutcome::InvalidRevision(mut record)) => {
                        record.refds = Some(self.refds.clone());
                        self.stack.pop();
                        return Some(Ok(record));
                    }
                    Err(error) => {
                        self.stack.pop();
                        return Some(Err(error));
                    }
                };

                if let Some(frame) = self.stack.last_mut() {
                    frame.pending = Some(pending);
                }
            }

            let Some(entry) = self
                .stack
                .last_mut()
                .and_then(|frame| frame.pending.as_mut())
                .and_then(VecDeque::pop_front)
            else {
                self.stack.pop();
                continue;
            };

            let frame = self.stack.last()?;
            let wanted = frame
                .candidates
                .iter()
                .any(|candidate| is_at_or_under(&entry.path, candidate));

            let child = if entry.path_type == Some(PathType::Dataset) {
                self.descend(frame, &entry)
            } else {
                None
            };

            let dataset = frame.dataset.clone();
            if let Some(child) = child {
                debug!(
                    "descend into {:?} from {} to {}",
                    child.dataset.display(),
                    child.from,
                    child.to.as_deref().unwrap_or("working tree")
                );
                self.stack.push(child);
            }

            if wanted {
                return Some(Ok(entry.into_record(&dataset, Some(self.refds.as_path()))));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Git2Backend;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test]
    fn cascade_depth_defaults_to_unlimited() {
        let backend = Git2Backend::default();
        let config = EngineConfig::default();
        let refds = Path::new("/nonexistent/super");

        let filter = ModificationFilter::new(&backend, &config);
        assert_eq!(filter.filter_modified(Vec::new(), refds, None).levels, None);

        let filter = ModificationFilter::new(&backend, &config).recursive(true, Some(2));
        assert_eq!(filter.filter_modified(Vec::new(), refds, None).levels, Some(2));

        let filter = ModificationFilter::new(&backend, &config).recursive(false, None);
        assert_eq!(filter.filter_modified(Vec::new(), refds, None).levels, Some(0));
    }

    #[test_case(RevisionSpec::Uncommitted, ("HEAD", None); "uncommitted")]
    #[test_case(RevisionSpec::Since("HEAD~2".into()), ("HEAD~2", None); "since revision")]
    #[test_case(RevisionSpec::Since("v1..v2".into()), ("v1", Some("v2")); "closed range")]
    #[test_case(RevisionSpec::Since("v1..".into()), ("v1", None); "open range")]
    #[test_case(RevisionSpec::Since("..v2".into()), ("HEAD", Some("v2")); "range from head")]
    #[test]
    fn split_revision_spec(spec: RevisionSpec, expect: (&str, Option<&str>)) {
        let (from, to) = spec.range();
        pretty_assertions::assert_eq!((from.as_str(), to.as_deref()), expect);
    }
}
