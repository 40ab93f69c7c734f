// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Content state comparison of a single dataset.
//!
//! The diff engine compares a dataset between a revision and some target:
//! another revision, the index, or the working tree. What comes back is a
//! mapping of absolute path to [`DiffEntry`], each carrying a content state
//! like `added` or `modified`, the nature of the path, and the object ids of
//! both sides.
//!
//! # Untracked Content
//!
//! Untracked content only exists relative to the working tree. It can be
//! reported at two granularities: every untracked file on its own, or with
//! wholly untracked directories collapsed into a single directory entry.
//!
//! # Subdatasets
//!
//! Subdatasets show up as single entries of type `dataset`, whose ids are
//! the commits recorded for them. How much of a subdataset's own state
//! counts as a change is configurable, from everything down to nothing at
//! all.
//!
//! # Unlocked Annex Content
//!
//! git-annex switches files between a symlink and a regular pointer file
//! without touching their key. Git sees a type change. Such a switch still
//! needs to be committed, so it is reported as a modification of the file.

use crate::{
    backend::{
        raw::{RawDiffLine, RawStatus},
        AnnexInfo, BackendError, DiffTarget, RawDiffOptions, RepoBackend, EMPTY_TREE,
    },
    config::EngineConfig,
    path::{is_at_or_under, relative_to, resolve_against, resolve_against_cwd},
    record::{ContentState, Message, PathRecord, PathType, ResultStatus},
};

use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, info, instrument};

/// Granularity of untracked content reporting.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UntrackedMode {
    /// Do not report untracked content.
    No,

    /// Collapse wholly untracked directories into one entry.
    #[default]
    Normal,

    /// Report every untracked file.
    All,
}

impl FromStr for UntrackedMode {
    type Err = DiffError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        match data {
            "no" => Ok(Self::No),
            "normal" => Ok(Self::Normal),
            "all" => Ok(Self::All),
            other => Err(DiffError::UnknownMode(other.to_string())),
        }
    }
}

/// How much of a subdataset's own state to ignore.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IgnoreSubdatasets {
    /// Any change inside a subdataset counts.
    #[default]
    None,

    /// Untracked content inside subdatasets does not count.
    Untracked,

    /// Only changes of the recorded commit count.
    Dirty,

    /// Subdatasets are left out entirely.
    All,
}

impl IgnoreSubdatasets {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Untracked => "untracked",
            Self::Dirty => "dirty",
            Self::All => "all",
        }
    }
}

impl FromStr for IgnoreSubdatasets {
    type Err = DiffError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        match data {
            "none" => Ok(Self::None),
            "untracked" => Ok(Self::Untracked),
            "dirty" => Ok(Self::Dirty),
            "all" => Ok(Self::All),
            other => Err(DiffError::UnknownMode(other.to_string())),
        }
    }
}

/// What to compare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffRequest {
    /// Revision to compare from.
    pub from: String,

    /// Revision to compare to, `None` for the working tree.
    pub to: Option<String>,

    /// Constrain comparison to these paths (absolute, or relative to the
    /// dataset).
    pub paths: Option<Vec<PathBuf>>,

    pub untracked: UntrackedMode,

    pub ignore_subdatasets: IgnoreSubdatasets,

    /// Compare `from` against the index instead of the working tree.
    pub staged: bool,

    /// Also report unchanged tracked content as clean.
    pub report_clean: bool,
}

impl Default for DiffRequest {
    fn default() -> Self {
        Self {
            from: "HEAD".into(),
            to: None,
            paths: None,
            untracked: UntrackedMode::Normal,
            ignore_subdatasets: IgnoreSubdatasets::None,
            staged: false,
            report_clean: false,
        }
    }
}

impl DiffRequest {
    /// Construct new request comparing `from` against the working tree.
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            ..Self::default()
        }
    }

    /// Compare against a revision instead of the working tree.
    pub fn to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    pub fn paths(mut self, paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.paths = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    pub fn untracked(mut self, untracked: UntrackedMode) -> Self {
        self.untracked = untracked;
        self
    }

    pub fn ignore_subdatasets(mut self, ignore: IgnoreSubdatasets) -> Self {
        self.ignore_subdatasets = ignore;
        self
    }

    pub fn staged(mut self, staged: bool) -> Self {
        self.staged = staged;
        self
    }

    pub fn report_clean(mut self, report_clean: bool) -> Self {
        self.report_clean = report_clean;
        self
    }

    fn target(&self) -> DiffTarget<'_> {
        match (&self.to, self.staged) {
            (Some(to), _) => DiffTarget::Revision(to.as_str()),
            (None, true) => DiffTarget::Index,
            (None, false) => DiffTarget::WorkTree,
        }
    }
}

/// Change of a single path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    pub path: PathBuf,
    pub path_type: Option<PathType>,
    pub state: ContentState,
    pub gitshasum: Option<String>,
    pub prev_gitshasum: Option<String>,
    pub prev_path: Option<PathBuf>,
    pub similarity: Option<u8>,
    pub bytesize: Option<u64>,
    pub annex_key: Option<String>,
}

impl DiffEntry {
    fn new(path: PathBuf, path_type: Option<PathType>, state: ContentState) -> Self {
        Self {
            path,
            path_type,
            state,
            gitshasum: None,
            prev_gitshasum: None,
            prev_path: None,
            similarity: None,
            bytesize: None,
            annex_key: None,
        }
    }

    /// Convert entry into an annotated path owned by `parentds`.
    ///
    /// Subdataset entries carry their recorded commits as `revision` and
    /// `revision_src`.
    pub fn into_record(self, parentds: &Path, refds: Option<&Path>) -> PathRecord {
        let mut record = PathRecord::new(self.path);
        if self.path_type == Some(PathType::Dataset) {
            record.revision = self.gitshasum.clone();
            record.revision_src = self.prev_gitshasum.clone();
        }

        record.path_type = self.path_type;
        record.state = Some(self.state);
        record.parentds = Some(parentds.to_path_buf());
        record.refds = refds.map(Path::to_path_buf);
        record.gitshasum = self.gitshasum;
        record.prev_gitshasum = self.prev_gitshasum;
        record.prev_path = self.prev_path;
        record.similarity = self.similarity;
        record.bytesize = self.bytesize;
        record.annex_key = self.annex_key;
        record
    }
}

/// Result of comparing one dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffOutcome {
    /// Changes by absolute path.
    Compared(BTreeMap<PathBuf, DiffEntry>),

    /// A revision could not be resolved, carries one `impossible` record.
    InvalidRevision(PathRecord),
}

impl DiffOutcome {
    /// Changes, unless comparison was impossible.
    pub fn entries(&self) -> Option<&BTreeMap<PathBuf, DiffEntry>> {
        match self {
            Self::Compared(entries) => Some(entries),
            Self::InvalidRevision(_) => None,
        }
    }

    /// Turn outcome into annotated paths owned by `dataset`.
    pub fn into_records(self, dataset: &Path, refds: Option<&Path>) -> Vec<PathRecord> {
        match self {
            Self::Compared(entries) => entries
                .into_values()
                .map(|entry| entry.into_record(dataset, refds))
                .collect(),
            Self::InvalidRevision(record) => vec![record],
        }
    }
}

/// Three-way content comparator.
#[derive(Debug)]
pub struct DiffEngine<'a, B>
where
    B: RepoBackend,
{
    backend: &'a B,
    config: &'a EngineConfig,
}

impl<'a, B> DiffEngine<'a, B>
where
    B: RepoBackend,
{
    /// Construct new diff engine.
    pub fn new(backend: &'a B, config: &'a EngineConfig) -> Self {
        Self { backend, config }
    }

    /// Compare dataset according to request.
    ///
    /// # Errors
    ///
    /// - Return [`DiffError::StagedRevision`] if request compares against
    ///   the index and a revision at the same time.
    /// - Return [`DiffError::Io`] if a relative dataset path cannot be made
    ///   absolute.
    /// - Return [`DiffError::Backend`] if repository queries fail for any
    ///   reason other than an unresolvable revision.
    #[instrument(skip(self, request), level = "debug")]
    pub fn diff(&self, dataset: &Path, request: &DiffRequest) -> Result<DiffOutcome> {
        if request.staged && request.to.is_some() {
            return Err(DiffError::StagedRevision);
        }

        let dataset = resolve_against_cwd(dataset)?;
        for rev in std::iter::once(request.from.as_str()).chain(request.to.as_deref()) {
            if let Some(impossible) = self.check_revision(&dataset, rev)? {
                return Ok(DiffOutcome::InvalidRevision(impossible));
            }
        }

        let Some(paths) = self.constrain_paths(&dataset, request.paths.as_deref()) else {
            debug!("no requested path is part of {:?}", dataset.display());
            return Ok(DiffOutcome::Compared(BTreeMap::new()));
        };

        info!("compare {:?} from {}", dataset.display(), request.from);
        let target = request.target();
        let options = RawDiffOptions {
            ignore_submodules: request.ignore_subdatasets,
            detect_renames: self.config.git.detect_renames,
        };
        let lines = self
            .backend
            .raw_diff(&dataset, &request.from, target, &paths, &options)?;

        let annex = self.config.annex.refine_unlocked && self.backend.is_annex(&dataset);
        let worktree_annex = if annex && target == DiffTarget::WorkTree {
            let unhashed = lines
                .iter()
                .filter(|line| line.dst_id().is_none())
                .map(|line| line.path().to_path_buf())
                .collect::<Vec<_>>();
            self.backend
                .annex_content_info(&dataset, &unhashed)?
                .unwrap_or_default()
        } else {
            BTreeMap::new()
        };

        let mut entries = BTreeMap::new();
        for line in &lines {
            let mut entry = self.entry_from_raw(&dataset, line, target)?;
            if annex {
                let worktree = worktree_annex.get(line.path());
                self.refine_annexed(&dataset, line, worktree, &mut entry)?;
            }
            entries.insert(entry.path.clone(), entry);
        }

        if target == DiffTarget::WorkTree && request.untracked != UntrackedMode::No {
            self.add_untracked(&dataset, &paths, request.untracked, &mut entries)?;
        }

        if request.report_clean {
            self.add_clean(&dataset, &paths, target, &mut entries)?;
        }

        if request.ignore_subdatasets == IgnoreSubdatasets::All {
            entries.retain(|_, entry| entry.path_type != Some(PathType::Dataset));
        }

        if self.config.diff.report_bytesize {
            self.add_bytesize(&dataset, &mut entries)?;
        }

        debug!("{} entries differ in {:?}", entries.len(), dataset.display());
        Ok(DiffOutcome::Compared(entries))
    }

    fn check_revision(&self, dataset: &Path, rev: &str) -> Result<Option<PathRecord>> {
        if rev == EMPTY_TREE {
            return Ok(None);
        }

        match self.backend.resolve_revision(dataset, rev) {
            Ok(_) => Ok(None),
            Err(BackendError::InvalidRevision { rev, message }) => {
                let mut record = PathRecord::dataset(dataset);
                record.conclude(
                    Some(ResultStatus::Impossible),
                    Some(Message::template("invalid revision %s: %s", [rev, message])),
                );
                Ok(Some(record))
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Relative pathspecs for requested paths.
    ///
    /// Returns `None` if paths were requested, but none of them belong to
    /// the dataset. An empty constraint covers the whole dataset.
    fn constrain_paths(&self, dataset: &Path, paths: Option<&[PathBuf]>) -> Option<Vec<PathBuf>> {
        let Some(paths) = paths else {
            return Some(Vec::new());
        };

        let relative = paths
            .iter()
            .filter_map(|path| relative_to(resolve_against(path, dataset), dataset))
            .collect::<Vec<_>>();

        if relative.is_empty() && !paths.is_empty() {
            return None;
        }

        // INVARIANT: The dataset root itself means everything.
        if relative.iter().any(|path| path.as_os_str().is_empty()) {
            return Some(Vec::new());
        }

        Some(relative)
    }

    fn entry_from_raw(
        &self,
        dataset: &Path,
        line: &RawDiffLine,
        target: DiffTarget<'_>,
    ) -> Result<DiffEntry> {
        let path = dataset.join(line.path());
        let state = match line.status {
            RawStatus::Added | RawStatus::Copied => ContentState::Added,
            RawStatus::Deleted => ContentState::Deleted,
            RawStatus::Modified => ContentState::Modified,
            RawStatus::Renamed => ContentState::Renamed,
            RawStatus::TypeChanged => ContentState::Typechange,
            RawStatus::Unmerged => ContentState::Unmerged,
            RawStatus::Unknown => return Err(DiffError::UnknownChange(path)),
        };

        let path_type = if state == ContentState::Deleted {
            PathType::from_git_mode(line.src_mode)
        } else {
            PathType::from_git_mode(line.dst_mode).or(PathType::from_git_mode(line.src_mode))
        };

        let mut entry = DiffEntry::new(path, path_type, state);
        entry.gitshasum = line.dst_id().map(str::to_owned);
        entry.prev_gitshasum = line.src_id().map(str::to_owned);

        if line.status.has_two_paths() {
            entry.prev_path = Some(dataset.join(&line.src_path));
            entry.similarity = line.score;
        }

        // INVARIANT: Git does not hash the working tree side. For an
        // installed subdataset its checked out commit is what counts.
        if path_type == Some(PathType::Dataset)
            && entry.gitshasum.is_none()
            && state != ContentState::Deleted
            && target == DiffTarget::WorkTree
            && self.backend.is_repo_root(&entry.path)
        {
            entry.gitshasum = self.backend.head_revision(&entry.path)?;
        }

        Ok(entry)
    }

    fn refine_annexed(
        &self,
        dataset: &Path,
        line: &RawDiffLine,
        worktree: Option<&AnnexInfo>,
        entry: &mut DiffEntry,
    ) -> Result<()> {
        let new_key = match line.dst_id() {
            Some(id) => self.backend.blob_annex_key(dataset, line.dst_mode, id)?,
            None => worktree.map(|info| info.key.clone()),
        };
        let prev_key = match line.src_id() {
            Some(id) => self.backend.blob_annex_key(dataset, line.src_mode, id)?,
            None => None,
        };

        if new_key.is_none() && prev_key.is_none() {
            return Ok(());
        }

        // INVARIANT: Annexed content is a file, no matter whether it is
        // represented by a symlink or a pointer.
        if entry.path_type == Some(PathType::Symlink) {
            entry.path_type = Some(PathType::File);
        }

        if entry.state == ContentState::Typechange {
            let lock = match worktree.map(|info| info.locked) {
                Some(true) => "locked",
                Some(false) => "unlocked",
                None => "switched",
            };
            debug!(
                "{:?} got {lock}, key {}",
                entry.path.display(),
                if new_key == prev_key { "kept" } else { "changed" }
            );
            entry.state = ContentState::Modified;
        }

        if let Some(key) = new_key.or(prev_key) {
            entry.bytesize = key.bytesize;
            entry.annex_key = Some(key.key);
        }

        Ok(())
    }

    fn add_untracked(
        &self,
        dataset: &Path,
        paths: &[PathBuf],
        mode: UntrackedMode,
        entries: &mut BTreeMap<PathBuf, DiffEntry>,
    ) -> Result<()> {
        let untracked = self
            .backend
            .list_untracked(dataset, paths, mode == UntrackedMode::Normal)?;

        for item in untracked {
            let path = dataset.join(&item.path);
            if entries.contains_key(&path) {
                continue;
            }

            let path_type = if self.backend.is_repo_root(&path) {
                PathType::Dataset
            } else if item.is_dir {
                PathType::Directory
            } else if fs::symlink_metadata(&path).is_ok_and(|meta| meta.file_type().is_symlink()) {
                PathType::Symlink
            } else {
                PathType::File
            };

            entries.insert(
                path.clone(),
                DiffEntry::new(path, Some(path_type), ContentState::Untracked),
            );
        }

        Ok(())
    }

    fn add_clean(
        &self,
        dataset: &Path,
        paths: &[PathBuf],
        target: DiffTarget<'_>,
        entries: &mut BTreeMap<PathBuf, DiffEntry>,
    ) -> Result<()> {
        let constraint = paths
            .iter()
            .map(|path| dataset.join(path))
            .collect::<BTreeSet<_>>();

        for tracked in self.backend.list_tracked(dataset, target)? {
            let path = dataset.join(&tracked.path);
            if entries.contains_key(&path) {
                continue;
            }

            if !constraint.is_empty() && !constraint.iter().any(|base| is_at_or_under(&path, base)) {
                continue;
            }

            let mut entry = DiffEntry::new(
                path.clone(),
                PathType::from_git_mode(tracked.mode),
                ContentState::Clean,
            );
            entry.gitshasum = Some(tracked.id.clone());
            entry.prev_gitshasum = Some(tracked.id);
            entries.insert(path, entry);
        }

        Ok(())
    }

    fn add_bytesize(&self, dataset: &Path, entries: &mut BTreeMap<PathBuf, DiffEntry>) -> Result<()> {
        for entry in entries.values_mut() {
            if entry.bytesize.is_some()
                || entry.path_type != Some(PathType::File)
                || entry.state == ContentState::Deleted
            {
                continue;
            }

            entry.bytesize = match &entry.gitshasum {
                Some(id) => self.backend.blob_size(dataset, id)?,
                None => fs::metadata(&entry.path).ok().map(|meta| meta.len()),
            };
        }

        Ok(())
    }
}

/// All possible error types for content comparison.
#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    /// Comparing against index and revision at once.
    #[error("cannot compare against the index and a revision at the same time")]
    StagedRevision,

    /// Backend reported a change it could not classify.
    #[error("backend reported unknown change for {:?}", .0.display())]
    UnknownChange(PathBuf),

    /// Mode label is not recognized.
    #[error("unknown mode {0:?}")]
    UnknownMode(String),

    /// Current working directory cannot be read to resolve relative paths.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Repository queries fail.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Friendly result alias :3
pub type Result<T, E = DiffError> = std::result::Result<T, E>;
