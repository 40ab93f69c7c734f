// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Version control backend.
//!
//! The engine never talks to Git directly. Everything it needs to know about
//! a repository goes through the [`RepoBackend`] trait: is this directory a
//! repository top-level, which submodules does it register, what changed
//! between two trees, and so on.
//!
//! # Git2 Backend
//!
//! [`Git2Backend`] answers most questions through libgit2. Diffs and
//! untracked listings are obtained by calling the Git binary itself, because
//! the raw diff format it produces (`git diff --raw -z`) is the contract the
//! diff engine is written against, including Git's own rename detection
//! heuristics and submodule handling. Git gets invoked non-interactively, and
//! its output is captured.
//!
//! All paths exchanged with the backend for content inside a repository are
//! relative to that repository's top-level, the same way Git reports them.

pub mod raw;

use crate::{
    annex::{AnnexKey, MAX_POINTER_SIZE},
    backend::raw::{bytes_to_path, parse_raw_diff, RawDiffError, RawDiffLine},
    config::GitSettings,
    diff::IgnoreSubdatasets,
    path::normalize,
};

use git2::{BranchType, ErrorCode, ObjectType, Oid, Repository};
use std::{
    collections::{BTreeMap, VecDeque},
    ffi::{OsStr, OsString},
    fs,
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{debug, instrument, warn};

/// Id of the empty tree, valid in every repository.
pub const EMPTY_TREE: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

const GITLINK_MODE: u32 = 0o160000;

/// Submodule registration of a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submodule {
    /// Mount point relative to repository top-level.
    pub path: PathBuf,

    /// Commit recorded by the gitlink entry.
    pub revision: String,

    /// Name given in `.gitmodules`.
    pub name: Option<String>,

    /// URL given in `.gitmodules`.
    pub url: Option<String>,
}

/// Entry tracked by a tree or by the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedEntry {
    /// Path relative to repository top-level.
    pub path: PathBuf,
    pub mode: u32,
    pub id: String,
}

/// git-annex information about a file in the working tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnexInfo {
    pub key: AnnexKey,

    /// Whether file is in locked (symlink) representation.
    pub locked: bool,
}

/// Side of a comparison that is not a plain revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffTarget<'a> {
    Revision(&'a str),
    Index,
    WorkTree,
}

/// Flags for raw diff queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawDiffOptions {
    pub ignore_submodules: IgnoreSubdatasets,
    pub detect_renames: bool,
}

impl Default for RawDiffOptions {
    fn default() -> Self {
        Self {
            ignore_submodules: IgnoreSubdatasets::None,
            detect_renames: true,
        }
    }
}

/// Layer of indirection for repository queries.
pub trait RepoBackend {
    /// Check if path is the top-level directory of a non-bare repository.
    fn is_repo_root(&self, path: &Path) -> bool;

    /// Determine top-level of the repository containing path.
    fn get_toppath(&self, path: &Path) -> Result<Option<PathBuf>>;

    /// List submodules registered in the index of repository.
    fn list_submodules(&self, repo_root: &Path) -> Result<Vec<Submodule>>;

    /// Resolve a tree-ish expression to an object id.
    ///
    /// Return [`BackendError::InvalidRevision`] if expression cannot be
    /// resolved.
    fn resolve_revision(&self, repo_root: &Path, rev: &str) -> Result<String>;

    /// Commit currently checked out, `None` for an unborn branch.
    fn head_revision(&self, repo_root: &Path) -> Result<Option<String>>;

    /// Compare revision against target in raw diff form.
    fn raw_diff(
        &self,
        repo_root: &Path,
        from: &str,
        to: DiffTarget<'_>,
        paths: &[PathBuf],
        options: &RawDiffOptions,
    ) -> Result<Vec<RawDiffLine>>;

    /// List untracked content, optionally collapsing untracked directories.
    fn list_untracked(
        &self,
        repo_root: &Path,
        paths: &[PathBuf],
        collapse_directories: bool,
    ) -> Result<Vec<UntrackedEntry>>;

    /// List everything tracked by a revision, or by the index.
    fn list_tracked(&self, repo_root: &Path, target: DiffTarget<'_>) -> Result<Vec<TrackedEntry>>;

    /// Check if repository carries git-annex content.
    fn is_annex(&self, repo_root: &Path) -> bool;

    /// Inspect working tree files for annex keys.
    ///
    /// Returns `None` for repositories without git-annex. Files that are not
    /// annexed are left out of the mapping.
    fn annex_content_info(
        &self,
        repo_root: &Path,
        paths: &[PathBuf],
    ) -> Result<Option<BTreeMap<PathBuf, AnnexInfo>>>;

    /// Extract annex key from a committed blob.
    fn blob_annex_key(&self, repo_root: &Path, mode: u32, id: &str) -> Result<Option<AnnexKey>>;

    /// Size of a committed blob in bytes.
    fn blob_size(&self, repo_root: &Path, id: &str) -> Result<Option<u64>>;
}

/// Untracked content reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UntrackedEntry {
    /// Path relative to repository top-level.
    pub path: PathBuf,

    /// Whether entry stands for a whole untracked directory.
    pub is_dir: bool,
}

/// Repository queries through libgit2 and the Git binary.
#[derive(Debug, Default, Clone)]
pub struct Git2Backend {
    settings: GitSettings,
}

impl Git2Backend {
    /// Construct new backend.
    pub fn new(settings: GitSettings) -> Self {
        Self { settings }
    }

    fn expand_bin_args(
        &self,
        repo_root: &Path,
        args: impl IntoIterator<Item = impl Into<OsString>>,
    ) -> Vec<OsString> {
        let mut bin_args: Vec<OsString> = vec!["-C".into(), repo_root.as_os_str().into()];
        bin_args.extend(args.into_iter().map(Into::into));
        bin_args
    }

    fn gitcall_non_interactive(
        &self,
        repo_root: &Path,
        args: impl IntoIterator<Item = impl Into<OsString>>,
    ) -> Result<Vec<u8>> {
        syscall_non_interactive(
            self.settings.executable.as_path(),
            self.expand_bin_args(repo_root, args),
        )
    }

    // Thank you Eric at https://www.hydrogen18.com/blog/list-all-files-git-repo-pygit2.html.
    fn list_tree_entries(&self, repo: &Repository, rev: &str) -> Result<Vec<TrackedEntry>> {
        let mut entries = Vec::new();
        let tree = repo.revparse_single(rev)?.peel_to_tree()?;
        let mut trees_and_paths = VecDeque::new();
        trees_and_paths.push_front((tree, PathBuf::new()));

        // Use DFS to traverse tree.
        while let Some((tree, path)) = trees_and_paths.pop_front() {
            for tree_entry in &tree {
                let full_path = path.join(bytes_to_path(tree_entry.name_bytes()));
                match tree_entry.kind() {
                    // INVARIANT: Hit a tree? Traverse it!
                    Some(ObjectType::Tree) => {
                        let next_tree = repo.find_tree(tree_entry.id())?;
                        trees_and_paths.push_front((next_tree, full_path));
                    }
                    // INVARIANT: Hit a blob or gitlink? Record our current path!
                    Some(ObjectType::Blob) | Some(ObjectType::Commit) => {
                        entries.push(TrackedEntry {
                            path: full_path,
                            mode: tree_entry.filemode() as u32,
                            id: tree_entry.id().to_string(),
                        });
                    }
                    _ => continue,
                }
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn list_index_entries(&self, repo: &Repository) -> Result<Vec<TrackedEntry>> {
        let index = repo.index()?;
        let mut entries: Vec<TrackedEntry> = Vec::new();

        for entry in index.iter() {
            let path = bytes_to_path(&entry.path);
            // INVARIANT: Conflicted entries show up once per stage, keep one.
            if entries.last().is_some_and(|last| last.path == path) {
                continue;
            }

            entries.push(TrackedEntry {
                path,
                mode: entry.mode,
                id: entry.id.to_string(),
            });
        }

        Ok(entries)
    }
}

impl RepoBackend for Git2Backend {
    fn is_repo_root(&self, path: &Path) -> bool {
        // INVARIANT: Only a real directory with a ".git" entry marks the
        // top-level of a non-bare repository. Symlinks are never followed.
        let is_dir = fs::symlink_metadata(path).is_ok_and(|meta| meta.is_dir());
        if !is_dir || fs::symlink_metadata(path.join(".git")).is_err() {
            return false;
        }

        let Ok(repo) = Repository::open(path) else {
            return false;
        };
        let is_root = repo
            .workdir()
            .is_some_and(|workdir| same_directory(workdir, path));

        is_root
    }

    fn get_toppath(&self, path: &Path) -> Result<Option<PathBuf>> {
        match Repository::discover(path) {
            Ok(repo) => Ok(repo.workdir().map(normalize)),
            Err(error) if error.code() == ErrorCode::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    #[instrument(skip(self), level = "debug")]
    fn list_submodules(&self, repo_root: &Path) -> Result<Vec<Submodule>> {
        let repo = Repository::open(repo_root)?;
        let index = repo.index()?;
        let mut registered = read_gitmodules(repo_root);
        let mut submodules: Vec<Submodule> = Vec::new();

        for entry in index.iter() {
            if entry.mode & 0o170000 != GITLINK_MODE {
                continue;
            }

            let path = bytes_to_path(&entry.path);
            if submodules.last().is_some_and(|last| last.path == path) {
                continue;
            }

            let (name, url) = registered.remove(&path).unwrap_or_default();
            submodules.push(Submodule {
                path,
                revision: entry.id.to_string(),
                name,
                url,
            });
        }

        debug!("found {} submodules", submodules.len());
        Ok(submodules)
    }

    fn resolve_revision(&self, repo_root: &Path, rev: &str) -> Result<String> {
        let repo = Repository::open(repo_root)?;
        let invalid = |error: git2::Error| BackendError::InvalidRevision {
            rev: rev.to_string(),
            message: error.message().to_string(),
        };

        let object = repo.revparse_single(rev).map_err(invalid)?;
        object.peel_to_tree().map_err(invalid)?;

        Ok(object.id().to_string())
    }

    fn head_revision(&self, repo_root: &Path) -> Result<Option<String>> {
        let repo = Repository::open(repo_root)?;
        let head = match repo.head() {
            Ok(head) => head,
            Err(error)
                if matches!(error.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) =>
            {
                return Ok(None);
            }
            Err(error) => return Err(error.into()),
        };

        let id = head.peel_to_commit()?.id().to_string();
        Ok(Some(id))
    }

    #[instrument(skip(self, paths), level = "debug")]
    fn raw_diff(
        &self,
        repo_root: &Path,
        from: &str,
        to: DiffTarget<'_>,
        paths: &[PathBuf],
        options: &RawDiffOptions,
    ) -> Result<Vec<RawDiffLine>> {
        let mut args: Vec<OsString> = vec![
            "diff".into(),
            "--raw".into(),
            "-z".into(),
            "--no-abbrev".into(),
            "--no-color".into(),
            "--no-ext-diff".into(),
            "--no-textconv".into(),
            format!("--ignore-submodules={}", options.ignore_submodules.as_str()).into(),
        ];

        if options.detect_renames {
            args.push("--find-renames".into());
        } else {
            args.push("--no-renames".into());
        }

        match to {
            DiffTarget::Revision(to) => args.extend([from.into(), to.into()]),
            DiffTarget::Index => args.extend(["--cached".into(), from.into()]),
            DiffTarget::WorkTree => args.push(from.into()),
        }

        args.push("--".into());
        args.extend(paths.iter().map(|path| path.as_os_str().to_os_string()));

        let output = self.gitcall_non_interactive(repo_root, args)?;
        let lines = parse_raw_diff(&output)?;
        debug!("raw diff reported {} records", lines.len());

        Ok(lines)
    }

    #[instrument(skip(self, paths), level = "debug")]
    fn list_untracked(
        &self,
        repo_root: &Path,
        paths: &[PathBuf],
        collapse_directories: bool,
    ) -> Result<Vec<UntrackedEntry>> {
        let mut args: Vec<OsString> = vec![
            "ls-files".into(),
            "-z".into(),
            "--others".into(),
            "--exclude-standard".into(),
        ];

        if collapse_directories {
            args.extend(["--directory".into(), "--no-empty-directory".into()]);
        }

        args.push("--".into());
        args.extend(paths.iter().map(|path| path.as_os_str().to_os_string()));

        let output = self.gitcall_non_interactive(repo_root, args)?;
        let entries = output
            .split(|byte| *byte == 0)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.strip_suffix(b"/") {
                Some(dir) => UntrackedEntry {
                    path: bytes_to_path(dir),
                    is_dir: true,
                },
                None => UntrackedEntry {
                    path: bytes_to_path(entry),
                    is_dir: false,
                },
            })
            .collect();

        Ok(entries)
    }

    fn list_tracked(&self, repo_root: &Path, target: DiffTarget<'_>) -> Result<Vec<TrackedEntry>> {
        let repo = Repository::open(repo_root)?;
        match target {
            DiffTarget::Revision(rev) => self.list_tree_entries(&repo, rev),
            DiffTarget::Index | DiffTarget::WorkTree => self.list_index_entries(&repo),
        }
    }

    fn is_annex(&self, repo_root: &Path) -> bool {
        let Ok(repo) = Repository::open(repo_root) else {
            return false;
        };

        let has_branch = repo.find_branch("git-annex", BranchType::Local).is_ok();
        repo.path().join("annex").is_dir() || has_branch
    }

    #[instrument(skip(self, paths), level = "debug")]
    fn annex_content_info(
        &self,
        repo_root: &Path,
        paths: &[PathBuf],
    ) -> Result<Option<BTreeMap<PathBuf, AnnexInfo>>> {
        if !self.is_annex(repo_root) {
            return Ok(None);
        }

        let mut info = BTreeMap::new();
        for path in paths {
            let full_path = repo_root.join(path);
            let Ok(metadata) = fs::symlink_metadata(&full_path) else {
                continue;
            };

            let found = if metadata.file_type().is_symlink() {
                fs::read_link(&full_path)
                    .ok()
                    .and_then(AnnexKey::from_symlink_target)
                    .map(|key| AnnexInfo { key, locked: true })
            } else if metadata.is_file() && metadata.len() <= MAX_POINTER_SIZE {
                fs::read(&full_path)
                    .ok()
                    .and_then(|content| AnnexKey::from_pointer(&content))
                    .map(|key| AnnexInfo { key, locked: false })
            } else {
                None
            };

            if let Some(found) = found {
                info.insert(path.clone(), found);
            }
        }

        Ok(Some(info))
    }

    fn blob_annex_key(&self, repo_root: &Path, mode: u32, id: &str) -> Result<Option<AnnexKey>> {
        let repo = Repository::open(repo_root)?;
        let blob = match repo.find_blob(Oid::from_str(id)?) {
            Ok(blob) => blob,
            Err(error) if error.code() == ErrorCode::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };

        Ok(AnnexKey::from_blob(mode, blob.content()))
    }

    fn blob_size(&self, repo_root: &Path, id: &str) -> Result<Option<u64>> {
        let repo = Repository::open(repo_root)?;
        let size = match repo.find_blob(Oid::from_str(id)?) {
            Ok(blob) => Some(blob.size() as u64),
            Err(error) if error.code() == ErrorCode::NotFound => None,
            Err(error) => return Err(error.into()),
        };

        Ok(size)
    }
}

fn same_directory(a: &Path, b: &Path) -> bool {
    if normalize(a) == normalize(b) {
        return true;
    }

    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Read submodule names and URLs from `.gitmodules`, keyed by mount point.
fn read_gitmodules(repo_root: &Path) -> BTreeMap<PathBuf, (Option<String>, Option<String>)> {
    let mut registered = BTreeMap::new();
    let gitmodules = repo_root.join(".gitmodules");
    if !gitmodules.is_file() {
        return registered;
    }

    let config = match git2::Config::open(&gitmodules) {
        Ok(config) => config,
        Err(error) => {
            warn!("cannot read {:?}: {}", gitmodules.display(), error.message());
            return registered;
        }
    };

    let mut entries = match config.entries(Some(r"submodule\..*\.path")) {
        Ok(entries) => entries,
        Err(error) => {
            warn!("cannot list {:?}: {}", gitmodules.display(), error.message());
            return registered;
        }
    };

    let mut names = Vec::new();
    while let Some(entry) = entries.next() {
        let Ok(entry) = entry else {
            continue;
        };

        let name = entry
            .name()
            .and_then(|name| name.strip_prefix("submodule."))
            .and_then(|name| name.strip_suffix(".path"))
            .map(str::to_owned);

        if let (Some(name), Some(path)) = (name, entry.value()) {
            names.push((name, normalize(path)));
        }
    }

    for (name, path) in names {
        let url = config.get_string(&format!("submodule.{name}.url")).ok();
        registered.insert(path, (Some(name), url));
    }

    registered
}

fn syscall_non_interactive(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
) -> Result<Vec<u8>> {
    let output = Command::new(cmd.as_ref())
        .args(args)
        .env("GIT_LITERAL_PATHSPECS", "1")
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();

        // INVARIANT: Chomp trailing newlines.
        let message = stderr
            .strip_suffix("\r\n")
            .or(stderr.strip_suffix('\n'))
            .map(ToString::to_string)
            .unwrap_or(stderr);

        return Err(BackendError::Syscall(std::io::Error::other(format!(
            "command {:?} failed:\n{message}",
            cmd.as_ref()
        ))));
    }

    Ok(output.stdout)
}

/// All possible error types for backend queries.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Tree-ish expression cannot be resolved.
    #[error("invalid revision {rev:?}: {message}")]
    InvalidRevision { rev: String, message: String },

    /// Raw diff output cannot be parsed.
    #[error(transparent)]
    RawDiff(#[from] RawDiffError),

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),

    /// Calls to Git binary fail.
    #[error(transparent)]
    Syscall(#[from] std::io::Error),
}

/// Friendly result alias :3
pub type Result<T, E = BackendError> = std::result::Result<T, E>;
