// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path annotation engine.
//!
//! Turn whatever paths a caller hands over into annotated [`PathRecord`]s:
//! absolute and normalized, deduplicated, typed, and attributed to the
//! dataset that owns them. Paths can be relative, carry trailing separators,
//! cross dataset boundaries, or point into subdatasets that are not even
//! installed.
//!
//! # Reference Dataset
//!
//! Annotation is anchored to an optional __reference dataset__. Relative
//! paths resolve against it, and paths outside of it are foreign. Foreign
//! paths, and paths that belong to no dataset at all, come out with a result
//! status chosen by the caller. Strict commands want an error, speculative
//! queries get away with `impossible`.
//!
//! # Uninstalled Subdatasets
//!
//! A registered subdataset whose mount point is missing, or just an empty
//! directory, is still a dataset. It is reported with type `dataset` and
//! state `absent`, never as a missing directory.
//!
//! # Recursion
//!
//! With recursion, every annotated dataset is followed by the subdatasets
//! underneath it, and every annotated directory by the subdatasets of its
//! dataset that live inside it. Parents always come before their children.
//!
//! # Modifications
//!
//! Annotation can be narrowed down to what changed since some revision.
//! Resolved paths are then handed to the [`ModificationFilter`], and only
//! what it reports comes out.

use crate::{
    backend::{BackendError, RepoBackend},
    config::EngineConfig,
    diff::DiffError,
    locate::DatasetLocator,
    modified::{ModificationFilter, ModifiedPaths, RevisionSpec},
    path::{
        is_at_or_under, is_under, normalize, requests_content, resolve_against,
        resolve_against_cwd,
    },
    record::{ContentState, Message, PathRecord, PathType, ResultStatus},
    subdatasets::{SubdatasetRecord, SubdatasetRegistry, Subdatasets},
};

use std::{
    collections::{HashMap, HashSet, VecDeque},
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

/// Path handed to the annotator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathInput {
    /// Path exactly as the caller wrote it.
    Raw(String),

    /// Partially annotated record, fields already set are kept.
    Annotated(PathRecord),
}

impl From<&str> for PathInput {
    fn from(path: &str) -> Self {
        Self::Raw(path.to_string())
    }
}

impl From<String> for PathInput {
    fn from(path: String) -> Self {
        Self::Raw(path)
    }
}

impl From<&Path> for PathInput {
    fn from(path: &Path) -> Self {
        Self::Raw(path.to_string_lossy().into_owned())
    }
}

impl From<PathBuf> for PathInput {
    fn from(path: PathBuf) -> Self {
        Self::from(path.as_path())
    }
}

impl From<PathRecord> for PathInput {
    fn from(record: PathRecord) -> Self {
        Self::Annotated(record)
    }
}

/// Everything needed for one annotation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotateRequest {
    pub paths: Vec<PathInput>,
    pub refds: Option<PathBuf>,
    pub recursive: bool,

    /// `None` or below zero means no limit, `Some(0)` means no recursion.
    pub recursion_limit: Option<i32>,

    /// Status for paths that do not exist and are no known subdataset.
    pub unavailable_path_status: Option<ResultStatus>,
    pub unavailable_path_msg: Option<Message>,

    /// Status for foreign paths and paths outside any dataset.
    pub nondataset_path_status: Option<ResultStatus>,

    /// Look up parents of dataset paths, even outside the reference dataset.
    pub force_parentds_discovery: bool,

    /// Check parent registrations to classify subdataset paths.
    pub force_subds_discovery: bool,

    /// Only report what changed.
    pub modified: Option<RevisionSpec>,
}

impl AnnotateRequest {
    /// Construct new request.
    ///
    /// There is no universal answer to how bad a path that does not exist
    /// is, so callers always have to pick `unavailable_path_status`.
    pub fn new(
        paths: impl IntoIterator<Item = impl Into<PathInput>>,
        unavailable_path_status: Option<ResultStatus>,
    ) -> Self {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            refds: None,
            recursive: false,
            recursion_limit: None,
            unavailable_path_status,
            unavailable_path_msg: None,
            nondataset_path_status: Some(ResultStatus::Error),
            force_parentds_discovery: true,
            force_subds_discovery: true,
            modified: None,
        }
    }

    pub fn refds(mut self, refds: impl Into<PathBuf>) -> Self {
        self.refds = Some(refds.into());
        self
    }

    pub fn recursive(mut self, recursive: bool, recursion_limit: Option<i32>) -> Self {
        self.recursive = recursive;
        self.recursion_limit = recursion_limit;
        self
    }

    pub fn unavailable_path_msg(mut self, message: impl Into<Message>) -> Self {
        self.unavailable_path_msg = Some(message.into());
        self
    }

    pub fn nondataset_path_status(mut self, status: Option<ResultStatus>) -> Self {
        self.nondataset_path_status = status;
        self
    }

    pub fn force_parentds_discovery(mut self, force: bool) -> Self {
        self.force_parentds_discovery = force;
        self
    }

    pub fn force_subds_discovery(mut self, force: bool) -> Self {
        self.force_subds_discovery = force;
        self
    }

    pub fn modified(mut self, since: RevisionSpec) -> Self {
        self.modified = Some(since);
        self
    }

    fn recursion_disabled(&self) -> bool {
        !self.recursive || self.recursion_limit == Some(0)
    }
}

/// Path annotation engine.
#[derive(Debug)]
pub struct PathAnnotator<'a, B>
where
    B: RepoBackend,
{
    backend: &'a B,
    config: &'a EngineConfig,
}

impl<'a, B> PathAnnotator<'a, B>
where
    B: RepoBackend,
{
    /// Construct new annotator.
    pub fn new(backend: &'a B, config: &'a EngineConfig) -> Self {
        Self { backend, config }
    }

    /// Annotate paths of request.
    ///
    /// Nothing happens until the returned iterator is pulled from.
    #[instrument(skip(self, request), level = "debug")]
    pub fn annotate(&self, mut request: AnnotateRequest) -> Annotations<'a, B> {
        let mut failure = None;
        if let Some(refds) = request.refds.take() {
            request.refds = match resolve_against_cwd(&refds) {
                Ok(refds) => Some(refds),
                Err(error) => {
                    failure = Some(AnnotateError::from(error));
                    Some(normalize(refds))
                }
            };
        }
        let inputs = std::mem::take(&mut request.paths).into();

        let mut annotations = Annotations {
            backend: self.backend,
            config: self.config,
            request,
            inputs,
            ready: VecDeque::new(),
            seen: HashSet::new(),
            content_requests: HashMap::new(),
            submodules: HashMap::new(),
            recursion: None,
            filtered: None,
            failure: None,
        };

        // INVARIANT: Nothing gets annotated against a reference dataset that
        // cannot be made absolute.
        if let Some(error) = failure {
            annotations.inputs.clear();
            annotations.request.modified = None;
            annotations.failure = Some(error);
            return annotations;
        }

        annotations.collect_content_requests();
        if annotations.inputs.is_empty() && annotations.request.modified.is_none() {
            if let Some(refds) = annotations.request.refds.clone() {
                annotations.fast_path(&refds);
            }
        }

        annotations
    }
}

/// Lazy stream of annotated paths.
#[derive(Debug)]
pub struct Annotations<'a, B>
where
    B: RepoBackend,
{
    backend: &'a B,
    config: &'a EngineConfig,
    request: AnnotateRequest,
    inputs: VecDeque<PathInput>,
    ready: VecDeque<PathRecord>,
    seen: HashSet<PathBuf>,

    /// First raw input per path that asks for the content of it.
    content_requests: HashMap<PathBuf, String>,

    // INVARIANT: Lives for this annotation run only.
    submodules: HashMap<PathBuf, Vec<SubdatasetRecord>>,

    recursion: Option<Subdatasets<'a, B>>,
    filtered: Option<ModifiedPaths<'a, B>>,
    failure: Option<AnnotateError>,
}

impl<'a, B> Annotations<'a, B>
where
    B: RepoBackend,
{
    /// Reference dataset itself, then all subdatasets below it.
    fn fast_path(&mut self, refds: &Path) {
        debug!("annotate reference dataset {:?} directly", refds.display());
        let mut record = PathRecord::dataset(refds);
        record.refds = Some(refds.to_path_buf());
        self.seen.insert(refds.to_path_buf());

        if !self.backend.is_repo_root(refds) {
            record.path_type = None;
            record.conclude(
                self.request.nondataset_path_status,
                Some("path not associated with any dataset".into()),
            );
            self.ready.push_back(record);
            return;
        }

        self.ready.push_back(record);
        if !self.request.recursion_disabled() {
            self.recursion = Some(SubdatasetRegistry::new(self.backend).list_subdatasets(
                refds,
                true,
                self.request.recursion_limit,
                None,
            ));
        }
    }

    fn collect_content_requests(&mut self) {
        let requests = self
            .inputs
            .iter()
            .filter_map(|input| match input {
                PathInput::Raw(raw) if requests_content(raw) => Some(raw.clone()),
                _ => None,
            })
            .collect::<Vec<_>>();

        for raw in requests {
            if let Ok(path) = self.resolve(&raw) {
                self.content_requests.entry(path).or_insert(raw);
            }
        }
    }

    fn resolve(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        match &self.request.refds {
            Some(refds) => Ok(resolve_against(path, refds)),
            None => Ok(resolve_against_cwd(path)?),
        }
    }

    /// Direct subdatasets of a dataset, listed once per run.
    fn direct_subdatasets(&mut self, dataset: &Path) -> Result<&[SubdatasetRecord]> {
        if !self.submodules.contains_key(dataset) {
            let listed = SubdatasetRegistry::new(self.backend).direct(dataset)?;
            self.submodules.insert(dataset.to_path_buf(), listed);
        }

        Ok(self
            .submodules
            .get(dataset)
            .map(Vec::as_slice)
            .unwrap_or_default())
    }

    /// Annotate a single input, `None` if path was already seen.
    fn annotate_one(&mut self, input: PathInput) -> Result<Option<PathRecord>> {
        let mut record = match input {
            PathInput::Raw(raw) => {
                let mut record = PathRecord::new(self.resolve(&raw)?);
                record.raw_input = true;

                // INVARIANT: Asking for the content of a path wins over
                // asking for the path itself, whichever came first.
                record.orig_request = match self.content_requests.get(&record.path) {
                    Some(content) if !requests_content(&raw) => Some(content.clone()),
                    _ => Some(raw),
                };
                record
            }
            PathInput::Annotated(mut record) => {
                record.path = self.resolve(&record.path)?;
                record
            }
        };

        if !self.seen.insert(record.path.clone()) {
            debug!("skip duplicate {:?}", record.path.display());
            return Ok(None);
        }

        if record.is_terminal() {
            return Ok(Some(record));
        }

        if record.refds.is_none() {
            record.refds = self.request.refds.clone();
        }

        if let Some(refds) = &self.request.refds {
            if !is_at_or_under(&record.path, refds) {
                record.conclude(
                    self.request.nondataset_path_status,
                    Some(Message::template(
                        "path not underneath the reference dataset %s",
                        [refds.to_string_lossy()],
                    )),
                );
                return Ok(Some(record));
            }
        }

        let exists = match fs::symlink_metadata(&record.path) {
            Ok(metadata) => {
                if record.path_type.is_none() {
                    // INVARIANT: Symlinks count as files, even if they point
                    // to a directory.
                    record.path_type = Some(if !metadata.is_dir() {
                        PathType::File
                    } else if self.backend.is_repo_root(&record.path) {
                        PathType::Dataset
                    } else {
                        PathType::Directory
                    });
                }
                true
            }
            Err(_) => {
                if record.state.is_none() {
                    record.state = Some(ContentState::Absent);
                }
                false
            }
        };

        if record.parentds.is_none() {
            record.parentds = self.discover_parentds(&record);
        }

        let Some(parentds) = record.parentds.clone() else {
            if !record.is_dataset() {
                record.conclude(
                    self.request.nondataset_path_status,
                    Some("path not associated with any dataset".into()),
                );
            }
            return Ok(Some(record));
        };

        if self.request.force_subds_discovery && record.path_type != Some(PathType::File) {
            self.classify_subdataset(&mut record, &parentds)?;
        }

        if !exists && record.registered_subds != Some(true) {
            let message = self
                .request
                .unavailable_path_msg
                .clone()
                .or_else(|| {
                    self.request
                        .unavailable_path_status
                        .map(|_| Message::from("path does not exist"))
                });
            record.conclude(self.request.unavailable_path_status, message);
        }

        Ok(Some(record))
    }

    fn discover_parentds(&self, record: &PathRecord) -> Option<PathBuf> {
        let locator = DatasetLocator::new(self.backend);
        let refds = self.request.refds.as_deref();

        if !record.is_dataset() {
            return locator.find_dataset_root(&record.path);
        }

        let inside_refds = refds.is_some_and(|refds| is_under(&record.path, refds));
        if self.request.force_parentds_discovery || inside_refds {
            locator.find_parent(&record.path, refds)
        } else {
            None
        }
    }

    /// Match path against the registrations of its parent.
    fn classify_subdataset(&mut self, record: &mut PathRecord, parentds: &Path) -> Result<()> {
        let registration = self
            .direct_subdatasets(parentds)?
            .iter()
            .find(|sub| sub.path == record.path)
            .cloned();

        match registration {
            Some(sub) => {
                record.registered_subds = Some(true);
                record.revision = Some(sub.revision);
                if !sub.installed {
                    debug!("{:?} is an uninstalled subdataset", record.path.display());
                    record.path_type = Some(PathType::Dataset);
                    record.state = Some(ContentState::Absent);
                }
            }
            None if record.is_dataset() => record.registered_subds = Some(false),
            None => {}
        }

        Ok(())
    }

    /// Queue subdatasets underneath a freshly annotated record.
    fn schedule_recursion(&mut self, record: &PathRecord) {
        if self.request.recursion_disabled() || record.is_terminal() {
            return;
        }

        let registry = SubdatasetRegistry::new(self.backend);
        let limit = self.request.recursion_limit;
        self.recursion = match (record.path_type, &record.parentds) {
            (Some(PathType::Dataset), _) if record.state != Some(ContentState::Absent) => {
                Some(registry.list_subdatasets(&record.path, true, limit, None))
            }
            (Some(PathType::Directory), Some(parentds)) => Some(
                registry
                    .list_subdatasets(parentds, true, limit, None)
                    .within(&record.path),
            ),
            _ => None,
        };
    }

    /// Annotate all inputs and narrow them down to modifications.
    fn start_filter(&mut self, since: RevisionSpec) -> Result<()> {
        let mut candidates = Vec::new();
        if self.inputs.is_empty() {
            if let Some(refds) = self.request.refds.clone() {
                self.inputs.push_back(PathInput::Raw(refds.to_string_lossy().into_owned()));
            }
        }

        while let Some(input) = self.inputs.pop_front() {
            if let Some(record) = self.annotate_one(input)? {
                candidates.push(record);
            }
        }

        let Some(refds) = self.request.refds.clone() else {
            for mut candidate in candidates {
                if !candidate.is_terminal() {
                    candidate.conclude(
                        Some(ResultStatus::Impossible),
                        Some(Message::template(
                            "cannot determine modifications since %s without a reference dataset",
                            [since.to_string()],
                        )),
                    );
                }
                self.ready.push_back(candidate);
            }
            return Ok(());
        };

        let filter = ModificationFilter::new(self.backend, self.config)
            .recursive(self.request.recursive, self.request.recursion_limit);
        self.filtered = Some(filter.filter_modified(candidates, &refds, Some(&since)));

        Ok(())
    }
}

impl<B> Iterator for Annotations<'_, B>
where
    B: RepoBackend,
{
    type Item = Result<PathRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(error) = self.failure.take() {
            return Some(Err(error));
        }

        if let Some(since) = self.request.modified.take() {
            if let Err(error) = self.start_filter(since) {
                return Some(Err(error));
            }
        }

        loop {
            if let Some(record) = self.ready.pop_front() {
                return Some(Ok(record));
            }

            if let Some(filtered) = self.filtered.as_mut() {
                return filtered.next().map(|item| item.map_err(Into::into));
            }

            if let Some(recursion) = self.recursion.as_mut() {
                match recursion.next() {
                    Some(Ok(sub)) => {
                        if self.seen.insert(sub.path.clone()) {
                            return Some(Ok(sub.into_record(self.request.refds.as_deref())));
                        }
                        continue;
                    }
                    Some(Err(error)) => return Some(Err(error.into())),
                    None => self.recursion = None,
                }
            }

            let input = self.inputs.pop_front()?;
            match self.annotate_one(input) {
                Ok(Some(record)) => {
                    self.schedule_recursion(&record);
                    return Some(Ok(record));
                }
                Ok(None) => continue,
                Err(error) => return Some(Err(error)),
            }
        }
    }
}

/// All possible error types for path annotation.
#[derive(Debug, thiserror::Error)]
pub enum AnnotateError {
    /// Current working directory cannot be read to resolve relative paths.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Repository queries fail.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Modification filtering fails.
    #[error(transparent)]
    Diff(#[from] DiffError),
}

/// Friendly result alias :3
pub type Result<T, E = AnnotateError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn request_defaults() {
        let request = AnnotateRequest::new(["sub", "file"], None);
        assert_eq!(
            request.paths,
            vec![PathInput::Raw("sub".into()), PathInput::Raw("file".into())]
        );
        assert_eq!(request.nondataset_path_status, Some(ResultStatus::Error));
        assert!(request.force_parentds_discovery);
        assert!(request.force_subds_discovery);
        assert!(request.recursion_disabled());
    }

    #[test]
    fn zero_recursion_limit_disables_recursion() {
        let request = AnnotateRequest::new(Vec::<String>::new(), None).recursive(true, Some(0));
        assert!(request.recursion_disabled());

        let request = AnnotateRequest::new(Vec::<String>::new(), None).recursive(true, Some(-1));
        assert!(!request.recursion_disabled());
    }

    #[test]
    fn path_inputs_from_paths_and_records() {
        assert_eq!(
            PathInput::from(PathBuf::from("/data/super")),
            PathInput::Raw("/data/super".into())
        );

        let record = PathRecord::dataset("/data/super");
        assert_eq!(PathInput::from(record.clone()), PathInput::Annotated(record));
    }
}
