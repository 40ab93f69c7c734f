// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path annotation and diffing across nested datasets.
//!
//! A __dataset__ is a Git repository, optionally carrying git-annex content,
//! managed as one addressable unit. Datasets nest: a superdataset registers
//! its subdatasets as Git submodules, which may or may not be installed on
//! disk at any given time.
//!
//! # Workflow
//!
//! A caller usually goes through these steps:
//!
//! 1. Annotate raw paths with [`PathAnnotator`], getting back typed records
//!    that know which dataset owns them.
//! 2. Sort records per owning dataset with [`group_by_dataset`].
//! 3. Compare each dataset with [`DiffEngine`], or narrow paths down to what
//!    changed with [`ModificationFilter`].
//!
//! Everything streams lazily, so work on the first dataset of a recursive
//! walk can start before the whole hierarchy has been visited. All
//! repository access goes through the [`RepoBackend`] trait, and all tunable
//! behavior through an explicit [`EngineConfig`].

pub mod annex;
pub mod annotate;
pub mod backend;
pub mod config;
pub mod diff;
pub mod group;
pub mod locate;
pub mod modified;
pub mod path;
pub mod record;
pub mod subdatasets;

pub use annotate::{AnnotateRequest, Annotations, PathAnnotator, PathInput};
pub use backend::{Git2Backend, RepoBackend};
pub use config::EngineConfig;
pub use diff::{DiffEngine, DiffEntry, DiffOutcome, DiffRequest, IgnoreSubdatasets, UntrackedMode};
pub use group::{group_by_dataset, Grouped};
pub use locate::DatasetLocator;
pub use modified::{ModificationFilter, ModifiedPaths, RevisionSpec};
pub use record::{ContentState, Message, PathRecord, PathType, ResultStatus};
pub use subdatasets::{SubdatasetRecord, SubdatasetRegistry, Subdatasets};
