// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Grouping of annotated paths by owning dataset.
//!
//! Commands mostly work one dataset at a time. The grouper takes a stream of
//! annotated paths and sorts them into per-dataset buckets. A dataset record
//! can land in two buckets at once: its own, for work on its content, and its
//! parent's, for work on its registration. Both are needed to answer "what
//! do I do inside dataset X" and "what changed in the parent of X because X
//! changed" from one annotated stream.

use crate::{
    path::{is_at_or_under, requests_content},
    record::PathRecord,
};

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
};

/// Records bucketed by dataset path, in first-seen order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DatasetBuckets {
    order: Vec<PathBuf>,
    buckets: HashMap<PathBuf, Vec<PathRecord>>,
}

impl DatasetBuckets {
    pub fn push(&mut self, dataset: impl Into<PathBuf>, record: PathRecord) {
        let dataset = dataset.into();
        if !self.buckets.contains_key(&dataset) {
            self.order.push(dataset.clone());
        }
        self.buckets.entry(dataset).or_default().push(record);
    }

    pub fn get(&self, dataset: impl AsRef<Path>) -> Option<&[PathRecord]> {
        self.buckets.get(dataset.as_ref()).map(Vec::as_slice)
    }

    /// Dataset paths in first-seen order.
    pub fn datasets(&self) -> impl Iterator<Item = &Path> + '_ {
        self.order.iter().map(PathBuf::as_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &[PathRecord])> + '_ {
        self.order
            .iter()
            .filter_map(|dataset| Some((dataset.as_path(), self.get(dataset)?)))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Annotated paths sorted by owning dataset.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Grouped {
    /// Unfinished records per dataset.
    pub content_by_ds: DatasetBuckets,

    /// First record seen for each dataset path.
    pub ds_props: BTreeMap<PathBuf, PathRecord>,

    /// Records that already carry a result status.
    pub completed: Vec<PathRecord>,

    /// Records without any owning dataset.
    pub nondataset: Vec<PathRecord>,
}

/// Sort annotated paths into per-dataset buckets.
///
/// Records with a result status are passed through into `completed`
/// untouched. A dataset record goes into its own bucket when it has no
/// parent, there is no reference dataset, its content is to be processed, or
/// the original request asked for "the content of" it with a trailing
/// separator. It additionally goes into the bucket of its parent when that
/// parent lies within the reference dataset. Everything else goes into the
/// bucket of its parent.
pub fn group_by_dataset(
    records: impl IntoIterator<Item = PathRecord>,
    refds: Option<&Path>,
) -> Grouped {
    let mut grouped = Grouped::default();

    for record in records {
        if record.is_terminal() {
            grouped.completed.push(record);
            continue;
        }

        if record.is_dataset() {
            grouped
                .ds_props
                .entry(record.path.clone())
                .or_insert_with(|| record.clone());

            let own = record.parentds.is_none()
                || refds.is_none()
                || record.process_content
                || record.orig_request.as_deref().is_some_and(requests_content);

            let in_parent = match (&record.parentds, refds) {
                (Some(parentds), Some(refds)) => is_at_or_under(parentds, refds),
                _ => false,
            };

            // INVARIANT: A dataset record never gets lost. Without a parent
            // bucket to go into, it goes into its own.
            if own || !in_parent {
                grouped.content_by_ds.push(record.path.clone(), record.clone());
            }

            if in_parent {
                if let Some(parentds) = record.parentds.clone() {
                    grouped.content_by_ds.push(parentds, record);
                }
            }

            continue;
        }

        match record.parentds.clone() {
            Some(parentds) => grouped.content_by_ds.push(parentds, record),
            None => grouped.nondataset.push(record),
        }
    }

    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{PathType, ResultStatus};
    use pretty_assertions::assert_eq;

    fn file(path: &str, parentds: &str) -> PathRecord {
        let mut record = PathRecord::new(path);
        record.path_type = Some(PathType::File);
        record.parentds = Some(parentds.into());
        record
    }

    fn dataset(path: &str, parentds: Option<&str>) -> PathRecord {
        let mut record = PathRecord::dataset(path);
        record.parentds = parentds.map(PathBuf::from);
        record
    }

    fn paths(records: Option<&[PathRecord]>) -> Vec<PathBuf> {
        records
            .unwrap_or_default()
            .iter()
            .map(|record| record.path.clone())
            .collect()
    }

    #[test]
    fn terminal_records_are_completed() {
        let mut failed = PathRecord::new("/elsewhere");
        failed.conclude(Some(ResultStatus::Error), Some("path not associated with any dataset".into()));

        let grouped = group_by_dataset([failed.clone()], Some(Path::new("/super")));
        assert_eq!(grouped.completed, vec![failed]);
        assert!(grouped.content_by_ds.is_empty());
        assert!(grouped.nondataset.is_empty());
    }

    #[test]
    fn subdataset_goes_into_parent_bucket_only() {
        let grouped = group_by_dataset(
            [
                dataset("/super", None),
                file("/super/file", "/super"),
                dataset("/super/sub", Some("/super")),
            ],
            Some(Path::new("/super")),
        );

        assert_eq!(
            grouped.content_by_ds.datasets().collect::<Vec<_>>(),
            vec![Path::new("/super")]
        );
        assert_eq!(
            paths(grouped.content_by_ds.get("/super")),
            vec![
                PathBuf::from("/super"),
                PathBuf::from("/super/file"),
                PathBuf::from("/super/sub")
            ]
        );
        assert_eq!(grouped.ds_props.len(), 2);
    }

    #[test]
    fn content_request_puts_dataset_into_both_buckets() {
        let mut sub = dataset("/super/sub", Some("/super"));
        sub.orig_request = Some("sub/".into());

        let grouped = group_by_dataset([sub], Some(Path::new("/super")));
        assert_eq!(
            grouped.content_by_ds.datasets().collect::<Vec<_>>(),
            vec![Path::new("/super/sub"), Path::new("/super")]
        );

        let mut sub = dataset("/super/sub", Some("/super"));
        sub.process_content = true;
        let grouped = group_by_dataset([sub], Some(Path::new("/super")));
        assert_eq!(grouped.content_by_ds.len(), 2);
    }

    #[test]
    fn without_refds_datasets_get_own_bucket() {
        let grouped = group_by_dataset(
            [dataset("/super/sub", Some("/super")), file("/super/sub/file", "/super/sub")],
            None,
        );

        assert_eq!(
            paths(grouped.content_by_ds.get("/super/sub")),
            vec![PathBuf::from("/super/sub"), PathBuf::from("/super/sub/file")]
        );
        assert_eq!(grouped.content_by_ds.get("/super"), None);
    }

    #[test]
    fn orphans_are_nondataset() {
        let grouped = group_by_dataset([PathRecord::new("/tmp/loose")], None);
        assert_eq!(grouped.nondataset, vec![PathRecord::new("/tmp/loose")]);
    }

    #[test]
    fn first_dataset_record_wins_props() {
        let mut first = dataset("/super/sub", Some("/super"));
        first.revision = Some("a".repeat(40));
        let mut second = first.clone();
        second.revision = Some("b".repeat(40));

        let grouped = group_by_dataset([first, second], Some(Path::new("/super")));
        assert_eq!(
            grouped.ds_props[Path::new("/super/sub")].revision,
            Some("a".repeat(40))
        );
    }
}
