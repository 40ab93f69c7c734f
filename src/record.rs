// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Annotated path records.
//!
//! A [`PathRecord`] is the unit of information flowing through the engine.
//! It starts life as a bare path, gets progressively filled in while being
//! annotated, and is frozen once it carries a [`ResultStatus`].
//!
//! # Content State vs. Result Status
//!
//! Two different questions get answered per record. The __content state__
//! says how the path relates to some comparison point: was it added,
//! modified, is it absent? The __result status__ says how an operation
//! fared on the path: did it succeed, was it impossible? A clean file that
//! lives outside the reference dataset has a perfectly fine content state,
//! and still an `error` result status.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
    str::FromStr,
};

/// Nature of an annotated path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PathType {
    File,
    Directory,
    Dataset,
    Symlink,
}

impl PathType {
    /// Infer type from a Git tree entry mode.
    ///
    /// Returns `None` for the null mode of a nonexistent side.
    pub fn from_git_mode(mode: u32) -> Option<Self> {
        match mode & 0o170000 {
            0o100000 => Some(Self::File),
            0o120000 => Some(Self::Symlink),
            0o160000 => Some(Self::Dataset),
            0o040000 => Some(Self::Directory),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
            Self::Dataset => "dataset",
            Self::Symlink => "symlink",
        }
    }
}

impl Display for PathType {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

/// Content state of a path relative to a comparison point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentState {
    Clean,
    Added,
    Modified,
    Deleted,
    Renamed,
    Typechange,
    Untracked,
    /// Known to a dataset, but nothing exists on disk.
    Absent,
    Unmerged,
}

impl ContentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Renamed => "renamed",
            Self::Typechange => "typechange",
            Self::Untracked => "untracked",
            Self::Absent => "absent",
            Self::Unmerged => "unmerged",
        }
    }
}

impl Display for ContentState {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

/// Outcome of an operation on a path.
///
/// An unprocessed record simply has no status, so every variant here is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Ok,
    NotNeeded,
    Impossible,
    Error,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::NotNeeded => "notneeded",
            Self::Impossible => "impossible",
            Self::Error => "error",
        }
    }

    /// Whether status should surface as a visible failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Impossible | Self::Error)
    }
}

impl Display for ResultStatus {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_str())
    }
}

impl FromStr for ResultStatus {
    type Err = UnknownStatus;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        match data {
            "ok" => Ok(Self::Ok),
            "notneeded" => Ok(Self::NotNeeded),
            "impossible" => Ok(Self::Impossible),
            "error" => Ok(Self::Error),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Result status label is not recognized.
#[derive(Clone, Debug, thiserror::Error)]
#[error("unknown result status {0:?}")]
pub struct UnknownStatus(pub String);

/// Human-readable explanation attached to a record.
///
/// Templated messages keep their arguments apart so consumers can render or
/// translate them however they like. Each `%s` in the template is replaced
/// by the next argument on display.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Message {
    Plain(String),
    Template { template: String, args: Vec<String> },
}

impl Message {
    pub fn template(
        template: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self::Template {
            template: template.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl Display for Message {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Plain(text) => fmt.write_str(text),
            Self::Template { template, args } => {
                let mut args = args.iter();
                let mut pieces = template.split("%s").peekable();
                while let Some(piece) = pieces.next() {
                    fmt.write_str(piece)?;
                    if pieces.peek().is_some() {
                        fmt.write_str(args.next().map(String::as_str).unwrap_or("%s"))?;
                    }
                }

                Ok(())
            }
        }
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::Plain(text.to_string())
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::Plain(text)
    }
}

/// Annotated path.
///
/// # Invariants
///
/// - `path` is absolute and never carries a trailing separator.
/// - A record with a `status` is final, and is never modified again.
/// - `revision` and `revision_src` are only set for dataset records that
///   describe a subdataset registration inside `parentds`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PathRecord {
    pub path: PathBuf,

    /// Nature of the path, `None` while unknown.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub path_type: Option<PathType>,

    /// Content state, `None` while not yet evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ContentState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parentds: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refds: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_src: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_subds: Option<bool>,

    #[serde(default)]
    pub raw_input: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orig_request: Option<String>,

    /// Operate on dataset content rather than on its registration.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub process_content: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ResultStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gitshasum: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_gitshasum: Option<String>,

    /// Source path of a rename or copy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_path: Option<PathBuf>,

    /// Rename or copy similarity in percent, as reported by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytesize: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annex_key: Option<String>,
}

impl PathRecord {
    /// Construct bare record for a path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            path_type: None,
            state: None,
            parentds: None,
            refds: None,
            revision: None,
            revision_src: None,
            registered_subds: None,
            raw_input: false,
            orig_request: None,
            process_content: false,
            status: None,
            message: None,
            gitshasum: None,
            prev_gitshasum: None,
            prev_path: None,
            similarity: None,
            bytesize: None,
            annex_key: None,
        }
    }

    /// Construct record for a dataset root.
    pub fn dataset(path: impl Into<PathBuf>) -> Self {
        let mut record = Self::new(path);
        record.path_type = Some(PathType::Dataset);
        record
    }

    /// Whether record already carries a final result status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_some()
    }

    pub fn is_dataset(&self) -> bool {
        self.path_type == Some(PathType::Dataset)
    }

    /// Finalize record with a result status and message.
    ///
    /// A `None` status leaves the record open, but still attaches the
    /// message when one is given.
    pub fn conclude(&mut self, status: Option<ResultStatus>, message: Option<Message>) {
        self.status = status;
        if message.is_some() {
            self.message = message;
        }
    }
}

impl Display for PathRecord {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(
            fmt,
            "{} {}",
            self.status.map(|s| s.as_str()).unwrap_or("-"),
            self.path.display()
        )?;

        if let Some(path_type) = self.path_type {
            write!(fmt, " ({path_type})")?;
        }

        if let Some(state) = self.state {
            write!(fmt, " [{state}]")?;
        }

        if let Some(message) = &self.message {
            write!(fmt, " {message}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test_case(0o100644, Some(PathType::File); "regular file")]
    #[test_case(0o100755, Some(PathType::File); "executable file")]
    #[test_case(0o120000, Some(PathType::Symlink); "symlink")]
    #[test_case(0o160000, Some(PathType::Dataset); "gitlink")]
    #[test_case(0o040000, Some(PathType::Directory); "tree")]
    #[test_case(0, None; "null mode")]
    #[test]
    fn type_from_git_mode(mode: u32, expect: Option<PathType>) {
        pretty_assertions::assert_eq!(PathType::from_git_mode(mode), expect);
    }

    #[test]
    fn render_templated_message() {
        let message = Message::template("path not underneath %s, see %s", ["/data", "docs"]);
        assert_eq!(message.to_string(), "path not underneath /data, see docs");

        let message = Message::template("missing %s and %s", ["one"]);
        assert_eq!(message.to_string(), "missing one and %s");
    }

    #[test]
    fn serialize_record_skips_unset_fields() -> anyhow::Result<()> {
        let mut record = PathRecord::dataset("/data/super/sub");
        record.state = Some(ContentState::Absent);
        record.parentds = Some("/data/super".into());
        record.registered_subds = Some(true);

        let result = serde_json::to_string(&record)?;
        let expect = concat!(
            r#"{"path":"/data/super/sub","type":"dataset","state":"absent","#,
            r#""parentds":"/data/super","registered_subds":true,"raw_input":false}"#,
        );
        assert_eq!(result, expect);

        let back: PathRecord = serde_json::from_str(&result)?;
        assert_eq!(back, record);

        Ok(())
    }

    #[test]
    fn parse_result_status() {
        assert_eq!("notneeded".parse::<ResultStatus>().ok(), Some(ResultStatus::NotNeeded));
        assert!("bogus".parse::<ResultStatus>().is_err());
        assert!(ResultStatus::Impossible.is_failure());
        assert!(!ResultStatus::Ok.is_failure());
    }
}
