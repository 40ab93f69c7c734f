// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Raw diff record codec.
//!
//! Git's raw diff format with NUL termination (`git diff --raw -z`) is the
//! one bit-exact contract the engine relies on. Each record looks like this:
//!
//! ```text
//! :<srcmode> SP <dstmode> SP <srcsha> SP <dstsha> SP <status>[<score>] NUL
//! <path> NUL [<dstpath> NUL]
//! ```
//!
//! Modes are octal. A null mode or an all-zero id marks a side that does
//! not exist, or whose content Git did not bother to hash (working tree).
//! Renames and copies carry a similarity score, and list both source and
//! destination paths.
//!
//! # See Also
//!
//! - [Man page git-diff, raw output format](https://git-scm.com/docs/git-diff#_raw_output_format)

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

/// Object id that Git uses for a missing or unhashed side.
pub const NULL_SHA: &str = "0000000000000000000000000000000000000000";

/// Single-letter change code of a raw diff record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawStatus {
    Added,
    Copied,
    Deleted,
    Modified,
    Renamed,
    TypeChanged,
    Unmerged,
    Unknown,
}

impl RawStatus {
    fn from_letter(letter: u8) -> Option<Self> {
        match letter {
            b'A' => Some(Self::Added),
            b'C' => Some(Self::Copied),
            b'D' => Some(Self::Deleted),
            b'M' => Some(Self::Modified),
            b'R' => Some(Self::Renamed),
            b'T' => Some(Self::TypeChanged),
            b'U' => Some(Self::Unmerged),
            b'X' => Some(Self::Unknown),
            _ => None,
        }
    }

    pub fn letter(&self) -> char {
        match self {
            Self::Added => 'A',
            Self::Copied => 'C',
            Self::Deleted => 'D',
            Self::Modified => 'M',
            Self::Renamed => 'R',
            Self::TypeChanged => 'T',
            Self::Unmerged => 'U',
            Self::Unknown => 'X',
        }
    }

    /// Whether record lists both a source and a destination path.
    pub fn has_two_paths(&self) -> bool {
        matches!(self, Self::Copied | Self::Renamed)
    }
}

/// One record of raw diff output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDiffLine {
    pub src_mode: u32,
    pub dst_mode: u32,
    pub src_sha: String,
    pub dst_sha: String,
    pub status: RawStatus,

    /// Similarity score in percent for renames and copies.
    pub score: Option<u8>,

    /// Path relative to repository top-level (source path for renames).
    pub src_path: PathBuf,

    /// Destination path of a rename or copy.
    pub dst_path: Option<PathBuf>,
}

impl RawDiffLine {
    /// Path that record ends up at after the change.
    pub fn path(&self) -> &Path {
        self.dst_path.as_deref().unwrap_or(self.src_path.as_path())
    }

    /// Source object id, `None` if side does not exist or is unhashed.
    pub fn src_id(&self) -> Option<&str> {
        non_null(&self.src_sha)
    }

    /// Destination object id, `None` if side does not exist or is unhashed.
    pub fn dst_id(&self) -> Option<&str> {
        non_null(&self.dst_sha)
    }

    /// Encode record back into raw diff bytes with NUL termination.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!(
            ":{:06o} {:06o} {} {} {}",
            self.src_mode,
            self.dst_mode,
            self.src_sha,
            self.dst_sha,
            self.status.letter()
        )
        .into_bytes();

        if let Some(score) = self.score {
            out.extend(format!("{score:03}").into_bytes());
        }
        out.push(0);
        out.extend_from_slice(path_to_bytes(&self.src_path).as_ref());
        out.push(0);

        if let Some(dst_path) = &self.dst_path {
            out.extend_from_slice(path_to_bytes(dst_path).as_ref());
            out.push(0);
        }

        out
    }
}

fn non_null(sha: &str) -> Option<&str> {
    if sha.bytes().all(|byte| byte == b'0') {
        None
    } else {
        Some(sha)
    }
}

/// Parse complete output of `git diff --raw -z`.
///
/// # Errors
///
/// - Return [`RawDiffError`] if output is not well formed raw diff output.
pub fn parse_raw_diff(data: &[u8]) -> Result<Vec<RawDiffLine>> {
    let mut tokens = data.split(|byte| *byte == 0).peekable();
    let mut lines = Vec::new();

    while let Some(header) = tokens.next() {
        // INVARIANT: Output ends with a NUL, so last token is empty.
        if header.is_empty() && tokens.peek().is_none() {
            break;
        }

        let (src_mode, dst_mode, src_sha, dst_sha, status, score) = parse_header(header)?;
        let src_path = tokens
            .next()
            .filter(|path| !path.is_empty())
            .ok_or(RawDiffError::MissingPath)?;
        let dst_path = if status.has_two_paths() {
            let path = tokens
                .next()
                .filter(|path| !path.is_empty())
                .ok_or(RawDiffError::MissingPath)?;
            Some(bytes_to_path(path))
        } else {
            None
        };

        lines.push(RawDiffLine {
            src_mode,
            dst_mode,
            src_sha,
            dst_sha,
            status,
            score,
            src_path: bytes_to_path(src_path),
            dst_path,
        });
    }

    Ok(lines)
}

type Header = (u32, u32, String, String, RawStatus, Option<u8>);

fn parse_header(header: &[u8]) -> Result<Header> {
    let text = std::str::from_utf8(header)
        .map_err(|_| RawDiffError::MalformedHeader(String::from_utf8_lossy(header).into()))?;
    let malformed = || RawDiffError::MalformedHeader(text.to_string());

    let fields = text
        .strip_prefix(':')
        .ok_or_else(malformed)?
        .split(' ')
        .collect::<Vec<_>>();

    // INVARIANT: Combined diffs of merges start with "::" and have more
    // fields, which this codec does not deal with.
    let [src_mode, dst_mode, src_sha, dst_sha, code] = fields.as_slice() else {
        return Err(malformed());
    };

    let src_mode = u32::from_str_radix(src_mode, 8).map_err(|_| malformed())?;
    let dst_mode = u32::from_str_radix(dst_mode, 8).map_err(|_| malformed())?;
    let (letter, score) = code.as_bytes().split_first().ok_or_else(malformed)?;
    let status = RawStatus::from_letter(*letter).ok_or_else(malformed)?;
    let score = if score.is_empty() {
        None
    } else {
        Some(
            std::str::from_utf8(score)
                .ok()
                .and_then(|score| score.parse::<u8>().ok())
                .ok_or_else(malformed)?,
        )
    };

    Ok((
        src_mode,
        dst_mode,
        src_sha.to_string(),
        dst_sha.to_string(),
        status,
        score,
    ))
}

// Thanks from:
//
// https://github.com/rust-lang/git2-rs/blob/5bc3baa9694a94db2ca9cc256b5bce8a215f9013/
// src/util.rs#L85
#[cfg(unix)]
pub(crate) fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    use std::os::unix::prelude::*;
    PathBuf::from(OsStr::from_bytes(bytes))
}
#[cfg(windows)]
pub(crate) fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).replace('/', "\\"))
}

#[cfg(unix)]
pub(crate) fn path_to_bytes(path: &Path) -> std::borrow::Cow<'_, [u8]> {
    use std::os::unix::prelude::*;
    std::borrow::Cow::Borrowed(path.as_os_str().as_bytes())
}
#[cfg(windows)]
pub(crate) fn path_to_bytes(path: &Path) -> std::borrow::Cow<'_, [u8]> {
    std::borrow::Cow::Owned(path.to_string_lossy().replace('\\', "/").into_bytes())
}

/// Raw diff parsing error types.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RawDiffError {
    /// Record header cannot be understood.
    #[error("malformed raw diff header {0:?}")]
    MalformedHeader(String),

    /// Record header is not followed by its path field(s).
    #[error("raw diff record is missing a path field")]
    MissingPath,
}

/// Friendly result alias :3
pub type Result<T, E = RawDiffError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const NEW_BLOB: &str = "7b4d68d70fcae134d5348f5e118f5e9c9d3f05f6";
    const OLD_BLOB: &str = "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391";

    #[test]
    fn parse_mixed_records() -> anyhow::Result<()> {
        let mut data = Vec::new();
        data.extend(format!(":000000 100644 {NULL_SHA} {NEW_BLOB} A\0new\0").bytes());
        data.extend(format!(":100644 100644 {OLD_BLOB} {NEW_BLOB} R086\0old name\0dir/new name\0").bytes());
        data.extend(format!(":160000 160000 {OLD_BLOB} {NULL_SHA} M\0sub\0").bytes());

        let result = parse_raw_diff(&data)?;
        let expect = vec![
            RawDiffLine {
                src_mode: 0,
                dst_mode: 0o100644,
                src_sha: NULL_SHA.into(),
                dst_sha: NEW_BLOB.into(),
                status: RawStatus::Added,
                score: None,
                src_path: "new".into(),
                dst_path: None,
            },
            RawDiffLine {
                src_mode: 0o100644,
                dst_mode: 0o100644,
                src_sha: OLD_BLOB.into(),
                dst_sha: NEW_BLOB.into(),
                status: RawStatus::Renamed,
                score: Some(86),
                src_path: "old name".into(),
                dst_path: Some("dir/new name".into()),
            },
            RawDiffLine {
                src_mode: 0o160000,
                dst_mode: 0o160000,
                src_sha: OLD_BLOB.into(),
                dst_sha: NULL_SHA.into(),
                status: RawStatus::Modified,
                score: None,
                src_path: "sub".into(),
                dst_path: None,
            },
        ];
        assert_eq!(result, expect);

        assert_eq!(result[0].src_id(), None);
        assert_eq!(result[0].dst_id(), Some(NEW_BLOB));
        assert_eq!(result[1].path(), Path::new("dir/new name"));
        assert_eq!(result[2].dst_id(), None);

        Ok(())
    }

    #[test]
    fn encode_matches_git_output() -> anyhow::Result<()> {
        let data = format!(":100644 100755 {OLD_BLOB} {NEW_BLOB} C075\0a\0b\0").into_bytes();
        let lines = parse_raw_diff(&data)?;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].to_bytes(), data);

        Ok(())
    }

    #[test]
    fn parse_empty_output() -> anyhow::Result<()> {
        assert_eq!(parse_raw_diff(b"")?, Vec::new());
        Ok(())
    }

    #[test]
    fn reject_malformed_output() {
        let result = parse_raw_diff(b":100644 100644 abc M\0file\0");
        assert!(matches!(result, Err(RawDiffError::MalformedHeader(_))));

        let result = parse_raw_diff(format!(":100644 100644 {OLD_BLOB} {NEW_BLOB} R100\0only\0").as_bytes());
        assert_eq!(result, Err(RawDiffError::MissingPath));

        let result = parse_raw_diff(format!("::100644 100644 100644 {OLD_BLOB} {OLD_BLOB} {NEW_BLOB} MM\0f\0").as_bytes());
        assert!(matches!(result, Err(RawDiffError::MalformedHeader(_))));
    }
}
