// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! git-annex key handling.
//!
//! git-annex keeps file content out of Git. What gets committed instead is
//! a __key__, the content-addressed name of the file's content. Depending on
//! whether a file is _locked_ or _unlocked_, the key shows up in one of two
//! representations:
//!
//! - Locked: a symlink whose target ends in `.git/annex/objects/../KEY/KEY`.
//! - Unlocked: a small regular "pointer" file holding `/annex/objects/KEY`.
//!
//! Switching between both representations changes the Git object, but not
//! the key. This module extracts keys from either representation so that
//! such switches can be told apart from actual content changes.
//!
//! # Key Layout
//!
//! ```text
//! BACKEND[-sSIZE][-mMTIME][-SCHUNKSIZE-CCHUNKNUMBER]--NAME
//! ```
//!
//! # See Also
//!
//! - [git-annex key format](https://git-annex.branchable.com/internals/key_format/)

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::Path,
    str::FromStr,
};

/// Pointer files are never larger than this.
pub const MAX_POINTER_SIZE: u64 = 32 * 1024;

const POINTER_PREFIX: &str = "/annex/objects/";

/// A git-annex key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct AnnexKey {
    /// Hashing backend that produced the key, e.g., `SHA256E`.
    pub backend: String,

    /// Size of the content in bytes, when recorded.
    pub bytesize: Option<u64>,

    /// Full key text.
    pub key: String,
}

impl AnnexKey {
    /// Extract key from the target of an annex symlink.
    ///
    /// Returns `None` if target does not point into an annex object store.
    pub fn from_symlink_target(target: impl AsRef<Path>) -> Option<Self> {
        let target = target.as_ref().to_string_lossy();
        if !target.contains("annex/objects/") {
            return None;
        }

        target.rsplit('/').next().and_then(|key| key.parse().ok())
    }

    /// Extract key from the content of an unlocked pointer file.
    ///
    /// Returns `None` if content is not a pointer.
    pub fn from_pointer(content: &[u8]) -> Option<Self> {
        if content.len() as u64 > MAX_POINTER_SIZE {
            return None;
        }

        let content = std::str::from_utf8(content).ok()?;
        let first = content.lines().next()?;
        first.strip_prefix(POINTER_PREFIX)?.parse().ok()
    }

    /// Extract key from a blob that is either a symlink target or a pointer.
    pub fn from_blob(mode: u32, content: &[u8]) -> Option<Self> {
        if mode & 0o170000 == 0o120000 {
            Self::from_symlink_target(String::from_utf8_lossy(content).into_owned())
        } else {
            Self::from_pointer(content)
        }
    }
}

impl FromStr for AnnexKey {
    type Err = AnnexKeyError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let (fields, name) = data
            .split_once("--")
            .ok_or_else(|| AnnexKeyError::MissingName(data.to_string()))?;

        let mut fields = fields.split('-');
        let backend = fields
            .next()
            .filter(|backend| !backend.is_empty() && backend.chars().all(|c| c.is_ascii_alphanumeric()))
            .ok_or_else(|| AnnexKeyError::InvalidBackend(data.to_string()))?;

        if name.is_empty() || name.contains('/') {
            return Err(AnnexKeyError::MissingName(data.to_string()));
        }

        let mut bytesize = None;
        for field in fields {
            let mut chars = field.chars();
            let tag = chars.next();
            let value = chars.as_str();
            match tag {
                Some('s') => {
                    bytesize = Some(
                        value
                            .parse::<u64>()
                            .map_err(|_| AnnexKeyError::InvalidField(field.to_string()))?,
                    );
                }
                Some('m' | 'S' | 'C') => {
                    value
                        .parse::<u64>()
                        .map_err(|_| AnnexKeyError::InvalidField(field.to_string()))?;
                }
                _ => return Err(AnnexKeyError::InvalidField(field.to_string())),
            }
        }

        Ok(Self {
            backend: backend.to_string(),
            bytesize,
            key: data.to_string(),
        })
    }
}

impl Display for AnnexKey {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.key)
    }
}

/// git-annex key parsing error types.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AnnexKeyError {
    #[error("annex key {0:?} lacks a name part")]
    MissingName(String),

    #[error("annex key {0:?} lacks a valid backend")]
    InvalidBackend(String),

    #[error("invalid annex key field {0:?}")]
    InvalidField(String),
}
