// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the engine configuration file to simplify the
//! process of serialization and deserialization. File I/O is left to the
//! caller to figure out.
//!
//! # General Layout
//!
//! ```toml
//! [git]
//! executable = "git"
//! detect_renames = true
//!
//! [annex]
//! refine_unlocked = true
//!
//! [diff]
//! report_bytesize = true
//! modified_untracked = "normal"
//! ```
//!
//! Every key is optional. Missing keys take their default value.

use crate::diff::UntrackedMode;

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Engine configuration.
///
/// Passed explicitly into the backend and engines, never read from process
/// wide state.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Settings for the Git backend.
    pub git: GitSettings,

    /// Settings for git-annex awareness.
    pub annex: AnnexSettings,

    /// Settings for content comparison.
    pub diff: DiffSettings,
}

impl FromStr for EngineConfig {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: EngineConfig =
            toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on Git executable field.
        config.git.executable = GitExecutable::new(
            shellexpand::full(config.git.executable.to_string().as_str())
                .map_err(ConfigError::ShellExpansion)?
                .into_owned(),
        );

        Ok(config)
    }
}

impl Display for EngineConfig {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Git backend settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GitSettings {
    /// Git binary used for raw diffs and untracked listings.
    pub executable: GitExecutable,

    /// Let Git pair deletions with additions as renames.
    pub detect_renames: bool,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            executable: GitExecutable::default(),
            detect_renames: true,
        }
    }
}

/// git-annex awareness settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AnnexSettings {
    /// Report lock/unlock representation switches as modifications.
    pub refine_unlocked: bool,
}

impl Default for AnnexSettings {
    fn default() -> Self {
        Self {
            refine_unlocked: true,
        }
    }
}

/// Content comparison settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DiffSettings {
    /// Attach byte sizes to file entries.
    pub report_bytesize: bool,

    /// Untracked content granularity used when filtering for modifications.
    pub modified_untracked: UntrackedMode,
}

impl Default for DiffSettings {
    fn default() -> Self {
        Self {
            report_bytesize: true,
            modified_untracked: UntrackedMode::Normal,
        }
    }
}

/// Path or name of the Git binary.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct GitExecutable(PathBuf);

impl GitExecutable {
    /// Construct new Git executable path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Treat Git executable as [`Path`] slice.
    pub fn as_path(&self) -> &Path {
        self.0.as_path()
    }
}

impl Default for GitExecutable {
    fn default() -> Self {
        Self::new("git")
    }
}

impl Display for GitExecutable {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_path().to_string_lossy().as_ref())
    }
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("GIT_PREFIX_DIR", "/opt/git")])]
    fn deserialize_engine_config() -> anyhow::Result<()> {
        let result: EngineConfig = r#"
            [git]
            executable = "$GIT_PREFIX_DIR/bin/git"
            detect_renames = false

            [annex]
            refine_unlocked = false

            [diff]
            report_bytesize = false
            modified_untracked = "all"
        "#
        .parse()?;

        let expect = EngineConfig {
            git: GitSettings {
                executable: GitExecutable::new("/opt/git/bin/git"),
                detect_renames: false,
            },
            annex: AnnexSettings {
                refine_unlocked: false,
            },
            diff: DiffSettings {
                report_bytesize: false,
                modified_untracked: UntrackedMode::All,
            },
        };

        assert_eq!(result, expect);

        Ok(())
    }

    #[test]
    fn deserialize_partial_config_uses_defaults() -> anyhow::Result<()> {
        let result: EngineConfig = indoc! {r#"
            [diff]
            modified_untracked = "no"
        "#}
        .parse()?;

        let mut expect = EngineConfig::default();
        expect.diff.modified_untracked = UntrackedMode::No;

        assert_eq!(result, expect);
        assert_eq!(result.git.executable.to_string(), "git");
        assert!(result.git.detect_renames);

        Ok(())
    }

    #[test]
    fn serialize_engine_config() {
        let result = EngineConfig::default().to_string();

        let expect = indoc! {r#"
            [git]
            executable = "git"
            detect_renames = true

            [annex]
            refine_unlocked = true

            [diff]
            report_bytesize = true
            modified_untracked = "normal"
        "#};

        assert_eq!(result, expect);
    }

    #[test]
    fn reject_unknown_untracked_mode() {
        let result = "[diff]\nmodified_untracked = \"sometimes\"".parse::<EngineConfig>();
        assert!(matches!(result, Err(ConfigError::Deserialize(_))));
    }
}
