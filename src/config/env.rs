//! Build environment selection (`BUILD_ENV`).
//!
//! The environment is resolved once at startup into an [`Environment`] kind.
//! Each kind carries its own [`EnvSettings`], so the rest of the pipeline asks
//! the kind what to do instead of comparing strings.
//!
//! | `BUILD_ENV` | Kind    | minify | bundle mode  |
//! |-------------|---------|--------|--------------|
//! | *(unset)*   | `Local` | no     | development  |
//! | `DEV`       | `Dev`   | no     | development  |
//! | `QA`        | `Qa`    | yes    | production   |
//! | `PROD`      | `Prod`  | yes    | production   |

use super::error::ConfigError;
use std::{fmt, str::FromStr};

/// Name of the environment variable selecting the build environment.
pub const BUILD_ENV_VAR: &str = "BUILD_ENV";

/// Optimization mode handed to the script bundler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleMode {
    /// Fast builds with inline source maps.
    Development,
    /// Minified, tree-shaken bundles.
    Production,
}

/// Per-environment behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvSettings {
    pub minify: bool,
    pub bundle_mode: BundleMode,
}

/// Target environment of a build run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Environment {
    #[default]
    Local,
    Dev,
    Qa,
    Prod,
}

impl Environment {
    pub const ALL: [Self; 4] = [Self::Local, Self::Dev, Self::Qa, Self::Prod];

    /// Upper-case name, also used as the context flag key.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Local => "LOCAL",
            Self::Dev => "DEV",
            Self::Qa => "QA",
            Self::Prod => "PROD",
        }
    }

    pub const fn settings(self) -> EnvSettings {
        match self {
            Self::Local | Self::Dev => EnvSettings {
                minify: false,
                bundle_mode: BundleMode::Development,
            },
            Self::Qa | Self::Prod => EnvSettings {
                minify: true,
                bundle_mode: BundleMode::Production,
            },
        }
    }

    /// Pick the environment from a CLI override or the `BUILD_ENV` value.
    ///
    /// The CLI value wins. Missing or empty values mean `Local`.
    pub fn resolve(cli: Option<&str>, var: Option<&str>) -> Result<Self, ConfigError> {
        cli.or(var).map_or(Ok(Self::Local), |s| s.parse())
    }

    /// Read `BUILD_ENV` from the process environment.
    pub fn from_process(cli: Option<&str>) -> Result<Self, ConfigError> {
        let var = std::env::var(BUILD_ENV_VAR).ok();
        Self::resolve(cli, var.as_deref())
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::Local);
        }
        Self::ALL
            .into_iter()
            .find(|env| env.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ConfigError::UnknownEnvironment(s.to_owned()))
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
