//! Pipeline configuration: `pipewright.toml`, `BUILD_ENV` and CLI overrides.
//!
//! The config file is optional and only holds the top-level constants of the
//! pipeline. Missing file means all defaults.
//!
//! # Sections
//!
//! | Section     | Purpose                                         |
//! |-------------|-------------------------------------------------|
//! | `[app]`     | Application name and URL folder                 |
//! | `[build]`   | Directory layout, pages, entry points, tools    |
//! | `[serve]`   | Development server (interface, ports, browser)  |
//! | `[context]` | Extra string values for `@echo` / `@if`         |
//!
//! # Example
//!
//! ```toml
//! [app]
//! name = "My App"
//! folder = "/webapp/my-app/"
//!
//! [build]
//! pages = ["index.html", "about.html"]
//!
//! [serve]
//! port = 9000
//!
//! [context]
//! API_URL = "https://api.example.com"
//! ```

mod app;
mod build;
pub mod defaults;
mod env;
mod error;
mod serve;

pub use env::{BundleMode, Environment};
pub use error::ConfigError;

use app::AppConfig;
use build::BuildConfig;
use serve::ServeConfig;

use crate::cli::{Cli, Commands};
use anyhow::{Result, bail};
use educe::Educe;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Component, Path, PathBuf},
};

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration structure representing pipewright.toml
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Absolute path to the config file (set after loading)
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Build environment, resolved from `--env` / `BUILD_ENV`
    #[serde(skip)]
    pub env: Environment,

    /// Application identity
    #[serde(default)]
    pub app: AppConfig,

    /// Build settings
    #[serde(default)]
    pub build: BuildConfig,

    /// Development server settings
    #[serde(default)]
    pub serve: ServeConfig,

    /// User-defined context values
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl PipelineConfig {
    /// Parse configuration from TOML string
    pub fn from_str(content: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(content).map_err(ConfigError::Toml)?;
        Ok(config)
    }

    /// Load configuration from file path
    pub fn from_path(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;
        Self::from_str(&content)
    }

    /// Load, resolve and validate configuration for a CLI invocation.
    pub fn load(cli: &Cli) -> Result<Self> {
        let root = cli.root.as_deref().unwrap_or(Path::new("./"));
        let config_path = root.join(&cli.config);

        let mut config = if config_path.exists() {
            Self::from_path(&config_path)?
        } else {
            Self::default()
        };
        config.env = Environment::from_process(cli.env.as_deref())?;
        config.update_with_cli(cli);
        config.validate()?;

        Ok(config)
    }

    /// Default configuration rooted at `root`.
    #[cfg(test)]
    pub fn for_root(root: &Path) -> Self {
        let mut config = Self::default();
        config.set_root(root);
        config.update_path_with_root(root);
        config
    }

    /// Get the root directory path
    pub fn get_root(&self) -> &Path {
        self.build.root.as_deref().unwrap_or(Path::new("./"))
    }

    /// Set the root directory path
    pub fn set_root(&mut self, path: &Path) {
        self.build.root = Some(path.to_path_buf())
    }

    /// Whether this run minifies its artifacts.
    ///
    /// An explicit `minify` setting wins over the environment default.
    pub fn minify(&self) -> bool {
        self.build.minify.unwrap_or(self.env.settings().minify)
    }

    pub fn bundle_mode(&self) -> BundleMode {
        self.env.settings().bundle_mode
    }

    /// Directory inside `dist/` the pages and assets of the app land in.
    pub fn app_output(&self) -> PathBuf {
        self.build.output.join(self.app.url_folder().trim_matches('/'))
    }

    /// Update configuration with CLI arguments
    pub fn update_with_cli(&mut self, cli: &Cli) {
        let root = cli
            .root
            .clone()
            .unwrap_or_else(|| self.get_root().to_owned());

        self.config_path = Self::normalize_path(&root.join(&cli.config));
        self.update_path_with_root(&root);

        if let Some(args) = cli.build_args() {
            Self::update_option(&mut self.build.minify, args.minify.map(Some).as_ref());
        }

        if let Some(Commands::Serve {
            interface,
            port,
            open,
            ..
        }) = &cli.command
        {
            Self::update_option(&mut self.serve.interface, interface.as_ref());
            Self::update_option(&mut self.serve.port, port.as_ref());
            Self::update_option(&mut self.serve.open, open.as_ref());
        }
    }

    /// Update config option if CLI value is provided
    fn update_option<T: Clone>(config_option: &mut T, cli_option: Option<&T>) {
        if let Some(option) = cli_option {
            *config_option = option.clone();
        }
    }

    /// Update all paths relative to root directory and normalize to absolute paths
    fn update_path_with_root(&mut self, root: &Path) {
        let root = Self::normalize_path(root);
        self.set_root(&root);

        self.build.source = Self::normalize_path(&root.join(&self.build.source));
        self.build.prep = Self::normalize_path(&root.join(&self.build.prep));
        self.build.next = Self::normalize_path(&root.join(&self.build.next));
        self.build.output = Self::normalize_path(&root.join(&self.build.output));
    }

    /// Normalize a path to absolute, using canonicalize if the path exists
    fn normalize_path(path: &Path) -> PathBuf {
        path.canonicalize().unwrap_or_else(|_| {
            // For non-existent paths, manually make them absolute
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                std::env::current_dir()
                    .map(|cwd| cwd.join(path))
                    .unwrap_or_else(|_| path.to_path_buf())
            }
        })
    }

    /// Validate the structural constants of the pipeline.
    pub fn validate(&self) -> Result<()> {
        if self.build.pages.is_empty() {
            bail!(ConfigError::Validation(
                "[build.pages] must name at least one page".into()
            ));
        }

        let mut seen = FxHashSet::default();
        for page in &self.build.pages {
            if !is_plain_relative(Path::new(page)) {
                bail!(ConfigError::Validation(format!(
                    "[build.pages] `{page}` must be a relative path inside the app folder"
                )));
            }
            if !seen.insert(page.as_str()) {
                bail!(ConfigError::Validation(format!(
                    "[build.pages] `{page}` is listed twice"
                )));
            }
        }

        if !is_plain_relative(&self.build.entry) {
            bail!(ConfigError::Validation(
                "[build.entry] must be a relative path inside the source tree".into()
            ));
        }

        for entry in &self.build.entries {
            if !is_plain_relative(entry) {
                bail!(ConfigError::Validation(format!(
                    "[build.entries] `{}` must be a relative path inside the source tree",
                    entry.display()
                )));
            }
        }

        if self.app.folder.split('/').any(|part| part == "..") {
            bail!(ConfigError::Validation(
                "[app.folder] must not contain `..`".into()
            ));
        }

        let staging = [&self.build.prep, &self.build.next, &self.build.output];
        if staging.contains(&&self.build.source) {
            bail!(ConfigError::Validation(
                "[build.source] must differ from the staging and output directories".into()
            ));
        }

        Ok(())
    }
}

/// A non-empty relative path without `..` components.
fn is_plain_relative(path: &Path) -> bool {
    path.components().next().is_some()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
