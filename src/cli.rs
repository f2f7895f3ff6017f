//! Command-line interface definitions.
//!
//! Defines all CLI arguments and subcommands using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// pipewright front-end asset pipeline CLI
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Project root directory
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Config file name (default: pipewright.toml)
    #[arg(short = 'C', long, default_value = "pipewright.toml")]
    pub config: PathBuf,

    /// Build environment (LOCAL, DEV, QA, PROD); overrides `BUILD_ENV`
    #[arg(short, long)]
    pub env: Option<String>,

    /// subcommands (default: build)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Shared build arguments for Build, Watch and Serve commands
#[derive(clap::Args, Debug, Clone, Default)]
pub struct BuildArgs {
    /// Minify stylesheets, scripts and pages regardless of environment
    #[arg(short, long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = false)]
    pub minify: Option<bool>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Delete staging and distribution directories
    Clean,

    /// Clean, then run the full pipeline once
    Build {
        #[command(flatten)]
        build_args: BuildArgs,
    },

    /// Build, then rebuild whenever the source tree changes
    Watch {
        #[command(flatten)]
        build_args: BuildArgs,
    },

    /// Build, serve the output with live reload and rebuild on change
    Serve {
        #[command(flatten)]
        build_args: BuildArgs,

        /// Interface to bind on
        #[arg(short, long)]
        interface: Option<String>,

        /// Preferred port; the next free port is used when it is taken
        #[arg(short, long)]
        port: Option<u16>,

        /// Open the browser once the server is up
        #[arg(short, long, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true", require_equals = false)]
        open: Option<bool>,
    },
}

impl Cli {
    /// The selected command, falling back to `build`.
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Build {
            build_args: BuildArgs::default(),
        })
    }

    /// Build arguments of the selected command, if it takes any.
    pub fn build_args(&self) -> Option<&BuildArgs> {
        match &self.command {
            Some(
                Commands::Build { build_args }
                | Commands::Watch { build_args }
                | Commands::Serve { build_args, .. },
            ) => Some(build_args),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_build() {
        let cli = Cli::parse_from(["pipewright"]);
        assert!(matches!(cli.command(), Commands::Build { .. }));
        assert!(cli.build_args().is_none());
    }

    #[test]
    fn test_serve_arguments() {
        let cli = Cli::parse_from([
            "pipewright", "--env", "prod", "serve", "--port", "9100", "--open", "false",
        ]);
        assert_eq!(cli.env.as_deref(), Some("prod"));
        match cli.command() {
            Commands::Serve { port, open, .. } => {
                assert_eq!(port, Some(9100));
                assert_eq!(open, Some(false));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_minify_flag_without_value() {
        let cli = Cli::parse_from(["pipewright", "build", "--minify"]);
        assert_eq!(cli.build_args().and_then(|a| a.minify), Some(true));
    }
}
