//! Stylesheet families and the Sass compiler seam.

use crate::{exec, utils::exec::FilterRule, utils::exec::require_command};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Noise dart-sass prints around deprecation warnings.
static SASS_FILTER: FilterRule =
    FilterRule::new(&["Deprecation Warning", "More info", "╷", "│", "╵", "root stylesheet"]);

/// One stylesheet syntax, staged by its own prep step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleFamily {
    Css,
    Sass,
    Scss,
}

impl StyleFamily {
    pub const ALL: [Self; 3] = [Self::Css, Self::Sass, Self::Scss];

    pub const fn extension(self) -> &'static str {
        match self {
            Self::Css => "css",
            Self::Sass => "sass",
            Self::Scss => "scss",
        }
    }

    /// Whether the family goes through the Sass compiler.
    pub const fn is_sass(self) -> bool {
        !matches!(self, Self::Css)
    }

    /// Sass partials (`_name.scss`) only exist to be imported.
    pub fn is_partial(self, path: &Path) -> bool {
        self.is_sass()
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('_'))
    }
}

/// Turns preprocessed Sass source into plain CSS.
pub trait StyleCompiler: Send + Sync {
    /// Fail early when the compiler cannot run at all.
    fn check(&self) -> Result<()> {
        Ok(())
    }

    /// Compile `source` (already preprocessed) of `family`.
    ///
    /// `path` is the original source file; imports are resolved from its
    /// directory and then from `load_path`.
    fn compile(
        &self,
        source: &str,
        family: StyleFamily,
        path: &Path,
        load_path: &Path,
    ) -> Result<String>;
}

/// The external `sass` command, fed through stdin.
pub struct SassCommand {
    command: Vec<String>,
    root: PathBuf,
}

impl SassCommand {
    pub fn new(command: Vec<String>, root: PathBuf) -> Self {
        Self { command, root }
    }
}

impl StyleCompiler for SassCommand {
    fn check(&self) -> Result<()> {
        require_command("[build.sass]", &self.command)
    }

    fn compile(
        &self,
        source: &str,
        family: StyleFamily,
        path: &Path,
        load_path: &Path,
    ) -> Result<String> {
        let own_dir = path.parent().unwrap_or(load_path);
        let indented = if family == StyleFamily::Sass {
            "--indented"
        } else {
            ""
        };

        let output = exec!(
            stdin=source.as_bytes();
            filter=&SASS_FILTER;
            &self.root;
            &self.command;
            "--stdin",
            "--no-source-map",
            indented,
            format!("--load-path={}", own_dir.display()),
            format!("--load-path={}", load_path.display()),
        )
        .with_context(|| format!("Failed to compile {}", path.display()))?;

        String::from_utf8(output.stdout)
            .with_context(|| format!("sass produced invalid UTF-8 for {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partials() {
        assert!(StyleFamily::Scss.is_partial(Path::new("styles/_vars.scss")));
        assert!(!StyleFamily::Scss.is_partial(Path::new("styles/app.scss")));
        assert!(!StyleFamily::Css.is_partial(Path::new("styles/_reset.css")));
    }

    #[test]
    fn test_sass_command_compiles_when_available() {
        let sass = vec!["sass".to_string()];
        if require_command("sass", &sass).is_err() {
            return;
        }

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("_vars.scss"), "$red: #f00;").unwrap();
        let compiler = SassCommand::new(sass, dir.path().to_path_buf());

        let css = compiler
            .compile(
                "@use 'vars';\n.a { color: vars.$red; }",
                StyleFamily::Scss,
                &dir.path().join("app.scss"),
                dir.path(),
            )
            .unwrap();
        assert!(css.contains(".a"));
        assert!(css.contains("red") || css.contains("#f00"));

        let css = compiler
            .compile(".b\n  margin: 0\n", StyleFamily::Sass, &dir.path().join("b.sass"), dir.path())
            .unwrap();
        assert!(css.contains("margin: 0"));
    }
}
