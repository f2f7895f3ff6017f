//! The asset pipeline stages.
//!
//! - **context**: build context and the cache buster
//! - **preprocess**: `@echo` / `@exec` / `@if` directives
//! - **deps**: stylesheet import graph for incremental rebuilds
//! - **style** / **script**: per-type compilers
//! - **prep**: per-type pipelines over the source tree into `temp_prep/`
//! - **blocks**: build-block resolution into `temp_next/`
//! - **finalize**: prefix, down-level, minify and page duplication into `dist/`
//! - **assets**: verbatim copy of static assets
//!
//! # Flow
//!
//! ```text
//! src/ ──prep──► temp_prep/ ──blocks──► temp_next/ ──finalize──► dist/
//!   └────────────────────────assets────────────────────────────►┘
//! ```

pub mod assets;
pub mod blocks;
pub mod context;
pub mod deps;
pub mod finalize;
pub mod prep;
pub mod preprocess;
pub mod script;
pub mod style;

pub use script::ScriptBundler;
pub use style::StyleCompiler;

use crate::config::PipelineConfig;
use anyhow::{Context, Result};
use script::Esbuild;
use std::{
    fmt, fs,
    ops::AddAssign,
    path::{Component, Path, PathBuf},
    time::SystemTime,
};
use walkdir::WalkDir;

/// Source file types the pipeline knows about.
pub const SOURCE_EXTENSIONS: &[&str] = &["css", "sass", "scss", "js", "mjs", "html", "svg"];

/// Files to ignore during directory traversal
const IGNORED_FILES: &[&str] = &[".DS_Store"];

// ============================================================================
// Toolchain
// ============================================================================

/// External compilers the pipeline delegates to.
pub struct Toolchain {
    pub styles: Box<dyn StyleCompiler>,
    pub bundler: Box<dyn ScriptBundler>,
}

impl Toolchain {
    /// The configured `sass` and `esbuild` commands, run from the project root.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let root = config.get_root().to_path_buf();
        Self {
            styles: Box::new(style::SassCommand::new(
                config.build.sass.clone(),
                root.clone(),
            )),
            bundler: Box::new(Esbuild::new(config.build.esbuild.clone(), root)),
        }
    }
}

// ============================================================================
// File Record
// ============================================================================

/// One file flowing through a stage.
///
/// A stage reads a record, derives a new one with transformed content and
/// writes it into its own output directory. Records are never written back.
#[derive(Debug, Clone)]
pub struct FileRecord {
    /// Absolute path the content was read from.
    pub source: PathBuf,
    pub content: String,
    /// Destination relative to the stage output directory.
    pub dest: PathBuf,
}

impl FileRecord {
    /// Read `source`, keeping its path relative to `base` as destination.
    pub fn read(source: &Path, base: &Path) -> Result<Self> {
        let content = fs::read_to_string(source)
            .with_context(|| format!("Failed to read {}", source.display()))?;
        let dest = relative_to(source, base)?;
        Ok(Self {
            source: source.to_path_buf(),
            content,
            dest,
        })
    }

    /// A new record carrying transformed content.
    pub fn map_content(self, content: String) -> Self {
        Self { content, ..self }
    }

    /// Write the record below `dir`, creating parent directories.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(&self.dest);
        write_file(&path, self.content.as_bytes())?;
        Ok(path)
    }
}

// ============================================================================
// Stage Report
// ============================================================================

/// Number of files a stage processed or skipped as up to date.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StageReport {
    pub processed: usize,
    pub skipped: usize,
}

impl StageReport {
    pub fn processed(count: usize) -> Self {
        Self {
            processed: count,
            skipped: 0,
        }
    }
}

impl AddAssign for StageReport {
    fn add_assign(&mut self, rhs: Self) {
        self.processed += rhs.processed;
        self.skipped += rhs.skipped;
    }
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} processed, {} up to date", self.processed, self.skipped)
    }
}

// ============================================================================
// Filesystem helpers
// ============================================================================

/// Collect files below `dir` with one of `extensions`, sorted by path.
///
/// A missing directory yields no files.
pub fn collect_files(dir: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    let mut files: Vec<_> = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            let name = e.file_name().to_str().unwrap_or_default();
            !IGNORED_FILES.contains(&name)
        })
        .map(walkdir::DirEntry::into_path)
        .filter(|path| has_extension(path, extensions))
        .collect();
    files.sort();
    files
}

/// Whether `path` has one of `extensions` (without the dot).
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.contains(&ext))
}

/// Check if destination is up-to-date compared to source and dependencies.
pub fn is_up_to_date(src: &Path, dst: &Path, deps_mtime: Option<SystemTime>) -> bool {
    let Ok(src_time) = src.metadata().and_then(|m| m.modified()) else {
        return false;
    };
    let Ok(dst_time) = dst.metadata().and_then(|m| m.modified()) else {
        return false;
    };

    if src_time > dst_time {
        return false;
    }

    // Check if any dependency is newer than destination
    if let Some(deps) = deps_mtime
        && deps > dst_time
    {
        return false;
    }

    true
}

/// `path` relative to `base`.
pub fn relative_to(path: &Path, base: &Path) -> Result<PathBuf> {
    path.strip_prefix(base)
        .map(Path::to_path_buf)
        .with_context(|| format!("{} is outside {}", path.display(), base.display()))
}

/// Write `content` to `path`, creating parent directories.
pub fn write_file(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

/// Resolve `.` and `..` components without touching the filesystem.
///
/// `..` never climbs above the first component.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Render a relative path with `/` separators regardless of host OS.
pub fn to_url_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_collect_files_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("styles")).unwrap();
        fs::write(root.join("styles/b.scss"), "").unwrap();
        fs::write(root.join("a.scss"), "").unwrap();
        fs::write(root.join("a.css"), "").unwrap();
        fs::write(root.join(".DS_Store"), "").unwrap();

        let files = collect_files(root, &["scss"]);
        assert_eq!(files, [root.join("a.scss"), root.join("styles/b.scss")]);

        assert!(collect_files(&root.join("missing"), &["scss"]).is_empty());
    }

    #[test]
    fn test_is_up_to_date() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.css");
        let dst = dir.path().join("out.css");
        fs::write(&src, "a").unwrap();

        assert!(!is_up_to_date(&src, &dst, None));

        fs::write(&dst, "a").unwrap();
        let now = SystemTime::now();
        fs::File::options()
            .write(true)
            .open(&src)
            .unwrap()
            .set_modified(now - Duration::from_secs(10))
            .unwrap();
        assert!(is_up_to_date(&src, &dst, None));
        assert!(!is_up_to_date(&src, &dst, Some(now + Duration::from_secs(10))));
    }

    #[test]
    fn test_file_record_roundtrip_paths() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("styles")).unwrap();
        fs::write(src.join("styles/app.css"), "body {}").unwrap();

        let record = FileRecord::read(&src.join("styles/app.css"), &src).unwrap();
        assert_eq!(record.dest, PathBuf::from("styles/app.css"));

        let record = record.map_content("main {}".into());
        let written = record.write_to(&dir.path().join("out")).unwrap();
        assert_eq!(fs::read_to_string(written).unwrap(), "main {}");
    }

    #[test]
    fn test_normalize_lexically() {
        assert_eq!(
            normalize_lexically(Path::new("a/./b/../c.css")),
            PathBuf::from("a/c.css")
        );
        assert_eq!(normalize_lexically(Path::new("../c.css")), PathBuf::from("c.css"));
    }

    #[test]
    fn test_to_url_path() {
        assert_eq!(to_url_path(Path::new("scripts/app.js")), "scripts/app.js");
        assert_eq!(to_url_path(Path::new("./a/b")), "a/b");
    }

    #[test]
    fn test_report_accumulates() {
        let mut report = StageReport::processed(2);
        report += StageReport {
            processed: 1,
            skipped: 3,
        };
        assert_eq!(report.to_string(), "3 processed, 3 up to date");
    }
}
