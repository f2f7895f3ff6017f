//! Build-block resolution.
//!
//! The entry document groups its stylesheets and scripts into marked blocks:
//!
//! ```html
//! <!-- build:css /webapp/app/styles/app-1hf7uaq00.css -->
//! <link rel="stylesheet" href="styles/base.css">
//! <link rel="stylesheet" href="styles/app.css">
//! <!-- endbuild -->
//! ```
//!
//! Each block is merged into one artifact and replaced by a single reference
//! to it. `build:remove` blocks are dropped.

use super::{normalize_lexically, write_file};
use crate::{config::PipelineConfig, log};
use anyhow::{Context, Result};
use regex::Regex;
use rustc_hash::FxHashSet;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::LazyLock,
};
use thiserror::Error;

static OPEN_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<indent>[ \t]*)<!--\s*build:(?P<kind>[\w-]*)(?:\s+(?P<path>[^\s]+?))?\s*-->\s*$")
        .unwrap()
});
static CLOSE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*<!--\s*endbuild\s*-->\s*$").unwrap());
static ANY_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<!--\s*(?:build:|endbuild\b)").unwrap());
static LINK_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<link\b[^>]*?\bhref\s*=\s*["']([^"']+)["']"#).unwrap()
});
static SCRIPT_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<script\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#).unwrap()
});

/// What a build block turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Css,
    Js,
    Remove,
}

impl BlockKind {
    fn parse(kind: &str) -> Option<Self> {
        match kind {
            "css" => Some(Self::Css),
            "js" => Some(Self::Js),
            "remove" => Some(Self::Remove),
            _ => None,
        }
    }

    /// The tag referencing a merged artifact.
    fn reference(self, target: &str) -> Option<String> {
        match self {
            Self::Css => Some(format!(r#"<link rel="stylesheet" href="{target}">"#)),
            Self::Js => Some(format!(r#"<script src="{target}"></script>"#)),
            Self::Remove => None,
        }
    }

    fn includes(self, line: &str) -> Vec<String> {
        let pattern = match self {
            Self::Css => &LINK_HREF,
            Self::Js => &SCRIPT_SRC,
            Self::Remove => return Vec::new(),
        };
        pattern
            .captures_iter(line)
            .map(|c| c[1].to_owned())
            .collect()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockError {
    #[error("{}:{line}: build block is never closed", file.display())]
    Unclosed { file: PathBuf, line: usize },

    #[error("{}:{line}: `endbuild` without an opening build marker", file.display())]
    Unopened { file: PathBuf, line: usize },

    #[error("{}:{line}: build markers must stand on a line of their own", file.display())]
    Inline { file: PathBuf, line: usize },

    #[error("{}:{line}: build blocks cannot be nested", file.display())]
    Nested { file: PathBuf, line: usize },

    #[error("{}:{line}: unknown build block kind `{kind}`", file.display())]
    UnknownKind {
        file: PathBuf,
        line: usize,
        kind: String,
    },

    #[error("{}:{line}: build block has no target path", file.display())]
    MissingPath { file: PathBuf, line: usize },

    #[error("{}:{line}: build block includes no files", file.display())]
    Empty { file: PathBuf, line: usize },

    #[error("{}:{line}: included file `{href}` not found at {}", file.display(), path.display())]
    MissingInclude {
        file: PathBuf,
        line: usize,
        href: String,
        path: PathBuf,
    },

    #[error("{}:{line}: `{target}` is produced by an earlier build block", file.display())]
    DuplicateTarget {
        file: PathBuf,
        line: usize,
        target: String,
    },
}

/// One marked block of the entry document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildBlock {
    pub kind: BlockKind,
    /// Target path as written in the marker.
    pub target: String,
    /// Referenced files, in document order.
    pub includes: Vec<String>,
    indent: String,
    /// 1-based line of the opening marker.
    line: usize,
}

/// The entry document, split into plain text and build blocks.
#[derive(Debug)]
enum Segment<'a> {
    Text(&'a str),
    Block(BuildBlock, &'a str),
}

/// Split `document` into text and build blocks.
fn parse<'a>(document: &'a str, file: &Path) -> Result<Vec<Segment<'a>>, BlockError> {
    let mut segments = Vec::new();
    let mut open: Option<BuildBlock> = None;

    for (index, raw) in document.split_inclusive('\n').enumerate() {
        let line = index + 1;
        let text = raw.trim_end_matches(['\n', '\r']);
        let ending = &raw[text.len()..];

        if let Some(caps) = OPEN_MARKER.captures(text) {
            if open.is_some() {
                return Err(BlockError::Nested {
                    file: file.to_path_buf(),
                    line,
                });
            }
            let kind_name = &caps["kind"];
            let kind = BlockKind::parse(kind_name).ok_or_else(|| BlockError::UnknownKind {
                file: file.to_path_buf(),
                line,
                kind: kind_name.to_owned(),
            })?;
            let target = caps.name("path").map(|m| m.as_str().to_owned());
            let target = match (kind, target) {
                (BlockKind::Remove, target) => target.unwrap_or_default(),
                (_, Some(target)) => target,
                (_, None) => {
                    return Err(BlockError::MissingPath {
                        file: file.to_path_buf(),
                        line,
                    });
                }
            };
            open = Some(BuildBlock {
                kind,
                target,
                includes: Vec::new(),
                indent: caps["indent"].to_owned(),
                line,
            });
        } else if CLOSE_MARKER.is_match(text) {
            let Some(block) = open.take() else {
                return Err(BlockError::Unopened {
                    file: file.to_path_buf(),
                    line,
                });
            };
            if block.kind != BlockKind::Remove && block.includes.is_empty() {
                return Err(BlockError::Empty {
                    file: file.to_path_buf(),
                    line: block.line,
                });
            }
            segments.push(Segment::Block(block, ending));
        } else if ANY_MARKER.is_match(text) {
            return Err(BlockError::Inline {
                file: file.to_path_buf(),
                line,
            });
        } else if let Some(block) = &mut open {
            let found = block.kind.includes(text);
            block.includes.extend(found);
        } else {
            segments.push(Segment::Text(raw));
        }
    }

    match open {
        Some(block) => Err(BlockError::Unclosed {
            file: file.to_path_buf(),
            line: block.line,
        }),
        None => Ok(segments),
    }
}

/// Staging path an include reference points to.
///
/// Relative references resolve against the entry document's directory,
/// absolute ones against the staging root. Query and fragment are dropped.
pub fn resolve_include(href: &str, entry_dir: &Path, staging: &Path) -> PathBuf {
    let path = href.split(['?', '#']).next().unwrap_or(href);
    let relative = match path.strip_prefix('/') {
        Some(absolute) => PathBuf::from(absolute),
        None => entry_dir.join(path),
    };
    staging.join(normalize_lexically(&relative))
}

/// A merged artifact produced from one build block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Destination relative to the output directory.
    pub dest: PathBuf,
    pub content: String,
}

/// The entry document with its blocks resolved.
#[derive(Debug)]
pub struct Resolved {
    pub document: String,
    pub artifacts: Vec<Artifact>,
}

/// Resolve every block of `document` against files in `staging`.
///
/// `entry` is the document's path relative to `staging`.
pub fn resolve(document: &str, entry: &Path, staging: &Path) -> Result<Resolved, BlockError> {
    let entry_dir = entry.parent().unwrap_or(Path::new(""));
    let mut output = String::with_capacity(document.len());
    let mut artifacts = Vec::new();
    let mut targets = FxHashSet::default();

    for segment in parse(document, entry)? {
        let (block, ending) = match segment {
            Segment::Text(text) => {
                output.push_str(text);
                continue;
            }
            Segment::Block(block, ending) => (block, ending),
        };
        let Some(reference) = block.kind.reference(&block.target) else {
            continue;
        };

        let dest = PathBuf::from(block.target.trim_start_matches('/'));
        if !targets.insert(dest.clone()) {
            return Err(BlockError::DuplicateTarget {
                file: entry.to_path_buf(),
                line: block.line,
                target: block.target,
            });
        }

        let mut parts = Vec::with_capacity(block.includes.len());
        for href in &block.includes {
            let path = resolve_include(href, entry_dir, staging);
            let content = fs::read_to_string(&path).map_err(|_| BlockError::MissingInclude {
                file: entry.to_path_buf(),
                line: block.line,
                href: href.clone(),
                path: path.clone(),
            })?;
            parts.push(content);
        }

        artifacts.push(Artifact {
            dest,
            content: parts.join("\n"),
        });
        output.push_str(&block.indent);
        output.push_str(&reference);
        output.push_str(ending);
    }

    Ok(Resolved {
        document: output,
        artifacts,
    })
}

/// Bundle stage: resolve the staged entry document into `temp_next/`.
///
/// Returns the number of merged artifacts.
pub fn run(config: &PipelineConfig) -> Result<usize> {
    let build = &config.build;
    if build.next.exists() {
        fs::remove_dir_all(&build.next)
            .with_context(|| format!("Failed to clear {}", build.next.display()))?;
    }

    let entry_path = build.prep.join(&build.entry);
    let document = fs::read_to_string(&entry_path)
        .with_context(|| format!("Failed to read entry document {}", entry_path.display()))?;

    let resolved = resolve(&document, &build.entry, &build.prep)?;
    for artifact in &resolved.artifacts {
        write_file(&build.next.join(&artifact.dest), artifact.content.as_bytes())?;
        log!("bundle"; "{}", artifact.dest.display());
    }
    write_file(&build.next.join(&build.entry), resolved.document.as_bytes())?;

    Ok(resolved.artifacts.len())
}
