//! Stylesheet import graph.
//!
//! Tracks which stylesheet pulls in which other stylesheet through `@import`,
//! `@use` or `@forward`, so an incremental prep run can rebuild a file when
//! anything it transitively depends on changed.
//!
//! ```text
//! app.scss ──► _theme.scss ──► _colors.scss
//!    touch _colors.scss  ⇒  app.scss is stale
//! ```

use super::normalize_lexically;
use petgraph::{
    graph::{DiGraph, NodeIndex},
    visit::{Dfs, Reversed},
};
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::LazyLock,
    time::SystemTime,
};

static IMPORT_RULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*@(?:import|use|forward)[ \t]+([^;\n]+)").unwrap());
static QUOTED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"["']([^"']+)["']"#).unwrap());

/// Extensions tried when an import names no extension.
const STYLE_EXTENSIONS: &[&str] = &["scss", "sass", "css"];

/// Import relations between stylesheets. Edges point from a file to the
/// files it imports.
#[derive(Debug, Default)]
pub struct ImportGraph {
    graph: DiGraph<PathBuf, ()>,
    nodes: FxHashMap<PathBuf, NodeIndex>,
}

impl ImportGraph {
    /// Read every file and record its resolvable imports.
    ///
    /// `load_path` is searched after the importing file's own directory.
    /// Unreadable files and unresolvable imports (e.g. `sass:math`, URLs)
    /// contribute no edges; the compiler reports them.
    pub fn scan(files: &[PathBuf], load_path: &Path) -> Self {
        let mut graph = Self::default();

        for file in files {
            let Ok(content) = fs::read_to_string(file) else {
                continue;
            };
            let family = file
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("scss");
            let dir = file.parent().unwrap_or(Path::new(""));

            let from = graph.node(file);
            for spec in parse_imports(&content) {
                let target = resolve(dir, &spec, family)
                    .or_else(|| resolve(load_path, &spec, family));
                if let Some(target) = target {
                    let to = graph.node(&target);
                    graph.graph.update_edge(from, to, ());
                }
            }
        }

        graph
    }

    fn node(&mut self, path: &Path) -> NodeIndex {
        if let Some(&index) = self.nodes.get(path) {
            return index;
        }
        let index = self.graph.add_node(path.to_path_buf());
        self.nodes.insert(path.to_path_buf(), index);
        index
    }

    /// Files `file` depends on, directly or transitively.
    pub fn dependencies(&self, file: &Path) -> FxHashSet<PathBuf> {
        let Some(&start) = self.nodes.get(file) else {
            return FxHashSet::default();
        };
        let mut dfs = Dfs::new(&self.graph, start);
        let mut found = FxHashSet::default();
        while let Some(index) = dfs.next(&self.graph) {
            if index != start {
                found.insert(self.graph[index].clone());
            }
        }
        found
    }

    /// Files depending on `file`, directly or transitively.
    pub fn dependents(&self, file: &Path) -> FxHashSet<PathBuf> {
        let Some(&start) = self.nodes.get(file) else {
            return FxHashSet::default();
        };
        let reversed = Reversed(&self.graph);
        let mut dfs = Dfs::new(reversed, start);
        let mut found = FxHashSet::default();
        while let Some(index) = dfs.next(reversed) {
            if index != start {
                found.insert(self.graph[index].clone());
            }
        }
        found
    }

    /// Newest modification time among the transitive dependencies of `file`.
    pub fn latest_dependency_mtime(&self, file: &Path) -> Option<SystemTime> {
        self.dependencies(file)
            .iter()
            .filter_map(|dep| dep.metadata().and_then(|m| m.modified()).ok())
            .max()
    }
}

/// Import targets named by `@import` / `@use` / `@forward` rules.
///
/// Handles quoted lists (`@import "a", "b";`), `@use "x" as y` and the
/// unquoted form of the indented syntax (`@import a, b`).
fn parse_imports(content: &str) -> Vec<String> {
    let mut specs = Vec::new();

    for caps in IMPORT_RULE.captures_iter(content) {
        let rule = &caps[1];
        let quoted: Vec<_> = QUOTED
            .captures_iter(rule)
            .map(|c| c[1].to_owned())
            .collect();

        if quoted.is_empty() {
            specs.extend(
                rule.split(',')
                    .map(|s| s.trim().to_owned())
                    .filter(|s| !s.is_empty() && !s.contains(char::is_whitespace)),
            );
        } else if rule.trim_start().starts_with(['"', '\'']) {
            // Only `@import` takes a list; strings after `with (...)` are map keys
            let modifiers = [" as ", " with ", " show ", " hide "];
            if modifiers.iter().any(|m| rule.contains(m)) {
                specs.extend(quoted.into_iter().take(1));
            } else {
                specs.extend(quoted);
            }
        }
    }

    specs.retain(|s| !s.starts_with("sass:") && !s.contains("://") && !s.starts_with("url("));
    specs
}

/// Resolve an import the way Sass looks up files.
///
/// Tries `name`, `_name`, with the family extension first, then the other
/// stylesheet extensions, then `name/index` and `name/_index`.
fn resolve(dir: &Path, spec: &str, family: &str) -> Option<PathBuf> {
    let base = normalize_lexically(&dir.join(spec));
    let parent = base.parent()?.to_path_buf();
    let name = base.file_name()?.to_str()?.to_owned();

    let mut candidates = Vec::new();
    if Path::new(&name).extension().is_some() {
        candidates.push(parent.join(&name));
        candidates.push(parent.join(format!("_{name}")));
    } else {
        let extensions = std::iter::once(family)
            .chain(STYLE_EXTENSIONS.iter().copied().filter(|e| *e != family));
        for ext in extensions.clone() {
            candidates.push(parent.join(format!("{name}.{ext}")));
            candidates.push(parent.join(format!("_{name}.{ext}")));
        }
        for ext in extensions {
            candidates.push(base.join(format!("index.{ext}")));
            candidates.push(base.join(format!("_index.{ext}")));
        }
    }

    candidates.into_iter().find(|c| c.is_file())
}
