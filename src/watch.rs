//! File system watcher for incremental rebuilds.
//!
//! Monitors the source tree and re-runs the pipeline (without `clean`) on
//! every debounced batch of relevant changes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      Event Loop                          │
//! │                                                          │
//! │  ┌──────────┐    ┌──────────┐    ┌────────────────────┐  │
//! │  │ notify   │───▶│ Debouncer│───▶│ handle_changes()   │  │
//! │  │ events   │    │ (300ms)  │    │ prep ─► bundle ─►  │  │
//! │  └──────────┘    └──────────┘    │ finalize ∥ assets  │  │
//! │                                  └────────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Rebuilds run on the watcher thread, one at a time. A failing rebuild is
//! logged and watching continues.

use crate::{
    build,
    config::PipelineConfig,
    log,
    pipeline::{
        SOURCE_EXTENSIONS, Toolchain, collect_files, deps::ImportGraph, has_extension,
        style::StyleFamily,
    },
};
use anyhow::{Context, Result};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use rustc_hash::FxHashSet;
use std::{
    path::{Path, PathBuf},
    sync::mpsc::{self, RecvTimeoutError},
    time::{Duration, Instant},
};

// =============================================================================
// Constants
// =============================================================================

const DEBOUNCE_MS: u64 = 300;
const REBUILD_COOLDOWN_MS: u64 = 800;

// =============================================================================
// Path Utilities
// =============================================================================

/// Check if path is a temp/backup file (editor artifacts).
fn is_temp_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    matches!(ext, "bck" | "bak" | "backup" | "swp" | "swo" | "tmp")
        || name.ends_with('~')
        || name.starts_with('.')
}

/// Whether a change to `path` can affect the build.
fn is_watched(path: &Path) -> bool {
    !is_temp_file(path) && has_extension(path, SOURCE_EXTENSIONS)
}

/// `path` relative to `root` for log display.
fn rel_path(path: &Path, root: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}

// =============================================================================
// Debounce State
// =============================================================================

/// Batches rapid file events with debouncing and rebuild cooldown.
///
/// Events arriving during the cooldown are kept; the batch just waits until
/// the cooldown is over.
struct Debouncer {
    pending: FxHashSet<PathBuf>,
    last_event: Option<Instant>,
    last_rebuild: Option<Instant>,
}

impl Debouncer {
    fn new() -> Self {
        Self {
            pending: FxHashSet::default(),
            last_event: None,
            last_rebuild: None,
        }
    }

    fn in_cooldown(&self) -> bool {
        self.last_rebuild
            .is_some_and(|t| t.elapsed() < Duration::from_millis(REBUILD_COOLDOWN_MS))
    }

    fn add(&mut self, event: Event) {
        let before = self.pending.len();
        self.pending
            .extend(event.paths.into_iter().filter(|p| is_watched(p)));
        if self.pending.len() != before {
            self.last_event = Some(Instant::now());
        }
    }

    fn ready(&self) -> bool {
        !self.pending.is_empty()
            && !self.in_cooldown()
            && self
                .last_event
                .is_some_and(|t| t.elapsed() >= Duration::from_millis(DEBOUNCE_MS))
    }

    fn take(&mut self) -> Vec<PathBuf> {
        self.last_event = None;
        let mut paths: Vec<_> = self.pending.drain().collect();
        paths.sort();
        paths
    }

    fn mark_rebuild(&mut self) {
        self.last_rebuild = Some(Instant::now());
    }

    fn timeout(&self) -> Duration {
        if self.pending.is_empty() {
            Duration::from_secs(60)
        } else {
            Duration::from_millis(DEBOUNCE_MS)
        }
    }
}

// =============================================================================
// Event Handler
// =============================================================================

/// Rebuild after `paths` changed, logging the outcome.
fn handle_changes(paths: &[PathBuf], config: &PipelineConfig, tools: &Toolchain) {
    let root = config.get_root();
    let names: Vec<_> = paths.iter().map(|p| rel_path(p, root)).collect();
    log!("watch"; "{} changed, rebuilding...", names.join(", "));

    let affected = affected_stylesheets(paths, &config.build.source);
    if !affected.is_empty() {
        let affected: Vec<_> = affected.iter().map(|p| rel_path(p, root)).collect();
        log!("watch"; "imported by {}", affected.join(", "));
    }

    if let Err(err) = build::rebuild(config, tools) {
        log!("watch"; "build failed ({})", names.join(", "));
        log!("error"; "{err:#}");
    }
    eprintln!(); // Blank line to separate rebuild sessions
}

/// Stylesheets that import any of the changed `paths`, directly or
/// transitively, and did not change themselves.
fn affected_stylesheets(paths: &[PathBuf], source: &Path) -> Vec<PathBuf> {
    let extensions = StyleFamily::ALL.map(StyleFamily::extension);
    let changed: Vec<_> = paths
        .iter()
        .filter(|p| has_extension(p, &extensions))
        .collect();
    if changed.is_empty() {
        return Vec::new();
    }

    let graph = ImportGraph::scan(&collect_files(source, &extensions), source);
    let mut affected: Vec<_> = changed
        .iter()
        .flat_map(|path| graph.dependents(path))
        .filter(|path| !paths.contains(path))
        .collect::<FxHashSet<_>>()
        .into_iter()
        .collect();
    affected.sort();
    affected
}

const fn is_relevant(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
    )
}

// =============================================================================
// Public API
// =============================================================================

/// Watch the source tree and rebuild on change. Blocks forever.
pub fn watch_for_changes_blocking(config: &PipelineConfig, tools: &Toolchain) -> Result<()> {
    let source = &config.build.source;
    let (tx, rx) = mpsc::channel();
    let mut watcher = notify::recommended_watcher(tx).context("Failed to create file watcher")?;
    watcher
        .watch(source, RecursiveMode::Recursive)
        .with_context(|| format!("Failed to watch {}", source.display()))?;

    log!("watch"; "{}/", rel_path(source, config.get_root()));
    eprintln!(); // Blank line to separate init logs from change events

    let mut debouncer = Debouncer::new();

    loop {
        match rx.recv_timeout(debouncer.timeout()) {
            Ok(Ok(event)) if is_relevant(&event) => debouncer.add(event),
            Ok(Err(e)) => log!("watch"; "error: {e}"),
            Err(RecvTimeoutError::Timeout) if debouncer.ready() => {
                handle_changes(&debouncer.take(), config, tools);
                debouncer.mark_rebuild();
            }
            Err(RecvTimeoutError::Disconnected) => break,
            // Irrelevant events, timeout without a ready batch
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind};
    use std::thread;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for path in paths {
            event = event.add_path(PathBuf::from(path));
        }
        event
    }

    #[test]
    fn test_watched_paths() {
        assert!(is_watched(Path::new("/p/src/styles/app.scss")));
        assert!(is_watched(Path::new("/p/src/images/logo.svg")));
        assert!(!is_watched(Path::new("/p/src/styles/.app.scss.swp")));
        assert!(!is_watched(Path::new("/p/src/app.html~")));
        assert!(!is_watched(Path::new("/p/src/notes.txt")));
    }

    #[test]
    fn test_debouncer_batches_events() {
        let mut debouncer = Debouncer::new();
        assert!(!debouncer.ready());

        debouncer.add(event(
            EventKind::Modify(ModifyKind::Any),
            &["/p/src/b.css", "/p/src/a.css", "/p/src/.a.css.swp"],
        ));
        debouncer.add(event(EventKind::Create(CreateKind::File), &["/p/src/a.css"]));
        assert!(!debouncer.ready());

        thread::sleep(Duration::from_millis(DEBOUNCE_MS + 20));
        assert!(debouncer.ready());
        assert_eq!(
            debouncer.take(),
            [PathBuf::from("/p/src/a.css"), PathBuf::from("/p/src/b.css")]
        );
        assert!(!debouncer.ready());
    }

    #[test]
    fn test_cooldown_defers_batch() {
        let mut debouncer = Debouncer::new();
        debouncer.mark_rebuild();
        debouncer.add(event(EventKind::Modify(ModifyKind::Any), &["/p/src/a.css"]));

        thread::sleep(Duration::from_millis(DEBOUNCE_MS + 20));
        assert!(!debouncer.ready());

        thread::sleep(Duration::from_millis(REBUILD_COOLDOWN_MS));
        assert!(debouncer.ready());
    }

    #[test]
    fn test_affected_stylesheets_follow_imports() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path();
        std::fs::create_dir_all(src.join("styles")).unwrap();
        std::fs::write(src.join("styles/app.scss"), "@use 'theme';\n").unwrap();
        std::fs::write(src.join("styles/_theme.scss"), "@use 'colors';\n").unwrap();
        std::fs::write(src.join("styles/_colors.scss"), "$red: #f00;\n").unwrap();
        std::fs::write(src.join("styles/other.scss"), ".x { y: z; }\n").unwrap();

        let affected = affected_stylesheets(&[src.join("styles/_colors.scss")], src);
        assert_eq!(
            affected,
            [src.join("styles/_theme.scss"), src.join("styles/app.scss")]
        );

        // Changed files are not listed twice
        let affected = affected_stylesheets(
            &[src.join("styles/_colors.scss"), src.join("styles/app.scss")],
            src,
        );
        assert_eq!(affected, [src.join("styles/_theme.scss")]);

        assert!(affected_stylesheets(&[src.join("app.html")], src).is_empty());
    }

    #[test]
    fn test_ignored_only_batch_never_fires() {
        let mut debouncer = Debouncer::new();
        debouncer.add(event(EventKind::Modify(ModifyKind::Any), &["/p/src/x.tmp"]));
        thread::sleep(Duration::from_millis(DEBOUNCE_MS + 20));
        assert!(!debouncer.ready());
    }
}
