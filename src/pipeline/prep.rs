//! Prep stage: per-type pipelines over the source tree into `temp_prep/`.
//!
//! ```text
//! css   ─ preprocess ─────────────────────────────┐
//! sass  ─ preprocess ─ sass ──────────────────────┤
//! scss  ─ preprocess ─ sass ──────────────────────┤
//! js    ─ preprocess ─┐                           ├─► temp_prep/
//! mjs   ─ preprocess ─┴─ entries ─ bundler ───────┤
//! html  ─ preprocess ─────────────────────────────┘
//! ```
//!
//! Every step is incremental: a file whose staged output is newer than the
//! file itself (and, for stylesheets, than everything it imports) is skipped.
//! Entry points are the exception and are always re-staged and re-bundled.

use super::{
    FileRecord, StageReport, Toolchain, collect_files,
    context::BuildContext,
    deps::ImportGraph,
    is_up_to_date,
    preprocess::{CommentSyntax, preprocess},
    script::{EntryPoint, bundle_entries},
    style::StyleFamily,
};
use crate::{config::PipelineConfig, log};
use anyhow::{Context, Result, bail};
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use std::path::{Path, PathBuf};

/// Steps of the prep stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepStep {
    Css,
    Sass,
    Scss,
    Js,
    /// `.mjs` preprocessing followed by entry-point bundling.
    Modules,
    Html,
}

impl PrepStep {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Css => "css",
            Self::Sass => "sass",
            Self::Scss => "scss",
            Self::Js => "js",
            Self::Modules => "modules",
            Self::Html => "html",
        }
    }
}

/// Shared inputs of all prep steps.
struct Prep<'a> {
    config: &'a PipelineConfig,
    ctx: &'a BuildContext,
    tools: &'a Toolchain,
}

/// Run every prep step.
///
/// Stylesheets and markup run in parallel with scripts. Within scripts, plain
/// `.js` is staged before the modules step bundles entries that may import it.
pub fn run(config: &PipelineConfig, ctx: &BuildContext, tools: &Toolchain) -> Result<StageReport> {
    let prep = Prep { config, ctx, tools };
    let independent = [PrepStep::Css, PrepStep::Sass, PrepStep::Scss, PrepStep::Html];

    let (scripts, others) = rayon::join(
        || -> Result<StageReport> {
            let mut report = prep.step(PrepStep::Js)?;
            report += prep.step(PrepStep::Modules)?;
            Ok(report)
        },
        || {
            independent
                .par_iter()
                .map(|step| prep.step(*step))
                .collect::<Result<Vec<_>>>()
        },
    );

    let mut report = scripts?;
    for step_report in others? {
        report += step_report;
    }

    log!("prep"; "{report}");
    Ok(report)
}

impl Prep<'_> {
    fn step(&self, step: PrepStep) -> Result<StageReport> {
        let report = match step {
            PrepStep::Css => self.styles(StyleFamily::Css),
            PrepStep::Sass => self.styles(StyleFamily::Sass),
            PrepStep::Scss => self.styles(StyleFamily::Scss),
            PrepStep::Js => self.plain(&["js"]),
            PrepStep::Modules => self.modules(),
            PrepStep::Html => self.plain(&["html"]),
        };
        report.with_context(|| format!("prep step `{}` failed", step.name()))
    }

    fn source(&self) -> &Path {
        &self.config.build.source
    }

    fn staging(&self) -> &Path {
        &self.config.build.prep
    }

    /// Entry points as absolute source paths.
    fn entry_sources(&self) -> FxHashSet<PathBuf> {
        self.config
            .build
            .entries
            .iter()
            .map(|rel| self.source().join(rel))
            .collect()
    }

    /// Preprocess one source file into staging.
    fn stage(&self, path: &Path) -> Result<PathBuf> {
        let record = self.read_preprocessed(path)?;
        record.write_to(self.staging())
    }

    fn read_preprocessed(&self, path: &Path) -> Result<FileRecord> {
        let record = FileRecord::read(path, self.source())?;
        let Some(syntax) = CommentSyntax::from_path(path) else {
            return Ok(record);
        };
        let content = preprocess(&record.content, syntax, self.ctx, &record.dest)?;
        Ok(record.map_content(content))
    }

    /// Stage files of `extensions` that changed, skipping entry points.
    fn plain(&self, extensions: &[&str]) -> Result<StageReport> {
        let entries = self.entry_sources();
        let files: Vec<_> = collect_files(self.source(), extensions)
            .into_iter()
            .filter(|f| !entries.contains(f))
            .collect();

        self.stage_changed(&files, |file| {
            let dest = self.staged_path(file)?;
            Ok(is_up_to_date(file, &dest, None))
        })
    }

    fn staged_path(&self, file: &Path) -> Result<PathBuf> {
        Ok(self.staging().join(super::relative_to(file, self.source())?))
    }

    /// Stage every file for which `fresh` is false, in parallel.
    fn stage_changed<F>(&self, files: &[PathBuf], fresh: F) -> Result<StageReport>
    where
        F: Fn(&Path) -> Result<bool> + Sync,
    {
        files
            .par_iter()
            .map(|file| {
                if fresh(file)? {
                    return Ok(StageReport {
                        processed: 0,
                        skipped: 1,
                    });
                }
                self.stage(file)?;
                Ok(StageReport::processed(1))
            })
            .try_reduce(StageReport::default, |mut a, b| {
                a += b;
                Ok(a)
            })
    }

    /// One stylesheet family: import-aware freshness, preprocess, compile.
    fn styles(&self, family: StyleFamily) -> Result<StageReport> {
        let all_styles = collect_files(
            self.source(),
            &StyleFamily::ALL.map(StyleFamily::extension),
        );
        let files: Vec<_> = collect_files(self.source(), &[family.extension()])
            .into_iter()
            .filter(|f| !family.is_partial(f))
            .collect();
        if files.is_empty() {
            return Ok(StageReport::default());
        }

        let graph = ImportGraph::scan(&all_styles, self.source());
        let stale: Vec<_> = files
            .iter()
            .filter(|file| {
                self.staged_path(file)
                    .map(|dest| !is_up_to_date(file, &dest, graph.latest_dependency_mtime(file)))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        if family.is_sass() && !stale.is_empty() {
            self.tools.styles.check()?;
        }

        let report = stale
            .par_iter()
            .map(|file| -> Result<StageReport> {
                let record = self.read_preprocessed(file)?;
                let record = if family.is_sass() {
                    let css = self.tools.styles.compile(
                        &record.content,
                        family,
                        &record.source,
                        self.source(),
                    )?;
                    record.map_content(css)
                } else {
                    record
                };
                // Compiled output keeps the source extension, so `a.css`,
                // `a.sass` and `a.scss` never alias in staging
                record.write_to(self.staging())?;
                Ok(StageReport::processed(1))
            })
            .try_reduce(StageReport::default, |mut a, b| {
                a += b;
                Ok(a)
            })?;

        Ok(StageReport {
            processed: report.processed,
            skipped: files.len() - stale.len(),
        })
    }

    /// Stage `.mjs` modules, then re-stage and bundle every entry point.
    fn modules(&self) -> Result<StageReport> {
        let mut report = self.plain(&["mjs"])?;

        let entries = &self.config.build.entries;
        for entry in entries {
            let source = self.source().join(entry);
            if !source.is_file() {
                bail!("entry point {} does not exist", source.display());
            }
            self.stage(&source)?;
        }

        let points = EntryPoint::assign(entries, self.staging());
        report.processed += bundle_entries(
            self.tools.bundler.as_ref(),
            &points,
            self.staging(),
            self.config.bundle_mode(),
        )?;
        Ok(report)
    }
}
