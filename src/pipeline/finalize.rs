//! Finalize stage: `temp_next/` into `dist/`.
//!
//! Stylesheets get vendor prefixes, scripts are down-levelled to the
//! configured ECMAScript target, and the entry document is written once per
//! configured page. Minification of all three follows the run's `minify`
//! setting. Each artifact kind notifies live-reload clients when it lands.

use super::{StageReport, collect_files, relative_to, write_file};
use crate::{
    config::PipelineConfig,
    log, reload,
    utils::{css, js, minify::minify_html},
};
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::{fs, path::Path};

/// Artifact kinds, finalized independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Css,
    Js,
    Html,
}

impl ArtifactKind {
    pub const ALL: [Self; 3] = [Self::Css, Self::Js, Self::Html];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Css => "css",
            Self::Js => "js",
            Self::Html => "html",
        }
    }
}

/// Finalize every artifact kind in parallel.
pub fn run(config: &PipelineConfig) -> Result<StageReport> {
    let reports = ArtifactKind::ALL
        .par_iter()
        .map(|kind| {
            let report = match kind {
                ArtifactKind::Css => styles(config),
                ArtifactKind::Js => scripts(config),
                ArtifactKind::Html => pages(config),
            }
            .with_context(|| format!("finalize step `{}` failed", kind.name()))?;
            reload::notify(*kind);
            Ok(report)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut total = StageReport::default();
    for report in reports {
        total += report;
    }
    log!("finalize"; "{total}");
    Ok(total)
}

/// Apply `transform` to every `extension` file of `temp_next/` into `dist/`.
fn each_file<F>(config: &PipelineConfig, extension: &str, transform: F) -> Result<StageReport>
where
    F: Fn(&str, &Path) -> Result<String> + Sync,
{
    let next = &config.build.next;
    let files = collect_files(next, &[extension]);

    files.par_iter().try_for_each(|file| -> Result<()> {
        let rel = relative_to(file, next)?;
        let source = fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let output = transform(&source, &rel)?;
        write_file(&config.build.output.join(&rel), output.as_bytes())
    })?;

    Ok(StageReport::processed(files.len()))
}

fn styles(config: &PipelineConfig) -> Result<StageReport> {
    let minify = config.minify();
    each_file(config, "css", |source, rel| {
        css::prefix(source, &rel.to_string_lossy(), minify)
    })
}

fn scripts(config: &PipelineConfig) -> Result<StageReport> {
    let minify = config.minify();
    let target = &config.build.js_target;
    each_file(config, "js", |source, rel| {
        js::transpile(source, rel, target, minify)
    })
}

/// Write the compiled entry document once per configured page.
fn pages(config: &PipelineConfig) -> Result<StageReport> {
    let entry = config.build.next.join(&config.build.entry);
    let document =
        fs::read(&entry).with_context(|| format!("Failed to read {}", entry.display()))?;
    let body = minify_html(&document, config.minify());

    let app_output = config.app_output();
    for page in &config.build.pages {
        write_file(&app_output.join(page), &body)?;
    }
    Ok(StageReport::processed(config.build.pages.len()))
}
