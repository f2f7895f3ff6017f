//! Build orchestration.
//!
//! # Architecture
//!
//! ```text
//! build()
//!     │
//!     ├── clean ──► remove temp_prep/, temp_next/, dist/
//!     │
//!     ├── prep ──► css / sass / scss / js / modules / html  ──► temp_prep/
//!     │     │
//!     │     ├── bundle ──► build blocks ──► temp_next/
//!     │     │     │
//!     │     │     └── finalize ──► prefix / down-level / pages ──► dist/
//!     │     │
//!     │     └── assets ──► svg ──► dist/<app folder>/
//! ```
//!
//! `rebuild()` runs the same graph without `clean`, so prep stays incremental.

use crate::{
    config::PipelineConfig,
    graph::TaskGraph,
    log,
    pipeline::{Toolchain, assets, blocks, context::BuildContext, finalize, prep},
};
use anyhow::{Context, Result};
use std::{fs, path::Path, time::Instant};

/// Remove every staging directory and the output directory.
pub fn clean(config: &PipelineConfig) -> Result<()> {
    let build = &config.build;
    for dir in [&build.prep, &build.next, &build.output] {
        remove_dir(dir)?;
    }
    log!("clean"; "removed staging and output directories");
    Ok(())
}

fn remove_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).with_context(|| format!("Failed to remove {}", dir.display()))?;
    }
    Ok(())
}

/// Full build from a clean slate.
pub fn build(config: &PipelineConfig, tools: &Toolchain) -> Result<()> {
    let ctx = BuildContext::from_config(config);
    run(config, tools, &ctx, true)
}

/// Incremental build over the existing staging directories.
pub fn rebuild(config: &PipelineConfig, tools: &Toolchain) -> Result<()> {
    let ctx = BuildContext::from_config(config);
    run(config, tools, &ctx, false)
}

/// Run the stage graph with the given context.
pub fn run(config: &PipelineConfig, tools: &Toolchain, ctx: &BuildContext, clean: bool) -> Result<()> {
    let started = Instant::now();
    log!(
        "build"; "{} ({}, minify {})",
        config.app.name,
        config.env.name(),
        if config.minify() { "on" } else { "off" }
    );

    let mut graph = TaskGraph::new();
    let prep_after: &[&'static str] = if clean {
        graph = graph.task("clean", &[], || self::clean(config));
        &["clean"]
    } else {
        &[]
    };

    graph
        .task("prep", prep_after, || prep::run(config, ctx, tools).map(drop))
        .task("bundle", &["prep"], || blocks::run(config).map(drop))
        .task("finalize", &["bundle"], || finalize::run(config).map(drop))
        .task("assets", &["prep"], || assets::run(config).map(drop))
        .run()?;

    log_build_result(config, started)
}

fn log_build_result(config: &PipelineConfig, started: Instant) -> Result<()> {
    let output = config.app_output();
    let file_count = fs::read_dir(&output)
        .with_context(|| format!("Failed to read {}", output.display()))?
        .filter_map(Result::ok)
        .count();

    if file_count == 0 {
        log!("warn"; "{} is empty, check [build.pages]", output.display());
    } else {
        log!("build"; "done in {}ms", started.elapsed().as_millis());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{collect_files, prep::tests::fake_tools, relative_to};

    const APP_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title><!-- @echo APP --></title>
    <!-- @exec makeOpenBuildTag('css', 'styles/app.css') -->
    <link rel="stylesheet" href="styles/base.css">
    <link rel="stylesheet" href="styles/app.scss">
    <!-- endbuild -->
    <!-- @ifdef PROD -->
    <script src="https://analytics.example.com/a.js"></script>
    <!-- @endif -->
</head>
<body>
    <img src="images/logo.svg">
    <!-- @exec makeOpenBuildTag('js', 'scripts/app.js') -->
    <script src="scripts/vendor.js"></script>
    <script src="scripts/app.mjs"></script>
    <!-- endbuild -->
</body>
</html>
"#;

    fn project() -> (tempfile::TempDir, PipelineConfig) {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::for_root(dir.path());
        let src = &config.build.source;

        let files = [
            ("app.html", APP_HTML),
            ("styles/base.css", ".base {\n  user-select: none;\n}\n"),
            ("styles/app.scss", ".app {\n  color: red;\n}\n"),
            ("scripts/vendor.js", "var vendor = 1;\n"),
            (
                "scripts/app.mjs",
                "const env = '/* @echo BUILD_ENV */';\nconsole.log(window.name ?? env);\n",
            ),
            ("images/logo.svg", "<svg xmlns=\"http://www.w3.org/2000/svg\"/>"),
        ];
        for (rel, content) in files {
            let path = src.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        (dir, config)
    }

    fn fixed_clock() -> i64 {
        1_700_000_000_000
    }

    /// Every file below `dir` with its content, keyed by relative path.
    fn snapshot(dir: &Path) -> Vec<(String, Vec<u8>)> {
        collect_files(dir, &["html", "css", "js", "svg"])
            .into_iter()
            .map(|f| {
                let rel = relative_to(&f, dir).unwrap().display().to_string();
                (rel, fs::read(f).unwrap())
            })
            .collect()
    }

    #[test]
    fn test_build_end_to_end() {
        let (_dir, config) = project();
        let ctx = BuildContext::with_clock(&config, fixed_clock);
        run(&config, &fake_tools(), &ctx, true).unwrap();

        let out = config.app_output();
        let index = fs::read_to_string(out.join("index.html")).unwrap();
        let about = fs::read_to_string(out.join("about.html")).unwrap();
        assert_eq!(index, about);

        for marker in ["@echo", "@exec", "@ifdef", "@endif", "build:", "endbuild"] {
            assert!(!index.contains(marker), "`{marker}` left in page");
        }
        assert!(index.contains("<title>WEB PROJECT BOILERPLATE</title>"));
        assert!(!index.contains("analytics"));
        assert!(index.contains(
            r#"<link rel="stylesheet" href="/webapp/web-project-boilerplate/styles/app-1hf7uaq00.css">"#
        ));
        assert!(index.contains(
            r#"<script src="/webapp/web-project-boilerplate/scripts/app-1hf7uaq00.js"></script>"#
        ));

        let css = fs::read_to_string(out.join("styles/app-1hf7uaq00.css")).unwrap();
        assert!(css.contains("-webkit-user-select"));
        assert!(css.find(".base").unwrap() < css.find(".app").unwrap());

        let js = fs::read_to_string(out.join("scripts/app-1hf7uaq00.js")).unwrap();
        assert!(js.contains("vendor"));
        assert!(js.contains("LOCAL"));
        assert!(!js.contains("??"));

        assert!(out.join("images/logo.svg").is_file());
    }

    #[test]
    fn test_build_is_idempotent() {
        let (_dir, config) = project();
        let ctx = BuildContext::with_clock(&config, fixed_clock);
        let tools = fake_tools();

        run(&config, &tools, &ctx, true).unwrap();
        let first = snapshot(&config.build.output);
        run(&config, &tools, &ctx, true).unwrap();
        assert_eq!(snapshot(&config.build.output), first);

        run(&config, &tools, &ctx, false).unwrap();
        assert_eq!(snapshot(&config.build.output), first);
    }

    #[test]
    fn test_failing_stage_is_named() {
        let (_dir, config) = project();
        fs::write(config.build.source.join("broken.html"), "<!-- @echo NOPE -->\n").unwrap();
        let ctx = BuildContext::with_clock(&config, fixed_clock);

        let err = run(&config, &fake_tools(), &ctx, true).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.starts_with("stage `prep` failed"));
        assert!(message.contains("broken.html:1"));
        assert!(!config.app_output().exists());
    }

    #[test]
    fn test_clean_removes_everything() {
        let (_dir, config) = project();
        for dir in [&config.build.prep, &config.build.next, &config.build.output] {
            fs::create_dir_all(dir).unwrap();
        }
        clean(&config).unwrap();
        assert!(!config.build.prep.exists());
        assert!(!config.build.next.exists());
        assert!(!config.build.output.exists());
        assert!(config.build.source.exists());
    }
}
