//! Module entry points and the bundler seam.
//!
//! All entry points are bundled in one bundler invocation. Each entry is
//! handed over under a synthetic numeric name so that `a/app.mjs` and
//! `b/app.mjs` cannot collide in the bundler's output directory; the result
//! is then moved back to the entry's own staging path.

use crate::{
    config::BundleMode,
    log,
    utils::exec::{EMPTY_FILTER, exec, require_command},
};
use anyhow::{Context, Result, bail};
use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

/// Scratch directory (inside the staging directory) the bundler writes to.
const SCRATCH_DIR: &str = ".bundle";

/// One entry point for the duration of a bundler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    /// Synthetic name, unique within one invocation.
    pub id: usize,
    /// Staged (preprocessed) entry file the bundler reads.
    pub staged: PathBuf,
    /// Path relative to the staging directory the bundle is restored to.
    pub dest: PathBuf,
}

impl EntryPoint {
    /// Number the configured entries in order.
    pub fn assign(entries: &[PathBuf], staging: &Path) -> Vec<Self> {
        entries
            .iter()
            .enumerate()
            .map(|(id, rel)| Self {
                id,
                staged: staging.join(rel),
                dest: rel.clone(),
            })
            .collect()
    }

    /// File name the bundler produces for this entry.
    pub fn output_name(&self) -> String {
        format!("{}.js", self.id)
    }
}

/// Resolves each entry's module graph into one self-contained script.
pub trait ScriptBundler: Send + Sync {
    /// Fail early when the bundler cannot run at all.
    fn check(&self) -> Result<()> {
        Ok(())
    }

    /// Bundle every entry into `<outdir>/<id>.js`.
    fn bundle(&self, entries: &[EntryPoint], outdir: &Path, mode: BundleMode) -> Result<()>;
}

/// The external `esbuild` command.
pub struct Esbuild {
    command: Vec<String>,
    root: PathBuf,
}

impl Esbuild {
    pub fn new(command: Vec<String>, root: PathBuf) -> Self {
        Self { command, root }
    }

    fn arguments(entries: &[EntryPoint], outdir: &Path, mode: BundleMode) -> Vec<OsString> {
        let mut args: Vec<OsString> = entries
            .iter()
            .map(|e| format!("{}={}", e.id, e.staged.display()).into())
            .collect();
        args.push("--bundle".into());
        args.push(format!("--outdir={}", outdir.display()).into());
        args.push(
            match mode {
                BundleMode::Production => "--minify",
                BundleMode::Development => "--sourcemap=inline",
            }
            .into(),
        );
        args.push("--log-level=warning".into());
        args
    }
}

impl ScriptBundler for Esbuild {
    fn check(&self) -> Result<()> {
        require_command("[build.esbuild]", &self.command)
    }

    fn bundle(&self, entries: &[EntryPoint], outdir: &Path, mode: BundleMode) -> Result<()> {
        let args = Self::arguments(entries, outdir, mode);
        exec(&self.root, &self.command, &args, None, &EMPTY_FILTER)?;
        Ok(())
    }
}

/// Bundle `entries` and move each result back over its staged entry.
///
/// Returns the number of bundled entries.
pub fn bundle_entries(
    bundler: &dyn ScriptBundler,
    entries: &[EntryPoint],
    staging: &Path,
    mode: BundleMode,
) -> Result<usize> {
    if entries.is_empty() {
        return Ok(0);
    }

    bundler.check()?;

    let scratch = staging.join(SCRATCH_DIR);
    if scratch.exists() {
        fs::remove_dir_all(&scratch)?;
    }
    fs::create_dir_all(&scratch)?;

    bundler.bundle(entries, &scratch, mode)?;

    for entry in entries {
        let output = scratch.join(entry.output_name());
        if !output.is_file() {
            bail!(
                "bundler produced no output for entry {}",
                entry.dest.display()
            );
        }
        let dest = staging.join(&entry.dest);
        fs::rename(&output, &dest).with_context(|| {
            format!("Failed to move {} to {}", output.display(), dest.display())
        })?;
        log!("bundle"; "{}", entry.dest.display());
    }

    fs::remove_dir_all(&scratch)?;
    Ok(entries.len())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Stands in for esbuild: each "bundle" is the staged entry itself.
    pub(crate) struct CopyBundler;

    impl ScriptBundler for CopyBundler {
        fn bundle(&self, entries: &[EntryPoint], outdir: &Path, _: BundleMode) -> Result<()> {
            for entry in entries {
                let content = fs::read_to_string(&entry.staged)?;
                fs::write(
                    outdir.join(entry.output_name()),
                    format!("/* bundled */\n{content}"),
                )?;
            }
            Ok(())
        }
    }

    #[test]
    fn test_assign_ids_in_order() {
        let staging = Path::new("/tmp/prep");
        let entries = EntryPoint::assign(
            &["a/app.mjs".into(), "b/app.mjs".into()],
            staging,
        );
        assert_eq!(entries[0].id, 0);
        assert_eq!(entries[1].output_name(), "1.js");
        assert_eq!(entries[1].staged, staging.join("b/app.mjs"));
        assert_eq!(entries[1].dest, PathBuf::from("b/app.mjs"));
    }

    #[test]
    fn test_esbuild_arguments_follow_mode() {
        let entries = EntryPoint::assign(&["app.mjs".into()], Path::new("/p"));
        let dev = Esbuild::arguments(&entries, Path::new("/p/.bundle"), BundleMode::Development);
        assert_eq!(dev[0], OsString::from("0=/p/app.mjs"));
        assert!(dev.contains(&"--bundle".into()));
        assert!(dev.contains(&"--sourcemap=inline".into()));
        assert!(!dev.contains(&"--minify".into()));

        let prod = Esbuild::arguments(&entries, Path::new("/p/.bundle"), BundleMode::Production);
        assert!(prod.contains(&"--minify".into()));
    }

    #[test]
    fn test_bundle_entries_restores_original_names() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path();
        fs::create_dir_all(staging.join("a")).unwrap();
        fs::create_dir_all(staging.join("b")).unwrap();
        fs::write(staging.join("a/app.mjs"), "a").unwrap();
        fs::write(staging.join("b/app.mjs"), "b").unwrap();

        let entries = EntryPoint::assign(&["a/app.mjs".into(), "b/app.mjs".into()], staging);
        let count =
            bundle_entries(&CopyBundler, &entries, staging, BundleMode::Development).unwrap();

        assert_eq!(count, 2);
        assert_eq!(
            fs::read_to_string(staging.join("a/app.mjs")).unwrap(),
            "/* bundled */\na"
        );
        assert_eq!(
            fs::read_to_string(staging.join("b/app.mjs")).unwrap(),
            "/* bundled */\nb"
        );
        assert!(!staging.join(SCRATCH_DIR).exists());
    }

    #[test]
    fn test_esbuild_bundles_when_available() {
        let esbuild = vec!["esbuild".to_string()];
        if require_command("esbuild", &esbuild).is_err() {
            return;
        }

        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path();
        fs::write(staging.join("dep.mjs"), "export const answer = 42;\n").unwrap();
        fs::write(
            staging.join("app.mjs"),
            "import { answer } from './dep.mjs';\nconsole.log(answer);\n",
        )
        .unwrap();

        let bundler = Esbuild::new(esbuild, staging.to_path_buf());
        let entries = EntryPoint::assign(&["app.mjs".into()], staging);
        bundle_entries(&bundler, &entries, staging, BundleMode::Production).unwrap();

        let bundled = fs::read_to_string(staging.join("app.mjs")).unwrap();
        assert!(!bundled.contains("import"));
        assert!(bundled.contains("42"));
    }
}
