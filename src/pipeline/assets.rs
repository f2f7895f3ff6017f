//! Static asset copy: `src/**/*.<asset>` into the app folder of `dist/`.

use super::{StageReport, collect_files, is_up_to_date, relative_to};
use crate::{config::PipelineConfig, log};
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::fs;

/// Copy every configured asset unchanged, skipping copies that are current.
pub fn run(config: &PipelineConfig) -> Result<StageReport> {
    let source = &config.build.source;
    let app_output = config.app_output();
    let extensions: Vec<&str> = config.build.assets.iter().map(String::as_str).collect();
    let files = collect_files(source, &extensions);

    let report = files
        .par_iter()
        .map(|file| -> Result<StageReport> {
            let dest = app_output.join(relative_to(file, source)?);
            if is_up_to_date(file, &dest, None) {
                return Ok(StageReport {
                    processed: 0,
                    skipped: 1,
                });
            }
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(file, &dest).with_context(|| {
                format!("Failed to copy {} to {}", file.display(), dest.display())
            })?;
            Ok(StageReport::processed(1))
        })
        .try_reduce(StageReport::default, |mut a, b| {
            a += b;
            Ok(a)
        })?;

    log!("assets"; "{report}");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copies_assets_into_app_folder() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::for_root(dir.path());
        let src = &config.build.source;
        fs::create_dir_all(src.join("images")).unwrap();
        fs::write(src.join("images/logo.svg"), "<svg/>").unwrap();
        fs::write(src.join("images/notes.txt"), "skip").unwrap();

        let report = run(&config).unwrap();
        assert_eq!(report.processed, 1);

        let out = config.app_output();
        assert_eq!(fs::read_to_string(out.join("images/logo.svg")).unwrap(), "<svg/>");
        assert!(!out.join("images/notes.txt").exists());
    }
}
