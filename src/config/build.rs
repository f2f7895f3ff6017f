//! `[build]` section configuration.
//!
//! Contains directory layout, page names, entry points and tool commands.

use super::defaults;
use educe::Educe;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// `[build]` section in pipewright.toml - build pipeline configuration.
///
/// # Example
/// ```toml
/// [build]
/// source = "src"           # Source tree
/// output = "dist"          # Distribution directory
/// pages = ["index.html"]   # Page names generated from the entry document
///
/// sass = ["npx", "sass"]
/// ```
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Project root directory (usually set via CLI `--root`).
    #[serde(default = "defaults::build::root")]
    #[educe(Default = defaults::build::root())]
    pub root: Option<PathBuf>,

    /// Source tree.
    #[serde(default = "defaults::build::source")]
    #[educe(Default = defaults::build::source())]
    pub source: PathBuf,

    /// Staging directory written by the prep stage.
    #[serde(default = "defaults::build::prep")]
    #[educe(Default = defaults::build::prep())]
    pub prep: PathBuf,

    /// Staging directory written by the bundling stage.
    #[serde(default = "defaults::build::next")]
    #[educe(Default = defaults::build::next())]
    pub next: PathBuf,

    /// Distribution directory.
    #[serde(default = "defaults::build::output")]
    #[educe(Default = defaults::build::output())]
    pub output: PathBuf,

    /// Entry document holding the build blocks, relative to `source`.
    #[serde(default = "defaults::build::entry")]
    #[educe(Default = defaults::build::entry())]
    pub entry: PathBuf,

    /// Output page names; each one is a copy of the compiled entry document.
    #[serde(default = "defaults::build::pages")]
    #[educe(Default = defaults::build::pages())]
    pub pages: Vec<String>,

    /// Module entry points bundled into self-contained scripts.
    #[serde(default = "defaults::build::entries")]
    #[educe(Default = defaults::build::entries())]
    pub entries: Vec<PathBuf>,

    /// Extensions of static assets copied verbatim.
    #[serde(default = "defaults::build::assets")]
    #[educe(Default = defaults::build::assets())]
    pub assets: Vec<String>,

    /// Force minification on or off, overriding the environment default.
    #[serde(default)]
    pub minify: Option<bool>,

    /// Sass compiler command.
    #[serde(default = "defaults::build::sass")]
    #[educe(Default = defaults::build::sass())]
    pub sass: Vec<String>,

    /// Module bundler command.
    #[serde(default = "defaults::build::esbuild")]
    #[educe(Default = defaults::build::esbuild())]
    pub esbuild: Vec<String>,

    /// ECMAScript version scripts are down-levelled to.
    #[serde(default = "defaults::build::js_target")]
    #[educe(Default = defaults::build::js_target())]
    pub js_target: String,
}

#[cfg(test)]
mod tests {
    use super::super::PipelineConfig;
    use std::path::PathBuf;

    #[test]
    fn test_build_config_defaults() {
        let config: PipelineConfig = toml::from_str("").unwrap();

        assert_eq!(config.build.source, PathBuf::from("src"));
        assert_eq!(config.build.prep, PathBuf::from("temp_prep"));
        assert_eq!(config.build.next, PathBuf::from("temp_next"));
        assert_eq!(config.build.output, PathBuf::from("dist"));
        assert_eq!(config.build.entry, PathBuf::from("app.html"));
        assert_eq!(config.build.pages, ["index.html", "about.html"]);
        assert_eq!(config.build.entries, [PathBuf::from("scripts/app.mjs")]);
        assert_eq!(config.build.assets, ["svg"]);
        assert_eq!(config.build.minify, None);
        assert_eq!(config.build.js_target, "es2015");
    }

    #[test]
    fn test_build_config_override() {
        let config = r#"
            [build]
            output = "public"
            pages = ["index.html"]
            minify = false
            sass = ["npx", "sass"]
        "#;
        let config: PipelineConfig = toml::from_str(config).unwrap();

        assert_eq!(config.build.output, PathBuf::from("public"));
        assert_eq!(config.build.pages, ["index.html"]);
        assert_eq!(config.build.minify, Some(false));
        assert_eq!(config.build.sass, ["npx", "sass"]);
        // untouched fields keep defaults
        assert_eq!(config.build.esbuild, ["esbuild"]);
    }

    #[test]
    fn test_build_config_unknown_field() {
        let config = r#"
            [build]
            templates = "templates"
        "#;
        let result: Result<PipelineConfig, _> = toml::from_str(config);
        assert!(result.is_err());
    }
}
