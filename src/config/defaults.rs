//! Default values for configuration fields.
//!
//! These functions are used by serde for default deserialization.

// ============================================================================
// Common Defaults
// ============================================================================

pub fn r#true() -> bool {
    true
}

// ============================================================================
// [app] Section Defaults
// ============================================================================

pub mod app {
    pub fn name() -> String {
        "WEB PROJECT BOILERPLATE".into()
    }

    pub fn folder() -> String {
        "/webapp/web-project-boilerplate/".into()
    }
}

// ============================================================================
// [build] Section Defaults
// ============================================================================

pub mod build {
    use std::path::PathBuf;

    pub fn root() -> Option<PathBuf> {
        None
    }

    pub fn source() -> PathBuf {
        "src".into()
    }

    pub fn prep() -> PathBuf {
        "temp_prep".into()
    }

    pub fn next() -> PathBuf {
        "temp_next".into()
    }

    pub fn output() -> PathBuf {
        "dist".into()
    }

    pub fn entry() -> PathBuf {
        "app.html".into()
    }

    pub fn pages() -> Vec<String> {
        vec!["index.html".into(), "about.html".into()]
    }

    pub fn entries() -> Vec<PathBuf> {
        vec!["scripts/app.mjs".into()]
    }

    pub fn assets() -> Vec<String> {
        vec!["svg".into()]
    }

    pub fn sass() -> Vec<String> {
        vec!["sass".into()]
    }

    pub fn esbuild() -> Vec<String> {
        vec!["esbuild".into()]
    }

    pub fn js_target() -> String {
        "es2015".into()
    }
}

// ============================================================================
// [serve] Section Defaults
// ============================================================================

pub mod serve {
    pub fn interface() -> String {
        "127.0.0.1".into()
    }

    pub fn port() -> u16 {
        9000
    }

    pub fn reload_port() -> u16 {
        35729
    }
}
