//! Build context and the cache buster.
//!
//! The context is built once per run from configuration and environment, and
//! is read-only afterwards. Sources reach it through `@echo`, `@exec` and
//! `@if` directives.

use crate::config::{Environment, PipelineConfig};
use std::{collections::BTreeMap, fmt, path::Path};
use thiserror::Error;

/// Milliseconds since the Unix epoch.
pub type Clock = fn() -> i64;

/// The wall clock used outside tests.
pub fn system_clock() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ============================================================================
// Values
// ============================================================================

/// A value stored under a context key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextValue {
    Text(String),
    Flag(bool),
}

impl ContextValue {
    /// Truthiness as used by `@if KEY`: flags by value, text when non-empty.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Text(text) => !text.is_empty(),
            Self::Flag(flag) => *flag,
        }
    }
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Flag(flag) => write!(f, "{flag}"),
        }
    }
}

/// Failure of a context function call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CallError {
    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    #[error("`{name}` expects {expected} arguments, got {got}")]
    Arity {
        name: &'static str,
        expected: usize,
        got: usize,
    },
}

// ============================================================================
// Build Context
// ============================================================================

/// Symbolic keys and functions available to source directives.
#[derive(Debug, Clone)]
pub struct BuildContext {
    values: BTreeMap<String, ContextValue>,
    folder: String,
    clock: Clock,
}

impl BuildContext {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::with_clock(config, system_clock)
    }

    /// Build the context with an explicit clock for the cache buster.
    pub fn with_clock(config: &PipelineConfig, clock: Clock) -> Self {
        let folder = config.app.url_folder();
        let mut values = BTreeMap::new();

        // User values first so built-in keys cannot be shadowed
        for (key, value) in &config.context {
            values.insert(key.clone(), ContextValue::Text(value.clone()));
        }

        values.insert("APP".into(), ContextValue::Text(config.app.name.clone()));
        values.insert("APP_FOLDER".into(), ContextValue::Text(folder.clone()));
        values.insert(
            "BUILD_ENV".into(),
            ContextValue::Text(config.env.name().into()),
        );
        for env in Environment::ALL {
            values.insert(env.name().into(), ContextValue::Flag(env == config.env));
        }
        values.insert("MINIFY".into(), ContextValue::Flag(config.minify()));

        Self {
            values,
            folder,
            clock,
        }
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.values.get(key)
    }

    /// Whether `@ifdef` sees `key`.
    ///
    /// Flags that are off count as undefined, so `@ifdef PROD` only holds in
    /// a production build.
    pub fn is_defined(&self, key: &str) -> bool {
        self.values
            .get(key)
            .is_some_and(|value| *value != ContextValue::Flag(false))
    }

    /// Call a built-in function.
    pub fn call(&self, name: &str, args: &[String]) -> Result<String, CallError> {
        match name {
            "makeOpenBuildTag" => {
                let [kind, file] = args else {
                    return Err(CallError::Arity {
                        name: "makeOpenBuildTag",
                        expected: 2,
                        got: args.len(),
                    });
                };
                Ok(make_open_build_tag(kind, file, &self.folder, (self.clock)()))
            }
            _ => Err(CallError::UnknownFunction(name.to_owned())),
        }
    }
}

// ============================================================================
// Cache Buster
// ============================================================================

/// Render a non-negative integer in base 32 (`0-9a-v`).
pub fn base32(mut value: u64) -> String {
    const DIGITS: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";
    if value == 0 {
        return "0".into();
    }

    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 32) as usize]);
        value /= 32;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Opening build-block marker for `file` with a cache-busting token.
///
/// `file` keeps its directory; its stem gets `-<token>` appended, and the
/// whole path is rooted under `folder`. `..` is resolved but never climbs
/// above the root.
pub fn make_open_build_tag(kind: &str, file: &str, folder: &str, millis: i64) -> String {
    let path = Path::new(file);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let token = base32(millis.max(0) as u64);

    let dir = path.parent().unwrap_or(Path::new(""));
    let dir = dir.strip_prefix("/").unwrap_or(dir);
    let joined = super::normalize_lexically(
        &Path::new("/")
            .join(folder.trim_start_matches('/'))
            .join(dir)
            .join(format!("{stem}-{token}{ext}")),
    );

    format!("<!-- build:{kind} /{} -->", super::to_url_path(&joined))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_clock() -> i64 {
        1_700_000_000_000
    }

    fn context(env: Environment) -> BuildContext {
        let mut config = PipelineConfig::default();
        config.env = env;
        config.context.insert("API_URL".into(), "https://api".into());
        config.context.insert("APP".into(), "shadowed".into());
        BuildContext::with_clock(&config, fixed_clock)
    }

    #[test]
    fn test_base32() {
        assert_eq!(base32(0), "0");
        assert_eq!(base32(31), "v");
        assert_eq!(base32(32), "10");
        assert_eq!(base32(1_700_000_000_000), "1hf7uaq00");
    }

    #[test]
    fn test_make_open_build_tag() {
        let tag = make_open_build_tag(
            "css",
            "styles/app.css",
            "/webapp/web-project-boilerplate/",
            1_700_000_000_000,
        );
        assert_eq!(
            tag,
            "<!-- build:css /webapp/web-project-boilerplate/styles/app-1hf7uaq00.css -->"
        );
    }

    #[test]
    fn test_make_open_build_tag_resolves_parent_dirs() {
        assert_eq!(
            make_open_build_tag("css", "../x.css", "/webapp/app/", 32),
            "<!-- build:css /webapp/x-10.css -->"
        );
        assert_eq!(
            make_open_build_tag("css", "./styles/../../../x.css", "/webapp/", 32),
            "<!-- build:css /x-10.css -->"
        );
    }

    #[test]
    fn test_make_open_build_tag_without_directory() {
        assert_eq!(
            make_open_build_tag("js", "app.js", "/", 32),
            "<!-- build:js /app-10.js -->"
        );
    }

    #[test]
    fn test_environment_flags() {
        let ctx = context(Environment::Prod);
        assert_eq!(ctx.get("PROD"), Some(&ContextValue::Flag(true)));
        assert_eq!(ctx.get("LOCAL"), Some(&ContextValue::Flag(false)));
        assert_eq!(ctx.get("BUILD_ENV").unwrap().to_string(), "PROD");
        assert_eq!(ctx.get("MINIFY"), Some(&ContextValue::Flag(true)));

        let ctx = context(Environment::Local);
        assert_eq!(ctx.get("MINIFY"), Some(&ContextValue::Flag(false)));
    }

    #[test]
    fn test_builtin_keys_win_over_user_values() {
        let ctx = context(Environment::Local);
        assert_eq!(
            ctx.get("APP").unwrap().to_string(),
            "WEB PROJECT BOILERPLATE"
        );
        assert_eq!(ctx.get("API_URL").unwrap().to_string(), "https://api");
        assert!(!ctx.is_defined("MISSING"));
        assert!(ctx.is_defined("LOCAL"));
        assert!(!ctx.is_defined("PROD"));
    }

    #[test]
    fn test_call() {
        let ctx = context(Environment::Local);
        let tag = ctx
            .call("makeOpenBuildTag", &["js".into(), "scripts/app.js".into()])
            .unwrap();
        assert!(tag.starts_with("<!-- build:js /webapp/web-project-boilerplate/scripts/app-"));

        assert_eq!(
            ctx.call("nope", &[]),
            Err(CallError::UnknownFunction("nope".into()))
        );
        assert!(matches!(
            ctx.call("makeOpenBuildTag", &["js".into()]),
            Err(CallError::Arity { got: 1, .. })
        ));
    }
}
