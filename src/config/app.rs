//! `[app]` section configuration.

use super::defaults;
use educe::Educe;
use serde::{Deserialize, Serialize};

/// `[app]` section in pipewright.toml - application identity.
///
/// # Example
/// ```toml
/// [app]
/// name = "My App"
/// folder = "/webapp/my-app/"
/// ```
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Display name, exposed to sources as `APP`.
    #[serde(default = "defaults::app::name")]
    #[educe(Default = defaults::app::name())]
    pub name: String,

    /// URL base folder the app is deployed under, exposed as `APP_FOLDER`.
    #[serde(default = "defaults::app::folder")]
    #[educe(Default = defaults::app::folder())]
    pub folder: String,
}

impl AppConfig {
    /// The folder with exactly one leading and one trailing `/`.
    ///
    /// An empty folder yields `/`.
    pub fn url_folder(&self) -> String {
        let inner = self.folder.trim_matches('/');
        if inner.is_empty() {
            "/".into()
        } else {
            format!("/{inner}/")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(folder: &str) -> AppConfig {
        AppConfig {
            folder: folder.into(),
            ..AppConfig::default()
        }
    }

    #[test]
    fn test_url_folder_normalization() {
        assert_eq!(app("webapp/demo").url_folder(), "/webapp/demo/");
        assert_eq!(app("/webapp/demo/").url_folder(), "/webapp/demo/");
        assert_eq!(app("//webapp//").url_folder(), "/webapp/");
        assert_eq!(app("").url_folder(), "/");
        assert_eq!(app("/").url_folder(), "/");
    }

    #[test]
    fn test_app_defaults() {
        let app = AppConfig::default();
        assert_eq!(app.name, "WEB PROJECT BOILERPLATE");
        assert_eq!(app.url_folder(), "/webapp/web-project-boilerplate/");
    }
}
