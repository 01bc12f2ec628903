//! Invocation settings loaded from `convoy.toml`
//!
//! Settings are read once per invocation and never mutated afterwards;
//! anything that changes during a run lives on [`crate::Context`].

use std::path::{Path, PathBuf};

use convoy_fs::{ConfigStore, NormalizedPath};
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

use crate::layout::Layout;
use crate::{Error, Result};

fn default_branch() -> String {
    "master".to_string()
}

fn default_child_timeout_secs() -> u64 {
    600
}

fn default_notification_timeout_secs() -> u64 {
    10
}

/// Where the metadata repository lives and how it is checked out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySettings {
    /// Clone URL of the metadata repository
    #[serde(default)]
    pub url: String,

    /// Branch holding the release metadata
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Working copy location; defaults to the user cache directory
    #[serde(default)]
    pub checkout_dir: Option<PathBuf>,

    /// Web URL template with `{branch}` and `{path}` placeholders
    #[serde(default)]
    pub browse_url: Option<String>,
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            branch: default_branch(),
            checkout_dir: None,
            browse_url: None,
        }
    }
}

/// Limits and scratch locations for forked project work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSettings {
    /// Upper bound on concurrently running project children; unbounded if unset
    #[serde(default)]
    pub max_fork_count: Option<usize>,

    /// Seconds a child command may run before it is killed
    #[serde(default = "default_child_timeout_secs")]
    pub child_timeout_secs: u64,

    /// Root for project checkouts
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Directory holding local bundle lock files
    #[serde(default)]
    pub lock_dir: Option<PathBuf>,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            max_fork_count: None,
            child_timeout_secs: default_child_timeout_secs(),
            work_dir: None,
            lock_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    /// Endpoint receiving JSON notifications; notifications are only logged if unset
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Channel used when a bundle does not name its own
    #[serde(default)]
    pub default_channel: Option<String>,

    #[serde(default = "default_notification_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            webhook_url: None,
            default_channel: None,
            timeout_secs: default_notification_timeout_secs(),
        }
    }
}

/// Complete settings for one invocation.
///
/// # Example
///
/// ```
/// use convoy_core::Settings;
///
/// let settings = Settings::parse(r#"
/// [repository]
/// url = "git@example.com:release/metadata.git"
///
/// [execution]
/// max_fork_count = 4
/// "#).unwrap();
///
/// assert_eq!(settings.repository.branch, "master");
/// assert_eq!(settings.execution.max_fork_count, Some(4));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Semver requirement the running binary must satisfy
    #[serde(default)]
    pub required_version: Option<String>,

    #[serde(default)]
    pub repository: RepositorySettings,

    #[serde(default)]
    pub layout: Layout,

    #[serde(default)]
    pub execution: ExecutionSettings,

    #[serde(default)]
    pub notifications: NotificationSettings,
}

impl Settings {
    /// Parse settings from TOML content
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(format!("Invalid settings: {e}")))
    }

    /// Load settings from a file; the format follows the extension.
    pub fn load(path: &Path) -> Result<Self> {
        let path = NormalizedPath::new(path);
        if !path.is_file() {
            return Err(Error::config(format!("Settings file not found: {path}")));
        }
        ConfigStore::new().load(&path).map_err(|e| match e {
            convoy_fs::Error::ConfigParse { .. } | convoy_fs::Error::UnsupportedFormat { .. } => {
                Error::config(e.to_string())
            }
            other => other.into(),
        })
    }

    /// `<config_dir>/convoy/convoy.toml`, if the platform has a config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("convoy").join("convoy.toml"))
    }

    /// Check required values, layout and version compatibility.
    pub fn validate(&self) -> Result<()> {
        self.check_compatibility(env!("CARGO_PKG_VERSION"))?;
        if self.repository.url.trim().is_empty() {
            return Err(Error::config("repository.url is not set"));
        }
        if self.execution.max_fork_count == Some(0) {
            return Err(Error::config("execution.max_fork_count must be at least 1"));
        }
        self.layout.validate()
    }

    /// Fail with [`Error::Compatibility`] unless `actual` satisfies `required_version`.
    pub fn check_compatibility(&self, actual: &str) -> Result<()> {
        let Some(required) = &self.required_version else {
            return Ok(());
        };
        let requirement = VersionReq::parse(required).map_err(|e| {
            Error::config(format!("Invalid required_version '{required}': {e}"))
        })?;
        let version = Version::parse(actual)
            .map_err(|e| Error::config(format!("Invalid version '{actual}': {e}")))?;
        if !requirement.matches(&version) {
            return Err(Error::Compatibility {
                required: required.clone(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }

    /// Whether the dotted setting `key` holds a non-empty value.
    ///
    /// Only settings a goal can require are known; anything else reads as unset.
    pub fn is_set(&self, key: &str) -> bool {
        match key {
            "repository.url" => !self.repository.url.trim().is_empty(),
            "repository.browse_url" => self.repository.browse_url.is_some(),
            "notifications.webhook_url" => self.notifications.webhook_url.is_some(),
            "notifications.default_channel" => self.notifications.default_channel.is_some(),
            _ => false,
        }
    }

    pub fn checkout_dir(&self) -> PathBuf {
        self.repository
            .checkout_dir
            .clone()
            .unwrap_or_else(|| cache_root().join("metadata"))
    }

    pub fn work_dir(&self) -> PathBuf {
        self.execution
            .work_dir
            .clone()
            .unwrap_or_else(|| cache_root().join("work"))
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.execution
            .lock_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("convoy-locks"))
    }
}

fn cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("convoy")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tempfile::TempDir;

    #[test]
    fn empty_settings_use_defaults() {
        let settings = Settings::parse("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.execution.child_timeout_secs, 600);
        assert_eq!(settings.notifications.timeout_secs, 10);
        assert_eq!(settings.layout, Layout::default());
    }

    #[test]
    fn load_reads_toml_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("convoy.toml");
        std::fs::write(
            &path,
            r##"
required_version = ">=0.1"

[repository]
url = "/srv/git/metadata.git"
branch = "main"
browse_url = "https://git.example.com/metadata/blob/{branch}/{path}"

[layout]
shipment_spec = "releases/{bundle}/{name}.yaml"

[notifications]
default_channel = "#releases"
"##,
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.repository.branch, "main");
        assert_eq!(settings.layout.shipment("svc", "1.0"), "releases/svc/1.0.yaml");
        assert_eq!(settings.layout.trunk("svc", "master"), "bundles/svc/trunks/master.yaml");
        assert_eq!(settings.notifications.default_channel.as_deref(), Some("#releases"));
        settings.validate().unwrap();
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let err = Settings::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[rstest]
    #[case("convoy.toml", "[repository\nurl = 1\n")]
    #[case("convoy.toml", "[execution]\nmax_fork_count = \"many\"\n")]
    #[case("convoy.ini", "url = x\n")]
    fn malformed_settings_are_config_errors(#[case] name: &str, #[case] content: &str) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();

        let err = Settings::load(&path).unwrap_err();
        assert!(matches!(err, Error::Config { .. }), "got {err:?}");
        assert_eq!(err.kind(), crate::ErrorKind::Fatal);
    }

    #[test]
    fn missing_url_fails_validation() {
        let err = Settings::default().validate().unwrap_err();
        assert!(err.to_string().contains("repository.url"));
    }

    #[test]
    fn is_set_reports_required_settings() {
        let mut settings = Settings::default();
        assert!(!settings.is_set("repository.url"));
        settings.repository.url = "/srv/git/metadata.git".into();
        assert!(settings.is_set("repository.url"));
        assert!(!settings.is_set("notifications.default_channel"));
        assert!(!settings.is_set("no.such.key"));
    }

    #[rstest]
    #[case(None, "0.1.0", true)]
    #[case(Some(">=0.1, <0.2"), "0.1.3", true)]
    #[case(Some("^2"), "0.1.0", false)]
    fn version_requirements(
        #[case] required: Option<&str>,
        #[case] actual: &str,
        #[case] ok: bool,
    ) {
        let settings = Settings {
            required_version: required.map(String::from),
            ..Settings::default()
        };
        let result = settings.check_compatibility(actual);
        assert_eq!(result.is_ok(), ok);
        if let Err(err) = result {
            assert_eq!(err.exit_code(), 2);
        }
    }

    #[test]
    fn malformed_requirement_is_a_config_error() {
        let settings = Settings {
            required_version: Some("not a version".into()),
            ..Settings::default()
        };
        let err = settings.check_compatibility("0.1.0").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
