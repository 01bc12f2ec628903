//! Format-agnostic configuration loading and saving

use serde::{Serialize, de::DeserializeOwned};

use crate::{Error, NormalizedPath, Result, io};

/// Serialization format, detected from a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
    Yaml,
}

impl ConfigFormat {
    /// Detect the format of `path` from its extension.
    ///
    /// - `.toml` -> TOML
    /// - `.json` -> JSON
    /// - `.yaml`, `.yml` -> YAML
    pub fn detect(path: &NormalizedPath) -> Result<Self> {
        let extension = path.extension().unwrap_or("");
        match extension.to_lowercase().as_str() {
            "toml" => Ok(Self::Toml),
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            _ => Err(Error::UnsupportedFormat {
                extension: extension.to_string(),
            }),
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Toml => "TOML",
            Self::Json => "JSON",
            Self::Yaml => "YAML",
        }
    }

    /// Parse `content`; `path` is only used for error reporting.
    pub fn parse<T: DeserializeOwned>(self, path: &NormalizedPath, content: &str) -> Result<T> {
        let parsed = match self {
            Self::Toml => toml::from_str(content).map_err(|e| e.to_string()),
            Self::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
            Self::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
        };
        parsed.map_err(|message| Error::ConfigParse {
            path: path.to_native(),
            format: self.label().into(),
            message,
        })
    }

    /// Render `value`; `path` is only used for error reporting.
    pub fn render<T: Serialize>(self, path: &NormalizedPath, value: &T) -> Result<String> {
        let rendered = match self {
            Self::Toml => toml::to_string_pretty(value).map_err(|e| e.to_string()),
            Self::Json => serde_json::to_string_pretty(value)
                .map(|s| s + "\n")
                .map_err(|e| e.to_string()),
            Self::Yaml => serde_yaml::to_string(value).map_err(|e| e.to_string()),
        };
        rendered.map_err(|message| Error::ConfigSerialize {
            path: path.to_native(),
            format: self.label().into(),
            message,
        })
    }
}

/// Format-agnostic configuration store.
///
/// Detects format from file extension and handles
/// serialization/deserialization transparently.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigStore;

impl ConfigStore {
    pub fn new() -> Self {
        Self
    }

    /// Load configuration from a file.
    pub fn load<T: DeserializeOwned>(&self, path: &NormalizedPath) -> Result<T> {
        let format = ConfigFormat::detect(path)?;
        let content = io::read_text(path)?;
        format.parse(path, &content)
    }

    /// Load configuration if the file exists.
    pub fn load_opt<T: DeserializeOwned>(&self, path: &NormalizedPath) -> Result<Option<T>> {
        let format = ConfigFormat::detect(path)?;
        match io::read_text_opt(path)? {
            Some(content) => format.parse(path, &content).map(Some),
            None => Ok(None),
        }
    }

    /// Save configuration to a file atomically.
    pub fn save<T: Serialize>(&self, path: &NormalizedPath, value: &T) -> Result<()> {
        let format = ConfigFormat::detect(path)?;
        let content = format.render(path, value)?;
        io::write_atomic(path, content.as_bytes())
    }
}
