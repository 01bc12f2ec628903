//! Bundle configuration files

use std::collections::BTreeMap;

use convoy_git::ConfigRepository;
use serde::{Deserialize, Serialize};

use crate::layout::Layout;
use crate::pipe::ReleaseConstraint;
use crate::state::{read_manifest, write_manifest};
use crate::{Error, Result};

fn default_trunk() -> String {
    "master".to_string()
}

/// A repository that belongs to a bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub url: String,
    /// Support projects are checked out alongside changesets but never
    /// carry changeset branches themselves
    #[serde(default)]
    pub support: bool,
}

/// Contents of a bundle's `bundle.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleConfig {
    pub name: String,

    #[serde(default = "default_trunk")]
    pub default_trunk: String,

    #[serde(default)]
    pub constraint: ReleaseConstraint,

    /// Notification channel of the bundle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// Command run inside every project checkout by per-project checks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_command: Option<Vec<String>>,

    #[serde(default)]
    pub projects: BTreeMap<String, ProjectConfig>,
}

impl BundleConfig {
    pub fn load(repo: &ConfigRepository, layout: &Layout, bundle: &str) -> Result<Option<Self>> {
        let path = layout.bundle_config(bundle);
        let Some(config) = read_manifest::<Self>(repo, &path)? else {
            return Ok(None);
        };
        if config.name != bundle {
            return Err(Error::build(format!(
                "{path} describes bundle '{}', expected '{bundle}'",
                config.name
            )));
        }
        Ok(Some(config))
    }

    pub fn require(repo: &ConfigRepository, layout: &Layout, bundle: &str) -> Result<Self> {
        Self::load(repo, layout, bundle)?.ok_or_else(|| {
            Error::build(format!(
                "Unknown bundle '{bundle}': no configuration at {}",
                layout.bundle_config(bundle)
            ))
        })
    }

    /// Rewrite only the `constraint` key of the stored file.
    ///
    /// Returns whether the file changed. Keys convoy does not know about are
    /// preserved.
    pub fn store_constraint(
        repo: &ConfigRepository,
        layout: &Layout,
        bundle: &str,
        constraint: ReleaseConstraint,
    ) -> Result<bool> {
        let path = layout.bundle_config(bundle);
        let mut document: serde_yaml::Value = read_manifest(repo, &path)?
            .ok_or_else(|| Error::build(format!("Unknown bundle '{bundle}': no configuration at {path}")))?;
        let Some(mapping) = document.as_mapping_mut() else {
            return Err(Error::build(format!("Malformed manifest {path}: not a mapping")));
        };

        let key = serde_yaml::Value::from("constraint");
        let current = mapping
            .get(&key)
            .and_then(|v| serde_yaml::from_value::<ReleaseConstraint>(v.clone()).ok())
            .unwrap_or_default();
        if current == constraint && mapping.contains_key(&key) {
            return Ok(false);
        }
        mapping.insert(key, serde_yaml::Value::from(constraint.as_str()));
        write_manifest(repo, &path, &document)?;
        Ok(true)
    }

    pub fn project(&self, name: &str) -> Result<&ProjectConfig> {
        self.projects
            .get(name)
            .ok_or_else(|| Error::build(format!("Bundle '{}' has no project '{name}'", self.name)))
    }

    /// Projects that carry changeset branches.
    pub fn changeset_projects(&self) -> Vec<&str> {
        self.projects
            .iter()
            .filter(|(_, p)| !p.support)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn support_projects(&self) -> Vec<&str> {
        self.projects
            .iter()
            .filter(|(_, p)| p.support)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}
