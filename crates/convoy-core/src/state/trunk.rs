//! Trunk files

use convoy_git::ConfigRepository;
use serde::{Deserialize, Serialize};

use super::{read_manifest, write_manifest};
use crate::Result;
use crate::layout::Layout;

/// A long-lived integration line of a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrunkFile {
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl TrunkFile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: true,
        }
    }

    pub fn load(repo: &ConfigRepository, layout: &Layout, bundle: &str, name: &str) -> Result<Option<Self>> {
        read_manifest(repo, &layout.trunk(bundle, name))
    }

    pub fn save(&self, repo: &ConfigRepository, layout: &Layout, bundle: &str) -> Result<()> {
        write_manifest(repo, &layout.trunk(bundle, &self.name), self)
    }

    /// All trunk files of `bundle`, ordered by name.
    pub fn list(repo: &ConfigRepository, layout: &Layout, bundle: &str) -> Result<Vec<Self>> {
        let mut trunks = Vec::new();
        for file_name in repo.list_dir(&layout.trunk_dir(bundle))? {
            let Some(name) = layout.trunk_name(&file_name) else {
                continue;
            };
            if let Some(trunk) = Self::load(repo, layout, bundle, &name)? {
                trunks.push(trunk);
            }
        }
        Ok(trunks)
    }
}
