//! Alias files: symbolic pointers to a changeset

use convoy_git::ConfigRepository;
use serde::{Deserialize, Serialize};

use super::{ChangesetStatus, read_manifest, write_manifest};
use crate::Result;

/// Last changeset shipped on its own.
pub const RELEASED_ALIAS: &str = "RELEASED";
/// Changeset currently being hotfixed.
pub const HOTFIX_ALIAS: &str = "HOTFIX";
/// Changeset last shipped as part of a shipment.
pub const PRODUCTION_ALIAS: &str = "PRODUCTION";

/// Pointer to a changeset, stored at a path derived from `(bundle, alias)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasFile {
    /// Tracking id of the changeset the alias points at
    pub changeset: String,
    pub status: ChangesetStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trunk: Option<String>,
}

impl AliasFile {
    pub fn new(changeset: impl Into<String>, status: ChangesetStatus, trunk: Option<String>) -> Self {
        Self {
            changeset: changeset.into(),
            status,
            trunk,
        }
    }

    pub fn load(repo: &ConfigRepository, path: &str) -> Result<Option<Self>> {
        read_manifest(repo, path)
    }

    pub fn save(&self, repo: &ConfigRepository, path: &str) -> Result<()> {
        write_manifest(repo, path, self)
    }

    /// Remove the alias at `path` if it points at `tracking_id`.
    ///
    /// Returns whether a file was removed. Aliases owned by another
    /// changeset are left alone.
    pub fn remove_if_points_at(
        repo: &ConfigRepository,
        path: &str,
        tracking_id: &str,
    ) -> Result<bool> {
        match Self::load(repo, path)? {
            Some(alias) if alias.changeset == tracking_id => Ok(repo.delete_file(path)?),
            _ => Ok(false),
        }
    }

    pub fn points_at(&self, tracking_id: &str) -> bool {
        self.changeset == tracking_id
    }
}
