//! Changeset manifests

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use convoy_git::ConfigRepository;
use serde::{Deserialize, Serialize};

use super::{AliasFile, ChangesetStatus, read_manifest, write_manifest};
use crate::id::ChangesetId;
use crate::layout::Layout;
use crate::{Error, Result};

/// Branch and optional version pin of one project touched by a changeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectPin {
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Manifest of one changeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesetFile {
    /// Full changeset id
    pub id: String,
    pub status: ChangesetStatus,
    /// Trunk the changeset lands on; the bundle's default trunk if unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trunk: Option<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub projects: BTreeMap<String, ProjectPin>,
    /// Version pins of the baseline a hotfix branches from
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub base: BTreeMap<String, String>,
    pub updated_at: DateTime<Utc>,
}

impl ChangesetFile {
    /// A fresh DEV changeset touching `projects` on their changeset branch.
    pub fn new<'p>(
        id: &ChangesetId,
        trunk: &str,
        summary: impl Into<String>,
        projects: impl IntoIterator<Item = &'p str>,
    ) -> Self {
        let branch = id.branch_name();
        Self {
            id: id.to_string(),
            status: ChangesetStatus::Dev,
            trunk: Some(trunk.to_string()),
            summary: summary.into(),
            projects: projects
                .into_iter()
                .map(|p| {
                    (
                        p.to_string(),
                        ProjectPin {
                            branch: branch.clone(),
                            version: None,
                        },
                    )
                })
                .collect(),
            base: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn load(repo: &ConfigRepository, layout: &Layout, id: &ChangesetId) -> Result<Option<Self>> {
        read_manifest(repo, &layout.changeset(&id.bundle_name, &id.tracking_id))
    }

    /// Load a changeset that must exist.
    pub fn require(repo: &ConfigRepository, layout: &Layout, id: &ChangesetId) -> Result<Self> {
        Self::load(repo, layout, id)?
            .ok_or_else(|| Error::build(format!("Changeset {id} does not exist")))
    }

    pub fn save(&self, repo: &ConfigRepository, layout: &Layout, id: &ChangesetId) -> Result<()> {
        write_manifest(repo, &layout.changeset(&id.bundle_name, &id.tracking_id), self)
    }

    /// Resolve the alias at `alias_path` of `bundle` and load its changeset.
    pub fn load_from_alias(
        repo: &ConfigRepository,
        layout: &Layout,
        bundle: &str,
        alias_path: &str,
    ) -> Result<Option<(AliasFile, Self)>> {
        let Some(alias) = AliasFile::load(repo, alias_path)? else {
            return Ok(None);
        };
        let path = layout.changeset(bundle, &alias.changeset);
        let changeset = read_manifest::<Self>(repo, &path)?.ok_or_else(|| {
            Error::build(format!(
                "Alias {alias_path} points at {}, which has no manifest",
                alias.changeset
            ))
        })?;
        Ok(Some((alias, changeset)))
    }

    /// The changeset currently representing `trunk`: its release candidate
    /// if one is in flight, otherwise its stable alias.
    pub fn load_from_trunk(
        repo: &ConfigRepository,
        layout: &Layout,
        bundle: &str,
        trunk: &str,
    ) -> Result<Option<(AliasFile, Self)>> {
        if let Some(found) =
            Self::load_from_alias(repo, layout, bundle, &layout.candidate_alias(bundle, trunk))?
        {
            return Ok(Some(found));
        }
        Self::load_from_alias(repo, layout, bundle, &layout.alias(bundle, trunk))
    }

    pub fn trunk_or<'a>(&'a self, default_trunk: &'a str) -> &'a str {
        self.trunk.as_deref().unwrap_or(default_trunk)
    }

    /// Move to `next`, enforcing the status machine.
    pub fn set_status(&mut self, next: ChangesetStatus) -> Result<()> {
        self.status = self.status.transition(next)?;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Version pins of this changeset, falling back to branch names.
    pub fn pins(&self) -> BTreeMap<String, String> {
        self.projects
            .iter()
            .map(|(project, pin)| {
                let pin = pin.version.clone().unwrap_or_else(|| pin.branch.clone());
                (project.clone(), pin)
            })
            .collect()
    }
}
