//! Shipment manifests

use std::collections::BTreeMap;

use convoy_git::ConfigRepository;
use serde::{Deserialize, Serialize};

use super::{ShipmentStatus, read_manifest, write_manifest};
use crate::Result;
use crate::id::ShipmentId;
use crate::layout::Layout;

/// What one bundle contributes to a shipment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentEntry {
    /// Tracking id of the changeset shipped for this bundle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changeset: Option<String>,
    #[serde(default)]
    pub trunks: Vec<String>,
    #[serde(default)]
    pub support_projects: Vec<String>,
}

/// A versioned set of bundles deployed together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentFile {
    pub version: String,
    pub status: ShipmentStatus,
    #[serde(default)]
    pub bundles: BTreeMap<String, ShipmentEntry>,
    /// Project version pins of the whole shipment
    #[serde(default)]
    pub base: BTreeMap<String, String>,
}

impl ShipmentFile {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            status: ShipmentStatus::Pending,
            bundles: BTreeMap::new(),
            base: BTreeMap::new(),
        }
    }

    pub fn load(repo: &ConfigRepository, layout: &Layout, id: &ShipmentId) -> Result<Option<Self>> {
        read_manifest(repo, &layout.shipment(&id.bundle_name, &id.version))
    }

    pub fn save(&self, repo: &ConfigRepository, layout: &Layout, id: &ShipmentId) -> Result<()> {
        write_manifest(repo, &layout.shipment(&id.bundle_name, &id.version), self)
    }

    pub fn set_status(&mut self, next: ShipmentStatus) -> Result<()> {
        self.status = self.status.transition(next)?;
        Ok(())
    }

    /// Bundle names in the shipment, sorted.
    pub fn bundle_names(&self) -> Vec<String> {
        self.bundles.keys().cloned().collect()
    }
}
