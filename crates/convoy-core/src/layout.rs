//! Path templates for metadata files in the config repository

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const BUNDLE: &str = "{bundle}";
const NAME: &str = "{name}";

/// Where each kind of metadata file lives, relative to the repository root.
///
/// Every template is rendered from `(bundle, name)` only, so any component can
/// find a file without consulting another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    pub bundle_config_spec: String,
    pub changeset_spec: String,
    pub alias_spec: String,
    pub candidate_alias_spec: String,
    pub trunk_spec: String,
    pub shipment_spec: String,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            bundle_config_spec: "bundles/{bundle}/bundle.yaml".into(),
            changeset_spec: "bundles/{bundle}/changesets/{name}.yaml".into(),
            alias_spec: "bundles/{bundle}/aliases/{name}.yaml".into(),
            candidate_alias_spec: "bundles/{bundle}/candidates/{name}.yaml".into(),
            trunk_spec: "bundles/{bundle}/trunks/{name}.yaml".into(),
            shipment_spec: "shipments/{bundle}/{name}.yaml".into(),
        }
    }
}

fn render(template: &str, bundle: &str, name: &str) -> String {
    template.replace(BUNDLE, bundle).replace(NAME, name)
}

/// Directory part of a template rendered for `bundle`.
fn directory(template: &str, bundle: &str) -> String {
    match template.rsplit_once('/') {
        Some((dir, _)) => dir.replace(BUNDLE, bundle),
        None => String::new(),
    }
}

/// Recover `{name}` from a file name produced by `template`.
fn name_from_file(template: &str, file_name: &str) -> Option<String> {
    let last = template.rsplit('/').next().unwrap_or(template);
    let (prefix, suffix) = last.split_once(NAME)?;
    let name = file_name.strip_prefix(prefix)?.strip_suffix(suffix)?;
    (!name.is_empty()).then(|| name.to_string())
}

impl Layout {
    fn named(&self) -> [(&'static str, &str); 5] {
        [
            ("changeset_spec", &self.changeset_spec),
            ("alias_spec", &self.alias_spec),
            ("candidate_alias_spec", &self.candidate_alias_spec),
            ("trunk_spec", &self.trunk_spec),
            ("shipment_spec", &self.shipment_spec),
        ]
    }

    /// Check that templates carry their placeholders and can never collide.
    pub fn validate(&self) -> Result<()> {
        if !self.bundle_config_spec.contains(BUNDLE) {
            return Err(Error::config(format!(
                "layout.bundle_config_spec must contain {BUNDLE}: '{}'",
                self.bundle_config_spec
            )));
        }

        for (key, template) in self.named() {
            if !template.contains(BUNDLE) || !template.contains(NAME) {
                return Err(Error::config(format!(
                    "layout.{key} must contain {BUNDLE} and {NAME}: '{template}'"
                )));
            }
            let (dir, last) = template.rsplit_once('/').unwrap_or(("", template));
            if dir.contains(NAME) || last.matches(NAME).count() != 1 {
                return Err(Error::config(format!(
                    "layout.{key} must use {NAME} exactly once, in the file name: '{template}'"
                )));
            }
        }

        // Distinct directories make every rendered path unique to its kind.
        let sample = "bundle";
        let mut seen = vec![("bundle_config_spec", directory(&self.bundle_config_spec, sample))];
        for (key, template) in self.named() {
            let dir = directory(template, sample);
            if let Some((other, _)) = seen.iter().find(|(_, d)| *d == dir) {
                return Err(Error::config(format!(
                    "layout.{key} shares its directory with layout.{other}"
                )));
            }
            seen.push((key, dir));
        }
        Ok(())
    }

    pub fn bundle_config(&self, bundle: &str) -> String {
        render(&self.bundle_config_spec, bundle, "")
    }

    pub fn changeset(&self, bundle: &str, tracking_id: &str) -> String {
        render(&self.changeset_spec, bundle, tracking_id)
    }

    pub fn alias(&self, bundle: &str, alias: &str) -> String {
        render(&self.alias_spec, bundle, alias)
    }

    pub fn candidate_alias(&self, bundle: &str, trunk: &str) -> String {
        render(&self.candidate_alias_spec, bundle, trunk)
    }

    pub fn trunk(&self, bundle: &str, trunk: &str) -> String {
        render(&self.trunk_spec, bundle, trunk)
    }

    pub fn shipment(&self, bundle: &str, version: &str) -> String {
        render(&self.shipment_spec, bundle, version)
    }

    pub fn trunk_dir(&self, bundle: &str) -> String {
        directory(&self.trunk_spec, bundle)
    }

    pub fn shipment_dir(&self, bundle: &str) -> String {
        directory(&self.shipment_spec, bundle)
    }

    pub fn trunk_name(&self, file_name: &str) -> Option<String> {
        name_from_file(&self.trunk_spec, file_name)
    }

    pub fn shipment_version(&self, file_name: &str) -> Option<String> {
        name_from_file(&self.shipment_spec, file_name)
    }
}
