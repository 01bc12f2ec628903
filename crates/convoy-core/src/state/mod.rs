//! Typed manifests stored in the config repository
//!
//! Each file type owns its status machine; writers only ever touch the
//! working copy; committing is left to the goal runner.

mod alias;
mod changeset;
mod shipment;
mod status;
mod trunk;

pub use alias::{AliasFile, HOTFIX_ALIAS, PRODUCTION_ALIAS, RELEASED_ALIAS};
pub use changeset::{ChangesetFile, ProjectPin};
pub use shipment::{ShipmentEntry, ShipmentFile};
pub use status::{ChangesetStatus, ShipmentStatus};
pub use trunk::TrunkFile;

use convoy_git::ConfigRepository;
use serde::{Serialize, de::DeserializeOwned};

use crate::{Error, Result};

/// Read and parse a manifest; `None` if the file does not exist.
pub(crate) fn read_manifest<T: DeserializeOwned>(
    repo: &ConfigRepository,
    path: &str,
) -> Result<Option<T>> {
    repo.load_manifest(path).map_err(|e| match e {
        convoy_git::Error::Fs(convoy_fs::Error::ConfigParse { message, .. }) => {
            Error::build(format!("Malformed manifest {path}: {message}"))
        }
        convoy_git::Error::Fs(e @ convoy_fs::Error::UnsupportedFormat { .. }) => {
            Error::config(format!("{path}: {e}"))
        }
        other => other.into(),
    })
}

pub(crate) fn write_manifest<T: Serialize>(
    repo: &ConfigRepository,
    path: &str,
    value: &T,
) -> Result<()> {
    repo.save_manifest(path, value).map_err(|e| match e {
        convoy_git::Error::Fs(e @ convoy_fs::Error::UnsupportedFormat { .. }) => {
            Error::config(format!("{path}: {e}"))
        }
        other => other.into(),
    })
}
