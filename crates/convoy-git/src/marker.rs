//! Durable markers stored as detached refs on the metadata remote
//!
//! A marker is a parentless commit whose tree holds a single record file,
//! published under a ref outside `refs/heads/`. Publishing or deleting a
//! marker never touches the tracked branch, so branch history only records
//! real metadata changes.

use git2::Direction;

use crate::repository::{REMOTE, remote_callbacks};
use crate::{ConfigRepository, Error, Result};

const RECORD_FILE: &str = "record.json";
const MARKER_FILE_MODE: i32 = 0o100644;

fn mirror_ref(refname: &str) -> String {
    format!("refs/convoy-mirror/{}", refname.trim_start_matches("refs/"))
}

impl ConfigRepository {
    /// Commit id the remote currently advertises for `refname`.
    pub fn remote_ref_target(&self, refname: &str) -> Result<Option<String>> {
        let mut remote = self
            .repo
            .find_remote(REMOTE)
            .map_err(|_| Error::RemoteNotFound {
                name: REMOTE.to_string(),
            })?;
        let connection = remote.connect_auth(Direction::Fetch, Some(remote_callbacks()), None)?;
        let target = connection
            .list()?
            .iter()
            .find(|head| head.name() == refname)
            .map(|head| head.oid().to_string());
        Ok(target)
    }

    /// Fetch and return the record stored under `refname`, if the remote has one.
    pub fn read_marker(&self, refname: &str) -> Result<Option<Vec<u8>>> {
        if self.remote_ref_target(refname)?.is_none() {
            return Ok(None);
        }

        let mirror = mirror_ref(refname);
        let refspec = format!("+{refname}:{mirror}");
        self.fetch(&[refspec.as_str()])?;

        let commit = self.repo.find_reference(&mirror)?.peel_to_commit()?;
        let tree = commit.tree()?;
        let entry = tree
            .get_name(RECORD_FILE)
            .ok_or_else(|| Error::MarkerMalformed {
                refname: refname.to_string(),
                reason: format!("missing {RECORD_FILE}"),
            })?;
        let blob = self.repo.find_blob(entry.id())?;
        Ok(Some(blob.content().to_vec()))
    }

    /// Publish `record` under `refname` on the remote.
    ///
    /// Unless `replace` is set, fails with [`Error::PushRejected`] when the
    /// remote already holds a different marker under that name.
    pub fn publish_marker(
        &self,
        refname: &str,
        record: &[u8],
        message: &str,
        replace: bool,
    ) -> Result<()> {
        let blob = self.repo.blob(record)?;
        let mut builder = self.repo.treebuilder(None)?;
        builder.insert(RECORD_FILE, blob, MARKER_FILE_MODE)?;
        let tree = self.repo.find_tree(builder.write()?)?;
        let sig = self.signature()?;
        let commit = self.repo.commit(None, &sig, &sig, message, &tree, &[])?;

        self.repo.reference(refname, commit, true, message)?;
        let refspec = if replace {
            format!("+{refname}:{refname}")
        } else {
            format!("{refname}:{refname}")
        };
        self.push_refspecs(&[refspec.as_str()])?;
        tracing::debug!(marker = %refname, commit = %commit, "Published marker");
        Ok(())
    }

    /// Delete the marker under `refname` on the remote and locally.
    pub fn delete_marker(&self, refname: &str) -> Result<()> {
        let refspec = format!(":{refname}");
        self.push_refspecs(&[refspec.as_str()])?;

        for local in [refname.to_string(), mirror_ref(refname)] {
            if let Ok(mut reference) = self.repo.find_reference(&local) {
                reference.delete()?;
            }
        }
        tracing::debug!(marker = %refname, "Deleted marker");
        Ok(())
    }
}
