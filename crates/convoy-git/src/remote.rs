//! Operations on project repositories other than the metadata repository

use std::path::Path;

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{Direction, FetchOptions, Remote, Repository, ResetType};

use crate::repository::{REMOTE, remote_callbacks};
use crate::{Error, Result};

/// Whether the repository at `url` has a branch named `branch`.
///
/// Equivalent to `git ls-remote --exit-code <url> refs/heads/<branch>`;
/// nothing is cloned.
pub fn branch_exists(url: &str, branch: &str) -> Result<bool> {
    let wanted = format!("refs/heads/{branch}");
    let mut remote = Remote::create_detached(url)?;
    let connection = remote.connect_auth(Direction::Fetch, Some(remote_callbacks()), None)?;
    let found = connection.list()?.iter().any(|head| head.name() == wanted);
    Ok(found)
}

/// Check out `branch` of `url` at `dest`, cloning on first use.
///
/// An existing checkout is fetched and hard-reset so repeated calls always
/// leave the working tree at the remote tip.
pub fn checkout_branch(url: &str, branch: &str, dest: &Path) -> Result<()> {
    if !dest.join(".git").exists() {
        tracing::debug!(url = %url, branch = %branch, dest = %dest.display(), "Cloning project");
        let mut fetch = FetchOptions::new();
        fetch.remote_callbacks(remote_callbacks());
        RepoBuilder::new()
            .branch(branch)
            .fetch_options(fetch)
            .clone(url, dest)
            .map_err(|e| match e.code() {
                git2::ErrorCode::NotFound => Error::BranchNotFound {
                    name: branch.to_string(),
                },
                _ => Error::Git(e),
            })?;
        return Ok(());
    }

    let repo = Repository::open(dest)?;
    let refspec = format!("+refs/heads/{branch}:refs/remotes/{REMOTE}/{branch}");
    {
        let mut remote = repo
            .find_remote(REMOTE)
            .map_err(|_| Error::RemoteNotFound {
                name: REMOTE.to_string(),
            })?;
        let mut opts = FetchOptions::new();
        opts.remote_callbacks(remote_callbacks());
        remote.fetch(&[refspec.as_str()], Some(&mut opts), None)?;
    }

    let target = repo
        .find_reference(&format!("refs/remotes/{REMOTE}/{branch}"))
        .map_err(|_| Error::BranchNotFound {
            name: branch.to_string(),
        })?
        .peel_to_commit()?;
    let local = format!("refs/heads/{branch}");
    repo.reference(&local, target.id(), true, "convoy: sync project")?;
    repo.set_head(&local)?;
    let mut checkout = CheckoutBuilder::new();
    checkout.force().remove_untracked(true);
    repo.reset(target.as_object(), ResetType::Hard, Some(&mut checkout))?;
    Ok(())
}
