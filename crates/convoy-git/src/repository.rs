//! The release metadata repository
//!
//! A [`ConfigRepository`] wraps a local clone that is reset to the tracked
//! remote branch before every mutating operation. All writes land in the
//! working copy first and become visible to others only through
//! [`ConfigRepository::check_in`] followed by [`ConfigRepository::push`].

use std::cell::RefCell;
use std::fs;
use std::path::Path;

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    Cred, CredentialType, FetchOptions, IndexAddOption, PushOptions, RemoteCallbacks, Repository,
    ResetType, Signature, StatusOptions,
};

use convoy_fs::{ConfigStore, NormalizedPath, io};
use serde::{Serialize, de::DeserializeOwned};

use crate::{Error, Result};

pub(crate) const REMOTE: &str = "origin";

const FALLBACK_AUTHOR: &str = "convoy";
const FALLBACK_EMAIL: &str = "convoy@localhost";

/// A checked-out, resettable clone of the metadata repository.
pub struct ConfigRepository {
    pub(crate) repo: Repository,
    root: NormalizedPath,
    branch: String,
    browse_template: Option<String>,
}

impl std::fmt::Debug for ConfigRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigRepository")
            .field("root", &self.root)
            .field("branch", &self.branch)
            .finish()
    }
}

impl ConfigRepository {
    /// Open the clone at `checkout_dir`, cloning `url` there first if needed.
    ///
    /// An existing clone whose `origin` points elsewhere is re-pointed at
    /// `url`; the next [`reset`](Self::reset) then syncs it.
    pub fn open_or_clone(url: &str, branch: &str, checkout_dir: &Path) -> Result<Self> {
        let repo = if checkout_dir.join(".git").exists() {
            let repo = Repository::open(checkout_dir)?;
            let current = repo
                .find_remote(REMOTE)
                .ok()
                .and_then(|r| r.url().map(str::to_string));
            if current.as_deref() != Some(url) {
                tracing::info!(url = %url, "Re-pointing metadata clone at configured remote");
                if current.is_some() {
                    repo.remote_set_url(REMOTE, url)?;
                } else {
                    repo.remote(REMOTE, url)?;
                }
            }
            repo
        } else {
            tracing::info!(url = %url, dir = %checkout_dir.display(), "Cloning metadata repository");
            if let Some(parent) = checkout_dir.parent() {
                fs::create_dir_all(parent).map_err(|e| convoy_fs::Error::io(parent, e))?;
            }
            let mut fetch = FetchOptions::new();
            fetch.remote_callbacks(remote_callbacks());
            RepoBuilder::new()
                .branch(branch)
                .fetch_options(fetch)
                .clone(url, checkout_dir)?
        };

        Ok(Self {
            repo,
            root: NormalizedPath::new(checkout_dir),
            branch: branch.to_string(),
            browse_template: None,
        })
    }

    /// Open an existing clone at `checkout_dir` as is.
    pub fn open(checkout_dir: &Path, branch: &str) -> Result<Self> {
        Ok(Self {
            repo: Repository::open(checkout_dir)?,
            root: NormalizedPath::new(checkout_dir),
            branch: branch.to_string(),
            browse_template: None,
        })
    }

    /// Attach a browse URL template with `{branch}` and `{path}` placeholders.
    pub fn with_browse_url(mut self, template: Option<String>) -> Self {
        self.browse_template = template;
        self
    }

    /// Root of the working copy.
    pub fn root(&self) -> &NormalizedPath {
        &self.root
    }

    /// Tracked branch name.
    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Sync the working copy to the remote branch, discarding local state.
    ///
    /// Fetches the tracked branch, hard-resets onto it and removes untracked
    /// files. Unpushed local commits are dropped as well.
    pub fn reset(&self) -> Result<()> {
        let refspec = format!(
            "+refs/heads/{b}:refs/remotes/{REMOTE}/{b}",
            b = self.branch
        );
        self.fetch(&[refspec.as_str()])?;

        let tracking = format!("refs/remotes/{REMOTE}/{}", self.branch);
        let target = self
            .repo
            .find_reference(&tracking)
            .map_err(|_| Error::BranchNotFound {
                name: self.branch.clone(),
            })?
            .peel_to_commit()?;

        // Make sure HEAD is on the tracked branch before moving it
        let local = format!("refs/heads/{}", self.branch);
        self.repo
            .reference(&local, target.id(), true, "convoy: sync with remote")?;
        self.repo.set_head(&local)?;

        let mut checkout = CheckoutBuilder::new();
        checkout.force().remove_untracked(true);
        self.repo
            .reset(target.as_object(), ResetType::Hard, Some(&mut checkout))?;
        self.clean_untracked()?;

        tracing::debug!(commit = %target.id(), branch = %self.branch, "Metadata repository reset");
        Ok(())
    }

    fn clean_untracked(&self) -> Result<()> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);
        let statuses = self.repo.statuses(Some(&mut opts))?;
        let untracked: Vec<String> = statuses
            .iter()
            .filter(|entry| entry.status().is_wt_new())
            .filter_map(|entry| entry.path().map(str::to_string))
            .collect();
        for path in untracked {
            io::remove_file(&self.root.join(&path))?;
        }
        Ok(())
    }

    pub(crate) fn fetch(&self, refspecs: &[&str]) -> Result<()> {
        let mut remote = self
            .repo
            .find_remote(REMOTE)
            .map_err(|_| Error::RemoteNotFound {
                name: REMOTE.to_string(),
            })?;
        let mut opts = FetchOptions::new();
        opts.remote_callbacks(remote_callbacks());
        remote.fetch(refspecs, Some(&mut opts), None)?;
        Ok(())
    }

    /// Commit id at HEAD.
    pub fn head_commit(&self) -> Result<String> {
        Ok(self.repo.head()?.peel_to_commit()?.id().to_string())
    }

    fn resolve(&self, relative: &str) -> Result<NormalizedPath> {
        let normalized = NormalizedPath::new(relative);
        let escapes = normalized
            .as_str()
            .split('/')
            .any(|segment| segment == "..")
            || normalized.as_str().starts_with('/');
        if escapes || normalized.as_str().is_empty() {
            return Err(Error::InvalidPath {
                path: relative.to_string(),
            });
        }
        Ok(self.root.join(normalized.as_str()))
    }

    /// Whether a file exists at `relative` in the working copy.
    pub fn exists(&self, relative: &str) -> Result<bool> {
        Ok(self.resolve(relative)?.is_file())
    }

    /// Read the file at `relative`, if present.
    pub fn read_file(&self, relative: &str) -> Result<Option<String>> {
        Ok(io::read_text_opt(&self.resolve(relative)?)?)
    }

    /// Write the file at `relative` atomically, creating parent directories.
    pub fn write_file(&self, relative: &str, content: &str) -> Result<()> {
        let path = self.resolve(relative)?;
        io::write_text(&path, content)?;
        tracing::debug!(path = %relative, "Wrote metadata file");
        Ok(())
    }

    /// Parse the manifest at `relative` in the format its extension names.
    pub fn load_manifest<T: DeserializeOwned>(&self, relative: &str) -> Result<Option<T>> {
        Ok(ConfigStore::new().load_opt(&self.resolve(relative)?)?)
    }

    /// Render `value` to `relative` in the format its extension names.
    pub fn save_manifest<T: Serialize>(&self, relative: &str, value: &T) -> Result<()> {
        ConfigStore::new().save(&self.resolve(relative)?, value)?;
        tracing::debug!(path = %relative, "Wrote manifest");
        Ok(())
    }

    /// Delete the file at `relative`. Returns `false` if it did not exist.
    pub fn delete_file(&self, relative: &str) -> Result<bool> {
        Ok(io::remove_file(&self.resolve(relative)?)?)
    }

    /// List the files directly inside directory `relative`, as repository
    /// relative paths in lexical order. A missing directory lists as empty.
    pub fn list_dir(&self, relative: &str) -> Result<Vec<String>> {
        let dir = self.resolve(relative)?;
        let entries = match fs::read_dir(dir.to_native()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(convoy_fs::Error::io(dir.to_native(), e).into()),
        };

        let mut files: Vec<String> = entries
            .flatten()
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| !name.starts_with('.'))
            .map(|name| NormalizedPath::new(relative).join(&name).as_str().to_string())
            .collect();
        files.sort();
        Ok(files)
    }

    /// Stage every change in the working copy and commit it.
    ///
    /// Returns `false` without committing when the staged tree equals HEAD.
    pub fn check_in(&self, message: &str) -> Result<bool> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;
        let tree_id = index.write_tree()?;

        let parent = self.repo.head()?.peel_to_commit()?;
        if parent.tree_id() == tree_id {
            tracing::debug!("Nothing to check in");
            return Ok(false);
        }

        let tree = self.repo.find_tree(tree_id)?;
        let sig = self.signature()?;
        let oid = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])?;
        tracing::info!(commit = %oid, message = %message, "Checked in metadata change");
        Ok(true)
    }

    pub(crate) fn signature(&self) -> Result<Signature<'static>> {
        match self.repo.signature() {
            Ok(sig) => Ok(sig),
            Err(_) => Ok(Signature::now(FALLBACK_AUTHOR, FALLBACK_EMAIL)?),
        }
    }

    /// Push the tracked branch to the remote.
    pub fn push(&self) -> Result<()> {
        let refspec = format!("refs/heads/{b}:refs/heads/{b}", b = self.branch);
        self.push_refspecs(&[refspec.as_str()])
    }

    pub(crate) fn push_refspecs(&self, refspecs: &[&str]) -> Result<()> {
        let mut remote = self
            .repo
            .find_remote(REMOTE)
            .map_err(|_| Error::RemoteNotFound {
                name: REMOTE.to_string(),
            })?;

        let rejected: RefCell<Vec<(String, String)>> = RefCell::new(Vec::new());
        {
            let mut callbacks = remote_callbacks();
            callbacks.push_update_reference(|refname, status| {
                if let Some(reason) = status {
                    rejected
                        .borrow_mut()
                        .push((refname.to_string(), reason.to_string()));
                }
                Ok(())
            });
            let mut opts = PushOptions::new();
            opts.remote_callbacks(callbacks);
            // libgit2 refuses non-fast-forward updates client-side
            remote
                .push(refspecs, Some(&mut opts))
                .map_err(|e| match e.code() {
                    git2::ErrorCode::NotFastForward => Error::PushRejected {
                        refname: refspecs.join(", "),
                        reason: e.message().to_string(),
                    },
                    _ => Error::Git(e),
                })?;
        }

        if let Some((refname, reason)) = rejected.into_inner().into_iter().next() {
            return Err(Error::PushRejected { refname, reason });
        }
        tracing::debug!(refspecs = ?refspecs, "Pushed to remote");
        Ok(())
    }

    /// URL for browsing `relative` in a web UI, if a template is configured.
    pub fn browse_url(&self, relative: &str) -> Option<String> {
        self.browse_template.as_ref().map(|template| {
            template
                .replace("{branch}", &self.branch)
                .replace("{path}", relative)
        })
    }
}

/// Callbacks shared by fetch, push and ls-remote.
///
/// Authenticates through the SSH agent or the configured git credential
/// helper; anonymous and local remotes need neither.
pub(crate) fn remote_callbacks<'a>() -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(|url, username, allowed| {
        if allowed.contains(CredentialType::SSH_KEY) {
            Cred::ssh_key_from_agent(username.unwrap_or("git"))
        } else if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
            let config = git2::Config::open_default()?;
            Cred::credential_helper(&config, url, username)
        } else {
            Cred::default()
        }
    });
    callbacks
}
