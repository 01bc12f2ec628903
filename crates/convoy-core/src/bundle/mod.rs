//! Bundles: the runtime aggregates goals operate on
//!
//! A bundle binds a loaded configuration to the config repository and the
//! invocation context, and owns the bundle lock for as long as it lives.

mod changeset;
mod config;
mod shipment;

pub use changeset::{ChangesetBundle, TrunkAliases};
pub use config::{BundleConfig, ProjectConfig};
pub use shipment::ShipmentBundle;

use std::path::PathBuf;

use convoy_git::ConfigRepository;

use crate::Result;
use crate::context::Context;
use crate::lock::{BundleLock, LockHandle};

/// A support project, optionally checked out on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportProject {
    pub name: String,
    pub url: String,
    pub branch: String,
    /// Set once the project has been checked out
    pub checkout: Option<PathBuf>,
}

/// What the goal runner needs from any bundle kind.
pub trait GoalScope {
    /// Name used in logs and notifications
    fn label(&self) -> String;
    fn lock(&mut self) -> Result<()>;
    /// Release every lock held. Safe to call when nothing is held.
    fn unlock(&mut self);
    fn is_locked(&self) -> bool;
    /// Read configuration from a freshly reset working copy.
    fn load(&mut self) -> Result<()>;
    /// Channel for goal notifications
    fn channel(&self) -> Option<String>;
}

/// Take the lock of `key`: durable when the invocation commits, local otherwise.
pub(crate) fn acquire<'a>(
    ctx: &Context<'_>,
    repo: &'a ConfigRepository,
    key: &str,
) -> Result<LockHandle<'a>> {
    let lock_dir = ctx.settings.lock_dir();
    let locks = if ctx.commits() {
        BundleLock::durable(lock_dir, repo)
    } else {
        BundleLock::local(lock_dir)
    };
    locks.with_registry(ctx.held_locks.clone()).acquire(key, ctx.force)
}
