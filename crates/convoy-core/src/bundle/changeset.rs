//! The per-bundle aggregate used by changeset, trunk and constraint goals

use std::path::PathBuf;
use std::time::Duration;

use convoy_git::ConfigRepository;

use super::{BundleConfig, GoalScope, SupportProject, acquire};
use crate::context::Context;
use crate::fork::{ForkReport, ForkedProjectOp, run_command};
use crate::id::ChangesetId;
use crate::layout::Layout;
use crate::lock::LockHandle;
use crate::notify::{Notification, notify_best_effort};
use crate::pipe::{Admission, ApprovalRequest, ReleaseConstraint, ReleasePipe};
use crate::state::{AliasFile, ChangesetFile, TrunkFile};
use crate::{Error, Result};

/// Stable and candidate alias of one trunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrunkAliases {
    pub trunk: String,
    pub active: bool,
    pub stable: Option<AliasFile>,
    pub candidate: Option<AliasFile>,
}

/// One project of a per-project check.
struct CheckTarget {
    url: String,
    branch: String,
    checkout: PathBuf,
}

pub struct ChangesetBundle<'a> {
    ctx: &'a Context<'a>,
    repo: &'a ConfigRepository,
    name: String,
    config: Option<BundleConfig>,
    lock: Option<LockHandle<'a>>,
    support: Option<Vec<SupportProject>>,
}

impl std::fmt::Debug for ChangesetBundle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangesetBundle")
            .field("name", &self.name)
            .field("loaded", &self.config.is_some())
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

impl<'a> ChangesetBundle<'a> {
    pub fn new(ctx: &'a Context<'a>, repo: &'a ConfigRepository, name: impl Into<String>) -> Self {
        Self {
            ctx,
            repo,
            name: name.into(),
            config: None,
            lock: None,
            support: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &'a Context<'a> {
        self.ctx
    }

    pub fn repo(&self) -> &'a ConfigRepository {
        self.repo
    }

    pub fn layout(&self) -> &'a Layout {
        &self.ctx.settings.layout
    }

    /// The loaded configuration; fails for unknown bundles.
    pub fn config(&self) -> Result<&BundleConfig> {
        self.config.as_ref().ok_or_else(|| {
            Error::build(format!(
                "Unknown bundle '{}': no configuration at {}",
                self.name,
                self.layout().bundle_config(&self.name)
            ))
        })
    }

    pub fn default_trunk(&self) -> Result<&str> {
        Ok(&self.config()?.default_trunk)
    }

    pub fn get_release_constraint(&self) -> Result<ReleaseConstraint> {
        Ok(self.config()?.constraint)
    }

    /// Persist a new constraint in the working copy; returns whether it changed.
    pub fn set_release_constraint(&mut self, constraint: ReleaseConstraint) -> Result<bool> {
        self.config()?;
        let changed =
            BundleConfig::store_constraint(self.repo, self.layout(), &self.name, constraint)?;
        if let Some(config) = self.config.as_mut() {
            config.constraint = constraint;
        }
        Ok(changed)
    }

    /// Whether `trunk` exists and accepts changesets.
    ///
    /// The default trunk always exists, with or without a trunk file.
    pub fn trunk_is_active(&self, trunk: &str) -> Result<bool> {
        match TrunkFile::load(self.repo, self.layout(), &self.name, trunk)? {
            Some(file) => Ok(file.active),
            None => Ok(trunk == self.default_trunk()?),
        }
    }

    /// Aliases of every trunk, default trunk first.
    ///
    /// Never fails: an unknown bundle or unreadable trunk yields an empty or
    /// partial list and a warning.
    pub fn get_trunk_aliases(&self) -> Vec<TrunkAliases> {
        let Some(config) = &self.config else {
            tracing::warn!(bundle = %self.name, "Unknown bundle, no trunks to list");
            return Vec::new();
        };
        let trunks = match TrunkFile::list(self.repo, self.layout(), &self.name) {
            Ok(trunks) => trunks,
            Err(e) => {
                tracing::warn!(bundle = %self.name, error = %e, "Could not list trunks");
                Vec::new()
            }
        };

        let mut names: Vec<(String, bool)> = Vec::new();
        if !trunks.iter().any(|t| t.name == config.default_trunk) {
            names.push((config.default_trunk.clone(), true));
        }
        names.extend(trunks.into_iter().map(|t| (t.name, t.active)));
        names.sort_by_key(|(name, _)| name != &config.default_trunk);

        names
            .into_iter()
            .map(|(trunk, active)| {
                let load = |path: String| {
                    AliasFile::load(self.repo, &path).unwrap_or_else(|e| {
                        tracing::warn!(path = %path, error = %e, "Unreadable alias");
                        None
                    })
                };
                TrunkAliases {
                    stable: load(self.layout().alias(&self.name, &trunk)),
                    candidate: load(self.layout().candidate_alias(&self.name, &trunk)),
                    trunk,
                    active,
                }
            })
            .collect()
    }

    pub fn release_pipe(&self) -> Result<ReleasePipe<'_>> {
        let config = self.config()?;
        Ok(ReleasePipe {
            bundle: &self.name,
            constraint: config.constraint,
            default_trunk: &config.default_trunk,
            channel: config.channel.as_deref(),
        })
    }

    /// Consult the release pipe before `changeset` leaves its trunk.
    pub fn ensure_pipe_is_open(
        &self,
        changeset: &ChangesetFile,
        action: &str,
        summary: &[String],
    ) -> Result<Admission> {
        let request = ApprovalRequest { action, summary };
        self.release_pipe()?
            .ensure_pipe_is_open(self.ctx, changeset.trunk.as_deref(), &request)
    }

    /// Support projects of the bundle, checked out unless `shallow`.
    ///
    /// Checkouts happen once per bundle; later calls reuse them.
    pub fn init_support_projects(&mut self, shallow: bool) -> Result<Vec<SupportProject>> {
        if let Some(support) = &self.support
            && (shallow || support.iter().all(|p| p.checkout.is_some()))
        {
            return Ok(support.clone());
        }

        let config = self.config()?;
        let mut support: Vec<SupportProject> = config
            .support_projects()
            .into_iter()
            .filter_map(|name| {
                config.projects.get(name).map(|project| SupportProject {
                    name: name.to_string(),
                    url: project.url.clone(),
                    branch: config.default_trunk.clone(),
                    checkout: None,
                })
            })
            .collect();

        if !shallow && !support.is_empty() {
            let root = self.ctx.settings.work_dir().join(&self.name).join("support");
            let pairs: Vec<(String, CheckTarget)> = support
                .iter()
                .map(|p| {
                    (
                        p.name.clone(),
                        CheckTarget {
                            url: p.url.clone(),
                            branch: p.branch.clone(),
                            checkout: root.join(&p.name),
                        },
                    )
                })
                .collect();
            ForkedProjectOp::new("support checkout")
                .with_limit(self.ctx.fork_limit())
                .with_cancel(self.ctx.cancel.clone())
                .run(&pairs, |_, target, _| {
                    convoy_git::remote::checkout_branch(&target.url, &target.branch, &target.checkout)?;
                    Ok(target.checkout.display().to_string())
                })
                .ensure_success()?;
            for (project, (_, target)) in support.iter_mut().zip(pairs) {
                project.checkout = Some(target.checkout);
            }
        }

        tracing::debug!(bundle = %self.name, count = support.len(), shallow, "Support projects ready");
        self.support = Some(support.clone());
        Ok(support)
    }

    /// Check every project `changeset` touches, restricted to `include` if given.
    ///
    /// Without a `check_command` this verifies that each project has the
    /// changeset branch. With one, each project is checked out on its
    /// changeset branch and the command must succeed inside the checkout.
    pub fn check_projects(
        &mut self,
        id: &ChangesetId,
        changeset: &ChangesetFile,
        include: &[String],
    ) -> Result<ForkReport> {
        let config = self.config()?;
        if let Some(unknown) = include.iter().find(|p| !changeset.projects.contains_key(*p)) {
            return Err(Error::build(format!("{id} does not touch project '{unknown}'")));
        }

        let root = self
            .ctx
            .settings
            .work_dir()
            .join(&self.name)
            .join(&id.tracking_id);
        let mut pairs = Vec::new();
        for (project, pin) in &changeset.projects {
            if !include.is_empty() && !include.contains(project) {
                continue;
            }
            pairs.push((
                project.clone(),
                CheckTarget {
                    url: config.project(project)?.url.clone(),
                    branch: pin.branch.clone(),
                    checkout: root.join(project),
                },
            ));
        }
        let check_command = config.check_command.clone();

        let op = ForkedProjectOp::new("project check")
            .with_limit(self.ctx.fork_limit())
            .with_cancel(self.ctx.cancel.clone());

        let Some(command) = check_command else {
            return Ok(op.run(&pairs, |_, target, _| {
                if convoy_git::remote::branch_exists(&target.url, &target.branch)? {
                    Ok(format!("{} present", target.branch))
                } else {
                    Err(Error::build(format!("branch {} not found", target.branch)))
                }
            }));
        };

        let support = self.init_support_projects(false)?;
        let support_dir = support
            .iter()
            .find_map(|p| p.checkout.as_ref().and_then(|c| c.parent()))
            .map(|dir| dir.display().to_string())
            .unwrap_or_default();
        let timeout = Duration::from_secs(self.ctx.settings.execution.child_timeout_secs);
        let bundle = self.name.clone();
        let changeset_id = id.to_string();

        Ok(op.run(&pairs, |project, target, cancel| {
            convoy_git::remote::checkout_branch(&target.url, &target.branch, &target.checkout)?;
            let envs = [
                ("CONVOY_BUNDLE", bundle.clone()),
                ("CONVOY_CHANGESET", changeset_id.clone()),
                ("CONVOY_PROJECT", project.to_string()),
                ("CONVOY_SUPPORT_DIR", support_dir.clone()),
            ];
            run_command(&command, &target.checkout, &envs, timeout, cancel)
        }))
    }

    /// Best-effort message to the bundle's channel.
    pub fn notify(&self, notification: Notification) {
        let notification = Notification {
            channel: notification.channel.or_else(|| self.channel()),
            ..notification
        };
        notify_best_effort(self.ctx.notifier, &notification);
    }
}

impl GoalScope for ChangesetBundle<'_> {
    fn label(&self) -> String {
        self.name.clone()
    }

    /// Idempotent: a held lock is kept.
    fn lock(&mut self) -> Result<()> {
        if self.lock.is_none() {
            self.lock = Some(acquire(self.ctx, self.repo, &self.name)?);
        }
        Ok(())
    }

    fn unlock(&mut self) {
        if let Some(mut lock) = self.lock.take() {
            lock.release();
        }
    }

    fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// A missing configuration is not an error here; goals that need it
    /// fail through [`ChangesetBundle::config`].
    fn load(&mut self) -> Result<()> {
        self.config = BundleConfig::load(self.repo, self.layout(), &self.name)?;
        self.support = None;
        Ok(())
    }

    fn channel(&self) -> Option<String> {
        self.config
            .as_ref()
            .and_then(|c| c.channel.clone())
            .or_else(|| self.ctx.settings.notifications.default_channel.clone())
    }
}

impl Drop for ChangesetBundle<'_> {
    fn drop(&mut self) {
        self.unlock();
    }
}
