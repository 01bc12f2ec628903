//! Per-invocation context and cancellation

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::goals::{GoalName, GoalOptions};
use crate::lock::HeldLocks;
use crate::notify::Notifier;
use crate::pipe::ApprovalProvider;
use crate::settings::Settings;
use crate::{Error, Result};

/// Shared flag raised when the invocation should stop.
///
/// Clones observe the same flag, so the token can be handed to a signal
/// watcher and to every forked child.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a goal needs besides its bundle and options.
///
/// Built once per invocation. Fields that would otherwise be process-wide
/// state (current goal, dry-run, commit on/off) are explicit here.
pub struct Context<'a> {
    pub settings: &'a Settings,
    pub goal: GoalName,
    pub dry_run: bool,
    pub resume: bool,
    pub force: bool,
    /// Overrides `execution.max_fork_count` for this invocation
    pub max_fork_count: Option<usize>,
    pub cancel: CancelToken,
    /// Locks taken so far, shared with the interrupt handler
    pub held_locks: HeldLocks,
    pub notifier: &'a dyn Notifier,
    pub approval: &'a dyn ApprovalProvider,
}

impl<'a> Context<'a> {
    pub fn new(
        settings: &'a Settings,
        goal: GoalName,
        notifier: &'a dyn Notifier,
        approval: &'a dyn ApprovalProvider,
    ) -> Self {
        Self {
            settings,
            goal,
            dry_run: false,
            resume: false,
            force: false,
            max_fork_count: None,
            cancel: CancelToken::new(),
            held_locks: HeldLocks::new(),
            notifier,
            approval,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_max_fork_count(mut self, max_fork_count: Option<usize>) -> Self {
        self.max_fork_count = max_fork_count;
        self
    }

    /// Apply the invocation-wide flags of `options`.
    pub fn with_options(self, options: &GoalOptions) -> Self {
        self.with_dry_run(options.dry_run)
            .with_resume(options.resume)
            .with_force(options.force)
            .with_max_fork_count(options.max_fork_count)
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_held_locks(mut self, held_locks: HeldLocks) -> Self {
        self.held_locks = held_locks;
        self
    }

    /// Whether this invocation commits and pushes its changes.
    pub fn commits(&self) -> bool {
        self.goal.spec().mutates && !self.dry_run
    }

    pub fn fork_limit(&self) -> Option<usize> {
        self.max_fork_count.or(self.settings.execution.max_fork_count)
    }

    /// Fail with [`Error::Interrupted`] once cancellation was requested.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Interrupted {
                at: Some(self.goal.to_string()),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("goal", &self.goal)
            .field("dry_run", &self.dry_run)
            .field("resume", &self.resume)
            .field("force", &self.force)
            .field("max_fork_count", &self.max_fork_count)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
