//! Release pipe: admission control for changesets leaving their trunk
//!
//! Each bundle carries a [`ReleaseConstraint`]. `OPEN` lets changesets
//! through, `BLOCKED` stops them, and `MODERATED` requires a human to echo
//! back a one-time code that was sent to the bundle's notification channel.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::notify::{Notification, notify_best_effort};
use crate::{Error, Result};

/// Prompts allowed before an approval is cancelled: the first plus three retries.
pub const APPROVAL_ATTEMPTS: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReleaseConstraint {
    #[default]
    #[serde(alias = "NONE")]
    Open,
    Blocked,
    Moderated,
}

impl ReleaseConstraint {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Blocked => "BLOCKED",
            Self::Moderated => "MODERATED",
        }
    }
}

impl fmt::Display for ReleaseConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReleaseConstraint {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_uppercase().as_str() {
            "OPEN" | "NONE" => Ok(Self::Open),
            "BLOCKED" => Ok(Self::Blocked),
            "MODERATED" => Ok(Self::Moderated),
            _ => Err(Error::build(format!(
                "Unknown release constraint '{value}': expected OPEN, NONE, BLOCKED or MODERATED"
            ))),
        }
    }
}

/// Source of approval codes typed by a human.
pub trait ApprovalProvider: Send + Sync {
    /// Ask for the code. Errors are not retried.
    fn prompt(&self, message: &str) -> Result<String>;
}

/// Replays a fixed sequence of answers; fails once they run out.
#[derive(Debug, Default)]
pub struct ScriptedApproval {
    answers: Mutex<VecDeque<String>>,
    prompts: AtomicUsize,
}

impl ScriptedApproval {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            prompts: AtomicUsize::new(0),
        }
    }

    /// Number of prompts answered or attempted so far.
    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

impl ApprovalProvider for ScriptedApproval {
    fn prompt(&self, _message: &str) -> Result<String> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        self.answers
            .lock()
            .ok()
            .and_then(|mut answers| answers.pop_front())
            .ok_or_else(|| Error::cancelled("No approval input available"))
    }
}

/// What the pipe decided for one changeset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Work on a non-default trunk is never gated
    TrunkLocal,
    Open,
    /// Moderated, but nothing is committed in a dry run
    SkippedDryRun,
    Approved,
}

/// The gate of one bundle.
#[derive(Debug, Clone)]
pub struct ReleasePipe<'a> {
    pub bundle: &'a str,
    pub constraint: ReleaseConstraint,
    pub default_trunk: &'a str,
    /// Notification channel for approval codes
    pub channel: Option<&'a str>,
}

/// Pending change presented to the approver.
#[derive(Debug, Clone)]
pub struct ApprovalRequest<'a> {
    pub action: &'a str,
    /// Marker lines summarizing what will change, e.g. `~ status: DEV -> RC`
    pub summary: &'a [String],
}

impl ReleasePipe<'_> {
    /// Admit a changeset on `trunk` (the default trunk when `None`).
    pub fn ensure_pipe_is_open(
        &self,
        ctx: &Context<'_>,
        trunk: Option<&str>,
        request: &ApprovalRequest<'_>,
    ) -> Result<Admission> {
        if let Some(trunk) = trunk
            && trunk != self.default_trunk
        {
            tracing::debug!(bundle = %self.bundle, trunk = %trunk, "Trunk-local change, pipe not consulted");
            return Ok(Admission::TrunkLocal);
        }

        match self.constraint {
            ReleaseConstraint::Open => Ok(Admission::Open),
            ReleaseConstraint::Blocked => Err(Error::build(format!(
                "Release pipe of bundle '{}' is blocked (constraint {})",
                self.bundle, self.constraint
            ))),
            ReleaseConstraint::Moderated if ctx.dry_run => {
                tracing::info!(
                    bundle = %self.bundle,
                    action = %request.action,
                    "Release pipe is moderated; approval skipped in dry run"
                );
                Ok(Admission::SkippedDryRun)
            }
            ReleaseConstraint::Moderated => {
                let channel = self
                    .channel
                    .or(ctx.settings.notifications.default_channel.as_deref())
                    .ok_or_else(|| {
                        Error::config(format!(
                            "Bundle '{}' is moderated but no notification channel is configured",
                            self.bundle
                        ))
                    })?;
                if !ctx.notifier.delivers() {
                    return Err(Error::config(format!(
                        "Bundle '{}' is moderated but notifications.webhook_url is not set; \
                         approval codes would never reach {channel}",
                        self.bundle
                    )));
                }
                ensure_approval(ctx, channel, request, &generate_code())?;
                Ok(Admission::Approved)
            }
        }
    }
}

/// A random four-digit approval code.
pub fn generate_code() -> String {
    format!("{:04}", rand::thread_rng().gen_range(0..10_000))
}

/// Why one prompt did not approve.
enum Attempt {
    Empty,
    Mismatch,
}

impl Attempt {
    fn describe(&self) -> &'static str {
        match self {
            Self::Empty => "no approval code entered",
            Self::Mismatch => "approval code does not match",
        }
    }
}

/// Send `code` to `channel` and wait for a human to type it back.
///
/// Empty or wrong answers are retried until [`APPROVAL_ATTEMPTS`] prompts
/// have failed, which cancels the goal. Errors from the approval provider
/// itself end the exchange immediately.
pub fn ensure_approval(
    ctx: &Context<'_>,
    channel: &str,
    request: &ApprovalRequest<'_>,
    code: &str,
) -> Result<()> {
    let mut announcement = Notification::new(
        Some(channel.to_string()),
        format!("Approval code for {}: {code}", request.action),
    )
    .required();
    if !request.summary.is_empty() {
        announcement = announcement.field("changes", request.summary.join("\n"));
    }
    notify_best_effort(ctx.notifier, &announcement);

    let mut last = Attempt::Empty;
    for attempt in 1..=APPROVAL_ATTEMPTS {
        ctx.check_cancelled()?;
        let answer = ctx
            .approval
            .prompt(&format!("Approval code sent to {channel} for {}", request.action))?;
        let answer = answer.trim();
        if answer == code {
            tracing::info!(action = %request.action, attempt, "Approval granted");
            notify_best_effort(
                ctx.notifier,
                &Notification::new(
                    Some(channel.to_string()),
                    format!("Approved: {}", request.action),
                )
                .silent(),
            );
            return Ok(());
        }
        last = if answer.is_empty() {
            Attempt::Empty
        } else {
            Attempt::Mismatch
        };
        tracing::warn!(
            attempt,
            remaining = APPROVAL_ATTEMPTS - attempt,
            "{}",
            last.describe()
        );
    }

    Err(Error::cancelled(format!(
        "Approval for {} failed after {APPROVAL_ATTEMPTS} attempts: {}",
        request.action,
        last.describe()
    )))
}
