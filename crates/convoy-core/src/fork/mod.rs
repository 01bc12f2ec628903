//! Bounded-concurrency fan-out of one operation across projects
//!
//! [`ForkedProjectOp::run`] never fails as a whole: every child outcome,
//! including panics and cancellations, is recorded against its project and
//! the caller decides what an aggregate failure means.

mod command;

pub use command::run_command;

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crate::context::CancelToken;
use crate::{Error, Result};

/// Why a child operation did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildFailure {
    /// The child process or operation failed
    Exec {
        message: String,
        status: Option<i32>,
        stderr: String,
    },
    /// The child panicked
    Crashed { message: String },
    /// Cancellation was requested before the child finished
    Cancelled,
}

impl From<Error> for ChildFailure {
    fn from(error: Error) -> Self {
        match error {
            Error::Exec {
                message,
                status,
                stderr,
            } => Self::Exec {
                message,
                status,
                stderr,
            },
            Error::Interrupted { .. } => Self::Cancelled,
            other => Self::Exec {
                message: other.to_string(),
                status: None,
                stderr: String::new(),
            },
        }
    }
}

impl fmt::Display for ChildFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exec { message, .. } => f.write_str(message),
            Self::Crashed { message } => write!(f, "crashed: {message}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectOutcome {
    Succeeded { output: String },
    Failed(ChildFailure),
}

/// Result of one child, attributed to its project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectResult {
    pub project: String,
    pub outcome: ProjectOutcome,
}

impl ProjectResult {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, ProjectOutcome::Succeeded { .. })
    }

    pub fn failure(&self) -> Option<&ChildFailure> {
        match &self.outcome {
            ProjectOutcome::Failed(failure) => Some(failure),
            ProjectOutcome::Succeeded { .. } => None,
        }
    }
}

/// Aggregate result of a forked operation, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkReport {
    pub operation: String,
    /// True only if every child succeeded
    pub success: bool,
    pub per_project: Vec<ProjectResult>,
}

impl ForkReport {
    pub fn failures(&self) -> impl Iterator<Item = (&str, &ChildFailure)> {
        self.per_project
            .iter()
            .filter_map(|r| r.failure().map(|f| (r.project.as_str(), f)))
    }

    /// Convert an aggregate failure into the error a goal surfaces.
    ///
    /// A single failed child process keeps its exit status and stderr; any
    /// other failure set becomes a build error naming every failed project.
    pub fn ensure_success(self) -> Result<Self> {
        if self.success {
            return Ok(self);
        }
        let failures: Vec<(&str, &ChildFailure)> = self.failures().collect();
        if failures.iter().all(|(_, f)| **f == ChildFailure::Cancelled) {
            return Err(Error::Interrupted {
                at: Some(self.operation.clone()),
            });
        }
        if let [(project, ChildFailure::Exec { message, status, stderr })] = failures.as_slice() {
            return Err(Error::Exec {
                message: format!("{} failed for {project}: {message}", self.operation),
                status: *status,
                stderr: stderr.clone(),
            });
        }
        let detail: Vec<String> = failures
            .iter()
            .map(|(project, failure)| format!("{project} ({failure})"))
            .collect();
        Err(Error::build(format!(
            "{} failed for {} of {} projects: {}",
            self.operation,
            failures.len(),
            self.per_project.len(),
            detail.join(", ")
        )))
    }
}

/// Runs one named operation over many projects with at most `limit`
/// children in flight.
#[derive(Debug, Clone)]
pub struct ForkedProjectOp {
    operation: String,
    limit: Option<usize>,
    cancel: CancelToken,
}

impl ForkedProjectOp {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            limit: None,
            cancel: CancelToken::new(),
        }
    }

    /// Cap concurrent children; `None` runs every child at once.
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run `child` for every `(project, options)` pair.
    ///
    /// Children that have not started when cancellation is requested are
    /// recorded as cancelled; children already running are handed the token
    /// and are expected to stop on their own.
    pub fn run<O, F>(&self, pairs: &[(String, O)], child: F) -> ForkReport
    where
        O: Sync,
        F: Fn(&str, &O, &CancelToken) -> Result<String> + Sync,
    {
        let total = pairs.len();
        let workers = self.limit.unwrap_or(total).clamp(1, total.max(1));
        tracing::info!(
            operation = %self.operation,
            projects = total,
            workers,
            "Forking project operation"
        );

        let next = AtomicUsize::new(0);
        let slots: Mutex<Vec<Option<ProjectOutcome>>> = Mutex::new(vec![None; total]);

        thread::scope(|scope| {
            for _ in 0..workers.min(total) {
                scope.spawn(|| {
                    loop {
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        let Some((project, options)) = pairs.get(index) else {
                            break;
                        };
                        let outcome = self.run_child(project, options, &child);
                        if let Ok(mut slots) = slots.lock() {
                            slots[index] = Some(outcome);
                        }
                    }
                });
            }
        });

        let slots = slots.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        let per_project: Vec<ProjectResult> = pairs
            .iter()
            .zip(slots)
            .map(|((project, _), outcome)| ProjectResult {
                project: project.clone(),
                outcome: outcome.unwrap_or_else(|| {
                    ProjectOutcome::Failed(ChildFailure::Crashed {
                        message: "child produced no result".to_string(),
                    })
                }),
            })
            .collect();
        let success = per_project.iter().all(ProjectResult::succeeded);

        if success {
            tracing::info!(operation = %self.operation, "All project children succeeded");
        } else {
            let failed = per_project.iter().filter(|r| !r.succeeded()).count();
            tracing::warn!(operation = %self.operation, failed, total, "Project children failed");
        }
        ForkReport {
            operation: self.operation.clone(),
            success,
            per_project,
        }
    }

    fn run_child<O, F>(&self, project: &str, options: &O, child: &F) -> ProjectOutcome
    where
        F: Fn(&str, &O, &CancelToken) -> Result<String>,
    {
        if self.cancel.is_cancelled() {
            return ProjectOutcome::Failed(ChildFailure::Cancelled);
        }
        tracing::debug!(operation = %self.operation, project = %project, "Child started");
        let result = panic::catch_unwind(AssertUnwindSafe(|| child(project, options, &self.cancel)));
        let outcome = match result {
            Ok(Ok(output)) => ProjectOutcome::Succeeded { output },
            Ok(Err(error)) => ProjectOutcome::Failed(error.into()),
            Err(payload) => ProjectOutcome::Failed(ChildFailure::Crashed {
                message: panic_message(payload.as_ref()),
            }),
        };
        match &outcome {
            ProjectOutcome::Succeeded { .. } => {
                tracing::debug!(operation = %self.operation, project = %project, "Child succeeded");
            }
            ProjectOutcome::Failed(failure) => {
                tracing::warn!(
                    operation = %self.operation,
                    project = %project,
                    failure = %failure,
                    "Child failed"
                );
            }
        }
        outcome
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
