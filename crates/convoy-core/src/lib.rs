//! Release-state coordination engine for Convoy
//!
//! This crate implements the release goals that move changesets, trunks and
//! shipments through their lifecycle:
//!
//! - **State files**: typed YAML manifests in the metadata repository and
//!   the status machines that govern them
//! - **Bundle lock**: at most one mutating goal per bundle, across hosts
//! - **Forked project operations**: bounded-concurrency fan-out over the
//!   projects of a bundle with ordered, never-throwing results
//! - **Release pipe**: per-bundle admission control with a human approval
//!   exchange for moderated bundles
//! - **Goals**: a compile-time registry of goal handlers and the runner that
//!   wraps each one in lock, reset, commit and rollback
//!
//! # Architecture
//!
//! ```text
//!                 convoy-cli
//!                     |
//!                convoy-core
//!                 /       \
//!          convoy-git   convoy-fs
//! ```

pub mod bundle;
pub mod context;
pub mod error;
pub mod fork;
pub mod goals;
pub mod id;
pub mod layout;
pub mod lock;
pub mod notify;
pub mod pipe;
pub mod runner;
pub mod settings;
pub mod state;

pub use bundle::{BundleConfig, ChangesetBundle, GoalScope, ShipmentBundle};
pub use context::{CancelToken, Context};
pub use error::{Error, ErrorKind, Result};
pub use fork::{ForkReport, ForkedProjectOp};
pub use goals::{Arg, GoalName, GoalOptions, GoalOutcome, GoalSpec};
pub use id::{AliasId, ChangesetId, ShipmentId};
pub use layout::Layout;
pub use lock::{BundleLock, HeldLocks, LockHandle};
pub use notify::{Notification, Notifier};
pub use pipe::{ApprovalProvider, ReleaseConstraint};
pub use runner::run_goal;
pub use settings::Settings;
