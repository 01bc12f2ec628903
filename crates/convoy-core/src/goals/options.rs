//! Validated goal options

use crate::id::{AliasId, ChangesetId, ShipmentId};
use crate::pipe::ReleaseConstraint;
use crate::{Error, Result};

/// An option a goal may require or accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arg {
    /// Satisfied by `--bundle` or by any id naming a bundle
    Bundle,
    Constraint,
    ChangesetId,
    ShipmentId,
    AliasId,
    Trunk,
    Summary,
    Projects,
    Bundles,
    Include,
    DryRun,
    MaxForkCount,
    Resume,
    Force,
}

impl Arg {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bundle => "bundle",
            Self::Constraint => "constraint",
            Self::ChangesetId => "changeset-id",
            Self::ShipmentId => "shipment-id",
            Self::AliasId => "alias-id",
            Self::Trunk => "trunk",
            Self::Summary => "summary",
            Self::Projects => "projects",
            Self::Bundles => "bundles",
            Self::Include => "include",
            Self::DryRun => "dry-run",
            Self::MaxForkCount => "max-fork-count",
            Self::Resume => "resume",
            Self::Force => "force",
        }
    }
}

/// Options of one goal invocation, already parsed and typed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoalOptions {
    pub bundle: Option<String>,
    pub constraint: Option<ReleaseConstraint>,
    pub changeset_id: Option<ChangesetId>,
    pub shipment_id: Option<ShipmentId>,
    pub alias_id: Option<AliasId>,
    pub trunk: Option<String>,
    pub summary: Option<String>,
    /// Projects a new changeset touches
    pub projects: Vec<String>,
    /// Bundles a new shipment spans
    pub bundles: Vec<String>,
    /// Restrict per-project work to these projects
    pub include: Vec<String>,
    pub dry_run: bool,
    pub max_fork_count: Option<usize>,
    pub resume: bool,
    pub force: bool,
}

impl GoalOptions {
    pub fn has(&self, arg: Arg) -> bool {
        match arg {
            Arg::Bundle => self.bundle_name().is_ok(),
            Arg::Constraint => self.constraint.is_some(),
            Arg::ChangesetId => self.changeset_id.is_some(),
            Arg::ShipmentId => self.shipment_id.is_some(),
            Arg::AliasId => self.alias_id.is_some(),
            Arg::Trunk => self.trunk.is_some(),
            Arg::Summary => self.summary.is_some(),
            Arg::Projects => !self.projects.is_empty(),
            Arg::Bundles => !self.bundles.is_empty(),
            Arg::Include => !self.include.is_empty(),
            Arg::DryRun => self.dry_run,
            Arg::MaxForkCount => self.max_fork_count.is_some(),
            Arg::Resume => self.resume,
            Arg::Force => self.force,
        }
    }

    /// The bundle this invocation targets.
    ///
    /// Ids must agree with `--bundle` when both are given.
    pub fn bundle_name(&self) -> Result<String> {
        let from_ids = [
            self.changeset_id.as_ref().map(|id| &id.bundle_name),
            self.shipment_id.as_ref().map(|id| &id.bundle_name),
            self.alias_id.as_ref().map(|id| &id.bundle_name),
        ];
        let mut names = self.bundle.iter().chain(from_ids.into_iter().flatten());
        let Some(first) = names.next() else {
            return Err(Error::build("No bundle given: pass --bundle or an id"));
        };
        if let Some(other) = names.find(|name| *name != first) {
            return Err(Error::build(format!(
                "Options name different bundles: '{first}' and '{other}'"
            )));
        }
        Ok(first.clone())
    }

    pub fn require_changeset_id(&self) -> Result<&ChangesetId> {
        self.changeset_id
            .as_ref()
            .ok_or_else(|| Error::build("Missing required option --changeset-id"))
    }

    pub fn require_shipment_id(&self) -> Result<&ShipmentId> {
        self.shipment_id
            .as_ref()
            .ok_or_else(|| Error::build("Missing required option --shipment-id"))
    }

    pub fn require_constraint(&self) -> Result<ReleaseConstraint> {
        self.constraint
            .ok_or_else(|| Error::build("Missing required option --constraint"))
    }

    /// The trunk named by `--trunk`, or else by the alias of `--alias-id`.
    pub fn trunk_name(&self) -> Option<&str> {
        self.trunk
            .as_deref()
            .or(self.alias_id.as_ref().map(|id| id.alias.as_str()))
    }
}
