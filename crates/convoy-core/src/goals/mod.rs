//! Goal registry
//!
//! Every goal is a [`GoalName`] variant and [`GoalName::spec`] is the single
//! source of truth for its arguments, settings and handler. The match is
//! exhaustive, so adding a variant without registering it does not compile.

mod changeset;
mod constraint;
mod options;
mod shipment;
mod trunk;

pub use options::{Arg, GoalOptions};

use std::fmt;
use std::str::FromStr;

use crate::bundle::{ChangesetBundle, ShipmentBundle};
use crate::settings::Settings;
use crate::{Error, Result};

/// What a goal did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoalOutcome {
    /// Commit message and notification headline
    pub headline: String,
    /// Lines presented to the user
    pub report: Vec<String>,
    /// Metadata files written, relative to the repository root
    pub touched: Vec<String>,
    /// The target state was already reached
    pub unchanged: bool,
}

impl GoalOutcome {
    pub fn new(headline: impl Into<String>) -> Self {
        Self {
            headline: headline.into(),
            ..Self::default()
        }
    }

    pub fn unchanged(headline: impl Into<String>) -> Self {
        Self {
            headline: headline.into(),
            unchanged: true,
            ..Self::default()
        }
    }

    pub fn touch(mut self, path: impl Into<String>) -> Self {
        self.touched.push(path.into());
        self
    }

    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.report.push(line.into());
        self
    }
}

pub type ChangesetHandler = fn(&mut ChangesetBundle<'_>, &GoalOptions) -> Result<GoalOutcome>;
pub type ShipmentHandler = fn(&mut ShipmentBundle<'_>, &GoalOptions) -> Result<GoalOutcome>;

#[derive(Clone, Copy)]
pub enum Handler {
    Changeset(ChangesetHandler),
    Shipment(ShipmentHandler),
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Changeset(_) => f.write_str("Handler::Changeset"),
            Self::Shipment(_) => f.write_str("Handler::Shipment"),
        }
    }
}

/// Registration of one goal.
#[derive(Debug, Clone, Copy)]
pub struct GoalSpec {
    pub description: &'static str,
    pub required_arguments: &'static [Arg],
    pub optional_arguments: &'static [Arg],
    pub required_settings: &'static [&'static str],
    /// Whether the goal commits changes to the config repository
    pub mutates: bool,
    pub handler: Handler,
}

const GLOBAL_ARGUMENTS: &[Arg] = &[Arg::DryRun, Arg::MaxForkCount, Arg::Resume, Arg::Force];
const REPOSITORY: &[&str] = &["repository.url"];

impl GoalSpec {
    /// Fail on missing required or unsupported options.
    pub fn check_arguments(&self, name: GoalName, options: &GoalOptions) -> Result<()> {
        if let Some(missing) = self.required_arguments.iter().find(|a| !options.has(**a)) {
            return Err(Error::build(format!(
                "Goal {name} requires --{}",
                missing.as_str()
            )));
        }
        let accepted = |arg: &Arg| {
            self.required_arguments.contains(arg)
                || self.optional_arguments.contains(arg)
                || GLOBAL_ARGUMENTS.contains(arg)
        };
        let all = [
            Arg::Constraint,
            Arg::ChangesetId,
            Arg::ShipmentId,
            Arg::AliasId,
            Arg::Trunk,
            Arg::Summary,
            Arg::Projects,
            Arg::Bundles,
            Arg::Include,
        ];
        if let Some(unsupported) = all.iter().find(|a| options.has(**a) && !accepted(a)) {
            return Err(Error::build(format!(
                "Goal {name} does not accept --{}",
                unsupported.as_str()
            )));
        }
        Ok(())
    }

    pub fn check_settings(&self, settings: &Settings) -> Result<()> {
        for key in self.required_settings {
            if !settings.is_set(key) {
                return Err(Error::config(format!("Setting {key} is required")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GoalName {
    ChangesetStart,
    ChangesetPromote,
    ChangesetAbandon,
    ChangesetShip,
    ChangesetHotfix,
    ChangesetShow,
    SetConstraint,
    TrunkCreate,
    TrunkClose,
    TrunkList,
    ShipmentCreate,
    ShipmentShip,
}

impl GoalName {
    pub const ALL: [GoalName; 12] = [
        Self::ChangesetStart,
        Self::ChangesetPromote,
        Self::ChangesetAbandon,
        Self::ChangesetShip,
        Self::ChangesetHotfix,
        Self::ChangesetShow,
        Self::SetConstraint,
        Self::TrunkCreate,
        Self::TrunkClose,
        Self::TrunkList,
        Self::ShipmentCreate,
        Self::ShipmentShip,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChangesetStart => "changeset-start",
            Self::ChangesetPromote => "changeset-promote",
            Self::ChangesetAbandon => "changeset-abandon",
            Self::ChangesetShip => "changeset-ship",
            Self::ChangesetHotfix => "changeset-hotfix",
            Self::ChangesetShow => "changeset-show",
            Self::SetConstraint => "set-constraint",
            Self::TrunkCreate => "trunk-create",
            Self::TrunkClose => "trunk-close",
            Self::TrunkList => "trunk-list",
            Self::ShipmentCreate => "shipment-create",
            Self::ShipmentShip => "shipment-ship",
        }
    }

    pub fn spec(self) -> GoalSpec {
        use Arg::*;
        match self {
            Self::ChangesetStart => GoalSpec {
                description: "Create a DEV changeset or reopen an abandoned one",
                required_arguments: &[ChangesetId],
                optional_arguments: &[Summary, Projects, Trunk],
                required_settings: REPOSITORY,
                mutates: true,
                handler: Handler::Changeset(changeset::start),
            },
            Self::ChangesetPromote => GoalSpec {
                description: "Promote a DEV changeset to release candidate",
                required_arguments: &[ChangesetId],
                optional_arguments: &[Include],
                required_settings: REPOSITORY,
                mutates: true,
                handler: Handler::Changeset(changeset::promote),
            },
            Self::ChangesetAbandon => GoalSpec {
                description: "Revert a release candidate to DEV, or abandon a DEV changeset",
                required_arguments: &[ChangesetId],
                optional_arguments: &[],
                required_settings: REPOSITORY,
                mutates: true,
                handler: Handler::Changeset(changeset::abandon),
            },
            Self::ChangesetShip => GoalSpec {
                description: "Release a candidate or hotfix changeset",
                required_arguments: &[ChangesetId],
                optional_arguments: &[Include],
                required_settings: REPOSITORY,
                mutates: true,
                handler: Handler::Changeset(changeset::ship),
            },
            Self::ChangesetHotfix => GoalSpec {
                description: "Turn a changeset into a hotfix of the production baseline",
                required_arguments: &[ChangesetId],
                optional_arguments: &[AliasId],
                required_settings: REPOSITORY,
                mutates: true,
                handler: Handler::Changeset(changeset::hotfix),
            },
            Self::ChangesetShow => GoalSpec {
                description: "Show a changeset and the aliases pointing at it",
                required_arguments: &[ChangesetId],
                optional_arguments: &[],
                required_settings: REPOSITORY,
                mutates: false,
                handler: Handler::Changeset(changeset::show),
            },
            Self::SetConstraint => GoalSpec {
                description: "Set the release constraint of a bundle",
                required_arguments: &[Bundle, Constraint],
                optional_arguments: &[ChangesetId, AliasId],
                required_settings: REPOSITORY,
                mutates: true,
                handler: Handler::Changeset(constraint::set_constraint),
            },
            Self::TrunkCreate => GoalSpec {
                description: "Create or reactivate a trunk",
                required_arguments: &[Bundle],
                optional_arguments: &[Trunk, AliasId],
                required_settings: REPOSITORY,
                mutates: true,
                handler: Handler::Changeset(trunk::create),
            },
            Self::TrunkClose => GoalSpec {
                description: "Close a trunk without a release candidate in flight",
                required_arguments: &[Bundle],
                optional_arguments: &[Trunk, AliasId],
                required_settings: REPOSITORY,
                mutates: true,
                handler: Handler::Changeset(trunk::close),
            },
            Self::TrunkList => GoalSpec {
                description: "List trunks with their stable and candidate aliases",
                required_arguments: &[Bundle],
                optional_arguments: &[],
                required_settings: REPOSITORY,
                mutates: false,
                handler: Handler::Changeset(trunk::list),
            },
            Self::ShipmentCreate => GoalSpec {
                description: "Create a shipment from the release candidates of its bundles",
                required_arguments: &[ShipmentId],
                optional_arguments: &[Bundles],
                required_settings: REPOSITORY,
                mutates: true,
                handler: Handler::Shipment(shipment::create),
            },
            Self::ShipmentShip => GoalSpec {
                description: "Release every changeset of a shipment",
                required_arguments: &[ShipmentId],
                optional_arguments: &[Include],
                required_settings: REPOSITORY,
                mutates: true,
                handler: Handler::Shipment(shipment::ship),
            },
        }
    }
}

impl fmt::Display for GoalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GoalName {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|goal| goal.as_str() == value)
            .ok_or_else(|| Error::build(format!("Unsupported goal '{value}'")))
    }
}
