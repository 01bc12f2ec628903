//! CLI argument parsing using clap derive

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use convoy_core::{GoalName, GoalOptions};

use crate::error::Result;

/// Convoy - Coordinate releases across the repositories of a bundle
#[derive(Parser, Debug)]
#[command(name = "convoy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Settings file (defaults to <config dir>/convoy/convoy.toml)
    #[arg(long, global = true, env = "CONVOY_CONFIG")]
    pub config: Option<PathBuf>,

    /// The command to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a release goal
    ///
    /// Examples:
    ///   convoy run changeset-start --changeset-id svc:VCTRS-1234
    ///   convoy run changeset-promote --changeset-id svc:VCTRS-1234 --dry-run
    ///   convoy run set-constraint --bundle svc --constraint BLOCKED
    ///   convoy run shipment-create --shipment-id svc:2024.1 --bundles svc,web
    Run(GoalArgs),

    /// List goals and the options they take
    Goals,
}

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct GoalArgs {
    /// Goal to run (see `convoy goals`)
    pub goal: String,

    /// Bundle name
    #[arg(long)]
    pub bundle: Option<String>,

    /// Release constraint: OPEN, BLOCKED or MODERATED
    #[arg(long)]
    pub constraint: Option<String>,

    /// Changeset id, e.g. svc:VCTRS-1234
    #[arg(long)]
    pub changeset_id: Option<String>,

    /// Shipment id, e.g. svc:2024.1
    #[arg(long)]
    pub shipment_id: Option<String>,

    /// Alias id, e.g. svc:RELEASED
    #[arg(long)]
    pub alias_id: Option<String>,

    /// Trunk name
    #[arg(long)]
    pub trunk: Option<String>,

    /// One-line summary of a new changeset
    #[arg(long)]
    pub summary: Option<String>,

    /// Projects a new changeset touches
    #[arg(long, value_delimiter = ',')]
    pub projects: Vec<String>,

    /// Bundles a new shipment spans
    #[arg(long, value_delimiter = ',')]
    pub bundles: Vec<String>,

    /// Restrict per-project checks to these projects
    #[arg(long, value_delimiter = ',')]
    pub include: Vec<String>,

    /// Run every check but commit nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Upper bound on concurrent project operations
    #[arg(long)]
    pub max_fork_count: Option<usize>,

    /// Treat an already reached target state as success
    #[arg(long)]
    pub resume: bool,

    /// Override a bundle lock held by another host
    #[arg(long)]
    pub force: bool,
}

impl GoalArgs {
    /// Resolve the goal and parse every id.
    pub fn into_goal(self) -> Result<(GoalName, GoalOptions)> {
        let goal: GoalName = self.goal.parse()?;
        let options = GoalOptions {
            bundle: self.bundle,
            constraint: self.constraint.map(|c| c.parse()).transpose()?,
            changeset_id: self.changeset_id.map(|id| id.parse()).transpose()?,
            shipment_id: self.shipment_id.map(|id| id.parse()).transpose()?,
            alias_id: self.alias_id.map(|id| id.parse()).transpose()?,
            trunk: self.trunk,
            summary: self.summary,
            projects: self.projects,
            bundles: self.bundles,
            include: self.include,
            dry_run: self.dry_run,
            max_fork_count: self.max_fork_count,
            resume: self.resume,
            force: self.force,
        };
        Ok((goal, options))
    }
}
