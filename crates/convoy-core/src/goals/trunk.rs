//! Trunk goals

use crate::bundle::ChangesetBundle;
use crate::goals::{GoalOptions, GoalOutcome};
use crate::id::validate_trunk_name;
use crate::state::{AliasFile, HOTFIX_ALIAS, PRODUCTION_ALIAS, RELEASED_ALIAS, TrunkFile};
use crate::{Error, Result};

fn require_trunk(options: &GoalOptions) -> Result<String> {
    let trunk = options
        .trunk_name()
        .ok_or_else(|| Error::build("No trunk given: pass --trunk or --alias-id"))?;
    validate_trunk_name(trunk)?;
    Ok(trunk.to_string())
}

pub(super) fn create(bundle: &mut ChangesetBundle<'_>, options: &GoalOptions) -> Result<GoalOutcome> {
    let trunk = require_trunk(options)?;
    if [RELEASED_ALIAS, HOTFIX_ALIAS, PRODUCTION_ALIAS].contains(&trunk.as_str()) {
        return Err(Error::build(format!("Trunk name '{trunk}' is reserved")));
    }
    let (repo, layout) = (bundle.repo(), bundle.layout());
    let default_trunk = bundle.default_trunk()?.to_string();
    let path = layout.trunk(bundle.name(), &trunk);
    let resume = bundle.context().resume;

    let file = TrunkFile::load(repo, layout, bundle.name(), &trunk)?;
    let exists = match &file {
        Some(file) => file.active,
        None => trunk == default_trunk,
    };
    if exists {
        if resume {
            return Ok(GoalOutcome::unchanged(format!("Created trunk {trunk}")));
        }
        return Err(Error::build(format!(
            "Trunk '{trunk}' of bundle '{}' already exists",
            bundle.name()
        )));
    }

    let headline = match file {
        Some(mut file) => {
            file.active = true;
            file.save(repo, layout, bundle.name())?;
            format!("Reactivated trunk {trunk} of {}", bundle.name())
        }
        None => {
            TrunkFile::new(&trunk).save(repo, layout, bundle.name())?;
            format!("Created trunk {trunk} of {}", bundle.name())
        }
    };
    Ok(GoalOutcome::new(headline).touch(path))
}

pub(super) fn close(bundle: &mut ChangesetBundle<'_>, options: &GoalOptions) -> Result<GoalOutcome> {
    let trunk = require_trunk(options)?;
    let (repo, layout) = (bundle.repo(), bundle.layout());
    if trunk == bundle.default_trunk()? {
        return Err(Error::build(format!(
            "Trunk '{trunk}' is the default trunk of bundle '{}' and cannot be closed",
            bundle.name()
        )));
    }
    let mut file = TrunkFile::load(repo, layout, bundle.name(), &trunk)?.ok_or_else(|| {
        Error::build(format!("Trunk '{trunk}' of bundle '{}' does not exist", bundle.name()))
    })?;
    if !file.active {
        if bundle.context().resume {
            return Ok(GoalOutcome::unchanged(format!("Closed trunk {trunk}")));
        }
        return Err(Error::build(format!("Trunk '{trunk}' is already closed")));
    }
    if let Some(candidate) = AliasFile::load(repo, &layout.candidate_alias(bundle.name(), &trunk))? {
        return Err(Error::build(format!(
            "Trunk '{trunk}' has release candidate {} in flight; ship or abandon it first",
            candidate.changeset
        )));
    }

    file.active = false;
    file.save(repo, layout, bundle.name())?;
    Ok(GoalOutcome::new(format!("Closed trunk {trunk} of {}", bundle.name()))
        .touch(layout.trunk(bundle.name(), &trunk)))
}

/// Never fails: an unknown bundle lists no trunks.
pub(super) fn list(bundle: &mut ChangesetBundle<'_>, _options: &GoalOptions) -> Result<GoalOutcome> {
    let trunks = bundle.get_trunk_aliases();
    let mut outcome = GoalOutcome::new(format!("Trunks of {}", bundle.name()));
    if trunks.is_empty() {
        return Ok(outcome.line("no trunks"));
    }
    for trunk in trunks {
        let state = if trunk.active { "" } else { " (closed)" };
        let stable = trunk.stable.map(|a| a.changeset).unwrap_or_else(|| "-".into());
        let candidate = trunk
            .candidate
            .map(|a| a.changeset)
            .unwrap_or_else(|| "-".into());
        outcome = outcome.line(format!(
            "{}{state}  stable: {stable}  candidate: {candidate}",
            trunk.trunk
        ));
    }
    Ok(outcome)
}
