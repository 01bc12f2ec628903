use crate::bundle::ChangesetBundle;
use crate::goals::{GoalOptions, GoalOutcome};
use crate::Result;

pub(super) fn set_constraint(
    bundle: &mut ChangesetBundle<'_>,
    options: &GoalOptions,
) -> Result<GoalOutcome> {
    let constraint = options.require_constraint()?;
    let previous = bundle.get_release_constraint()?;
    if !bundle.set_release_constraint(constraint)? {
        return Ok(GoalOutcome::unchanged(format!(
            "Release constraint of {} is already {constraint}",
            bundle.name()
        )));
    }
    tracing::info!(bundle = %bundle.name(), from = %previous, to = %constraint, "Release constraint changed");
    Ok(GoalOutcome::new(format!(
        "Set release constraint of {} to {constraint}",
        bundle.name()
    ))
    .line(format!("{previous} -> {constraint}"))
    .touch(bundle.layout().bundle_config(bundle.name())))
}
