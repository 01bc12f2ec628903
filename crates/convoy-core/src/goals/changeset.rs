//! Changeset lifecycle goals

use crate::bundle::ChangesetBundle;
use crate::goals::{GoalOptions, GoalOutcome};
use crate::id::{ChangesetId, validate_trunk_name};
use crate::pipe::Admission;
use crate::state::{
    AliasFile, ChangesetFile, ChangesetStatus, HOTFIX_ALIAS, PRODUCTION_ALIAS, RELEASED_ALIAS,
};
use crate::{Error, Result};

pub(super) fn admission_note(admission: Admission) -> &'static str {
    match admission {
        Admission::TrunkLocal => "release pipe: not consulted (trunk-local)",
        Admission::Open => "release pipe: open",
        Admission::SkippedDryRun => "release pipe: moderated, approval skipped in dry run",
        Admission::Approved => "release pipe: approved",
    }
}

fn changeset_path(bundle: &ChangesetBundle<'_>, id: &ChangesetId) -> String {
    bundle.layout().changeset(&id.bundle_name, &id.tracking_id)
}

pub(super) fn start(bundle: &mut ChangesetBundle<'_>, options: &GoalOptions) -> Result<GoalOutcome> {
    let id = options.require_changeset_id()?;
    let (repo, layout) = (bundle.repo(), bundle.layout());
    let config = bundle.config()?;
    let trunk = options
        .trunk
        .clone()
        .unwrap_or_else(|| config.default_trunk.clone());
    validate_trunk_name(&trunk)?;
    if !bundle.trunk_is_active(&trunk)? {
        return Err(Error::build(format!(
            "Trunk '{trunk}' of bundle '{}' is not active",
            bundle.name()
        )));
    }
    let path = changeset_path(bundle, id);

    match ChangesetFile::load(repo, layout, id)? {
        Some(mut existing) if existing.status == ChangesetStatus::Abandoned => {
            existing.set_status(ChangesetStatus::Dev)?;
            existing.trunk = Some(trunk);
            if let Some(summary) = &options.summary {
                existing.summary = summary.clone();
            }
            existing.save(repo, layout, id)?;
            Ok(GoalOutcome::new(format!("Reopened {id}")).touch(path))
        }
        Some(existing) if existing.status == ChangesetStatus::Dev && bundle.context().resume => {
            Ok(GoalOutcome::unchanged(format!("Started {id}")))
        }
        Some(existing) => Err(Error::build(format!(
            "Changeset {id} already exists with status {}",
            existing.status
        ))),
        None => {
            let projects: Vec<&str> = if options.projects.is_empty() {
                config.changeset_projects()
            } else {
                for project in &options.projects {
                    if config.project(project)?.support {
                        return Err(Error::build(format!(
                            "Project '{project}' is a support project and cannot carry a changeset"
                        )));
                    }
                }
                options.projects.iter().map(String::as_str).collect()
            };
            if projects.is_empty() {
                return Err(Error::build(format!(
                    "Bundle '{}' has no projects for {id}",
                    bundle.name()
                )));
            }
            let summary = options.summary.clone().unwrap_or_default();
            let changeset = ChangesetFile::new(id, &trunk, summary, projects.iter().copied());
            changeset.save(repo, layout, id)?;
            Ok(GoalOutcome::new(format!("Started {id} on {trunk}"))
                .line(format!("projects: {}", projects.join(", ")))
                .touch(path))
        }
    }
}

pub(super) fn promote(bundle: &mut ChangesetBundle<'_>, options: &GoalOptions) -> Result<GoalOutcome> {
    let ctx = bundle.context();
    let id = options.require_changeset_id()?;
    let (repo, layout) = (bundle.repo(), bundle.layout());
    let mut changeset = ChangesetFile::require(repo, layout, id)?;
    let trunk = changeset.trunk_or(bundle.default_trunk()?).to_string();
    let candidate_path = layout.candidate_alias(&id.bundle_name, &trunk);
    let candidate = AliasFile::load(repo, &candidate_path)?;

    if changeset.status == ChangesetStatus::Rc
        && ctx.resume
        && candidate.as_ref().is_some_and(|c| c.points_at(&id.tracking_id))
    {
        return Ok(GoalOutcome::unchanged(format!("Promoted {id} to RC on {trunk}")));
    }
    changeset.status.transition(ChangesetStatus::Rc)?;
    if let Some(other) = candidate.filter(|c| !c.points_at(&id.tracking_id)) {
        return Err(Error::build(format!(
            "Trunk '{trunk}' of bundle '{}' already has release candidate {}",
            bundle.name(),
            other.changeset
        )));
    }
    if !bundle.trunk_is_active(&trunk)? {
        return Err(Error::build(format!("Trunk '{trunk}' is not active")));
    }

    let summary = vec![
        format!("~ {id} status: {} -> RC", changeset.status),
        format!("+ {candidate_path}"),
    ];
    let admission = bundle.ensure_pipe_is_open(&changeset, &format!("promote {id}"), &summary)?;
    let report = bundle
        .check_projects(id, &changeset, &options.include)?
        .ensure_success()?;
    ctx.check_cancelled()?;

    changeset.set_status(ChangesetStatus::Rc)?;
    changeset.save(repo, layout, id)?;
    AliasFile::new(&id.tracking_id, ChangesetStatus::Rc, Some(trunk.clone()))
        .save(repo, &candidate_path)?;

    tracing::info!(changeset = %id, trunk = %trunk, "Promoted to release candidate");
    Ok(GoalOutcome::new(format!("Promoted {id} to RC on {trunk}"))
        .line(admission_note(admission))
        .line(format!("{} project(s) checked", report.per_project.len()))
        .touch(changeset_path(bundle, id))
        .touch(candidate_path))
}

pub(super) fn abandon(bundle: &mut ChangesetBundle<'_>, options: &GoalOptions) -> Result<GoalOutcome> {
    let id = options.require_changeset_id()?;
    let (repo, layout) = (bundle.repo(), bundle.layout());
    let mut changeset = ChangesetFile::require(repo, layout, id)?;
    let path = changeset_path(bundle, id);

    match changeset.status {
        ChangesetStatus::Rc => {
            let trunk = changeset.trunk_or(bundle.default_trunk()?).to_string();
            changeset.set_status(ChangesetStatus::Dev)?;
            changeset.save(repo, layout, id)?;
            let mut outcome = GoalOutcome::new(format!("Reverted {id} to DEV")).touch(path);
            let candidate_path = layout.candidate_alias(&id.bundle_name, &trunk);
            if AliasFile::remove_if_points_at(repo, &candidate_path, &id.tracking_id)? {
                outcome = outcome.touch(candidate_path);
            }
            Ok(outcome)
        }
        ChangesetStatus::Abandoned if bundle.context().resume => {
            Ok(GoalOutcome::unchanged(format!("Abandoned {id}")))
        }
        _ => {
            changeset.set_status(ChangesetStatus::Abandoned)?;
            changeset.save(repo, layout, id)?;
            Ok(GoalOutcome::new(format!("Abandoned {id}")).touch(path))
        }
    }
}

/// Move `changeset` to RELEASED and rewrite the aliases that track releases.
///
/// The candidate (or, for a hotfix, the HOTFIX alias) is dropped if it points
/// at the changeset. The trunk's stable alias always follows the release;
/// RELEASED, and PRODUCTION when `production` is set, only follow releases
/// on the default trunk. Returns the files written.
pub(super) fn release(
    bundle: &ChangesetBundle<'_>,
    id: &ChangesetId,
    changeset: &mut ChangesetFile,
    production: bool,
) -> Result<Vec<String>> {
    let (repo, layout) = (bundle.repo(), bundle.layout());
    let default_trunk = bundle.default_trunk()?;
    let trunk = changeset.trunk_or(default_trunk).to_string();
    let from = changeset.status;

    changeset.set_status(ChangesetStatus::Released)?;
    changeset.save(repo, layout, id)?;
    let mut touched = vec![changeset_path(bundle, id)];

    let pending = if from == ChangesetStatus::Hotfix {
        layout.alias(&id.bundle_name, HOTFIX_ALIAS)
    } else {
        layout.candidate_alias(&id.bundle_name, &trunk)
    };
    if AliasFile::remove_if_points_at(repo, &pending, &id.tracking_id)? {
        touched.push(pending);
    }

    let mut aliases = vec![layout.alias(&id.bundle_name, &trunk)];
    if trunk == default_trunk {
        aliases.push(layout.alias(&id.bundle_name, RELEASED_ALIAS));
        if production {
            aliases.push(layout.alias(&id.bundle_name, PRODUCTION_ALIAS));
        }
    }
    let alias = AliasFile::new(&id.tracking_id, ChangesetStatus::Released, Some(trunk));
    for path in aliases {
        alias.save(repo, &path)?;
        touched.push(path);
    }
    tracing::info!(changeset = %id, from = %from, production, "Released changeset");
    Ok(touched)
}

pub(super) fn ship(bundle: &mut ChangesetBundle<'_>, options: &GoalOptions) -> Result<GoalOutcome> {
    let ctx = bundle.context();
    let id = options.require_changeset_id()?;
    let (repo, layout) = (bundle.repo(), bundle.layout());
    let mut changeset = ChangesetFile::require(repo, layout, id)?;

    if changeset.status == ChangesetStatus::Released && ctx.resume {
        return Ok(GoalOutcome::unchanged(format!("Shipped {id}")));
    }
    changeset.status.transition(ChangesetStatus::Released)?;

    let summary = vec![format!("~ {id} status: {} -> RELEASED", changeset.status)];
    let admission = bundle.ensure_pipe_is_open(&changeset, &format!("ship {id}"), &summary)?;
    bundle
        .check_projects(id, &changeset, &options.include)?
        .ensure_success()?;
    ctx.check_cancelled()?;

    let touched = release(bundle, id, &mut changeset, false)?;
    Ok(GoalOutcome {
        headline: format!("Shipped {id}"),
        report: vec![admission_note(admission).to_string()],
        touched,
        unchanged: false,
    })
}

pub(super) fn hotfix(bundle: &mut ChangesetBundle<'_>, options: &GoalOptions) -> Result<GoalOutcome> {
    let id = options.require_changeset_id()?;
    let (repo, layout) = (bundle.repo(), bundle.layout());
    let mut changeset = ChangesetFile::require(repo, layout, id)?;
    let hotfix_path = layout.alias(&id.bundle_name, HOTFIX_ALIAS);
    let current = AliasFile::load(repo, &hotfix_path)?;

    if changeset.status == ChangesetStatus::Hotfix
        && bundle.context().resume
        && current.as_ref().is_some_and(|a| a.points_at(&id.tracking_id))
    {
        return Ok(GoalOutcome::unchanged(format!("Hotfixing {id}")));
    }
    changeset.status.transition(ChangesetStatus::Hotfix)?;
    if let Some(other) = current.filter(|a| !a.points_at(&id.tracking_id)) {
        return Err(Error::build(format!(
            "Hotfix {} is already in progress for bundle '{}'",
            other.changeset,
            bundle.name()
        )));
    }

    let candidates: Vec<&str> = match &options.alias_id {
        Some(alias) => vec![alias.alias.as_str()],
        None => vec![PRODUCTION_ALIAS, RELEASED_ALIAS],
    };
    let mut baseline = None;
    for name in &candidates {
        let path = layout.alias(&id.bundle_name, name);
        if let Some((_, file)) = ChangesetFile::load_from_alias(repo, layout, &id.bundle_name, &path)? {
            baseline = Some((*name, file));
            break;
        }
    }
    let Some((baseline_alias, baseline)) = baseline else {
        return Err(Error::build(format!(
            "Bundle '{}' has no {} changeset to hotfix",
            bundle.name(),
            candidates.join(" or ")
        )));
    };

    let mut outcome = GoalOutcome::new(format!("Hotfixing {id}"));
    if changeset.status == ChangesetStatus::Rc {
        let trunk = changeset.trunk_or(bundle.default_trunk()?).to_string();
        let candidate_path = layout.candidate_alias(&id.bundle_name, &trunk);
        if AliasFile::remove_if_points_at(repo, &candidate_path, &id.tracking_id)? {
            outcome = outcome.touch(candidate_path);
        }
    }
    changeset.base = baseline.pins();
    changeset.set_status(ChangesetStatus::Hotfix)?;
    changeset.save(repo, layout, id)?;
    AliasFile::new(&id.tracking_id, ChangesetStatus::Hotfix, changeset.trunk.clone())
        .save(repo, &hotfix_path)?;

    Ok(outcome
        .line(format!("baseline: {baseline_alias} ({})", baseline.id))
        .touch(changeset_path(bundle, id))
        .touch(hotfix_path))
}

pub(super) fn show(bundle: &mut ChangesetBundle<'_>, options: &GoalOptions) -> Result<GoalOutcome> {
    let id = options.require_changeset_id()?;
    let (repo, layout) = (bundle.repo(), bundle.layout());
    let changeset = ChangesetFile::require(repo, layout, id)?;
    let path = changeset_path(bundle, id);

    let mut outcome = GoalOutcome::new(id.to_string())
        .line(format!("status: {}", changeset.status))
        .line(format!(
            "trunk: {}",
            changeset.trunk.as_deref().unwrap_or("(default)")
        ));
    if !changeset.summary.is_empty() {
        outcome = outcome.line(format!("summary: {}", changeset.summary));
    }
    for (project, pin) in &changeset.projects {
        outcome = match &pin.version {
            Some(version) => outcome.line(format!("project {project}: {} @ {version}", pin.branch)),
            None => outcome.line(format!("project {project}: {}", pin.branch)),
        };
    }
    for (project, version) in &changeset.base {
        outcome = outcome.line(format!("base {project}: {version}"));
    }

    let mut aliases = Vec::new();
    for name in [RELEASED_ALIAS, PRODUCTION_ALIAS, HOTFIX_ALIAS] {
        if AliasFile::load(repo, &layout.alias(&id.bundle_name, name))?
            .is_some_and(|a| a.points_at(&id.tracking_id))
        {
            aliases.push(name.to_string());
        }
    }
    for trunk in bundle.get_trunk_aliases() {
        if trunk.stable.is_some_and(|a| a.points_at(&id.tracking_id)) {
            aliases.push(trunk.trunk.clone());
        }
        if trunk.candidate.is_some_and(|a| a.points_at(&id.tracking_id)) {
            aliases.push(format!("{} (candidate)", trunk.trunk));
        }
    }
    if !aliases.is_empty() {
        outcome = outcome.line(format!("aliases: {}", aliases.join(", ")));
    }
    if let Some(url) = repo.browse_url(&path) {
        outcome = outcome.line(url);
    }
    Ok(outcome)
}
