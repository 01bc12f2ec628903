//! Shipment goals

use crate::bundle::ShipmentBundle;
use crate::goals::changeset::{admission_note, release};
use crate::goals::{GoalOptions, GoalOutcome};
use crate::id::ChangesetId;
use crate::state::{ChangesetFile, ChangesetStatus, ShipmentEntry, ShipmentFile, ShipmentStatus};
use crate::{Error, Result};

pub(super) fn create(bundle: &mut ShipmentBundle<'_>, options: &GoalOptions) -> Result<GoalOutcome> {
    let id = options.require_shipment_id()?;
    let (repo, layout) = (bundle.repo(), bundle.layout());

    if let Some(existing) = bundle.load_file()? {
        if existing.status == ShipmentStatus::Pending && bundle.context().resume {
            return Ok(GoalOutcome::unchanged(format!("Created shipment {id}")));
        }
        return Err(Error::build(format!(
            "Shipment {id} already exists with status {}",
            existing.status
        )));
    }

    let names = if options.bundles.is_empty() {
        vec![id.bundle_name.clone()]
    } else {
        options.bundles.clone()
    };
    bundle.add_members(&names)?;

    let mut file = ShipmentFile::new(&id.version);
    let mut outcome = GoalOutcome::new(format!("Created shipment {id}"));
    for name in bundle.member_names() {
        let member = bundle.member(&name)?;
        let default_trunk = member.default_trunk()?.to_string();
        let candidate_path = layout.candidate_alias(&name, &default_trunk);
        let (alias, changeset) =
            ChangesetFile::load_from_alias(repo, layout, &name, &candidate_path)?.ok_or_else(
                || {
                    Error::build(format!(
                        "Bundle '{name}' has no release candidate on trunk '{default_trunk}'"
                    ))
                },
            )?;
        if changeset.status != ChangesetStatus::Rc {
            return Err(Error::build(format!(
                "Candidate {} of bundle '{name}' is {}, expected RC",
                changeset.id, changeset.status
            )));
        }

        for (project, pin) in changeset.pins() {
            if let Some(other) = file.base.get(&project)
                && *other != pin
            {
                return Err(Error::build(format!(
                    "Project '{project}' is pinned to both {other} and {pin}"
                )));
            }
            file.base.insert(project, pin);
        }
        let trunks = member
            .get_trunk_aliases()
            .into_iter()
            .filter(|t| t.active)
            .map(|t| t.trunk)
            .collect();
        let support_projects = member
            .config()?
            .support_projects()
            .into_iter()
            .map(String::from)
            .collect();
        outcome = outcome.line(format!("{name}: {}", changeset.id));
        file.bundles.insert(
            name,
            ShipmentEntry {
                changeset: Some(alias.changeset),
                trunks,
                support_projects,
            },
        );
    }

    let path = bundle.save_file(&file)?;
    Ok(outcome.touch(path))
}

pub(super) fn ship(bundle: &mut ShipmentBundle<'_>, options: &GoalOptions) -> Result<GoalOutcome> {
    let id = options.require_shipment_id()?;
    let ctx = bundle.context();
    let (repo, layout) = (bundle.repo(), bundle.layout());

    let file = bundle.require_file()?;
    if file.status == ShipmentStatus::Shipped && ctx.resume {
        return Ok(GoalOutcome::unchanged(format!("Shipped {id}")));
    }
    file.status.transition(ShipmentStatus::Shipped)?;
    bundle.add_members(&file.bundle_names())?;
    // Members are read under their locks from a fresh working copy.
    let mut file = bundle.require_file()?;

    let mut outcome = GoalOutcome::new(format!("Shipped {id}"));
    let mut planned = Vec::new();
    for (name, entry) in &file.bundles {
        let tracking = entry.changeset.as_deref().ok_or_else(|| {
            Error::build(format!("Shipment {id} names no changeset for bundle '{name}'"))
        })?;
        let changeset_id: ChangesetId = format!("{name}:{tracking}").parse()?;
        let changeset = ChangesetFile::require(repo, layout, &changeset_id)?;
        changeset.status.transition(ChangesetStatus::Released)?;

        let member = bundle.member(name)?;
        let summary = vec![format!(
            "~ {changeset_id} status: {} -> RELEASED",
            changeset.status
        )];
        let admission =
            member.ensure_pipe_is_open(&changeset, &format!("ship {id}"), &summary)?;
        let include: Vec<String> = options
            .include
            .iter()
            .filter(|p| changeset.projects.contains_key(*p))
            .cloned()
            .collect();
        if options.include.is_empty() || !include.is_empty() {
            member
                .check_projects(&changeset_id, &changeset, &include)?
                .ensure_success()?;
        }
        outcome = outcome.line(format!("{name}: {changeset_id} ({})", admission_note(admission)));
        planned.push((name.clone(), changeset_id, changeset));
    }
    ctx.check_cancelled()?;

    for (name, changeset_id, mut changeset) in planned {
        let member = bundle.member(&name)?;
        outcome.touched.extend(release(member, &changeset_id, &mut changeset, true)?);
    }
    file.set_status(ShipmentStatus::Shipped)?;
    let path = bundle.save_file(&file)?;
    Ok(outcome.touch(path))
}
