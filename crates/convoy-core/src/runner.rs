//! Goal execution
//!
//! Every goal runs the same frame: lock the scope, reset the working copy,
//! load configuration, run the handler, then commit and push. Any failure
//! after the lock was taken hard-resets the working copy, so the remote and
//! the checkout are left exactly as they were; the lock is released on every
//! path.

use convoy_git::ConfigRepository;

use crate::bundle::{ChangesetBundle, GoalScope, ShipmentBundle};
use crate::context::Context;
use crate::goals::{GoalOptions, GoalOutcome, Handler};
use crate::notify::{Notification, notify_best_effort};
use crate::Result;

/// Validate `options` for the context's goal and run it.
pub fn run_goal<'a>(
    ctx: &'a Context<'a>,
    repo: &'a ConfigRepository,
    options: &GoalOptions,
) -> Result<GoalOutcome> {
    let spec = ctx.goal.spec();
    spec.check_arguments(ctx.goal, options)?;
    spec.check_settings(ctx.settings)?;
    let bundle_name = options.bundle_name()?;

    match spec.handler {
        Handler::Changeset(handler) => {
            let mut bundle = ChangesetBundle::new(ctx, repo, bundle_name);
            drive(ctx, repo, &mut bundle, |bundle| handler(bundle, options))
        }
        Handler::Shipment(handler) => {
            let id = options.require_shipment_id()?.clone();
            let mut shipment = ShipmentBundle::new(ctx, repo, id);
            drive(ctx, repo, &mut shipment, |shipment| handler(shipment, options))
        }
    }
}

fn drive<S, F>(
    ctx: &Context<'_>,
    repo: &ConfigRepository,
    scope: &mut S,
    body: F,
) -> Result<GoalOutcome>
where
    S: GoalScope,
    F: FnOnce(&mut S) -> Result<GoalOutcome>,
{
    let label = scope.label();
    tracing::info!(goal = %ctx.goal, scope = %label, dry_run = ctx.dry_run, "Running goal");

    let result = attempt(ctx, repo, scope, body);
    let channel = scope.channel();

    // Only roll back a working copy this invocation owns.
    if scope.is_locked()
        && (result.is_err() || !ctx.commits())
        && let Err(e) = repo.reset()
    {
        tracing::warn!(error = %e, "Could not roll back working copy");
    }
    scope.unlock();

    match &result {
        Ok(outcome) if ctx.commits() && (!outcome.unchanged || ctx.resume) => {
            let mut notification = Notification::new(channel, outcome.headline.clone())
                .field("goal", ctx.goal.as_str());
            for path in &outcome.touched {
                if let Some(url) = repo.browse_url(path) {
                    notification = notification.field(path.clone(), url);
                }
            }
            notify_best_effort(ctx.notifier, &notification);
        }
        Ok(outcome) => {
            tracing::debug!(goal = %ctx.goal, unchanged = outcome.unchanged, "Nothing to announce");
        }
        Err(e) if ctx.commits() => {
            tracing::debug!(goal = %ctx.goal, error = %e, "Goal failed");
            let notification =
                Notification::new(channel, format!("{} failed for {label}: {e}", ctx.goal))
                    .field("goal", ctx.goal.as_str());
            notify_best_effort(ctx.notifier, &notification);
        }
        Err(_) => {}
    }
    result
}

fn attempt<S, F>(
    ctx: &Context<'_>,
    repo: &ConfigRepository,
    scope: &mut S,
    body: F,
) -> Result<GoalOutcome>
where
    S: GoalScope,
    F: FnOnce(&mut S) -> Result<GoalOutcome>,
{
    scope.lock()?;
    ctx.check_cancelled()?;
    repo.reset()?;
    scope.load()?;

    let mut outcome = body(scope)?;
    ctx.check_cancelled()?;

    if ctx.commits() && !outcome.unchanged {
        if repo.check_in(&commit_message(ctx, &outcome))? {
            repo.push()?;
        } else {
            outcome.unchanged = true;
        }
    }
    Ok(outcome)
}

fn commit_message(ctx: &Context<'_>, outcome: &GoalOutcome) -> String {
    let mut message = format!("{}\n\nGoal: {}\n", outcome.headline, ctx.goal);
    for line in &outcome.report {
        message.push_str(&format!("\n{line}"));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goals::GoalName;
    use crate::notify::MemoryNotifier;
    use crate::pipe::ScriptedApproval;
    use crate::settings::Settings;
    use convoy_test_utils::git::{commit_count, seeded_remote};
    use tempfile::TempDir;

    const BUNDLE: &str = "name: svc\nprojects: {}\n";

    fn settings(remote: &TempDir, work: &TempDir) -> Settings {
        let mut settings = Settings::default();
        settings.repository.url = remote.path().to_str().unwrap().to_string();
        settings.repository.checkout_dir = Some(work.path().join("metadata"));
        settings.execution.lock_dir = Some(work.path().join("locks"));
        settings.execution.work_dir = Some(work.path().join("work"));
        settings
    }

    #[test]
    fn arguments_are_checked_before_locking() {
        let remote = seeded_remote(&[("bundles/svc/bundle.yaml", BUNDLE)]);
        let work = TempDir::new().unwrap();
        let settings = settings(&remote, &work);
        let repo = ConfigRepository::open_or_clone(
            &settings.repository.url,
            "master",
            &settings.checkout_dir(),
        )
        .unwrap();
        let notifier = MemoryNotifier::new();
        let approval = ScriptedApproval::new(Vec::<String>::new());
        let ctx = Context::new(&settings, GoalName::ChangesetPromote, &notifier, &approval);

        let err = run_goal(&ctx, &repo, &GoalOptions::default()).unwrap_err();
        assert!(err.to_string().contains("--changeset-id"));
        assert!(!work.path().join("locks").join("svc.pid").exists());
        assert!(notifier.sent().is_empty());
    }

    #[test]
    fn failing_goal_notifies_and_leaves_remote_unchanged() {
        let remote = seeded_remote(&[("bundles/svc/bundle.yaml", BUNDLE)]);
        let work = TempDir::new().unwrap();
        let settings = settings(&remote, &work);
        let repo = ConfigRepository::open_or_clone(
            &settings.repository.url,
            "master",
            &settings.checkout_dir(),
        )
        .unwrap();
        let notifier = MemoryNotifier::new();
        let approval = ScriptedApproval::new(Vec::<String>::new());
        let ctx = Context::new(&settings, GoalName::ChangesetPromote, &notifier, &approval);
        let options = GoalOptions {
            changeset_id: Some("svc:VCTRS-1".parse().unwrap()),
            ..GoalOptions::default()
        };

        let before = commit_count(remote.path(), "master");
        let err = run_goal(&ctx, &repo, &options).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
        assert_eq!(commit_count(remote.path(), "master"), before);

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].text.starts_with("changeset-promote failed for svc"));
    }

    #[test]
    fn constraint_change_is_committed_once() {
        let remote = seeded_remote(&[("bundles/svc/bundle.yaml", BUNDLE)]);
        let work = TempDir::new().unwrap();
        let settings = settings(&remote, &work);
        let repo = ConfigRepository::open_or_clone(
            &settings.repository.url,
            "master",
            &settings.checkout_dir(),
        )
        .unwrap();
        let notifier = MemoryNotifier::new();
        let approval = ScriptedApproval::new(Vec::<String>::new());
        let ctx = Context::new(&settings, GoalName::SetConstraint, &notifier, &approval);
        let options = GoalOptions {
            bundle: Some("svc".into()),
            constraint: Some(crate::pipe::ReleaseConstraint::Blocked),
            ..GoalOptions::default()
        };

        let before = commit_count(remote.path(), "master");
        let outcome = run_goal(&ctx, &repo, &options).unwrap();
        assert!(!outcome.unchanged);
        assert_eq!(commit_count(remote.path(), "master"), before + 1);

        let again = run_goal(&ctx, &repo, &options).unwrap();
        assert!(again.unchanged);
        assert_eq!(commit_count(remote.path(), "master"), before + 1);
        assert_eq!(notifier.sent().len(), 1);
    }

    #[test]
    fn dry_run_discards_changes() {
        let remote = seeded_remote(&[("bundles/svc/bundle.yaml", BUNDLE)]);
        let work = TempDir::new().unwrap();
        let settings = settings(&remote, &work);
        let repo = ConfigRepository::open_or_clone(
            &settings.repository.url,
            "master",
            &settings.checkout_dir(),
        )
        .unwrap();
        let notifier = MemoryNotifier::new();
        let approval = ScriptedApproval::new(Vec::<String>::new());
        let ctx = Context::new(&settings, GoalName::SetConstraint, &notifier, &approval)
            .with_dry_run(true);
        let options = GoalOptions {
            bundle: Some("svc".into()),
            constraint: Some(crate::pipe::ReleaseConstraint::Blocked),
            dry_run: true,
            ..GoalOptions::default()
        };

        let before = commit_count(remote.path(), "master");
        run_goal(&ctx, &repo, &options).unwrap();
        assert_eq!(commit_count(remote.path(), "master"), before);
        let content = repo.read_file("bundles/svc/bundle.yaml").unwrap().unwrap();
        assert!(!content.contains("BLOCKED"));
        assert!(notifier.sent().is_empty());
    }
}
