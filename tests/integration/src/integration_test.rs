//! End-to-end integration test for the vertical slice
//!
//! This test exercises the complete flow: settings file -> metadata checkout
//! -> goal run -> pushed state.

use std::fs;

use convoy_core::notify::MemoryNotifier;
use convoy_core::pipe::ScriptedApproval;
use convoy_core::{Context, GoalName, GoalOptions, Settings, run_goal};
use convoy_git::ConfigRepository;
use convoy_test_utils::git::{DEFAULT_BRANCH, commit_count, read_remote_file, seeded_remote};
use tempfile::TempDir;

/// Write a settings file pointing at `remote` and load it back.
fn load_settings(work: &TempDir, remote: &TempDir) -> Settings {
    let path = work.path().join("convoy.toml");
    fs::write(
        &path,
        format!(
            r#"
[repository]
url = "{remote}"
checkout_dir = "{work}/metadata"

[execution]
lock_dir = "{work}/locks"
work_dir = "{work}/work"
max_fork_count = 2
"#,
            remote = remote.path().display(),
            work = work.path().display(),
        ),
    )
    .unwrap();

    let settings = Settings::load(&path).unwrap();
    settings.validate().unwrap();
    settings
}

fn trunk_options(trunk: &str) -> GoalOptions {
    GoalOptions {
        bundle: Some("svc".into()),
        trunk: Some(trunk.into()),
        ..GoalOptions::default()
    }
}

#[test]
fn test_settings_drive_goal_against_remote() {
    let remote = seeded_remote(&[("bundles/svc/bundle.yaml", "name: svc\nprojects: {}\n")]);
    let work = TempDir::new().unwrap();
    let settings = load_settings(&work, &remote);
    assert_eq!(settings.execution.max_fork_count, Some(2));

    let repo = ConfigRepository::open_or_clone(
        &settings.repository.url,
        &settings.repository.branch,
        &settings.checkout_dir(),
    )
    .unwrap();
    let notifier = MemoryNotifier::new();
    let approval = ScriptedApproval::new(Vec::<String>::new());
    let before = commit_count(remote.path(), DEFAULT_BRANCH);

    // Create a trunk: one commit, one notification
    let options = trunk_options("release-2024");
    let ctx = Context::new(&settings, GoalName::TrunkCreate, &notifier, &approval)
        .with_options(&options);
    let outcome = run_goal(&ctx, &repo, &options).unwrap();
    assert_eq!(outcome.headline, "Created trunk release-2024 of svc");
    assert_eq!(commit_count(remote.path(), DEFAULT_BRANCH), before + 1);
    let trunk = read_remote_file(remote.path(), DEFAULT_BRANCH, "bundles/svc/trunks/release-2024.yaml");
    assert!(trunk.is_some());
    assert_eq!(notifier.sent().len(), 1);

    // Listing is read-only: no commit, no notification
    let options = GoalOptions {
        bundle: Some("svc".into()),
        ..GoalOptions::default()
    };
    let ctx = Context::new(&settings, GoalName::TrunkList, &notifier, &approval)
        .with_options(&options);
    let outcome = run_goal(&ctx, &repo, &options).unwrap();
    assert!(outcome.report.iter().any(|line| line.starts_with("release-2024")));
    assert_eq!(commit_count(remote.path(), DEFAULT_BRANCH), before + 1);
    assert_eq!(notifier.sent().len(), 1);
}

#[test]
fn test_second_checkout_sees_pushed_state() {
    let remote = seeded_remote(&[("bundles/svc/bundle.yaml", "name: svc\nprojects: {}\n")]);
    let (first, second) = (TempDir::new().unwrap(), TempDir::new().unwrap());
    let notifier = MemoryNotifier::new();
    let approval = ScriptedApproval::new(Vec::<String>::new());

    let settings = load_settings(&first, &remote);
    let repo = ConfigRepository::open_or_clone(
        &settings.repository.url,
        &settings.repository.branch,
        &settings.checkout_dir(),
    )
    .unwrap();
    let options = trunk_options("next");
    let ctx = Context::new(&settings, GoalName::TrunkCreate, &notifier, &approval)
        .with_options(&options);
    run_goal(&ctx, &repo, &options).unwrap();

    // Another machine with its own checkout refuses to create it again
    let other = load_settings(&second, &remote);
    let other_repo = ConfigRepository::open_or_clone(
        &other.repository.url,
        &other.repository.branch,
        &other.checkout_dir(),
    )
    .unwrap();
    let ctx = Context::new(&other, GoalName::TrunkCreate, &notifier, &approval)
        .with_options(&options);
    let err = run_goal(&ctx, &other_repo, &options).unwrap_err();
    assert!(err.to_string().contains("already exists"));
}
