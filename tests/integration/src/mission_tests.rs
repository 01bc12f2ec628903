//! Release missions across the convoy crates
//!
//! Each module walks one end-to-end scenario against real bare remotes:
//! a metadata repository holding bundle state and a project repository
//! holding changeset branches.

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use convoy_core::lock::marker_ref;
use convoy_core::notify::MemoryNotifier;
use convoy_core::pipe::ScriptedApproval;
use convoy_core::state::{AliasFile, ChangesetFile, ChangesetStatus};
use convoy_core::{
    BundleLock, CancelToken, Context, Error, GoalName, GoalOptions, GoalOutcome, HeldLocks, Result,
    Settings, run_goal,
};
use convoy_git::ConfigRepository;
use convoy_test_utils::git::{
    DEFAULT_BRANCH, add_branch, commit_count, project_remote, read_remote_file, remote_refs,
    seeded_remote, tip,
};
use tempfile::TempDir;

const CANDIDATE: &str = "bundles/svc/candidates/master.yaml";

/// A metadata remote with bundle `svc`, one project `api`, and scratch dirs.
struct Mission {
    remote: TempDir,
    project: TempDir,
    _work: TempDir,
    settings: Settings,
    notifier: MemoryNotifier,
}

impl Mission {
    fn new(constraint: &str, branches: &[&str]) -> Self {
        Self::with_extra(constraint, branches, "")
    }

    fn with_extra(constraint: &str, branches: &[&str], extra: &str) -> Self {
        let project = project_remote(branches);
        let yaml = format!(
            "name: svc\nconstraint: {constraint}\nprojects:\n  api:\n    url: {}\n{extra}",
            project.path().display()
        );
        let remote = seeded_remote(&[("bundles/svc/bundle.yaml", &yaml)]);
        let work = TempDir::new().unwrap();

        let mut settings = Settings::default();
        settings.repository.url = remote.path().to_str().unwrap().to_string();
        settings.repository.checkout_dir = Some(work.path().join("metadata"));
        settings.execution.lock_dir = Some(work.path().join("locks"));
        settings.execution.work_dir = Some(work.path().join("work"));

        Self {
            remote,
            project,
            _work: work,
            settings,
            notifier: MemoryNotifier::new(),
        }
    }

    fn repo(&self) -> ConfigRepository {
        ConfigRepository::open_or_clone(
            &self.settings.repository.url,
            DEFAULT_BRANCH,
            &self.settings.checkout_dir(),
        )
        .unwrap()
    }

    fn run_cancellable(
        &self,
        goal: GoalName,
        options: GoalOptions,
        cancel: CancelToken,
    ) -> Result<GoalOutcome> {
        self.run_tracked(goal, options, cancel, HeldLocks::new())
    }

    fn run_tracked(
        &self,
        goal: GoalName,
        options: GoalOptions,
        cancel: CancelToken,
        held: HeldLocks,
    ) -> Result<GoalOutcome> {
        let repo = self.repo();
        let approval = ScriptedApproval::new(Vec::<String>::new());
        let ctx = Context::new(&self.settings, goal, &self.notifier, &approval)
            .with_options(&options)
            .with_cancel(cancel)
            .with_held_locks(held);
        run_goal(&ctx, &repo, &options)
    }

    fn run(&self, goal: GoalName, options: GoalOptions) -> Result<GoalOutcome> {
        self.run_cancellable(goal, options, CancelToken::new())
    }

    fn commits(&self) -> usize {
        commit_count(self.remote.path(), DEFAULT_BRANCH)
    }

    fn status(&self, tracking_id: &str) -> ChangesetStatus {
        let path = format!("bundles/svc/changesets/{tracking_id}.yaml");
        let content = read_remote_file(self.remote.path(), DEFAULT_BRANCH, &path).unwrap();
        serde_yaml::from_str::<ChangesetFile>(&content).unwrap().status
    }

    fn candidate(&self) -> Option<AliasFile> {
        read_remote_file(self.remote.path(), DEFAULT_BRANCH, CANDIDATE)
            .map(|c| serde_yaml::from_str(&c).unwrap())
    }
}

/// Block until `path` exists; the check command creates it once running.
fn wait_for(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(60);
    while !path.exists() {
        assert!(Instant::now() < deadline, "check command never started");
        thread::sleep(Duration::from_millis(20));
    }
}

/// A mission whose check command signals `started` and then hangs.
fn hanging_check(flags: &TempDir, id: &str) -> Mission {
    let started = flags.path().join("started");
    let branch = format!("changeset/{id}");
    Mission::with_extra(
        "NONE",
        &[branch.as_str()],
        &format!("check_command: [sh, -c, 'touch {}; exec sleep 30']\n", started.display()),
    )
}

fn changeset(id: &str) -> GoalOptions {
    GoalOptions {
        changeset_id: Some(id.parse().unwrap()),
        ..GoalOptions::default()
    }
}

mod m1_promote {
    use super::*;

    #[test]
    fn m1_1_open_bundle_promotes_in_one_commit() {
        let m = Mission::new("NONE", &["changeset/VCTRS-1234"]);
        m.run(GoalName::ChangesetStart, changeset("svc:VCTRS-1234")).unwrap();
        let before = m.commits();

        m.run(GoalName::ChangesetPromote, changeset("svc:VCTRS-1234")).unwrap();

        assert_eq!(m.status("VCTRS-1234"), ChangesetStatus::Rc);
        assert_eq!(m.candidate().unwrap().changeset, "VCTRS-1234");
        assert_eq!(m.commits(), before + 1);
        assert!(remote_refs(m.remote.path(), "refs/convoy").is_empty());
    }

    #[test]
    fn m1_2_promote_then_ship_releases() {
        let m = Mission::new("NONE", &["changeset/VCTRS-7"]);
        m.run(GoalName::ChangesetStart, changeset("svc:VCTRS-7")).unwrap();
        m.run(GoalName::ChangesetPromote, changeset("svc:VCTRS-7")).unwrap();
        m.run(GoalName::ChangesetShip, changeset("svc:VCTRS-7")).unwrap();

        assert_eq!(m.status("VCTRS-7"), ChangesetStatus::Released);
        assert!(m.candidate().is_none());
        let released =
            read_remote_file(m.remote.path(), DEFAULT_BRANCH, "bundles/svc/aliases/RELEASED.yaml");
        assert!(released.unwrap().contains("VCTRS-7"));
    }
}

mod m2_guards {
    use super::*;

    #[test]
    fn m2_1_blocked_bundle_leaves_remote_untouched() {
        let m = Mission::new("BLOCKED", &["changeset/VCTRS-1234"]);
        m.run(GoalName::ChangesetStart, changeset("svc:VCTRS-1234")).unwrap();
        let head = tip(m.remote.path(), DEFAULT_BRANCH);

        let err = m
            .run(GoalName::ChangesetPromote, changeset("svc:VCTRS-1234"))
            .unwrap_err();

        assert!(matches!(err, Error::Build { .. }));
        assert!(err.to_string().contains("blocked"));
        assert_eq!(tip(m.remote.path(), DEFAULT_BRANCH), head);
        assert!(remote_refs(m.remote.path(), "refs/convoy").is_empty());
        assert_eq!(m.status("VCTRS-1234"), ChangesetStatus::Dev);
    }

    #[test]
    fn m2_2_failed_check_rolls_back_and_retry_succeeds() {
        let m = Mission::new("NONE", &[]);
        m.run(GoalName::ChangesetStart, changeset("svc:VCTRS-9")).unwrap();
        let head = tip(m.remote.path(), DEFAULT_BRANCH);

        let err = m.run(GoalName::ChangesetPromote, changeset("svc:VCTRS-9")).unwrap_err();
        assert!(err.to_string().contains("changeset/VCTRS-9"));
        assert_eq!(tip(m.remote.path(), DEFAULT_BRANCH), head);
        assert!(m.candidate().is_none());

        add_branch(m.project.path(), "changeset/VCTRS-9");
        m.run(GoalName::ChangesetPromote, changeset("svc:VCTRS-9")).unwrap();
        assert_eq!(m.status("VCTRS-9"), ChangesetStatus::Rc);
    }

    #[test]
    fn m2_3_check_command_runs_inside_each_checkout() {
        let m = Mission::with_extra(
            "NONE",
            &["changeset/VCTRS-3"],
            "check_command: [sh, -c, 'test -f README.md']\n",
        );
        m.run(GoalName::ChangesetStart, changeset("svc:VCTRS-3")).unwrap();
        m.run(GoalName::ChangesetPromote, changeset("svc:VCTRS-3")).unwrap();
        assert_eq!(m.status("VCTRS-3"), ChangesetStatus::Rc);
    }
}

mod m3_locking {
    use super::*;

    #[test]
    fn m3_1_goal_fails_while_bundle_is_locked() {
        let m = Mission::new("NONE", &["changeset/VCTRS-1"]);
        m.run(GoalName::ChangesetStart, changeset("svc:VCTRS-1")).unwrap();
        let before = m.commits();

        let _held = BundleLock::local(m.settings.lock_dir()).acquire("svc", false).unwrap();
        let err = m.run(GoalName::ChangesetPromote, changeset("svc:VCTRS-1")).unwrap_err();

        assert!(matches!(err, Error::Locked { .. }));
        assert_eq!(m.commits(), before);
    }

    #[test]
    fn m3_2_foreign_marker_blocks_until_forced() {
        let m = Mission::new("NONE", &["changeset/VCTRS-2"]);
        m.run(GoalName::ChangesetStart, changeset("svc:VCTRS-2")).unwrap();

        let record = serde_json::json!({
            "holder_pid": 4242,
            "holder_host": "build-07.example.com",
            "acquired_at": "2024-01-01T00:00:00Z",
            "bundle": "svc",
            "token": "6f9619ff-8b86-4d01-b42d-00cf4fc964ff",
        });
        m.repo()
            .publish_marker(
                &marker_ref("svc"),
                &serde_json::to_vec(&record).unwrap(),
                "lock",
                false,
            )
            .unwrap();

        let err = m.run(GoalName::ChangesetPromote, changeset("svc:VCTRS-2")).unwrap_err();
        assert!(err.to_string().contains("build-07.example.com"));

        let forced = GoalOptions {
            force: true,
            ..changeset("svc:VCTRS-2")
        };
        m.run(GoalName::ChangesetPromote, forced).unwrap();
        assert_eq!(m.status("VCTRS-2"), ChangesetStatus::Rc);
        assert!(remote_refs(m.remote.path(), "refs/convoy").is_empty());
    }
}

mod m4_cancellation {
    use super::*;

    #[test]
    fn m4_1_cancelled_goal_changes_nothing() {
        let m = Mission::new("NONE", &["changeset/VCTRS-4"]);
        m.run(GoalName::ChangesetStart, changeset("svc:VCTRS-4")).unwrap();
        let before = m.commits();

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = m
            .run_cancellable(GoalName::ChangesetPromote, changeset("svc:VCTRS-4"), cancel)
            .unwrap_err();

        assert!(matches!(err, Error::Interrupted { .. }));
        assert_eq!(err.exit_code(), 130);
        assert_eq!(m.commits(), before);
        assert!(remote_refs(m.remote.path(), "refs/convoy").is_empty());
        assert_eq!(m.status("VCTRS-4"), ChangesetStatus::Dev);
    }

    #[test]
    fn m4_2_cancel_while_checks_run_rolls_back_and_unlocks() {
        let flags = TempDir::new().unwrap();
        let m = hanging_check(&flags, "VCTRS-5");
        m.run(GoalName::ChangesetStart, changeset("svc:VCTRS-5")).unwrap();
        let before = m.commits();

        let cancel = CancelToken::new();
        let held = HeldLocks::new();
        let started = flags.path().join("started");
        let (trigger, watched) = (cancel.clone(), held.clone());
        let canceller = thread::spawn(move || {
            wait_for(&started);
            let locked = watched.len();
            trigger.cancel();
            locked
        });

        let began = Instant::now();
        let err = m
            .run_tracked(GoalName::ChangesetPromote, changeset("svc:VCTRS-5"), cancel, held.clone())
            .unwrap_err();

        assert_eq!(canceller.join().unwrap(), 1);
        assert!(matches!(err, Error::Interrupted { .. }), "{err:?}");
        assert!(began.elapsed() < Duration::from_secs(25));
        assert_eq!(m.commits(), before);
        assert_eq!(m.status("VCTRS-5"), ChangesetStatus::Dev);
        assert!(m.candidate().is_none());
        assert_eq!(m.repo().read_file(CANDIDATE).unwrap(), None);
        assert!(remote_refs(m.remote.path(), "refs/convoy").is_empty());
        assert!(held.is_empty());
        BundleLock::local(m.settings.lock_dir()).acquire("svc", false).unwrap();
    }

    #[test]
    fn m4_3_abort_releases_marker_before_goal_unwinds() {
        let flags = TempDir::new().unwrap();
        let m = hanging_check(&flags, "VCTRS-6");
        m.run(GoalName::ChangesetStart, changeset("svc:VCTRS-6")).unwrap();

        let cancel = CancelToken::new();
        let held = HeldLocks::new();
        let started = flags.path().join("started");
        let remote = m.remote.path().to_path_buf();
        let (trigger, watched) = (cancel.clone(), held.clone());
        let aborter = thread::spawn(move || {
            wait_for(&started);
            let released = watched.release_all();
            let left = remote_refs(&remote, "refs/convoy");
            trigger.cancel();
            (released, left)
        });

        let err = m
            .run_tracked(GoalName::ChangesetPromote, changeset("svc:VCTRS-6"), cancel, held)
            .unwrap_err();

        let (released, left) = aborter.join().unwrap();
        assert_eq!(released, 1);
        assert!(left.is_empty(), "{left:?}");
        assert!(matches!(err, Error::Interrupted { .. }), "{err:?}");
        assert_eq!(m.status("VCTRS-6"), ChangesetStatus::Dev);
    }
}
