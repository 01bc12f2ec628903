//! Goal scenarios against real on-disk remotes

use convoy_core::notify::MemoryNotifier;
use convoy_core::pipe::ScriptedApproval;
use convoy_core::state::{AliasFile, ChangesetFile, ChangesetStatus, ShipmentFile, ShipmentStatus};
use convoy_core::{
    BundleLock, Error, GoalName, GoalOptions, GoalOutcome, Result, Settings, run_goal,
};
use convoy_git::ConfigRepository;
use convoy_test_utils::git::{
    DEFAULT_BRANCH, add_branch, commit_count, project_remote, push_files, read_remote_file,
    remote_refs, seeded_remote,
};
use tempfile::TempDir;

fn bundle_yaml(name: &str, constraint: &str, project_url: &str) -> String {
    format!(
        "name: {name}\nconstraint: {constraint}\nchannel: '#releases'\nprojects:\n  api:\n    url: {project_url}\n"
    )
}

struct Harness {
    remote: TempDir,
    project: TempDir,
    work: TempDir,
    settings: Settings,
    notifier: MemoryNotifier,
}

impl Harness {
    /// Bundle `svc` with one project `api` whose remote has `branches`.
    fn new(constraint: &str, branches: &[&str]) -> Self {
        let project = project_remote(branches);
        let url = project.path().to_str().unwrap().to_string();
        let remote = seeded_remote(&[(
            "bundles/svc/bundle.yaml",
            &bundle_yaml("svc", constraint, &url),
        )]);
        let work = TempDir::new().unwrap();

        let mut settings = Settings::default();
        settings.repository.url = remote.path().to_str().unwrap().to_string();
        settings.repository.checkout_dir = Some(work.path().join("metadata"));
        settings.execution.lock_dir = Some(work.path().join("locks"));
        settings.execution.work_dir = Some(work.path().join("work"));

        Self {
            remote,
            project,
            work,
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

    fn run_with(
        &self,
        goal: GoalName,
        options: GoalOptions,
        approval: &ScriptedApproval,
    ) -> Result<GoalOutcome> {
        let repo = self.repo();
        let ctx = convoy_core::Context::new(&self.settings, goal, &self.notifier, approval)
            .with_options(&options);
        run_goal(&ctx, &repo, &options)
    }

    fn run(&self, goal: GoalName, options: GoalOptions) -> Result<GoalOutcome> {
        self.run_with(goal, options, &ScriptedApproval::new(Vec::<String>::new()))
    }

    fn commits(&self) -> usize {
        commit_count(self.remote.path(), DEFAULT_BRANCH)
    }

    fn file(&self, path: &str) -> Option<String> {
        read_remote_file(self.remote.path(), DEFAULT_BRANCH, path)
    }

    fn changeset(&self, tracking_id: &str) -> ChangesetFile {
        let content = self
            .file(&format!("bundles/svc/changesets/{tracking_id}.yaml"))
            .unwrap_or_else(|| panic!("no manifest for {tracking_id}"));
        serde_yaml::from_str(&content).unwrap()
    }

    fn alias(&self, path: &str) -> Option<AliasFile> {
        self.file(path).map(|c| serde_yaml::from_str(&c).unwrap())
    }

    fn set_constraint(&self, constraint: &str) {
        let url = self.project.path().to_str().unwrap();
        push_files(
            self.remote.path(),
            DEFAULT_BRANCH,
            &[("bundles/svc/bundle.yaml", &bundle_yaml("svc", constraint, url))],
            "Change constraint",
        );
    }
}

fn changeset(id: &str) -> GoalOptions {
    GoalOptions {
        changeset_id: Some(id.parse().unwrap()),
        ..GoalOptions::default()
    }
}

const CANDIDATE: &str = "bundles/svc/candidates/master.yaml";
const RELEASED: &str = "bundles/svc/aliases/RELEASED.yaml";
const HOTFIX: &str = "bundles/svc/aliases/HOTFIX.yaml";

mod changeset_goals {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn promote_open_bundle_writes_candidate_in_one_commit() {
        let h = Harness::new("NONE", &["changeset/VCTRS-1234"]);
        h.run(GoalName::ChangesetStart, changeset("svc:VCTRS-1234")).unwrap();
        let before = h.commits();

        let outcome = h
            .run(GoalName::ChangesetPromote, changeset("svc:VCTRS-1234"))
            .unwrap();

        assert_eq!(outcome.headline, "Promoted svc:VCTRS-1234 to RC on master");
        assert_eq!(h.changeset("VCTRS-1234").status, ChangesetStatus::Rc);
        let candidate = h.alias(CANDIDATE).unwrap();
        assert_eq!(candidate.changeset, "VCTRS-1234");
        assert_eq!(candidate.status, ChangesetStatus::Rc);
        assert_eq!(h.commits(), before + 1);
        assert!(remote_refs(h.remote.path(), "refs/convoy/").is_empty());
    }

    #[test]
    fn promote_blocked_bundle_changes_nothing() {
        let h = Harness::new("NONE", &["changeset/VCTRS-1234"]);
        h.run(GoalName::ChangesetStart, changeset("svc:VCTRS-1234")).unwrap();
        h.set_constraint("BLOCKED");
        let before = h.commits();

        let err = h
            .run(GoalName::ChangesetPromote, changeset("svc:VCTRS-1234"))
            .unwrap_err();

        assert!(matches!(err, Error::Build { .. }));
        assert!(err.to_string().contains("blocked"), "{err}");
        assert_eq!(h.commits(), before);
        assert_eq!(h.changeset("VCTRS-1234").status, ChangesetStatus::Dev);
        assert!(h.file(CANDIDATE).is_none());
        assert!(remote_refs(h.remote.path(), "refs/convoy/").is_empty());
    }

    #[test]
    fn failed_check_leaves_state_and_retry_succeeds() {
        let h = Harness::new("NONE", &[]);
        h.run(GoalName::ChangesetStart, changeset("svc:VCTRS-77")).unwrap();
        let tip_before = h.commits();

        let err = h
            .run(GoalName::ChangesetPromote, changeset("svc:VCTRS-77"))
            .unwrap_err();
        assert!(err.to_string().contains("api"), "{err}");
        assert_eq!(h.commits(), tip_before);
        assert_eq!(h.changeset("VCTRS-77").status, ChangesetStatus::Dev);
        assert!(h.file(CANDIDATE).is_none());

        add_branch(h.project.path(), "changeset/VCTRS-77");
        h.run(GoalName::ChangesetPromote, changeset("svc:VCTRS-77")).unwrap();
        assert_eq!(h.changeset("VCTRS-77").status, ChangesetStatus::Rc);
    }

    #[test]
    fn second_candidate_on_a_trunk_is_refused() {
        let h = Harness::new("NONE", &["changeset/VCTRS-1", "changeset/VCTRS-2"]);
        h.run(GoalName::ChangesetStart, changeset("svc:VCTRS-1")).unwrap();
        h.run(GoalName::ChangesetStart, changeset("svc:VCTRS-2")).unwrap();
        h.run(GoalName::ChangesetPromote, changeset("svc:VCTRS-1")).unwrap();

        let err = h
            .run(GoalName::ChangesetPromote, changeset("svc:VCTRS-2"))
            .unwrap_err();
        assert!(err.to_string().contains("already has release candidate VCTRS-1"));
    }

    #[test]
    fn promote_with_resume_is_a_no_op_that_renotifies() {
        let h = Harness::new("NONE", &["changeset/VCTRS-5"]);
        h.run(GoalName::ChangesetStart, changeset("svc:VCTRS-5")).unwrap();
        h.run(GoalName::ChangesetPromote, changeset("svc:VCTRS-5")).unwrap();
        let before = h.commits();
        let sent = h.notifier.sent().len();

        let err = h
            .run(GoalName::ChangesetPromote, changeset("svc:VCTRS-5"))
            .unwrap_err();
        assert!(err.to_string().contains("Cannot move changeset from RC to RC"));

        let options = GoalOptions {
            resume: true,
            ..changeset("svc:VCTRS-5")
        };
        let outcome = h.run(GoalName::ChangesetPromote, options).unwrap();
        assert!(outcome.unchanged);
        assert_eq!(h.commits(), before);
        // one failure notice, one re-sent success
        assert_eq!(h.notifier.sent().len(), sent + 2);
    }

    #[test]
    fn ship_releases_and_moves_aliases() {
        let h = Harness::new("NONE", &["changeset/VCTRS-10"]);
        h.run(GoalName::ChangesetStart, changeset("svc:VCTRS-10")).unwrap();
        h.run(GoalName::ChangesetPromote, changeset("svc:VCTRS-10")).unwrap();

        h.run(GoalName::ChangesetShip, changeset("svc:VCTRS-10")).unwrap();

        assert_eq!(h.changeset("VCTRS-10").status, ChangesetStatus::Released);
        assert!(h.file(CANDIDATE).is_none());
        assert_eq!(h.alias(RELEASED).unwrap().changeset, "VCTRS-10");
        assert_eq!(
            h.alias("bundles/svc/aliases/master.yaml").unwrap().changeset,
            "VCTRS-10"
        );

        let err = h
            .run(GoalName::ChangesetAbandon, changeset("svc:VCTRS-10"))
            .unwrap_err();
        assert!(err.to_string().contains("RELEASED"));
    }

    #[test]
    fn abandon_reverts_candidate_then_abandons_and_start_reopens() {
        let h = Harness::new("NONE", &["changeset/VCTRS-3"]);
        h.run(GoalName::ChangesetStart, changeset("svc:VCTRS-3")).unwrap();
        h.run(GoalName::ChangesetPromote, changeset("svc:VCTRS-3")).unwrap();

        h.run(GoalName::ChangesetAbandon, changeset("svc:VCTRS-3")).unwrap();
        assert_eq!(h.changeset("VCTRS-3").status, ChangesetStatus::Dev);
        assert!(h.file(CANDIDATE).is_none());

        h.run(GoalName::ChangesetAbandon, changeset("svc:VCTRS-3")).unwrap();
        assert_eq!(h.changeset("VCTRS-3").status, ChangesetStatus::Abandoned);

        let outcome = h.run(GoalName::ChangesetStart, changeset("svc:VCTRS-3")).unwrap();
        assert_eq!(outcome.headline, "Reopened svc:VCTRS-3");
        assert_eq!(h.changeset("VCTRS-3").status, ChangesetStatus::Dev);
    }

    #[test]
    fn hotfix_branches_off_the_released_baseline() {
        let h = Harness::new("NONE", &["changeset/VCTRS-1", "changeset/VCTRS-2"]);
        let err = h
            .run(GoalName::ChangesetHotfix, changeset("svc:VCTRS-2"))
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));

        h.run(GoalName::ChangesetStart, changeset("svc:VCTRS-1")).unwrap();
        h.run(GoalName::ChangesetStart, changeset("svc:VCTRS-2")).unwrap();
        let err = h
            .run(GoalName::ChangesetHotfix, changeset("svc:VCTRS-2"))
            .unwrap_err();
        assert!(err.to_string().contains("PRODUCTION or RELEASED"));

        h.run(GoalName::ChangesetPromote, changeset("svc:VCTRS-1")).unwrap();
        h.run(GoalName::ChangesetShip, changeset("svc:VCTRS-1")).unwrap();
        h.run(GoalName::ChangesetHotfix, changeset("svc:VCTRS-2")).unwrap();

        let hotfix = h.changeset("VCTRS-2");
        assert_eq!(hotfix.status, ChangesetStatus::Hotfix);
        assert_eq!(hotfix.base.get("api").unwrap(), "changeset/VCTRS-1");
        assert_eq!(h.alias(HOTFIX).unwrap().changeset, "VCTRS-2");

        h.run(GoalName::ChangesetShip, changeset("svc:VCTRS-2")).unwrap();
        assert!(h.file(HOTFIX).is_none());
        assert_eq!(h.alias(RELEASED).unwrap().changeset, "VCTRS-2");
    }

    #[test]
    fn show_reports_status_and_aliases_without_committing() {
        let h = Harness::new("NONE", &["changeset/VCTRS-8"]);
        h.run(GoalName::ChangesetStart, changeset("svc:VCTRS-8")).unwrap();
        h.run(GoalName::ChangesetPromote, changeset("svc:VCTRS-8")).unwrap();
        let before = h.commits();

        let outcome = h.run(GoalName::ChangesetShow, changeset("svc:VCTRS-8")).unwrap();
        assert!(outcome.report.contains(&"status: RC".to_string()));
        assert!(outcome.report.contains(&"aliases: master (candidate)".to_string()));
        assert_eq!(h.commits(), before);
    }
}

mod release_pipe {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn moderated_promote_cancels_after_four_wrong_codes() {
        let h = Harness::new("MODERATED", &["changeset/VCTRS-9"]);
        h.run(GoalName::ChangesetStart, changeset("svc:VCTRS-9")).unwrap();
        let before = h.commits();
        let approval = ScriptedApproval::new(["", "nope", "0000x", "still wrong"]);

        let err = h
            .run_with(GoalName::ChangesetPromote, changeset("svc:VCTRS-9"), &approval)
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled { .. }), "{err:?}");
        assert_eq!(approval.prompts(), 4);
        assert_eq!(h.commits(), before);
        let code_sent = h
            .notifier
            .sent()
            .iter()
            .any(|n| n.channel.as_deref() == Some("#releases") && n.text.contains("Approval code"));
        assert!(code_sent);
    }

    #[test]
    fn moderated_dry_run_skips_approval_and_commits_nothing() {
        let h = Harness::new("MODERATED", &["changeset/VCTRS-9"]);
        h.run(GoalName::ChangesetStart, changeset("svc:VCTRS-9")).unwrap();
        let before = h.commits();
        let approval = ScriptedApproval::new(Vec::<String>::new());
        let options = GoalOptions {
            dry_run: true,
            ..changeset("svc:VCTRS-9")
        };

        let outcome = h
            .run_with(GoalName::ChangesetPromote, options, &approval)
            .unwrap();

        assert!(outcome.report.iter().any(|l| l.contains("skipped in dry run")));
        assert_eq!(approval.prompts(), 0);
        assert_eq!(h.commits(), before);
        assert_eq!(h.changeset("VCTRS-9").status, ChangesetStatus::Dev);
    }

    #[test]
    fn trunk_local_changeset_is_not_gated() {
        let h = Harness::new("NONE", &["changeset/VCTRS-4"]);
        h.run(
            GoalName::TrunkCreate,
            GoalOptions {
                bundle: Some("svc".into()),
                trunk: Some("release-2".into()),
                ..GoalOptions::default()
            },
        )
        .unwrap();
        h.run(
            GoalName::ChangesetStart,
            GoalOptions {
                trunk: Some("release-2".into()),
                ..changeset("svc:VCTRS-4")
            },
        )
        .unwrap();
        h.set_constraint("BLOCKED");

        let outcome = h
            .run(GoalName::ChangesetPromote, changeset("svc:VCTRS-4"))
            .unwrap();
        assert!(outcome.report.iter().any(|l| l.contains("trunk-local")));
        assert!(h.file("bundles/svc/candidates/release-2.yaml").is_some());
    }

    #[test]
    fn set_constraint_is_persisted() {
        let h = Harness::new("NONE", &[]);
        let options = GoalOptions {
            bundle: Some("svc".into()),
            constraint: Some("blocked".parse().unwrap()),
            ..GoalOptions::default()
        };
        h.run(GoalName::SetConstraint, options).unwrap();

        let config = h.file("bundles/svc/bundle.yaml").unwrap();
        assert!(config.contains("constraint: BLOCKED"), "{config}");
        assert!(config.contains("#releases"), "unknown keys must survive: {config}");
    }
}

mod locking {
    use super::*;

    #[test]
    fn held_bundle_lock_refuses_a_second_goal() {
        let h = Harness::new("NONE", &["changeset/VCTRS-1"]);
        h.run(GoalName::ChangesetStart, changeset("svc:VCTRS-1")).unwrap();

        let locks = BundleLock::local(h.work.path().join("locks"));
        let mut held = locks.acquire("svc", false).unwrap();
        let err = h
            .run(GoalName::ChangesetPromote, changeset("svc:VCTRS-1"))
            .unwrap_err();
        assert!(matches!(err, Error::Locked { .. }), "{err:?}");

        held.release();
        h.run(GoalName::ChangesetPromote, changeset("svc:VCTRS-1")).unwrap();
    }
}

mod trunk_goals {
    use super::*;
    use pretty_assertions::assert_eq;

    fn trunk(name: &str) -> GoalOptions {
        GoalOptions {
            bundle: Some("svc".into()),
            trunk: Some(name.into()),
            ..GoalOptions::default()
        }
    }

    #[test]
    fn create_list_close_and_reactivate() {
        let h = Harness::new("NONE", &[]);
        h.run(GoalName::TrunkCreate, trunk("release-2")).unwrap();
        assert!(h.run(GoalName::TrunkCreate, trunk("release-2")).is_err());

        let listing = h.run(GoalName::TrunkList, trunk_list()).unwrap();
        assert_eq!(
            listing.report,
            vec![
                "master  stable: -  candidate: -".to_string(),
                "release-2  stable: -  candidate: -".to_string(),
            ]
        );

        h.run(GoalName::TrunkClose, trunk("release-2")).unwrap();
        let listing = h.run(GoalName::TrunkList, trunk_list()).unwrap();
        assert!(listing.report[1].starts_with("release-2 (closed)"));

        let outcome = h.run(GoalName::TrunkCreate, trunk("release-2")).unwrap();
        assert!(outcome.headline.starts_with("Reactivated"));
    }

    #[test]
    fn default_trunk_cannot_be_closed() {
        let h = Harness::new("NONE", &[]);
        let err = h.run(GoalName::TrunkClose, trunk("master")).unwrap_err();
        assert!(err.to_string().contains("default trunk"));
    }

    #[test]
    fn trunk_list_of_unknown_bundle_is_empty() {
        let h = Harness::new("NONE", &[]);
        let options = GoalOptions {
            bundle: Some("ghost".into()),
            ..GoalOptions::default()
        };
        let outcome = h.run(GoalName::TrunkList, options).unwrap();
        assert_eq!(outcome.report, vec!["no trunks".to_string()]);
    }

    fn trunk_list() -> GoalOptions {
        GoalOptions {
            bundle: Some("svc".into()),
            ..GoalOptions::default()
        }
    }
}

mod shipment_goals {
    use super::*;
    use pretty_assertions::assert_eq;

    fn shipment(id: &str, bundles: &[&str]) -> GoalOptions {
        GoalOptions {
            shipment_id: Some(id.parse().unwrap()),
            bundles: bundles.iter().map(|b| b.to_string()).collect(),
            ..GoalOptions::default()
        }
    }

    fn add_web_bundle(h: &Harness) {
        let url = h.project.path().to_str().unwrap();
        push_files(
            h.remote.path(),
            DEFAULT_BRANCH,
            &[("bundles/web/bundle.yaml", &bundle_yaml("web", "NONE", url))],
            "Add web bundle",
        );
    }

    #[test]
    fn create_requires_a_candidate_per_bundle() {
        let h = Harness::new("NONE", &["changeset/VCTRS-1"]);
        let err = h
            .run(GoalName::ShipmentCreate, shipment("svc:2024.1", &[]))
            .unwrap_err();
        assert!(err.to_string().contains("no release candidate"));
        assert!(h.file("shipments/svc/2024.1.yaml").is_none());
    }

    #[test]
    fn shipment_spans_bundles_and_ships_to_production() {
        let h = Harness::new("NONE", &["changeset/VCTRS-1", "changeset/WEB-7"]);
        add_web_bundle(&h);
        h.run(GoalName::ChangesetStart, changeset("svc:VCTRS-1")).unwrap();
        h.run(GoalName::ChangesetPromote, changeset("svc:VCTRS-1")).unwrap();
        h.run(GoalName::ChangesetStart, changeset("web:WEB-7")).unwrap();
        h.run(GoalName::ChangesetPromote, changeset("web:WEB-7")).unwrap();

        let ship_id = shipment("svc:2024.1", &["web", "svc"]);
        h.run(GoalName::ShipmentCreate, ship_id.clone()).unwrap();
        let file: ShipmentFile =
            serde_yaml::from_str(&h.file("shipments/svc/2024.1.yaml").unwrap()).unwrap();
        assert_eq!(file.status, ShipmentStatus::Pending);
        assert_eq!(file.bundle_names(), vec!["svc".to_string(), "web".to_string()]);
        assert_eq!(file.bundles["web"].changeset.as_deref(), Some("WEB-7"));
        assert_eq!(file.bundles["svc"].trunks, vec!["master".to_string()]);

        let ship = GoalOptions {
            shipment_id: ship_id.shipment_id.clone(),
            ..GoalOptions::default()
        };
        h.run(GoalName::ShipmentShip, ship.clone()).unwrap();

        let file: ShipmentFile =
            serde_yaml::from_str(&h.file("shipments/svc/2024.1.yaml").unwrap()).unwrap();
        assert_eq!(file.status, ShipmentStatus::Shipped);
        assert_eq!(h.changeset("VCTRS-1").status, ChangesetStatus::Released);
        for bundle in ["svc", "web"] {
            assert!(
                h.file(&format!("bundles/{bundle}/aliases/PRODUCTION.yaml")).is_some(),
                "{bundle} has no PRODUCTION alias"
            );
            assert!(h.file(&format!("bundles/{bundle}/candidates/master.yaml")).is_none());
        }
        assert!(remote_refs(h.remote.path(), "refs/convoy/").is_empty());

        let resumed = h
            .run(GoalName::ShipmentShip, GoalOptions { resume: true, ..ship })
            .unwrap();
        assert!(resumed.unchanged);
    }
}
