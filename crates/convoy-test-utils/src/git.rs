//! Bare git remotes for tests.
//!
//! Fixtures drive the real `git` CLI so the repositories they produce are
//! exactly what a user's server would hold. Every fixture returns the
//! [`TempDir`] that owns the bare repository; dropping it deletes everything.

use std::fs;
use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

/// Branch every fixture uses as its default.
pub const DEFAULT_BRANCH: &str = "master";

/// Run `git <args>` in `dir`, panicking with stderr on failure.
///
/// # Panics
/// Panics if git cannot be spawned or exits non-zero.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap_or_else(|e| panic!("failed to run `git {args:?}`: {e}"));
    if !output.status.success() {
        panic!(
            "`git {args:?}` failed in {}:\n{}",
            dir.display(),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn init_work_tree(path: &Path) {
    git(path, &["init", "--quiet"]);
    git(path, &["symbolic-ref", "HEAD", &format!("refs/heads/{DEFAULT_BRANCH}")]);
    git(path, &["config", "user.email", "test@test.com"]);
    git(path, &["config", "user.name", "Test User"]);
    git(path, &["config", "commit.gpgsign", "false"]);
}

fn write_files(root: &Path, files: &[(&str, &str)]) {
    for (relative, content) in files {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
    }
}

fn bare_clone_of(work: &Path) -> TempDir {
    let remote = TempDir::new().unwrap();
    let target = remote.path().to_str().unwrap().to_string();
    // `git clone` refuses a non-empty target, and TempDir already exists
    fs::remove_dir(remote.path()).unwrap();
    git(
        work,
        &["clone", "--quiet", "--bare", work.to_str().unwrap(), &target],
    );
    remote
}

/// A bare metadata remote whose `master` holds `files` in one initial commit.
///
/// A `README.md` is always present so the initial commit is never empty.
pub fn seeded_remote(files: &[(&str, &str)]) -> TempDir {
    let work = TempDir::new().unwrap();
    init_work_tree(work.path());
    write_files(work.path(), &[("README.md", "# release metadata\n")]);
    write_files(work.path(), files);
    git(work.path(), &["add", "."]);
    git(work.path(), &["commit", "--quiet", "-m", "Initial commit"]);
    bare_clone_of(work.path())
}

/// A bare project remote with `master` plus one branch per entry in `branches`.
pub fn project_remote(branches: &[&str]) -> TempDir {
    let work = TempDir::new().unwrap();
    init_work_tree(work.path());
    write_files(work.path(), &[("README.md", "# project\n")]);
    git(work.path(), &["add", "."]);
    git(work.path(), &["commit", "--quiet", "-m", "Initial commit"]);
    for branch in branches {
        git(work.path(), &["branch", branch]);
    }
    bare_clone_of(work.path())
}

/// Create `branch` in an existing bare project remote, pointing at `master`.
pub fn add_branch(remote: &Path, branch: &str) {
    git(remote, &["branch", branch, DEFAULT_BRANCH]);
}

/// Number of commits reachable from `branch` in `remote`.
pub fn commit_count(remote: &Path, branch: &str) -> usize {
    git(remote, &["rev-list", "--count", branch])
        .parse()
        .expect("rev-list --count prints a number")
}

/// Tip commit id of `branch` in `remote`.
pub fn tip(remote: &Path, branch: &str) -> String {
    git(remote, &["rev-parse", branch])
}

/// Refs in `remote` whose names start with `prefix`.
pub fn remote_refs(remote: &Path, prefix: &str) -> Vec<String> {
    let listing = git(remote, &["for-each-ref", "--format=%(refname)", prefix]);
    listing
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Content of `path` at the tip of `branch`, or `None` if absent.
pub fn read_remote_file(remote: &Path, branch: &str, path: &str) -> Option<String> {
    let output = Command::new("git")
        .args(["show", &format!("{branch}:{path}")])
        .current_dir(remote)
        .output()
        .expect("failed to run git show");
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).to_string())
}

/// Commit `files` on top of `branch` in `remote`, as another user would.
pub fn push_files(remote: &Path, branch: &str, files: &[(&str, &str)], message: &str) {
    let work = TempDir::new().unwrap();
    let target = work.path().join("clone");
    git(
        work.path(),
        &[
            "clone",
            "--quiet",
            "--branch",
            branch,
            remote.to_str().unwrap(),
            target.to_str().unwrap(),
        ],
    );
    git(&target, &["config", "user.email", "other@test.com"]);
    git(&target, &["config", "user.name", "Other User"]);
    git(&target, &["config", "commit.gpgsign", "false"]);
    write_files(&target, files);
    git(&target, &["add", "."]);
    git(&target, &["commit", "--quiet", "-m", message]);
    git(&target, &["push", "--quiet", "origin", branch]);
}
