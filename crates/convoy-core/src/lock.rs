//! Exclusive per-bundle locking
//!
//! A bundle lock has two artifacts:
//!
//! - a local `<lock_dir>/<bundle>.pid` file, held with an exclusive advisory
//!   lock for the lifetime of the handle. The operating system drops the
//!   advisory lock when the holder dies, so a pid file that can be locked is
//!   stale whatever it contains.
//! - a durable marker on the metadata remote at `refs/convoy/locks/<bundle>`,
//!   visible to every machine. It is a detached ref, so taking or releasing
//!   the lock never adds commits to the tracked branch.
//!
//! Dry runs and read-only goals take the local lock only.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use convoy_git::ConfigRepository;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Ref holding the durable lock marker of `bundle`.
pub fn marker_ref(bundle: &str) -> String {
    format!("refs/convoy/locks/{bundle}")
}

/// Who holds a bundle lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub holder_pid: u32,
    pub holder_host: String,
    pub acquired_at: DateTime<Utc>,
    pub bundle: String,
    /// Distinguishes acquisitions by the same pid
    pub token: Uuid,
}

impl LockRecord {
    fn current(bundle: &str) -> Self {
        Self {
            holder_pid: std::process::id(),
            holder_host: hostname(),
            acquired_at: Utc::now(),
            bundle: bundle.to_string(),
            token: Uuid::new_v4(),
        }
    }

    fn into_error(self) -> Error {
        Error::Locked {
            bundle: self.bundle,
            pid: self.holder_pid,
            host: self.holder_host,
            since: self.acquired_at.to_rfc3339(),
        }
    }
}

fn hostname() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

fn unknown_holder(bundle: &str) -> Error {
    Error::Locked {
        bundle: bundle.to_string(),
        pid: 0,
        host: "unknown".to_string(),
        since: "unknown".to_string(),
    }
}

fn io_error(path: &Path, source: std::io::Error) -> Error {
    convoy_fs::Error::io(path, source).into()
}

/// Locks currently held by one invocation.
///
/// Clones share one list. An interrupt handler that must exit before the
/// goal unwinds calls [`release_all`](Self::release_all) so that no marker
/// outlives the process.
#[derive(Debug, Clone, Default)]
pub struct HeldLocks(Arc<Mutex<Vec<HeldLock>>>);

#[derive(Debug, Clone)]
struct HeldLock {
    record: LockRecord,
    pid_file: PathBuf,
    /// Checkout and branch of the metadata clone holding the marker
    checkout: Option<(PathBuf, String)>,
}

impl HeldLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, lock: HeldLock) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push(lock);
    }

    fn remove(&self, token: Uuid) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|held| held.record.token != token);
    }

    /// Release every registered lock through fresh handles, bypassing the
    /// [`LockHandle`]s that own them. Returns how many were released.
    pub fn release_all(&self) -> usize {
        let held = std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner));
        for lock in &held {
            lock.release();
        }
        held.len()
    }
}

impl HeldLock {
    fn release(&self) {
        if let Some((checkout, branch)) = &self.checkout {
            let refname = marker_ref(&self.record.bundle);
            match ConfigRepository::open(checkout, branch) {
                Ok(repo) => {
                    if owns_marker(&repo, &refname, self.record.token)
                        && let Err(e) = repo.delete_marker(&refname)
                    {
                        tracing::warn!(marker = %refname, error = %e, "Could not remove lock marker");
                    }
                }
                Err(e) => tracing::warn!(
                    dir = %checkout.display(),
                    error = %e,
                    "Could not open metadata clone to release lock"
                ),
            }
        }
        if let Err(e) = OpenOptions::new()
            .write(true)
            .open(&self.pid_file)
            .and_then(|file| file.set_len(0))
        {
            tracing::warn!(path = %self.pid_file.display(), error = %e, "Could not clear lock file");
        }
        tracing::debug!(bundle = %self.record.bundle, "Bundle unlocked on abort");
    }
}

/// Acquires bundle locks.
#[derive(Debug, Clone)]
pub struct BundleLock<'a> {
    lock_dir: PathBuf,
    repo: Option<&'a ConfigRepository>,
    held: Option<HeldLocks>,
}

impl<'a> BundleLock<'a> {
    /// Locks that only guard this machine.
    pub fn local(lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            lock_dir: lock_dir.into(),
            repo: None,
            held: None,
        }
    }

    /// Locks that also publish a marker on the metadata remote.
    pub fn durable(lock_dir: impl Into<PathBuf>, repo: &'a ConfigRepository) -> Self {
        Self {
            lock_dir: lock_dir.into(),
            repo: Some(repo),
            held: None,
        }
    }

    /// Record every acquired lock in `held` until it is released.
    pub fn with_registry(mut self, held: HeldLocks) -> Self {
        self.held = Some(held);
        self
    }

    /// Acquire the lock of `bundle`.
    ///
    /// Fails with [`Error::Locked`] if a live local holder exists, or if the
    /// remote marker belongs to another invocation and `force` is not set. A
    /// marker from this host is replaced only when it carries the token of the
    /// stale pid file just reclaimed here, or when its holder pid is gone.
    pub fn acquire(&self, bundle: &str, force: bool) -> Result<LockHandle<'a>> {
        fs::create_dir_all(&self.lock_dir).map_err(|e| io_error(&self.lock_dir, e))?;
        let path = self.lock_dir.join(format!("{bundle}.pid"));
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| io_error(&path, e))?;

        if file.try_lock_exclusive().is_err() {
            return Err(read_record(&mut file)
                .map(LockRecord::into_error)
                .unwrap_or_else(|| unknown_holder(bundle)));
        }
        let stale = read_record(&mut file);
        if let Some(stale) = &stale {
            tracing::warn!(
                bundle = %bundle,
                pid = stale.holder_pid,
                since = %stale.acquired_at,
                "Reclaiming stale local lock"
            );
        }

        let record = LockRecord::current(bundle);
        write_record(&mut file, &record).map_err(|e| io_error(&path, e))?;
        let mut handle = LockHandle {
            record,
            path,
            file: Some(file),
            repo: None,
            marker: None,
            held: None,
        };

        if let Some(repo) = self.repo {
            publish(repo, &handle.record, stale.as_ref(), force)?;
            handle.repo = Some(repo);
            handle.marker = Some(marker_ref(bundle));
        }
        if let Some(held) = &self.held {
            held.insert(HeldLock {
                record: handle.record.clone(),
                pid_file: handle.path.clone(),
                checkout: self
                    .repo
                    .map(|repo| (repo.root().to_native(), repo.branch().to_string())),
            });
            handle.held = Some(held.clone());
        }
        tracing::debug!(bundle = %bundle, durable = self.repo.is_some(), "Bundle locked");
        Ok(handle)
    }
}

fn read_record(file: &mut File) -> Option<LockRecord> {
    let mut content = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut content).ok()?;
    serde_json::from_str(&content).ok()
}

fn write_record(file: &mut File, record: &LockRecord) -> std::io::Result<()> {
    let json = serde_json::to_vec_pretty(record)?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&json)?;
    file.sync_all()
}

/// Whether `pid` names a running process on this host.
fn is_process_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    #[cfg(unix)]
    {
        // kill -0 tests for existence without delivering a signal
        Command::new("kill")
            .args(["-0", &pid.to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
    #[cfg(windows)]
    {
        Command::new("tasklist")
            .args(["/FI", &format!("PID eq {pid}"), "/NH"])
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = pid;
        true
    }
}

/// A same-host marker is stale when it was left by the record this lock dir
/// just reclaimed, or when its holder process is gone.
fn is_stale_marker(holder: &LockRecord, record: &LockRecord, local: Option<&LockRecord>) -> bool {
    if holder.holder_host != record.holder_host {
        return false;
    }
    local.is_some_and(|stale| stale.token == holder.token) || !is_process_alive(holder.holder_pid)
}

fn publish(
    repo: &ConfigRepository,
    record: &LockRecord,
    local: Option<&LockRecord>,
    force: bool,
) -> Result<()> {
    let refname = marker_ref(&record.bundle);
    let mut replace = false;

    if let Some(bytes) = repo.read_marker(&refname)? {
        match serde_json::from_slice::<LockRecord>(&bytes) {
            Ok(holder) if is_stale_marker(&holder, record, local) => {
                tracing::warn!(
                    bundle = %record.bundle,
                    pid = holder.holder_pid,
                    "Reclaiming stale lock marker left on this host"
                );
                replace = true;
            }
            Ok(holder) if force => {
                tracing::warn!(
                    bundle = %record.bundle,
                    pid = holder.holder_pid,
                    host = %holder.holder_host,
                    "Overriding lock held by another host"
                );
                replace = true;
            }
            Ok(holder) => return Err(holder.into_error()),
            Err(e) if force => {
                tracing::warn!(bundle = %record.bundle, error = %e, "Overriding malformed lock marker");
                replace = true;
            }
            Err(_) => return Err(unknown_holder(&record.bundle)),
        }
    }

    let json = serde_json::to_vec_pretty(record)?;
    let message = format!("Lock bundle {}", record.bundle);
    match repo.publish_marker(&refname, &json, &message, replace) {
        Ok(()) => Ok(()),
        // Another invocation published first
        Err(convoy_git::Error::PushRejected { .. }) => {
            let holder = repo
                .read_marker(&refname)?
                .and_then(|bytes| serde_json::from_slice::<LockRecord>(&bytes).ok());
            Err(holder
                .map(LockRecord::into_error)
                .unwrap_or_else(|| unknown_holder(&record.bundle)))
        }
        Err(e) => Err(e.into()),
    }
}

/// Whether the marker at `refname` still carries `token`. An unreadable
/// marker counts as someone else's.
fn owns_marker(repo: &ConfigRepository, refname: &str, token: Uuid) -> bool {
    match repo.read_marker(refname) {
        Ok(Some(bytes)) => serde_json::from_slice::<LockRecord>(&bytes)
            .map(|holder| holder.token == token)
            .unwrap_or(false),
        Ok(None) => false,
        Err(e) => {
            tracing::warn!(marker = %refname, error = %e, "Could not read lock marker, leaving it");
            false
        }
    }
}

/// A held bundle lock; released on drop.
#[derive(Debug)]
pub struct LockHandle<'a> {
    record: LockRecord,
    path: PathBuf,
    file: Option<File>,
    repo: Option<&'a ConfigRepository>,
    marker: Option<String>,
    held: Option<HeldLocks>,
}

impl LockHandle<'_> {
    pub fn record(&self) -> &LockRecord {
        &self.record
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Release both artifacts. Idempotent; failures are logged.
    ///
    /// A marker that another host has taken over with `--force` is left in
    /// place. The pid file is emptied rather than removed so that no two
    /// processes can ever lock different inodes under the same name.
    pub fn release(&mut self) {
        if let (Some(repo), Some(refname)) = (self.repo, self.marker.take()) {
            if owns_marker(repo, &refname, self.record.token) {
                if let Err(e) = repo.delete_marker(&refname) {
                    tracing::warn!(
                        marker = %refname,
                        error = %e,
                        "Could not remove lock marker; other hosts need --force until it is gone"
                    );
                }
            } else {
                tracing::warn!(marker = %refname, "Lock marker no longer ours, leaving it");
            }
        }

        if let Some(file) = self.file.take() {
            if let Err(e) = file.set_len(0) {
                tracing::warn!(path = %self.path.display(), error = %e, "Could not clear lock file");
            }
            if let Err(e) = FileExt::unlock(&file) {
                tracing::debug!(path = %self.path.display(), error = %e, "Unlock failed, closing");
            }
            tracing::debug!(bundle = %self.record.bundle, "Bundle unlocked");
        }
        if let Some(held) = self.held.take() {
            held.remove(self.record.token);
        }
    }
}

impl Drop for LockHandle<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
