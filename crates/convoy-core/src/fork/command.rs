//! Child processes run inside project checkouts

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::context::CancelToken;
use crate::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn drain<R: Read + Send + 'static>(source: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut bytes = Vec::new();
        if let Some(mut source) = source {
            let _ = source.read_to_end(&mut bytes);
        }
        String::from_utf8_lossy(&bytes).into_owned()
    })
}

/// Run `argv` in `cwd`, returning its stdout.
///
/// The process is killed when `timeout` expires or `cancel` is raised.
/// A non-zero exit or a timeout is an [`Error::Exec`] carrying the captured
/// stderr; cancellation is [`Error::Interrupted`].
pub fn run_command(
    argv: &[String],
    cwd: &Path,
    envs: &[(&str, String)],
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<String> {
    let Some((program, args)) = argv.split_first() else {
        return Err(Error::config("check_command is empty"));
    };
    let display = argv.join(" ");

    let mut child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .envs(envs.iter().map(|(k, v)| (*k, v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Exec {
            message: format!("Failed to start `{display}`: {e}"),
            status: None,
            stderr: String::new(),
        })?;

    // Drain both pipes concurrently so a chatty child cannot block on a full pipe
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let (status, stopped) = loop {
        if let Some(status) = child.try_wait()? {
            break (Some(status), None);
        }
        let stopped = if cancel.is_cancelled() {
            Some("cancelled")
        } else if Instant::now() >= deadline {
            Some("timed out")
        } else {
            None
        };
        if stopped.is_some() {
            let _ = child.kill();
            let _ = child.wait();
            break (None, stopped);
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();

    match (status, stopped) {
        (_, Some("cancelled")) => Err(Error::Interrupted {
            at: Some(display),
        }),
        (_, Some(_)) => Err(Error::Exec {
            message: format!("`{display}` timed out after {}s", timeout.as_secs()),
            status: None,
            stderr,
        }),
        (Some(status), None) if status.success() => Ok(stdout),
        (status, None) => Err(Error::Exec {
            message: format!("`{display}` failed"),
            status: status.and_then(|s| s.code()),
            stderr,
        }),
    }
}
