//! Interrupt handling
//!
//! The first Ctrl-C cancels the running goal, which then rolls back and
//! releases its locks at the next step boundary. A second one releases the
//! held locks directly and exits.

use colored::Colorize;
use convoy_core::{CancelToken, HeldLocks};

/// Exit status for a second interrupt.
const INTERRUPTED: i32 = 130;

/// Watch for Ctrl-C on a background thread and cancel `token`.
pub fn watch_interrupts(token: CancelToken, held: HeldLocks) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::warn!(error = %e, "Interrupt handling unavailable");
                return;
            }
        };
        runtime.block_on(wait_for_interrupts(token, held));
    });
}

async fn wait_for_interrupts(token: CancelToken, held: HeldLocks) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    tracing::warn!("Interrupt received, stopping goal");
    eprintln!(
        "{} interrupt received, rolling back (press Ctrl-C again to abort)",
        "!".yellow().bold()
    );
    token.cancel();

    if tokio::signal::ctrl_c().await.is_ok() {
        eprintln!("{} aborting, releasing locks", "!".red().bold());
        let released = held.release_all();
        tracing::warn!(released, "Aborted by second interrupt");
        std::process::exit(INTERRUPTED);
    }
}
