//! Convoy CLI
//!
//! Runs release goals against the metadata repository named in the settings.

mod cli;
mod error;
mod interactive;
mod logging;
mod signal;

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use convoy_core::{CancelToken, Context, ErrorKind, GoalName, HeldLocks, Settings, run_goal};
use convoy_git::ConfigRepository;

use cli::{Cli, Commands, GoalArgs};
use error::{CliError, Result};
use interactive::TerminalApproval;

/// Exit status for command-line usage errors; 2 belongs to incompatible settings.
const USAGE: i32 = 64;

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version requests also arrive here, on stdout
            let code = if e.use_stderr() { USAGE } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };
    logging::init(cli.verbose);

    let code = match run(cli) {
        Ok(()) => 0,
        Err(e) => {
            report(&e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Goals => {
            list_goals();
            Ok(())
        }
        Commands::Run(args) => cmd_run(cli.config.as_deref(), args),
    }
}

/// Render an error the way its kind asks for.
fn report(error: &CliError) {
    match error.kind() {
        ErrorKind::Cancelled => eprintln!("{} {}", "cancelled:".yellow().bold(), error),
        ErrorKind::Interrupted => eprintln!("{} {}", "interrupted:".yellow().bold(), error),
        ErrorKind::Fatal => {
            if let CliError::Core(core) = error
                && let Some(stderr) = core.stderr()
                && !stderr.trim().is_empty()
            {
                eprintln!("{}", stderr.trim_end());
            }
            eprintln!("{} {}", "Fatal error:".red().bold(), error);
        }
        ErrorKind::Internal => {
            eprintln!("{} {}", "Internal error:".red().bold(), error);
            eprintln!("Run with {} for details.", "--verbose".cyan());
        }
    }
}

fn list_goals() {
    for goal in GoalName::ALL {
        let spec = goal.spec();
        let required: Vec<String> = spec
            .required_arguments
            .iter()
            .map(|a| format!("--{}", a.as_str()))
            .collect();
        let optional: Vec<String> = spec
            .optional_arguments
            .iter()
            .map(|a| format!("[--{}]", a.as_str()))
            .collect();
        println!("{:<18} {}", goal.as_str().green().bold(), spec.description);
        println!("{:<18} {} {}", "", required.join(" "), optional.join(" "));
    }
}

/// `--config`/`CONVOY_CONFIG`, else the per-user default.
fn settings_path(config: Option<&Path>) -> Result<PathBuf> {
    config
        .map(Path::to_path_buf)
        .or_else(Settings::default_path)
        .ok_or_else(|| CliError::user("No settings file: pass --config or set CONVOY_CONFIG"))
}

fn cmd_run(config: Option<&Path>, args: GoalArgs) -> Result<()> {
    let (goal, options) = args.into_goal()?;
    let settings = Settings::load(&settings_path(config)?)?;
    settings.validate()?;

    let notifier = convoy_core::notify::from_settings(&settings.notifications)?;
    let approval = TerminalApproval::new();
    let cancel = CancelToken::new();
    let held = HeldLocks::new();
    signal::watch_interrupts(cancel.clone(), held.clone());

    let ctx = Context::new(&settings, goal, notifier.as_ref(), &approval)
        .with_options(&options)
        .with_cancel(cancel)
        .with_held_locks(held);
    tracing::debug!(context = ?ctx, "Context ready");

    println!("{} {}", "=>".blue().bold(), goal);
    let repo = ConfigRepository::open_or_clone(
        &settings.repository.url,
        &settings.repository.branch,
        &settings.checkout_dir(),
    )
    .map_err(convoy_core::Error::from)?
    .with_browse_url(settings.repository.browse_url.clone());

    let result = run_goal(&ctx, &repo, &options);
    notifier.flush(Duration::from_secs(settings.notifications.timeout_secs));
    let outcome = result?;
    let note = if ctx.dry_run {
        " (dry run)"
    } else if outcome.unchanged {
        " (unchanged)"
    } else {
        ""
    };
    println!("{} {}{}", "OK".green().bold(), outcome.headline, note.dimmed());
    for line in &outcome.report {
        println!("   {line}");
    }
    Ok(())
}
