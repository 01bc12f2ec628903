//! Interactive prompts for release goals
//!
//! Uses dialoguer for the approval code exchange of moderated bundles.

use std::io::IsTerminal;

use colored::Colorize;
use convoy_core::ApprovalProvider;
use dialoguer::Input;

use crate::error::{CliError, Result};

/// Asks the operator at the terminal for approval codes.
#[derive(Debug)]
pub struct TerminalApproval {
    interactive: bool,
}

impl TerminalApproval {
    pub fn new() -> Self {
        Self {
            interactive: std::io::stdin().is_terminal(),
        }
    }
}

impl Default for TerminalApproval {
    fn default() -> Self {
        Self::new()
    }
}

fn ask(message: &str) -> Result<String> {
    eprintln!("{} {}", "?".yellow().bold(), message);
    let code: String = Input::new()
        .with_prompt("Approval code")
        .allow_empty(true)
        .interact_text()?;
    Ok(code)
}

impl ApprovalProvider for TerminalApproval {
    fn prompt(&self, message: &str) -> convoy_core::Result<String> {
        if !self.interactive {
            return Err(convoy_core::Error::cancelled(
                "Approval requires an interactive terminal",
            ));
        }
        ask(message).map_err(CliError::into_core)
    }
}
