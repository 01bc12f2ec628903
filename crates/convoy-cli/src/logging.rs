//! Tracing setup for the binary

use tracing_subscriber::EnvFilter;

/// Install the global subscriber writing compact lines to stderr.
///
/// `RUST_LOG` selects the filter unless `verbose` forces debug output;
/// without either only warnings are shown.
pub fn init(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .compact()
        .try_init();
    if installed.is_ok() {
        tracing::debug!("Verbose mode enabled");
    }
}
