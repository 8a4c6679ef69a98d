//! Tracker launcher.

use opendmtp::config::CONFIG;
use opendmtp::{log_banner, print_system_failure, run};
use tracing_subscriber::EnvFilter;

/// Program entry point.
fn main() {
    if CONFIG.debug() {
        println!("Debug mode active");
    }
    init_loggers();
    log_banner();

    if let Err(e) = run() {
        print_system_failure(&e, "Error running the OpenDMTP client");
        std::process::exit(1);
    }
}

/// Initializes the tracing subscriber. `RUST_LOG` overrides the level
/// derived from the debug flag.
fn init_loggers() {
    let default_level = if CONFIG.debug() { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
