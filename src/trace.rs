//! Lazy trace-layer installation for preloaded processes.
//!
//! The library is loaded into arbitrary host processes, so a subscriber is
//! only installed when the operator asks for one via `EXECGATE_LOG`, and
//! `try_init` lets a host that already installed its own subscriber win.

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the trace filter directive (e.g. `debug`,
/// `execgate=trace`). Unset means no subscriber is installed.
pub const LOG_ENV: &str = "EXECGATE_LOG";

pub(crate) fn init() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        if std::env::var_os(LOG_ENV).is_none() {
            return;
        }
        let filter =
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}
