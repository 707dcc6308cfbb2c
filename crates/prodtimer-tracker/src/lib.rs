//! Tracks how long one chosen application has been running.
//!
//! [`monitor`] answers whether the target executable is alive, [`session`]
//! turns those answers and user toggles into elapsed time, [`recorder`] ties
//! the two together and hands finished sessions to [`store`]. [`guard`] keeps a
//! second process from rewriting the same data file.

pub mod config;
pub mod guard;
pub mod monitor;
pub mod recorder;
pub mod session;
pub mod store;

pub use guard::DataFileGuard;
pub use monitor::{
    spawn_poll_worker, ActivityTracker, PollResult, PollWorker, ProcessTable, SystemProcessTable,
};
pub use recorder::Recorder;
pub use session::{format_elapsed, unix_seconds_now, PauseCause, Phase, SessionTimer, Transition};
pub use store::{AppData, AppStatistics, SessionRecord, Store, TargetApp};

use tracing_subscriber::EnvFilter;

/// Logs to stderr, `info` unless `RUST_LOG` says otherwise.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
