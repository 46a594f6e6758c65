//! Logger setup shared by the binaries.
//!
//! Logs go to stderr; stdout carries protocol frames.

use env_logger::{Builder, Env, Target};

/// Default filter when neither `RUST_LOG` nor a configured level is present.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Initialize `env_logger`. `RUST_LOG` wins over `default_level`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init(default_level: Option<&str>) {
    let env = Env::default().default_filter_or(default_level.unwrap_or(DEFAULT_LOG_LEVEL));
    let _ = Builder::from_env(env)
        .target(Target::Stderr)
        .format_timestamp_millis()
        .try_init();
}
