//! Logging initialization.
//!
//! The crate logs through the `log` facade. Hosts that do not install a
//! logger of their own can call one of these functions once at startup;
//! later calls return `false` and leave the existing logger in place.

use log::LevelFilter;

use crate::config::LoggingConfig;

/// Install a console logger showing records at `level` and above.
pub fn init(level: LevelFilter) -> bool {
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp_millis()
        .try_init()
        .is_ok()
}

/// Install a console logger configured by `RUST_LOG`, falling back to
/// `default` when the variable is unset.
pub fn init_from_env(default: LevelFilter) -> bool {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default.to_string()))
        .format_timestamp_millis()
        .try_init()
        .is_ok()
}

/// Install a console logger for the `[logging]` configuration section.
/// `RUST_LOG` still takes precedence. An unknown level falls back to `info`.
pub fn init_from_config(config: &LoggingConfig) -> bool {
    init_from_env(parse_level(&config.level))
}

fn parse_level(level: &str) -> LevelFilter {
    level.trim().parse().unwrap_or(LevelFilter::Info)
}
