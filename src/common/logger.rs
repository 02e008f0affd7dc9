use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::configs::Config;

/// Install the global tracing subscriber from the logging config.
///
/// `RUST_LOG` wins over the config file when set. Safe to call once per
/// process; embedders that already install their own subscriber should skip
/// this entirely.
pub fn init(config: &Config) {
    let log_level = config
        .logging
        .as_ref()
        .and_then(|l| l.level.as_deref())
        .unwrap_or("info");

    let filters = config
        .logging
        .as_ref()
        .and_then(|l| l.filters.as_deref())
        .unwrap_or("");

    let filter_str = if filters.is_empty() {
        format!("{},log=error", log_level)
    } else {
        format!("{},log=error,{}", log_level, filters)
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_str));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_ansi(true))
        .init();
}
