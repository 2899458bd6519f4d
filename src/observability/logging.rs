//! Structured logging.
//!
//! # Responsibilities
//! - Initialize logging subsystem
//! - Configure log level from config, `--debug` and environment
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - `RUST_LOG` wins over config so operators can override per module

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directive for the given base level.
pub fn filter_directive(level: &str, debug: bool) -> String {
    let level = if debug { "debug" } else { level };
    format!("rotation_proxy={level},tower_http={level}")
}

/// Install the global tracing subscriber.
pub fn init_logging(level: &str, debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(level, debug)));

    let fmt = tracing_subscriber::fmt::layer()
        .with_file(debug)
        .with_line_number(debug);

    // A second init (e.g. from tests) is harmless
    let _ = tracing_subscriber::registry().with(filter).with(fmt).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_overrides_level() {
        assert_eq!(
            filter_directive("warn", false),
            "rotation_proxy=warn,tower_http=warn"
        );
        assert_eq!(
            filter_directive("warn", true),
            "rotation_proxy=debug,tower_http=debug"
        );
    }
}
