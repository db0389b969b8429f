//! Structured logging setup.
//!
//! ```toml
//! [logging]
//! default = "info"
//!
//! [logging.modules]
//! rag_advisor = "debug"
//! tower_http = "debug"
//! ```
//!
//! `RUST_LOG` takes precedence over the config table:
//!
//! ```bash
//! RUST_LOG=rag_advisor_core=trace rag serve
//! ```
//!
//! Logs go to stderr so command output on stdout stays machine-readable.

use std::sync::Once;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// HH:MM:SS.mmm
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Build the filter directive string for `config`.
pub fn filter_directives(config: &LoggingConfig) -> String {
    let mut directives = config.default.clone();
    let mut modules: Vec<_> = config.modules.iter().collect();
    modules.sort();
    for (module, level) in modules {
        directives.push_str(&format!(",{module}={level}"));
    }
    directives
}

/// Install the global subscriber. Only the first call takes effect.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::try_new(filter_directives(config))
                .unwrap_or_else(|_| EnvFilter::new("info"))
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_timer(CompactTime)
            .with_level(true)
            .with_filter(filter);

        // a subscriber may already be installed (e.g. by a test harness)
        let _ = tracing_subscriber::registry().with(fmt_layer).try_init();
    });
}

/// Install the subscriber with the default `[logging]` table.
pub fn init() {
    init_with_config(&LoggingConfig::default());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn directives_include_sorted_module_overrides() {
        let config = LoggingConfig {
            default: "warn".into(),
            modules: HashMap::from([
                ("tower_http".to_string(), "debug".to_string()),
                ("rag_advisor".to_string(), "trace".to_string()),
            ]),
        };
        assert_eq!(
            filter_directives(&config),
            "warn,rag_advisor=trace,tower_http=debug"
        );
    }

    #[test]
    fn init_is_idempotent() {
        init();
        init_with_config(&LoggingConfig::default());
    }
}
