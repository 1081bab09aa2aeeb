//! Unified logging for watcher output.
//!
//! Provides compact timestamped logging with per-module level configuration.
//! Supports `RUST_LOG` environment variable for runtime overrides.
//!
//! # Configuration
//!
//! ```toml
//! [logging]
//! default = "warn"  # quiet by default
//!
//! [logging.modules]
//! "watchfolder::watcher" = "debug"
//! ```
//!
//! # Environment Variable
//!
//! `RUST_LOG` takes precedence over config:
//! ```bash
//! RUST_LOG=debug watchfolder run
//! ```

use std::sync::Once;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Compact time format: HH:MM:SS.mmm
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Build the filter directive string from config.
fn filter_directives(config: &LoggingConfig) -> String {
    let mut filter_str = config.default.clone();
    for (module, level) in &config.modules {
        filter_str.push_str(&format!(",{module}={level}"));
    }
    filter_str
}

/// Initialize logging with configuration.
///
/// Call once at startup. Safe to call multiple times (only first call takes effect).
/// The `RUST_LOG` environment variable takes precedence over config settings.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(filter_directives(config))
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_timer(CompactTime)
            .with_level(true)
            .with_filter(filter);

        // try_init: a test harness may already own the global subscriber
        let _ = tracing_subscriber::registry().with(fmt_layer).try_init();
    });
}

/// Initialize logging with default configuration.
pub fn init() {
    init_with_config(&LoggingConfig::default());
}

/// Log an event with component context.
///
/// The component always lands in a `component` field. Events about a file or
/// folder pass it as `path = ...` (anything with `.display()`), optionally
/// followed by more `name = value` fields recorded with `Display`. Anything
/// else is formatted into the message.
///
/// # Examples
/// ```ignore
/// log_event!("pipeline", "moved", path = dest);
/// log_event!("pipeline", "upload", path = dest, task = settings.name);
/// log_event!("registry", "released", "{count} folders");
/// log_event!("registry", "synchronized");
/// ```
#[macro_export]
macro_rules! log_event {
    ($component:expr, $event:expr) => {
        tracing::info!(component = $component, "{}", $event)
    };
    ($component:expr, $event:expr, path = $path:expr $(, $field:ident = $value:expr)* $(,)?) => {
        tracing::info!(
            component = $component,
            path = %$path.display(),
            $($field = %$value,)*
            "{}",
            $event
        )
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::info!(component = $component, "{}: {}", $event, format_args!($($arg)*))
    };
}

/// Debug-level counterpart of [`log_event!`].
///
/// # Examples
/// ```ignore
/// debug_event!("watcher", "released", path = folder);
/// ```
#[macro_export]
macro_rules! debug_event {
    ($component:expr, $event:expr) => {
        tracing::debug!(component = $component, "{}", $event)
    };
    ($component:expr, $event:expr, path = $path:expr $(, $field:ident = $value:expr)* $(,)?) => {
        tracing::debug!(
            component = $component,
            path = %$path.display(),
            $($field = %$value,)*
            "{}",
            $event
        )
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::debug!(component = $component, "{}: {}", $event, format_args!($($arg)*))
    };
}
