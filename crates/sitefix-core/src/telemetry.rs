//! Tracing setup shared by the sitefix binaries.
//!
//! Without `RUST_LOG`, the sitefix crates log at the requested level and
//! everything else (the HTTP client, the runtime) only at `warn`, so probe
//! polling does not bury the orchestrator's own events. Only the first call
//! in a process installs a subscriber.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const SITEFIX_TARGETS: &[&str] = &["sitefix", "sitefix_core", "sitefix_prerender"];

/// Filter used when `RUST_LOG` is unset.
fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = String::from("warn");
    for target in SITEFIX_TARGETS {
        directives.push_str(&format!(",{target}={level}"));
    }
    directives
}

/// Initialise the global tracing subscriber.
///
/// `json` switches to newline-delimited JSON with span context, for the CI
/// log collector; the plain format keeps targets so mixed-crate output stays
/// attributable.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if json {
        registry
            .with(fmt::layer().json().with_current_span(true).with_span_list(false))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };
    if installed.is_ok() {
        tracing::debug!(level = %level, json, "tracing initialised");
    }
}
