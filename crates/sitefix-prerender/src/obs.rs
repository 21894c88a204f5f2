//! Structured log events for the prerender run.
//!
//! Every retried operation reports its attempt number through one of these
//! helpers, so an operator can follow a run from the scrollback alone.

use tracing::{error, info, warn};

/// Span tagging everything logged during one run. Attach it to the run
/// future with `tracing::Instrument` rather than entering it across awaits.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("sitefix.prerender", run_id = %run_id)
}

pub fn emit_run_started(run_id: &str, routes: usize) {
    info!(event = "run.started", run_id = %run_id, routes = routes);
}

pub fn emit_run_finished(run_id: &str, duration_ms: u64, written: usize, failed: usize) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        written = written,
        failed = failed,
    );
}

pub fn emit_server_attempt(port: u16, attempt: u32, max_attempts: u32) {
    info!(event = "server.attempt", port = port, attempt = attempt, max_attempts = max_attempts);
}

pub fn emit_server_attempt_failed(port: u16, attempt: u32, reason: &str) {
    warn!(event = "server.attempt_failed", port = port, attempt = attempt, reason = %reason);
}

pub fn emit_server_ready(port: u16, attempt: u32, elapsed_ms: u64) {
    info!(event = "server.ready", port = port, attempt = attempt, elapsed_ms = elapsed_ms);
}

pub fn emit_route_attempt(route: &str, attempt: u32, max_attempts: u32) {
    info!(event = "route.attempt", route = %route, attempt = attempt, max_attempts = max_attempts);
}

pub fn emit_route_retry(route: &str, attempt: u32, reason: &str, delay_ms: u64) {
    warn!(
        event = "route.retry",
        route = %route,
        attempt = attempt,
        reason = %reason,
        delay_ms = delay_ms,
    );
}

pub fn emit_route_written(route: &str, path: &std::path::Path, bytes: usize) {
    info!(event = "route.written", route = %route, path = %path.display(), bytes = bytes);
}

pub fn emit_route_failed(route: &str, attempts: u32, reason: &str) {
    error!(event = "route.failed", route = %route, attempts = attempts, reason = %reason);
}
