/*!
 * Tracing
 * Structured logging setup and timed operation spans for the CLI
 */

use std::time::Instant;
use tracing::{debug, info, span, warn, Level};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Set to `1` or `true` for JSON log lines
pub const TRACE_JSON_ENV: &str = "OSAWAIT_TRACE_JSON";

/// Operations slower than this are logged at warn level
const SLOW_OPERATION_MS: u128 = 1000;

/// Initialize the global subscriber
///
/// Environment variables:
/// - RUST_LOG: filter directives (default: info)
/// - OSAWAIT_TRACE_JSON: JSON output (default: false)
///
/// Returns `false` if a subscriber was already installed.
pub fn init_tracing() -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var(TRACE_JSON_ENV)
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .is_ok()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_names(true)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .try_init()
            .is_ok()
    };

    if installed {
        debug!(json = use_json, "tracing initialized");
    }
    installed
}

/// Span timing one top-level operation; logs its duration when dropped
pub struct OperationSpan {
    span: tracing::Span,
    start: Instant,
    operation: &'static str,
}

impl OperationSpan {
    pub fn new(operation: &'static str) -> Self {
        let span = span!(Level::INFO, "operation", name = operation);
        Self {
            span,
            start: Instant::now(),
            operation,
        }
    }

    /// Enter the span on the current thread
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for OperationSpan {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let _entered = self.span.enter();

        if elapsed.as_millis() > SLOW_OPERATION_MS {
            warn!(
                operation = self.operation,
                duration_ms = elapsed.as_millis() as u64,
                slow = true,
                "operation completed"
            );
        } else {
            info!(
                operation = self.operation,
                duration_us = elapsed.as_micros() as u64,
                "operation completed"
            );
        }
    }
}

/// Start timing `operation`
pub fn span_operation(operation: &'static str) -> OperationSpan {
    OperationSpan::new(operation)
}
