/*!
 * Tracing
 * Structured logging for the host and the runtime API peer
 *
 * Logs always go to stderr; stdout belongs to the harness output.
 */

use crate::core::errors::StructuredError;
use std::io::IsTerminal;
use std::time::Instant;
use tracing::{debug, info, span, warn, Level};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};
use uuid::Uuid;

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - TRAP_HOST_TRACE_JSON: Enable JSON output (default: false)
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("TRAP_HOST_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(std::io::stderr().is_terminal())
                    .with_target(true)
                    .with_thread_names(true)
                    .compact(),
            )
            .try_init()
    };

    if installed.is_ok() {
        debug!(json = use_json, "Structured tracing initialized");
    }
}

/// Generate a unique trace ID for request correlation
pub fn generate_trace_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span covering one invocation from fetch to result
pub struct InvocationSpan {
    span: tracing::Span,
    start: Instant,
    trace_id: String,
}

impl InvocationSpan {
    pub fn new(request_id: &str) -> Self {
        let trace_id = generate_trace_id();
        let span = span!(
            Level::INFO,
            "invocation",
            trace_id = %trace_id,
            request_id = request_id,
            status = tracing::field::Empty,
            error = tracing::field::Empty,
            duration_us = tracing::field::Empty,
        );

        Self {
            span,
            start: Instant::now(),
            trace_id,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn record_status(&self, status: i32) {
        self.span.record("status", status);
    }

    pub fn record_error(&self, error: &StructuredError) {
        self.span.record("error", tracing::field::display(error));
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for InvocationSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        let _entered = self.span.enter();
        self.span.record("duration_us", duration.as_micros() as u64);

        if duration.as_secs() >= 1 {
            warn!(
                trace_id = %self.trace_id,
                duration_ms = duration.as_millis() as u64,
                slow = true,
                "slow invocation"
            );
        } else {
            info!(
                trace_id = %self.trace_id,
                duration_us = duration.as_micros() as u64,
                "invocation handled"
            );
        }
    }
}

/// Helper to create an invocation span
#[inline]
pub fn span_invocation(request_id: &str) -> InvocationSpan {
    InvocationSpan::new(request_id)
}
