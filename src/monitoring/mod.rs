/*!
 * Monitoring
 * Tracing setup and invocation spans
 */

mod tracer;

pub use tracer::{generate_trace_id, init_tracing, span_invocation, InvocationSpan};
