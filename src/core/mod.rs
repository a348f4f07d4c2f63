/*!
 * Core Module
 * Error taxonomy, configuration and build dependencies
 */

pub mod config;
pub mod deps;
pub mod errors;

// Re-export for convenience
pub use config::{CrashReporterOrder, HostConfig, ServerConfig};
pub use deps::{ensure_deps, Backend, BuildConfig, GcMode};
pub use errors::*;
