/*!
 * Configuration
 * Environment-driven settings for the host and the runtime API peer
 */

use super::deps::{Backend, BuildConfig, GcMode};
use super::errors::{Result, StructuredError};
use crate::engine::GuestProgram;
use crate::signals::OwnershipPolicy;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 9001;
pub const DEFAULT_REQUEST_ID: &str = "test-request-123";
pub const DEFAULT_BODY: &str = "test-body-from-mock";

/// Read `key`, falling back to `default` when unset
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr<Err = StructuredError>,
{
    match env::var(key) {
        Ok(value) => value.trim().parse(),
        Err(_) => Ok(default),
    }
}

fn env_millis(key: &str, default: Duration) -> Result<Duration> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| StructuredError::configuration(format!("{key}: {e}"))),
        Err(_) => Ok(default),
    }
}

/// When the diagnostic dumper installs relative to the trap interceptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CrashReporterOrder {
    #[default]
    None,
    BeforeInterceptor,
    AfterInterceptor,
}

impl FromStr for CrashReporterOrder {
    type Err = StructuredError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" | "" => Ok(CrashReporterOrder::None),
            "before" => Ok(CrashReporterOrder::BeforeInterceptor),
            "after" => Ok(CrashReporterOrder::AfterInterceptor),
            other => Err(StructuredError::configuration(format!(
                "unknown crash reporter order '{other}' (expected none, before or after)"
            ))),
        }
    }
}

/// Settings for the `trap-host` binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub guest: GuestProgram,
    pub crash_reporter: CrashReporterOrder,
    pub ownership: OwnershipPolicy,
    pub build: BuildConfig,
    pub request_timeout: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            guest: GuestProgram::Echo,
            crash_reporter: CrashReporterOrder::None,
            ownership: OwnershipPolicy::ReclaimBeforeUse,
            build: BuildConfig::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl HostConfig {
    /// Load from `TRAP_HOST_*` variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let build = BuildConfig {
            backend: env_or::<Backend>("TRAP_HOST_BACKEND", defaults.build.backend)?,
            gc: env_or::<GcMode>("TRAP_HOST_GC", defaults.build.gc)?,
            target: env::var("TRAP_HOST_TARGET").unwrap_or(defaults.build.target),
            deps_dir: env::var("TRAP_HOST_DEPS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.build.deps_dir),
        };
        Ok(Self {
            guest: env_or("TRAP_HOST_GUEST", defaults.guest)?,
            crash_reporter: env_or("TRAP_HOST_CRASH_REPORTER", defaults.crash_reporter)?,
            ownership: env_or("TRAP_HOST_OWNERSHIP", defaults.ownership)?,
            build,
            request_timeout: env_millis("TRAP_HOST_REQUEST_TIMEOUT_MS", defaults.request_timeout)?,
        })
    }
}

/// Settings for the single-shot runtime API peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub request_id: String,
    pub body: String,
    pub method: String,
    /// How long the waiter blocks for a response
    pub wait_timeout: Duration,
    /// Advertised in `Lambda-Runtime-Deadline-Ms`
    pub deadline: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            request_id: DEFAULT_REQUEST_ID.to_string(),
            body: DEFAULT_BODY.to_string(),
            method: "GET".to_string(),
            wait_timeout: Duration::from_secs(10),
            deadline: Duration::from_secs(3),
        }
    }
}

impl ServerConfig {
    /// Defaults with `MOCK_RUNTIME_*` overrides applied
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            request_id: env::var("MOCK_RUNTIME_REQUEST_ID").unwrap_or(defaults.request_id),
            body: env::var("MOCK_RUNTIME_BODY").unwrap_or(defaults.body),
            wait_timeout: env_millis("MOCK_RUNTIME_TIMEOUT_MS", defaults.wait_timeout)?,
            ..defaults
        })
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }
}
