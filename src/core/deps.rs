/*!
 * Build Dependencies
 * Verifies (and if needed builds) native artifacts the host links against
 */

use super::errors::{Result, StructuredError};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;
use tracing::{debug, info};

/// How guest code is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Compiled host with native capabilities (runtime API, GC)
    #[default]
    Native,
    /// Interpreter; native-only capabilities fail with UnsupportedOperation
    Interpreted,
}

impl FromStr for Backend {
    type Err = StructuredError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "native" => Ok(Backend::Native),
            "interpreted" | "interp" => Ok(Backend::Interpreted),
            other => Err(StructuredError::configuration(format!(
                "unknown backend '{other}' (expected native or interpreted)"
            ))),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Native => f.write_str("native"),
            Backend::Interpreted => f.write_str("interpreted"),
        }
    }
}

/// Memory-management library the host is built against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GcMode {
    /// Plain malloc, nothing to build
    #[default]
    None,
    /// Boehm-Demers-Weiser collector, linked from `libgc.a`
    Bdwgc,
}

impl FromStr for GcMode {
    type Err = StructuredError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" | "" => Ok(GcMode::None),
            "bdwgc" => Ok(GcMode::Bdwgc),
            other => Err(StructuredError::configuration(format!(
                "unknown gc '{other}' (expected none or bdwgc)"
            ))),
        }
    }
}

/// Build configuration of the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    pub backend: Backend,
    pub gc: GcMode,
    pub target: String,
    pub deps_dir: PathBuf,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Native,
            gc: GcMode::None,
            target: "native".to_string(),
            deps_dir: PathBuf::from("deps"),
        }
    }
}

/// Location of the prebuilt collector for `target`
pub fn bdwgc_artifact(deps_dir: &Path, target: &str) -> PathBuf {
    deps_dir.join("build").join(target).join("lib").join("libgc.a")
}

/// Make sure every external artifact `config` needs exists.
///
/// Returns the artifact path when one is required. A missing artifact is built with
/// `make`; if that fails the host cannot run and a ConfigurationError is returned.
pub fn ensure_deps(config: &BuildConfig) -> Result<Option<PathBuf>> {
    match config.gc {
        GcMode::None => {
            debug!("No native dependencies required");
            Ok(None)
        }
        GcMode::Bdwgc => ensure_bdwgc(&config.deps_dir, &config.target).map(Some),
    }
}

fn ensure_bdwgc(deps_dir: &Path, target: &str) -> Result<PathBuf> {
    let artifact = bdwgc_artifact(deps_dir, target);
    if artifact.is_file() {
        debug!(artifact = %artifact.display(), "bdwgc already built");
        return Ok(artifact);
    }

    info!(target, deps_dir = %deps_dir.display(), "Building bdwgc");
    let status = Command::new("make")
        .arg("-C")
        .arg(deps_dir)
        .arg("bdwgc")
        .arg(format!("TARGET={target}"))
        .status()
        .map_err(|e| StructuredError::configuration(format!("could not run make: {e}")))?;

    if !status.success() {
        return Err(StructuredError::configuration(format!(
            "building bdwgc for {target} failed ({status}); expected {}",
            artifact.display()
        )));
    }
    if !artifact.is_file() {
        return Err(StructuredError::configuration(format!(
            "make succeeded but {} is still missing",
            artifact.display()
        )));
    }
    Ok(artifact)
}
