//! Run configuration
//!
//! Everything that influences a single run is carried in [`RunConfig`] and
//! handed to the [`Orchestrator`](crate::Orchestrator) explicitly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default nesting limit for composite nodes
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Options for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunConfig {
    /// Overall deadline in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Validate and plan without executing any node
    pub dry_run: bool,

    /// Skip environment preflight checks
    pub skip_preflight: bool,

    /// Maximum nesting depth of composite nodes
    pub max_depth: usize,

    /// Worker cap for parallel nodes that do not set `maxWorkers`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_max_workers: Option<usize>,

    /// Base directory for relative file paths
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            dry_run: false,
            skip_preflight: false,
            max_depth: DEFAULT_MAX_DEPTH,
            default_max_workers: None,
            working_dir: None,
        }
    }
}

impl RunConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_skip_preflight(mut self, skip: bool) -> Self {
        self.skip_preflight = skip;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_default_max_workers(mut self, workers: usize) -> Self {
        self.default_max_workers = Some(workers);
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Resolve `path` against the working directory when it is relative
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        match &self.working_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}
