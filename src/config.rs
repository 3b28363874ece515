//! Settings file support.
//!
//! Every field is optional. A file only needs the keys it changes:
//!
//! ```toml
//! [tool]
//! program = "/opt/ffmpeg/bin/ffmpeg"
//!
//! [naming]
//! suffix = "_remux"
//!
//! [policy]
//! mappings = ["v:0", "a:0"]
//!
//! [batch]
//! jobs = 2
//! timeout_secs = 3600
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::batch::BatchOrchestrator;
use crate::command::{CommandBuilder, DEFAULT_PROGRAM};
use crate::error::{Error, Result};
use crate::paths::OutputNaming;
use crate::policy::StreamMappingPolicy;
use crate::runner::ProcessRunner;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub tool: ToolSettings,

    #[serde(default)]
    pub naming: OutputNaming,

    #[serde(default)]
    pub policy: StreamMappingPolicy,

    #[serde(default)]
    pub batch: BatchSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ToolSettings {
    #[serde(default = "default_program")]
    pub program: PathBuf,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            program: default_program(),
        }
    }
}

fn default_program() -> PathBuf {
    PathBuf::from(DEFAULT_PROGRAM)
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BatchSettings {
    /// Maximum simultaneous tool processes.
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Per-job deadline; unset means jobs may run forever.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
            timeout_secs: None,
        }
    }
}

fn default_jobs() -> usize {
    num_cpus::get()
}

impl Settings {
    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading settings");
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Settings from `path` if given, otherwise defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.policy.validate()?;
        if self.batch.jobs == 0 {
            return Err(Error::configuration("batch.jobs must be at least 1"));
        }
        if self.batch.timeout_secs == Some(0) {
            return Err(Error::configuration("batch.timeout_secs must be positive"));
        }
        if self.naming.extension.is_empty() {
            return Err(Error::configuration("naming.extension must not be empty"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.batch.timeout_secs.map(Duration::from_secs)
    }

    pub fn orchestrator(&self) -> BatchOrchestrator<ProcessRunner> {
        BatchOrchestrator::with_runner(ProcessRunner::new().with_timeout(self.timeout()))
            .naming(self.naming.clone())
            .command_builder(CommandBuilder::new(&self.tool.program))
            .concurrency(self.batch.jobs)
    }
}
