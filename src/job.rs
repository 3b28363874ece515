//! Jobs and their outcomes.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::{CommandBuilder, CommandSpec};
use crate::error::Result;
use crate::media::MediaFile;
use crate::paths::OutputNaming;
use crate::policy::StreamMappingPolicy;

/// Exit code recorded when the process produced none of its own.
pub const NO_EXIT_CODE: i32 = -1;

/// One planned tool invocation. `index` is the submission position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeJob {
    pub index: usize,
    pub source: MediaFile,
    pub output: PathBuf,
    pub command: CommandSpec,
}

impl TranscodeJob {
    pub fn plan(
        index: usize,
        source: MediaFile,
        naming: &OutputNaming,
        builder: &CommandBuilder,
        policy: &StreamMappingPolicy,
    ) -> Result<Self> {
        let output = naming.derive(&source.path)?;
        let command = builder.build(&source.path, &output, policy)?;
        Ok(Self {
            index,
            source,
            output,
            command,
        })
    }
}

/// Plan every job up front. The policy is checked before anything else, so
/// an empty policy fails even for an empty selection.
pub fn plan_jobs(
    files: impl IntoIterator<Item = MediaFile>,
    naming: &OutputNaming,
    builder: &CommandBuilder,
    policy: &StreamMappingPolicy,
) -> Result<Vec<TranscodeJob>> {
    policy.validate()?;
    files
        .into_iter()
        .enumerate()
        .map(|(index, file)| TranscodeJob::plan(index, file, naming, builder, policy))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The program could not be started at all.
    Launch,
    /// The program ran and exited non-zero (or was killed by a signal).
    Process,
    /// The per-job deadline passed and the process was killed.
    Timeout,
    /// The batch was cancelled before this job was dispatched.
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::Launch => "launch error",
            FailureKind::Process => "process failure",
            FailureKind::Timeout => "timed out",
            FailureKind::Cancelled => "cancelled",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "kind", rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    Failure(FailureKind),
}

/// Terminal outcome of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job: TranscodeJob,
    pub status: JobStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub elapsed: Duration,
}

impl JobResult {
    /// Classify a finished process by its exit code.
    pub fn exited(
        job: TranscodeJob,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
        elapsed: Duration,
    ) -> Self {
        let status = match exit_code {
            Some(0) => JobStatus::Success,
            _ => JobStatus::Failure(FailureKind::Process),
        };
        Self {
            job,
            status,
            stdout,
            stderr,
            exit_code: exit_code.unwrap_or(NO_EXIT_CODE),
            elapsed,
        }
    }

    pub fn launch_failed(job: TranscodeJob, message: impl Into<String>) -> Self {
        Self::failed(job, FailureKind::Launch, String::new(), message.into(), Duration::ZERO)
    }

    pub fn timed_out(
        job: TranscodeJob,
        timeout: Duration,
        stdout: String,
        mut stderr: String,
        elapsed: Duration,
    ) -> Self {
        if !stderr.is_empty() && !stderr.ends_with('\n') {
            stderr.push('\n');
        }
        stderr.push_str(&format!("killed after exceeding timeout of {timeout:?}"));
        Self::failed(job, FailureKind::Timeout, stdout, stderr, elapsed)
    }

    pub fn cancelled(job: TranscodeJob) -> Self {
        Self::failed(
            job,
            FailureKind::Cancelled,
            String::new(),
            "batch cancelled before job started".to_string(),
            Duration::ZERO,
        )
    }

    fn failed(
        job: TranscodeJob,
        kind: FailureKind,
        stdout: String,
        stderr: String,
        elapsed: Duration,
    ) -> Self {
        Self {
            job,
            status: JobStatus::Failure(kind),
            stdout,
            stderr,
            exit_code: NO_EXIT_CODE,
            elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self.status {
            JobStatus::Success => None,
            JobStatus::Failure(kind) => Some(kind),
        }
    }
}
