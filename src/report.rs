//! Batch aggregate and failure diagnostics.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::job::JobResult;

/// Lines in ffmpeg's stderr that usually explain a failure.
static DIAGNOSTIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(error|invalid|no such file|matches no streams|not found|permission denied|already exists|timeout|cancelled|failed)",
    )
    .expect("valid diagnostic regex")
});

/// How a finished batch went, as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    /// No files were submitted.
    NothingToDo,
    AllSucceeded,
    PartialFailure,
    AllFailed,
}

/// Results of a completed batch, in submission order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    results: Vec<JobResult>,
}

impl BatchReport {
    /// Sort arbitrarily ordered results back into submission order.
    pub fn from_results(mut results: Vec<JobResult>) -> Self {
        results.sort_by_key(|r| r.job.index);
        Self { results }
    }

    pub fn results(&self) -> &[JobResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<JobResult> {
        self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    pub fn failures(&self) -> impl Iterator<Item = &JobResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    pub fn outcome(&self) -> BatchOutcome {
        match (self.succeeded(), self.failed()) {
            (0, 0) => BatchOutcome::NothingToDo,
            (_, 0) => BatchOutcome::AllSucceeded,
            (0, _) => BatchOutcome::AllFailed,
            _ => BatchOutcome::PartialFailure,
        }
    }
}

/// Pick the stderr lines worth showing for a failed job. Falls back to the
/// last non-empty line when nothing looks like an error.
pub fn diagnostic_lines(stderr: &str) -> Vec<&str> {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let matched: Vec<&str> = lines
        .iter()
        .copied()
        .filter(|l| DIAGNOSTIC.is_match(l))
        .collect();
    if matched.is_empty() {
        lines.last().copied().into_iter().collect()
    } else {
        matched
    }
}
