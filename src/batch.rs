//! Batch orchestration.
//!
//! Jobs are planned synchronously, then handed to a rayon pool sized to the
//! concurrency limit. Workers push each [`JobResult`] into a channel as soon
//! as its process ends; [`BatchRun`] yields them in completion order and
//! [`BatchRun::into_report`] restores submission order.
//!
//! Cancelling stops dispatch only. Processes already running are left to
//! finish unless the runner has a timeout.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver};
use rayon::ThreadPoolBuilder;
use tracing::{error, info, warn};

use crate::command::CommandBuilder;
use crate::error::{Error, Result};
use crate::job::{plan_jobs, JobResult, TranscodeJob};
use crate::media::MediaFile;
use crate::paths::OutputNaming;
use crate::policy::StreamMappingPolicy;
use crate::report::BatchReport;
use crate::runner::{JobRunner, ProcessRunner};

/// Shared flag that stops a batch from dispatching further jobs.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct BatchOrchestrator<R: JobRunner = ProcessRunner> {
    runner: Arc<R>,
    naming: OutputNaming,
    builder: CommandBuilder,
    concurrency: usize,
}

impl Default for BatchOrchestrator<ProcessRunner> {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchOrchestrator<ProcessRunner> {
    pub fn new() -> Self {
        Self::with_runner(ProcessRunner::new())
    }
}

impl<R: JobRunner> BatchOrchestrator<R> {
    /// Defaults: `_combined.mkv` naming, `ffmpeg`, one job per CPU.
    pub fn with_runner(runner: R) -> Self {
        Self {
            runner: Arc::new(runner),
            naming: OutputNaming::default(),
            builder: CommandBuilder::default(),
            concurrency: num_cpus::get(),
        }
    }

    pub fn naming(mut self, naming: OutputNaming) -> Self {
        self.naming = naming;
        self
    }

    pub fn command_builder(mut self, builder: CommandBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit;
        self
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency
    }

    /// Plan every job and start dispatching.
    ///
    /// Planning errors (empty policy, unusable path, zero concurrency) are
    /// returned before any process is launched. Everything that happens to
    /// an individual job afterwards arrives as a [`JobResult`].
    pub fn run_batch(
        &self,
        files: impl IntoIterator<Item = MediaFile>,
        policy: &StreamMappingPolicy,
    ) -> Result<BatchRun> {
        if self.concurrency == 0 {
            return Err(Error::configuration("concurrency limit must be at least 1"));
        }
        let jobs = plan_jobs(files, &self.naming, &self.builder, policy)?;
        let total = jobs.len();
        let cancel = CancelHandle::new();

        if jobs.is_empty() {
            info!("no input files, nothing to do");
            return Ok(BatchRun::finished(cancel));
        }

        let workers = self.concurrency.min(total);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("remux-worker-{i}"))
            .build()?;
        info!(jobs = total, workers, "starting batch");

        let (tx, rx) = unbounded();
        let runner = Arc::clone(&self.runner);
        let flag = cancel.clone();

        let dispatcher = thread::Builder::new()
            .name("remux-dispatch".to_string())
            .spawn(move || {
                pool.scope_fifo(|scope| {
                    for job in jobs {
                        let tx = tx.clone();
                        let runner = &runner;
                        let flag = &flag;
                        scope.spawn_fifo(move |_| {
                            let result = if flag.is_cancelled() {
                                JobResult::cancelled(job)
                            } else {
                                run_guarded(&**runner, job)
                            };
                            log_result(&result);
                            // Receiver gone means the caller stopped listening.
                            let _ = tx.send(result);
                        });
                    }
                });
            })?;

        Ok(BatchRun {
            results: rx,
            collected: Vec::with_capacity(total),
            total,
            cancel,
            dispatcher: Some(dispatcher),
        })
    }

    /// Run a batch to completion, calling `on_result` as each job finishes.
    pub fn run_with<F>(
        &self,
        files: impl IntoIterator<Item = MediaFile>,
        policy: &StreamMappingPolicy,
        mut on_result: F,
    ) -> Result<BatchReport>
    where
        F: FnMut(&JobResult),
    {
        let mut run = self.run_batch(files, policy)?;
        for result in &mut run {
            on_result(&result);
        }
        Ok(run.into_report())
    }
}

/// A runner that panics still owes the batch a result for its job.
fn run_guarded<R: JobRunner>(runner: &R, job: TranscodeJob) -> JobResult {
    let fallback = job.clone();
    panic::catch_unwind(AssertUnwindSafe(|| runner.run(job))).unwrap_or_else(|_| {
        error!(job = fallback.index, "job runner panicked");
        JobResult::launch_failed(fallback, "job runner panicked")
    })
}

fn log_result(result: &JobResult) {
    let file = &result.job.source.display_name;
    match result.failure_kind() {
        None => info!(job = result.job.index, %file, elapsed = ?result.elapsed, "job succeeded"),
        Some(kind) => warn!(job = result.job.index, %file, exit_code = result.exit_code, "job failed: {kind}"),
    }
}

/// A batch in flight. Iterating yields each result once, in completion
/// order; the sequence ends when every job is terminal and cannot be
/// restarted.
pub struct BatchRun {
    results: Receiver<JobResult>,
    collected: Vec<JobResult>,
    total: usize,
    cancel: CancelHandle,
    dispatcher: Option<JoinHandle<()>>,
}

impl BatchRun {
    fn finished(cancel: CancelHandle) -> Self {
        // Sender dropped immediately, so the channel is already closed.
        let (_, rx) = unbounded();
        Self {
            results: rx,
            collected: Vec::new(),
            total: 0,
            cancel,
            dispatcher: None,
        }
    }

    /// Number of jobs submitted.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of results received so far.
    pub fn completed(&self) -> usize {
        self.collected.len()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        info!("cancelling batch, running jobs will finish");
        self.cancel.cancel();
    }

    /// Wait for all remaining jobs and return results in submission order.
    pub fn into_report(mut self) -> BatchReport {
        while self.next().is_some() {}
        if let Some(handle) = self.dispatcher.take() {
            if handle.join().is_err() {
                error!("batch dispatcher panicked");
            }
        }
        BatchReport::from_results(std::mem::take(&mut self.collected))
    }
}

impl Iterator for BatchRun {
    type Item = JobResult;

    fn next(&mut self) -> Option<JobResult> {
        let result = self.results.recv().ok()?;
        self.collected.push(result.clone());
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total - self.collected.len();
        (left, Some(left))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{FailureKind, JobStatus};
    use crate::policy::StreamMapping;
    use crossbeam_channel::{bounded, Sender};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Succeeds unless the input name contains "bad".
    struct NameRunner;

    impl JobRunner for NameRunner {
        fn run(&self, job: TranscodeJob) -> JobResult {
            let bad = job.source.display_name.contains("bad");
            let (code, err) = if bad { (1, "tool error") } else { (0, "") };
            JobResult::exited(job, Some(code), String::new(), err.into(), Duration::ZERO)
        }
    }

    /// Blocks every job until the test sends a release token.
    struct GateRunner {
        running: AtomicUsize,
        peak: AtomicUsize,
        started: Sender<usize>,
        release: Receiver<()>,
    }

    impl JobRunner for GateRunner {
        fn run(&self, job: TranscodeJob) -> JobResult {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.started.send(job.index).unwrap();
            self.release.recv().unwrap();
            self.running.fetch_sub(1, Ordering::SeqCst);
            JobResult::exited(job, Some(0), String::new(), String::new(), Duration::ZERO)
        }
    }

    /// Finishes jobs in reverse submission order.
    struct ReverseRunner {
        delay_per_rank: Duration,
        total: usize,
    }

    impl JobRunner for ReverseRunner {
        fn run(&self, job: TranscodeJob) -> JobResult {
            let rank = (self.total - job.index) as u32;
            thread::sleep(self.delay_per_rank * rank);
            JobResult::exited(job, Some(0), String::new(), String::new(), Duration::ZERO)
        }
    }

    struct PanicRunner;

    impl JobRunner for PanicRunner {
        fn run(&self, _job: TranscodeJob) -> JobResult {
            panic!("boom");
        }
    }

    fn files(names: &[&str]) -> Vec<MediaFile> {
        names
            .iter()
            .map(|n| MediaFile::from_path(format!("/media/{n}")))
            .collect()
    }

    #[test]
    fn partial_failures_are_isolated() {
        let names = ["a.mp4", "bad1.mp4", "c.mp4", "bad2.avi", "e.mkv"];
        let report = BatchOrchestrator::with_runner(NameRunner)
            .concurrency(2)
            .run_with(files(&names), &StreamMappingPolicy::default(), |_| {})
            .unwrap();

        assert_eq!(report.len(), 5);
        assert_eq!(report.failed(), 2);
        assert_eq!(report.succeeded(), 3);
        let order: Vec<_> = report
            .results()
            .iter()
            .map(|r| r.job.source.display_name.as_str())
            .collect();
        assert_eq!(order, names);
    }

    #[test]
    fn report_restores_submission_order() {
        let names = ["0.mp4", "1.mp4", "2.mp4", "3.mp4"];
        let runner = ReverseRunner {
            delay_per_rank: Duration::from_millis(30),
            total: names.len(),
        };
        let mut run = BatchOrchestrator::with_runner(runner)
            .concurrency(4)
            .run_batch(files(&names), &StreamMappingPolicy::default())
            .unwrap();

        let first = run.next().unwrap();
        assert_eq!(first.job.index, 3, "fastest job should arrive first");

        let report = run.into_report();
        let indices: Vec<_> = report.results().iter().map(|r| r.job.index).collect();
        assert_eq!(indices, [0, 1, 2, 3]);
    }

    #[test]
    fn never_exceeds_concurrency_limit() {
        const LIMIT: usize = 2;
        const JOBS: usize = 6;
        let (started_tx, started_rx) = unbounded();
        let (release_tx, release_rx) = bounded(0);
        let runner = GateRunner {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            started: started_tx,
            release: release_rx,
        };
        let orchestrator = BatchOrchestrator::with_runner(runner).concurrency(LIMIT);
        let names: Vec<String> = (0..JOBS).map(|i| format!("{i}.mp4")).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let run = orchestrator
            .run_batch(files(&names), &StreamMappingPolicy::default())
            .unwrap();

        let running = || orchestrator.runner.running.load(Ordering::SeqCst);

        for _ in 0..LIMIT {
            started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        // All slots are held by blocked jobs, so nothing else may start.
        assert!(started_rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(running(), LIMIT);

        // Each release frees exactly one slot.
        for _ in LIMIT..JOBS {
            release_tx.send(()).unwrap();
            started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert!(running() <= LIMIT);
        }
        for _ in 0..LIMIT {
            release_tx.send(()).unwrap();
        }

        let report = run.into_report();
        assert_eq!(report.len(), JOBS);
        assert!(report.failed() == 0);
        let peak = orchestrator.runner.peak.load(Ordering::SeqCst);
        assert!(peak <= LIMIT, "peak concurrency {peak} exceeded {LIMIT}");
        assert_eq!(peak, LIMIT);
    }

    #[test]
    fn cancel_stops_dispatch_but_reports_every_job() {
        let (started_tx, started_rx) = unbounded();
        let (release_tx, release_rx) = bounded(0);
        let runner = GateRunner {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            started: started_tx,
            release: release_rx,
        };
        let run = BatchOrchestrator::with_runner(runner)
            .concurrency(1)
            .run_batch(files(&["a.mp4", "b.mp4", "c.mp4"]), &StreamMappingPolicy::default())
            .unwrap();

        assert_eq!(started_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 0);
        run.cancel();
        release_tx.send(()).unwrap();

        let report = run.into_report();
        let statuses: Vec<_> = report.results().iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            [
                JobStatus::Success,
                JobStatus::Failure(FailureKind::Cancelled),
                JobStatus::Failure(FailureKind::Cancelled),
            ]
        );
    }

    #[test]
    fn empty_input_completes_immediately() {
        let mut run = BatchOrchestrator::with_runner(PanicRunner)
            .run_batch(Vec::new(), &StreamMappingPolicy::default())
            .unwrap();
        assert_eq!(run.total(), 0);
        assert!(run.next().is_none());
        assert!(run.into_report().is_empty());
    }

    #[test]
    fn empty_policy_fails_before_any_job() {
        let err = BatchOrchestrator::with_runner(PanicRunner)
            .run_batch(files(&["a.mp4"]), &StreamMappingPolicy::new(vec![]))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = BatchOrchestrator::with_runner(NameRunner)
            .concurrency(0)
            .run_batch(files(&["a.mp4"]), &StreamMappingPolicy::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn panicking_runner_still_yields_a_result() {
        let report = BatchOrchestrator::with_runner(PanicRunner)
            .concurrency(1)
            .run_with(
                files(&["a.mp4"]),
                &StreamMappingPolicy::new(vec![StreamMapping::video(0)]),
                |_| {},
            )
            .unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report.results()[0].failure_kind(), Some(FailureKind::Launch));
    }

    #[test]
    fn callback_sees_every_result() {
        let mut seen = Vec::new();
        let report = BatchOrchestrator::with_runner(NameRunner)
            .concurrency(3)
            .run_with(
                files(&["a.mp4", "bad.mp4", "c.mp4"]),
                &StreamMappingPolicy::default(),
                |r| seen.push(r.job.index),
            )
            .unwrap();
        seen.sort_unstable();
        assert_eq!(seen, [0, 1, 2]);
        assert_eq!(report.len(), 3);
    }
}
