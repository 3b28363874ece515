//! Batch remuxing of media files through an external tool.
//!
//! For every input file the crate derives an output path, builds an argument
//! vector that selects specific streams and copies them into a new container,
//! and runs the tool with bounded concurrency. One job failing never affects
//! the others; every job ends up as a [`JobResult`] in a [`BatchReport`].
//!
//! ```no_run
//! use remux_batch::{BatchOrchestrator, MediaFile, StreamMappingPolicy};
//!
//! # fn main() -> remux_batch::Result<()> {
//! let files = vec![
//!     MediaFile::from_path("/a/video1.mp4"),
//!     MediaFile::from_path("/a/video2.avi"),
//! ];
//! let report = BatchOrchestrator::new()
//!     .concurrency(2)
//!     .run_with(files, &StreamMappingPolicy::default(), |result| {
//!         println!("{}: {:?}", result.job.source.display_name, result.status);
//!     })?;
//! println!("{} ok, {} failed", report.succeeded(), report.failed());
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod command;
pub mod config;
pub mod error;
pub mod job;
pub mod media;
pub mod paths;
pub mod policy;
pub mod report;
pub mod runner;
pub mod tools;

pub use batch::{BatchOrchestrator, BatchRun, CancelHandle};
pub use command::{CommandBuilder, CommandSpec};
pub use config::Settings;
pub use error::{Error, Result};
pub use job::{FailureKind, JobResult, JobStatus, TranscodeJob};
pub use media::MediaFile;
pub use paths::OutputNaming;
pub use policy::{StreamKind, StreamMapping, StreamMappingPolicy};
pub use report::{BatchOutcome, BatchReport};
pub use runner::{Execution, JobRunner, ProcessRunner};
pub use tools::MediaInfo;
