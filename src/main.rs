use std::collections::HashMap;
use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{info, warn};
use walkdir::WalkDir;

use remux_batch::paths::normalize_extension;
use remux_batch::report::diagnostic_lines;
use remux_batch::{
    tools, BatchOutcome, BatchReport, CancelHandle, JobResult, MediaFile, MediaInfo, OutputNaming,
    Settings, StreamMapping,
};

#[derive(Parser)]
#[command(name = "remux_batch", version)]
#[command(about = "Remaps selected audio/video streams of media files into new containers using ffmpeg")]
struct Args {
    /// Files to remux; directories are scanned for matching extensions
    inputs: Vec<PathBuf>,

    /// Extensions picked up when scanning directories
    #[arg(short = 'e', long, value_delimiter = ',', default_value = "mp4,mkv,avi")]
    extensions: Vec<String>,

    /// Stream to include, e.g. v:0 or a:1 (repeatable, replaces the default v:0,a:0,a:1)
    #[arg(short = 'm', long = "map", value_delimiter = ',')]
    maps: Vec<StreamMapping>,

    /// Re-encode video instead of copying it
    #[arg(long)]
    no_copy_video: bool,

    /// Re-encode audio instead of copying it
    #[arg(long)]
    no_copy_audio: bool,

    /// Re-encode subtitles instead of copying them
    #[arg(long)]
    no_copy_subtitle: bool,

    /// Overwrite existing output files
    #[arg(short = 'y', long)]
    overwrite: bool,

    /// Number of files to process in parallel (default: number of CPU cores)
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Kill a job after this many seconds
    #[arg(short = 't', long)]
    timeout: Option<u64>,

    /// Suffix appended to the output file name (default: _combined)
    #[arg(long)]
    suffix: Option<String>,

    /// Output container extension (default: mkv)
    #[arg(long)]
    output_extension: Option<String>,

    /// Path to the ffmpeg binary
    #[arg(long)]
    ffmpeg: Option<PathBuf>,

    /// TOML settings file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Only list title, duration and streams of each input; nothing is written
    #[arg(long)]
    analyze: bool,

    /// Before remuxing, warn about inputs lacking a stream the mapping selects
    #[arg(long)]
    check_streams: bool,

    /// Print the final report as JSON
    #[arg(long)]
    json: bool,

    /// Disable the progress bar
    #[arg(long)]
    no_progress: bool,

    /// More log output (-v info, -vv debug)
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "remux_batch=warn",
        1 => "remux_batch=info",
        _ => "remux_batch=debug",
    };
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default.to_string());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: &Args) -> Result<ExitCode> {
    let settings = resolve_settings(args)?;

    let files = collect_inputs(&args.inputs, &args.extensions)?;
    if files.is_empty() {
        println!("Nothing to do: no matching input files.");
        return Ok(ExitCode::from(2));
    }

    let version = tools::tool_version(&settings.tool.program)
        .with_context(|| format!("{} is not usable", settings.tool.program.display()))?;
    info!("{version}");

    if args.analyze {
        return run_analysis(&files, &settings, args.json);
    }

    preflight(&files, &settings.naming, settings.policy.overwrite);
    if args.check_streams {
        check_streams(&files, &settings)?;
    }

    let orchestrator = settings.orchestrator();
    let start_time = Instant::now();
    let mut run = orchestrator.run_batch(files, &settings.policy)?;

    if std::io::stdin().is_terminal() && !args.json {
        spawn_control_thread(run.cancel_handle());
    }

    let pb = if args.json || args.no_progress {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(run.total() as u64)
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files {msg}")?
            .progress_chars("#>-"),
    );

    for result in &mut run {
        pb.inc(1);
        if !args.json {
            emit(&pb, &describe(&result));
        }
    }
    pb.finish_and_clear();

    let report = run.into_report();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report, start_time);
    }

    Ok(match report.outcome() {
        BatchOutcome::AllSucceeded => ExitCode::SUCCESS,
        BatchOutcome::NothingToDo => ExitCode::from(2),
        BatchOutcome::PartialFailure | BatchOutcome::AllFailed => ExitCode::FAILURE,
    })
}

/// Settings file first, then command-line overrides.
fn resolve_settings(args: &Args) -> Result<Settings> {
    let mut settings = Settings::load_or_default(args.config.as_deref())
        .with_context(|| match &args.config {
            Some(path) => format!("failed to load settings from {}", path.display()),
            None => "failed to load default settings".to_string(),
        })?;

    if let Some(ref program) = args.ffmpeg {
        settings.tool.program = program.clone();
    }
    if let Some(ref suffix) = args.suffix {
        settings.naming.suffix = suffix.clone();
    }
    if let Some(ref ext) = args.output_extension {
        settings.naming.extension = normalize_extension(ext);
    }
    if !args.maps.is_empty() {
        settings.policy.mappings = args.maps.clone();
    }
    if args.no_copy_video {
        settings.policy.copy_video = false;
    }
    if args.no_copy_audio {
        settings.policy.copy_audio = false;
    }
    if args.no_copy_subtitle {
        settings.policy.copy_subtitle = false;
    }
    if args.overwrite {
        settings.policy.overwrite = true;
    }
    if let Some(jobs) = args.jobs {
        settings.batch.jobs = jobs;
    }
    if let Some(secs) = args.timeout {
        settings.batch.timeout_secs = Some(secs);
    }

    settings.validate()?;
    Ok(settings)
}

/// Expand directories, keep plain paths as given. Paths that do not exist are
/// kept too; they fail as individual jobs.
fn collect_inputs(inputs: &[PathBuf], extensions: &[String]) -> Result<Vec<MediaFile>> {
    let extensions: Vec<String> = extensions
        .iter()
        .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
        .collect();

    let mut files = Vec::new();
    for input in inputs {
        let input = std::path::absolute(input)
            .with_context(|| format!("cannot resolve {}", input.display()))?;
        if !input.is_dir() {
            files.push(MediaFile::from_path(input));
            continue;
        }

        for entry in WalkDir::new(&input).sort_by_file_name() {
            let entry = entry.with_context(|| format!("failed to scan {}", input.display()))?;
            if entry.file_type().is_file() && has_extension(entry.path(), &extensions) {
                files.push(MediaFile::from_path(entry.into_path()));
            }
        }
    }
    Ok(files)
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|ext| extensions.contains(&ext.to_string_lossy().to_lowercase()))
        .unwrap_or(false)
}

/// Warn about outputs that already exist or that two inputs would share.
fn preflight(files: &[MediaFile], naming: &OutputNaming, overwrite: bool) {
    let mut claimed: HashMap<PathBuf, &str> = HashMap::new();
    for file in files {
        let Ok(output) = naming.derive(&file.path) else {
            continue;
        };
        if !overwrite && output.exists() {
            warn!(output = %output.display(), "output exists and will not be overwritten (use -y)");
        }
        if let Some(previous) = claimed.insert(output.clone(), &file.display_name) {
            warn!(
                output = %output.display(),
                "{previous} and {} derive the same output path",
                file.display_name
            );
        }
    }
}

/// Ask the tool about every input, `jobs` at a time, in input order.
fn analyze_all(
    files: &[MediaFile],
    settings: &Settings,
) -> Result<Vec<remux_batch::Result<MediaInfo>>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(settings.batch.jobs)
        .build()?;
    Ok(pool.install(|| {
        files
            .par_iter()
            .map(|file| tools::analyze(&settings.tool.program, &file.path))
            .collect()
    }))
}

fn run_analysis(files: &[MediaFile], settings: &Settings, json: bool) -> Result<ExitCode> {
    let analyses = analyze_all(files, settings)?;
    let failed = analyses.iter().filter(|a| a.is_err()).count();

    if json {
        let entries: Vec<_> = files
            .iter()
            .zip(&analyses)
            .map(|(file, analysis)| match analysis {
                Ok(info) => serde_json::json!({ "path": file.path, "info": info }),
                Err(e) => serde_json::json!({ "path": file.path, "error": e.to_string() }),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for (file, analysis) in files.iter().zip(&analyses) {
            println!("{}", file.path.display());
            match analysis {
                Ok(info) => print_media_info(info),
                Err(e) => println!("  Error: {e}"),
            }
        }
    }

    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_media_info(info: &MediaInfo) {
    let unknown = "-";
    println!("  Title: {}", info.title.as_deref().unwrap_or(unknown));
    println!("  Episode: {}", info.episode_id.as_deref().unwrap_or(unknown));
    println!("  Duration: {}", info.duration.as_deref().unwrap_or(unknown));
    for line in info
        .video_streams
        .iter()
        .chain(&info.audio_streams)
        .chain(&info.subtitle_streams)
    {
        println!("  {line}");
    }
}

/// Warn about inputs the mapping cannot be applied to. They still run; the
/// tool's own error decides the job.
fn check_streams(files: &[MediaFile], settings: &Settings) -> Result<()> {
    for (file, analysis) in files.iter().zip(analyze_all(files, settings)?) {
        match analysis {
            Ok(info) => {
                let missing = info.missing_streams(&settings.policy);
                if !missing.is_empty() {
                    let missing: Vec<String> = missing.iter().map(ToString::to_string).collect();
                    warn!(
                        input = %file.path.display(),
                        "source has no stream for {}",
                        missing.join(", ")
                    );
                }
            }
            Err(e) => warn!(input = %file.path.display(), "cannot inspect streams: {e}"),
        }
    }
    Ok(())
}

/// Lets the user stop dispatching new jobs from the terminal.
fn spawn_control_thread(cancel: CancelHandle) {
    thread::spawn(move || {
        eprintln!("\nPress 'q' then Enter to stop starting new jobs\n");
        let mut buffer = [0u8; 1];
        while std::io::stdin().read_exact(&mut buffer).is_ok() {
            if buffer[0] == b'q' {
                eprintln!("\nCancelling: running jobs will finish, queued jobs are skipped");
                cancel.cancel();
                break;
            }
        }
    });
}

fn emit(pb: &ProgressBar, line: &str) {
    if pb.is_hidden() {
        println!("{line}");
    } else {
        pb.println(line);
    }
}

fn describe(result: &JobResult) -> String {
    let name = &result.job.source.display_name;
    match result.failure_kind() {
        None => format!(
            "Processed {name} -> {} ({:.1}s)",
            result.job.output.display(),
            result.elapsed.as_secs_f64()
        ),
        Some(kind) => format!(
            "Error processing {name}: {kind} (exit code {})",
            result.exit_code
        ),
    }
}

fn print_summary(report: &BatchReport, start_time: Instant) {
    println!("\nRemux Summary:");
    println!("Total files processed: {}", report.len());
    println!("Successfully remuxed: {}", report.succeeded());
    println!("Failed: {}", report.failed());
    println!("Time taken: {:.2} seconds", start_time.elapsed().as_secs_f64());

    let mut failures = report.failures().peekable();
    if failures.peek().is_some() {
        println!("\nFailures:");
    }
    for result in failures {
        println!("  {}:", result.job.source.path.display());
        for line in diagnostic_lines(&result.stderr) {
            println!("    {line}");
        }
    }
}
