//! Queries against the external tool itself: its version, and what a source
//! file contains.

use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

use crate::command::CommandSpec;
use crate::error::{Error, Result};
use crate::policy::{StreamKind, StreamMapping, StreamMappingPolicy};
use crate::report::diagnostic_lines;
use crate::runner::{Execution, ProcessRunner};

/// Reading a header never takes long; anything slower is stuck.
const ANALYZE_TIMEOUT: Duration = Duration::from_secs(60);

static INPUT_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^Input #\d+").expect("valid regex"));

static METADATA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(title|episode_id)[ \t]*:[ \t]*(.*?)[ \t]*$").expect("valid regex")
});

static DURATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Duration:\s*([^,]+)").expect("valid regex"));

static STREAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(Stream #\d+:\d+.*?: (Video|Audio|Subtitle):.*?)[ \t]*$")
        .expect("valid regex")
});

/// First line of `<program> -version`, e.g. `ffmpeg version 6.1.1 ...`.
pub fn tool_version(program: &Path) -> Result<String> {
    let name = program.display().to_string();
    let output = Command::new(program)
        .arg("-version")
        .stdin(Stdio::null())
        .output()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::tool_not_found(&name),
            _ => Error::tool_failed(&name, e.to_string()),
        })?;

    if !output.status.success() {
        return Err(Error::tool_failed(
            name,
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string())
}

/// What the tool reports about a source: container metadata and one
/// description line per stream, in stream order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MediaInfo {
    pub title: Option<String>,
    pub episode_id: Option<String>,
    pub duration: Option<String>,
    pub video_streams: Vec<String>,
    pub audio_streams: Vec<String>,
    pub subtitle_streams: Vec<String>,
}

impl MediaInfo {
    /// Parse the input listing ffmpeg prints to stderr. `None` when there is
    /// no `Input #` header, i.e. the file could not be opened.
    pub fn parse(listing: &str) -> Option<Self> {
        let header = INPUT_HEADER.find(listing)?;
        let listing = &listing[header.start()..];

        let mut info = MediaInfo::default();
        // Container metadata comes first; streams may repeat `title`.
        for caps in METADATA.captures_iter(listing) {
            let slot = match &caps[1] {
                "title" => &mut info.title,
                _ => &mut info.episode_id,
            };
            if slot.is_none() {
                *slot = Some(caps[2].to_string());
            }
        }
        info.duration = DURATION
            .captures(listing)
            .map(|caps| caps[1].trim().to_string());

        for caps in STREAM.captures_iter(listing) {
            let line = caps[1].to_string();
            match &caps[2] {
                "Video" => info.video_streams.push(line),
                "Audio" => info.audio_streams.push(line),
                _ => info.subtitle_streams.push(line),
            }
        }
        Some(info)
    }

    pub fn stream_count(&self, kind: StreamKind) -> usize {
        match kind {
            StreamKind::Video => self.video_streams.len(),
            StreamKind::Audio => self.audio_streams.len(),
            StreamKind::Subtitle => self.subtitle_streams.len(),
        }
    }

    /// Mappings of `policy` that select a stream this source does not have.
    pub fn missing_streams(&self, policy: &StreamMappingPolicy) -> Vec<StreamMapping> {
        policy
            .mappings
            .iter()
            .filter(|m| m.index as usize >= self.stream_count(m.kind))
            .copied()
            .collect()
    }
}

/// Run `<program> -hide_banner -i <input>` and parse what it reports.
///
/// Without an output file ffmpeg always exits non-zero, so the exit code is
/// ignored; a listing with an `Input #` header counts as success.
pub fn analyze(program: &Path, input: &Path) -> Result<MediaInfo> {
    let name = program.display().to_string();
    let input_arg = input
        .to_str()
        .ok_or_else(|| Error::invalid_path(input, "path is not valid UTF-8"))?;
    let command = CommandSpec::new(program).args(["-hide_banner", "-i", input_arg]);

    match ProcessRunner::new()
        .with_timeout(Some(ANALYZE_TIMEOUT))
        .execute(&command)
    {
        Execution::LaunchFailed(message) => Err(Error::tool_failed(name, message)),
        Execution::TimedOut { .. } => Err(Error::tool_failed(
            name,
            format!("timed out after {ANALYZE_TIMEOUT:?} reading {}", input.display()),
        )),
        Execution::Exited { stderr, .. } => MediaInfo::parse(&stderr).ok_or_else(|| {
            let diagnostic = diagnostic_lines(&stderr).join("; ");
            Error::tool_failed(
                name,
                if diagnostic.is_empty() {
                    stderr.trim().to_string()
                } else {
                    diagnostic
                },
            )
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
Input #0, matroska,webm, from 'show.mkv':
  Metadata:
    title           : Pilot
    episode_id      : S01E01
  Duration: 00:42:10.04, start: 0.000000, bitrate: 4120 kb/s
  Stream #0:0(eng): Video: h264 (High), yuv420p(progressive), 1920x1080, 23.98 fps
    Metadata:
      title           : Main
  Stream #0:1(jpn): Audio: aac (LC), 48000 Hz, stereo, fltp (default)
  Stream #0:2(eng): Audio: ac3, 48000 Hz, 5.1(side), fltp, 384 kb/s
  Stream #0:3(eng): Subtitle: subrip
At least one output file must be specified
";

    #[test]
    fn parses_metadata_and_streams() {
        let info = MediaInfo::parse(LISTING).unwrap();
        assert_eq!(info.title.as_deref(), Some("Pilot"));
        assert_eq!(info.episode_id.as_deref(), Some("S01E01"));
        assert_eq!(info.duration.as_deref(), Some("00:42:10.04"));
        assert_eq!(info.video_streams.len(), 1);
        assert_eq!(info.audio_streams.len(), 2);
        assert_eq!(info.subtitle_streams, vec!["Stream #0:3(eng): Subtitle: subrip"]);
        assert!(info.audio_streams[1].contains("ac3"));
    }

    #[test]
    fn unopenable_input_has_no_listing() {
        assert_eq!(MediaInfo::parse("x.mp4: No such file or directory\n"), None);
    }

    #[test]
    fn missing_fields_stay_empty() {
        let info = MediaInfo::parse("Input #0, avi, from 'a.avi':\n").unwrap();
        assert_eq!(info, MediaInfo::default());
    }

    #[test]
    fn default_policy_needs_two_audio_streams() {
        let mut info = MediaInfo::parse(LISTING).unwrap();
        let policy = StreamMappingPolicy::default();
        assert!(info.missing_streams(&policy).is_empty());

        info.audio_streams.truncate(1);
        assert_eq!(info.missing_streams(&policy), vec![StreamMapping::audio(1)]);
    }

    #[cfg(unix)]
    #[test]
    fn missing_tool() {
        let err = tool_version(Path::new("/nonexistent/ffmpeg_xyz_12345")).unwrap_err();
        assert!(matches!(err, Error::ToolNotFound { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn failing_tool() {
        // `false` ignores its arguments and exits 1.
        let err = tool_version(Path::new("false")).unwrap_err();
        assert!(matches!(err, Error::ToolFailed { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn analyze_without_listing_is_tool_failure() {
        let err = analyze(Path::new("false"), Path::new("/a/clip.mp4")).unwrap_err();
        assert!(matches!(err, Error::ToolFailed { .. }));
    }
}
