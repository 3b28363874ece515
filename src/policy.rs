//! Stream selection policy.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Accepts `v:0` or the tool's own `0:v:0` form. Only input 0 exists.
static SPECIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:0:)?([vas]):(\d+)$").expect("valid specifier regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
}

impl StreamKind {
    /// Single letter ffmpeg uses in stream specifiers.
    pub fn letter(self) -> char {
        match self {
            StreamKind::Video => 'v',
            StreamKind::Audio => 'a',
            StreamKind::Subtitle => 's',
        }
    }

    fn from_letter(c: char) -> Option<Self> {
        match c {
            'v' => Some(StreamKind::Video),
            'a' => Some(StreamKind::Audio),
            's' => Some(StreamKind::Subtitle),
            _ => None,
        }
    }
}

/// One `-map` entry: the `index`-th stream of `kind` in the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StreamMapping {
    pub kind: StreamKind,
    pub index: u32,
}

impl StreamMapping {
    pub const fn new(kind: StreamKind, index: u32) -> Self {
        Self { kind, index }
    }

    pub const fn video(index: u32) -> Self {
        Self::new(StreamKind::Video, index)
    }

    pub const fn audio(index: u32) -> Self {
        Self::new(StreamKind::Audio, index)
    }

    pub const fn subtitle(index: u32) -> Self {
        Self::new(StreamKind::Subtitle, index)
    }

    /// Value passed after `-map`, e.g. `0:a:1`.
    pub fn map_arg(&self) -> String {
        format!("0:{}:{}", self.kind.letter(), self.index)
    }
}

impl fmt::Display for StreamMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.letter(), self.index)
    }
}

impl FromStr for StreamMapping {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let caps = SPECIFIER.captures(s.trim()).ok_or_else(|| {
            Error::configuration(format!(
                "invalid stream specifier '{s}' (expected e.g. v:0, a:1, s:0)"
            ))
        })?;
        let kind = caps[1]
            .chars()
            .next()
            .and_then(StreamKind::from_letter)
            .ok_or_else(|| Error::configuration(format!("unknown stream kind in '{s}'")))?;
        let index = caps[2]
            .parse()
            .map_err(|_| Error::configuration(format!("stream index out of range in '{s}'")))?;
        Ok(Self { kind, index })
    }
}

impl TryFrom<String> for StreamMapping {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<StreamMapping> for String {
    fn from(m: StreamMapping) -> Self {
        m.to_string()
    }
}

/// Which streams end up in the output and whether they are re-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamMappingPolicy {
    /// Mappings in output order.
    pub mappings: Vec<StreamMapping>,
    pub copy_video: bool,
    pub copy_audio: bool,
    pub copy_subtitle: bool,
    /// Let the tool replace an existing output file.
    pub overwrite: bool,
}

impl Default for StreamMappingPolicy {
    /// One video stream and the first two audio streams, all copied.
    fn default() -> Self {
        Self {
            mappings: vec![
                StreamMapping::video(0),
                StreamMapping::audio(0),
                StreamMapping::audio(1),
            ],
            copy_video: true,
            copy_audio: true,
            copy_subtitle: true,
            overwrite: false,
        }
    }
}

impl StreamMappingPolicy {
    pub fn new(mappings: Vec<StreamMapping>) -> Self {
        Self {
            mappings,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.mappings.is_empty() {
            return Err(Error::configuration(
                "stream mapping policy has no mappings",
            ));
        }
        Ok(())
    }

    pub fn copies(&self, kind: StreamKind) -> bool {
        match kind {
            StreamKind::Video => self.copy_video,
            StreamKind::Audio => self.copy_audio,
            StreamKind::Subtitle => self.copy_subtitle,
        }
    }

    /// Distinct stream kinds in order of first appearance.
    pub fn kinds(&self) -> Vec<StreamKind> {
        let mut kinds = Vec::new();
        for m in &self.mappings {
            if !kinds.contains(&m.kind) {
                kinds.push(m.kind);
            }
        }
        kinds
    }
}
