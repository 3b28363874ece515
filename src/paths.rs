//! Output path derivation.
//!
//! The output lives next to the input: the final extension is replaced by
//! `suffix` + `.` + `extension`, so `/a/video1.mp4` becomes
//! `/a/video1_combined.mkv`. Deriving from an already derived path yields a
//! new name (`video1_combined_combined.mkv`), and two inputs that differ only
//! in extension collide. Neither case is detected here; a collision shows up
//! as a job failure (or an overwrite) when the tool runs.

use std::path::{is_separator, Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_SUFFIX: &str = "_combined";
pub const DEFAULT_EXTENSION: &str = "mkv";

/// Naming rule applied to every input of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputNaming {
    pub suffix: String,
    /// Target container extension, without the leading dot.
    #[serde(deserialize_with = "deserialize_extension")]
    pub extension: String,
}

impl Default for OutputNaming {
    fn default() -> Self {
        Self {
            suffix: DEFAULT_SUFFIX.to_string(),
            extension: DEFAULT_EXTENSION.to_string(),
        }
    }
}

impl OutputNaming {
    pub fn new(suffix: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
            extension: normalize_extension(&extension.into()),
        }
    }

    /// Map an input path to its output path. Pure; the filesystem is not
    /// consulted.
    pub fn derive(&self, input: &Path) -> Result<PathBuf> {
        let raw = input
            .to_str()
            .ok_or_else(|| Error::invalid_path(input, "path is not valid UTF-8"))?;
        if raw.is_empty() {
            return Err(Error::invalid_path(input, "path is empty"));
        }

        let name_start = raw.rfind(is_separator).map_or(0, |i| i + 1);
        let stem_end = match raw[name_start..].rfind('.') {
            Some(dot) => name_start + dot,
            None => raw.len(),
        };

        Ok(PathBuf::from(format!(
            "{}{}.{}",
            &raw[..stem_end],
            self.suffix,
            self.extension
        )))
    }
}

/// `.mkv` and `mkv` name the same container.
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_string()
}

fn deserialize_extension<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(|ext| normalize_extension(&ext))
}
