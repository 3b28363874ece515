//! Construction of the external tool invocation.
//!
//! Paths always travel as their own argv element. Nothing here ever builds a
//! shell string, so quotes, spaces and `$(...)` in file names reach the tool
//! untouched.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::policy::StreamMappingPolicy;

pub const DEFAULT_PROGRAM: &str = "ffmpeg";

/// A program plus its argument vector, ready to execute without a shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, s: impl Into<String>) -> Self {
        self.args.push(s.into());
        self
    }

    pub fn args(mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Short program name for log lines.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }
}

/// Debug rendering only; the output is not meant to be fed to a shell.
impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {arg:?}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Builds remux commands for one tool binary.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    program: PathBuf,
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl CommandBuilder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Argument layout:
    ///
    /// ```text
    /// -n|-y  -i <input>  (-map 0:<k>:<i>)*  (-c:<k> copy)*  <output>
    /// ```
    ///
    /// One `-map` per policy entry in policy order, and one `-c:<k> copy` per
    /// distinct stream kind whose copy flag is set. Kinds without the flag get
    /// no codec directive and are encoded with the tool's default.
    pub fn build(
        &self,
        input: &Path,
        output: &Path,
        policy: &StreamMappingPolicy,
    ) -> Result<CommandSpec> {
        policy.validate()?;
        let input = path_arg(input)?;
        let output = path_arg(output)?;

        let mut cmd = CommandSpec::new(&self.program)
            .arg(if policy.overwrite { "-y" } else { "-n" })
            .arg("-i")
            .arg(input);

        for mapping in &policy.mappings {
            cmd = cmd.arg("-map").arg(mapping.map_arg());
        }

        for kind in policy.kinds() {
            if policy.copies(kind) {
                cmd = cmd.arg(format!("-c:{}", kind.letter())).arg("copy");
            }
        }

        Ok(cmd.arg(output))
    }
}

fn path_arg(path: &Path) -> Result<String> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| Error::invalid_path(path, "path is not valid UTF-8"))
}
