//! Shared fixtures: a shell-script stand-in for ffmpeg and fake media files.
//!
//! The stand-in honours the parts of ffmpeg's contract the batch relies on:
//! `-version`, `-i <input>`, `-n`/`-y` and the output path as last argument.
//! Input file contents steer its behaviour:
//!
//! - `single-audio` -> fails like a source without a second audio stream
//! - `hang`         -> never finishes on its own (through a forked child, so
//!   the script itself has to be killed along with it)
//! - anything else  -> copies input to output and exits 0
//!
//! Called with `-i <input>` and no output it prints a stream listing and
//! exits 1, as ffmpeg does.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

const FAKE_FFMPEG: &str = r#"#!/bin/sh
if [ "$1" = "-version" ]; then
  echo "ffmpeg version 0.0-fake Copyright (c) nobody"
  exit 0
fi
overwrite=0
input=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "-i" ]; then input="$arg"; fi
  if [ "$arg" = "-y" ]; then overwrite=1; fi
  prev="$arg"
done
output="$prev"
if [ ! -f "$input" ]; then
  echo "$input: No such file or directory" >&2
  exit 1
fi
if [ "$output" = "$input" ]; then
  echo "Input #0, matroska,webm, from '$input':" >&2
  echo "  Metadata:" >&2
  echo "    title           : Fake Title" >&2
  echo "    episode_id      : S01E02" >&2
  echo "  Duration: 00:01:40.00, start: 0.000000, bitrate: 1000 kb/s" >&2
  echo "  Stream #0:0: Video: h264 (High), yuv420p, 1920x1080, 24 fps" >&2
  echo "  Stream #0:1(eng): Audio: aac (LC), 48000 Hz, stereo, fltp" >&2
  if ! grep -q single-audio "$input"; then
    echo "  Stream #0:2(jpn): Audio: aac (LC), 48000 Hz, stereo, fltp" >&2
  fi
  echo "At least one output file must be specified" >&2
  exit 1
fi
if grep -q single-audio "$input"; then
  echo "Input #0, avi, from '$input':" >&2
  echo "Stream map '0:a:1' matches no streams." >&2
  exit 1
fi
if grep -q hang "$input"; then
  sleep 30
  exit 0
fi
if [ -e "$output" ] && [ "$overwrite" -eq 0 ]; then
  echo "File '$output' already exists. Exiting." >&2
  exit 1
fi
echo "argc=$#"
cp "$input" "$output"
"#;

/// Write the fake tool into `dir` and make it executable.
pub fn fake_ffmpeg(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("ffmpeg");
    fs::write(&path, FAKE_FFMPEG).expect("write fake ffmpeg");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod fake ffmpeg");
    path
}

pub fn write_media(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).expect("write media file");
    path
}
