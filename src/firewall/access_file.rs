//! Marker-block editing for text configuration files.
//!
//! A marker block is the region between `# BEGIN <marker>` and `# END <marker>`.
//! Everything outside the block is passed through byte for byte, whatever its
//! encoding (CRLF line endings are normalized to LF). Only the lines inside the
//! block are decoded as text. Writes run as one read-modify-write cycle under an
//! exclusive file lock; reads take a shared lock.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::GuardError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FileStatus {
    pub exists: bool,
    pub readable: bool,
    pub writable: bool,
}

/// Where the marker block sits in a normalized file.
#[derive(Debug, PartialEq)]
enum Layout {
    NoMarker,
    /// Byte range covering the BEGIN line through the END line (inclusive of
    /// the END line's newline), plus the lines in between.
    WellFormed {
        start: usize,
        end: usize,
        body: Vec<String>,
    },
    Malformed {
        reason: &'static str,
        body: Vec<String>,
    },
}

#[derive(Debug, Clone)]
pub struct AccessFileEditor {
    path: PathBuf,
    marker: String,
}

impl AccessFileEditor {
    pub fn new(path: impl Into<PathBuf>, marker: impl Into<String>) -> Self {
        AccessFileEditor {
            path: path.into(),
            marker: marker.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn status(&self) -> FileStatus {
        FileStatus {
            exists: self.path.is_file(),
            readable: File::open(&self.path).is_ok(),
            writable: OpenOptions::new().write(true).open(&self.path).is_ok(),
        }
    }

    /// Lines strictly between the markers. A missing file or marker yields an
    /// empty block. A malformed block is read up to end of file so callers
    /// can still inspect it; only writes refuse it.
    pub fn extract_block(&self) -> Result<Vec<String>, GuardError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut file = File::open(&self.path).map_err(|e| self.fs_error(e))?;
        file.lock_shared().map_err(|e| self.fs_error(e))?;
        let mut raw = Vec::new();
        file.read_to_end(&mut raw).map_err(|e| self.fs_error(e))?;

        Ok(match scan(&normalize(&raw), &self.marker) {
            Layout::NoMarker => Vec::new(),
            Layout::WellFormed { body, .. } => body,
            Layout::Malformed { reason, body } => {
                tracing::warn!(
                    path = %self.path.display(),
                    "Marker block is malformed ({}), reading it leniently",
                    reason
                );
                body
            }
        })
    }

    /// Replace the block with `lines`, appending a new block if none exists.
    #[cfg(test)]
    pub fn write_block(&self, lines: Vec<String>) -> Result<(), GuardError> {
        self.edit_block(|_| lines).map(|_| ())
    }

    /// Locked read-modify-write of the block. `edit` receives the current
    /// block lines and returns their replacement. Returns the written lines.
    pub fn edit_block<F>(&self, edit: F) -> Result<Vec<String>, GuardError>
    where
        F: FnOnce(Vec<String>) -> Vec<String>,
    {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| self.fs_error(e))?;
        file.lock().map_err(|e| self.fs_error(e))?;

        let mut raw = Vec::new();
        file.read_to_end(&mut raw).map_err(|e| self.fs_error(e))?;
        let text = normalize(&raw);

        let (prefix, current, suffix) = match scan(&text, &self.marker) {
            Layout::NoMarker => {
                let mut prefix = text.clone();
                if prefix.last().is_some_and(|b| *b != b'\n') {
                    prefix.push(b'\n');
                }
                (prefix, Vec::new(), Vec::new())
            }
            Layout::WellFormed { start, end, body } => {
                (text[..start].to_vec(), body, text[end..].to_vec())
            }
            Layout::Malformed { reason, .. } => {
                return Err(GuardError::CorruptMarker {
                    path: self.path.clone(),
                    reason: reason.to_string(),
                });
            }
        };

        let lines = edit(current);
        let mut block = format!("# BEGIN {}\n", self.marker);
        for line in &lines {
            block.push_str(line);
            block.push('\n');
        }
        block.push_str(&format!("# END {}\n", self.marker));

        let mut content = prefix;
        content.extend_from_slice(block.as_bytes());
        content.extend_from_slice(&suffix);

        if content != raw {
            file.set_len(0).map_err(|e| self.fs_error(e))?;
            file.seek(SeekFrom::Start(0)).map_err(|e| self.fs_error(e))?;
            file.write_all(&content).map_err(|e| self.fs_error(e))?;
            file.sync_all().map_err(|e| self.fs_error(e))?;
        }

        Ok(lines)
    }

    fn fs_error(&self, err: std::io::Error) -> GuardError {
        GuardError::filesystem(&self.path, err)
    }
}

fn normalize(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut bytes = raw.iter().peekable();
    while let Some(&b) = bytes.next() {
        if b == b'\r' && bytes.peek() == Some(&&b'\n') {
            continue;
        }
        out.push(b);
    }
    out
}

fn scan(text: &[u8], marker: &str) -> Layout {
    let begin_line = format!("# BEGIN {marker}");
    let begin_line = begin_line.as_bytes();
    let end_line = format!("# END {marker}");
    let end_line = end_line.as_bytes();

    let mut offset = 0;
    let mut open: Option<(usize, Vec<String>)> = None;
    let mut found: Option<(usize, usize, Vec<String>)> = None;

    for line in text.split_inclusive(|b| *b == b'\n') {
        let start = offset;
        offset += line.len();
        let content = line.strip_suffix(b"\n").unwrap_or(line);
        let trimmed = content.trim_ascii();

        match open.as_mut() {
            None if trimmed == begin_line => {
                if found.is_some() {
                    let body = found.map(|(_, _, body)| body).unwrap_or_default();
                    return Layout::Malformed {
                        reason: "more than one BEGIN marker",
                        body,
                    };
                }
                open = Some((start, Vec::new()));
            }
            None if trimmed == end_line => {
                return Layout::Malformed {
                    reason: "END marker without BEGIN marker",
                    body: found.map(|(_, _, body)| body).unwrap_or_default(),
                };
            }
            None => {}
            Some((_, body)) if trimmed == begin_line => {
                return Layout::Malformed {
                    reason: "nested BEGIN marker",
                    body: std::mem::take(body),
                };
            }
            Some(_) if trimmed == end_line => {
                if let Some((begin, body)) = open.take() {
                    found = Some((begin, offset, body));
                }
            }
            Some((_, body)) => body.push(String::from_utf8_lossy(content).into_owned()),
        }
    }

    match (open, found) {
        (Some((_, body)), _) => Layout::Malformed {
            reason: "BEGIN marker without END marker",
            body,
        },
        (None, Some((start, end, body))) => Layout::WellFormed { start, end, body },
        (None, None) => Layout::NoMarker,
    }
}

/// Lines whose trimmed text starts with any of `prefixes`.
pub fn lines_with_prefix<'a>(lines: &'a [String], prefixes: &[&str]) -> Vec<&'a str> {
    lines
        .iter()
        .map(|line| line.trim())
        .filter(|line| prefixes.iter().any(|p| line.starts_with(p)))
        .collect()
}

/// Drop the fixed frame lines; they are regenerated, never matched.
pub fn strip_frame(lines: &[String], frame: &[&str]) -> Vec<String> {
    lines
        .iter()
        .filter(|line| !frame.contains(&line.trim()))
        .cloned()
        .collect()
}
