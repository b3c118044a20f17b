//! Provenance record written into every run directory.
//!
//! `meta.txt` holds one `key=value` line per field. Backslashes and newlines
//! in values are escaped so a command line can never forge another field.

use crate::mode::TraceMode;
use std::io;
use std::path::{Path, PathBuf};

/// File name of the metadata record inside a run directory.
pub const METADATA_FILE: &str = "meta.txt";

/// What was traced, and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceMetadata {
    pub target_path: PathBuf,
    pub line: String,
    pub mode: TraceMode,
}

impl TraceMetadata {
    pub fn new(target_path: impl Into<PathBuf>, line: impl Into<String>, mode: TraceMode) -> Self {
        Self {
            target_path: target_path.into(),
            line: line.into(),
            mode,
        }
    }

    pub fn render(&self) -> String {
        format!(
            "target_path={}\nline={}\nmode={}\n",
            escape(&self.target_path.display().to_string()),
            escape(&self.line),
            self.mode
        )
    }

    /// Parse a rendered record. Unknown keys are ignored.
    pub fn parse(text: &str) -> Option<Self> {
        let mut target_path = None;
        let mut line = None;
        let mut mode = None;

        for entry in text.lines() {
            let Some((key, value)) = entry.split_once('=') else {
                continue;
            };
            match key {
                "target_path" => target_path = Some(PathBuf::from(unescape(value))),
                "line" => line = Some(unescape(value)),
                "mode" => mode = value.parse::<TraceMode>().ok(),
                _ => {}
            }
        }

        Some(Self {
            target_path: target_path?,
            line: line?,
            mode: mode?,
        })
    }

    /// Write `<run_dir>/meta.txt`.
    pub fn write_to(&self, run_dir: &Path) -> io::Result<PathBuf> {
        let path = run_dir.join(METADATA_FILE);
        std::fs::write(&path, self.render())?;
        Ok(path)
    }

    /// Read `<run_dir>/meta.txt`.
    pub fn read_from(run_dir: &Path) -> io::Result<Self> {
        let text = std::fs::read_to_string(run_dir.join(METADATA_FILE))?;
        Self::parse(&text)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "incomplete trace metadata"))
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n")
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
