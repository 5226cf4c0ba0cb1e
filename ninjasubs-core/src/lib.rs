use std::path::PathBuf;
use thiserror::Error;

pub mod blob;
pub mod patcher;
pub mod project;
pub mod scanner;
pub mod settings;
pub mod srt;
pub mod tables;
pub mod timeline;

pub use blob::{assemble, CompiledBlob, Relocation};
pub use patcher::{export_project, fit_to_window, Confirm, ExportReport};
pub use project::{centered_x, validate_text, Entry, Project};
pub use scanner::{scan_executable, ScanReport};
pub use settings::{AsmSettings, PatchConfig};
pub use srt::parse_srt;

/// Maximum number of UTF-8 bytes the runtime font can draw on one line.
pub const MAX_LINE_BYTES: usize = 36;

/// One text line that does not fit the runtime line width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineOverflow {
    /// 1-based line number inside the entry text.
    pub line: usize,
    pub bytes: usize,
}

fn describe_lines(lines: &[LineOverflow]) -> String {
    lines
        .iter()
        .map(|l| format!("line {}: {} bytes", l.line, l.bytes))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum SubsError {
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("project document error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(
        "buffer exceeds available space: need {needed} bytes, but only have {available} bytes available ({start:#x} to {end:#x})"
    )]
    CapacityExceeded {
        needed: usize,
        available: usize,
        start: u32,
        end: u32,
    },

    #[error("padded buffer would exceed executable size: need {needed} bytes from offset {offset:#x}, but executable is only {file_len} bytes")]
    RangeOverflow {
        offset: usize,
        needed: usize,
        file_len: usize,
    },

    #[error("lines exceed 36 bytes: {}", describe_lines(.lines))]
    LineTooLong { lines: Vec<LineOverflow> },

    #[error("invalid hexadecimal value '{value}' for {field}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{table} table has {count} entries, but record ids are one byte wide")]
    TableOverflow { table: &'static str, count: usize },

    #[error("color hook descriptor at file offset {offset:#x} lies outside the executable ({file_len} bytes)")]
    DescriptorOutOfBounds { offset: usize, file_len: usize },

    #[error("configuration error: {0}")]
    Config(String),
}

impl SubsError {
    pub fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| SubsError::Io { path, source }
    }
}

pub type Result<T> = std::result::Result<T, SubsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_overflow_message_lists_every_line() {
        let err = SubsError::LineTooLong {
            lines: vec![
                LineOverflow { line: 1, bytes: 40 },
                LineOverflow { line: 3, bytes: 37 },
            ],
        };
        assert_eq!(
            err.to_string(),
            "lines exceed 36 bytes: line 1: 40 bytes, line 3: 37 bytes"
        );
    }

    #[test]
    fn capacity_message_names_the_window() {
        let err = SubsError::CapacityExceeded {
            needed: 80,
            available: 64,
            start: 0x8c100000,
            end: 0x8c100040,
        };
        let msg = err.to_string();
        assert!(msg.contains("need 80 bytes"));
        assert!(msg.contains("0x8c100000 to 0x8c100040"));
    }
}
