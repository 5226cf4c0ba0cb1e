//! SubRip import.

use crate::project::Entry;

/// One cue as read from an `.srt` file, times in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cue {
    pub start: u64,
    pub end: u64,
    pub text: String,
}

impl From<Cue> for Entry {
    fn from(cue: Cue) -> Self {
        Entry::new(cue.start, cue.end, cue.text)
    }
}

/// Parses "HH:MM:SS,mmm".
fn parse_timestamp(ts: &str) -> Option<u64> {
    let (hms, ms) = ts.trim().split_once(',')?;
    let mut parts = hms.split(':');
    let h = parse_fixed(parts.next()?, 2)?;
    let m = parse_fixed(parts.next()?, 2)?;
    let s = parse_fixed(parts.next()?, 2)?;
    if parts.next().is_some() {
        return None;
    }
    let ms = parse_fixed(ms, 3)?;
    Some(h * 3_600_000 + m * 60_000 + s * 1000 + ms)
}

fn parse_fixed(digits: &str, width: usize) -> Option<u64> {
    if digits.len() != width || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn parse_timing(line: &str) -> Option<(u64, u64)> {
    let (start, end) = line.split_once("-->")?;
    // Anything after the end stamp (position hints) is ignored.
    let end = end.trim_start().get(..12)?;
    Some((parse_timestamp(start)?, parse_timestamp(end)?))
}

/// Parse SubRip content. Blocks without a valid timing line are skipped.
pub fn parse_srt(content: &str) -> Vec<Cue> {
    let normalized = content.replace("\r\n", "\n");
    let mut cues = Vec::new();

    for block in normalized.split("\n\n") {
        let lines: Vec<&str> = block.trim().split('\n').collect();
        if lines.len() < 3 {
            continue;
        }
        let Some((start, end)) = parse_timing(lines[1]) else {
            log::debug!("skipping SRT block with timing line {:?}", lines[1]);
            continue;
        };
        cues.push(Cue {
            start,
            end,
            text: lines[2..].join("\n").trim().to_string(),
        });
    }

    cues
}
