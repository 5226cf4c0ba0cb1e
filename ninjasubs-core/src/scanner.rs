use byteorder::{ByteOrder, LittleEndian};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::settings::AsmSettings;
use crate::{Result, SubsError};

/// Known builds of the text printing routine.
const PRINT_HOOKS: [&[u8]; 2] = [
    &[
        0x22, 0x4F, 0x03, 0xE5, 0x1D, 0x90, 0x0C, 0x3F, 0x42, 0x2F, 0x1B, 0x90, 0xFC, 0x30, 0x04,
        0x70, 0x08, 0x25,
    ],
    &[
        0x22, 0x4F, 0x1E, 0x90, 0x0C, 0x3F, 0x1D, 0x90, 0x03, 0xE5, 0x42, 0x2F, 0xFC, 0x30, 0x04,
        0x70, 0x08, 0x25,
    ],
];

/// Known builds of the color setter, with the offset of the literal default
/// ARGB value relative to the match.
const COLOR_HOOKS: [(&[u8], usize); 2] = [
    (&[0x04, 0xD2, 0x0B, 0x00, 0x42, 0x22], 14),
    (&[0x03, 0xD2, 0x0B, 0x00, 0x42, 0x22], 10),
];

/// A known broken glyph table and its same-length replacement.
#[derive(Debug, Clone, Copy)]
pub struct GlyphFix {
    pub name: &'static str,
    pub pattern: &'static [u8],
    pub replacement: &'static [u8],
}

pub const GLYPH_FIXES: [GlyphFix; 2] = [
    GlyphFix {
        name: "glyph_fix_v1",
        pattern: &[
            0x16, 0x29, 0x28, 0x07, 0x00, 0x00, 0x15, 0x02, 0x00, 0x00, 0x00, 0x00, 0x22, 0x01,
            0x00, 0x00, 0x15, 0x02, 0x04, 0x01,
        ],
        replacement: &[
            0x16, 0x29, 0x28, 0x07, 0x00, 0x00, 0x15, 0x02, 0x00, 0x00, 0x00, 0x00, 0x22, 0x01,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ],
    },
    GlyphFix {
        name: "glyph_fix_v2",
        pattern: &[
            0xFF, 0xFF, 0xCE, 0xB9, 0xCE, 0xB9, 0xCE, 0xB9, 0xCE, 0xB9, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0x00, 0x00,
            0x00, 0x00, 0xCE, 0xB9, 0x00, 0x00, 0x00, 0x00, 0xCE, 0xB9, 0x00, 0x00, 0x00, 0x00,
            0xCE, 0xB9,
        ],
        replacement: &[
            0xFF, 0xFF, 0xCE, 0xB9, 0xCE, 0xB9, 0xCE, 0xB9, 0xCE, 0xB9, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00,
        ],
    },
];

/// First offset of `needle` in `haystack`.
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// What a scan turned up; every field is a suggestion only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Hook name to runtime address.
    pub hooks: BTreeMap<&'static str, u32>,
    pub default_color: Option<u32>,
}

impl ScanReport {
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty() && self.default_color.is_none()
    }

    /// Copy discovered values into the settings, leaving the rest alone.
    pub fn apply_to(&self, settings: &mut AsmSettings) {
        if let Some(addr) = self.hooks.get("njprint") {
            settings.njprint_offset = format!("{addr:#010x}");
        }
        if let Some(addr) = self.hooks.get("njprint_color") {
            settings.njprint_color_offset = format!("{addr:#010x}");
        }
        if let Some(argb) = self.default_color {
            settings.default_color_argb = format!("{argb:08x}");
        }
    }
}

pub fn scan_executable(data: &[u8], base_offset: u32) -> ScanReport {
    let mut report = ScanReport::default();
    let address = |offset: usize| base_offset.wrapping_add(offset as u32);

    if let Some(idx) = PRINT_HOOKS.iter().find_map(|sig| find(data, sig)) {
        report.hooks.insert("njprint", address(idx));
    }

    for (sig, color_at) in COLOR_HOOKS {
        if let Some(idx) = find(data, sig) {
            report.hooks.insert("njprint_color", address(idx));
            let at = idx + color_at;
            if at + 4 <= data.len() {
                report.default_color = Some(LittleEndian::read_u32(&data[at..at + 4]));
            }
            break;
        }
    }

    for fix in &GLYPH_FIXES {
        if let Some(idx) = find(data, fix.pattern) {
            report.hooks.insert(fix.name, address(idx));
        }
    }

    log::debug!("scan found {} hook(s)", report.hooks.len());
    report
}

pub fn scan_file(path: &Path, base_offset: u32) -> Result<ScanReport> {
    let data = fs::read(path).map_err(SubsError::io(path))?;
    Ok(scan_executable(&data, base_offset))
}
