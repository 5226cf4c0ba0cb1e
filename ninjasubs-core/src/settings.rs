use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{Result, SubsError};

/// Load address of the first byte of the executable image.
pub const DEFAULT_BASE_OFFSET: u32 = 0x8c01_0000;
pub const DEFAULT_COLOR_ARGB: &str = "ffbfbfbf";
pub const DEFAULT_FPS: u32 = 60;

/// Binary-patch settings as stored in the project document.
///
/// Addresses are kept as hexadecimal text so a project file round-trips
/// exactly what the user typed; [`AsmSettings::resolve`] turns them into
/// numbers right before an export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsmSettings {
    #[serde(rename = "game_binary")]
    pub binary_path: String,
    #[serde(rename = "executable_base_offset")]
    pub base_offset: String,
    #[serde(rename = "empty_space_offset")]
    pub empty_space_start: String,
    pub empty_space_end: String,
    pub njprint_offset: String,
    pub njprint_color_offset: String,
    pub timer_offset: String,
    #[serde(rename = "base_color_argb")]
    pub default_color_argb: String,
    #[serde(rename = "game_fps")]
    pub fps: String,
    #[serde(rename = "backup_executable")]
    pub backup_enabled: bool,
    #[serde(rename = "ignore_font_fix")]
    pub ignore_fixups: bool,
}

impl Default for AsmSettings {
    fn default() -> Self {
        Self {
            binary_path: String::new(),
            base_offset: format!("{:#010x}", DEFAULT_BASE_OFFSET),
            empty_space_start: format!("{:#010x}", DEFAULT_BASE_OFFSET),
            empty_space_end: "0x00".to_string(),
            njprint_offset: "0x00000000".to_string(),
            njprint_color_offset: "0x00000000".to_string(),
            timer_offset: "0x00000000".to_string(),
            default_color_argb: DEFAULT_COLOR_ARGB.to_string(),
            fps: DEFAULT_FPS.to_string(),
            backup_enabled: true,
            ignore_fixups: false,
        }
    }
}

/// Parsed, validated settings handed to the builder and the patcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchConfig {
    pub binary_path: PathBuf,
    pub base_offset: u32,
    pub njprint_offset: u32,
    pub njprint_color_offset: u32,
    pub timer_offset: u32,
    pub default_color: u32,
    pub fps: u32,
    pub backup_enabled: bool,
    pub ignore_fixups: bool,
    pub empty_space_start: u32,
    pub empty_space_end: u32,
}

impl PatchConfig {
    /// Size of the free-space window in bytes.
    pub fn available(&self) -> Result<usize> {
        self.empty_space_end
            .checked_sub(self.empty_space_start)
            .map(|n| n as usize)
            .ok_or_else(|| {
                SubsError::Config(format!(
                    "empty space end {:#x} precedes its start {:#x}",
                    self.empty_space_end, self.empty_space_start
                ))
            })
    }

    /// File offset of the free-space window inside the executable image.
    pub fn window_file_offset(&self) -> Result<usize> {
        to_file_offset(self.empty_space_start, self.base_offset, "empty_space_offset")
    }

    /// File offset of the color-hook descriptor inside the executable image.
    pub fn color_hook_file_offset(&self) -> Result<usize> {
        to_file_offset(
            self.njprint_color_offset,
            self.base_offset,
            "njprint_color_offset",
        )
    }
}

fn to_file_offset(address: u32, base: u32, field: &str) -> Result<usize> {
    address
        .checked_sub(base)
        .map(|n| n as usize)
        .ok_or_else(|| {
            SubsError::Config(format!(
                "{field} {address:#x} lies below the executable base offset {base:#x}"
            ))
        })
}

/// Parse an address written as hexadecimal, with or without a `0x` prefix.
pub fn parse_hex_u32(field: &'static str, token: &str) -> Result<u32> {
    let t = token.trim();
    let digits = t
        .strip_prefix("0x")
        .or_else(|| t.strip_prefix("0X"))
        .unwrap_or(t);

    u32::from_str_radix(digits, 16).map_err(|_| SubsError::InvalidAddress {
        field,
        value: t.to_string(),
    })
}

impl AsmSettings {
    pub fn resolve(&self) -> Result<PatchConfig> {
        let fps = self
            .fps
            .trim()
            .parse::<u32>()
            .map_err(|_| SubsError::InvalidAddress {
                field: "game_fps",
                value: self.fps.clone(),
            })?;
        if fps == 0 {
            return Err(SubsError::Config("game_fps must be greater than zero".to_string()));
        }

        Ok(PatchConfig {
            binary_path: PathBuf::from(&self.binary_path),
            base_offset: parse_hex_u32("executable_base_offset", &self.base_offset)?,
            njprint_offset: parse_hex_u32("njprint_offset", &self.njprint_offset)?,
            njprint_color_offset: parse_hex_u32("njprint_color_offset", &self.njprint_color_offset)?,
            timer_offset: parse_hex_u32("timer_offset", &self.timer_offset)?,
            default_color: parse_hex_u32("base_color_argb", &self.default_color_argb)?,
            fps,
            backup_enabled: self.backup_enabled,
            ignore_fixups: self.ignore_fixups,
            empty_space_start: parse_hex_u32("empty_space_offset", &self.empty_space_start)?,
            empty_space_end: parse_hex_u32("empty_space_end", &self.empty_space_end)?,
        })
    }
}
