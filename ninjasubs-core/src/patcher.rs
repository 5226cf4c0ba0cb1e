use byteorder::{ByteOrder, LittleEndian};
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::blob::assemble;
use crate::project::Project;
use crate::scanner::{find, GLYPH_FIXES};
use crate::settings::PatchConfig;
use crate::{Result, SubsError};

/// Yes/no decision point owned by whoever drives an export.
pub trait Confirm {
    fn confirm(&mut self, question: &str) -> bool;
}

impl<F: FnMut(&str) -> bool> Confirm for F {
    fn confirm(&mut self, question: &str) -> bool {
        self(question)
    }
}

/// Color-hook builds, told apart by the first word of the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorHook {
    V1,
    V2,
    Unknown(u32),
}

impl ColorHook {
    pub fn from_discriminant(word: u32) -> Self {
        match word {
            0x000b_d204 => ColorHook::V1,
            0x000b_d203 => ColorHook::V2,
            other => ColorHook::Unknown(other),
        }
    }

    /// Distance from the descriptor to the runtime color pointer.
    pub fn pointer_offset(self) -> usize {
        match self {
            ColorHook::V1 => 18,
            ColorHook::V2 | ColorHook::Unknown(_) => 14,
        }
    }
}

fn read_u32(image: &[u8], offset: usize) -> Result<u32> {
    match offset.checked_add(4) {
        Some(end) if end <= image.len() => Ok(LittleEndian::read_u32(&image[offset..end])),
        _ => Err(SubsError::DescriptorOutOfBounds {
            offset,
            file_len: image.len(),
        }),
    }
}

/// Read the runtime color pointer referenced by the color-hook descriptor at
/// `hook_offset` (a file offset).
pub fn derive_color_pointer(image: &[u8], hook_offset: usize) -> Result<u32> {
    let hook = ColorHook::from_discriminant(read_u32(image, hook_offset)?);
    if let ColorHook::Unknown(word) = hook {
        log::warn!(
            "unrecognised color hook discriminant {word:#010x} at {hook_offset:#x}; \
             assuming the +14 layout, verify the result manually"
        );
    }
    read_u32(image, hook_offset + hook.pointer_offset())
}

/// Apply the first known glyph-table fix that is present and approved.
///
/// Returns the name of the applied fix, if any.
pub fn apply_glyph_fixes(image: &mut [u8], confirm: &mut dyn Confirm) -> Option<&'static str> {
    for fix in &GLYPH_FIXES {
        let Some(idx) = find(image, fix.pattern) else {
            continue;
        };
        let question = format!("{} found in executable at {idx:#x}. Apply fix?", fix.name);
        if confirm.confirm(&question) {
            image[idx..idx + fix.replacement.len()].copy_from_slice(fix.replacement);
            log::info!("applied {} at file offset {idx:#x}", fix.name);
            return Some(fix.name);
        }
        log::info!("{} left untouched", fix.name);
    }
    None
}

/// `<stem>_backup.bin` next to the executable.
pub fn backup_path(binary: &Path) -> PathBuf {
    let stem = binary
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    binary.with_file_name(format!("{stem}_backup.bin"))
}

/// The capacity gate: `needed` bytes must fit the window `[start, end)`.
/// Returns the window size.
pub fn check_capacity(needed: usize, start: u32, end: u32) -> Result<usize> {
    let available = end.checked_sub(start).ok_or_else(|| {
        SubsError::Config(format!("empty space end {end:#x} precedes its start {start:#x}"))
    })? as usize;

    if needed > available {
        return Err(SubsError::CapacityExceeded {
            needed,
            available,
            start,
            end,
        });
    }
    Ok(available)
}

/// Check the blob fits the window and zero-pad it to the window size.
pub fn fit_to_window(mut blob: Vec<u8>, start: u32, end: u32) -> Result<Vec<u8>> {
    let available = check_capacity(blob.len(), start, end)?;
    blob.resize(available, 0);
    Ok(blob)
}

/// `offset..offset + len`, if it lies inside a file of `file_len` bytes.
pub fn window_range(file_len: usize, offset: usize, len: usize) -> Result<Range<usize>> {
    offset
        .checked_add(len)
        .filter(|&end| end <= file_len)
        .map(|end| offset..end)
        .ok_or(SubsError::RangeOverflow {
            offset,
            needed: offset.saturating_add(len),
            file_len,
        })
}

/// Overwrite `image[offset..offset + region.len()]` with `region`.
pub fn write_window(image: &mut [u8], offset: usize, region: &[u8]) -> Result<()> {
    let range = window_range(image.len(), offset, region.len())?;
    image[range].copy_from_slice(region);
    Ok(())
}

/// Outcome of a successful export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub binary: PathBuf,
    pub backup: Option<PathBuf>,
    pub glyph_fix: Option<&'static str>,
    pub color_pointer: u32,
    pub blob_len: usize,
    pub available: usize,
}

fn write_backup(cfg: &PatchConfig, original: &[u8], confirm: &mut dyn Confirm) -> Result<Option<PathBuf>> {
    let path = backup_path(&cfg.binary_path);
    if path.exists() {
        let question = format!("Backup {} already exists. Overwrite it?", path.display());
        if !confirm.confirm(&question) {
            log::info!("keeping existing backup {}", path.display());
            return Ok(None);
        }
    }
    fs::write(&path, original).map_err(SubsError::io(&path))?;
    log::info!("backup written to {}", path.display());
    Ok(Some(path))
}

/// Compile `project` and patch it into the configured executable.
///
/// Every check runs on the in-memory image first. The backup and the
/// executable are only written once the patched image is complete.
pub fn export_project(project: &Project, confirm: &mut dyn Confirm) -> Result<ExportReport> {
    if !project.has_any_entries() {
        return Err(SubsError::Config("no subtitles to export".to_string()));
    }
    let cfg = project.asm_settings.resolve()?;

    let original = fs::read(&cfg.binary_path).map_err(SubsError::io(&cfg.binary_path))?;
    log::info!(
        "loaded {} ({} bytes)",
        cfg.binary_path.display(),
        original.len()
    );
    let mut image = original.clone();

    let glyph_fix = if cfg.ignore_fixups {
        None
    } else {
        apply_glyph_fixes(&mut image, confirm)
    };

    let color_pointer = derive_color_pointer(&image, cfg.color_hook_file_offset()?)?;
    log::debug!("runtime color pointer {color_pointer:#010x}");

    let mut blob = assemble(project, &cfg, color_pointer)?;
    blob.link(cfg.empty_space_start);
    let blob_len = blob.len();

    // Both checks run before the window is padded out to its full size.
    let available = check_capacity(blob_len, cfg.empty_space_start, cfg.empty_space_end)?;
    let window_offset = cfg.window_file_offset()?;
    window_range(image.len(), window_offset, available)?;
    let region = fit_to_window(blob.bytes, cfg.empty_space_start, cfg.empty_space_end)?;
    write_window(&mut image, window_offset, &region)?;
    log::info!("subtitle blob uses {blob_len} of {available} bytes");

    let backup = if cfg.backup_enabled {
        write_backup(&cfg, &original, confirm)?
    } else {
        None
    };

    fs::write(&cfg.binary_path, &image).map_err(SubsError::io(&cfg.binary_path))?;
    log::info!("patched {}", cfg.binary_path.display());

    Ok(ExportReport {
        binary: cfg.binary_path,
        backup,
        glyph_fix,
        color_pointer,
        blob_len,
        available,
    })
}
