//! Lays a project out as the relocatable subtitle blob consumed by the
//! in-game player stub.
//!
//! Layout, every section start 4-byte aligned:
//!
//! ```text
//! stub | entry point | color ptr | timer | 4 header slots
//! sequence ptr array (1 per scene) | tick ptr array (1 per scene)
//! text ptr array (1 per text id)
//! per scene: sequence records, tick array (u16 LE, 0xFFFF terminated)
//! color table (u32 LE per color) | NUL-terminated texts
//! ```
//!
//! Pointer slots are reserved as zeros while writing and resolved against a
//! load address once every section offset is known.

use byteorder::{ByteOrder, LittleEndian};
use std::collections::BTreeMap;

use crate::project::Project;
use crate::settings::{parse_hex_u32, PatchConfig};
use crate::tables::{TextId, Tables};
use crate::timeline::{compact, ms_to_ticks};
use crate::{Result, SubsError};

/// SH-4 player routine the header fields and tables are appended to.
pub const PLAYER_STUB: [u8; 236] = [
    0x22, 0x4F, 0x08, 0x42, 0x3B, 0xD0, 0x02, 0x60, 0x3C, 0xD7, 0x2C, 0x37, 0x72, 0x67, 0x3A, 0xD3,
    0x2C, 0x33, 0x02, 0xA0, 0x32, 0x63, 0x02, 0x77, 0x04, 0x73, 0x71, 0x61, 0x1D, 0x61, 0x16, 0x30,
    0xF9, 0x89, 0x30, 0x61, 0x32, 0xD7, 0x72, 0x67, 0x76, 0x2F, 0x31, 0x84, 0x08, 0x40, 0x35, 0xD7,
    0x7E, 0x07, 0x2F, 0xD0, 0x72, 0x20, 0x32, 0x84, 0x0C, 0x62, 0x33, 0x84, 0xFF, 0x88, 0x03, 0x8B,
    0x01, 0xE7, 0x76, 0x2F, 0x03, 0xA0, 0x00, 0xE4, 0x00, 0xE7, 0x76, 0x2F, 0x0C, 0x64, 0x28, 0x44,
    0x2B, 0x24, 0x46, 0x2F, 0xD8, 0x7F, 0xF3, 0x66, 0x63, 0x62, 0x08, 0x41, 0x28, 0xD0, 0x0C, 0x31,
    0x13, 0x63, 0x32, 0x63, 0x00, 0xE8, 0x30, 0x60, 0x01, 0x73, 0x08, 0x20, 0x20, 0x89, 0x0A, 0x88,
    0x03, 0x89, 0x00, 0x26, 0x01, 0x76, 0xF6, 0xAF, 0x01, 0x78, 0x00, 0xE0, 0x00, 0x26, 0x36, 0x2F,
    0xF3, 0x65, 0x04, 0x75, 0xFC, 0x50, 0x00, 0x88, 0x07, 0x89, 0x24, 0xE0, 0x88, 0x30, 0x01, 0x40,
    0x02, 0x70, 0x03, 0x61, 0x2E, 0xE0, 0x14, 0x0F, 0xFB, 0x54, 0x14, 0xD0, 0x0B, 0x40, 0x56, 0x2F,
    0xFC, 0x54, 0x01, 0x74, 0x4C, 0x1F, 0xF6, 0x63, 0xF6, 0x63, 0xF3, 0x66, 0xDB, 0xAF, 0x00, 0xE8,
    0x00, 0xE0, 0x00, 0x26, 0xF3, 0x63, 0xFB, 0x50, 0x00, 0x88, 0x08, 0x89, 0x24, 0xE0, 0x88, 0x30,
    0x01, 0x40, 0x02, 0x70, 0xFA, 0x54, 0x4D, 0x67, 0x28, 0x40, 0x7B, 0x20, 0x0A, 0x1F, 0xFA, 0x54,
    0x06, 0xD0, 0x0B, 0x40, 0x36, 0x2F, 0x04, 0x7F, 0xF6, 0x67, 0x05, 0xD0, 0x72, 0x20, 0x04, 0x7F,
    0x28, 0x7F, 0x04, 0x7F, 0x26, 0x4F, 0x0B, 0x00, 0x09, 0x00, 0x00, 0x00,
];

/// X value telling the runtime to center the line itself.
pub const AUTO_CENTER_X: u8 = 0xFF;
pub const TICK_SENTINEL: u16 = 0xFFFF;

/// Something a pointer slot can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Anchor {
    SequenceArray,
    TickArray,
    TextPointerArray,
    ColorTable,
    /// Records of the n-th scene in ascending key order.
    Sequence(usize),
    /// Tick array of the n-th scene in ascending key order.
    Ticks(usize),
    Text(TextId),
}

/// A 4-byte slot that must hold `load_address + target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    pub slot: usize,
    pub anchor: Anchor,
    pub target: usize,
}

/// Assembled blob: bytes plus the slots that still need a load address.
#[derive(Debug, Clone)]
pub struct CompiledBlob {
    pub bytes: Vec<u8>,
    pub relocations: Vec<Relocation>,
    anchors: BTreeMap<Anchor, usize>,
}

impl CompiledBlob {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Local offset of a section, if it was emitted.
    pub fn anchor(&self, anchor: Anchor) -> Option<usize> {
        self.anchors.get(&anchor).copied()
    }

    /// Write `(load_address + target) mod 2^32` into every pointer slot.
    pub fn link(&mut self, load_address: u32) {
        for reloc in &self.relocations {
            let address = load_address.wrapping_add(reloc.target as u32);
            LittleEndian::write_u32(&mut self.bytes[reloc.slot..reloc.slot + 4], address);
        }
    }
}

#[derive(Default)]
struct Writer {
    buf: Vec<u8>,
    slots: Vec<(usize, Anchor)>,
    anchors: BTreeMap<Anchor, usize>,
}

impl Writer {
    fn align(&mut self) {
        let pad = (4 - self.buf.len() % 4) % 4;
        self.buf.extend(std::iter::repeat(0u8).take(pad));
    }

    fn mark(&mut self, anchor: Anchor) {
        self.align();
        self.anchors.insert(anchor, self.buf.len());
    }

    fn reserve(&mut self, anchor: Anchor) {
        self.slots.push((self.buf.len(), anchor));
        self.buf.extend_from_slice(&[0; 4]);
    }

    fn put_u16(&mut self, v: u16) {
        let at = self.buf.len();
        self.buf.resize(at + 2, 0);
        LittleEndian::write_u16(&mut self.buf[at..], v);
    }

    fn put_u32(&mut self, v: u32) {
        let at = self.buf.len();
        self.buf.resize(at + 4, 0);
        LittleEndian::write_u32(&mut self.buf[at..], v);
    }

    fn finish(self) -> Result<CompiledBlob> {
        let relocations = self
            .slots
            .into_iter()
            .map(|(slot, anchor)| {
                let target = self.anchors.get(&anchor).copied().ok_or_else(|| {
                    SubsError::Config(format!("pointer slot at {slot:#x} refers to unplaced {anchor:?}"))
                })?;
                Ok(Relocation {
                    slot,
                    anchor,
                    target,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(CompiledBlob {
            bytes: self.buf,
            relocations,
            anchors: self.anchors,
        })
    }
}

/// Build the unlinked blob for `project`.
///
/// `color_pointer` is the runtime color pointer read out of the target
/// executable; the rest of the header comes from `cfg`.
pub fn assemble(project: &Project, cfg: &PatchConfig, color_pointer: u32) -> Result<CompiledBlob> {
    let tables = Tables::build(project)?;
    let scene_count = project.scenes.len();
    let mut w = Writer::default();

    w.buf.extend_from_slice(&PLAYER_STUB);
    w.put_u32(cfg.njprint_offset);
    w.put_u32(color_pointer);
    w.put_u32(cfg.timer_offset);

    w.reserve(Anchor::SequenceArray);
    w.reserve(Anchor::TickArray);
    w.reserve(Anchor::TextPointerArray);
    w.reserve(Anchor::ColorTable);

    w.mark(Anchor::SequenceArray);
    for scene in 0..scene_count {
        w.reserve(Anchor::Sequence(scene));
    }
    w.mark(Anchor::TickArray);
    for scene in 0..scene_count {
        w.reserve(Anchor::Ticks(scene));
    }
    w.mark(Anchor::TextPointerArray);
    for (id, _) in tables.texts.stored() {
        w.reserve(Anchor::Text(id));
    }

    for (scene, entries) in project.scenes.values().enumerate() {
        let states = compact(entries);

        w.mark(Anchor::Sequence(scene));
        for state in &states {
            if state.active.is_empty() {
                w.buf.extend_from_slice(&[0; 4]);
                continue;
            }
            for &idx in &state.active {
                let entry = &entries[idx];
                let text_id = tables.texts.id(entry.text.as_bytes()).ok_or_else(|| {
                    SubsError::Config(format!("text of entry {idx} missing from text table"))
                })?;
                let argb = parse_hex_u32("color", &entry.color)?;
                let color_id = tables.colors.id(argb).ok_or_else(|| {
                    SubsError::Config(format!("color {argb:08x} missing from color table"))
                })?;
                let x = if entry.auto_center {
                    AUTO_CENTER_X
                } else {
                    entry.x as u8
                };
                w.buf
                    .extend_from_slice(&[text_id.0 as u8, color_id.0 as u8, entry.y as u8, x]);
            }
        }

        w.mark(Anchor::Ticks(scene));
        for state in states.iter().skip(1) {
            w.put_u16(ms_to_ticks(state.time_ms, cfg.fps));
        }
        w.put_u16(TICK_SENTINEL);
    }

    w.mark(Anchor::ColorTable);
    for argb in tables.colors.values() {
        w.put_u32(argb);
    }

    for (id, stored) in tables.texts.stored() {
        w.mark(Anchor::Text(id));
        w.buf.extend_from_slice(&stored);
    }

    let blob = w.finish()?;
    log::debug!(
        "assembled {} bytes: {} scenes, {} texts, {} colors, {} pointer slots",
        blob.len(),
        scene_count,
        tables.texts.len(),
        tables.colors.len(),
        blob.relocations.len()
    );
    Ok(blob)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Entry;
    use crate::settings::AsmSettings;

    const LOAD: u32 = 0x8c20_0000;
    const COLOR_PTR: u32 = 0x8c0f_f000;
    const HEADER: usize = PLAYER_STUB.len() + 12;

    fn config() -> PatchConfig {
        AsmSettings {
            njprint_offset: "0x8c012340".into(),
            timer_offset: "0x8c0abcd0".into(),
            ..AsmSettings::default()
        }
        .resolve()
        .unwrap()
    }

    fn u16_at(bytes: &[u8], at: usize) -> u16 {
        LittleEndian::read_u16(&bytes[at..at + 2])
    }

    fn u32_at(bytes: &[u8], at: usize) -> u32 {
        LittleEndian::read_u32(&bytes[at..at + 4])
    }

    fn ticks(blob: &CompiledBlob, scene: usize) -> Vec<u16> {
        let mut at = blob.anchor(Anchor::Ticks(scene)).unwrap();
        let mut out = Vec::new();
        loop {
            let t = u16_at(&blob.bytes, at);
            out.push(t);
            if t == TICK_SENTINEL {
                return out;
            }
            at += 2;
        }
    }

    fn records(blob: &CompiledBlob, scene: usize) -> Vec<[u8; 4]> {
        let start = blob.anchor(Anchor::Sequence(scene)).unwrap();
        let end = blob.anchor(Anchor::Ticks(scene)).unwrap();
        blob.bytes[start..end]
            .chunks(4)
            .map(|c| [c[0], c[1], c[2], c[3]])
            .collect()
    }

    fn single_entry_project() -> Project {
        let mut p = Project::default();
        let mut e = Entry::new(0, 1000, "Hi");
        e.x = 2;
        e.y = 25;
        p.push_entry(0, e).unwrap();
        p
    }

    #[test]
    fn header_carries_stub_and_fields() {
        let blob = assemble(&single_entry_project(), &config(), COLOR_PTR).unwrap();
        assert_eq!(&blob.bytes[..PLAYER_STUB.len()], &PLAYER_STUB[..]);
        assert_eq!(u32_at(&blob.bytes, 236), 0x8c01_2340);
        assert_eq!(u32_at(&blob.bytes, 240), COLOR_PTR);
        assert_eq!(u32_at(&blob.bytes, 244), 0x8c0a_bcd0);
        assert_eq!(blob.anchor(Anchor::SequenceArray), Some(HEADER + 16));
    }

    #[test]
    fn single_entry_scenario() {
        let blob = assemble(&single_entry_project(), &config(), COLOR_PTR).unwrap();
        assert_eq!(ticks(&blob, 0), vec![60, 0xFFFF]);
        assert_eq!(records(&blob, 0), vec![[1, 0, 25, 0xFF], [0, 0, 0, 0]]);

        let colors = blob.anchor(Anchor::ColorTable).unwrap();
        assert_eq!(u32_at(&blob.bytes, colors), 0xffbf_bfbf);

        let hi = blob.anchor(Anchor::Text(TextId(1))).unwrap();
        assert_eq!(&blob.bytes[hi..hi + 3], b"Hi\0");
        assert_eq!(blob.bytes.len(), hi + 3);
    }

    #[test]
    fn manual_x_is_truncated_to_a_byte() {
        let mut p = Project::default();
        let mut e = Entry::new(100, 200, "a");
        e.auto_center = false;
        e.x = 0x104;
        e.y = 0x1FF;
        p.push_entry(0, e).unwrap();
        let blob = assemble(&p, &config(), COLOR_PTR).unwrap();
        assert_eq!(
            records(&blob, 0),
            vec![[0, 0, 0, 0], [1, 0, 0xFF, 0x04], [0, 0, 0, 0]]
        );
        assert_eq!(ticks(&blob, 0), vec![6, 12, 0xFFFF]);
    }

    #[test]
    fn overlapping_entries_emit_one_record_per_visible_entry() {
        let mut p = Project::default();
        p.push_entry(0, Entry::new(500, 1500, "A")).unwrap();
        p.push_entry(0, Entry::new(1000, 2000, "B")).unwrap();
        let blob = assemble(&p, &config(), COLOR_PTR).unwrap();
        assert_eq!(
            records(&blob, 0),
            vec![
                [0, 0, 0, 0],
                [1, 0, 25, 0xFF],
                [1, 0, 25, 0xFF],
                [2, 0, 25, 0xFF],
                [2, 0, 25, 0xFF],
                [0, 0, 0, 0],
            ]
        );
        assert_eq!(ticks(&blob, 0), vec![30, 60, 90, 120, 0xFFFF]);
    }

    #[test]
    fn empty_scene_keeps_minimal_form() {
        let mut p = single_entry_project();
        p.add_scene();
        let blob = assemble(&p, &config(), COLOR_PTR).unwrap();
        assert_eq!(records(&blob, 1), vec![[0, 0, 0, 0]]);
        assert_eq!(ticks(&blob, 1), vec![0xFFFF]);
    }

    #[test]
    fn empty_project_still_assembles() {
        let blob = assemble(&Project::default(), &config(), COLOR_PTR).unwrap();
        assert_eq!(records(&blob, 0), vec![[0, 0, 0, 0]]);
        assert_eq!(ticks(&blob, 0), vec![0xFFFF]);
        let empty = blob.anchor(Anchor::Text(TextId(0))).unwrap();
        assert_eq!(blob.anchor(Anchor::ColorTable), Some(empty));
        assert_eq!(&blob.bytes[empty..], &[0]);
    }

    #[test]
    fn sparse_scene_keys_use_dense_slots() {
        let mut p = Project::default();
        p.scenes.clear();
        p.scenes.insert(7, vec![Entry::new(0, 500, "seven")]);
        p.scenes.insert(2, vec![Entry::new(0, 500, "two")]);
        let mut blob = assemble(&p, &config(), COLOR_PTR).unwrap();
        blob.link(LOAD);

        let seq_array = blob.anchor(Anchor::SequenceArray).unwrap();
        let tick_array = blob.anchor(Anchor::TickArray).unwrap();
        assert_eq!(tick_array, seq_array + 8);

        let first = u32_at(&blob.bytes, seq_array) - LOAD;
        assert_eq!(first as usize, blob.anchor(Anchor::Sequence(0)).unwrap());
        // Scene 2 comes first, so its text got id 1.
        assert_eq!(records(&blob, 0)[0], [1, 0, 25, 0xFF]);
        assert_eq!(records(&blob, 1)[0], [2, 0, 25, 0xFF]);
    }

    #[test]
    fn every_section_and_slot_is_aligned() {
        let mut p = single_entry_project();
        p.push_entry(0, Entry::new(1500, 2500, "odd")).unwrap();
        let id = p.add_scene();
        p.push_entry(id, Entry::new(10, 20, "x")).unwrap();
        let blob = assemble(&p, &config(), COLOR_PTR).unwrap();

        for reloc in &blob.relocations {
            assert_eq!(reloc.slot % 4, 0, "{:?}", reloc.anchor);
            assert_eq!(reloc.target % 4, 0, "{:?}", reloc.anchor);
        }
    }

    #[test]
    fn linked_slots_round_trip_to_local_offsets() {
        let mut p = single_entry_project();
        let id = p.add_scene();
        p.push_entry(id, Entry::new(0, 90, "second")).unwrap();
        let mut blob = assemble(&p, &config(), COLOR_PTR).unwrap();
        blob.link(LOAD);

        // 4 header slots + 2 scenes * 2 + 3 texts.
        assert_eq!(blob.relocations.len(), 4 + 4 + 3);
        for reloc in &blob.relocations {
            let stored = u32_at(&blob.bytes, reloc.slot);
            assert_eq!(stored.wrapping_sub(LOAD) as usize, reloc.target);
            assert_eq!(blob.anchor(reloc.anchor), Some(reloc.target));
        }
    }

    #[test]
    fn link_wraps_around_the_address_space() {
        let mut blob = assemble(&single_entry_project(), &config(), COLOR_PTR).unwrap();
        blob.link(0xFFFF_FFF0);
        let slot = blob.relocations[0];
        let stored = u32_at(&blob.bytes, slot.slot);
        assert_eq!(stored, 0xFFFF_FFF0u32.wrapping_add(slot.target as u32));
    }

    #[test]
    fn assembly_is_deterministic() {
        let mut p = Project::default();
        for i in 0..5u64 {
            let mut e = Entry::new(i * 300, i * 300 + 700, format!("line {}", i % 3));
            e.set_color(0xff00_0000 | (i as u32 * 0x1111));
            p.push_entry(0, e).unwrap();
        }
        let a = assemble(&p, &config(), COLOR_PTR).unwrap();
        let b = assemble(&p, &config(), COLOR_PTR).unwrap();
        assert_eq!(a.bytes, b.bytes);
        assert_eq!(a.relocations, b.relocations);
    }
}
