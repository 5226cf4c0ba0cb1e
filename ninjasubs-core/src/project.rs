use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::settings::{AsmSettings, DEFAULT_COLOR_ARGB};
use crate::{LineOverflow, Result, SubsError, MAX_LINE_BYTES};

fn default_color() -> String {
    DEFAULT_COLOR_ARGB.to_string()
}

fn default_opacity() -> u8 {
    0xFF
}

fn default_auto_center() -> bool {
    true
}

/// One timed caption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Milliseconds.
    pub start: u64,
    /// Milliseconds.
    pub end: u64,
    pub text: String,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
    /// ARGB as 8 hex digits.
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default = "default_opacity")]
    pub opacity: u8,
    #[serde(default = "default_auto_center")]
    pub auto_center: bool,
}

impl Entry {
    /// New entry with the placement defaults used by the editor.
    pub fn new(start: u64, end: u64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
            x: 2,
            y: 25,
            color: default_color(),
            opacity: default_opacity(),
            auto_center: true,
        }
    }

    /// Replace the color and pick up its alpha channel as the opacity.
    pub fn set_color(&mut self, argb: u32) {
        self.color = format!("{argb:08x}");
        self.opacity = (argb >> 24) as u8;
    }

    /// Replace the alpha channel of the color, keeping RGB.
    pub fn set_opacity(&mut self, opacity: u8) -> Result<()> {
        let argb = crate::settings::parse_hex_u32("color", &self.color)?;
        self.set_color((argb & 0x00FF_FFFF) | (u32::from(opacity) << 24));
        Ok(())
    }

    /// Set the text after checking every line fits, re-centering `x` when
    /// auto-center is on.
    pub fn set_text(&mut self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        validate_text(&text)?;
        if self.auto_center {
            self.x = centered_x(text.split('\n').next().unwrap_or(""));
        }
        self.text = text;
        Ok(())
    }
}

/// Check that every `\n`-separated line fits the runtime line width.
pub fn validate_text(text: &str) -> Result<()> {
    let lines: Vec<LineOverflow> = text
        .split('\n')
        .enumerate()
        .filter(|(_, line)| line.len() > MAX_LINE_BYTES)
        .map(|(i, line)| LineOverflow {
            line: i + 1,
            bytes: line.len(),
        })
        .collect();

    if lines.is_empty() {
        Ok(())
    } else {
        Err(SubsError::LineTooLong { lines })
    }
}

/// Column that centers `line` on the runtime's 36-byte text row.
pub fn centered_x(line: &str) -> i32 {
    let len = line.len() as i32;
    (MAX_LINE_BYTES as i32 - len).div_euclid(2) + 2
}

/// The full editable dataset; the only thing the compiler reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub scenes: BTreeMap<u32, Vec<Entry>>,
    #[serde(default)]
    pub scene_names: BTreeMap<u32, String>,
    #[serde(default)]
    pub asm_settings: AsmSettings,
}

impl Default for Project {
    fn default() -> Self {
        Self {
            scenes: BTreeMap::from([(0, Vec::new())]),
            scene_names: BTreeMap::from([(0, "None".to_string())]),
            asm_settings: AsmSettings::default(),
        }
    }
}

impl Project {
    pub fn new_with_binary(binary_path: impl Into<String>) -> Self {
        let mut project = Self::default();
        project.asm_settings.binary_path = binary_path.into();
        project
    }

    pub fn from_json(data: &str) -> Result<Self> {
        let mut project: Project = serde_json::from_str(data)?;
        if project.scenes.is_empty() {
            project.scenes.insert(0, Vec::new());
        }
        for entries in project.scenes.values_mut() {
            canonicalize_colors(entries);
            sort_scene(entries);
        }
        Ok(project)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(SubsError::io(path))?;
        Self::from_json(&data)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json()?).map_err(SubsError::io(path))
    }

    pub fn has_any_entries(&self) -> bool {
        self.scenes.values().any(|entries| !entries.is_empty())
    }

    pub fn scene(&self, id: u32) -> Result<&[Entry]> {
        self.scenes
            .get(&id)
            .map(Vec::as_slice)
            .ok_or_else(|| SubsError::Config(format!("scene {id} does not exist")))
    }

    /// Append a new empty scene after the highest existing id.
    pub fn add_scene(&mut self) -> u32 {
        let id = self.scenes.keys().next_back().map_or(0, |k| k + 1);
        self.scenes.insert(id, Vec::new());
        self.scene_names.insert(id, "None".to_string());
        id
    }

    pub fn delete_scene(&mut self, id: u32) -> Result<()> {
        if !self.scenes.contains_key(&id) {
            return Err(SubsError::Config(format!("scene {id} does not exist")));
        }
        if self.scenes.len() <= 1 {
            return Err(SubsError::Config("cannot delete the last scene".to_string()));
        }
        self.scenes.remove(&id);
        self.scene_names.remove(&id);
        Ok(())
    }

    pub fn rename_scene(&mut self, id: u32, name: impl Into<String>) -> Result<()> {
        self.scene(id)?;
        self.scene_names.insert(id, name.into());
        Ok(())
    }

    /// Add an entry to a scene, keeping the scene ordered by start time.
    pub fn push_entry(&mut self, scene: u32, mut entry: Entry) -> Result<()> {
        validate_text(&entry.text)?;
        canonicalize_colors(std::slice::from_mut(&mut entry));
        let entries = self.scene_mut(scene)?;
        entries.push(entry);
        sort_scene(entries);
        Ok(())
    }

    /// Append an empty one-second entry starting where the last entry ends,
    /// styled like it. Returns the new entry's index.
    pub fn append_after_last(&mut self, scene: u32) -> Result<usize> {
        let entries = self.scene_mut(scene)?;
        let entry = match entries.last() {
            Some(last) => Entry {
                start: last.end,
                end: last.end.saturating_add(1000),
                text: String::new(),
                ..last.clone()
            },
            None => Entry {
                x: 0,
                y: 0,
                ..Entry::new(0, 1000, "")
            },
        };
        let start = entry.start;
        entries.push(entry);
        sort_scene(entries);
        // Stable sort keeps the new entry after every older one with its start.
        Ok(entries.partition_point(|e| e.start <= start) - 1)
    }

    /// Remove and return an entry; the rest of the scene stays sorted.
    pub fn remove_entry(&mut self, scene: u32, index: usize) -> Result<Entry> {
        let entries = self.scene_mut(scene)?;
        if index >= entries.len() {
            return Err(SubsError::Config(format!("scene {scene} has no entry {index}")));
        }
        let removed = entries.remove(index);
        sort_scene(entries);
        Ok(removed)
    }

    pub fn set_entry_times(&mut self, scene: u32, index: usize, start: u64, end: u64) -> Result<()> {
        let entries = self.scene_mut(scene)?;
        let entry = entries
            .get_mut(index)
            .ok_or_else(|| SubsError::Config(format!("scene {scene} has no entry {index}")))?;
        entry.start = start;
        entry.end = end;
        sort_scene(entries);
        Ok(())
    }

    /// Replace a scene's content wholesale, e.g. with an SRT import.
    pub fn replace_scene(&mut self, scene: u32, mut entries: Vec<Entry>) -> Result<()> {
        for entry in &entries {
            validate_text(&entry.text)?;
        }
        canonicalize_colors(&mut entries);
        sort_scene(&mut entries);
        *self.scene_mut(scene)? = entries;
        Ok(())
    }

    fn scene_mut(&mut self, id: u32) -> Result<&mut Vec<Entry>> {
        self.scenes
            .get_mut(&id)
            .ok_or_else(|| SubsError::Config(format!("scene {id} does not exist")))
    }
}

fn sort_scene(entries: &mut [Entry]) {
    entries.sort_by_key(|e| e.start);
}

// Colors are stored as 8 lower-case hex digits so that ascending string order
// and ascending ARGB order agree. Unparseable colors are left for the table
// builder to reject.
fn canonicalize_colors(entries: &mut [Entry]) {
    for entry in entries {
        if let Ok(argb) = crate::settings::parse_hex_u32("color", &entry.color) {
            entry.color = format!("{argb:08x}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_reports_each_long_line() {
        let ok = "a".repeat(36);
        let long = "b".repeat(37);
        assert!(validate_text(&ok).is_ok());

        let err = validate_text(&format!("{ok}\n{long}\n{}", "é".repeat(20))).unwrap_err();
        match err {
            SubsError::LineTooLong { lines } => {
                assert_eq!(
                    lines,
                    vec![
                        LineOverflow { line: 2, bytes: 37 },
                        LineOverflow { line: 3, bytes: 40 },
                    ]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn centered_x_uses_byte_length() {
        assert_eq!(centered_x(""), 20);
        assert_eq!(centered_x("Hi"), 19);
        assert_eq!(centered_x(&"x".repeat(36)), 2);
        assert_eq!(centered_x(&"x".repeat(35)), 2);
    }

    #[test]
    fn set_text_recenters_from_first_line() {
        let mut e = Entry::new(0, 100, "");
        e.set_text("Hello\nworld!!!").unwrap();
        assert_eq!(e.x, centered_x("Hello"));

        e.auto_center = false;
        e.x = 7;
        e.set_text("Other").unwrap();
        assert_eq!(e.x, 7);
    }

    #[test]
    fn opacity_tracks_color_alpha() {
        let mut e = Entry::new(0, 100, "a");
        e.set_opacity(0x80).unwrap();
        assert_eq!(e.color, "80bfbfbf");
        assert_eq!(e.opacity, 0x80);

        e.set_color(0x11223344);
        assert_eq!(e.opacity, 0x11);
    }

    #[test]
    fn retimed_entry_resorts_scene() {
        let mut p = Project::default();
        p.push_entry(0, Entry::new(100, 200, "a")).unwrap();
        p.push_entry(0, Entry::new(300, 400, "b")).unwrap();
        p.push_entry(0, Entry::new(50, 60, "c")).unwrap();
        let texts: Vec<_> = p.scene(0).unwrap().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, ["c", "a", "b"]);

        p.set_entry_times(0, 0, 500, 600).unwrap();
        let texts: Vec<_> = p.scene(0).unwrap().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, ["a", "b", "c"]);
    }

    #[test]
    fn last_scene_cannot_be_deleted() {
        let mut p = Project::default();
        assert!(p.delete_scene(0).is_err());
        let id = p.add_scene();
        assert_eq!(id, 1);
        p.delete_scene(0).unwrap();
        assert_eq!(p.add_scene(), 2);
        assert!(p.delete_scene(5).is_err());
    }

    #[test]
    fn loads_document_with_string_scene_keys() {
        let json = r#"{
            "scenes": {"3": [{"start": 10, "end": 20, "text": "b"},
                             {"start": 0, "end": 5, "text": "a", "x": 4, "y": 9,
                              "color": "ff102030", "opacity": 255, "auto_center": false}]},
            "scene_names": {"3": "Intro"},
            "asm_settings": {"game_binary": "1ST_READ.BIN"}
        }"#;
        let p = Project::from_json(json).unwrap();
        let scene = p.scene(3).unwrap();
        assert_eq!(scene[0].text, "a");
        assert!(!scene[0].auto_center);
        assert_eq!(scene[1].color, "ffbfbfbf");
        assert!(scene[1].auto_center);
        assert_eq!(p.scene_names[&3], "Intro");

        let back = Project::from_json(&p.to_json().unwrap()).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn empty_document_gets_a_scene() {
        let p = Project::from_json("{}").unwrap();
        assert_eq!(p.scenes.len(), 1);
        assert!(p.scene(0).unwrap().is_empty());
        assert!(!p.has_any_entries());
    }

    #[test]
    fn appended_entry_follows_the_last_one() {
        let mut p = Project::default();
        assert_eq!(p.append_after_last(0).unwrap(), 0);
        let first = &p.scene(0).unwrap()[0];
        assert_eq!((first.start, first.end, first.x, first.y), (0, 1000, 0, 0));
        assert_eq!(first.color, "ffbfbfbf");

        let mut styled = Entry::new(2000, 3500, "styled");
        styled.x = 9;
        styled.y = 4;
        styled.auto_center = false;
        styled.set_color(0x80102030);
        p.push_entry(0, styled).unwrap();

        assert_eq!(p.append_after_last(0).unwrap(), 2);
        let added = &p.scene(0).unwrap()[2];
        assert_eq!((added.start, added.end), (3500, 4500));
        assert_eq!(added.text, "");
        assert_eq!((added.x, added.y), (9, 4));
        assert_eq!(added.color, "80102030");
        assert_eq!(added.opacity, 0x80);
        assert!(!added.auto_center);
    }

    #[test]
    fn removed_entry_leaves_scene_sorted() {
        let mut p = Project::default();
        p.push_entry(0, Entry::new(100, 200, "a")).unwrap();
        p.push_entry(0, Entry::new(300, 400, "b")).unwrap();
        p.push_entry(0, Entry::new(500, 600, "c")).unwrap();

        assert_eq!(p.remove_entry(0, 1).unwrap().text, "b");
        let texts: Vec<_> = p.scene(0).unwrap().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, ["a", "c"]);
        assert!(p.remove_entry(0, 2).is_err());
        assert!(p.remove_entry(7, 0).is_err());
    }

    #[test]
    fn colors_are_stored_lower_case() {
        let json = r#"{"scenes": {"0": [{"start": 0, "end": 5, "text": "a", "color": "FFBFBFBF"},
                                       {"start": 5, "end": 9, "text": "b", "color": "0xBFBFBF"}]}}"#;
        let p = Project::from_json(json).unwrap();
        let colors: Vec<_> = p.scene(0).unwrap().iter().map(|e| e.color.as_str()).collect();
        assert_eq!(colors, ["ffbfbfbf", "00bfbfbf"]);

        let mut p = Project::default();
        let mut e = Entry::new(0, 10, "x");
        e.color = "FF00AA00".to_string();
        p.push_entry(0, e).unwrap();
        assert_eq!(p.scene(0).unwrap()[0].color, "ff00aa00");
    }

    #[test]
    fn save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.prj");
        let mut p = Project::new_with_binary("1ST_READ.BIN");
        p.push_entry(0, Entry::new(0, 1000, "Hi")).unwrap();
        p.save(&path).unwrap();
        assert_eq!(Project::load(&path).unwrap(), p);
    }
}
