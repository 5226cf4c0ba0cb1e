use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::project::Project;
use crate::settings::parse_hex_u32;
use crate::{Result, SubsError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColorId(pub u32);

/// Unique texts shared by every scene. Id 0 is always the empty string.
#[derive(Debug, Clone)]
pub struct TextTable {
    ids_by_bytes: HashMap<Vec<u8>, TextId>,
    bytes_by_id: Vec<Vec<u8>>,
}

impl Default for TextTable {
    fn default() -> Self {
        Self {
            ids_by_bytes: HashMap::from([(Vec::new(), TextId(0))]),
            bytes_by_id: vec![Vec::new()],
        }
    }
}

impl TextTable {
    pub fn intern(&mut self, text: &[u8]) -> TextId {
        if let Some(&id) = self.ids_by_bytes.get(text) {
            return id;
        }
        let id = TextId(self.bytes_by_id.len() as u32);
        self.bytes_by_id.push(text.to_vec());
        self.ids_by_bytes.insert(text.to_vec(), id);
        id
    }

    pub fn id(&self, text: &[u8]) -> Option<TextId> {
        self.ids_by_bytes.get(text).copied()
    }

    /// Never zero: the empty string is always present.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.bytes_by_id.len()
    }

    /// Stored form of each text in id order: raw bytes plus one NUL.
    pub fn stored(&self) -> impl Iterator<Item = (TextId, Vec<u8>)> + '_ {
        self.bytes_by_id.iter().enumerate().map(|(i, bytes)| {
            let mut stored = Vec::with_capacity(bytes.len() + 1);
            stored.extend_from_slice(bytes);
            stored.push(0);
            (TextId(i as u32), stored)
        })
    }
}

/// Unique ARGB colors, ids assigned in ascending color order.
#[derive(Debug, Clone, Default)]
pub struct ColorTable {
    ids: BTreeMap<u32, ColorId>,
}

impl ColorTable {
    pub fn from_colors(colors: BTreeSet<u32>) -> Self {
        let ids = colors
            .into_iter()
            .enumerate()
            .map(|(i, argb)| (argb, ColorId(i as u32)))
            .collect();
        Self { ids }
    }

    pub fn id(&self, argb: u32) -> Option<ColorId> {
        self.ids.get(&argb).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Colors in id order.
    pub fn values(&self) -> impl Iterator<Item = u32> + '_ {
        self.ids.keys().copied()
    }
}

/// Both dedup tables for a project.
#[derive(Debug, Clone)]
pub struct Tables {
    pub texts: TextTable,
    pub colors: ColorTable,
}

impl Tables {
    /// Walk scenes in ascending key order and entries in scene order.
    pub fn build(project: &Project) -> Result<Self> {
        let mut texts = TextTable::default();
        let mut colors = BTreeSet::new();

        for entries in project.scenes.values() {
            for entry in entries {
                texts.intern(entry.text.as_bytes());
                colors.insert(parse_hex_u32("color", &entry.color)?);
            }
        }

        let tables = Self {
            texts,
            colors: ColorTable::from_colors(colors),
        };
        tables.check_record_width()?;
        Ok(tables)
    }

    // Sequence records store both ids in a single byte each.
    fn check_record_width(&self) -> Result<()> {
        if self.texts.len() > 0x100 {
            return Err(SubsError::TableOverflow {
                table: "text",
                count: self.texts.len(),
            });
        }
        if self.colors.len() > 0x100 {
            return Err(SubsError::TableOverflow {
                table: "color",
                count: self.colors.len(),
            });
        }
        Ok(())
    }
}
