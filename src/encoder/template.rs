//! Driver templates and where to get them.
//!
//! A template is pure data: driver code assembled at `base`, entry offsets,
//! fixed-capacity table slots and the relocation list that lets the encoder
//! move the driver to another load address. Templates are immutable once
//! built and are shared as `Arc<Template>`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{ConvertError, Result};
use crate::model::{CommandKind, TableKind};

use super::driver;

/// A block of the driver's data area with a fixed row capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    /// Instrument table, 6 columns.
    Instruments,
    /// Command table, 3 columns.
    Commands,
    /// Wave program table.
    Wave,
    /// Pulse program table.
    Pulse,
    /// Filter program table.
    Filter,
    /// Arpeggio table.
    Arpeggio,
}

impl Slot {
    /// Id used in container table descriptors.
    pub fn id(self) -> u8 {
        match self {
            Slot::Instruments => 0x00,
            Slot::Commands => 0x01,
            Slot::Wave => 0x02,
            Slot::Pulse => 0x03,
            Slot::Filter => 0x04,
            Slot::Arpeggio => 0x05,
        }
    }

    /// Slot for a container descriptor id.
    pub fn from_id(id: u8) -> Option<Self> {
        [
            Slot::Instruments,
            Slot::Commands,
            Slot::Wave,
            Slot::Pulse,
            Slot::Filter,
            Slot::Arpeggio,
        ]
        .into_iter()
        .find(|slot| slot.id() == id)
    }

    /// Slot holding a program table of `kind`.
    pub fn for_table(kind: TableKind) -> Self {
        match kind {
            TableKind::Wave => Slot::Wave,
            TableKind::Pulse => Slot::Pulse,
            TableKind::Filter => Slot::Filter,
            TableKind::Arpeggio => Slot::Arpeggio,
        }
    }

    /// Program table kind stored in this slot.
    pub fn table_kind(self) -> Option<TableKind> {
        match self {
            Slot::Wave => Some(TableKind::Wave),
            Slot::Pulse => Some(TableKind::Pulse),
            Slot::Filter => Some(TableKind::Filter),
            Slot::Arpeggio => Some(TableKind::Arpeggio),
            Slot::Instruments | Slot::Commands => None,
        }
    }
}

/// Addressable part of a driver layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Symbol {
    /// Start of the driver code.
    Code,
    /// Driver variables.
    Variables,
    /// A table slot (first column).
    Table(Slot),
    /// Frequency table, low bytes.
    FreqLo,
    /// Frequency table, high bytes.
    FreqHi,
    /// Song settings (initial tempo).
    SongSettings,
    /// Per-voice order list pointers, low bytes.
    OrderListsLo,
    /// Per-voice order list pointers, high bytes.
    OrderListsHi,
    /// Sequence pointers, low bytes.
    SequencesLo,
    /// Sequence pointers, high bytes.
    SequencesHi,
    /// Start of the variable-length music data.
    MusicData,
}

/// A 16-bit operand in the driver code that holds `symbol + addend`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relocation {
    /// Offset of the operand from the start of the code.
    pub offset: u16,
    /// Referenced symbol.
    pub symbol: Symbol,
    /// Byte offset from the symbol.
    pub addend: u16,
}

/// Fixed-capacity slot in the data area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    /// What the slot holds.
    pub slot: Slot,
    /// Column count (bytes per row).
    pub columns: u8,
    /// Rows reserved per column.
    pub capacity: u8,
    /// Display name.
    pub name: String,
}

/// Driver entry points, relative to `base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoints {
    /// Init routine.
    pub init: u16,
    /// Per-frame play routine.
    pub play: u16,
    /// Silence routine.
    pub stop: u16,
}

/// Variable-size limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    /// Sequence pointer slots.
    pub max_sequences: u8,
    /// Entries per order list (markers excluded).
    pub max_order_entries: u8,
}

/// A named address the editor may want to inspect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePointer {
    /// Pointer name.
    pub name: String,
    /// Referenced symbol.
    pub symbol: Symbol,
    /// Offset from the symbol.
    pub addend: u16,
}

/// A target driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    /// Template name.
    pub name: String,
    /// Driver type id written to the container descriptor.
    pub driver_type: u8,
    /// Major/minor version.
    pub version: [u8; 2],
    /// Address the code was assembled for.
    pub base: u16,
    /// Driver code (loaded from `<name>.bin` for directory templates).
    #[serde(skip)]
    pub code: Vec<u8>,
    /// Bytes of driver variables placed after the code.
    pub variables: u16,
    /// Entry offsets.
    pub entry: EntryPoints,
    /// Data slots, in layout order.
    pub tables: Vec<TableSpec>,
    /// Variable-size limits.
    pub limits: Limits,
    /// Commands the driver implements.
    pub supported_commands: Vec<CommandKind>,
    /// Source player families this template accepts.
    pub accepted_families: Vec<String>,
    /// Operands to patch when relocating.
    pub relocations: Vec<Relocation>,
    /// Named pointers published in the container.
    pub state_pointers: Vec<StatePointer>,
}

impl Template {
    /// Spec of a slot, if the template has it.
    pub fn spec(&self, slot: Slot) -> Option<&TableSpec> {
        self.tables.iter().find(|t| t.slot == slot)
    }

    /// Whether the driver implements `kind`.
    pub fn supports(&self, kind: CommandKind) -> bool {
        self.supported_commands.contains(&kind)
    }

    /// Whether the template accepts sources of `family`.
    pub fn accepts(&self, family: &str) -> bool {
        self.accepted_families.iter().any(|f| f == "*" || f == family)
    }

    /// Check internal consistency of a loaded template.
    pub fn check(&self) -> Result<()> {
        let invalid = |msg: String| ConvertError::InvalidTemplate {
            name: self.name.clone(),
            msg,
        };
        let len = self.code.len();
        if len == 0 {
            return Err(invalid("empty driver code".into()));
        }
        for entry in [self.entry.init, self.entry.play, self.entry.stop] {
            if entry as usize >= len {
                return Err(invalid(format!("entry offset 0x{entry:04x} outside code")));
            }
        }
        if let Some(bad) = self
            .relocations
            .iter()
            .find(|r| r.offset as usize + 2 > len)
        {
            return Err(invalid(format!(
                "relocation at 0x{:04x} outside code",
                bad.offset
            )));
        }
        for spec in &self.tables {
            if spec.columns == 0 || spec.capacity == 0 {
                return Err(invalid(format!("{} slot has no room", spec.name)));
            }
        }
        Ok(())
    }

    /// Write `<dir>/<name>.json` and `<dir>/<name>.bin`.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        fs::write(
            dir.join(format!("{}.json", self.name)),
            serde_json::to_string_pretty(self)?,
        )?;
        fs::write(dir.join(format!("{}.bin", self.name)), &self.code)?;
        Ok(())
    }
}

/// Source of templates.
pub trait TemplateRepository: Send + Sync {
    /// Load (or fetch from cache) the named template.
    fn load_template(&self, name: &str) -> Result<Arc<Template>>;

    /// Names this repository can provide.
    fn names(&self) -> Vec<String>;
}

/// Templates built into the crate, assembled on first use.
#[derive(Default)]
pub struct BuiltinTemplates {
    cache: RwLock<HashMap<String, Arc<Template>>>,
}

impl BuiltinTemplates {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TemplateRepository for BuiltinTemplates {
    fn load_template(&self, name: &str) -> Result<Arc<Template>> {
        if let Some(template) = self.cache.read().get(name) {
            return Ok(Arc::clone(template));
        }
        let template = match name {
            driver::MINIMAL => Arc::new(driver::minimal()?),
            _ => {
                return Err(ConvertError::UnknownTemplate {
                    name: name.to_string(),
                })
            }
        };
        debug!(
            "assembled template '{}': {} code bytes, {} relocations",
            template.name,
            template.code.len(),
            template.relocations.len()
        );
        let mut cache = self.cache.write();
        let entry = cache
            .entry(name.to_string())
            .or_insert_with(|| Arc::clone(&template));
        Ok(Arc::clone(entry))
    }

    fn names(&self) -> Vec<String> {
        vec![driver::MINIMAL.to_string()]
    }
}

/// Templates stored as `<name>.json` manifest plus `<name>.bin` code.
pub struct DirectoryTemplates {
    dir: PathBuf,
    cache: RwLock<HashMap<String, Arc<Template>>>,
}

impl DirectoryTemplates {
    /// Repository over a directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }
}

impl TemplateRepository for DirectoryTemplates {
    fn load_template(&self, name: &str) -> Result<Arc<Template>> {
        if let Some(template) = self.cache.read().get(name) {
            return Ok(Arc::clone(template));
        }
        let manifest = self.dir.join(format!("{name}.json"));
        if !manifest.is_file() {
            return Err(ConvertError::UnknownTemplate {
                name: name.to_string(),
            });
        }
        let mut template: Template = serde_json::from_str(&fs::read_to_string(&manifest)?)?;
        template.code = fs::read(self.dir.join(format!("{name}.bin")))?;
        template.check()?;
        let template = Arc::new(template);
        self.cache
            .write()
            .insert(name.to_string(), Arc::clone(&template));
        Ok(template)
    }

    fn names(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_templates_are_cached() {
        let repo = BuiltinTemplates::new();
        let a = repo.load_template("minimal").unwrap();
        let b = repo.load_template("minimal").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(matches!(
            repo.load_template("nope"),
            Err(ConvertError::UnknownTemplate { .. })
        ));
    }

    #[test]
    fn directory_templates_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let builtin = BuiltinTemplates::new().load_template("minimal").unwrap();
        builtin.save(dir.path()).unwrap();

        let repo = DirectoryTemplates::new(dir.path());
        assert_eq!(repo.names(), vec!["minimal".to_string()]);
        let loaded = repo.load_template("minimal").unwrap();
        assert_eq!(*loaded, *builtin);
    }

    #[test]
    fn truncated_code_fails_the_check() {
        let mut template = driver::minimal().unwrap();
        template.code.truncate(4);
        assert!(matches!(
            template.check(),
            Err(ConvertError::InvalidTemplate { .. })
        ));
    }

    #[test]
    fn slot_ids_round_trip() {
        for kind in TableKind::ALL {
            let slot = Slot::for_table(kind);
            assert_eq!(Slot::from_id(slot.id()), Some(slot));
            assert_eq!(slot.table_kind(), Some(kind));
        }
    }
}
