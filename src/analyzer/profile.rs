//! Source profiles: data records describing how to read one player family.
//!
//! A profile never contains code. Range-coded profiles locate tables,
//! instruments, sequences and order lists in the loaded image and say how
//! their bytes map onto the model. Profiles load from JSON:
//!
//! ```json
//! {
//!   "name": "example",
//!   "family": "example",
//!   "dynamic": true,
//!   "decoder": { "range_coded": { ... } }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ConvertError, Result};
use crate::model::TableKind;

/// Profile name of the container decoder.
pub const SF2_NATIVE: &str = "sf2-native";
/// Profile name of the emulation-only fallback.
pub const GENERIC: &str = "generic";

/// How to find one address in the loaded image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressRef {
    /// Absolute address.
    Fixed(u16),
    /// Offset from the load address.
    Relative(u16),
    /// Little-endian pointer stored at this address.
    Pointer(u16),
    /// Where a byte pattern (`"BD ?? ?? 9D"`) matches, plus `offset`; with
    /// `deref` the address is the pointer stored there.
    Signature {
        /// Hex bytes, `??` for any byte.
        pattern: String,
        /// Added to the match address.
        #[serde(default)]
        offset: i32,
        /// Read a pointer at the resulting address.
        #[serde(default)]
        deref: bool,
    },
}

/// Record arrangement in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordLayout {
    /// Records are consecutive.
    #[default]
    RowMajor,
    /// Each column is a separate array `stride` bytes apart.
    ColumnMajor {
        /// Distance between columns.
        stride: u16,
    },
}

/// Where a table of records ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndPolicy {
    /// A record whose `column` holds `value` ends the table.
    Terminator {
        /// Column checked.
        column: u8,
        /// Terminating value.
        value: u8,
        /// The value can also be real data; stopping there is a guess.
        #[serde(default)]
        ambiguous_zero: bool,
    },
    /// Exactly this many records.
    FixedCount(usize),
}

fn default_max_rows() -> usize {
    256
}

/// A block of fixed-width records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordLocator {
    /// First record.
    pub address: AddressRef,
    /// Bytes per record.
    pub columns: u8,
    /// Arrangement.
    #[serde(default)]
    pub layout: RecordLayout,
    /// End of the block.
    pub end: EndPolicy,
    /// Upper bound on records read.
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
}

/// A wave/pulse/filter/arpeggio table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableLocator {
    /// Table kind.
    pub kind: TableKind,
    /// Records.
    #[serde(flatten)]
    pub records: RecordLocator,
    /// Source column for each model column; identity when empty.
    #[serde(default)]
    pub mapping: Vec<u8>,
    /// Column 0 value that marks a loop (target in column 1).
    #[serde(default)]
    pub loop_marker: Option<u8>,
    /// Column 0 value that marks the end of one program.
    #[serde(default)]
    pub end_marker: Option<u8>,
}

fn default_none() -> u8 {
    0xFF
}

fn default_hard_restart_mask() -> u8 {
    0x01
}

/// Instrument records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentLocator {
    /// Records.
    #[serde(flatten)]
    pub records: RecordLocator,
    /// Column holding attack/decay.
    pub attack_decay: u8,
    /// Column holding sustain/release.
    pub sustain_release: u8,
    /// Column holding the wave table index.
    pub wave: u8,
    /// Column holding the pulse table index.
    #[serde(default)]
    pub pulse: Option<u8>,
    /// Column holding the filter table index.
    #[serde(default)]
    pub filter: Option<u8>,
    /// Column holding flags.
    #[serde(default)]
    pub flags: Option<u8>,
    /// Table index meaning "none".
    #[serde(default = "default_none")]
    pub none_value: u8,
    /// Flag bit for hard restart.
    #[serde(default = "default_hard_restart_mask")]
    pub hard_restart_mask: u8,
}

/// Split lo/hi sequence pointer tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceLocator {
    /// Low bytes.
    pub lo: AddressRef,
    /// High bytes.
    pub hi: AddressRef,
    /// Pointers in use.
    pub count: usize,
}

/// Inclusive byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    /// First value.
    pub start: u8,
    /// Last value.
    pub end: u8,
}

impl ByteRange {
    /// Offset of `value` into the range.
    pub fn index(&self, value: u8) -> Option<u8> {
        (self.start..=self.end)
            .contains(&value)
            .then(|| value - self.start)
    }
}

/// Byte ranges of a range-coded sequence stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceEncoding {
    /// Note bytes; pitch = `value - start + note_base`.
    pub note: ByteRange,
    /// Added to decoded pitches.
    #[serde(default)]
    pub note_base: u8,
    /// Instrument select; id = `value - start`.
    #[serde(default)]
    pub instrument: Option<ByteRange>,
    /// Duration change; rows = `value - start + 1`, kept until changed.
    #[serde(default)]
    pub duration: Option<ByteRange>,
    /// Command; kind id = `value - start`, followed by two argument bytes.
    #[serde(default)]
    pub command: Option<ByteRange>,
    /// Gate off.
    #[serde(default)]
    pub gate_off: Option<u8>,
    /// Tie the next note.
    #[serde(default)]
    pub tie: Option<u8>,
    /// Rest for the current duration.
    #[serde(default)]
    pub rest: Option<u8>,
    /// End of sequence.
    pub end: u8,
}

/// Byte meanings of a range-coded order list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEncoding {
    /// Transpose bytes; transpose = `value - center`, kept until changed.
    pub transpose: ByteRange,
    /// Value meaning "no transpose".
    pub center: u8,
    /// Stop marker.
    pub stop: u8,
    /// Loop marker, followed by the entry index.
    pub loop_marker: u8,
}

/// Where the initial tempo comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TempoSource {
    /// Constant.
    Fixed(u8),
    /// Byte in memory.
    At(AddressRef),
}

/// Complete description of a range-coded player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeCodedLayout {
    /// Program tables.
    #[serde(default)]
    pub tables: Vec<TableLocator>,
    /// Instruments.
    pub instruments: InstrumentLocator,
    /// Sequence pointers.
    pub sequences: SequenceLocator,
    /// One order list per voice.
    pub order_lists: Vec<AddressRef>,
    /// Sequence byte ranges.
    pub sequence_encoding: SequenceEncoding,
    /// Order list byte ranges.
    pub order_encoding: OrderEncoding,
    /// Initial tempo.
    pub tempo: TempoSource,
}

/// Static decoder of a profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decoder {
    /// Container produced by this crate.
    Native,
    /// Range-coded player layout.
    RangeCoded(Box<RangeCodedLayout>),
    /// No static decoding.
    #[default]
    None,
}

/// One player family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceProfile {
    /// Unique name.
    pub name: String,
    /// Family accepted or rejected by templates.
    pub family: String,
    /// Identification pattern.
    #[serde(default)]
    pub signature: Option<String>,
    /// Whether emulation-driven extraction may run.
    #[serde(default)]
    pub dynamic: bool,
    /// Static decoder.
    #[serde(default)]
    pub decoder: Decoder,
}

impl SourceProfile {
    /// The container decoder.
    pub fn sf2_native() -> Self {
        Self {
            name: SF2_NATIVE.to_string(),
            family: "sf2".to_string(),
            signature: None,
            dynamic: false,
            decoder: Decoder::Native,
        }
    }

    /// Emulation only.
    pub fn generic() -> Self {
        Self {
            name: GENERIC.to_string(),
            family: GENERIC.to_string(),
            signature: None,
            dynamic: true,
            decoder: Decoder::None,
        }
    }

    /// Parse a JSON profile.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Whether a static decoder exists.
    pub fn is_static(&self) -> bool {
        !matches!(self.decoder, Decoder::None)
    }
}

/// Parse a `"A9 ?? 8D"` pattern; `None` stands for a wildcard.
pub fn parse_pattern(pattern: &str) -> Result<Vec<Option<u8>>> {
    pattern
        .split_whitespace()
        .map(|token| {
            if token == "??" {
                Ok(None)
            } else {
                u8::from_str_radix(token, 16)
                    .map(Some)
                    .map_err(|_| ConvertError::from(format!("bad pattern byte '{token}'")))
            }
        })
        .collect()
}

/// Offset of the first match of `pattern` in `data`.
pub fn find_pattern(data: &[u8], pattern: &[Option<u8>]) -> Option<usize> {
    if pattern.is_empty() || pattern.len() > data.len() {
        return None;
    }
    data.windows(pattern.len()).position(|window| {
        window
            .iter()
            .zip(pattern)
            .all(|(byte, want)| want.map_or(true, |w| w == *byte))
    })
}

/// Closed set of profiles, shared between jobs.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, Arc<SourceProfile>>,
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProfileRegistry {
    /// `sf2-native` and `generic`.
    pub fn builtin() -> Self {
        let mut registry = Self {
            profiles: BTreeMap::new(),
        };
        registry.insert(SourceProfile::sf2_native());
        registry.insert(SourceProfile::generic());
        registry
    }

    /// Add or replace a profile.
    pub fn insert(&mut self, profile: SourceProfile) {
        self.profiles
            .insert(profile.name.clone(), Arc::new(profile));
    }

    /// Add a profile from a JSON file.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let text = std::fs::read_to_string(path)?;
        self.insert(SourceProfile::from_json_str(&text)?);
        Ok(())
    }

    /// Profile by name.
    pub fn get(&self, name: &str) -> Result<Arc<SourceProfile>> {
        self.profiles
            .get(name)
            .cloned()
            .ok_or_else(|| ConvertError::UnknownProfile {
                name: name.to_string(),
            })
    }

    /// All profiles, by name.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<SourceProfile>> {
        self.profiles.values()
    }
}
