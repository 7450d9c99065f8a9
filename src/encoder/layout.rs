//! Memory layout of a driver instance at one load address.
//!
//! Order: code, variables, the fixed table slots (column-major, each column
//! `capacity` bytes), frequency tables, song settings, pointer tables and
//! finally the variable-length music data (order lists, then sequences).

use sidconv_emu::sid::NOTE_COUNT;

use crate::error::{ConvertError, Result};

use super::template::{Slot, Symbol, TableSpec, Template};

/// Start of the SID window; driver data must stay below it.
pub const IO_START: usize = 0xD400;

/// Address of one table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    /// Slot kind.
    pub slot: Slot,
    /// Address of column 0.
    pub address: u16,
    /// Columns.
    pub columns: u8,
    /// Rows per column.
    pub capacity: u8,
}

impl SlotLayout {
    /// Address of `column`.
    pub fn column(&self, column: u8) -> u16 {
        self.address + column as u16 * self.capacity as u16
    }

    /// Bytes the slot occupies.
    pub fn size(&self) -> usize {
        self.columns as usize * self.capacity as usize
    }
}

/// Resolved addresses for one template at one base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Load address of the code.
    pub base: u16,
    /// Driver variables.
    pub variables: u16,
    /// Table slots in template order.
    pub slots: Vec<SlotLayout>,
    /// Frequency table, low bytes.
    pub freq_lo: u16,
    /// Frequency table, high bytes.
    pub freq_hi: u16,
    /// Song settings byte (tempo).
    pub settings: u16,
    /// Order list pointers, low bytes (one per voice).
    pub order_lo: u16,
    /// Order list pointers, high bytes.
    pub order_hi: u16,
    /// Sequence pointers, low bytes.
    pub sequence_lo: u16,
    /// Sequence pointers, high bytes.
    pub sequence_hi: u16,
    /// First byte of music data.
    pub music: u16,
    /// Highest address the music data may reach (exclusive).
    pub limit: usize,
}

impl Layout {
    /// Layout of `template` with its code loaded at `base`.
    pub fn new(template: &Template, base: u16) -> Result<Self> {
        Self::with_code_len(template, base, template.code.len())
    }

    /// Layout for code of a given length (used while assembling).
    pub(crate) fn with_code_len(template: &Template, base: u16, code_len: usize) -> Result<Self> {
        let mut cursor = base as usize + code_len;
        let mut take = |len: usize| {
            let at = cursor;
            cursor += len;
            at
        };

        let variables = take(template.variables as usize);
        let slots: Vec<(usize, &TableSpec)> = template
            .tables
            .iter()
            .map(|spec| (take(spec.columns as usize * spec.capacity as usize), spec))
            .collect();
        let freq_lo = take(NOTE_COUNT as usize);
        let freq_hi = take(NOTE_COUNT as usize);
        let settings = take(1);
        let order_lo = take(3);
        let order_hi = take(3);
        let max_sequences = template.limits.max_sequences as usize;
        let sequence_lo = take(max_sequences);
        let sequence_hi = take(max_sequences);
        let music = take(0);

        let limit = if (base as usize) < IO_START {
            IO_START
        } else {
            0x1_0000
        };
        if music > limit {
            return Err(ConvertError::InvalidTemplate {
                name: template.name.clone(),
                msg: format!(
                    "driver at ${base:04X} needs memory up to ${music:04X}, limit is ${limit:04X}"
                ),
            });
        }

        Ok(Self {
            base,
            variables: variables as u16,
            slots: slots
                .into_iter()
                .map(|(at, spec)| SlotLayout {
                    slot: spec.slot,
                    address: at as u16,
                    columns: spec.columns,
                    capacity: spec.capacity,
                })
                .collect(),
            freq_lo: freq_lo as u16,
            freq_hi: freq_hi as u16,
            settings: settings as u16,
            order_lo: order_lo as u16,
            order_hi: order_hi as u16,
            sequence_lo: sequence_lo as u16,
            sequence_hi: sequence_hi as u16,
            music: music as u16,
            limit,
        })
    }

    /// Layout of a slot.
    pub fn slot(&self, slot: Slot) -> Option<&SlotLayout> {
        self.slots.iter().find(|s| s.slot == slot)
    }

    /// Address of a symbol.
    pub fn address(&self, symbol: Symbol) -> Option<u16> {
        Some(match symbol {
            Symbol::Code => self.base,
            Symbol::Variables => self.variables,
            Symbol::Table(slot) => self.slot(slot)?.address,
            Symbol::FreqLo => self.freq_lo,
            Symbol::FreqHi => self.freq_hi,
            Symbol::SongSettings => self.settings,
            Symbol::OrderListsLo => self.order_lo,
            Symbol::OrderListsHi => self.order_hi,
            Symbol::SequencesLo => self.sequence_lo,
            Symbol::SequencesHi => self.sequence_hi,
            Symbol::MusicData => self.music,
        })
    }

    /// Bytes between `base` and the music data.
    pub fn fixed_size(&self) -> usize {
        (self.music - self.base) as usize
    }

    /// Room left for music data.
    pub fn music_capacity(&self) -> usize {
        self.limit - self.music as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::driver;

    #[test]
    fn layout_moves_with_base() {
        let template = driver::minimal().unwrap();
        let a = Layout::new(&template, 0x1000).unwrap();
        let b = Layout::new(&template, 0x4000).unwrap();
        assert_eq!(a.fixed_size(), b.fixed_size());
        assert_eq!(b.music - a.music, 0x3000);
        assert_eq!(a.variables as usize, 0x1000 + template.code.len());
        let wave = a.slot(Slot::Wave).unwrap();
        assert_eq!(wave.column(1), wave.address + wave.capacity as u16);
    }

    #[test]
    fn layout_must_fit_below_io() {
        let template = driver::minimal().unwrap();
        assert!(Layout::new(&template, 0xD000).is_err());
    }
}
