//! Format-neutral intermediate music model.
//!
//! A [`Song`] is what the analyzer produces and the encoder consumes. It has
//! no knowledge of any player's binary layout; [`Song::validate`] reports
//! every invariant violation as a [`ModelError`] value.

mod instrument;
mod order_list;
mod pitch;
mod sequence;
mod table;
mod validate;

use serde::{Deserialize, Serialize};

pub use instrument::Instrument;
pub use order_list::{OrderEnd, OrderEntry, OrderList};
pub use pitch::{note_name, MAX_PITCH};
pub use sequence::{Command, CommandKind, Event, Sequence};
pub use table::{Table, TableKind, TableRow};
pub use validate::ModelError;

/// Number of voices (and order lists) in a song.
pub const VOICES: usize = 3;

/// Where a piece of the model came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Provenance {
    /// Read directly from the source's data tables.
    #[default]
    Static,
    /// Reconstructed from emulated register writes.
    Dynamic,
    /// Static data completed with dynamic or raw-memory rows.
    Merged,
}

/// A complete song.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    /// Title.
    pub title: String,
    /// Author.
    pub author: String,
    /// Release/copyright line.
    pub released: String,
    /// Frames per row (at least 1).
    pub tempo: u8,
    /// Instruments, referenced by index.
    pub instruments: Vec<Instrument>,
    /// At most one table per kind.
    pub tables: Vec<Table>,
    /// Sequences, referenced by index from order lists.
    pub sequences: Vec<Sequence>,
    /// One order list per voice.
    pub order_lists: Vec<OrderList>,
    /// Origin of the instrument list.
    pub instrument_provenance: Provenance,
}

impl Song {
    /// Empty song with three stopped voices.
    pub fn new(tempo: u8) -> Self {
        Self {
            title: String::new(),
            author: String::new(),
            released: String::new(),
            tempo,
            instruments: Vec::new(),
            tables: Vec::new(),
            sequences: Vec::new(),
            order_lists: vec![OrderList::default(); VOICES],
            instrument_provenance: Provenance::Static,
        }
    }

    /// Table of the given kind.
    pub fn table(&self, kind: TableKind) -> Option<&Table> {
        self.tables.iter().find(|t| t.kind == kind)
    }

    /// Mutable table of the given kind.
    pub fn table_mut(&mut self, kind: TableKind) -> Option<&mut Table> {
        self.tables.iter_mut().find(|t| t.kind == kind)
    }

    /// Rows played by each voice before its order list ends or loops.
    pub fn rows_per_voice(&self) -> Vec<usize> {
        self.order_lists
            .iter()
            .map(|list| {
                list.entries
                    .iter()
                    .filter_map(|e| self.sequences.get(e.sequence as usize))
                    .map(Sequence::row_count)
                    .sum()
            })
            .collect()
    }

    /// Check every model invariant.
    pub fn validate(&self) -> Vec<ModelError> {
        validate::validate(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_per_voice_follows_order_lists() {
        let mut song = Song::new(6);
        song.sequences.push(Sequence::new(vec![
            Event::NoteOn(48),
            Event::Rest(3),
            Event::NoteOff,
        ]));
        song.order_lists[0].entries = vec![OrderEntry::new(0, 0), OrderEntry::new(12, 0)];
        assert_eq!(song.rows_per_voice(), vec![10, 0, 0]);
    }
}
