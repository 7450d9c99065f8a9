use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Event, OrderEnd, Song, TableKind, TableRow, CommandKind, MAX_PITCH, VOICES};

/// One violated model invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ModelError {
    /// Songs have exactly one order list per voice.
    #[error("expected 3 order lists, found {found}")]
    VoiceCount {
        /// Order lists present.
        found: usize,
    },
    /// Tempo must be at least one frame per row.
    #[error("tempo must be at least 1")]
    ZeroTempo,
    /// Two tables share a kind.
    #[error("duplicate {kind} table")]
    DuplicateTable {
        /// Duplicated kind.
        kind: TableKind,
    },
    /// Order list references a sequence that does not exist.
    #[error("voice {voice} entry {entry} references missing sequence {sequence}")]
    MissingSequence {
        /// Voice index.
        voice: usize,
        /// Entry index.
        entry: usize,
        /// Referenced sequence.
        sequence: u8,
    },
    /// Order list loop target is outside the entries.
    #[error("voice {voice} loops to entry {target} of {len}")]
    OrderLoopOutOfBounds {
        /// Voice index.
        voice: usize,
        /// Loop target.
        target: u8,
        /// Number of entries.
        len: usize,
    },
    /// Transpose cannot keep any pitch in range.
    #[error("voice {voice} entry {entry} transpose {transpose} out of range")]
    TransposeOutOfRange {
        /// Voice index.
        voice: usize,
        /// Entry index.
        entry: usize,
        /// Offending transpose.
        transpose: i8,
    },
    /// A note leaves 0..=95 after transposition.
    #[error("voice {voice} entry {entry} plays pitch {pitch}")]
    PitchOutOfRange {
        /// Voice index.
        voice: usize,
        /// Entry index.
        entry: usize,
        /// Transposed pitch.
        pitch: i16,
    },
    /// `SetInstrument` references an instrument that does not exist.
    #[error("sequence {sequence} event {event} selects missing instrument {instrument}")]
    MissingInstrument {
        /// Sequence index.
        sequence: usize,
        /// Event index.
        event: usize,
        /// Referenced instrument.
        instrument: u8,
    },
    /// Rest with zero duration.
    #[error("sequence {sequence} event {event} rests for zero rows")]
    ZeroRest {
        /// Sequence index.
        sequence: usize,
        /// Event index.
        event: usize,
    },
    /// Command argument outside what the command accepts.
    #[error("sequence {sequence} event {event}: {reason}")]
    InvalidCommand {
        /// Sequence index.
        sequence: usize,
        /// Event index.
        event: usize,
        /// What is wrong.
        reason: String,
    },
    /// Instrument points past the end of a table (or at a missing table).
    #[error("instrument {instrument} {kind} index {index} outside table of {len} rows")]
    TableIndexOutOfBounds {
        /// Instrument index.
        instrument: usize,
        /// Table kind.
        kind: TableKind,
        /// Start row.
        index: u8,
        /// Rows in the table.
        len: usize,
    },
    /// Table loop target outside the table.
    #[error("{kind} table row {row} loops to {target} outside the table")]
    TableLoopOutOfBounds {
        /// Table kind.
        kind: TableKind,
        /// Row holding the loop.
        row: usize,
        /// Loop target.
        target: u8,
    },
    /// Table loop target is itself a loop.
    #[error("{kind} table row {row} loops to another loop at {target}")]
    LoopToLoop {
        /// Table kind.
        kind: TableKind,
        /// Row holding the loop.
        row: usize,
        /// Loop target.
        target: u8,
    },
    /// Table grew past the rows a one-byte index can reach.
    #[error("{kind} table needs {rows} rows, indices stop at 255")]
    TableOverflow {
        /// Table kind.
        kind: TableKind,
        /// Rows the table would hold.
        rows: usize,
    },
    /// Table ends with a step row, so a driver would read past it.
    #[error("{kind} table does not end with an end or loop row")]
    UnterminatedTable {
        /// Table kind.
        kind: TableKind,
    },
    /// Looping part of an order list plays no rows.
    #[error("voice {voice} loops from entry {target} over sequences without rows")]
    EmptyOrderLoop {
        /// Voice index.
        voice: usize,
        /// Loop target.
        target: u8,
    },
    /// Step row width differs from the kind's schema.
    #[error("{kind} table row {row} has {found} bytes, expected {expected}")]
    StepWidth {
        /// Table kind.
        kind: TableKind,
        /// Row index.
        row: usize,
        /// Schema width.
        expected: usize,
        /// Actual width.
        found: usize,
    },
}

pub(super) fn validate(song: &Song) -> Vec<ModelError> {
    let mut errors = Vec::new();

    if song.tempo == 0 {
        errors.push(ModelError::ZeroTempo);
    }
    if song.order_lists.len() != VOICES {
        errors.push(ModelError::VoiceCount {
            found: song.order_lists.len(),
        });
    }

    for (i, table) in song.tables.iter().enumerate() {
        if song.tables[..i].iter().any(|t| t.kind == table.kind) {
            errors.push(ModelError::DuplicateTable { kind: table.kind });
        }
        if matches!(table.rows.last(), Some(TableRow::Step(_))) {
            errors.push(ModelError::UnterminatedTable { kind: table.kind });
        }
        for (row, entry) in table.rows.iter().enumerate() {
            match entry {
                TableRow::Step(bytes) if bytes.len() != table.kind.width() => {
                    errors.push(ModelError::StepWidth {
                        kind: table.kind,
                        row,
                        expected: table.kind.width(),
                        found: bytes.len(),
                    });
                }
                TableRow::Loop(target) => match table.rows.get(*target as usize) {
                    None => errors.push(ModelError::TableLoopOutOfBounds {
                        kind: table.kind,
                        row,
                        target: *target,
                    }),
                    Some(TableRow::Loop(_)) => errors.push(ModelError::LoopToLoop {
                        kind: table.kind,
                        row,
                        target: *target,
                    }),
                    Some(_) => {}
                },
                _ => {}
            }
        }
    }

    for (index, instrument) in song.instruments.iter().enumerate() {
        let refs = [
            (TableKind::Wave, Some(instrument.wave)),
            (TableKind::Pulse, instrument.pulse),
            (TableKind::Filter, instrument.filter),
        ];
        for (kind, start) in refs {
            let Some(start) = start else { continue };
            let len = song.table(kind).map_or(0, |t| t.rows.len());
            if start as usize >= len {
                errors.push(ModelError::TableIndexOutOfBounds {
                    instrument: index,
                    kind,
                    index: start,
                    len,
                });
            }
        }
    }

    let filter_len = song.table(TableKind::Filter).map_or(0, |t| t.rows.len());
    for (seq_index, sequence) in song.sequences.iter().enumerate() {
        for (event_index, event) in sequence.events.iter().enumerate() {
            match event {
                Event::SetInstrument(id) if *id as usize >= song.instruments.len() => {
                    errors.push(ModelError::MissingInstrument {
                        sequence: seq_index,
                        event: event_index,
                        instrument: *id,
                    });
                }
                Event::Rest(0) => errors.push(ModelError::ZeroRest {
                    sequence: seq_index,
                    event: event_index,
                }),
                Event::SetCommand(command) => {
                    let reason = match command.kind {
                        CommandKind::SetTempo if command.args[0] == 0 => {
                            Some("tempo command with zero frames per row".to_string())
                        }
                        CommandKind::FilterProgram if command.args[0] as usize >= filter_len => {
                            Some(format!(
                                "filter program row {} outside table of {filter_len} rows",
                                command.args[0]
                            ))
                        }
                        _ => None,
                    };
                    if let Some(reason) = reason {
                        errors.push(ModelError::InvalidCommand {
                            sequence: seq_index,
                            event: event_index,
                            reason,
                        });
                    }
                }
                _ => {}
            }
        }
    }

    for (voice, list) in song.order_lists.iter().enumerate() {
        if let OrderEnd::Loop(target) = list.end {
            if target as usize >= list.entries.len() {
                errors.push(ModelError::OrderLoopOutOfBounds {
                    voice,
                    target,
                    len: list.entries.len(),
                });
            } else if list.entries[target as usize..].iter().all(|entry| {
                song.sequences
                    .get(entry.sequence as usize)
                    .map_or(false, |s| s.row_count() == 0)
            }) {
                errors.push(ModelError::EmptyOrderLoop { voice, target });
            }
        }
        for (entry_index, entry) in list.entries.iter().enumerate() {
            if entry.transpose.unsigned_abs() > MAX_PITCH {
                errors.push(ModelError::TransposeOutOfRange {
                    voice,
                    entry: entry_index,
                    transpose: entry.transpose,
                });
                continue;
            }
            let Some(sequence) = song.sequences.get(entry.sequence as usize) else {
                errors.push(ModelError::MissingSequence {
                    voice,
                    entry: entry_index,
                    sequence: entry.sequence,
                });
                continue;
            };
            let out_of_range = sequence
                .pitches()
                .map(|p| p as i16 + entry.transpose as i16)
                .find(|p| !(0..=MAX_PITCH as i16).contains(p));
            if let Some(pitch) = out_of_range {
                errors.push(ModelError::PitchOutOfRange {
                    voice,
                    entry: entry_index,
                    pitch,
                });
            }
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Instrument, OrderEntry, Sequence, Table};

    fn valid_song() -> Song {
        let mut song = Song::new(6);
        song.tables.push(Table::new(
            TableKind::Wave,
            vec![TableRow::Step(vec![0x41, 0]), TableRow::End],
        ));
        song.instruments.push(Instrument::new(0x09, 0x00, 0));
        song.sequences.push(Sequence::new(vec![
            Event::SetInstrument(0),
            Event::NoteOn(48),
            Event::Rest(3),
        ]));
        for list in &mut song.order_lists {
            list.entries.push(OrderEntry::new(0, 0));
        }
        song
    }

    #[test]
    fn valid_song_has_no_errors() {
        assert!(valid_song().validate().is_empty());
    }

    #[test]
    fn violations_are_values() {
        let mut song = valid_song();
        song.tempo = 0;
        song.instruments[0].wave = 5;
        song.sequences[0].events.push(Event::Rest(0));
        song.sequences[0].events.push(Event::SetInstrument(3));
        song.order_lists[1].entries[0].transpose = 60;
        song.order_lists[2].end = OrderEnd::Loop(4);
        song.order_lists.pop();

        let errors = song.validate();
        assert!(errors.contains(&ModelError::ZeroTempo));
        assert!(errors.contains(&ModelError::VoiceCount { found: 2 }));
        assert!(errors.contains(&ModelError::TableIndexOutOfBounds {
            instrument: 0,
            kind: TableKind::Wave,
            index: 5,
            len: 2
        }));
        assert!(errors.contains(&ModelError::ZeroRest {
            sequence: 0,
            event: 3
        }));
        assert!(errors.contains(&ModelError::MissingInstrument {
            sequence: 0,
            event: 4,
            instrument: 3
        }));
        assert!(errors.contains(&ModelError::PitchOutOfRange {
            voice: 1,
            entry: 0,
            pitch: 108
        }));
    }

    #[test]
    fn tables_need_a_terminator() {
        let mut song = valid_song();
        song.tables[0].rows.pop();
        assert_eq!(
            song.validate(),
            vec![ModelError::UnterminatedTable {
                kind: TableKind::Wave
            }]
        );
        song.tables[0].rows.push(TableRow::Loop(0));
        assert!(song.validate().is_empty());
    }

    #[test]
    fn order_loops_must_play_rows() {
        let mut song = valid_song();
        song.sequences.push(Sequence::new(vec![Event::SetInstrument(0)]));
        song.order_lists[0].entries.push(OrderEntry::new(0, 1));
        song.order_lists[0].end = OrderEnd::Loop(1);
        assert_eq!(
            song.validate(),
            vec![ModelError::EmptyOrderLoop {
                voice: 0,
                target: 1
            }]
        );
        song.order_lists[0].end = OrderEnd::Loop(0);
        assert!(song.validate().is_empty());
        song.order_lists[0].end = OrderEnd::Stop;
        assert!(song.validate().is_empty());
    }

    #[test]
    fn table_loops_are_checked() {
        let mut song = valid_song();
        song.tables[0].rows = vec![
            TableRow::Step(vec![0x41]),
            TableRow::Loop(2),
            TableRow::Loop(0),
            TableRow::Loop(9),
        ];
        let errors = song.validate();
        assert!(errors.contains(&ModelError::StepWidth {
            kind: TableKind::Wave,
            row: 0,
            expected: 2,
            found: 1
        }));
        assert!(errors.contains(&ModelError::LoopToLoop {
            kind: TableKind::Wave,
            row: 1,
            target: 2
        }));
        assert!(errors.contains(&ModelError::TableLoopOutOfBounds {
            kind: TableKind::Wave,
            row: 3,
            target: 9
        }));
    }
}
