//! Static extraction for range-coded players.
//!
//! Everything is read from the loaded image without running code. The
//! extractor remembers where each record block was found so the hybrid merge
//! can read past a terminator later.

use log::{debug, warn};
use sidconv_emu::MemoryImage;

use crate::error::{ConvertError, Result};
use crate::model::{
    Command, CommandKind, Event, Instrument, OrderEnd, OrderEntry, OrderList, Provenance,
    Sequence, Song, Table, TableKind, TableRow,
};

use super::profile::{
    find_pattern, parse_pattern, AddressRef, EndPolicy, InstrumentLocator, OrderEncoding,
    RangeCodedLayout, RecordLayout, RecordLocator, SequenceEncoding, TableLocator, TempoSource,
};

/// Longest sequence or order list read before giving up.
const MAX_STREAM: usize = 4096;

/// Resolved record block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordBlock {
    /// Address of record 0.
    pub address: u16,
    /// Records read, terminator excluded.
    pub rows: usize,
}

/// What static extraction found.
#[derive(Debug, Clone)]
pub struct StaticExtraction {
    /// The song, with `Static` provenance everywhere.
    pub song: Song,
    /// Record blocks of the program tables, by kind.
    pub tables: Vec<(TableKind, RecordBlock)>,
    /// Instrument record block.
    pub instruments: RecordBlock,
}

/// Reader over a loaded image.
pub struct Scanner<'a> {
    memory: &'a MemoryImage,
    load_address: u16,
    data_len: usize,
}

impl<'a> Scanner<'a> {
    /// Scanner over `memory`; `load_address` and `data_len` bound pattern
    /// searches to the program.
    pub fn new(memory: &'a MemoryImage, load_address: u16, data_len: usize) -> Self {
        Self {
            memory,
            load_address,
            data_len,
        }
    }

    /// Resolve an address reference.
    pub fn resolve(&self, address: &AddressRef) -> Result<u16> {
        Ok(match address {
            AddressRef::Fixed(a) => *a,
            AddressRef::Relative(offset) => self.load_address.wrapping_add(*offset),
            AddressRef::Pointer(at) => self.memory.read_u16(*at),
            AddressRef::Signature {
                pattern,
                offset,
                deref,
            } => {
                let start = self.load_address as usize;
                let program = self.memory.slice(start..start + self.data_len);
                let at = find_pattern(program, &parse_pattern(pattern)?).ok_or_else(|| {
                    ConvertError::IncompleteExtraction {
                        reason: format!("signature '{pattern}' not found"),
                    }
                })?;
                let address = (start + at) as i64 + *offset as i64;
                let address = u16::try_from(address)
                    .map_err(|_| format!("signature '{pattern}' points outside memory"))?;
                if *deref {
                    self.memory.read_u16(address)
                } else {
                    address
                }
            }
        })
    }

    /// Record `row` of a block, `columns` bytes.
    pub fn record(&self, address: u16, layout: RecordLayout, columns: u8, row: usize) -> Vec<u8> {
        (0..columns as usize)
            .map(|c| {
                let offset = match layout {
                    RecordLayout::RowMajor => row * columns as usize + c,
                    RecordLayout::ColumnMajor { stride } => c * stride as usize + row,
                };
                self.memory.read(address.wrapping_add(offset as u16))
            })
            .collect()
    }

    /// Read records up to the end policy.
    pub fn records(&self, locator: &RecordLocator, what: &str) -> Result<(RecordBlock, Vec<Vec<u8>>)> {
        let address = self.resolve(&locator.address)?;
        let mut rows = Vec::new();
        match locator.end {
            EndPolicy::FixedCount(count) => {
                for row in 0..count.min(locator.max_rows) {
                    rows.push(self.record(address, locator.layout, locator.columns, row));
                }
            }
            EndPolicy::Terminator {
                column,
                value,
                ambiguous_zero,
            } => {
                for row in 0..locator.max_rows {
                    let record = self.record(address, locator.layout, locator.columns, row);
                    if record.get(column as usize) == Some(&value) {
                        if value == 0 && ambiguous_zero {
                            warn!(
                                "{what}: zero in column {column} of row {row} at ${address:04X} taken as terminator"
                            );
                        }
                        break;
                    }
                    rows.push(record);
                }
            }
        }
        debug!("{what}: {} record(s) at ${address:04X}", rows.len());
        Ok((
            RecordBlock {
                address,
                rows: rows.len(),
            },
            rows,
        ))
    }
}

/// Map one table record onto the model.
pub fn table_row(locator: &TableLocator, record: &[u8]) -> TableRow {
    let first = record.first().copied().unwrap_or(0);
    if locator.loop_marker == Some(first) {
        return TableRow::Loop(record.get(1).copied().unwrap_or(0));
    }
    if locator.end_marker == Some(first) {
        return TableRow::End;
    }
    let width = locator.kind.width();
    let step = (0..width)
        .map(|c| {
            let source = locator.mapping.get(c).map_or(c, |m| *m as usize);
            record.get(source).copied().unwrap_or(0)
        })
        .collect();
    TableRow::Step(step)
}

/// Map one instrument record onto the model.
pub fn instrument(locator: &InstrumentLocator, record: &[u8]) -> Instrument {
    let col = |c: u8| record.get(c as usize).copied().unwrap_or(0);
    let table = |c: Option<u8>| c.map(col).filter(|v| *v != locator.none_value);
    Instrument {
        attack_decay: col(locator.attack_decay),
        sustain_release: col(locator.sustain_release),
        wave: col(locator.wave),
        pulse: table(locator.pulse),
        filter: table(locator.filter),
        hard_restart: locator
            .flags
            .map_or(false, |c| col(c) & locator.hard_restart_mask != 0),
    }
}

/// Decode a range-coded sequence at `address`.
pub fn decode_sequence(
    memory: &MemoryImage,
    address: u16,
    encoding: &SequenceEncoding,
) -> Result<Sequence> {
    let mut events = Vec::new();
    let mut duration = 1u8;
    let mut at = address;
    let mut next = || {
        let value = memory.read(at);
        at = at.wrapping_add(1);
        value
    };
    let hold = |events: &mut Vec<Event>, duration: u8| {
        if duration > 1 {
            events.push(Event::Rest(duration - 1));
        }
    };
    for _ in 0..MAX_STREAM {
        let byte = next();
        if byte == encoding.end {
            return Ok(Sequence::new(events));
        }
        if let Some(pitch) = encoding.note.index(byte) {
            events.push(Event::NoteOn(pitch.saturating_add(encoding.note_base)));
            hold(&mut events, duration);
        } else if let Some(id) = encoding.instrument.and_then(|r| r.index(byte)) {
            events.push(Event::SetInstrument(id));
        } else if let Some(rows) = encoding.duration.and_then(|r| r.index(byte)) {
            duration = rows.saturating_add(1);
        } else if let Some(kind) = encoding.command.and_then(|r| r.index(byte)) {
            let kind = CommandKind::from_id(kind)
                .ok_or_else(|| format!("unknown command kind {kind} at ${address:04X}"))?;
            let args = [next(), next()];
            events.push(Event::SetCommand(Command::new(kind, args)));
        } else if Some(byte) == encoding.gate_off {
            events.push(Event::NoteOff);
            hold(&mut events, duration);
        } else if Some(byte) == encoding.tie {
            events.push(Event::Tie);
        } else if Some(byte) == encoding.rest {
            events.push(Event::Rest(duration));
        } else {
            return Err(ConvertError::IncompleteExtraction {
                reason: format!("unexpected sequence byte ${byte:02X} in sequence at ${address:04X}"),
            });
        }
    }
    Err(ConvertError::IncompleteExtraction {
        reason: format!("sequence at ${address:04X} has no end"),
    })
}

/// Decode a range-coded order list at `address`.
pub fn decode_order_list(
    memory: &MemoryImage,
    address: u16,
    encoding: &OrderEncoding,
) -> Result<OrderList> {
    let mut entries = Vec::new();
    let mut transpose = 0i8;
    let mut at = address;
    for _ in 0..MAX_STREAM {
        let byte = memory.read(at);
        at = at.wrapping_add(1);
        if byte == encoding.stop {
            return Ok(OrderList::new(entries));
        }
        if byte == encoding.loop_marker {
            let target = memory.read(at);
            return Ok(OrderList {
                entries,
                end: OrderEnd::Loop(target),
            });
        }
        if encoding.transpose.index(byte).is_some() {
            transpose = (byte as i16 - encoding.center as i16).clamp(-128, 127) as i8;
        } else {
            entries.push(OrderEntry::new(transpose, byte));
        }
    }
    Err(ConvertError::IncompleteExtraction {
        reason: format!("order list at ${address:04X} has no end"),
    })
}

/// Run static extraction.
pub fn extract(scanner: &Scanner<'_>, layout: &RangeCodedLayout) -> Result<StaticExtraction> {
    let mut song = Song::new(1);

    let mut blocks = Vec::new();
    let mut locators: Vec<&TableLocator> = layout.tables.iter().collect();
    locators.sort_by_key(|l| l.kind);
    for locator in locators {
        let (block, records) = scanner.records(&locator.records, locator.kind.name())?;
        let mut rows: Vec<TableRow> = records.iter().map(|r| table_row(locator, r)).collect();
        if matches!(rows.last(), Some(TableRow::Step(_))) {
            rows.push(TableRow::End);
        }
        if !rows.is_empty() {
            song.tables.push(Table::new(locator.kind, rows));
        }
        blocks.push((locator.kind, block));
    }

    let (instrument_block, records) = scanner.records(&layout.instruments.records, "instruments")?;
    song.instruments = records
        .iter()
        .map(|r| instrument(&layout.instruments, r))
        .collect();

    let lo = scanner.resolve(&layout.sequences.lo)?;
    let hi = scanner.resolve(&layout.sequences.hi)?;
    for index in 0..layout.sequences.count {
        let address = u16::from_le_bytes([
            scanner.memory.read(lo.wrapping_add(index as u16)),
            scanner.memory.read(hi.wrapping_add(index as u16)),
        ]);
        song.sequences.push(decode_sequence(
            scanner.memory,
            address,
            &layout.sequence_encoding,
        )?);
    }

    if layout.order_lists.len() != song.order_lists.len() {
        return Err(format!(
            "profile lists {} order lists, songs have {}",
            layout.order_lists.len(),
            song.order_lists.len()
        )
        .into());
    }
    for (voice, address) in layout.order_lists.iter().enumerate() {
        let address = scanner.resolve(address)?;
        song.order_lists[voice] = decode_order_list(scanner.memory, address, &layout.order_encoding)?;
    }

    song.tempo = match &layout.tempo {
        TempoSource::Fixed(tempo) => *tempo,
        TempoSource::At(address) => scanner.memory.read(scanner.resolve(address)?),
    }
    .max(1);
    song.instrument_provenance = Provenance::Static;

    Ok(StaticExtraction {
        song,
        tables: blocks,
        instruments: instrument_block,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::profile::ByteRange;

    fn encoding() -> SequenceEncoding {
        SequenceEncoding {
            note: ByteRange {
                start: 0x00,
                end: 0x5F,
            },
            note_base: 0,
            instrument: Some(ByteRange {
                start: 0xA0,
                end: 0xBF,
            }),
            duration: Some(ByteRange {
                start: 0x80,
                end: 0x9F,
            }),
            command: Some(ByteRange {
                start: 0xC0,
                end: 0xC7,
            }),
            gate_off: Some(0xFD),
            tie: Some(0xFC),
            rest: Some(0xFB),
            end: 0xFF,
        }
    }

    #[test]
    fn sequences_expand_durations() {
        let memory = MemoryImage::with_block(
            0x2000,
            &[0xA1, 0x83, 0x30, 0xC5, 0x02, 0x00, 0x80, 0x34, 0xFD, 0xFB, 0xFF],
        )
        .unwrap();
        let seq = decode_sequence(&memory, 0x2000, &encoding()).unwrap();
        assert_eq!(
            seq.events,
            vec![
                Event::SetInstrument(1),
                Event::NoteOn(0x30),
                Event::Rest(3),
                Event::SetCommand(Command::new(CommandKind::SetTempo, [2, 0])),
                Event::NoteOn(0x34),
                Event::NoteOff,
                Event::Rest(1),
            ]
        );
    }

    #[test]
    fn unknown_sequence_bytes_are_errors() {
        let memory = MemoryImage::with_block(0x2000, &[0x30, 0xE0]).unwrap();
        assert!(matches!(
            decode_sequence(&memory, 0x2000, &encoding()),
            Err(ConvertError::IncompleteExtraction { .. })
        ));
    }

    #[test]
    fn order_lists_carry_transpose() {
        let encoding = OrderEncoding {
            transpose: ByteRange {
                start: 0xA0,
                end: 0xDF,
            },
            center: 0xC0,
            stop: 0xFE,
            loop_marker: 0xFF,
        };
        let memory =
            MemoryImage::with_block(0x3000, &[0x00, 0xCC, 0x01, 0x00, 0xB4, 0x02, 0xFF, 0x01])
                .unwrap();
        let list = decode_order_list(&memory, 0x3000, &encoding).unwrap();
        assert_eq!(
            list.entries,
            vec![
                OrderEntry::new(0, 0),
                OrderEntry::new(12, 1),
                OrderEntry::new(12, 0),
                OrderEntry::new(-12, 2),
            ]
        );
        assert_eq!(list.end, OrderEnd::Loop(1));
    }

    #[test]
    fn terminators_and_column_major_records() {
        let mut data = vec![0u8; 64];
        // Column-major, stride 16: rows (1,10) (2,20) then terminator 0.
        data[0] = 1;
        data[1] = 2;
        data[16] = 10;
        data[17] = 20;
        let memory = MemoryImage::with_block(0x4000, &data).unwrap();
        let scanner = Scanner::new(&memory, 0x4000, data.len());
        let locator = RecordLocator {
            address: AddressRef::Relative(0),
            columns: 2,
            layout: RecordLayout::ColumnMajor { stride: 16 },
            end: EndPolicy::Terminator {
                column: 0,
                value: 0,
                ambiguous_zero: true,
            },
            max_rows: 16,
        };
        let (block, rows) = scanner.records(&locator, "test").unwrap();
        assert_eq!(block.rows, 2);
        assert_eq!(rows, vec![vec![1, 10], vec![2, 20]]);
    }

    #[test]
    fn signatures_resolve_through_pointers() {
        let data = [0xEA, 0xBD, 0x34, 0x12, 0x8D, 0x04, 0xD4];
        let memory = MemoryImage::with_block(0x1000, &data).unwrap();
        let scanner = Scanner::new(&memory, 0x1000, data.len());
        let address = scanner
            .resolve(&AddressRef::Signature {
                pattern: "BD ?? ?? 8D 04 D4".into(),
                offset: 1,
                deref: true,
            })
            .unwrap();
        assert_eq!(address, 0x1234);
        assert!(scanner
            .resolve(&AddressRef::Signature {
                pattern: "01 02".into(),
                offset: 0,
                deref: false,
            })
            .is_err());
    }
}
