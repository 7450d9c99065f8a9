//! Byte encodings of the model inside the driver's data area.
//!
//! Table rows carry their markers in column 0: `$7F` loops to the row in
//! column 1, `$7E` ends the program. Arpeggio rows are one byte wide, so
//! there `$7F` ends and `$80 | row` loops. Sequences are `(class, param)`
//! pairs and order lists are `(0x80 + transpose, sequence)` pairs.

use crate::error::{ConvertError, Degradation, DegradationKind, Result};
use crate::model::{
    Command, CommandKind, Event, Instrument, OrderEnd, OrderEntry, OrderList, Sequence, Table,
    TableKind, TableRow,
};

use super::driver::{event, order};

/// Column 0 value of a loop row.
pub const TABLE_LOOP: u8 = 0x7F;
/// Column 0 value of an end row.
pub const TABLE_END: u8 = 0x7E;
/// Substitute for step values that collide with a marker.
pub const MARKER_SUBSTITUTE: u8 = 0x7D;
/// Arpeggio end marker.
pub const ARP_END: u8 = 0x7F;
/// Arpeggio loop flag.
pub const ARP_LOOP: u8 = 0x80;
/// Rows an arpeggio loop can address.
pub const ARP_ROWS: usize = 0x80;
/// "No table" in instrument columns.
pub const NO_TABLE: u8 = 0xFF;
/// Columns of the instrument table.
pub const INSTRUMENT_COLUMNS: usize = 6;
/// Columns of the command table.
pub const COMMAND_COLUMNS: usize = 3;

const FLAG_HARD_RESTART: u8 = 0x01;

/// Encode table rows, each `columns` bytes wide.
pub fn encode_table(
    table: &Table,
    columns: usize,
    degradations: &mut Vec<Degradation>,
) -> Result<Vec<Vec<u8>>> {
    let mut collisions = 0;
    let rows = table
        .rows
        .iter()
        .map(|row| {
            let mut out = vec![0u8; columns];
            match (table.kind, row) {
                (TableKind::Arpeggio, TableRow::Step(values)) => {
                    let value = values.first().copied().unwrap_or(0);
                    out[0] = if value >= ARP_END {
                        collisions += 1;
                        MARKER_SUBSTITUTE
                    } else {
                        value
                    };
                }
                (TableKind::Arpeggio, TableRow::Loop(target)) => {
                    if *target as usize >= ARP_ROWS {
                        return Err(ConvertError::CapacityExceeded {
                            table: "arpeggio loop target".into(),
                            required: *target as usize + 1,
                            capacity: ARP_ROWS,
                        });
                    }
                    out[0] = ARP_LOOP | target;
                }
                (TableKind::Arpeggio, TableRow::End) => out[0] = ARP_END,
                (_, TableRow::Step(values)) => {
                    for (dst, src) in out.iter_mut().zip(values) {
                        *dst = *src;
                    }
                    if out[0] == TABLE_LOOP || out[0] == TABLE_END {
                        collisions += 1;
                        out[0] = MARKER_SUBSTITUTE;
                    }
                }
                (_, TableRow::Loop(target)) => {
                    out[0] = TABLE_LOOP;
                    if let Some(col) = out.get_mut(1) {
                        *col = *target;
                    }
                }
                (_, TableRow::End) => out[0] = TABLE_END,
            }
            Ok(out)
        })
        .collect::<Result<Vec<_>>>()?;
    if collisions > 0 {
        degradations.push(Degradation::new(
            DegradationKind::UnsupportedFeature,
            format!(
                "{} table: {collisions} step value(s) collide with markers, replaced by ${MARKER_SUBSTITUTE:02X}",
                table.kind
            ),
        ));
    }
    Ok(rows)
}

/// Decode `rows` (already limited to the used count).
pub fn decode_table(kind: TableKind, rows: &[Vec<u8>]) -> Table {
    let width = kind.width();
    let rows = rows
        .iter()
        .map(|row| {
            let first = row.first().copied().unwrap_or(0);
            if kind == TableKind::Arpeggio {
                return match first {
                    ARP_END => TableRow::End,
                    v if v & ARP_LOOP != 0 => TableRow::Loop(v & 0x7F),
                    v => TableRow::Step(vec![v]),
                };
            }
            match first {
                TABLE_LOOP => TableRow::Loop(row.get(1).copied().unwrap_or(0)),
                TABLE_END => TableRow::End,
                _ => {
                    let mut step = row.clone();
                    step.resize(width, 0);
                    TableRow::Step(step)
                }
            }
        })
        .collect();
    Table::new(kind, rows)
}

/// Instrument row: `AD, SR, flags, wave, pulse, filter`.
pub fn encode_instrument(instrument: &Instrument) -> Vec<u8> {
    vec![
        instrument.attack_decay,
        instrument.sustain_release,
        if instrument.hard_restart {
            FLAG_HARD_RESTART
        } else {
            0
        },
        instrument.wave,
        instrument.pulse.unwrap_or(NO_TABLE),
        instrument.filter.unwrap_or(NO_TABLE),
    ]
}

/// Inverse of [`encode_instrument`].
pub fn decode_instrument(row: &[u8]) -> Instrument {
    let col = |i: usize| row.get(i).copied().unwrap_or(NO_TABLE);
    let table = |v: u8| (v != NO_TABLE).then_some(v);
    Instrument {
        attack_decay: col(0),
        sustain_release: col(1),
        wave: col(3),
        pulse: table(col(4)),
        filter: table(col(5)),
        hard_restart: col(2) & FLAG_HARD_RESTART != 0,
    }
}

/// Command row: `kind, arg0, arg1`.
pub fn encode_command(command: &Command) -> Vec<u8> {
    vec![command.kind.id(), command.args[0], command.args[1]]
}

/// Inverse of [`encode_command`].
pub fn decode_command(row: &[u8]) -> Result<Command> {
    let id = row.first().copied().unwrap_or(0xFF);
    let kind = CommandKind::from_id(id).ok_or_else(|| format!("unknown command kind {id}"))?;
    Ok(Command::new(
        kind,
        [
            row.get(1).copied().unwrap_or(0),
            row.get(2).copied().unwrap_or(0),
        ],
    ))
}

/// Encode a sequence. Commands are referenced by their index in `commands`;
/// commands missing from it are skipped.
pub fn encode_sequence(sequence: &Sequence, commands: &[Command]) -> Vec<u8> {
    let mut out = Vec::with_capacity(sequence.events.len() * 2 + 2);
    for ev in &sequence.events {
        let pair = match ev {
            Event::NoteOn(pitch) => [event::NOTE_ON, *pitch],
            Event::NoteOff => [event::NOTE_OFF, 0],
            Event::Tie => [event::TIE, 0],
            Event::SetInstrument(id) => [event::INSTRUMENT, *id],
            Event::Rest(rows) => [event::REST, *rows],
            Event::SetCommand(command) => match commands.iter().position(|c| c == command) {
                Some(index) => [event::COMMAND, index as u8],
                None => continue,
            },
        };
        out.extend_from_slice(&pair);
    }
    out.extend_from_slice(&[event::END, 0]);
    out
}

/// Decode one sequence starting at `bytes[0]`.
pub fn decode_sequence(bytes: &[u8], commands: &[Command]) -> Result<Sequence> {
    let mut events = Vec::new();
    for pair in bytes.chunks(2) {
        let (class, param) = match pair {
            [class, param] => (*class, *param),
            _ => break,
        };
        let ev = match class {
            event::END => return Ok(Sequence::new(events)),
            event::NOTE_ON => Event::NoteOn(param),
            event::NOTE_OFF => Event::NoteOff,
            event::TIE => Event::Tie,
            event::INSTRUMENT => Event::SetInstrument(param),
            event::REST => Event::Rest(param),
            event::COMMAND => Event::SetCommand(
                *commands
                    .get(param as usize)
                    .ok_or_else(|| format!("sequence references missing command {param}"))?,
            ),
            other => return Err(format!("unknown sequence event class ${other:02X}").into()),
        };
        events.push(ev);
    }
    Err("sequence runs past the end of the data".into())
}

/// Encode an order list with its end marker.
pub fn encode_order_list(list: &OrderList) -> Vec<u8> {
    let mut out = Vec::with_capacity(list.entries.len() * 2 + 2);
    for entry in &list.entries {
        out.push(order::TRANSPOSE_BIAS.wrapping_add(entry.transpose as u8));
        out.push(entry.sequence);
    }
    match list.end {
        OrderEnd::Loop(index) => out.extend_from_slice(&[order::LOOP, index]),
        OrderEnd::Stop => out.extend_from_slice(&[order::STOP, 0]),
    }
    out
}

/// Decode one order list starting at `bytes[0]`.
pub fn decode_order_list(bytes: &[u8]) -> Result<OrderList> {
    let mut entries = Vec::new();
    for pair in bytes.chunks(2) {
        let (first, second) = match pair {
            [first, second] => (*first, *second),
            _ => break,
        };
        match first {
            order::LOOP => {
                return Ok(OrderList {
                    entries,
                    end: OrderEnd::Loop(second),
                })
            }
            order::STOP => return Ok(OrderList::new(entries)),
            t => entries.push(OrderEntry::new(
                t.wrapping_sub(order::TRANSPOSE_BIAS) as i8,
                second,
            )),
        }
    }
    Err("order list runs past the end of the data".into())
}

/// Write `rows` column-major into `data`, each column `capacity` bytes.
pub fn write_columns(data: &mut [u8], rows: &[Vec<u8>], capacity: usize) {
    for (r, row) in rows.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            if let Some(dst) = data.get_mut(c * capacity + r) {
                *dst = *value;
            }
        }
    }
}

/// Read `used` rows of a column-major block.
pub fn read_columns(data: &[u8], columns: usize, capacity: usize, used: usize) -> Vec<Vec<u8>> {
    (0..used)
        .map(|r| {
            (0..columns)
                .map(|c| data.get(c * capacity + r).copied().unwrap_or(0))
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_markers_sit_in_column_zero() {
        let table = Table::new(
            TableKind::Wave,
            vec![
                TableRow::Step(vec![0x41, 0]),
                TableRow::Step(vec![0x40, 12]),
                TableRow::Loop(1),
                TableRow::End,
            ],
        );
        let mut degradations = Vec::new();
        let rows = encode_table(&table, 2, &mut degradations).unwrap();
        assert_eq!(rows[2], vec![0x7F, 1]);
        assert_eq!(rows[3], vec![0x7E, 0]);
        assert!(degradations.is_empty());
        assert_eq!(decode_table(TableKind::Wave, &rows), table);
    }

    #[test]
    fn marker_collisions_degrade() {
        let table = Table::new(TableKind::Filter, vec![TableRow::Step(vec![0x7F, 1, 2, 3])]);
        let mut degradations = Vec::new();
        let rows = encode_table(&table, 4, &mut degradations).unwrap();
        assert_eq!(rows[0], vec![MARKER_SUBSTITUTE, 1, 2, 3]);
        assert_eq!(degradations.len(), 1);
        assert_eq!(degradations[0].kind, DegradationKind::UnsupportedFeature);
    }

    #[test]
    fn arpeggio_uses_high_bit_loops() {
        let table = Table::new(
            TableKind::Arpeggio,
            vec![
                TableRow::Step(vec![0]),
                TableRow::Step(vec![4]),
                TableRow::Step(vec![7]),
                TableRow::Loop(0),
            ],
        );
        let mut degradations = Vec::new();
        let rows = encode_table(&table, 1, &mut degradations).unwrap();
        assert_eq!(rows[3], vec![0x80]);
        assert_eq!(decode_table(TableKind::Arpeggio, &rows), table);
    }

    #[test]
    fn arpeggio_loops_past_seven_bits_are_rejected() {
        let mut rows: Vec<TableRow> = (0..140).map(|i| TableRow::Step(vec![i as u8 % 12])).collect();
        rows.push(TableRow::Loop(130));
        let table = Table::new(TableKind::Arpeggio, rows);
        let mut degradations = Vec::new();
        assert!(matches!(
            encode_table(&table, 1, &mut degradations),
            Err(ConvertError::CapacityExceeded { capacity: ARP_ROWS, .. })
        ));
    }

    #[test]
    fn instruments_map_missing_tables_to_ff() {
        let mut instrument = Instrument::new(0x09, 0xA8, 3);
        instrument.filter = Some(0);
        instrument.hard_restart = true;
        let row = encode_instrument(&instrument);
        assert_eq!(row, vec![0x09, 0xA8, 0x01, 3, 0xFF, 0]);
        assert_eq!(decode_instrument(&row), instrument);
    }

    #[test]
    fn sequences_reference_commands_by_index() {
        let tempo = Command::new(CommandKind::SetTempo, [3, 0]);
        let seq = Sequence::new(vec![
            Event::SetInstrument(1),
            Event::SetCommand(tempo),
            Event::NoteOn(48),
            Event::Tie,
            Event::NoteOn(50),
            Event::Rest(4),
            Event::NoteOff,
        ]);
        let bytes = encode_sequence(&seq, &[tempo]);
        assert_eq!(&bytes[..4], &[0x03, 1, 0x05, 0]);
        assert_eq!(&bytes[bytes.len() - 2..], &[0x7F, 0]);
        assert_eq!(decode_sequence(&bytes, &[tempo]).unwrap(), seq);
        assert!(decode_sequence(&bytes, &[]).is_err());
        assert!(decode_sequence(&bytes[..4], &[tempo]).is_err());
    }

    #[test]
    fn order_lists_keep_signed_transpose() {
        let list = OrderList {
            entries: vec![OrderEntry::new(0, 0), OrderEntry::new(-12, 1), OrderEntry::new(7, 0)],
            end: OrderEnd::Loop(1),
        };
        let bytes = encode_order_list(&list);
        assert_eq!(bytes, vec![0x80, 0, 0x74, 1, 0x87, 0, 0xFF, 1]);
        assert_eq!(decode_order_list(&bytes).unwrap(), list);
        assert_eq!(
            decode_order_list(&[0xFE, 0]).unwrap(),
            OrderList::new(Vec::new())
        );
    }

    #[test]
    fn column_major_round_trip() {
        let rows = vec![vec![1, 2, 3], vec![4, 5, 6]];
        let mut data = vec![0u8; 12];
        write_columns(&mut data, &rows, 4);
        assert_eq!(data, vec![1, 4, 0, 0, 2, 5, 0, 0, 3, 6, 0, 0]);
        assert_eq!(read_columns(&data, 3, 4, 2), rows);
    }
}
