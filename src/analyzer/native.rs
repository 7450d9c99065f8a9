//! Decoder for containers written by the encoder.

use log::debug;

use crate::encoder::codec;
use crate::encoder::container::TableDescriptor;
use crate::encoder::{Sf2Container, Slot};
use crate::error::{ConvertError, Result};
use crate::model::{Command, Song, TableRow, VOICES};

fn rows(container: &Sf2Container, table: &TableDescriptor) -> Result<Vec<Vec<u8>>> {
    let columns = table.columns as usize;
    let capacity = table.capacity as usize;
    let data = container
        .memory(table.address, columns * capacity)
        .ok_or_else(|| ConvertError::InvalidSource {
            msg: format!("table '{}' lies outside the image", table.name),
        })?;
    Ok(codec::read_columns(data, columns, capacity, table.used as usize))
}

fn pointer(container: &Sf2Container, lo: u16, hi: u16, index: usize) -> Result<u16> {
    let index = index as u16;
    match (container.byte(lo + index), container.byte(hi + index)) {
        (Some(lo), Some(hi)) => Ok(u16::from_le_bytes([lo, hi])),
        _ => Err(ConvertError::InvalidSource {
            msg: format!("pointer {index} lies outside the image"),
        }),
    }
}

/// Rebuild the song stored in `container`.
pub fn decode(container: &Sf2Container) -> Result<Song> {
    let music = &container.music;
    if music.voices as usize != VOICES {
        return Err(ConvertError::FormatIncompatible {
            reason: format!("container has {} voices", music.voices),
        });
    }
    let tempo = container
        .byte(music.tempo)
        .ok_or_else(|| ConvertError::from("tempo lies outside the image"))?;
    let mut song = Song::new(tempo);
    song.title = container.info.title.clone();
    song.author = container.info.author.clone();
    song.released = container.info.released.clone();

    let mut commands: Vec<Command> = Vec::new();
    for table in &container.tables {
        let Some(slot) = Slot::from_id(table.kind) else {
            debug!("skipping unknown table kind {}", table.kind);
            continue;
        };
        if table.used == 0 {
            continue;
        }
        let rows = rows(container, table)?;
        match slot {
            Slot::Instruments => {
                song.instruments = rows.iter().map(|r| codec::decode_instrument(r)).collect()
            }
            Slot::Commands => {
                commands = rows
                    .iter()
                    .map(|r| codec::decode_command(r))
                    .collect::<Result<_>>()?
            }
            other => {
                if let Some(kind) = other.table_kind() {
                    let mut table = codec::decode_table(kind, &rows);
                    if matches!(table.rows.last(), Some(TableRow::Step(_))) {
                        table.rows.push(TableRow::End);
                    }
                    song.tables.push(table);
                }
            }
        }
    }
    song.tables.sort_by_key(|t| t.kind);

    for index in 0..music.sequence_count as usize {
        let address = pointer(container, music.sequence_lo, music.sequence_hi, index)?;
        let bytes = container
            .memory_from(address)
            .ok_or_else(|| format!("sequence {index} lies outside the image"))?;
        song.sequences.push(codec::decode_sequence(bytes, &commands)?);
    }
    for voice in 0..VOICES {
        let address = pointer(container, music.order_lo, music.order_hi, voice)?;
        let bytes = container
            .memory_from(address)
            .ok_or_else(|| format!("order list {voice} lies outside the image"))?;
        song.order_lists[voice] = codec::decode_order_list(bytes)?;
    }
    debug!(
        "decoded container: {} instruments, {} tables, {} sequences",
        song.instruments.len(),
        song.tables.len(),
        song.sequences.len()
    );
    Ok(song)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{driver, encode, EncodeOptions};
    use crate::model::{
        Command, CommandKind, Event, Instrument, OrderEnd, OrderEntry, Sequence, Table, TableKind,
        TableRow,
    };

    #[test]
    fn encoded_songs_decode_to_the_same_model() {
        let mut song = Song::new(5);
        song.title = "Round".into();
        song.author = "Trip".into();
        let mut lead = Instrument::new(0x0A, 0x8A, 0);
        lead.pulse = Some(0);
        lead.hard_restart = true;
        song.instruments = vec![lead, Instrument::new(0x00, 0xF0, 3)];
        song.tables = vec![
            Table::new(
                TableKind::Wave,
                vec![
                    TableRow::Step(vec![0x41, 0]),
                    TableRow::End,
                    TableRow::Step(vec![0x81, 24]),
                    TableRow::Step(vec![0x11, 0]),
                    TableRow::Loop(3),
                ],
            ),
            Table::new(
                TableKind::Pulse,
                vec![TableRow::Step(vec![0x08, 0x00, 4]), TableRow::Step(vec![0x04, 0x00, 4]), TableRow::Loop(0)],
            ),
        ];
        song.sequences = vec![
            Sequence::new(vec![
                Event::SetInstrument(0),
                Event::SetCommand(Command::new(CommandKind::SetVolume, [0x0C, 0])),
                Event::NoteOn(36),
                Event::Rest(2),
                Event::Tie,
                Event::NoteOn(38),
                Event::NoteOff,
            ]),
            Sequence::new(vec![Event::SetInstrument(1), Event::NoteOn(60), Event::Rest(4)]),
        ];
        song.order_lists[0].entries = vec![OrderEntry::new(0, 0), OrderEntry::new(5, 0)];
        song.order_lists[0].end = OrderEnd::Loop(1);
        song.order_lists[1].entries = vec![OrderEntry::new(-12, 1)];
        song.order_lists[2].entries = vec![OrderEntry::new(0, 1)];

        let template = driver::minimal().unwrap();
        let encoded = encode(&song, &template, &EncodeOptions::default()).unwrap();
        let container = Sf2Container::parse(&encoded.bytes).unwrap();
        assert_eq!(decode(&container).unwrap(), song);
    }
}
