//! Target encoder: instantiate a driver template with a song.
//!
//! Encoding is a pure function of the song, the template and the options:
//! 1. validate the song
//! 2. fit it into the template's capacities (fail or truncate)
//! 3. relocate the driver code to the requested base
//! 4. serialize tables, instruments, commands, order lists and sequences
//! 5. wrap everything in a container

pub mod asm;
pub mod codec;
pub mod container;
pub mod driver;
pub mod layout;
pub mod patch;
pub mod template;

use std::collections::BTreeMap;

use log::{debug, info, warn};
use sidconv_emu::note_frequency;
use sidconv_emu::sid::NOTE_COUNT;

use crate::config::CapacityPolicy;
use crate::error::{ConvertError, Degradation, DegradationKind, Result};
use crate::model::{Command, CommandKind, Event, OrderEnd, Song, TableKind, TableRow, VOICES};

pub use container::Sf2Container;
pub use layout::Layout;
pub use patch::{apply_patches, derive_patches, PointerPatch};
pub use template::{
    BuiltinTemplates, DirectoryTemplates, Slot, Symbol, Template, TemplateRepository,
};

use codec::{ARP_END, ARP_ROWS, TABLE_END};
use container::{DriverCommon, DriverDescriptor, MusicData, SongInfo, StateAddress, TableDescriptor};

/// Encoder options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Load address; the template's own base when `None`.
    pub base: Option<u16>,
    /// Capacity overflow handling.
    pub capacity_policy: CapacityPolicy,
}

/// Result of [`encode`].
#[derive(Debug, Clone)]
pub struct EncodedSong {
    /// Container file bytes.
    pub bytes: Vec<u8>,
    /// The container structure behind `bytes`.
    pub container: Sf2Container,
    /// Patches applied to the driver code.
    pub patches: Vec<PointerPatch>,
    /// Non-fatal problems.
    pub degradations: Vec<Degradation>,
    /// Whether the output differs audibly from the song.
    pub lossy: bool,
    /// Load address used.
    pub base: u16,
}

/// Encode `song` with `template`.
pub fn encode(song: &Song, template: &Template, options: &EncodeOptions) -> Result<EncodedSong> {
    let errors = song.validate();
    if !errors.is_empty() {
        return Err(ConvertError::MalformedModel { errors });
    }

    let base = options.base.unwrap_or(template.base);
    let layout = Layout::new(template, base)?;
    let patches = derive_patches(template, &layout)?;
    let mut code = template.code.clone();
    apply_patches(&mut code, &patches)?;
    debug!(
        "driver '{}' relocated to ${base:04X} with {} patches",
        template.name,
        patches.len()
    );

    let mut degradations = Vec::new();
    let mut song = song.clone();
    drop_unsupported(&mut song, template, &mut degradations);
    let commands = fit(&mut song, template, options.capacity_policy, &mut degradations)?;
    let errors = song.validate();
    if !errors.is_empty() {
        return Err(ConvertError::MalformedModel { errors });
    }

    // Music data: order lists first, then sequences.
    let mut music = Vec::new();
    let mut order_pointers = Vec::with_capacity(VOICES);
    for list in &song.order_lists {
        order_pointers.push(layout.music as usize + music.len());
        music.extend(codec::encode_order_list(list));
    }
    let mut sequence_pointers = Vec::with_capacity(song.sequences.len());
    for sequence in &song.sequences {
        sequence_pointers.push(layout.music as usize + music.len());
        music.extend(codec::encode_sequence(sequence, &commands));
    }
    if music.len() > layout.music_capacity() {
        return Err(ConvertError::CapacityExceeded {
            table: "music data".into(),
            required: music.len(),
            capacity: layout.music_capacity(),
        });
    }

    let offset = |address: u16| (address - base) as usize;
    let mut image = vec![0u8; layout.fixed_size() + music.len()];
    image[..code.len()].copy_from_slice(&code);

    let mut tables = Vec::with_capacity(layout.slots.len());
    for (id, slot) in layout.slots.iter().enumerate() {
        let capacity = slot.capacity as usize;
        let rows: Vec<Vec<u8>> = match slot.slot {
            Slot::Instruments => song
                .instruments
                .iter()
                .map(codec::encode_instrument)
                .collect(),
            Slot::Commands => commands.iter().map(codec::encode_command).collect(),
            other => match other.table_kind().and_then(|kind| song.table(kind)) {
                Some(table) => codec::encode_table(table, slot.columns as usize, &mut degradations)?,
                None => Vec::new(),
            },
        };
        let region = &mut image[offset(slot.address)..offset(slot.address) + slot.size()];
        codec::write_columns(region, &rows, capacity);
        if rows.len() < capacity {
            match slot.slot.table_kind() {
                Some(TableKind::Arpeggio) => region[rows.len()] = ARP_END,
                Some(_) => region[rows.len()] = TABLE_END,
                None => {}
            }
        }
        tables.push(TableDescriptor {
            kind: slot.slot.id(),
            id: id as u8,
            layout: 0,
            address: slot.address,
            columns: slot.columns,
            capacity: slot.capacity,
            used: rows.len() as u8,
            name: template
                .spec(slot.slot)
                .map(|s| s.name.clone())
                .unwrap_or_default(),
        });
    }

    for note in 0..NOTE_COUNT {
        let [lo, hi] = note_frequency(note).to_le_bytes();
        image[offset(layout.freq_lo) + note as usize] = lo;
        image[offset(layout.freq_hi) + note as usize] = hi;
    }
    image[offset(layout.settings)] = song.tempo;
    for (voice, pointer) in order_pointers.iter().enumerate() {
        let [lo, hi] = (*pointer as u16).to_le_bytes();
        image[offset(layout.order_lo) + voice] = lo;
        image[offset(layout.order_hi) + voice] = hi;
    }
    for (index, pointer) in sequence_pointers.iter().enumerate() {
        let [lo, hi] = (*pointer as u16).to_le_bytes();
        image[offset(layout.sequence_lo) + index] = lo;
        image[offset(layout.sequence_hi) + index] = hi;
    }
    let music_start = offset(layout.music);
    image[music_start..].copy_from_slice(&music);

    let container = Sf2Container {
        load_address: base,
        descriptor: DriverDescriptor {
            driver_type: template.driver_type,
            code_size: code.len() as u16,
            name: template.name.clone(),
            version: template.version,
        },
        common: DriverCommon {
            init: base + template.entry.init,
            stop: base + template.entry.stop,
            play: base + template.entry.play,
            state: template
                .state_pointers
                .iter()
                .filter_map(|p| {
                    layout.address(p.symbol).map(|a| StateAddress {
                        name: p.name.clone(),
                        address: a.wrapping_add(p.addend),
                    })
                })
                .collect(),
        },
        tables,
        music: MusicData {
            voices: VOICES as u8,
            order_lo: layout.order_lo,
            order_hi: layout.order_hi,
            sequence_lo: layout.sequence_lo,
            sequence_hi: layout.sequence_hi,
            sequence_count: song.sequences.len() as u8,
            tempo: layout.settings,
        },
        info: SongInfo {
            title: song.title.clone(),
            author: song.author.clone(),
            released: song.released.clone(),
        },
        extra_blocks: Vec::new(),
        image,
    };
    let bytes = container.to_bytes()?;
    let lossy = degradations.iter().any(Degradation::is_lossy);
    if lossy {
        warn!(
            "encoding with '{}' is lossy: {} degradation(s)",
            template.name,
            degradations.len()
        );
    }
    info!(
        "encoded {} sequences, {} instruments into {} bytes at ${base:04X}",
        song.sequences.len(),
        song.instruments.len(),
        bytes.len()
    );

    Ok(EncodedSong {
        bytes,
        container,
        patches,
        degradations,
        lossy,
        base,
    })
}

/// Remove what the driver cannot play.
fn drop_unsupported(song: &mut Song, template: &Template, degradations: &mut Vec<Degradation>) {
    let mut dropped: BTreeMap<String, usize> = BTreeMap::new();
    for sequence in &mut song.sequences {
        sequence.events.retain(|ev| match ev {
            Event::SetCommand(command) if !template.supports(command.kind) => {
                *dropped.entry(format!("{:?}", command.kind)).or_default() += 1;
                false
            }
            _ => true,
        });
    }
    for (kind, count) in dropped {
        warn!("template '{}' has no {kind} command", template.name);
        degradations.push(Degradation::new(
            DegradationKind::UnsupportedFeature,
            format!("{count} {kind} command(s) dropped"),
        ));
    }

    let before = song.tables.len();
    song.tables.retain(|table| {
        template.spec(Slot::for_table(table.kind)).is_some() || table.rows.is_empty()
    });
    if song.tables.len() != before {
        for kind in TableKind::ALL {
            if template.spec(Slot::for_table(kind)).is_none() {
                degradations.push(Degradation::new(
                    DegradationKind::UnsupportedFeature,
                    format!("template '{}' has no {kind} table", template.name),
                ));
            }
        }
    }
}

/// Check capacities; truncate on request. Returns the command table.
fn fit(
    song: &mut Song,
    template: &Template,
    policy: CapacityPolicy,
    degradations: &mut Vec<Degradation>,
) -> Result<Vec<Command>> {
    for kind in TableKind::ALL {
        let Some(spec) = template.spec(Slot::for_table(kind)) else {
            continue;
        };
        let mut capacity = spec.capacity as usize;
        if kind == TableKind::Arpeggio {
            // Arpeggio loops carry their target in seven bits.
            capacity = capacity.min(ARP_ROWS);
        }
        let Some(table) = song.table_mut(kind) else {
            continue;
        };
        if !over(kind.name(), table.rows.len(), capacity, policy, degradations)? {
            continue;
        }
        table.rows.truncate(capacity);
        for row in &mut table.rows {
            if matches!(row, TableRow::Loop(target) if *target as usize >= capacity) {
                *row = TableRow::End;
            }
        }
        // A full slot has no room for the end marker after it.
        if matches!(table.rows.last(), Some(TableRow::Step(_))) {
            table.rows.pop();
            table.rows.push(TableRow::End);
        }
        let fits = |index: &u8| (*index as usize) < capacity;
        for instrument in &mut song.instruments {
            match kind {
                TableKind::Wave if !fits(&instrument.wave) => instrument.wave = 0,
                TableKind::Pulse => instrument.pulse = instrument.pulse.filter(fits),
                TableKind::Filter => instrument.filter = instrument.filter.filter(fits),
                _ => {}
            }
        }
        if kind == TableKind::Filter {
            for sequence in &mut song.sequences {
                sequence.events.retain(|ev| match ev {
                    Event::SetCommand(c) if c.kind == CommandKind::FilterProgram => fits(&c.args[0]),
                    _ => true,
                });
            }
        }
    }

    if let Some(spec) = template.spec(Slot::Instruments) {
        let capacity = spec.capacity as usize;
        if over("instrument", song.instruments.len(), capacity, policy, degradations)? {
            song.instruments.truncate(capacity);
            for sequence in &mut song.sequences {
                for ev in &mut sequence.events {
                    if matches!(ev, Event::SetInstrument(id) if *id as usize >= capacity) {
                        *ev = Event::SetInstrument(0);
                    }
                }
            }
        }
    }

    let mut commands: Vec<Command> = Vec::new();
    for ev in song.sequences.iter().flat_map(|s| &s.events) {
        if let Event::SetCommand(command) = ev {
            if !commands.contains(command) {
                commands.push(*command);
            }
        }
    }
    let capacity = template
        .spec(Slot::Commands)
        .map_or(0, |s| s.capacity as usize);
    if over("command", commands.len(), capacity, policy, degradations)? {
        commands.truncate(capacity);
        for sequence in &mut song.sequences {
            sequence.events.retain(|ev| match ev {
                Event::SetCommand(command) => commands.contains(command),
                _ => true,
            });
        }
    }

    let max_sequences = template.limits.max_sequences as usize;
    if over("sequence", song.sequences.len(), max_sequences, policy, degradations)? {
        song.sequences.truncate(max_sequences);
        for list in &mut song.order_lists {
            let mut kept = 0u8;
            let mut remapped_loop = None;
            let loop_target = match list.end {
                OrderEnd::Loop(target) => Some(target as usize),
                OrderEnd::Stop => None,
            };
            let mut index = 0;
            list.entries.retain(|entry| {
                if loop_target == Some(index) {
                    remapped_loop = Some(kept);
                }
                index += 1;
                let keep = (entry.sequence as usize) < max_sequences;
                kept += keep as u8;
                keep
            });
            list.end = match remapped_loop {
                Some(target) if (target as usize) < list.entries.len() => OrderEnd::Loop(target),
                _ => OrderEnd::Stop,
            };
        }
    }

    let max_entries = template.limits.max_order_entries as usize;
    for voice in 0..song.order_lists.len() {
        let len = song.order_lists[voice].entries.len();
        let name = format!("voice {} order list", voice + 1);
        if over(&name, len, max_entries, policy, degradations)? {
            let list = &mut song.order_lists[voice];
            list.entries.truncate(max_entries);
            if matches!(list.end, OrderEnd::Loop(target) if target as usize >= max_entries) {
                list.end = OrderEnd::Stop;
            }
        }
    }

    Ok(commands)
}

/// `Ok(true)` when `required` exceeds `capacity` and truncation applies.
fn over(
    table: &str,
    required: usize,
    capacity: usize,
    policy: CapacityPolicy,
    degradations: &mut Vec<Degradation>,
) -> Result<bool> {
    if required <= capacity {
        return Ok(false);
    }
    match policy {
        CapacityPolicy::Fail => Err(ConvertError::CapacityExceeded {
            table: table.to_string(),
            required,
            capacity,
        }),
        CapacityPolicy::Truncate => {
            let message = format!("{table} table truncated from {required} to {capacity} entries");
            warn!("{message}");
            degradations.push(Degradation::new(DegradationKind::CapacityTruncated, message));
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Instrument, OrderEntry, Sequence, Table};

    fn song() -> Song {
        let mut song = Song::new(4);
        song.title = "Test".into();
        song.instruments.push(Instrument::new(0x09, 0xA0, 0));
        song.tables.push(Table::new(
            TableKind::Wave,
            vec![TableRow::Step(vec![0x41, 0]), TableRow::End],
        ));
        song.sequences.push(Sequence::new(vec![
            Event::SetInstrument(0),
            Event::NoteOn(48),
            Event::NoteOn(52),
            Event::NoteOn(55),
            Event::Rest(1),
        ]));
        for list in &mut song.order_lists {
            list.entries.push(OrderEntry::new(0, 0));
            list.end = OrderEnd::Loop(0);
        }
        song
    }

    fn minimal() -> Template {
        driver::minimal().unwrap()
    }

    #[test]
    fn container_describes_the_layout() {
        let template = minimal();
        let encoded = encode(&song(), &template, &EncodeOptions::default()).unwrap();
        let container = &encoded.container;
        assert_eq!(container.load_address, 0x1000);
        assert_eq!(container.common.init, 0x1000);
        assert_eq!(container.common.play, 0x1003);
        let wave = container
            .tables
            .iter()
            .find(|t| t.kind == Slot::Wave.id())
            .unwrap();
        assert_eq!(wave.used, 2);
        assert_eq!(container.byte(wave.address), Some(0x41));
        assert_eq!(container.byte(wave.address + 2), Some(TABLE_END));
        assert_eq!(container.byte(container.music.tempo), Some(4));
        assert!(!encoded.lossy);
        assert_eq!(Sf2Container::parse(&encoded.bytes).unwrap(), *container);
    }

    #[test]
    fn oversize_tables_fail_by_default() {
        let mut song = song();
        let filter = Table::new(
            TableKind::Filter,
            (0..200)
                .map(|i| TableRow::Step(vec![0, i as u8, 0xF1, 0x1F]))
                .chain([TableRow::End])
                .collect(),
        );
        song.tables.push(filter);
        match encode(&song, &minimal(), &EncodeOptions::default()) {
            Err(ConvertError::CapacityExceeded {
                table,
                required,
                capacity,
            }) => {
                assert_eq!(table, "filter");
                assert_eq!(required, 201);
                assert_eq!(capacity, 128);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn truncation_is_recorded() {
        let mut song = song();
        let mut rows: Vec<TableRow> =
            (0..200).map(|i| TableRow::Step(vec![0, i as u8, 0xF1, 0x1F])).collect();
        rows.push(TableRow::Loop(150));
        song.tables.push(Table::new(TableKind::Filter, rows));
        song.instruments[0].filter = Some(140);
        let options = EncodeOptions {
            capacity_policy: CapacityPolicy::Truncate,
            ..Default::default()
        };
        let encoded = encode(&song, &minimal(), &options).unwrap();
        assert!(encoded.lossy);
        assert_eq!(encoded.degradations.len(), 1);
        assert_eq!(
            encoded.degradations[0].message,
            "filter table truncated from 201 to 128 entries"
        );
        let filter = encoded
            .container
            .tables
            .iter()
            .find(|t| t.kind == Slot::Filter.id())
            .unwrap();
        assert_eq!(filter.used, 128);
        assert_eq!(
            encoded.container.byte(filter.address + 127),
            Some(TABLE_END)
        );
    }

    #[test]
    fn truncated_arpeggios_keep_loops_addressable() {
        let mut song = song();
        let mut rows: Vec<TableRow> = (0..150).map(|i| TableRow::Step(vec![i as u8 % 12])).collect();
        rows.push(TableRow::Loop(130));
        song.tables.push(Table::new(TableKind::Arpeggio, rows));
        // The extra slot moves everything behind it; nothing runs here, so skip relocation.
        let mut wide = minimal();
        wide.relocations.clear();
        wide.tables.push(template::TableSpec {
            slot: Slot::Arpeggio,
            columns: 1,
            capacity: 200,
            name: "Arpeggio".into(),
        });
        let options = EncodeOptions {
            capacity_policy: CapacityPolicy::Truncate,
            ..Default::default()
        };
        let encoded = encode(&song, &wide, &options).unwrap();
        let arpeggio = encoded
            .container
            .tables
            .iter()
            .find(|t| t.kind == Slot::Arpeggio.id())
            .unwrap();
        assert_eq!(arpeggio.used as usize, ARP_ROWS);
        assert_eq!(
            encoded.container.byte(arpeggio.address + ARP_ROWS as u16 - 1),
            Some(ARP_END)
        );
    }

    #[test]
    fn unsupported_commands_and_arpeggios_degrade() {
        let mut song = song();
        song.sequences[0].events.insert(
            1,
            Event::SetCommand(Command::new(CommandKind::Vibrato, [2, 3])),
        );
        song.tables.push(Table::new(
            TableKind::Arpeggio,
            vec![TableRow::Step(vec![0]), TableRow::Loop(0)],
        ));
        let encoded = encode(&song, &minimal(), &EncodeOptions::default()).unwrap();
        assert!(encoded.lossy);
        assert_eq!(encoded.degradations.len(), 2);
        assert!(encoded
            .degradations
            .iter()
            .all(|d| d.kind == DegradationKind::UnsupportedFeature));
    }

    #[test]
    fn commands_are_deduplicated() {
        let mut song = song();
        let tempo = Command::new(CommandKind::SetTempo, [3, 0]);
        song.sequences[0].events.insert(0, Event::SetCommand(tempo));
        song.sequences.push(Sequence::new(vec![
            Event::SetCommand(tempo),
            Event::NoteOn(40),
        ]));
        song.order_lists[1].entries.push(OrderEntry::new(0, 1));
        let encoded = encode(&song, &minimal(), &EncodeOptions::default()).unwrap();
        let commands = encoded
            .container
            .tables
            .iter()
            .find(|t| t.kind == Slot::Commands.id())
            .unwrap();
        assert_eq!(commands.used, 1);
        assert_eq!(encoded.container.music.sequence_count, 2);
    }

    #[test]
    fn malformed_songs_are_rejected() {
        let mut song = song();
        song.order_lists[0].entries.push(OrderEntry::new(0, 9));
        assert!(matches!(
            encode(&song, &minimal(), &EncodeOptions::default()),
            Err(ConvertError::MalformedModel { .. })
        ));
    }

    #[test]
    fn relocated_images_differ_only_in_addresses() {
        let template = minimal();
        let low = encode(&song(), &template, &EncodeOptions::default()).unwrap();
        let high = encode(
            &song(),
            &template,
            &EncodeOptions {
                base: Some(0x4000),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(high.base, 0x4000);
        assert_eq!(high.container.image.len(), low.container.image.len());
        assert_eq!(high.container.common.play, 0x4003);
        assert_eq!(high.patches.len(), template.relocations.len());
    }
}
