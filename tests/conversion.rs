use anyhow::Result;
use approx::assert_relative_eq;
use sidconv::analyzer::profile::{GENERIC, SF2_NATIVE};
use sidconv::encoder::{driver, encode, EncodeOptions};
use sidconv::model::{
    Event, Instrument, OrderEnd, OrderEntry, Provenance, Sequence, Song, Table, TableKind,
    TableRow,
};
use sidconv::model::ModelError;
use sidconv::{
    analyze, convert, emulate, CapacityPolicy, ConvertConfig, ConvertError, Converter,
    DegradationKind, EmulationConfig, ProfileRegistry, PsidFile, Source, SourceProfile,
};
use sidconv_emu::SidRegister;

fn one_instrument_song(events: Vec<Event>) -> Song {
    let mut song = Song::new(6);
    song.title = "Scenario".into();
    song.instruments.push(Instrument::new(0x09, 0x00, 0));
    song.tables.push(Table::new(
        TableKind::Wave,
        vec![TableRow::Step(vec![0x41, 0]), TableRow::End],
    ));
    song.sequences.push(Sequence::new(events));
    for list in &mut song.order_lists {
        list.entries.push(OrderEntry::new(0, 0));
    }
    song
}

fn native_round_trip(song: &Song) -> Result<Song> {
    let encoded = encode(song, &driver::minimal()?, &EncodeOptions::default())?;
    let source = Source::parse(&encoded.bytes)?;
    let draft = analyze(&source, &SourceProfile::sf2_native(), &ConvertConfig::default())?;
    Ok(draft.song)
}

#[test]
fn four_events_survive_a_round_trip() -> Result<()> {
    let events = vec![
        Event::NoteOn(48),
        Event::NoteOn(52),
        Event::NoteOn(55),
        Event::Rest(1),
    ];
    let song = one_instrument_song(events.clone());
    let decoded = native_round_trip(&song)?;
    assert_eq!(decoded.sequences.len(), 1);
    assert_eq!(decoded.sequences[0].events, events);
    assert_eq!(decoded, song);
    Ok(())
}

#[test]
fn looping_songs_round_trip() -> Result<()> {
    let mut song = one_instrument_song(vec![
        Event::SetInstrument(1),
        Event::NoteOn(40),
        Event::Tie,
        Event::NoteOn(41),
        Event::NoteOff,
        Event::Rest(7),
    ]);
    let mut pad = Instrument::new(0x8F, 0xF8, 2);
    pad.pulse = Some(0);
    pad.hard_restart = true;
    song.instruments.push(pad);
    song.tables[0].rows.extend([TableRow::Step(vec![0x41, 0]), TableRow::Step(vec![0x40, 0]), TableRow::Loop(2)]);
    song.tables.push(Table::new(
        TableKind::Pulse,
        vec![TableRow::Step(vec![0x04, 0x00, 8]), TableRow::End],
    ));
    song.order_lists[1].entries.push(OrderEntry::new(-5, 0));
    song.order_lists[1].end = OrderEnd::Loop(0);
    assert_eq!(native_round_trip(&song)?, song);
    Ok(())
}

#[test]
fn native_containers_convert_losslessly() -> Result<()> {
    let song = one_instrument_song(vec![Event::NoteOn(48), Event::Rest(3), Event::NoteOff]);
    let encoded = encode(&song, &driver::minimal()?, &EncodeOptions::default())?;

    let conversion = convert(&encoded.bytes, None, driver::MINIMAL, &ConvertConfig::default())?;
    assert_eq!(conversion.profile, SF2_NATIVE);
    assert!(!conversion.lossy);
    assert!(conversion.degradations.is_empty());
    assert_eq!(conversion.binary, encoded.bytes);
    let accuracy = conversion.accuracy.expect("validation ran");
    assert_relative_eq!(accuracy.score, 100.0);
    Ok(())
}

#[test]
fn emulation_recovers_played_pitches() -> Result<()> {
    let song = {
        let mut song = one_instrument_song(vec![
            Event::SetInstrument(0),
            Event::NoteOn(48),
            Event::Rest(1),
            Event::NoteOff,
            Event::NoteOn(52),
            Event::Rest(1),
            Event::NoteOff,
            Event::NoteOn(55),
            Event::Rest(1),
            Event::NoteOff,
        ]);
        song.order_lists[1].entries.clear();
        song.order_lists[2].entries.clear();
        song
    };
    let encoded = encode(&song, &driver::minimal()?, &EncodeOptions::default())?;
    let container = &encoded.container;
    let psid = PsidFile::new(
        container.load_address,
        container.image.clone(),
        container.common.init,
        container.common.play,
    );

    let conversion = convert(&psid.to_bytes(), None, driver::MINIMAL, &ConvertConfig::default())?;
    assert_eq!(conversion.profile, GENERIC);
    let recovered = &conversion.song;
    assert_eq!(recovered.tempo, 6);
    assert_eq!(recovered.instruments[0].attack_decay, 0x09);
    assert_eq!(recovered.instrument_provenance, Provenance::Dynamic);

    let pitches: Vec<u8> = recovered.order_lists[0]
        .entries
        .iter()
        .flat_map(|entry| {
            recovered.sequences[entry.sequence as usize]
                .events
                .iter()
                .filter_map(move |e| match e {
                    Event::NoteOn(p) => Some((*p as i16 + entry.transpose as i16) as u8),
                    _ => None,
                })
        })
        .collect();
    assert_eq!(pitches, vec![48, 52, 55]);
    assert!(conversion.accuracy.is_some());
    Ok(())
}

#[test]
fn oversized_tables_follow_the_capacity_policy() -> Result<()> {
    let mut song = one_instrument_song(vec![Event::NoteOn(48)]);
    let mut rows: Vec<TableRow> = (0..200).map(|i| TableRow::Step(vec![i as u8, 0, 0, 0x1F])).collect();
    rows.push(TableRow::End);
    song.tables.push(Table::new(TableKind::Filter, rows));
    song.instruments[0].filter = Some(0);
    let template = driver::minimal()?;

    match encode(&song, &template, &EncodeOptions::default()) {
        Err(ConvertError::CapacityExceeded {
            table,
            required,
            capacity,
        }) => {
            assert_eq!(table, "filter");
            assert_eq!(required, 201);
            assert_eq!(capacity, 128);
        }
        other => panic!("expected CapacityExceeded, got {other:?}"),
    }

    let truncated = encode(
        &song,
        &template,
        &EncodeOptions {
            capacity_policy: CapacityPolicy::Truncate,
            ..Default::default()
        },
    )?;
    assert!(truncated.lossy);
    assert!(truncated
        .degradations
        .iter()
        .any(|d| d.kind == DegradationKind::CapacityTruncated));
    Ok(())
}

/// Gate bits written to voice 1's control register in `frame`.
fn gate_writes(song: &Song, frame: u32) -> Result<Vec<u8>> {
    let encoded = encode(song, &driver::minimal()?, &EncodeOptions::default())?;
    let trace = emulate(&encoded.container.program(), frame + 2, &EmulationConfig::default())?;
    Ok(trace
        .frame(frame)
        .iter()
        .filter(|e| e.register == SidRegister::Voice0Control)
        .map(|e| e.value & 1)
        .collect())
}

#[test]
fn repeated_notes_retrigger_the_envelope() -> Result<()> {
    let mut song = one_instrument_song(vec![
        Event::SetInstrument(0),
        Event::NoteOn(48),
        Event::Rest(3),
        Event::NoteOn(52),
        Event::Rest(3),
    ]);
    song.tempo = 1;
    song.order_lists[1].entries.clear();
    song.order_lists[2].entries.clear();
    assert_eq!(gate_writes(&song, 0)?, vec![0, 1]);
    assert_eq!(gate_writes(&song, 3)?, vec![1]);
    assert_eq!(gate_writes(&song, 4)?, vec![0, 1]);

    song.sequences[0].events.insert(3, Event::Tie);
    assert_eq!(gate_writes(&song, 4)?, vec![1]);
    Ok(())
}

#[test]
fn truncated_filter_programs_stop_at_the_slot_end() -> Result<()> {
    let mut song = one_instrument_song(vec![
        Event::SetInstrument(0),
        Event::NoteOn(48),
        Event::Rest(20),
    ]);
    let mut rows: Vec<TableRow> = (0..200).map(|i| TableRow::Step(vec![0, i as u8, 0xF1, 0x1F])).collect();
    rows.push(TableRow::End);
    song.tables.push(Table::new(TableKind::Filter, rows));
    song.instruments[0].filter = Some(120);
    song.order_lists[1].entries.clear();
    song.order_lists[2].entries.clear();

    let options = EncodeOptions {
        capacity_policy: CapacityPolicy::Truncate,
        ..Default::default()
    };
    let encoded = encode(&song, &driver::minimal()?, &options)?;
    let trace = emulate(&encoded.container.program(), 30, &EmulationConfig::default())?;
    let cutoff: Vec<u8> = trace
        .entries
        .iter()
        .filter(|e| e.register == SidRegister::FilterCutoffHi)
        .map(|e| e.value)
        .collect();
    assert_eq!(cutoff, (120..127).collect::<Vec<u8>>());
    Ok(())
}

#[test]
fn order_loops_without_rows_are_rejected() -> Result<()> {
    let mut song = one_instrument_song(vec![Event::SetInstrument(0), Event::NoteOn(48)]);
    song.sequences.push(Sequence::new(vec![Event::SetInstrument(0)]));
    song.order_lists[0].entries.push(OrderEntry::new(0, 1));
    song.order_lists[0].end = OrderEnd::Loop(1);
    match encode(&song, &driver::minimal()?, &EncodeOptions::default()) {
        Err(ConvertError::MalformedModel { errors }) => {
            assert_eq!(errors, vec![ModelError::EmptyOrderLoop { voice: 0, target: 1 }]);
        }
        other => panic!("expected MalformedModel, got {other:?}"),
    }
    Ok(())
}

/// Image matching `tests/fixtures/range_coded.json`: two instruments, the
/// second using a wave program stored after a zero row.
fn tiny_tracker_tune() -> Vec<u8> {
    let mut data = vec![0u8; 0x70];
    data[0] = 0x60;
    data[1] = 0x60;
    data[0x10..0x1C].copy_from_slice(&[0x09, 0x00, 0x00, 0xFF, 0x0A, 0x80, 0x03, 0xFF, 0xFF, 0, 0, 0]);
    data[0x20..0x2A].copy_from_slice(&[0x41, 0x00, 0x7E, 0x00, 0x00, 0x00, 0x11, 0x0C, 0x7E, 0x00]);
    data[0x40..0x42].copy_from_slice(&[0x50, 0x58]);
    data[0x44..0x46].copy_from_slice(&[0x10, 0x10]);
    data[0x50..0x54].copy_from_slice(&[0xA0, 0x30, 0xFB, 0xFF]);
    data[0x58..0x5C].copy_from_slice(&[0xA1, 0x83, 0x34, 0xFF]);
    data[0x60..0x63].copy_from_slice(&[0x00, 0x01, 0xFE]);
    data[0x64..0x66].copy_from_slice(&[0x01, 0xFE]);
    data[0x68] = 0xFE;
    let mut psid = PsidFile::new(0x1000, data, 0x1000, 0x1001);
    psid.header.name = "Tiny".into();
    psid.to_bytes()
}

#[test]
fn range_coded_profiles_load_from_json() -> Result<()> {
    let mut profiles = ProfileRegistry::builtin();
    profiles.load_file(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/range_coded.json"))?;
    let converter = Converter::new().with_profiles(profiles);

    let conversion = converter.convert(&tiny_tracker_tune(), None, driver::MINIMAL, &ConvertConfig::default())?;
    assert_eq!(conversion.profile, "tiny-tracker");
    assert_eq!(conversion.song.title, "Tiny");
    assert_eq!(conversion.song.tempo, 6);
    assert_eq!(
        conversion.song.sequences[1].events,
        vec![Event::SetInstrument(1), Event::NoteOn(0x34), Event::Rest(3)]
    );
    assert_eq!(
        conversion.song.table(TableKind::Wave).map(|t| t.provenance),
        Some(Provenance::Merged)
    );
    assert!(conversion
        .degradations
        .iter()
        .any(|d| d.kind == DegradationKind::IncompleteExtraction));
    // The source player is silent; the conversion is not.
    let accuracy = conversion.accuracy.expect("validation ran");
    assert!(accuracy.score < 100.0);
    Ok(())
}

#[test]
fn multi_sid_tunes_are_rejected_up_front() {
    let mut psid = PsidFile::new(0x1000, vec![0x60, 0x60], 0x1000, 0x1001);
    psid.header.second_sid = 0x42;
    assert!(matches!(
        convert(&psid.to_bytes(), None, driver::MINIMAL, &ConvertConfig::default()),
        Err(ConvertError::FormatIncompatible { .. })
    ));
}
