use anyhow::Result;
use approx::assert_relative_eq;
use sidconv::encoder::{driver, encode, EncodeOptions};
use sidconv::model::{Event, Instrument, OrderEntry, Sequence, Song, Table, TableKind, TableRow};
use sidconv::{score, ConvertConfig, Program};

// init: RTS / play: LDA #$09; STA $D401; RTS
fn steady() -> Program {
    Program::new(0x1000, vec![0x60, 0xA9, 0x09, 0x8D, 0x01, 0xD4, 0x60], 0x1000, 0x1001)
}

/// Same as [`steady`], except that frame 50 writes $0A.
fn glitch_at_50() -> Program {
    let code = vec![
        0x60, // $1000 init: RTS
        0xE6, 0x20, // $1001 play: INC $20
        0xA5, 0x20, // LDA $20
        0xC9, 0x33, // CMP #51
        0xD0, 0x06, // BNE skip
        0xA9, 0x0A, // LDA #$0A
        0x8D, 0x01, 0xD4, // STA $D401
        0x60, // RTS
        0xA9, 0x09, // skip: LDA #$09
        0x8D, 0x01, 0xD4, // STA $D401
        0x60, // RTS
    ];
    Program::new(0x1000, code, 0x1000, 0x1001)
}

#[test]
fn a_program_matches_itself() -> Result<()> {
    let report = score(&steady(), &steady(), 100, &ConvertConfig::default())?;
    assert_eq!(report.frames, 100);
    assert_relative_eq!(report.score, 100.0);
    assert_relative_eq!(report.frame_match, 100.0);
    assert_relative_eq!(report.voice_match, 100.0);
    assert_relative_eq!(report.register_match, 100.0);
    assert_relative_eq!(report.filter_match, 100.0);
    assert_eq!(report.original_writes, 100);
    assert!(report.divergent_frames.is_empty());
    Ok(())
}

#[test]
fn one_bad_write_is_localized() -> Result<()> {
    let report = score(&steady(), &glitch_at_50(), 100, &ConvertConfig::default())?;
    assert!(report.score > 0.0 && report.score < 100.0);
    assert_eq!(report.first_divergence, Some(50));
    assert_eq!(report.divergent_frames.len(), 1);
    assert_eq!(report.divergent_frames[0].frame, 50);
    assert_eq!(report.divergent_frames[0].registers[0].original, 0x09);
    assert_eq!(report.divergent_frames[0].registers[0].converted, 0x0A);
    assert_relative_eq!(report.frame_match, 99.0);
    Ok(())
}

#[test]
fn relocated_drivers_sound_the_same() -> Result<()> {
    let mut song = Song::new(3);
    let mut lead = Instrument::new(0x08, 0xA4, 0);
    lead.pulse = Some(0);
    song.instruments.push(lead);
    song.tables.push(Table::new(
        TableKind::Wave,
        vec![
            TableRow::Step(vec![0x41, 12]),
            TableRow::Step(vec![0x41, 0]),
            TableRow::Loop(0),
        ],
    ));
    song.tables.push(Table::new(
        TableKind::Pulse,
        vec![
            TableRow::Step(vec![0x08, 0x00, 3]),
            TableRow::Step(vec![0x06, 0x00, 3]),
            TableRow::Loop(0),
        ],
    ));
    song.sequences.push(Sequence::new(vec![
        Event::SetInstrument(0),
        Event::NoteOn(36),
        Event::Rest(2),
        Event::NoteOn(43),
        Event::NoteOff,
        Event::Rest(1),
    ]));
    for (voice, transpose) in [0, 7, 12].into_iter().enumerate() {
        song.order_lists[voice].entries = vec![OrderEntry::new(transpose, 0); 3];
    }

    let template = driver::minimal()?;
    let home = encode(&song, &template, &EncodeOptions::default())?;
    let moved = encode(
        &song,
        &template,
        &EncodeOptions {
            base: Some(0x4000),
            ..Default::default()
        },
    )?;
    assert_eq!(moved.base, 0x4000);
    assert_ne!(home.bytes, moved.bytes);

    let report = score(
        &home.container.program(),
        &moved.container.program(),
        200,
        &ConvertConfig::default(),
    )?;
    assert!(report.original_writes > 0);
    assert_relative_eq!(report.score, 100.0);
    Ok(())
}
