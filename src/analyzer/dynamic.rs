//! Song reconstruction from an emulated register trace.
//!
//! The trace is reduced to end-of-frame register states plus in-frame gate
//! and envelope writes. Note boundaries come from gate edges, the row length
//! from the frame grid the boundaries sit on, and instruments from the
//! per-frame control/pitch/pulse patterns that follow each note start.

use std::collections::HashMap;

use log::{debug, warn};
use sidconv_emu::sid::{GATE, VOICE_COUNT};
use sidconv_emu::{nearest_note, FrameTrace, SidRegister, VoiceRegister, SID_REGISTER_COUNT};

use crate::config::AnalysisConfig;
use crate::error::{ConvertError, Result};
use crate::model::{
    Command, CommandKind, Event, Instrument, OrderEntry, OrderList, Provenance, Sequence, Song,
    Table, TableKind, TableRow,
};

/// Frames observed after a note start to build its programs.
pub const OBSERVE_FRAMES: usize = 32;
/// Longest filter program, markers excluded.
pub const MAX_FILTER_ROWS: usize = 127;

type Snapshot = [u8; SID_REGISTER_COUNT];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    On,
    Off,
}

#[derive(Debug, Clone)]
struct Note {
    voice: usize,
    frame: usize,
    pitch: u8,
    shape: usize,
}

/// What a note start looks like: envelope plus the per-frame patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Shape {
    attack_decay: u8,
    sustain_release: u8,
    hard_restart: bool,
    wave: Vec<(u8, u8)>,
    pulse: Option<Vec<(u8, u8)>>,
}

fn prefix_compatible<T: PartialEq>(a: &[T], b: &[T]) -> bool {
    let n = a.len().min(b.len());
    a[..n] == b[..n]
}

impl Shape {
    fn merges_with(&self, other: &Shape) -> bool {
        self.attack_decay == other.attack_decay
            && self.sustain_release == other.sustain_release
            && self.hard_restart == other.hard_restart
            && prefix_compatible(&self.wave, &other.wave)
            && match (&self.pulse, &other.pulse) {
                (None, None) => true,
                (Some(a), Some(b)) => prefix_compatible(a, b),
                _ => false,
            }
    }

    fn absorb(&mut self, other: Shape) {
        if other.wave.len() > self.wave.len() {
            self.wave = other.wave;
        }
        if let (Some(mine), Some(theirs)) = (&mut self.pulse, other.pulse) {
            if theirs.len() > mine.len() {
                *mine = theirs;
            }
        }
    }
}

/// Shortest description of `values` as a prefix plus a repeating tail.
///
/// Returns `(len, loop_start)`: emit `values[..len]`, then `Loop(start)` when
/// `loop_start` is set, otherwise an end row that holds the last value.
pub fn collapse<T: PartialEq>(values: &[T]) -> (usize, Option<usize>) {
    let n = values.len();
    if n == 0 {
        return (0, None);
    }
    let mut best = (n, None);
    for period in 1..n {
        let start = (period..n)
            .rev()
            .find(|&i| values[i] != values[i - period])
            .map_or(0, |i| i + 1 - period);
        if period > 1 && n - start < 2 * period {
            continue;
        }
        let len = start + period;
        let candidate = if period == 1 {
            (start + 1, None)
        } else {
            (len, Some(start))
        };
        if candidate.0 < best.0 {
            best = candidate;
        }
    }
    best
}

fn program<T: Clone + PartialEq>(values: &[T], step: impl Fn(&T) -> Vec<u8>) -> Vec<TableRow> {
    let (len, loop_start) = collapse(values);
    let mut rows: Vec<TableRow> = values[..len].iter().map(|v| TableRow::Step(step(v))).collect();
    rows.push(match loop_start {
        Some(start) => TableRow::Loop(start as u8),
        None => TableRow::End,
    });
    rows
}

/// Pulse program: per-frame values run-length coded into `(hi, lo, hold)`.
fn pulse_program(values: &[(u8, u8)]) -> Vec<TableRow> {
    let (len, loop_start) = collapse(values);
    let mut rows = Vec::new();
    let mut loop_row = None;
    let mut i = 0;
    while i < len {
        if Some(i) == loop_start {
            loop_row = Some(rows.len());
        }
        let value = values[i];
        let mut run = 1;
        while i + run < len
            && values[i + run] == value
            && run < 255
            && Some(i + run) != loop_start
        {
            run += 1;
        }
        rows.push(TableRow::Step(vec![value.0, value.1, run as u8]));
        i += run;
    }
    rows.push(match loop_row {
        Some(row) => TableRow::Loop(row as u8),
        None => TableRow::End,
    });
    rows
}

fn control(snapshot: &Snapshot, voice: usize) -> u8 {
    snapshot[SidRegister::voice(voice, VoiceRegister::Control).index()]
}

fn frequency(snapshot: &Snapshot, voice: usize) -> u16 {
    u16::from_le_bytes([
        snapshot[SidRegister::voice(voice, VoiceRegister::FreqLo).index()],
        snapshot[SidRegister::voice(voice, VoiceRegister::FreqHi).index()],
    ])
}

fn pulse(snapshot: &Snapshot, voice: usize) -> (u8, u8) {
    (
        snapshot[SidRegister::voice(voice, VoiceRegister::PwHi).index()] & 0x0F,
        snapshot[SidRegister::voice(voice, VoiceRegister::PwLo).index()],
    )
}

/// Gate marks of one voice, by frame.
fn marks(trace: &FrameTrace, states: &[Snapshot], voice: usize) -> Vec<(usize, Mark)> {
    let ctrl = SidRegister::voice(voice, VoiceRegister::Control);
    let ad = SidRegister::voice(voice, VoiceRegister::AttackDecay);
    let sr = SidRegister::voice(voice, VoiceRegister::SustainRelease);
    let mut out = Vec::new();
    let mut previous = control(&trace.initial, voice) & GATE != 0;
    for (frame, state) in states.iter().enumerate() {
        let gate = control(state, voice) & GATE != 0;
        let mut saw_off = false;
        let mut retrigger = false;
        let mut envelope = false;
        for entry in trace.frame(frame as u32) {
            if entry.register == ctrl {
                if entry.value & GATE == 0 {
                    saw_off = true;
                } else if saw_off {
                    retrigger = true;
                }
            } else if entry.register == ad || entry.register == sr {
                envelope = true;
            }
        }
        if gate && (!previous || retrigger || envelope) {
            out.push((frame, Mark::On));
        } else if previous && !gate {
            out.push((frame, Mark::Off));
        }
        previous = gate;
    }
    out
}

fn hard_restart(trace: &FrameTrace, frame: usize, voice: usize) -> bool {
    let ad = SidRegister::voice(voice, VoiceRegister::AttackDecay);
    let writes: Vec<u8> = trace
        .frame(frame as u32)
        .iter()
        .filter(|e| e.register == ad)
        .map(|e| e.value)
        .collect();
    writes.len() > 1 && writes[0] == 0
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Frames per row: the largest divisor of the event grid within `max_tempo`.
pub fn row_length(frames: impl IntoIterator<Item = usize>, max_tempo: u8) -> u8 {
    let grid = frames.into_iter().fold(0, gcd);
    let max_tempo = max_tempo.max(1);
    if grid == 0 {
        return max_tempo;
    }
    (1..=max_tempo)
        .rev()
        .find(|d| grid % *d as usize == 0)
        .unwrap_or(1)
}

enum RowEvent {
    Note { pitch: u8, instrument: u8 },
    Off,
}

/// Build a song from `trace`.
pub fn reconstruct(trace: &FrameTrace, config: &AnalysisConfig) -> Result<Song> {
    let states = trace.snapshots();
    let frames = states.len();

    let marks: Vec<Vec<(usize, Mark)>> = (0..VOICE_COUNT)
        .map(|voice| marks(trace, &states, voice))
        .collect();
    if marks.iter().all(|m| !m.iter().any(|(_, mark)| *mark == Mark::On)) {
        return Err(ConvertError::IncompleteExtraction {
            reason: format!("no notes found in {frames} emulated frames"),
        });
    }
    let tempo = row_length(
        marks.iter().flatten().map(|(frame, _)| *frame),
        config.max_tempo,
    );
    let row_frames = tempo as usize;

    // Notes and their shapes.
    let mut shapes: Vec<Shape> = Vec::new();
    let mut notes: Vec<Note> = Vec::new();
    for (voice, voice_marks) in marks.iter().enumerate() {
        let onsets: Vec<usize> = voice_marks
            .iter()
            .filter(|(_, mark)| *mark == Mark::On)
            .map(|(frame, _)| *frame)
            .collect();
        let pw_hi = SidRegister::voice(voice, VoiceRegister::PwHi);
        let pw_lo = SidRegister::voice(voice, VoiceRegister::PwLo);
        for (n, &frame) in onsets.iter().enumerate() {
            let end = onsets
                .get(n + 1)
                .copied()
                .unwrap_or(frames)
                .min(frame + OBSERVE_FRAMES)
                .min(frames);
            let state = &states[frame];
            let pitch = nearest_note(frequency(state, voice)).unwrap_or(0);
            let wave = states[frame..end]
                .iter()
                .map(|s| {
                    let note = nearest_note(frequency(s, voice)).unwrap_or(pitch);
                    (control(s, voice) & !GATE, note.wrapping_sub(pitch))
                })
                .collect();
            let pulse_written = (frame..end).any(|f| {
                trace
                    .frame(f as u32)
                    .iter()
                    .any(|e| e.register == pw_hi || e.register == pw_lo)
            });
            let shape = Shape {
                attack_decay: state[SidRegister::voice(voice, VoiceRegister::AttackDecay).index()],
                sustain_release: state
                    [SidRegister::voice(voice, VoiceRegister::SustainRelease).index()],
                hard_restart: hard_restart(trace, frame, voice),
                wave,
                pulse: pulse_written
                    .then(|| states[frame..end].iter().map(|s| pulse(s, voice)).collect()),
            };
            let index = match shapes.iter().position(|s| s.merges_with(&shape)) {
                Some(index) => {
                    shapes[index].absorb(shape);
                    index
                }
                None => {
                    shapes.push(shape);
                    shapes.len() - 1
                }
            };
            if frame % row_frames != 0 {
                warn!("voice {voice} note at frame {frame} is off the {tempo}-frame row grid");
            }
            notes.push(Note {
                voice,
                frame,
                pitch,
                shape: index,
            });
        }
    }
    if shapes.len() > u8::MAX as usize {
        return Err(ConvertError::IncompleteExtraction {
            reason: format!("{} distinct instruments", shapes.len()),
        });
    }

    let mut song = Song::new(tempo);
    song.instrument_provenance = Provenance::Dynamic;

    // Tables and instruments.
    let mut wave = Table::new(TableKind::Wave, Vec::new());
    let mut pulse_table = Table::new(TableKind::Pulse, Vec::new());
    let mut wave_programs: HashMap<Vec<TableRow>, u8> = HashMap::new();
    let mut pulse_programs: HashMap<Vec<TableRow>, u8> = HashMap::new();
    for shape in &shapes {
        let rows = program(&shape.wave, |(ctrl, offset)| vec![*ctrl, *offset]);
        let wave_start = match wave_programs.get(&rows) {
            Some(start) => *start,
            None => {
                let start = wave.append_program(&rows)?;
                wave_programs.insert(rows, start);
                start
            }
        };
        let mut instrument = Instrument::new(shape.attack_decay, shape.sustain_release, wave_start);
        instrument.hard_restart = shape.hard_restart;
        if let Some(values) = &shape.pulse {
            let rows = pulse_program(values);
            let start = match pulse_programs.get(&rows) {
                Some(start) => *start,
                None => {
                    let start = pulse_table.append_program(&rows)?;
                    pulse_programs.insert(rows, start);
                    start
                }
            };
            instrument.pulse = Some(start);
        }
        song.instruments.push(instrument);
    }
    for mut table in [wave, pulse_table] {
        if !table.rows.is_empty() {
            table.provenance = Provenance::Dynamic;
            song.tables.push(table);
        }
    }

    // Filter program, started on a row boundary.
    let rows_total = (frames + row_frames - 1) / row_frames;
    let mut voice0_commands: Vec<Vec<Command>> = vec![Vec::new(); rows_total];
    let first_filter_write = trace
        .entries
        .iter()
        .find(|e| e.register.is_filter())
        .map(|e| e.frame as usize);
    let filter_initial = trace.initial[SidRegister::FilterCutoffLo.index()..].iter().any(|v| *v != 0);
    let filter_start = first_filter_write
        .or(filter_initial.then_some(0))
        .filter(|start| *start < frames);
    if let Some(start) = filter_start {
        let start = start / row_frames * row_frames;
        let values: Vec<[u8; 4]> = states[start..]
            .iter()
            .map(|s| {
                let mut v = [0u8; 4];
                v.copy_from_slice(&s[SidRegister::FilterCutoffLo.index()..]);
                v
            })
            .collect();
        let mut rows = program(&values, |v| v.to_vec());
        if rows.len() > MAX_FILTER_ROWS + 1 {
            warn!("filter program cut to {MAX_FILTER_ROWS} rows");
            rows.truncate(MAX_FILTER_ROWS);
            rows.push(TableRow::End);
        }
        let mut table = Table::new(TableKind::Filter, rows);
        table.provenance = Provenance::Dynamic;
        song.tables.push(table);
        song.tables.sort_by_key(|t| t.kind);
        if let Some(commands) = voice0_commands.get_mut(start / row_frames) {
            commands.push(Command::new(CommandKind::FilterProgram, [0, 0]));
        }
    }

    // Row grid per voice.
    let mut grids: Vec<Vec<Option<RowEvent>>> = (0..VOICE_COUNT)
        .map(|_| (0..rows_total).map(|_| None).collect())
        .collect();
    for (voice, voice_marks) in marks.iter().enumerate() {
        for (frame, mark) in voice_marks {
            if *mark == Mark::Off {
                let row = frame / row_frames;
                if grids[voice][row].is_none() {
                    grids[voice][row] = Some(RowEvent::Off);
                }
            }
        }
    }
    for note in &notes {
        grids[note.voice][note.frame / row_frames] = Some(RowEvent::Note {
            pitch: note.pitch,
            instrument: note.shape as u8,
        });
    }

    // Chunk into sequences, folding transposed repeats together.
    let chunk_rows = config.rows_per_sequence.max(1);
    for (voice, grid) in grids.iter().enumerate() {
        let mut entries = Vec::new();
        let mut instrument = notes
            .iter()
            .find(|n| n.voice == voice)
            .map(|n| n.shape as u8);
        for chunk_start in (0..rows_total).step_by(chunk_rows) {
            let chunk_end = (chunk_start + chunk_rows).min(rows_total);
            let mut events = Vec::new();
            if let Some(id) = instrument {
                events.push(Event::SetInstrument(id));
            }
            let mut rest = 0u32;
            let flush = |events: &mut Vec<Event>, rest: &mut u32| {
                while *rest > 0 {
                    let rows = (*rest).min(255);
                    events.push(Event::Rest(rows as u8));
                    *rest -= rows;
                }
            };
            for row in chunk_start..chunk_end {
                let commands: &[Command] = if voice == 0 {
                    voice0_commands[row].as_slice()
                } else {
                    &[]
                };
                if !commands.is_empty() {
                    flush(&mut events, &mut rest);
                    events.extend(commands.iter().map(|c| Event::SetCommand(*c)));
                }
                match &grid[row] {
                    Some(RowEvent::Note {
                        pitch,
                        instrument: id,
                    }) => {
                        flush(&mut events, &mut rest);
                        if instrument != Some(*id) {
                            events.push(Event::SetInstrument(*id));
                            instrument = Some(*id);
                        }
                        events.push(Event::NoteOn(*pitch));
                    }
                    Some(RowEvent::Off) => {
                        flush(&mut events, &mut rest);
                        events.push(Event::NoteOff);
                    }
                    None => rest += 1,
                }
            }
            flush(&mut events, &mut rest);

            let base = events
                .iter()
                .filter_map(|e| match e {
                    Event::NoteOn(p) => Some(*p),
                    _ => None,
                })
                .min()
                .unwrap_or(0);
            for ev in &mut events {
                if let Event::NoteOn(p) = ev {
                    *p -= base;
                }
            }
            let sequence = match song.sequences.iter().position(|s| s.events == events) {
                Some(index) => index,
                None => {
                    let mut sequence = Sequence::new(events);
                    sequence.provenance = Provenance::Dynamic;
                    song.sequences.push(sequence);
                    song.sequences.len() - 1
                }
            };
            entries.push(OrderEntry::new(base as i8, sequence as u8));
        }
        song.order_lists[voice] = OrderList::new(entries);
    }
    if song.sequences.len() > u8::MAX as usize {
        return Err(ConvertError::IncompleteExtraction {
            reason: format!("{} distinct sequences", song.sequences.len()),
        });
    }

    debug!(
        "reconstructed {} notes, {} instruments, {} sequences at {tempo} frames per row",
        notes.len(),
        song.instruments.len(),
        song.sequences.len()
    );
    Ok(song)
}
