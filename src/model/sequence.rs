use serde::{Deserialize, Serialize};

use super::Provenance;

/// Effect command kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CommandKind {
    /// Raise frequency by `args` per frame.
    SlideUp,
    /// Lower frequency by `args` per frame.
    SlideDown,
    /// Frequency vibrato, `[speed, depth]`.
    Vibrato,
    /// Glide toward the next note at `args` per frame.
    Portamento,
    /// Overwrite the voice envelope, `[attack_decay, sustain_release]`.
    SetAdsr,
    /// Change frames per row, `[tempo, _]`.
    SetTempo,
    /// Change master volume, `[volume, _]`.
    SetVolume,
    /// Start the filter program at a row, `[row, _]`.
    FilterProgram,
}

impl CommandKind {
    /// Every kind, ordered by byte id.
    pub const ALL: [CommandKind; 8] = [
        CommandKind::SlideUp,
        CommandKind::SlideDown,
        CommandKind::Vibrato,
        CommandKind::Portamento,
        CommandKind::SetAdsr,
        CommandKind::SetTempo,
        CommandKind::SetVolume,
        CommandKind::FilterProgram,
    ];

    /// Byte id used by binary encodings.
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Kind for a byte id.
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }
}

/// An effect command with two argument bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Command {
    /// What the command does.
    pub kind: CommandKind,
    /// Arguments; meaning depends on `kind`.
    pub args: [u8; 2],
}

impl Command {
    /// Build a command.
    pub fn new(kind: CommandKind, args: [u8; 2]) -> Self {
        Self { kind, args }
    }
}

/// One sequence event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Event {
    /// Start a note (0..=95); one row.
    NoteOn(u8),
    /// Release the gate; one row.
    NoteOff,
    /// Next `NoteOn` changes pitch without retriggering.
    Tie,
    /// Select the instrument for following notes.
    SetInstrument(u8),
    /// Run an effect command.
    SetCommand(Command),
    /// Wait this many rows (1..=255).
    Rest(u8),
}

impl Event {
    /// Rows this event occupies.
    pub fn rows(&self) -> usize {
        match self {
            Event::NoteOn(_) | Event::NoteOff => 1,
            Event::Rest(n) => *n as usize,
            Event::Tie | Event::SetInstrument(_) | Event::SetCommand(_) => 0,
        }
    }
}

/// A run of events played by one voice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    /// Events in play order.
    pub events: Vec<Event>,
    /// Origin of the events.
    pub provenance: Provenance,
}

impl Sequence {
    /// Statically sourced sequence.
    pub fn new(events: Vec<Event>) -> Self {
        Self {
            events,
            provenance: Provenance::Static,
        }
    }

    /// Rows the sequence lasts.
    pub fn row_count(&self) -> usize {
        self.events.iter().map(Event::rows).sum()
    }

    /// Pitches of all `NoteOn` events.
    pub fn pitches(&self) -> impl Iterator<Item = u8> + '_ {
        self.events.iter().filter_map(|e| match e {
            Event::NoteOn(p) => Some(*p),
            _ => None,
        })
    }
}
