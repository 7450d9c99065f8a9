//! SID register definitions and the register bank.
//!
//! The SID occupies 29 registers at `$D400`, mirrored every 32 bytes through
//! `$D7FF`. Only the 25 write-only registers are tracked; the read-only
//! registers `$19-$1C` (paddles, OSC3, ENV3) always read back as zero so
//! emulation stays deterministic.

use std::fmt;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

/// First address of the SID window.
pub const SID_BASE: u16 = 0xD400;

/// Last address of the (mirrored) SID window.
pub const SID_END: u16 = 0xD7FF;

/// Number of writable SID registers.
pub const SID_REGISTER_COUNT: usize = 25;

/// Number of voices.
pub const VOICE_COUNT: usize = 3;

/// Register offset of each voice's first register.
pub const VOICE_OFFSETS: [u8; VOICE_COUNT] = [0, 7, 14];

/// PAL system clock in Hz.
pub const PAL_CLOCK_HZ: f64 = 985_248.0;

/// Number of pitches in the note range (C-0 .. B-7).
pub const NOTE_COUNT: u8 = 96;

/// Gate bit in a voice control register.
pub const GATE: u8 = 0x01;

/// Writable SID register, numbered by its offset from `$D400`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, FromPrimitive, Serialize, Deserialize,
)]
#[allow(missing_docs)]
pub enum SidRegister {
    Voice0FreqLo = 0x00,
    Voice0FreqHi = 0x01,
    Voice0PwLo = 0x02,
    Voice0PwHi = 0x03,
    Voice0Control = 0x04,
    Voice0AttackDecay = 0x05,
    Voice0SustainRelease = 0x06,
    Voice1FreqLo = 0x07,
    Voice1FreqHi = 0x08,
    Voice1PwLo = 0x09,
    Voice1PwHi = 0x0A,
    Voice1Control = 0x0B,
    Voice1AttackDecay = 0x0C,
    Voice1SustainRelease = 0x0D,
    Voice2FreqLo = 0x0E,
    Voice2FreqHi = 0x0F,
    Voice2PwLo = 0x10,
    Voice2PwHi = 0x11,
    Voice2Control = 0x12,
    Voice2AttackDecay = 0x13,
    Voice2SustainRelease = 0x14,
    FilterCutoffLo = 0x15,
    FilterCutoffHi = 0x16,
    ResonanceRouting = 0x17,
    ModeVolume = 0x18,
}

/// Per-voice register, relative to the voice base offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
#[allow(missing_docs)]
pub enum VoiceRegister {
    FreqLo = 0,
    FreqHi = 1,
    PwLo = 2,
    PwHi = 3,
    Control = 4,
    AttackDecay = 5,
    SustainRelease = 6,
}

impl SidRegister {
    /// Map a register offset (already mirrored into `0x00..0x20`).
    pub fn from_offset(offset: u8) -> Option<Self> {
        Self::from_u8(offset & 0x1F)
    }

    /// Map a CPU address inside the SID window.
    pub fn from_address(address: u16) -> Option<Self> {
        if !(SID_BASE..=SID_END).contains(&address) {
            return None;
        }
        Self::from_offset((address & 0x1F) as u8)
    }

    /// Register for `reg` of voice `voice` (0..3).
    pub fn voice(voice: usize, reg: VoiceRegister) -> Self {
        let offset = VOICE_OFFSETS[voice % VOICE_COUNT] + reg as u8;
        // Every voice offset plus a voice register is a valid register.
        Self::from_offset(offset).unwrap_or(SidRegister::Voice0FreqLo)
    }

    /// Register offset from `$D400`.
    pub fn offset(self) -> u8 {
        self as u8
    }

    /// Index into a `[u8; 25]` register snapshot.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Voice this register belongs to, `None` for filter/volume registers.
    pub fn voice_index(self) -> Option<usize> {
        match self.offset() {
            0..=6 => Some(0),
            7..=13 => Some(1),
            14..=20 => Some(2),
            _ => None,
        }
    }

    /// Whether this is one of the four filter/volume registers.
    pub fn is_filter(self) -> bool {
        self.voice_index().is_none()
    }

    /// All writable registers in offset order.
    pub fn all() -> impl Iterator<Item = SidRegister> {
        (0..SID_REGISTER_COUNT as u8).filter_map(SidRegister::from_offset)
    }
}

impl fmt::Display for SidRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ($D4{:02X})", self, self.offset())
    }
}

/// Raw register bank holding the last value written to each register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SidBank {
    /// Register values `$00-$18`.
    pub registers: [u8; SID_REGISTER_COUNT],
}

impl SidBank {
    /// Bank with all registers cleared.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read through the mirrored offset; read-only registers return zero.
    pub fn read(&self, offset: u8) -> u8 {
        match SidRegister::from_offset(offset) {
            Some(reg) => self.registers[reg.index()],
            None => 0,
        }
    }

    /// Write through the mirrored offset. Returns the register that changed,
    /// or `None` for writes to read-only/unmapped offsets.
    pub fn write(&mut self, offset: u8, value: u8) -> Option<SidRegister> {
        let reg = SidRegister::from_offset(offset)?;
        self.registers[reg.index()] = value;
        Some(reg)
    }

    /// Current value of a register.
    pub fn get(&self, reg: SidRegister) -> u8 {
        self.registers[reg.index()]
    }

    /// Copy of all register values.
    pub fn snapshot(&self) -> [u8; SID_REGISTER_COUNT] {
        self.registers
    }

    /// Combined 16-bit frequency of a voice.
    pub fn voice_frequency(&self, voice: usize) -> u16 {
        let lo = self.get(SidRegister::voice(voice, VoiceRegister::FreqLo)) as u16;
        let hi = self.get(SidRegister::voice(voice, VoiceRegister::FreqHi)) as u16;
        (hi << 8) | lo
    }
}

/// SID frequency register value for `note` (0 = C-0, 57 = A-4 at 440 Hz) on a
/// PAL machine. B-7 saturates at `$FFFF`.
pub fn note_frequency(note: u8) -> u16 {
    let hz = 440.0 * 2f64.powf((note as f64 - 57.0) / 12.0);
    let value = (hz * 16_777_216.0 / PAL_CLOCK_HZ).round();
    value.min(u16::MAX as f64) as u16
}

/// Nearest note for a frequency register value, `None` for silence (0).
pub fn nearest_note(frequency: u16) -> Option<u8> {
    if frequency == 0 {
        return None;
    }
    let target = frequency as i32;
    (0..NOTE_COUNT).min_by_key(|&note| (note_frequency(note) as i32 - target).abs())
}
