use serde::{Deserialize, Serialize};

/// A SID sound: envelope plus entry points into the wave, pulse and filter
/// tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    /// Attack (high nibble) and decay (low nibble).
    pub attack_decay: u8,
    /// Sustain (high nibble) and release (low nibble).
    pub sustain_release: u8,
    /// Start row in the wave table.
    pub wave: u8,
    /// Start row in the pulse table, if the instrument has a pulse program.
    pub pulse: Option<u8>,
    /// Start row in the filter table, if the instrument starts a filter program.
    pub filter: Option<u8>,
    /// Clear ADSR before each (re)trigger.
    pub hard_restart: bool,
}

impl Instrument {
    /// Instrument with only an envelope and a wave program.
    pub fn new(attack_decay: u8, sustain_release: u8, wave: u8) -> Self {
        Self {
            attack_decay,
            sustain_release,
            wave,
            pulse: None,
            filter: None,
            hard_restart: false,
        }
    }
}
