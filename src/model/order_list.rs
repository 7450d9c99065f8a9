use serde::{Deserialize, Serialize};

/// Sequence reference with a per-entry transpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderEntry {
    /// Semitones added to every note of the sequence.
    pub transpose: i8,
    /// Sequence index.
    pub sequence: u8,
}

impl OrderEntry {
    /// Build an entry.
    pub fn new(transpose: i8, sequence: u8) -> Self {
        Self {
            transpose,
            sequence,
        }
    }
}

/// What a voice does after its last entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OrderEnd {
    /// Continue at the given entry.
    Loop(u8),
    /// Silence the voice.
    #[default]
    Stop,
}

/// Playback order for one voice.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrderList {
    /// Entries in play order.
    pub entries: Vec<OrderEntry>,
    /// End behaviour.
    pub end: OrderEnd,
}

impl OrderList {
    /// Order list that stops after its entries.
    pub fn new(entries: Vec<OrderEntry>) -> Self {
        Self {
            entries,
            end: OrderEnd::Stop,
        }
    }

    /// Highest sequence index referenced.
    pub fn max_sequence(&self) -> Option<u8> {
        self.entries.iter().map(|e| e.sequence).max()
    }
}
