//! Recorded SID register writes, grouped by frame.

use serde::{Deserialize, Serialize};

use crate::sid::{SidRegister, SID_REGISTER_COUNT};

/// One SID register write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Frame the write happened in.
    pub frame: u32,
    /// Cycle within the frame; resets to 0 at every frame start.
    pub cycle_offset: u32,
    /// Register written (after mirroring).
    pub register: SidRegister,
    /// Value written.
    pub value: u8,
}

/// Ordered log of SID writes for a run of frames.
///
/// `initial` holds the register state left behind by the init routine; init
/// writes themselves are not entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameTrace {
    /// Number of frames recorded.
    pub frames: u32,
    /// Register state before frame 0.
    pub initial: [u8; SID_REGISTER_COUNT],
    /// Writes ordered by `(frame, cycle_offset)`.
    pub entries: Vec<TraceEntry>,
}

impl FrameTrace {
    /// Empty trace starting from `initial`.
    pub fn new(initial: [u8; SID_REGISTER_COUNT]) -> Self {
        Self {
            frames: 0,
            initial,
            entries: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, entry: TraceEntry) {
        debug_assert!(self
            .entries
            .last()
            .map_or(true, |last| (last.frame, last.cycle_offset)
                <= (entry.frame, entry.cycle_offset)));
        self.entries.push(entry);
    }

    /// Writes made during frame `n`.
    pub fn frame(&self, n: u32) -> &[TraceEntry] {
        let start = self.entries.partition_point(|e| e.frame < n);
        let end = self.entries.partition_point(|e| e.frame <= n);
        &self.entries[start..end]
    }

    /// End-of-frame register state for every recorded frame.
    pub fn snapshots(&self) -> Vec<[u8; SID_REGISTER_COUNT]> {
        let mut state = self.initial;
        let mut out = Vec::with_capacity(self.frames as usize);
        let mut entries = self.entries.iter().peekable();
        for frame in 0..self.frames {
            while let Some(entry) = entries.next_if(|e| e.frame == frame) {
                state[entry.register.index()] = entry.value;
            }
            out.push(state);
        }
        out
    }

    /// Number of writes to `register` across the whole trace.
    pub fn write_count(&self, register: SidRegister) -> usize {
        self.entries.iter().filter(|e| e.register == register).count()
    }

    /// Export the trace as CSV (`frame,cycle,register,value`).
    #[cfg(feature = "trace-csv")]
    pub fn write_csv<W: std::io::Write>(&self, writer: W) -> csv::Result<()> {
        let mut out = csv::Writer::from_writer(writer);
        out.write_record(["frame", "cycle", "register", "value"])?;
        for entry in &self.entries {
            out.write_record([
                entry.frame.to_string(),
                entry.cycle_offset.to_string(),
                format!("{:?}", entry.register),
                format!("${:02X}", entry.value),
            ])?;
        }
        out.flush()?;
        Ok(())
    }
}
