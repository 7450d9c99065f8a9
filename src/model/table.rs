use std::fmt;

use serde::{Deserialize, Serialize};

use super::{ModelError, Provenance};

/// Rows a one-byte table index can reach.
pub const MAX_ROWS: usize = 256;

/// Kind of instrument program table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    /// `[waveform, note_offset]` per frame.
    Wave,
    /// `[pulse_hi, pulse_lo, hold_frames]`.
    Pulse,
    /// `[cutoff_lo, cutoff_hi, resonance_routing, mode_volume]` per frame.
    Filter,
    /// `[semitones]`.
    Arpeggio,
}

impl TableKind {
    /// Every kind, in canonical order.
    pub const ALL: [TableKind; 4] = [
        TableKind::Wave,
        TableKind::Pulse,
        TableKind::Filter,
        TableKind::Arpeggio,
    ];

    /// Number of bytes in a step row.
    pub fn width(self) -> usize {
        match self {
            TableKind::Wave => 2,
            TableKind::Pulse => 3,
            TableKind::Filter => 4,
            TableKind::Arpeggio => 1,
        }
    }

    /// Lowercase name used in messages and manifests.
    pub fn name(self) -> &'static str {
        match self {
            TableKind::Wave => "wave",
            TableKind::Pulse => "pulse",
            TableKind::Filter => "filter",
            TableKind::Arpeggio => "arpeggio",
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One table row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableRow {
    /// Data row; its width must match the table kind.
    Step(Vec<u8>),
    /// Continue at the given row.
    Loop(u8),
    /// Stop advancing; the last step stays in effect.
    End,
}

/// A program table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    /// Table kind.
    pub kind: TableKind,
    /// Rows, markers included.
    pub rows: Vec<TableRow>,
    /// Origin of the rows.
    pub provenance: Provenance,
}

impl Table {
    /// Statically sourced table.
    pub fn new(kind: TableKind, rows: Vec<TableRow>) -> Self {
        Self {
            kind,
            rows,
            provenance: Provenance::Static,
        }
    }

    /// Number of data rows.
    pub fn step_count(&self) -> usize {
        self.rows
            .iter()
            .filter(|r| matches!(r, TableRow::Step(_)))
            .count()
    }

    /// Append a program whose `Loop` targets are relative to its own start.
    ///
    /// Fails without touching the table when a row of the program would
    /// land past index 255.
    pub fn append_program(&mut self, rows: &[TableRow]) -> Result<u8, ModelError> {
        let overflow = || ModelError::TableOverflow {
            kind: self.kind,
            rows: self.rows.len() + rows.len(),
        };
        let start = u8::try_from(self.rows.len()).map_err(|_| overflow())?;
        if self.rows.len() + rows.len() > MAX_ROWS {
            return Err(overflow());
        }
        let shifted = rows
            .iter()
            .map(|row| match row {
                TableRow::Loop(target) => target
                    .checked_add(start)
                    .map(TableRow::Loop)
                    .ok_or_else(overflow),
                other => Ok(other.clone()),
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.rows.extend(shifted);
        Ok(start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appended_programs_shift_loop_targets() {
        let mut table = Table::new(TableKind::Wave, vec![TableRow::Step(vec![0x41, 0]), TableRow::End]);
        let at = table.append_program(&[
            TableRow::Step(vec![0x81, 0]),
            TableRow::Step(vec![0x41, 12]),
            TableRow::Loop(1),
        ]).unwrap();
        assert_eq!(at, 2);
        assert_eq!(table.rows[4], TableRow::Loop(3));
        assert_eq!(table.step_count(), 3);
    }

    #[test]
    fn programs_past_the_index_range_are_refused() {
        let mut table = Table::new(
            TableKind::Pulse,
            (0..250).map(|_| TableRow::Step(vec![8, 0, 1])).collect(),
        );
        let program = [
            TableRow::Step(vec![8, 0, 1]),
            TableRow::Step(vec![6, 0, 1]),
            TableRow::Step(vec![4, 0, 1]),
            TableRow::Step(vec![2, 0, 1]),
            TableRow::Step(vec![1, 0, 1]),
            TableRow::Loop(0),
        ];
        assert_eq!(table.append_program(&program), Ok(250));
        assert_eq!(table.rows[255], TableRow::Loop(250));
        assert_eq!(
            table.append_program(&program),
            Err(ModelError::TableOverflow {
                kind: TableKind::Pulse,
                rows: 262
            })
        );
        assert_eq!(table.rows.len(), MAX_ROWS);
    }
}
