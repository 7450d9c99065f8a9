//! Source analysis: from a player binary to a [`Song`].
//!
//! A [`SourceProfile`] selects the path:
//! - `Native`: decode a container written by the encoder
//! - `RangeCoded`: read tables at the locations the profile describes, then
//!   complete anything the tables reference past their ends
//! - dynamic: emulate the player and rebuild the song from its SID writes
//!
//! Static data wins when it is complete. Gaps are filled from the emulated
//! reconstruction, or from raw memory past the table terminator when no
//! emulation data is available; each fill is reported as a degradation.

pub mod dynamic;
pub mod identify;
pub mod native;
pub mod profile;
pub mod static_scan;

use std::collections::HashMap;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sidconv_emu::{CancelToken, EmulationSession, FrameTrace};

pub use identify::{PlayerIdentifier, PlayerTypeLabel, SignatureIdentifier};
pub use profile::{Decoder, ProfileRegistry, RangeCodedLayout, SourceProfile};

use crate::config::ConvertConfig;
use crate::encoder::Template;
use crate::error::{ConvertError, Degradation, DegradationKind, Result};
use crate::model::{
    CommandKind, Event, Instrument, Provenance, Song, Table, TableKind, TableRow,
};
use crate::source::Source;
use static_scan::{RecordBlock, Scanner, StaticExtraction};

/// Where the parts of an analyzed song came from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProvenanceSummary {
    /// Instrument list.
    pub instruments: Provenance,
    /// Each table present.
    pub tables: Vec<(TableKind, Provenance)>,
    /// Sequences read from data.
    pub static_sequences: usize,
    /// Sequences rebuilt from emulation.
    pub dynamic_sequences: usize,
    /// Sequences combining both.
    pub merged_sequences: usize,
}

impl ProvenanceSummary {
    /// Summarize `song`.
    pub fn of(song: &Song) -> Self {
        let count = |p: Provenance| song.sequences.iter().filter(|s| s.provenance == p).count();
        Self {
            instruments: song.instrument_provenance,
            tables: song.tables.iter().map(|t| (t.kind, t.provenance)).collect(),
            static_sequences: count(Provenance::Static),
            dynamic_sequences: count(Provenance::Dynamic),
            merged_sequences: count(Provenance::Merged),
        }
    }
}

/// Analysis result before encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisDraft {
    /// The recovered song; it passes [`Song::validate`].
    pub song: Song,
    /// Non-fatal problems met on the way.
    pub degradations: Vec<Degradation>,
    /// Origin summary.
    pub provenance: ProvenanceSummary,
}

/// Reject combinations that cannot convert, before any extraction.
pub fn precheck(source: &Source, profile: &SourceProfile, template: &Template) -> Result<()> {
    let incompatible = |reason: String| Err(ConvertError::FormatIncompatible { reason });
    if source.sid_count > 1 {
        return incompatible(format!(
            "source drives {} SID chips, '{}' drives one",
            source.sid_count, template.name
        ));
    }
    if !template.accepts(&profile.family) {
        return incompatible(format!(
            "template '{}' does not accept '{}' sources",
            template.name, profile.family
        ));
    }
    if !profile.is_static() && !profile.dynamic {
        return incompatible(format!(
            "profile '{}' has neither a decoder nor emulation",
            profile.name
        ));
    }
    if profile.decoder == Decoder::Native && source.container().is_none() {
        return incompatible(format!("profile '{}' needs a container source", profile.name));
    }
    Ok(())
}

/// Analyze `source` with `profile`.
pub fn analyze(source: &Source, profile: &SourceProfile, config: &ConvertConfig) -> Result<AnalysisDraft> {
    analyze_with(source, profile, config, &CancelToken::new())
}

/// [`analyze`] with a cancellation token for the emulation runs.
pub fn analyze_with(
    source: &Source,
    profile: &SourceProfile,
    config: &ConvertConfig,
    cancel: &CancelToken,
) -> Result<AnalysisDraft> {
    let mut degradations = Vec::new();
    let mut song = match &profile.decoder {
        Decoder::Native => {
            let container = source.container().ok_or_else(|| ConvertError::FormatIncompatible {
                reason: format!("profile '{}' needs a container source", profile.name),
            })?;
            native::decode(container)?
        }
        Decoder::RangeCoded(layout) => {
            range_coded(source, profile, layout, config, cancel, &mut degradations)?
        }
        Decoder::None if profile.dynamic => {
            let trace = trace(source, config, cancel)?;
            dynamic::reconstruct(&trace, &config.analysis)?
        }
        Decoder::None => {
            return Err(ConvertError::FormatIncompatible {
                reason: format!("profile '{}' has neither a decoder nor emulation", profile.name),
            })
        }
    };

    if song.title.is_empty() {
        song.title = source.title.clone();
    }
    if song.author.is_empty() {
        song.author = source.author.clone();
    }
    if song.released.is_empty() {
        song.released = source.released.clone();
    }
    check(&song)?;

    let provenance = ProvenanceSummary::of(&song);
    info!(
        "analyzed '{}' with profile '{}': {} instruments, {} sequences, {} degradation(s)",
        song.title,
        profile.name,
        song.instruments.len(),
        song.sequences.len(),
        degradations.len()
    );
    Ok(AnalysisDraft {
        song,
        degradations,
        provenance,
    })
}

/// Every invariant violation of an analyzed song, as one error.
fn check(song: &Song) -> Result<()> {
    let errors = song.validate();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConvertError::MalformedModel { errors })
    }
}

fn trace(source: &Source, config: &ConvertConfig, cancel: &CancelToken) -> Result<FrameTrace> {
    let mut session = EmulationSession::new(config.emulation.clone()).with_cancel(cancel.clone());
    session.load_program(&source.program)?;
    session.run_frames(config.analysis.dynamic_frames)?;
    Ok(session.finish())
}

/// Emulation-based song, if the profile allows it and emulation works.
fn dynamic_song(
    source: &Source,
    profile: &SourceProfile,
    config: &ConvertConfig,
    cancel: &CancelToken,
    degradations: &mut Vec<Degradation>,
) -> Result<Option<Song>> {
    if !profile.dynamic {
        return Ok(None);
    }
    let trace = match trace(source, config, cancel) {
        Ok(trace) => trace,
        Err(ConvertError::Emulation(e)) if e.is_recoverable() => {
            warn!("emulation failed, continuing with static data only: {e}");
            degradations.push(Degradation::new(
                DegradationKind::EmulationFallback,
                format!("emulation failed: {e}"),
            ));
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    match dynamic::reconstruct(&trace, &config.analysis) {
        Ok(song) => Ok(Some(song)),
        Err(e) => {
            debug!("no dynamic reconstruction: {e}");
            Ok(None)
        }
    }
}

fn range_coded(
    source: &Source,
    profile: &SourceProfile,
    layout: &RangeCodedLayout,
    config: &ConvertConfig,
    cancel: &CancelToken,
    degradations: &mut Vec<Degradation>,
) -> Result<Song> {
    let image = source.image()?;
    let scanner = Scanner::new(&image, source.program.load_address, source.data().len());
    match static_scan::extract(&scanner, layout) {
        Ok(extraction) => {
            let gaps = has_gaps(&extraction.song);
            let dynamic = if gaps {
                dynamic_song(source, profile, config, cancel, degradations)?
            } else {
                None
            };
            let mut merge = Merge {
                scanner: &scanner,
                layout,
                dynamic: dynamic.as_ref(),
                degradations,
            };
            merge.complete(extraction)
        }
        Err(e) => {
            warn!("static extraction with '{}' failed: {e}", profile.name);
            match dynamic_song(source, profile, config, cancel, degradations)? {
                Some(song) => {
                    degradations.push(Degradation::new(
                        DegradationKind::IncompleteExtraction,
                        format!("static extraction failed ({e}); song rebuilt from emulation"),
                    ));
                    Ok(song)
                }
                None => Err(ConvertError::IncompleteExtraction {
                    reason: format!("static extraction failed ({e}) and no emulation data"),
                }),
            }
        }
    }
}

/// Instruments referenced by sequences.
fn instrument_refs(song: &Song) -> impl Iterator<Item = usize> + '_ {
    song.sequences
        .iter()
        .flat_map(|s| s.events.iter())
        .filter_map(|e| match e {
            Event::SetInstrument(id) => Some(*id as usize),
            _ => None,
        })
}

/// Rows of a table kind referenced by instruments and commands.
fn table_refs(song: &Song, kind: TableKind) -> Vec<usize> {
    let mut refs: Vec<usize> = song
        .instruments
        .iter()
        .filter_map(|i| match kind {
            TableKind::Wave => Some(i.wave),
            TableKind::Pulse => i.pulse,
            TableKind::Filter => i.filter,
            TableKind::Arpeggio => None,
        })
        .map(usize::from)
        .collect();
    if kind == TableKind::Filter {
        refs.extend(
            song.sequences
                .iter()
                .flat_map(|s| s.events.iter())
                .filter_map(|e| match e {
                    Event::SetCommand(c) if c.kind == CommandKind::FilterProgram => {
                        Some(c.args[0] as usize)
                    }
                    _ => None,
                }),
        );
    }
    refs
}

fn has_gaps(song: &Song) -> bool {
    let instruments = song.instruments.len();
    instrument_refs(song).any(|i| i >= instruments)
        || TableKind::ALL.iter().any(|kind| {
            let len = song.table(*kind).map_or(0, |t| t.rows.len());
            table_refs(song, *kind).iter().any(|r| *r >= len)
        })
}

/// One program of `table`, from `start` through its first end or loop row,
/// with loop targets relative to `start`.
fn program_at(table: &Table, start: usize) -> Vec<TableRow> {
    let mut rows = Vec::new();
    for row in table.rows.iter().skip(start) {
        match row {
            TableRow::Step(_) => rows.push(row.clone()),
            TableRow::Loop(target) => {
                let target = (*target as usize).saturating_sub(start);
                rows.push(TableRow::Loop(target.min(rows.len().saturating_sub(1)) as u8));
                return rows;
            }
            TableRow::End => break,
        }
    }
    rows.push(TableRow::End);
    rows
}

fn table_index(song: &mut Song, kind: TableKind) -> usize {
    if song.table(kind).is_none() {
        song.tables.push(Table::new(kind, Vec::new()));
        song.tables.sort_by_key(|t| t.kind);
    }
    song.tables
        .iter()
        .position(|t| t.kind == kind)
        .unwrap_or_default()
}

/// Completes a static extraction.
struct Merge<'a, 'm> {
    scanner: &'a Scanner<'m>,
    layout: &'a RangeCodedLayout,
    dynamic: Option<&'a Song>,
    degradations: &'a mut Vec<Degradation>,
}

impl Merge<'_, '_> {
    fn complete(&mut self, extraction: StaticExtraction) -> Result<Song> {
        let StaticExtraction {
            mut song,
            tables,
            instruments,
        } = extraction;
        self.complete_instruments(&mut song, &instruments)?;
        for kind in TableKind::ALL {
            let block = tables.iter().find(|(k, _)| *k == kind).map(|(_, b)| b);
            self.complete_table(&mut song, kind, block)?;
        }
        Ok(song)
    }

    fn complete_instruments(&mut self, song: &mut Song, block: &RecordBlock) -> Result<()> {
        let have = song.instruments.len();
        let Some(needed) = instrument_refs(song).max().map(|m| m + 1).filter(|n| *n > have) else {
            return Ok(());
        };
        let origin = match self.dynamic.filter(|d| !d.instruments.is_empty()) {
            Some(dynamic) => {
                for index in have..needed {
                    let Some(pick) = dynamic
                        .instruments
                        .get(index)
                        .or_else(|| dynamic.instruments.last())
                        .copied()
                    else {
                        break;
                    };
                    let instrument = self.import_instrument(song, dynamic, pick)?;
                    song.instruments.push(instrument);
                }
                "emulation"
            }
            None => {
                let locator = &self.layout.instruments;
                for row in have..needed {
                    let record = self.scanner.record(
                        block.address,
                        locator.records.layout,
                        locator.records.columns,
                        row,
                    );
                    song.instruments.push(static_scan::instrument(locator, &record));
                }
                "raw memory"
            }
        };
        song.instrument_provenance = Provenance::Merged;
        self.report(format!(
            "instruments: {have} extracted, {needed} referenced; rest taken from {origin}"
        ));
        Ok(())
    }

    /// Copy the programs of a dynamic instrument into `song`'s tables.
    fn import_instrument(&mut self, song: &mut Song, dynamic: &Song, from: Instrument) -> Result<Instrument> {
        let mut copy = |kind: TableKind, start: Option<u8>| -> Result<Option<u8>> {
            let (Some(start), Some(source)) = (start, dynamic.table(kind)) else {
                return Ok(None);
            };
            let program = program_at(source, start as usize);
            let index = table_index(song, kind);
            let table = &mut song.tables[index];
            table.provenance = Provenance::Merged;
            Ok(Some(table.append_program(&program)?))
        };
        Ok(Instrument {
            wave: copy(TableKind::Wave, Some(from.wave))?.unwrap_or(0),
            pulse: copy(TableKind::Pulse, from.pulse)?,
            filter: copy(TableKind::Filter, from.filter)?,
            ..from
        })
    }

    fn complete_table(&mut self, song: &mut Song, kind: TableKind, block: Option<&RecordBlock>) -> Result<()> {
        let len = song.table(kind).map_or(0, |t| t.rows.len());
        let Some(max) = table_refs(song, kind).into_iter().filter(|r| *r >= len).max() else {
            return Ok(());
        };
        if let Some(source) = self.dynamic.and_then(|d| d.table(kind).map(|t| (d, t))) {
            self.retarget_from_dynamic(song, kind, len, source)?;
            self.report(format!(
                "{kind} table: row {max} referenced past {len} extracted rows; programs taken from emulation"
            ));
            return Ok(());
        }
        let (Some(block), Some(locator)) = (
            block,
            self.layout.tables.iter().find(|l| l.kind == kind),
        ) else {
            return Err(ConvertError::IncompleteExtraction {
                reason: format!("{kind} table row {max} referenced but the table has no data"),
            });
        };

        let index = table_index(song, kind);
        let table = &mut song.tables[index];
        table.rows.truncate(block.rows);
        let mut row = block.rows;
        while row < locator.records.max_rows {
            let record = self.scanner.record(
                block.address,
                locator.records.layout,
                locator.records.columns,
                row,
            );
            let decoded = static_scan::table_row(locator, &record);
            let last = !matches!(decoded, TableRow::Step(_));
            table.rows.push(decoded);
            row += 1;
            if row > max && last {
                break;
            }
        }
        if matches!(table.rows.last(), Some(TableRow::Step(_))) {
            table.rows.push(TableRow::End);
        }
        table.provenance = Provenance::Merged;
        self.report(format!(
            "{kind} table: row {max} referenced past {} extracted rows; read raw memory up to row {}",
            block.rows,
            row - 1
        ));
        Ok(())
    }

    /// Point out-of-range references at copies of emulated programs.
    fn retarget_from_dynamic(
        &mut self,
        song: &mut Song,
        kind: TableKind,
        len: usize,
        (dynamic, source): (&Song, &Table),
    ) -> Result<()> {
        let index = table_index(song, kind);
        let mut copied: HashMap<usize, u8> = HashMap::new();
        let mut copy = |song: &mut Song, start: usize| -> Result<u8> {
            if let Some(at) = copied.get(&start) {
                return Ok(*at);
            }
            let program = program_at(source, start);
            let table = &mut song.tables[index];
            table.provenance = Provenance::Merged;
            let at = table.append_program(&program)?;
            copied.insert(start, at);
            Ok(at)
        };
        let dynamic_start = |instrument: &Instrument| -> usize {
            let matching = dynamic
                .instruments
                .iter()
                .find(|d| {
                    d.attack_decay == instrument.attack_decay
                        && d.sustain_release == instrument.sustain_release
                })
                .or_else(|| dynamic.instruments.first());
            let start = matching.and_then(|d| match kind {
                TableKind::Wave => Some(d.wave),
                TableKind::Pulse => d.pulse,
                TableKind::Filter => d.filter,
                TableKind::Arpeggio => None,
            });
            start.map_or(0, usize::from)
        };

        for i in 0..song.instruments.len() {
            let instrument = song.instruments[i];
            let current = match kind {
                TableKind::Wave => Some(instrument.wave),
                TableKind::Pulse => instrument.pulse,
                TableKind::Filter => instrument.filter,
                TableKind::Arpeggio => None,
            };
            if current.map_or(true, |r| (r as usize) < len) {
                continue;
            }
            let start = copy(song, dynamic_start(&instrument))?;
            let target = &mut song.instruments[i];
            match kind {
                TableKind::Wave => target.wave = start,
                TableKind::Pulse => target.pulse = Some(start),
                TableKind::Filter => target.filter = Some(start),
                TableKind::Arpeggio => {}
            }
        }
        let stale_filter_command = |song: &Song| {
            song.sequences.iter().flat_map(|s| s.events.iter()).any(|e| {
                matches!(e, Event::SetCommand(c)
                    if c.kind == CommandKind::FilterProgram && c.args[0] as usize >= len)
            })
        };
        if kind == TableKind::Filter && stale_filter_command(song) {
            let start = copy(song, 0)?;
            for event in song.sequences.iter_mut().flat_map(|s| s.events.iter_mut()) {
                if let Event::SetCommand(c) = event {
                    if c.kind == CommandKind::FilterProgram && c.args[0] as usize >= len {
                        c.args[0] = start;
                    }
                }
            }
        }
        Ok(())
    }

    fn report(&mut self, message: String) {
        warn!("{message}");
        self.degradations
            .push(Degradation::new(DegradationKind::IncompleteExtraction, message));
    }
}
