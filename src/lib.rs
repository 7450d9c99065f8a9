//! C64 SID tune converter
//!
//! Translates compiled C64 music players (PSID/RSID files) into a
//! table-driven container played by a small relocatable driver, and checks
//! the result by emulating both and comparing SID register writes frame by
//! frame.
//!
//! # Features
//! - Static table extraction driven by data-only player profiles
//! - Song reconstruction from an emulated register trace
//! - Format-neutral intermediate model with invariant checks
//! - Driver templates with pointer relocation and capacity enforcement
//! - Weighted register-level equivalence scoring
//!
//! # Crate feature flags
//! - `trace-csv` (default): CSV export of frame traces (`FrameTrace::write_csv`)
//!
//! # Quick start
//! ## Convert a tune
//! ```no_run
//! use sidconv::{convert, ConvertConfig};
//! let data = std::fs::read("tune.sid").unwrap();
//! let conversion = convert(&data, None, "minimal", &ConvertConfig::default()).unwrap();
//! if let Some(report) = &conversion.accuracy {
//!     println!("accuracy {:.2}", report.score);
//! }
//! std::fs::write("tune.sf2", &conversion.binary).unwrap();
//! ```
//!
//! ## Encode a song by hand
//! ```
//! use sidconv::encoder::{driver, encode, EncodeOptions};
//! use sidconv::model::{Event, Instrument, OrderEntry, Sequence, Song, Table, TableKind, TableRow};
//!
//! let mut song = Song::new(6);
//! song.instruments.push(Instrument::new(0x09, 0x00, 0));
//! song.tables.push(Table::new(TableKind::Wave, vec![TableRow::Step(vec![0x41, 0]), TableRow::End]));
//! song.sequences.push(Sequence::new(vec![Event::SetInstrument(0), Event::NoteOn(48), Event::Rest(3)]));
//! song.order_lists[0].entries.push(OrderEntry::new(0, 0));
//!
//! let template = driver::minimal().unwrap();
//! let encoded = encode(&song, &template, &EncodeOptions::default()).unwrap();
//! assert!(!encoded.lossy);
//! ```

#![warn(missing_docs)]

pub mod analyzer; // Source analysis
pub mod config; // Conversion settings
pub mod encoder; // Template instantiation and container output
pub mod error; // Errors and degradations
pub mod model; // Intermediate music model
pub mod pipeline; // End-to-end jobs
pub mod psid; // PSID/RSID parsing
pub mod source; // Input files
pub mod validator; // Equivalence scoring

pub use analyzer::{
    analyze, precheck, AnalysisDraft, PlayerIdentifier, PlayerTypeLabel, ProfileRegistry,
    ProvenanceSummary, SignatureIdentifier, SourceProfile,
};
pub use config::{AnalysisConfig, CapacityPolicy, ConvertConfig, ScoreWeights};
pub use encoder::{encode, EncodeOptions, EncodedSong, Sf2Container, Template, TemplateRepository};
pub use error::{ConvertError, Degradation, DegradationKind, Result};
pub use model::Song;
pub use pipeline::{convert, validate, Conversion, Converter};
pub use psid::PsidFile;
pub use sidconv_emu::{emulate, CancelToken, EmulationConfig, FrameTrace, Program};
pub use source::Source;
pub use validator::{score, AccuracyReport};
