//! Register-level equivalence scoring.
//!
//! Both programs are emulated for the same number of frames and their
//! end-of-frame SID states are compared. Four metrics are combined with
//! [`ScoreWeights`] into a 0-100 score:
//!
//! | Metric | Unit compared |
//! |--------|---------------|
//! | frame | whole 25-register snapshot |
//! | voice | the 7 registers of one voice |
//! | register | one register |
//! | filter | the 4 filter/volume registers |
//!
//! The report is diagnostic; what counts as "good enough" is up to the caller.

use log::debug;
use serde::{Deserialize, Serialize};
use sidconv_emu::sid::VOICE_COUNT;
use sidconv_emu::{emulate, FrameTrace, Program, SidRegister, SID_REGISTER_COUNT};

use crate::config::{ConvertConfig, ScoreWeights};
use crate::error::Result;

/// One register that differs in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterDiff {
    /// Register.
    pub register: SidRegister,
    /// Value in the original.
    pub original: u8,
    /// Value in the conversion.
    pub converted: u8,
}

/// All differences of one frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameDiff {
    /// Frame index.
    pub frame: u32,
    /// Differing registers, in offset order.
    pub registers: Vec<RegisterDiff>,
}

/// Result of an equivalence check. Percentages are 0-100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyReport {
    /// Frames compared.
    pub frames: u32,
    /// Weighted score.
    pub score: f64,
    /// Frames with identical snapshots.
    pub frame_match: f64,
    /// Matching voices over all frames.
    pub voice_match: f64,
    /// Matching registers over all frames.
    pub register_match: f64,
    /// Frames with identical filter registers.
    pub filter_match: f64,
    /// SID writes made by the original.
    pub original_writes: usize,
    /// SID writes made by the conversion.
    pub converted_writes: usize,
    /// First frame that differs.
    pub first_divergence: Option<u32>,
    /// The first divergent frames, up to the configured limit.
    pub divergent_frames: Vec<FrameDiff>,
}

impl AccuracyReport {
    /// Whether every frame matched.
    pub fn is_exact(&self) -> bool {
        self.first_divergence.is_none()
    }
}

fn percent(hits: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        hits as f64 * 100.0 / total as f64
    }
}

/// Compare two traces frame by frame.
///
/// Only the first `min(original.frames, converted.frames)` frames are
/// compared.
pub fn compare(
    original: &FrameTrace,
    converted: &FrameTrace,
    weights: &ScoreWeights,
    max_reported: usize,
) -> AccuracyReport {
    let a = original.snapshots();
    let b = converted.snapshots();
    let frames = a.len().min(b.len());

    let (mut frame_hits, mut voice_hits, mut register_hits, mut filter_hits) = (0, 0, 0, 0);
    let mut first_divergence = None;
    let mut divergent_frames = Vec::new();
    for (frame, (x, y)) in a.iter().zip(&b).enumerate() {
        let registers: Vec<RegisterDiff> = SidRegister::all()
            .filter(|r| x[r.index()] != y[r.index()])
            .map(|register| RegisterDiff {
                register,
                original: x[register.index()],
                converted: y[register.index()],
            })
            .collect();
        register_hits += SID_REGISTER_COUNT - registers.len();
        voice_hits += (0..VOICE_COUNT)
            .filter(|v| registers.iter().all(|d| d.register.voice_index() != Some(*v)))
            .count();
        if registers.iter().all(|d| !d.register.is_filter()) {
            filter_hits += 1;
        }
        if registers.is_empty() {
            frame_hits += 1;
            continue;
        }
        first_divergence.get_or_insert(frame as u32);
        if divergent_frames.len() < max_reported {
            divergent_frames.push(FrameDiff {
                frame: frame as u32,
                registers,
            });
        }
    }

    let frame_match = percent(frame_hits, frames);
    let voice_match = percent(voice_hits, frames * VOICE_COUNT);
    let register_match = percent(register_hits, frames * SID_REGISTER_COUNT);
    let filter_match = percent(filter_hits, frames);
    let total = weights.total();
    let score = if total > 0.0 {
        (weights.frame * frame_match
            + weights.voice * voice_match
            + weights.register * register_match
            + weights.filter * filter_match)
            / total
    } else {
        frame_match
    };

    AccuracyReport {
        frames: frames as u32,
        score,
        frame_match,
        voice_match,
        register_match,
        filter_match,
        original_writes: original.entries.len(),
        converted_writes: converted.entries.len(),
        first_divergence,
        divergent_frames,
    }
}

/// Emulate both programs for `frames` frames and compare them.
pub fn score(
    original: &Program,
    converted: &Program,
    frames: u32,
    config: &ConvertConfig,
) -> Result<AccuracyReport> {
    let a = emulate(original, frames, &config.emulation)?;
    let b = emulate(converted, frames, &config.emulation)?;
    let report = compare(&a, &b, &config.weights, config.max_reported_frames);
    debug!(
        "accuracy {:.2} over {frames} frames (frame {:.1}, voice {:.1}, register {:.1}, filter {:.1})",
        report.score,
        report.frame_match,
        report.voice_match,
        report.register_match,
        report.filter_match
    );
    Ok(report)
}
