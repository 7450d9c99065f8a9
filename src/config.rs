//! Conversion settings.
//!
//! Every field has a default, so a JSON file only needs the values it
//! overrides:
//!
//! ```
//! use sidconv::{CapacityPolicy, ConvertConfig};
//!
//! let config = ConvertConfig::from_json_str(r#"{ "capacity_policy": "truncate" }"#).unwrap();
//! assert_eq!(config.capacity_policy, CapacityPolicy::Truncate);
//! assert_eq!(config.analysis.rows_per_sequence, 16);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use sidconv_emu::EmulationConfig;

use crate::error::Result;

/// Dynamic analysis settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Frames emulated for dynamic reconstruction.
    pub dynamic_frames: u32,
    /// Rows per reconstructed sequence chunk.
    pub rows_per_sequence: usize,
    /// Largest frames-per-row value accepted when inferring tempo.
    pub max_tempo: u8,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            dynamic_frames: 600,
            rows_per_sequence: 16,
            max_tempo: 16,
        }
    }
}

/// What to do when a table does not fit the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityPolicy {
    /// Fail with `CapacityExceeded`.
    #[default]
    Fail,
    /// Cut the table to capacity and record a degradation.
    Truncate,
}

/// Weights of the accuracy metrics. They are normalized by their sum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    /// Whole-frame snapshot match.
    pub frame: f64,
    /// Per-voice match.
    pub voice: f64,
    /// Per-register match.
    pub register: f64,
    /// Filter register match.
    pub filter: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            frame: 0.40,
            voice: 0.30,
            register: 0.20,
            filter: 0.10,
        }
    }
}

impl ScoreWeights {
    /// Sum of all weights.
    pub fn total(&self) -> f64 {
        self.frame + self.voice + self.register + self.filter
    }
}

/// Settings for one conversion job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    /// Emulation limits shared by analysis and validation.
    pub emulation: EmulationConfig,
    /// Dynamic analysis settings.
    pub analysis: AnalysisConfig,
    /// Table capacity conflict handling.
    pub capacity_policy: CapacityPolicy,
    /// Frames compared by the validator (defaults to `analysis.dynamic_frames`).
    pub validation_frames: Option<u32>,
    /// Accuracy metric weights.
    pub weights: ScoreWeights,
    /// Divergent frames listed in an accuracy report.
    pub max_reported_frames: usize,
    /// Load address of the converted driver (template default when unset).
    pub base_address: Option<u16>,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            emulation: EmulationConfig::default(),
            analysis: AnalysisConfig::default(),
            capacity_policy: CapacityPolicy::Fail,
            validation_frames: None,
            weights: ScoreWeights::default(),
            max_reported_frames: 16,
            base_address: None,
        }
    }
}

impl ConvertConfig {
    /// Parse a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Serialize as pretty JSON.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Use the given capacity policy.
    pub fn with_capacity_policy(mut self, policy: CapacityPolicy) -> Self {
        self.capacity_policy = policy;
        self
    }

    /// Relocate the converted driver to `base`.
    pub fn with_base_address(mut self, base: u16) -> Self {
        self.base_address = Some(base);
        self
    }

    /// Compare this many frames during validation.
    pub fn with_validation_frames(mut self, frames: u32) -> Self {
        self.validation_frames = Some(frames);
        self
    }

    /// Frames the validator compares.
    pub fn validation_frames(&self) -> u32 {
        self.validation_frames
            .unwrap_or(self.analysis.dynamic_frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sidconv_emu::Clock;

    #[test]
    fn defaults_fill_missing_fields() {
        let config =
            ConvertConfig::from_json_str(r#"{ "emulation": { "clock": "ntsc" }, "validation_frames": 50 }"#)
                .unwrap();
        assert_eq!(config.emulation.clock, Clock::Ntsc);
        assert_eq!(config.emulation.max_call_cycles, 200_000);
        assert_eq!(config.validation_frames(), 50);
        assert_eq!(config.weights, ScoreWeights::default());
    }

    #[test]
    fn json_round_trip() {
        let config = ConvertConfig::default()
            .with_capacity_policy(CapacityPolicy::Truncate)
            .with_base_address(0x4000);
        let json = config.to_json_string().unwrap();
        assert_eq!(ConvertConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn weights_sum_to_one() {
        approx::assert_relative_eq!(ScoreWeights::default().total(), 1.0);
    }
}
