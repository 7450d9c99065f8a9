//! Error handling and degradation reporting for the converter.

use std::fmt;

use serde::{Deserialize, Serialize};
use sidconv_emu::EmulationError;
use thiserror::Error;

use crate::model::ModelError;

/// Convenient result alias for conversion stages.
pub type Result<T> = std::result::Result<T, ConvertError>;

/// Errors that abort a conversion stage.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// Emulating a player failed.
    #[error("emulation failed: {0}")]
    Emulation(#[from] EmulationError),
    /// Source file is not a readable PSID/RSID or container.
    #[error("invalid source file: {msg}")]
    InvalidSource {
        /// What was wrong with the file.
        msg: String,
    },
    /// Neither static nor dynamic analysis produced a complete song.
    #[error("incomplete extraction: {reason}")]
    IncompleteExtraction {
        /// Which part of the song could not be recovered.
        reason: String,
    },
    /// The intermediate model violates its invariants.
    #[error("malformed model: {}", join_errors(.errors))]
    MalformedModel {
        /// Every violation found.
        errors: Vec<ModelError>,
    },
    /// A table does not fit the template's fixed capacity.
    #[error("{table} table needs {required} rows but the template holds {capacity}")]
    CapacityExceeded {
        /// Table name.
        table: String,
        /// Rows the song needs, markers included.
        required: usize,
        /// Rows the template reserves.
        capacity: usize,
    },
    /// Source and target cannot be converted into each other.
    #[error("format incompatible: {reason}")]
    FormatIncompatible {
        /// Structural reason.
        reason: String,
    },
    /// A relocated operand held neither the original nor the new address.
    #[error("patch at offset 0x{offset:04x}: expected ${expected:04X}, found ${found:04X}")]
    PatchMismatch {
        /// Offset of the operand inside the driver image.
        offset: usize,
        /// Address the template was assembled with.
        expected: u16,
        /// Address actually found.
        found: u16,
    },
    /// No profile with this name is registered.
    #[error("unknown source profile '{name}'")]
    UnknownProfile {
        /// Requested profile name.
        name: String,
    },
    /// No template with this name is available.
    #[error("unknown template '{name}'")]
    UnknownTemplate {
        /// Requested template name.
        name: String,
    },
    /// Template manifest or code is inconsistent.
    #[error("invalid template '{name}': {msg}")]
    InvalidTemplate {
        /// Template name.
        name: String,
        /// What is inconsistent.
        msg: String,
    },
    /// Reading a file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A JSON document could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Generic validation error.
    #[error("{msg}")]
    InvalidData {
        /// Human-readable explanation.
        msg: String,
    },
}

fn join_errors(errors: &[ModelError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<String> for ConvertError {
    fn from(s: String) -> Self {
        ConvertError::InvalidData { msg: s }
    }
}

impl From<ModelError> for ConvertError {
    fn from(error: ModelError) -> Self {
        ConvertError::MalformedModel {
            errors: vec![error],
        }
    }
}

impl From<&str> for ConvertError {
    fn from(s: &str) -> Self {
        ConvertError::InvalidData { msg: s.to_string() }
    }
}

/// Category of a non-fatal problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DegradationKind {
    /// Static tables were completed from dynamic data or raw memory.
    IncompleteExtraction,
    /// Emulation failed; the song comes from static analysis only.
    EmulationFallback,
    /// A source semantic has no target encoding.
    UnsupportedFeature,
    /// A table was cut to the template capacity on request.
    CapacityTruncated,
    /// The equivalence check could not run.
    ValidationSkipped,
}

/// A non-fatal problem carried in a conversion result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Degradation {
    /// Category.
    pub kind: DegradationKind,
    /// Human-readable detail.
    pub message: String,
}

impl Degradation {
    /// Build a degradation.
    pub fn new(kind: DegradationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Whether this degradation changes what the converted song sounds like.
    pub fn is_lossy(&self) -> bool {
        matches!(
            self.kind,
            DegradationKind::UnsupportedFeature | DegradationKind::CapacityTruncated
        )
    }
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}
