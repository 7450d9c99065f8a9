//! Player identification.

use log::debug;

use super::profile::{find_pattern, parse_pattern, ProfileRegistry, GENERIC, SF2_NATIVE};
use crate::encoder::Sf2Container;
use crate::psid::PsidFile;

/// Name of the profile a file should be analyzed with.
pub type PlayerTypeLabel = String;

/// Maps a source file to a player type label.
pub trait PlayerIdentifier: Send + Sync {
    /// Label for `bytes`; unknown players map to `"generic"`.
    fn identify(&self, bytes: &[u8]) -> PlayerTypeLabel;
}

/// Identifier using container magic and profile byte signatures.
#[derive(Debug, Clone)]
pub struct SignatureIdentifier {
    signatures: Vec<(String, Vec<Option<u8>>)>,
}

impl SignatureIdentifier {
    /// Collect the signatures of every profile in `registry`.
    ///
    /// Profiles whose signature does not parse are skipped.
    pub fn new(registry: &ProfileRegistry) -> Self {
        let signatures = registry
            .iter()
            .filter_map(|profile| {
                let pattern = profile.signature.as_deref()?;
                match parse_pattern(pattern) {
                    Ok(bytes) => Some((profile.name.clone(), bytes)),
                    Err(e) => {
                        debug!("ignoring signature of profile '{}': {e}", profile.name);
                        None
                    }
                }
            })
            .collect();
        Self { signatures }
    }
}

impl PlayerIdentifier for SignatureIdentifier {
    fn identify(&self, bytes: &[u8]) -> PlayerTypeLabel {
        if Sf2Container::detect(bytes) {
            return SF2_NATIVE.to_string();
        }
        let data = if PsidFile::detect(bytes) {
            match PsidFile::parse(bytes) {
                Ok(psid) => psid.data,
                Err(_) => return GENERIC.to_string(),
            }
        } else {
            bytes.to_vec()
        };
        self.signatures
            .iter()
            .find(|(_, pattern)| find_pattern(&data, pattern).is_some())
            .map_or_else(|| GENERIC.to_string(), |(name, _)| name.clone())
    }
}
