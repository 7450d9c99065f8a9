//! End-to-end conversion: identify, analyze, encode, validate.

use std::sync::Arc;

use log::{info, warn};
use sidconv_emu::{CancelToken, EmulationError};

use crate::analyzer::{
    self, PlayerIdentifier, ProfileRegistry, ProvenanceSummary, SignatureIdentifier,
};
use crate::config::ConvertConfig;
use crate::encoder::{self, BuiltinTemplates, EncodeOptions, PointerPatch, TemplateRepository};
use crate::error::{Degradation, DegradationKind, Result};
use crate::model::Song;
use crate::source::Source;
use crate::validator::{self, AccuracyReport};

/// Outcome of one conversion job.
#[derive(Debug, Clone)]
pub struct Conversion {
    /// Container file bytes.
    pub binary: Vec<u8>,
    /// Profile the source was analyzed with.
    pub profile: String,
    /// Where the song came from.
    pub provenance: ProvenanceSummary,
    /// Every non-fatal problem, analysis first.
    pub degradations: Vec<Degradation>,
    /// Equivalence report; `None` when validation could not run.
    pub accuracy: Option<AccuracyReport>,
    /// Whether the conversion dropped or cut anything audible.
    pub lossy: bool,
    /// The song that was encoded.
    pub song: Song,
    /// Relocation patches applied to the driver.
    pub patches: Vec<PointerPatch>,
}

/// Conversion front end holding the shared, immutable collaborators.
///
/// One `Converter` can serve many jobs; jobs share nothing mutable.
pub struct Converter {
    profiles: ProfileRegistry,
    identifier: Box<dyn PlayerIdentifier>,
    templates: Arc<dyn TemplateRepository>,
    cancel: CancelToken,
}

impl Default for Converter {
    fn default() -> Self {
        Self::new()
    }
}

impl Converter {
    /// Built-in profiles, signature identification and built-in templates.
    pub fn new() -> Self {
        let profiles = ProfileRegistry::builtin();
        Self {
            identifier: Box::new(SignatureIdentifier::new(&profiles)),
            profiles,
            templates: Arc::new(BuiltinTemplates::new()),
            cancel: CancelToken::new(),
        }
    }

    /// Use `profiles`, identifying players by their signatures.
    pub fn with_profiles(mut self, profiles: ProfileRegistry) -> Self {
        self.identifier = Box::new(SignatureIdentifier::new(&profiles));
        self.profiles = profiles;
        self
    }

    /// Use a different player identifier.
    pub fn with_identifier(mut self, identifier: impl PlayerIdentifier + 'static) -> Self {
        self.identifier = Box::new(identifier);
        self
    }

    /// Use a different template repository.
    pub fn with_templates(mut self, templates: Arc<dyn TemplateRepository>) -> Self {
        self.templates = templates;
        self
    }

    /// Cancel emulation runs when `token` is set.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Registered profiles.
    pub fn profiles(&self) -> &ProfileRegistry {
        &self.profiles
    }

    /// Convert `bytes` with the named template.
    ///
    /// `hint` names the profile to use; without it the identifier decides.
    pub fn convert(
        &self,
        bytes: &[u8],
        hint: Option<&str>,
        template: &str,
        config: &ConvertConfig,
    ) -> Result<Conversion> {
        let source = Source::parse(bytes)?;
        let label = match hint {
            Some(name) => name.to_string(),
            None => self.identifier.identify(bytes),
        };
        let profile = self.profiles.get(&label)?;
        let template = self.templates.load_template(template)?;
        analyzer::precheck(&source, &profile, &template)?;

        let draft = analyzer::analyze_with(&source, &profile, config, &self.cancel)?;
        let options = EncodeOptions {
            base: config.base_address,
            capacity_policy: config.capacity_policy,
        };
        let encoded = encoder::encode(&draft.song, &template, &options)?;
        let mut degradations = draft.degradations;
        degradations.extend(encoded.degradations);

        if self.cancel.is_cancelled() {
            return Err(EmulationError::Cancelled.into());
        }
        let frames = config.validation_frames();
        let accuracy = match validator::score(&source.program, &encoded.container.program(), frames, config) {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("validation skipped: {e}");
                degradations.push(Degradation::new(
                    DegradationKind::ValidationSkipped,
                    format!("validation failed: {e}"),
                ));
                None
            }
        };

        let lossy = encoded.lossy || degradations.iter().any(Degradation::is_lossy);
        info!(
            "converted '{}' ({}) to '{}': {} bytes, accuracy {}, {} degradation(s){}",
            draft.song.title,
            profile.name,
            template.name,
            encoded.bytes.len(),
            accuracy
                .as_ref()
                .map_or_else(|| "n/a".to_string(), |r| format!("{:.2}", r.score)),
            degradations.len(),
            if lossy { ", lossy" } else { "" }
        );
        Ok(Conversion {
            binary: encoded.bytes,
            profile: profile.name.clone(),
            provenance: draft.provenance,
            degradations,
            accuracy,
            lossy,
            song: draft.song,
            patches: encoded.patches,
        })
    }
}

/// Convert with the built-in profiles and templates.
pub fn convert(
    bytes: &[u8],
    hint: Option<&str>,
    template: &str,
    config: &ConvertConfig,
) -> Result<Conversion> {
    Converter::new().convert(bytes, hint, template, config)
}

/// Score two files (PSID/RSID or containers) against each other.
pub fn validate(original: &[u8], converted: &[u8], frames: u32) -> Result<AccuracyReport> {
    let original = Source::parse(original)?;
    let converted = Source::parse(converted)?;
    validator::score(
        &original.program,
        &converted.program,
        frames,
        &ConvertConfig::default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::driver::MINIMAL;
    use crate::error::ConvertError;
    use crate::psid::PsidFile;

    fn silent() -> Vec<u8> {
        PsidFile::new(0x1000, vec![0x60, 0x60], 0x1000, 0x1001).to_bytes()
    }

    #[test]
    fn unknown_hints_and_templates_are_errors() {
        let config = ConvertConfig::default();
        assert!(matches!(
            convert(&silent(), Some("nope"), MINIMAL, &config),
            Err(ConvertError::UnknownProfile { .. })
        ));
        assert!(matches!(
            convert(&silent(), None, "nope", &config),
            Err(ConvertError::UnknownTemplate { .. })
        ));
    }

    #[test]
    fn silent_tunes_cannot_be_reconstructed() {
        let config = ConvertConfig::default();
        assert!(matches!(
            convert(&silent(), None, MINIMAL, &config),
            Err(ConvertError::IncompleteExtraction { .. })
        ));
    }

    #[test]
    fn cancelled_jobs_stop() {
        let token = CancelToken::new();
        token.cancel();
        let converter = Converter::new().with_cancel(token);
        assert!(matches!(
            converter.convert(&silent(), None, MINIMAL, &ConvertConfig::default()),
            Err(ConvertError::Emulation(EmulationError::Cancelled))
        ));
    }

    #[test]
    fn files_validate_against_themselves() {
        let report = validate(&silent(), &silent(), 20).unwrap();
        assert_eq!(report.frames, 20);
        assert!(report.is_exact());
    }
}
