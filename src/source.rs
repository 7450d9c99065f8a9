//! Input files: PSID/RSID tunes or converted containers.

use std::path::Path;

use sidconv_emu::{MemoryImage, Program};

use crate::encoder::Sf2Container;
use crate::error::{ConvertError, Result};
use crate::psid::PsidFile;

/// File format of a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceFormat {
    /// PSID or RSID tune.
    Psid(PsidFile),
    /// A container written by this crate or a compatible editor.
    Container(Sf2Container),
}

/// A parsed input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// Original file bytes.
    pub bytes: Vec<u8>,
    /// Parsed structure.
    pub format: SourceFormat,
    /// Runnable program.
    pub program: Program,
    /// Title.
    pub title: String,
    /// Author.
    pub author: String,
    /// Release line.
    pub released: String,
    /// SID chips the tune drives.
    pub sid_count: usize,
}

impl Source {
    /// Detect the format and parse.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if PsidFile::detect(bytes) {
            let psid = PsidFile::parse(bytes)?;
            return Ok(Self {
                bytes: bytes.to_vec(),
                program: psid.program(),
                title: psid.header.name.clone(),
                author: psid.header.author.clone(),
                released: psid.header.released.clone(),
                sid_count: psid.sid_count(),
                format: SourceFormat::Psid(psid),
            });
        }
        if Sf2Container::detect(bytes) {
            let container = Sf2Container::parse(bytes)?;
            return Ok(Self {
                bytes: bytes.to_vec(),
                program: container.program(),
                title: container.info.title.clone(),
                author: container.info.author.clone(),
                released: container.info.released.clone(),
                sid_count: 1,
                format: SourceFormat::Container(container),
            });
        }
        Err(ConvertError::InvalidSource {
            msg: "neither a PSID/RSID file nor a container".into(),
        })
    }

    /// Read and parse a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::parse(&std::fs::read(path)?)
    }

    /// The container, when the source is one.
    pub fn container(&self) -> Option<&Sf2Container> {
        match &self.format {
            SourceFormat::Container(container) => Some(container),
            SourceFormat::Psid(_) => None,
        }
    }

    /// Memory image with the program loaded.
    pub fn image(&self) -> Result<MemoryImage> {
        Ok(self.program.image()?)
    }

    /// Program bytes, without file headers.
    pub fn data(&self) -> &[u8] {
        &self.program.data
    }
}
