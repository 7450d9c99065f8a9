//! PSID/RSID container parser and writer.
//!
//! Headers are big-endian. Version 1 headers are `$76` bytes, versions 2-4
//! add flags, relocation hints and the addresses of a second and third SID
//! (`$7C` bytes). A load address of zero means the first two data bytes hold
//! the real load address, little-endian.

use nom::branch::alt;
use nom::bytes::complete::{tag, take};
use nom::combinator::map;
use nom::error::{context, VerboseError};
use nom::number::complete::{be_u16, be_u32, be_u8};
use nom::sequence::tuple;
use nom::IResult;
use sidconv_emu::{PlayMode, Program};

use crate::error::{ConvertError, Result};

const V1_HEADER_LEN: u16 = 0x76;
const V2_HEADER_LEN: u16 = 0x7C;
const TEXT_LEN: usize = 32;

/// `PSID` (subroutine play) or `RSID` (real C64 environment).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsidKind {
    /// `PSID` magic.
    Psid,
    /// `RSID` magic.
    Rsid,
}

/// Parsed header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsidHeader {
    /// File magic.
    pub kind: PsidKind,
    /// Header version (1-4).
    pub version: u16,
    /// Offset of the data block.
    pub data_offset: u16,
    /// Load address as stored (0 = taken from the data).
    pub load_address: u16,
    /// Init routine.
    pub init_address: u16,
    /// Play routine (0 = interrupt driven).
    pub play_address: u16,
    /// Number of songs.
    pub songs: u16,
    /// One-based default song.
    pub start_song: u16,
    /// Per-song speed bits (VBI vs CIA timing).
    pub speed: u32,
    /// Title.
    pub name: String,
    /// Author.
    pub author: String,
    /// Release line.
    pub released: String,
    /// v2+ flags.
    pub flags: u16,
    /// v2+ free page hint.
    pub start_page: u8,
    /// v2+ free page count.
    pub page_length: u8,
    /// v3+ second SID address (middle byte, 0 = none).
    pub second_sid: u8,
    /// v4 third SID address (middle byte, 0 = none).
    pub third_sid: u8,
}

/// A complete PSID/RSID file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsidFile {
    /// Header.
    pub header: PsidHeader,
    /// Effective load address.
    pub load_address: u16,
    /// C64 data, without the embedded load address.
    pub data: Vec<u8>,
}

type ParseResult<'a, T> = IResult<&'a [u8], T, VerboseError<&'a [u8]>>;

fn text(input: &[u8]) -> ParseResult<'_, String> {
    map(take(TEXT_LEN), |raw: &[u8]| {
        let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        raw[..end].iter().map(|b| *b as char).collect()
    })(input)
}

fn header(input: &[u8]) -> ParseResult<'_, PsidHeader> {
    let (input, magic) = context("magic", alt((tag("PSID"), tag("RSID"))))(input)?;
    let (input, (version, data_offset, load_address, init_address, play_address)) = context(
        "addresses",
        tuple((be_u16, be_u16, be_u16, be_u16, be_u16)),
    )(input)?;
    let (input, (songs, start_song, speed)) =
        context("song info", tuple((be_u16, be_u16, be_u32)))(input)?;
    let (input, (name, author, released)) = context("text", tuple((text, text, text)))(input)?;

    let (input, (flags, start_page, page_length, second_sid, third_sid)) = if version >= 2 {
        context(
            "v2 fields",
            tuple((be_u16, be_u8, be_u8, be_u8, be_u8)),
        )(input)?
    } else {
        (input, (0, 0, 0, 0, 0))
    };

    let kind = if magic == b"RSID" {
        PsidKind::Rsid
    } else {
        PsidKind::Psid
    };
    Ok((
        input,
        PsidHeader {
            kind,
            version,
            data_offset,
            load_address,
            init_address,
            play_address,
            songs,
            start_song,
            speed,
            name,
            author,
            released,
            flags,
            start_page,
            page_length,
            second_sid,
            third_sid,
        },
    ))
}

impl PsidFile {
    /// Whether `bytes` starts with a PSID/RSID magic.
    pub fn detect(bytes: &[u8]) -> bool {
        bytes.starts_with(b"PSID") || bytes.starts_with(b"RSID")
    }

    /// Parse a file.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let (_, header) = header(bytes).map_err(|e| ConvertError::InvalidSource {
            msg: format!("PSID header: {e:?}"),
        })?;
        if !(1..=4).contains(&header.version) {
            return Err(ConvertError::InvalidSource {
                msg: format!("unsupported PSID version {}", header.version),
            });
        }
        let data = bytes
            .get(header.data_offset as usize..)
            .ok_or_else(|| ConvertError::InvalidSource {
                msg: format!("data offset 0x{:04x} past end of file", header.data_offset),
            })?;

        let (load_address, data) = if header.load_address == 0 {
            if data.len() < 2 {
                return Err(ConvertError::InvalidSource {
                    msg: "missing embedded load address".into(),
                });
            }
            (u16::from_le_bytes([data[0], data[1]]), &data[2..])
        } else {
            (header.load_address, data)
        };
        if load_address as usize + data.len() > 0x1_0000 {
            return Err(ConvertError::InvalidSource {
                msg: format!(
                    "{} data bytes at ${load_address:04X} exceed the address space",
                    data.len()
                ),
            });
        }

        Ok(Self {
            header,
            load_address,
            data: data.to_vec(),
        })
    }

    /// Minimal v2 PSID around one block of code.
    pub fn new(load_address: u16, data: Vec<u8>, init: u16, play: u16) -> Self {
        Self {
            header: PsidHeader {
                kind: PsidKind::Psid,
                version: 2,
                data_offset: V2_HEADER_LEN,
                load_address: 0,
                init_address: init,
                play_address: play,
                songs: 1,
                start_song: 1,
                speed: 0,
                name: String::new(),
                author: String::new(),
                released: String::new(),
                flags: 0,
                start_page: 0,
                page_length: 0,
                second_sid: 0,
                third_sid: 0,
            },
            load_address,
            data,
        }
    }

    /// Number of SID chips the tune drives.
    pub fn sid_count(&self) -> usize {
        1 + (self.header.second_sid != 0) as usize + (self.header.third_sid != 0) as usize
    }

    /// Runnable program for the default song.
    pub fn program(&self) -> Program {
        let play = if self.header.kind == PsidKind::Rsid || self.header.play_address == 0 {
            PlayMode::Interrupt
        } else {
            PlayMode::Subroutine(self.header.play_address)
        };
        let init = if self.header.init_address == 0 {
            self.load_address
        } else {
            self.header.init_address
        };
        Program {
            load_address: self.load_address,
            data: self.data.clone(),
            init,
            play,
            song: self.header.start_song.saturating_sub(1).min(255) as u8,
        }
    }

    /// Serialize with the load address embedded in the data block.
    pub fn to_bytes(&self) -> Vec<u8> {
        let h = &self.header;
        let header_len = if h.version >= 2 {
            V2_HEADER_LEN
        } else {
            V1_HEADER_LEN
        };
        let mut out = Vec::with_capacity(header_len as usize + 2 + self.data.len());
        out.extend_from_slice(match h.kind {
            PsidKind::Psid => b"PSID",
            PsidKind::Rsid => b"RSID",
        });
        for word in [h.version, header_len, 0, h.init_address, h.play_address, h.songs, h.start_song] {
            out.extend_from_slice(&word.to_be_bytes());
        }
        out.extend_from_slice(&h.speed.to_be_bytes());
        for field in [&h.name, &h.author, &h.released] {
            let mut raw = [0u8; TEXT_LEN];
            for (dst, ch) in raw.iter_mut().zip(field.chars().take(TEXT_LEN - 1)) {
                *dst = if ch.is_ascii() { ch as u8 } else { b'?' };
            }
            out.extend_from_slice(&raw);
        }
        if h.version >= 2 {
            out.extend_from_slice(&h.flags.to_be_bytes());
            out.extend_from_slice(&[h.start_page, h.page_length, h.second_sid, h.third_sid]);
        }
        out.extend_from_slice(&self.load_address.to_le_bytes());
        out.extend_from_slice(&self.data);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PsidFile {
        let mut psid = PsidFile::new(0x1000, vec![0x60, 0x60], 0x1000, 0x1001);
        psid.header.name = "Test Tune".into();
        psid.header.author = "Someone".into();
        psid.header.released = "2024 Nobody".into();
        psid
    }

    #[test]
    fn written_files_parse_back() {
        let bytes = sample().to_bytes();
        assert_eq!(bytes.len(), 0x7C + 2 + 2);
        let parsed = PsidFile::parse(&bytes).unwrap();
        assert_eq!(parsed.load_address, 0x1000);
        assert_eq!(parsed.data, vec![0x60, 0x60]);
        assert_eq!(parsed.header.name, "Test Tune");
        assert_eq!(parsed.header.released, "2024 Nobody");
        assert_eq!(parsed.program().play, PlayMode::Subroutine(0x1001));
    }

    #[test]
    fn multi_sid_is_counted() {
        let mut psid = sample();
        psid.header.version = 3;
        psid.header.second_sid = 0x42;
        let parsed = PsidFile::parse(&psid.to_bytes()).unwrap();
        assert_eq!(parsed.sid_count(), 2);
    }

    #[test]
    fn rsid_plays_through_interrupts() {
        let mut psid = sample();
        psid.header.kind = PsidKind::Rsid;
        psid.header.play_address = 0;
        let parsed = PsidFile::parse(&psid.to_bytes()).unwrap();
        assert_eq!(parsed.program().play, PlayMode::Interrupt);
    }

    #[test]
    fn truncated_header_is_rejected() {
        let bytes = sample().to_bytes();
        assert!(matches!(
            PsidFile::parse(&bytes[..40]),
            Err(ConvertError::InvalidSource { .. })
        ));
        assert!(!PsidFile::detect(b"ABCD"));
    }
}
