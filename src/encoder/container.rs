//! SF2-style container: load address, magic, header blocks, driver image.
//!
//! ```text
//! u16 load address (LE)
//! u16 magic $1337 (LE)
//! { u8 id, u8 size, payload[size] }*  terminated by id $FF
//! code and data, loaded at the load address
//! ```

use nom::bytes::complete::{tag, take, take_till};
use nom::combinator::map;
use nom::error::{context, VerboseError};
use nom::multi::many0;
use nom::number::complete::{le_u16, u8 as byte};
use nom::sequence::{terminated, tuple};
use nom::IResult;
use sidconv_emu::Program;

use crate::error::{ConvertError, Result};

/// Container magic as stored.
pub const MAGIC: [u8; 2] = [0x37, 0x13];

/// Header block ids.
pub mod block {
    /// Driver descriptor.
    pub const DESCRIPTOR: u8 = 0x01;
    /// Entry points and state pointers.
    pub const DRIVER_COMMON: u8 = 0x02;
    /// Table descriptors.
    pub const TABLES: u8 = 0x03;
    /// Music data pointers.
    pub const MUSIC_DATA: u8 = 0x05;
    /// Title, author, release.
    pub const SONG_INFO: u8 = 0x06;
    /// End of the header.
    pub const END: u8 = 0xFF;
}

/// Longest song info string.
pub const INFO_LEN: usize = 32;

/// Block `$01`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverDescriptor {
    /// Driver type id.
    pub driver_type: u8,
    /// Length of the driver code.
    pub code_size: u16,
    /// Driver name.
    pub name: String,
    /// Major/minor version.
    pub version: [u8; 2],
}

/// Named address inside the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateAddress {
    /// Pointer name.
    pub name: String,
    /// Absolute address.
    pub address: u16,
}

/// Block `$02`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverCommon {
    /// Init routine.
    pub init: u16,
    /// Stop routine.
    pub stop: u16,
    /// Play routine.
    pub play: u16,
    /// Published state pointers.
    pub state: Vec<StateAddress>,
}

/// One entry of block `$03`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    /// Slot id.
    pub kind: u8,
    /// Index in the template.
    pub id: u8,
    /// 0 = column-major.
    pub layout: u8,
    /// Address of column 0.
    pub address: u16,
    /// Column count.
    pub columns: u8,
    /// Rows reserved per column.
    pub capacity: u8,
    /// Rows in use (end marker not counted).
    pub used: u8,
    /// Display name.
    pub name: String,
}

/// Block `$05`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MusicData {
    /// Voice count.
    pub voices: u8,
    /// Order list pointers, low bytes.
    pub order_lo: u16,
    /// Order list pointers, high bytes.
    pub order_hi: u16,
    /// Sequence pointers, low bytes.
    pub sequence_lo: u16,
    /// Sequence pointers, high bytes.
    pub sequence_hi: u16,
    /// Sequences in use.
    pub sequence_count: u8,
    /// Address of the initial tempo.
    pub tempo: u16,
}

/// Block `$06`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SongInfo {
    /// Title.
    pub title: String,
    /// Author.
    pub author: String,
    /// Release line.
    pub released: String,
}

/// A parsed or freshly built container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sf2Container {
    /// Address the image is loaded at.
    pub load_address: u16,
    /// Block `$01`.
    pub descriptor: DriverDescriptor,
    /// Block `$02`.
    pub common: DriverCommon,
    /// Block `$03`.
    pub tables: Vec<TableDescriptor>,
    /// Block `$05`.
    pub music: MusicData,
    /// Block `$06`.
    pub info: SongInfo,
    /// Blocks this version does not know, kept verbatim.
    pub extra_blocks: Vec<(u8, Vec<u8>)>,
    /// Code and data.
    pub image: Vec<u8>,
}

type ParseResult<'a, T> = IResult<&'a [u8], T, VerboseError<&'a [u8]>>;

fn cstring(input: &[u8]) -> ParseResult<'_, String> {
    map(
        terminated(take_till(|b| b == 0), tag(&b"\0"[..])),
        |raw: &[u8]| raw.iter().map(|b| *b as char).collect(),
    )(input)
}

fn raw_block(input: &[u8]) -> ParseResult<'_, (u8, &[u8])> {
    let (input, id) = byte(input)?;
    if id == block::END {
        return Err(nom::Err::Error(nom::error::make_error(
            input,
            nom::error::ErrorKind::Eof,
        )));
    }
    let (input, size) = byte(input)?;
    let (input, payload) = context("block payload", take(size))(input)?;
    Ok((input, (id, payload)))
}

fn descriptor(input: &[u8]) -> ParseResult<'_, DriverDescriptor> {
    map(
        tuple((byte, le_u16, cstring, byte, byte)),
        |(driver_type, code_size, name, major, minor)| DriverDescriptor {
            driver_type,
            code_size,
            name,
            version: [major, minor],
        },
    )(input)
}

fn common(input: &[u8]) -> ParseResult<'_, DriverCommon> {
    let (input, (init, stop, play)) = tuple((le_u16, le_u16, le_u16))(input)?;
    let (input, state) = many0(map(tuple((cstring, le_u16)), |(name, address)| {
        StateAddress { name, address }
    }))(input)?;
    Ok((
        input,
        DriverCommon {
            init,
            stop,
            play,
            state,
        },
    ))
}

fn table_descriptor(input: &[u8]) -> ParseResult<'_, TableDescriptor> {
    map(
        tuple((byte, byte, byte, le_u16, byte, byte, byte, cstring)),
        |(kind, id, layout, address, columns, capacity, used, name)| TableDescriptor {
            kind,
            id,
            layout,
            address,
            columns,
            capacity,
            used,
            name,
        },
    )(input)
}

fn music_data(input: &[u8]) -> ParseResult<'_, MusicData> {
    map(
        tuple((byte, le_u16, le_u16, le_u16, le_u16, byte, le_u16)),
        |(voices, order_lo, order_hi, sequence_lo, sequence_hi, sequence_count, tempo)| {
            MusicData {
                voices,
                order_lo,
                order_hi,
                sequence_lo,
                sequence_hi,
                sequence_count,
                tempo,
            }
        },
    )(input)
}

fn song_info(input: &[u8]) -> ParseResult<'_, SongInfo> {
    map(tuple((cstring, cstring, cstring)), |(title, author, released)| SongInfo {
        title,
        author,
        released,
    })(input)
}

fn whole<'a, T>(
    name: &str,
    payload: &'a [u8],
    parser: impl FnMut(&'a [u8]) -> ParseResult<'a, T>,
) -> Result<T> {
    let mut parser = parser;
    parser(payload)
        .map(|(_, value)| value)
        .map_err(|e| ConvertError::InvalidSource {
            msg: format!("container {name} block: {e:?}"),
        })
}

fn push_cstring(out: &mut Vec<u8>, text: &str, max: usize) {
    out.extend(
        text.chars()
            .take(max)
            .map(|c| if c.is_ascii() && c != '\0' { c as u8 } else { b'?' }),
    );
    out.push(0);
}

impl Sf2Container {
    /// Whether `bytes` looks like a container.
    pub fn detect(bytes: &[u8]) -> bool {
        bytes.len() > 4 && bytes[2..4] == MAGIC
    }

    /// Parse a container file.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let header: ParseResult<'_, (u16, Vec<(u8, &[u8])>)> = tuple((
            terminated(le_u16, context("magic", tag(&MAGIC[..]))),
            many0(raw_block),
        ))(bytes);
        let (rest, (load_address, blocks)) = header.map_err(|e| ConvertError::InvalidSource {
            msg: format!("container header: {e:?}"),
        })?;
        let image = match rest.split_first() {
            Some((&block::END, image)) => image,
            _ => {
                return Err(ConvertError::InvalidSource {
                    msg: "container header is not terminated".into(),
                })
            }
        };

        let mut descriptor_block = None;
        let mut common_block = None;
        let mut tables = None;
        let mut music = None;
        let mut info = SongInfo::default();
        let mut extra_blocks = Vec::new();
        for (id, payload) in blocks {
            match id {
                block::DESCRIPTOR => descriptor_block = Some(whole("descriptor", payload, descriptor)?),
                block::DRIVER_COMMON => common_block = Some(whole("driver common", payload, common)?),
                block::TABLES => tables = Some(whole("table", payload, many0(table_descriptor))?),
                block::MUSIC_DATA => music = Some(whole("music data", payload, music_data)?),
                block::SONG_INFO => info = whole("song info", payload, song_info)?,
                other => extra_blocks.push((other, payload.to_vec())),
            }
        }
        let missing = |name: &str| ConvertError::InvalidSource {
            msg: format!("container has no {name} block"),
        };

        let container = Self {
            load_address,
            descriptor: descriptor_block.ok_or_else(|| missing("descriptor"))?,
            common: common_block.ok_or_else(|| missing("driver common"))?,
            tables: tables.ok_or_else(|| missing("table"))?,
            music: music.ok_or_else(|| missing("music data"))?,
            info,
            extra_blocks,
            image: image.to_vec(),
        };
        if load_address as usize + container.image.len() > 0x1_0000 {
            return Err(ConvertError::InvalidSource {
                msg: "container image exceeds the address space".into(),
            });
        }
        Ok(container)
    }

    /// Serialize.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut blocks: Vec<(u8, Vec<u8>)> = Vec::new();

        let d = &self.descriptor;
        let mut payload = vec![d.driver_type];
        payload.extend_from_slice(&d.code_size.to_le_bytes());
        push_cstring(&mut payload, &d.name, usize::MAX);
        payload.extend_from_slice(&d.version);
        blocks.push((block::DESCRIPTOR, payload));

        let c = &self.common;
        let mut payload = Vec::new();
        for word in [c.init, c.stop, c.play] {
            payload.extend_from_slice(&word.to_le_bytes());
        }
        for state in &c.state {
            push_cstring(&mut payload, &state.name, usize::MAX);
            payload.extend_from_slice(&state.address.to_le_bytes());
        }
        blocks.push((block::DRIVER_COMMON, payload));

        let mut payload = Vec::new();
        for t in &self.tables {
            payload.extend_from_slice(&[t.kind, t.id, t.layout]);
            payload.extend_from_slice(&t.address.to_le_bytes());
            payload.extend_from_slice(&[t.columns, t.capacity, t.used]);
            push_cstring(&mut payload, &t.name, usize::MAX);
        }
        blocks.push((block::TABLES, payload));

        let m = &self.music;
        let mut payload = vec![m.voices];
        for word in [m.order_lo, m.order_hi, m.sequence_lo, m.sequence_hi] {
            payload.extend_from_slice(&word.to_le_bytes());
        }
        payload.push(m.sequence_count);
        payload.extend_from_slice(&m.tempo.to_le_bytes());
        blocks.push((block::MUSIC_DATA, payload));

        let mut payload = Vec::new();
        for text in [&self.info.title, &self.info.author, &self.info.released] {
            push_cstring(&mut payload, text, INFO_LEN);
        }
        blocks.push((block::SONG_INFO, payload));
        blocks.extend(self.extra_blocks.iter().cloned());

        let mut out = Vec::with_capacity(self.image.len() + 256);
        out.extend_from_slice(&self.load_address.to_le_bytes());
        out.extend_from_slice(&MAGIC);
        for (id, payload) in blocks {
            let size = u8::try_from(payload.len())
                .map_err(|_| format!("container block ${id:02X} is {} bytes", payload.len()))?;
            out.push(id);
            out.push(size);
            out.extend_from_slice(&payload);
        }
        out.push(block::END);
        out.extend_from_slice(&self.image);
        Ok(out)
    }

    /// `len` bytes of the image at an absolute address.
    pub fn memory(&self, address: u16, len: usize) -> Option<&[u8]> {
        let start = (address as usize).checked_sub(self.load_address as usize)?;
        self.image.get(start..start + len)
    }

    /// Image bytes from an absolute address to the end.
    pub fn memory_from(&self, address: u16) -> Option<&[u8]> {
        let start = (address as usize).checked_sub(self.load_address as usize)?;
        self.image.get(start..)
    }

    /// Byte at an absolute address.
    pub fn byte(&self, address: u16) -> Option<u8> {
        self.memory(address, 1).map(|b| b[0])
    }

    /// Runnable program.
    pub fn program(&self) -> Program {
        Program::new(
            self.load_address,
            self.image.clone(),
            self.common.init,
            self.common.play,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Sf2Container {
        Sf2Container {
            load_address: 0x1000,
            descriptor: DriverDescriptor {
                driver_type: 1,
                code_size: 3,
                name: "minimal".into(),
                version: [1, 0],
            },
            common: DriverCommon {
                init: 0x1000,
                stop: 0x1001,
                play: 0x1002,
                state: vec![StateAddress {
                    name: "tempo".into(),
                    address: 0x1003,
                }],
            },
            tables: vec![TableDescriptor {
                kind: 2,
                id: 0,
                layout: 0,
                address: 0x1004,
                columns: 2,
                capacity: 1,
                used: 1,
                name: "Wave".into(),
            }],
            music: MusicData {
                voices: 3,
                order_lo: 0x1010,
                order_hi: 0x1013,
                sequence_lo: 0x1016,
                sequence_hi: 0x1017,
                sequence_count: 1,
                tempo: 0x1003,
            },
            info: SongInfo {
                title: "Title".into(),
                author: "Author".into(),
                released: String::new(),
            },
            extra_blocks: vec![(0x42, vec![1, 2, 3])],
            image: vec![0x60, 0x60, 0x60, 0x06, 0x41, 0x00],
        }
    }

    #[test]
    fn containers_parse_back() {
        let container = sample();
        let bytes = container.to_bytes().unwrap();
        assert_eq!(&bytes[..4], &[0x00, 0x10, 0x37, 0x13]);
        assert!(Sf2Container::detect(&bytes));
        assert_eq!(Sf2Container::parse(&bytes).unwrap(), container);
    }

    #[test]
    fn memory_is_addressed_absolutely() {
        let container = sample();
        assert_eq!(container.byte(0x1003), Some(0x06));
        assert_eq!(container.memory(0x1004, 2), Some(&[0x41, 0x00][..]));
        assert_eq!(container.memory(0x0FFF, 1), None);
        assert_eq!(container.program().init, 0x1000);
    }

    #[test]
    fn song_info_is_clipped() {
        let mut container = sample();
        container.info.title = "x".repeat(40);
        let parsed = Sf2Container::parse(&container.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed.info.title.len(), INFO_LEN);
    }

    #[test]
    fn missing_blocks_are_reported() {
        let bytes = [0x00, 0x10, 0x37, 0x13, 0xFF, 0x60];
        assert!(matches!(
            Sf2Container::parse(&bytes),
            Err(ConvertError::InvalidSource { .. })
        ));
        assert!(Sf2Container::parse(&[0x00, 0x10, 0x12, 0x34]).is_err());
    }
}
