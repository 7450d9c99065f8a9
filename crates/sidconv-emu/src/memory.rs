//! Flat 64 KiB memory image.

use std::ops::Range;

use crate::error::{EmulationError, Result};

/// Size of the 6502 address space.
pub const MEMORY_SIZE: usize = 0x1_0000;

/// One undifferentiated 64 KiB array of RAM.
///
/// Banking is not modelled; the SID window is routed by the session bus, the
/// image itself only stores bytes.
#[derive(Clone)]
pub struct MemoryImage {
    bytes: Box<[u8; MEMORY_SIZE]>,
}

impl MemoryImage {
    /// Zero-filled image.
    pub fn new() -> Self {
        Self {
            bytes: Box::new([0; MEMORY_SIZE]),
        }
    }

    /// Build an image holding one block.
    pub fn with_block(address: u16, data: &[u8]) -> Result<Self> {
        let mut image = Self::new();
        image.load(address, data)?;
        Ok(image)
    }

    /// Copy `data` into memory at `address`.
    pub fn load(&mut self, address: u16, data: &[u8]) -> Result<()> {
        let start = address as usize;
        let end = start + data.len();
        if end > MEMORY_SIZE {
            return Err(EmulationError::ImageOverflow {
                address,
                len: data.len(),
            });
        }
        self.bytes[start..end].copy_from_slice(data);
        Ok(())
    }

    /// Read a byte.
    #[inline]
    pub fn read(&self, address: u16) -> u8 {
        self.bytes[address as usize]
    }

    /// Write a byte.
    #[inline]
    pub fn write(&mut self, address: u16, value: u8) {
        self.bytes[address as usize] = value;
    }

    /// Read a little-endian word (wraps at `$FFFF`).
    pub fn read_u16(&self, address: u16) -> u16 {
        let lo = self.read(address) as u16;
        let hi = self.read(address.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }

    /// Write a little-endian word (wraps at `$FFFF`).
    pub fn write_u16(&mut self, address: u16, value: u16) {
        self.write(address, value as u8);
        self.write(address.wrapping_add(1), (value >> 8) as u8);
    }

    /// Borrow a range of memory, clamped to the address space.
    pub fn slice(&self, range: Range<usize>) -> &[u8] {
        let end = range.end.min(MEMORY_SIZE);
        let start = range.start.min(end);
        &self.bytes[start..end]
    }
}

impl Default for MemoryImage {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let used = self.bytes.iter().filter(|b| **b != 0).count();
        f.debug_struct("MemoryImage")
            .field("nonzero_bytes", &used)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_rejects_blocks_past_top_of_memory() {
        let mut image = MemoryImage::new();
        assert!(image.load(0xFFFE, &[1, 2]).is_ok());
        assert_eq!(
            image.load(0xFFFF, &[1, 2]),
            Err(EmulationError::ImageOverflow {
                address: 0xFFFF,
                len: 2
            })
        );
    }

    #[test]
    fn words_are_little_endian() {
        let mut image = MemoryImage::new();
        image.write_u16(0x0314, 0x1234);
        assert_eq!(image.read(0x0314), 0x34);
        assert_eq!(image.read(0x0315), 0x12);
        assert_eq!(image.read_u16(0x0314), 0x1234);
    }

    #[test]
    fn slice_is_clamped() {
        let image = MemoryImage::with_block(0xFFF0, &[7; 16]).unwrap();
        assert_eq!(image.slice(0xFFF8..0x10010).len(), 8);
        assert!(image.slice(0x20000..0x20010).is_empty());
    }
}
