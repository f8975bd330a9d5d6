//! Table image framing and record encoding helpers.
//!
//! Every table image is framed as: magic (4 bytes), format version (u16
//! LE), CRC32 of the body (u32 LE), body. Records within the body are
//! fixed-layout little-endian.

use crate::error::{ChainError, ChainResult};
use crate::primitives::{AddressHash, Hash256};

/// Current table image format version.
pub(crate) const IMAGE_VERSION: u16 = 1;

const FRAME_SIZE: usize = 4 + 2 + 4;

/// Computes the CRC32 (IEEE) checksum of `data`.
#[must_use]
pub(crate) fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

/// Frames a body into a complete image.
#[must_use]
pub(crate) fn frame(magic: [u8; 4], body: Vec<u8>) -> Vec<u8> {
    let mut image = Vec::with_capacity(FRAME_SIZE + body.len());
    image.extend_from_slice(&magic);
    image.extend_from_slice(&IMAGE_VERSION.to_le_bytes());
    image.extend_from_slice(&compute_crc32(&body).to_le_bytes());
    image.extend_from_slice(&body);
    image
}

/// Validates an image's frame and returns its body.
///
/// The empty image decodes as the empty body (a table that was created but
/// never committed).
pub(crate) fn unframe(magic: [u8; 4], image: &[u8]) -> ChainResult<&[u8]> {
    if image.is_empty() {
        return Ok(image);
    }

    if image.len() < FRAME_SIZE {
        return Err(ChainError::corruption("image shorter than frame"));
    }

    if image[..4] != magic {
        return Err(ChainError::corruption("bad image magic"));
    }

    let version = u16::from_le_bytes([image[4], image[5]]);
    if version != IMAGE_VERSION {
        return Err(ChainError::corruption(format!(
            "unsupported image version {version}"
        )));
    }

    let expected = u32::from_le_bytes([image[6], image[7], image[8], image[9]]);
    let body = &image[FRAME_SIZE..];
    let actual = compute_crc32(body);
    if expected != actual {
        return Err(ChainError::corruption(format!(
            "checksum mismatch: expected {expected:08x}, got {actual:08x}"
        )));
    }

    Ok(body)
}

/// Cursor over a table image body.
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn take(&mut self, len: usize) -> ChainResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| ChainError::corruption("truncated record"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn read_u8(&mut self) -> ChainResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn read_u16(&mut self) -> ChainResult<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn read_u32(&mut self) -> ChainResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn read_u64(&mut self) -> ChainResult<u64> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    pub(crate) fn read_hash(&mut self) -> ChainResult<Hash256> {
        let bytes = self.take(32)?;
        let mut buf = [0u8; 32];
        buf.copy_from_slice(bytes);
        Ok(Hash256(buf))
    }

    pub(crate) fn read_address(&mut self) -> ChainResult<AddressHash> {
        let bytes = self.take(20)?;
        let mut buf = [0u8; 20];
        buf.copy_from_slice(bytes);
        Ok(AddressHash(buf))
    }
}
