use std::{io::Write, mem::size_of};

use anyhow::Result;
use zerocopy::{AsBytes, FromBytes, FromZeroes, LittleEndian, U16, U32};

use crate::{array_ref, error::FormatError, format::ChunkId};

#[derive(Copy, Clone, Debug, Default, PartialEq, FromBytes, FromZeroes, AsBytes)]
#[repr(C, packed)]
pub struct ChunkHeader {
    pub id: U16<LittleEndian>,
    /// Total length, header included.
    pub length: U32<LittleEndian>,
}

pub const CHUNK_HEADER_SIZE: usize = size_of::<ChunkHeader>();

impl ChunkHeader {
    pub fn new(id: u16, length: u32) -> Self {
        Self { id: U16::new(id), length: U32::new(length) }
    }

    #[inline]
    pub fn id(&self) -> u16 { self.id.get() }

    #[inline]
    pub fn length(&self) -> u32 { self.length.get() }
}

/// Bounds-checked reader over a fully buffered file.
///
/// Reading past the end of the buffer is a structural error. Staying inside a
/// chunk's declared length is the caller's job.
#[derive(Clone, Debug)]
pub struct ChunkCursor<'a> {
    data: &'a [u8],
    pos: usize,
    saved: usize,
}

impl<'a> ChunkCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self { Self { data, pos: 0, saved: 0 } }

    #[inline]
    pub fn position(&self) -> usize { self.pos }

    #[inline]
    pub fn len(&self) -> usize { self.data.len() }

    #[inline]
    pub fn is_empty(&self) -> bool { self.data.is_empty() }

    /// Bytes left until the physical end of the buffer.
    #[inline]
    pub fn remaining(&self) -> usize { self.data.len() - self.pos }

    fn eof(&self, needed: usize) -> FormatError {
        FormatError::UnexpectedEof { offset: self.pos, needed, available: self.remaining() }
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(self.eof(n).into());
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n)?;
        Ok(())
    }

    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(FormatError::UnexpectedEof {
                offset: pos,
                needed: 0,
                available: 0,
            }
            .into());
        }
        self.pos = pos;
        Ok(())
    }

    /// Remembers the current position for a later [`Self::restore`].
    #[inline]
    pub fn save(&mut self) { self.saved = self.pos; }

    #[inline]
    pub fn restore(&mut self) { self.pos = self.saved; }

    pub fn read_header(&mut self) -> Result<ChunkHeader> {
        let bytes = self.take(CHUNK_HEADER_SIZE)?;
        ChunkHeader::read_from_prefix(bytes).ok_or_else(|| self.eof(CHUNK_HEADER_SIZE).into())
    }

    /// Identifier of the next chunk, without consuming anything.
    pub fn peek_id(&self) -> Option<u16> {
        let bytes = self.data.get(self.pos..self.pos + 2)?;
        Some(u16::from_le_bytes(*array_ref!(bytes, 0, 2)))
    }

    pub fn read_u8(&mut self) -> Result<u8> { Ok(self.take(1)?[0]) }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(*array_ref!(self.take(2)?, 0, 2)))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(*array_ref!(self.take(2)?, 0, 2)))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(*array_ref!(self.take(4)?, 0, 4)))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(*array_ref!(self.take(4)?, 0, 4)))
    }

    /// Reads a NUL terminated string of at most `limit` bytes (terminator included).
    ///
    /// A missing terminator consumes the whole `limit`.
    pub fn read_cstring(&mut self, limit: usize) -> Result<String> {
        let end = self.pos.saturating_add(limit).min(self.data.len());
        let bytes = &self.data[self.pos..end];
        let (text, consumed) = match bytes.iter().position(|&b| b == 0) {
            Some(nul) => (&bytes[..nul], nul + 1),
            None => {
                log::warn!("Unterminated string at {:#X}", self.pos);
                (bytes, bytes.len())
            }
        };
        self.pos += consumed;
        Ok(String::from_utf8_lossy(text).into_owned())
    }
}

/// Offset of the first nested chunk inside `payload`, for chunks that have any.
fn nested_offset(id: u16, payload: &[u8]) -> Option<usize> {
    match ChunkId::from_repr(id)? {
        ChunkId::Main
        | ChunkId::Project
        | ChunkId::Editor
        | ChunkId::TriMesh
        | ChunkId::MatEntry
        | ChunkId::MatAmbient
        | ChunkId::MatDiffuse
        | ChunkId::MatSpecular
        | ChunkId::MatShininess
        | ChunkId::MatShinStrength
        | ChunkId::MatTransparency
        | ChunkId::MatSelfIllum
        | ChunkId::MatTexMap
        | ChunkId::MatSpecMap
        | ChunkId::MatOpacMap
        | ChunkId::MatReflMap
        | ChunkId::MatBumpMap
        | ChunkId::MatShinMap
        | ChunkId::MatSelfIllumMap
        | ChunkId::AmbientLight
        | ChunkId::Keyframer
        | ChunkId::ObjectNode => Some(0),
        ChunkId::NamedObject => payload.iter().position(|&b| b == 0).map(|nul| nul + 1),
        ChunkId::FaceArray if payload.len() >= 2 => {
            let count = u16::from_le_bytes(*array_ref!(payload, 0, 2)) as usize;
            Some(2 + count * 8)
        }
        _ => None,
    }
}

/// Recursively dump a chunk tree.
pub fn dump_chunks<W: Write>(w: &mut W, data: &[u8], indent: usize) -> Result<()> {
    let indstr = "  ".repeat(indent);
    let mut cursor = ChunkCursor::new(data);
    while cursor.remaining() >= CHUNK_HEADER_SIZE {
        let start = cursor.position();
        let header = cursor.read_header()?;
        let length = (header.length() as usize).clamp(CHUNK_HEADER_SIZE, data.len() - start);
        let payload = &data[start + CHUNK_HEADER_SIZE..start + length];
        writeln!(
            w,
            "{indstr}- {:#06X} {} (length {:#X})",
            header.id(),
            ChunkId::name(header.id()),
            header.length()
        )?;
        if let Some(offset) = nested_offset(header.id(), payload) {
            if offset < payload.len() {
                dump_chunks(w, &payload[offset..], indent + 1)?;
            }
        }
        cursor.seek(start + length)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: u16, payload: &[u8]) -> Vec<u8> {
        let mut out = ChunkHeader::new(id, (payload.len() + CHUNK_HEADER_SIZE) as u32)
            .as_bytes()
            .to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn header_is_six_bytes() {
        assert_eq!(CHUNK_HEADER_SIZE, 6);
        let data = chunk(0x4D4D, &[]);
        assert_eq!(data, [0x4D, 0x4D, 6, 0, 0, 0]);
    }

    #[test]
    fn read_header_advances() {
        let data = chunk(0x3D3D, &[1, 2, 3]);
        let mut cursor = ChunkCursor::new(&data);
        let header = cursor.read_header().unwrap();
        assert_eq!(header.id(), 0x3D3D);
        assert_eq!(header.length(), 9);
        assert_eq!(cursor.position(), 6);
        assert_eq!(cursor.remaining(), 3);
    }

    #[test]
    fn short_header_is_structural() {
        let data = [0x4D, 0x4D, 6];
        let mut cursor = ChunkCursor::new(&data);
        let err = cursor.read_header().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FormatError>(),
            Some(FormatError::UnexpectedEof { offset: 0, needed: 6, available: 3 })
        ));
    }

    #[test]
    fn save_and_restore() {
        let mut data = chunk(0x0030, &50u16.to_le_bytes());
        data.extend(chunk(0x0011, &[1, 2, 3]));
        let mut cursor = ChunkCursor::new(&data);
        assert_eq!(cursor.peek_id(), Some(0x0030));
        cursor.save();
        cursor.read_header().unwrap();
        assert_eq!(cursor.read_u16().unwrap(), 50);
        cursor.restore();
        assert_eq!(cursor.position(), 0);
        cursor.skip(8).unwrap();
        assert_eq!(cursor.peek_id(), Some(0x0011));
    }

    #[test]
    fn cstring_terminated_and_unterminated() {
        let data = b"Box01\0rest";
        let mut cursor = ChunkCursor::new(data);
        assert_eq!(cursor.read_cstring(data.len()).unwrap(), "Box01");
        assert_eq!(cursor.position(), 6);
        assert_eq!(cursor.read_cstring(2).unwrap(), "re");
        assert_eq!(cursor.position(), 8);
        assert_eq!(cursor.read_cstring(100).unwrap(), "st");
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn scalar_reads_fail_past_end() {
        let data = 1.5f32.to_le_bytes();
        let mut cursor = ChunkCursor::new(&data);
        assert_eq!(cursor.read_f32().unwrap(), 1.5);
        assert!(cursor.read_u8().is_err());
        assert!(cursor.seek(5).is_err());
    }

    #[test]
    fn dump_nested_tree() {
        let mat = chunk(0xAFFF, &chunk(0xA000, b"Red\0"));
        let editor = chunk(0x3D3D, &mat);
        let main = chunk(0x4D4D, &editor);
        let mut out = Vec::new();
        dump_chunks(&mut out, &main, 0).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("- 0x4D4D Main"));
        assert!(lines[3].starts_with("      - 0xA000 MatName"));
    }
}
