//! Cursor-based little-endian reader over an in-memory buffer.

use crate::Error;
use crate::text::{Text, TextEncoding, decode_legacy, decode_prefixed};
use byteorder::{ByteOrder, LittleEndian};
use glam::{Vec2, Vec3, Vec4};

/// Byte width of a variable-width index field.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IndexWidth {
    One,
    Two,
    Four,
    Eight,
}

impl IndexWidth {
    pub fn from_byte(value: u8) -> Result<Self, Error> {
        match value {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            4 => Ok(Self::Four),
            8 => Ok(Self::Eight),
            other => Err(Error::unsupported(format!("index width {other}"))),
        }
    }

    pub fn bytes(self) -> usize {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Four => 4,
            Self::Eight => 8,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    cursor: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, cursor: 0 }
    }

    pub fn offset(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.cursor)
    }

    pub fn is_at_end(&self) -> bool {
        self.remaining() == 0
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8], Error> {
        if self.remaining() < len {
            return Err(Error::TruncatedInput {
                offset: self.cursor,
                needed: len,
                remaining: self.remaining(),
            });
        }
        let out = &self.bytes[self.cursor..self.cursor + len];
        self.cursor += len;
        Ok(out)
    }

    pub fn take_rest(&mut self) -> &'a [u8] {
        let out = &self.bytes[self.cursor.min(self.bytes.len())..];
        self.cursor = self.bytes.len();
        out
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, Error> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16, Error> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn read_i16(&mut self) -> Result<i16, Error> {
        Ok(LittleEndian::read_i16(self.take(2)?))
    }

    pub fn read_u32(&mut self) -> Result<u32, Error> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn read_i32(&mut self) -> Result<i32, Error> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    pub fn read_i64(&mut self) -> Result<i64, Error> {
        Ok(LittleEndian::read_i64(self.take(8)?))
    }

    pub fn read_f32(&mut self) -> Result<f32, Error> {
        Ok(LittleEndian::read_f32(self.take(4)?))
    }

    pub fn read_f32_array<const N: usize>(&mut self) -> Result<[f32; N], Error> {
        let mut out = [0.0; N];
        LittleEndian::read_f32_into(self.take(N * 4)?, &mut out);
        Ok(out)
    }

    pub fn read_byte_array<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_vec2(&mut self) -> Result<Vec2, Error> {
        Ok(Vec2::from_array(self.read_f32_array()?))
    }

    pub fn read_vec3(&mut self) -> Result<Vec3, Error> {
        Ok(Vec3::from_array(self.read_f32_array()?))
    }

    pub fn read_vec4(&mut self) -> Result<Vec4, Error> {
        Ok(Vec4::from_array(self.read_f32_array()?))
    }

    /// Reads a signed index of the declared width. `-1` stays `-1` at every width.
    pub fn read_index(&mut self, width: IndexWidth) -> Result<i64, Error> {
        Ok(match width {
            IndexWidth::One => self.read_i8()? as i64,
            IndexWidth::Two => self.read_i16()? as i64,
            IndexWidth::Four => self.read_i32()? as i64,
            IndexWidth::Eight => self.read_i64()?,
        })
    }

    /// Reads an index whose 1- and 2-byte forms are unsigned (PMX vertex indices).
    pub fn read_unsigned_index(&mut self, width: IndexWidth) -> Result<i64, Error> {
        Ok(match width {
            IndexWidth::One => self.read_u8()? as i64,
            IndexWidth::Two => self.read_u16()? as i64,
            IndexWidth::Four => self.read_i32()? as i64,
            IndexWidth::Eight => self.read_i64()?,
        })
    }

    /// Reads a `len`-byte Shift_JIS field. The whole width is consumed even when a
    /// NUL ends the string early.
    pub fn read_fixed_text(&mut self, len: usize) -> Result<Text, Error> {
        let raw = self.take(len)?;
        Ok(Text::from_parts(decode_legacy(raw), raw.to_vec()))
    }

    /// Reads a `u32` byte length followed by that many bytes of text.
    pub fn read_prefixed_text(&mut self, encoding: TextEncoding) -> Result<Text, Error> {
        let length_offset = self.cursor;
        let len = self.read_u32()? as usize;
        let raw = self.take(len).map_err(|err| {
            log::debug!("text length {len} at offset {length_offset} overruns the buffer");
            err
        })?;
        Ok(Text::from_parts(decode_prefixed(raw, encoding), raw.to_vec()))
    }

    /// Reads a fixed-width ASCII tag, stopping at the first NUL.
    pub fn read_magic(&mut self, len: usize) -> Result<String, Error> {
        let raw = self.take(len)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(raw[..end].iter().map(|&b| b as char).collect())
    }

    /// Reads a `u32` element count and checks it against the bytes left, given a
    /// lower bound on the encoded size of one element.
    pub fn read_count(&mut self, min_element_size: usize) -> Result<usize, Error> {
        let offset = self.cursor;
        let count = self.read_u32()? as usize;
        let needed = count.saturating_mul(min_element_size);
        if needed > self.remaining() {
            return Err(Error::TruncatedInput {
                offset,
                needed,
                remaining: self.remaining(),
            });
        }
        Ok(count)
    }
}

/// Maps a decoded signed index to `None` for the `-1` sentinel.
pub(crate) fn optional_index(raw: i64, field: &'static str) -> Result<Option<usize>, Error> {
    if raw == -1 {
        return Ok(None);
    }
    required_index(raw, field).map(Some)
}

pub(crate) fn required_index(raw: i64, field: &'static str) -> Result<usize, Error> {
    usize::try_from(raw).map_err(|_| Error::ReferentialIntegrity {
        field,
        index: raw,
        len: 0,
    })
}
