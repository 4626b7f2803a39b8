//! Little-endian byte sink used by the model encoders.

use crate::Error;
use crate::reader::IndexWidth;
use crate::text::Text;
use byteorder::{ByteOrder, LittleEndian};
use glam::{Vec2, Vec3, Vec4};

#[derive(Clone, Debug, Default)]
pub struct ByteWriter {
    bytes: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.bytes.push(v);
    }

    pub fn write_i8(&mut self, v: i8) {
        self.bytes.push(v as u8);
    }

    pub fn write_u16(&mut self, v: u16) {
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, v);
        self.write_bytes(&buf);
    }

    pub fn write_i16(&mut self, v: i16) {
        let mut buf = [0u8; 2];
        LittleEndian::write_i16(&mut buf, v);
        self.write_bytes(&buf);
    }

    pub fn write_u32(&mut self, v: u32) {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, v);
        self.write_bytes(&buf);
    }

    pub fn write_i32(&mut self, v: i32) {
        let mut buf = [0u8; 4];
        LittleEndian::write_i32(&mut buf, v);
        self.write_bytes(&buf);
    }

    pub fn write_i64(&mut self, v: i64) {
        let mut buf = [0u8; 8];
        LittleEndian::write_i64(&mut buf, v);
        self.write_bytes(&buf);
    }

    pub fn write_f32(&mut self, v: f32) {
        let mut buf = [0u8; 4];
        LittleEndian::write_f32(&mut buf, v);
        self.write_bytes(&buf);
    }

    pub fn write_f32_slice(&mut self, values: &[f32]) {
        for &v in values {
            self.write_f32(v);
        }
    }

    pub fn write_vec2(&mut self, v: Vec2) {
        self.write_f32_slice(&v.to_array());
    }

    pub fn write_vec3(&mut self, v: Vec3) {
        self.write_f32_slice(&v.to_array());
    }

    pub fn write_vec4(&mut self, v: Vec4) {
        self.write_f32_slice(&v.to_array());
    }

    /// Writes a `usize` count as `u32`.
    pub fn write_count(&mut self, count: usize) -> Result<(), Error> {
        let v = u32::try_from(count)
            .map_err(|_| Error::invalid(format!("count {count} does not fit in u32")))?;
        self.write_u32(v);
        Ok(())
    }

    pub fn write_count_u16(&mut self, count: usize) -> Result<(), Error> {
        let v = u16::try_from(count)
            .map_err(|_| Error::invalid(format!("count {count} does not fit in u16")))?;
        self.write_u16(v);
        Ok(())
    }

    pub fn write_count_u8(&mut self, count: usize) -> Result<(), Error> {
        let v = u8::try_from(count)
            .map_err(|_| Error::invalid(format!("count {count} does not fit in u8")))?;
        self.write_u8(v);
        Ok(())
    }

    /// Writes a signed index of the given width.
    pub fn write_index(&mut self, width: IndexWidth, value: i64) -> Result<(), Error> {
        let overflow = || Error::invalid(format!("index {value} does not fit in {width:?}"));
        match width {
            IndexWidth::One => self.write_i8(i8::try_from(value).map_err(|_| overflow())?),
            IndexWidth::Two => self.write_i16(i16::try_from(value).map_err(|_| overflow())?),
            IndexWidth::Four => self.write_i32(i32::try_from(value).map_err(|_| overflow())?),
            IndexWidth::Eight => self.write_i64(value),
        }
        Ok(())
    }

    /// Writes an index whose 1- and 2-byte forms are unsigned.
    pub fn write_unsigned_index(&mut self, width: IndexWidth, value: i64) -> Result<(), Error> {
        let overflow = || Error::invalid(format!("index {value} does not fit in {width:?}"));
        match width {
            IndexWidth::One => self.write_u8(u8::try_from(value).map_err(|_| overflow())?),
            IndexWidth::Two => self.write_u16(u16::try_from(value).map_err(|_| overflow())?),
            IndexWidth::Four => self.write_i32(i32::try_from(value).map_err(|_| overflow())?),
            IndexWidth::Eight => self.write_i64(value),
        }
        Ok(())
    }

    /// Writes the raw bytes of a fixed-width field, which must be exactly `len` long.
    pub fn write_fixed_text(&mut self, text: &Text, len: usize) -> Result<(), Error> {
        if text.raw().len() != len {
            return Err(Error::invalid(format!(
                "fixed text {:?} is {} bytes, field is {len}",
                text.as_str(),
                text.raw().len()
            )));
        }
        self.write_bytes(text.raw());
        Ok(())
    }

    pub fn write_prefixed_text(&mut self, text: &Text) -> Result<(), Error> {
        self.write_count(text.raw().len())?;
        self.write_bytes(text.raw());
        Ok(())
    }

    /// Writes an ASCII tag NUL padded to `len` bytes.
    pub fn write_magic(&mut self, magic: &str, len: usize) {
        let start = self.bytes.len();
        self.write_bytes(magic.as_bytes());
        self.bytes.resize(start + len, 0);
    }
}

pub(crate) fn index_value(index: Option<usize>) -> i64 {
    index.map_or(-1, |i| i as i64)
}
