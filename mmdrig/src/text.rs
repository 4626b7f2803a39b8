//! In-band text fields.
//!
//! PMD and VMD store names as fixed-width Shift_JIS fields, PMX stores them as
//! length-prefixed UTF-16LE or UTF-8. Every decoded name keeps the exact bytes it
//! was read from, so the encoders can write padding garbage back untouched.

use crate::Error;
use encoding_rs::{SHIFT_JIS, UTF_8, UTF_16LE};

/// Byte encoding of a text field.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TextEncoding {
    Utf16Le,
    Utf8,
    ShiftJis,
}

impl TextEncoding {
    pub(crate) fn from_pmx_byte(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(Self::Utf16Le),
            1 => Ok(Self::Utf8),
            other => Err(Error::unsupported(format!("PMX text encoding {other}"))),
        }
    }

    pub(crate) fn pmx_byte(self) -> Result<u8, Error> {
        match self {
            Self::Utf16Le => Ok(0),
            Self::Utf8 => Ok(1),
            Self::ShiftJis => Err(Error::invalid("PMX text cannot be Shift_JIS")),
        }
    }
}

/// A decoded name or comment plus the raw bytes it came from.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Text {
    value: String,
    raw: Vec<u8>,
}

impl Text {
    pub(crate) fn from_parts(value: String, raw: Vec<u8>) -> Self {
        Self { value, raw }
    }

    /// Encodes `value` for a length-prefixed field.
    pub fn encode(value: &str, encoding: TextEncoding) -> Self {
        let raw = match encoding {
            TextEncoding::Utf16Le => value
                .encode_utf16()
                .flat_map(|unit| unit.to_le_bytes())
                .collect(),
            TextEncoding::Utf8 => value.as_bytes().to_vec(),
            TextEncoding::ShiftJis => SHIFT_JIS.encode(value).0.into_owned(),
        };
        Self {
            value: value.to_string(),
            raw,
        }
    }

    /// Encodes `value` as Shift_JIS, NUL padded to `width` bytes.
    pub fn fixed(value: &str, width: usize) -> Result<Self, Error> {
        let (bytes, _, unmappable) = SHIFT_JIS.encode(value);
        if unmappable {
            return Err(Error::invalid(format!(
                "{value:?} is not representable in Shift_JIS"
            )));
        }
        if bytes.len() > width {
            return Err(Error::invalid(format!(
                "{value:?} needs {} bytes, field holds {width}",
                bytes.len()
            )));
        }
        let mut raw = bytes.into_owned();
        raw.resize(width, 0);
        Ok(Self {
            value: value.to_string(),
            raw,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// ASCII-only identifier derived from the decoded value.
    pub fn hex_name(&self) -> String {
        to_hex_fallback(&self.value)
    }
}

impl std::fmt::Display for Text {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)
    }
}

fn nul_terminated(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    &bytes[..end]
}

/// Decodes the NUL-terminated prefix of a Shift_JIS field.
pub fn decode_legacy(bytes: &[u8]) -> String {
    let (decoded, _, had_errors) = SHIFT_JIS.decode(nul_terminated(bytes));
    if had_errors {
        log::warn!("malformed Shift_JIS sequence in {:02x?}", bytes);
    }
    decoded.into_owned()
}

pub(crate) fn decode_prefixed(bytes: &[u8], encoding: TextEncoding) -> String {
    match encoding {
        TextEncoding::Utf16Le => {
            let end = bytes
                .chunks_exact(2)
                .position(|unit| unit[0] == 0 && unit[1] == 0)
                .map(|units| units * 2)
                .unwrap_or(bytes.len() & !1);
            UTF_16LE.decode_without_bom_handling(&bytes[..end]).0.into_owned()
        }
        TextEncoding::Utf8 => UTF_8
            .decode_without_bom_handling(nul_terminated(bytes))
            .0
            .into_owned(),
        TextEncoding::ShiftJis => decode_legacy(bytes),
    }
}

/// Renders each UTF-16 code unit of `value` as a `0x####` token.
///
/// `"あい"` becomes `"0x30420x3044"`.
pub fn to_hex_fallback(value: &str) -> String {
    let mut out = String::with_capacity(value.len() * 6);
    for unit in value.encode_utf16() {
        out.push_str(&format!("0x{unit:04x}"));
    }
    out
}
