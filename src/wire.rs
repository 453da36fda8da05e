//! Scalar decoding for custom option payloads.
//!
//! Custom options reach the formatter as raw protobuf records (tag followed
//! by a payload). This module reads those records back and turns a single
//! encoded scalar into the literal that would appear on the right-hand side
//! of an `option` statement.

use anyhow::{bail, Context, Result};
use protobuf::descriptor::field_descriptor_proto::Type;
use protobuf::CodedInputStream;
use std::fmt;

/// Wire type carried in the low three bits of every tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Varint,
    Fixed64,
    LengthDelimited,
    StartGroup,
    EndGroup,
    Fixed32,
}

impl WireType {
    pub fn from_bits(bits: u32) -> Result<Self> {
        Ok(match bits {
            0 => WireType::Varint,
            1 => WireType::Fixed64,
            2 => WireType::LengthDelimited,
            3 => WireType::StartGroup,
            4 => WireType::EndGroup,
            5 => WireType::Fixed32,
            other => bail!("invalid wire type {other}"),
        })
    }

    pub fn bits(self) -> u32 {
        match self {
            WireType::Varint => 0,
            WireType::Fixed64 => 1,
            WireType::LengthDelimited => 2,
            WireType::StartGroup => 3,
            WireType::EndGroup => 4,
            WireType::Fixed32 => 5,
        }
    }
}

/// A record key split into field number and wire type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    pub number: u32,
    pub wire_type: WireType,
}

impl Tag {
    pub fn new(number: u32, wire_type: WireType) -> Self {
        Self { number, wire_type }
    }

    /// Reads the tag at `offset`, returning it with the number of bytes used.
    pub fn decode(buf: &[u8], offset: usize) -> Result<(Tag, usize)> {
        let (key, consumed) = read_varint(buf, offset)?;
        let key = u32::try_from(key).with_context(|| format!("tag {key} out of range"))?;
        let wire_type = WireType::from_bits(key & 0x7)
            .with_context(|| format!("bad tag at offset {offset}"))?;
        Ok((Tag::new(key >> 3, wire_type), consumed))
    }

    pub fn key(self) -> u32 {
        (self.number << 3) | self.wire_type.bits()
    }
}

/// Scalar kinds the decoder can print.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Bool,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Sint32,
    Sint64,
    Enum,
    Fixed32,
    Sfixed32,
    Float,
    Fixed64,
    Sfixed64,
    Double,
    String,
    Bytes,
}

impl ScalarKind {
    /// Kind used for a declared field type; `None` for messages and groups.
    pub fn from_field_type(field_type: Type) -> Option<Self> {
        Some(match field_type {
            Type::TYPE_BOOL => ScalarKind::Bool,
            Type::TYPE_INT32 => ScalarKind::Int32,
            Type::TYPE_INT64 => ScalarKind::Int64,
            Type::TYPE_UINT32 => ScalarKind::Uint32,
            Type::TYPE_UINT64 => ScalarKind::Uint64,
            Type::TYPE_SINT32 => ScalarKind::Sint32,
            Type::TYPE_SINT64 => ScalarKind::Sint64,
            Type::TYPE_ENUM => ScalarKind::Enum,
            Type::TYPE_FIXED32 => ScalarKind::Fixed32,
            Type::TYPE_SFIXED32 => ScalarKind::Sfixed32,
            Type::TYPE_FLOAT => ScalarKind::Float,
            Type::TYPE_FIXED64 => ScalarKind::Fixed64,
            Type::TYPE_SFIXED64 => ScalarKind::Sfixed64,
            Type::TYPE_DOUBLE => ScalarKind::Double,
            Type::TYPE_STRING => ScalarKind::String,
            Type::TYPE_BYTES => ScalarKind::Bytes,
            Type::TYPE_MESSAGE | Type::TYPE_GROUP => return None,
        })
    }

    /// Kind assumed for a value when only its wire type is known.
    pub fn for_wire_type(wire_type: WireType) -> Option<Self> {
        match wire_type {
            WireType::Varint => Some(ScalarKind::Int32),
            WireType::Fixed64 => Some(ScalarKind::Fixed64),
            WireType::LengthDelimited => Some(ScalarKind::String),
            WireType::Fixed32 => Some(ScalarKind::Fixed32),
            WireType::StartGroup | WireType::EndGroup => None,
        }
    }

    pub fn wire_type(self) -> WireType {
        match self {
            ScalarKind::Bool
            | ScalarKind::Int32
            | ScalarKind::Int64
            | ScalarKind::Uint32
            | ScalarKind::Uint64
            | ScalarKind::Sint32
            | ScalarKind::Sint64
            | ScalarKind::Enum => WireType::Varint,
            ScalarKind::Fixed32 | ScalarKind::Sfixed32 | ScalarKind::Float => WireType::Fixed32,
            ScalarKind::Fixed64 | ScalarKind::Sfixed64 | ScalarKind::Double => WireType::Fixed64,
            ScalarKind::String | ScalarKind::Bytes => WireType::LengthDelimited,
        }
    }
}

/// Reads a varint at `offset`, returning the value and the bytes consumed.
pub fn read_varint(buf: &[u8], offset: usize) -> Result<(u64, usize)> {
    let mut is = CodedInputStream::from_bytes(remaining(buf, offset)?);
    let value = is
        .read_raw_varint64()
        .with_context(|| format!("truncated varint at offset {offset}"))?;
    Ok((value, is.pos() as usize))
}

/// Reads a length prefix at `offset` and returns the payload slice it
/// announces together with the total bytes consumed (prefix included).
pub fn read_length_delimited(buf: &[u8], offset: usize) -> Result<(&[u8], usize)> {
    let (len, prefix) = read_varint(buf, offset)?;
    let start = offset + prefix;
    let end = usize::try_from(len)
        .ok()
        .and_then(|len| start.checked_add(len))
        .filter(|&end| end <= buf.len())
        .with_context(|| {
            format!(
                "length {len} at offset {offset} overruns a {}-byte buffer",
                buf.len()
            )
        })?;
    Ok((&buf[start..end], end - offset))
}

/// Number of bytes taken by a value of `wire_type` at `offset`.
pub fn skip(buf: &[u8], offset: usize, wire_type: WireType) -> Result<usize> {
    let width = match wire_type {
        WireType::Varint => return Ok(read_varint(buf, offset)?.1),
        WireType::LengthDelimited => return Ok(read_length_delimited(buf, offset)?.1),
        WireType::Fixed64 => 8,
        WireType::Fixed32 => 4,
        WireType::StartGroup | WireType::EndGroup => {
            bail!("cannot skip group value at offset {offset}")
        }
    };
    if offset + width > buf.len() {
        bail!("fixed{} value at offset {offset} is truncated", width * 8);
    }
    Ok(width)
}

/// Decodes one scalar of `kind` starting at `offset`.
///
/// Returns the source literal for the value and the number of bytes read.
/// Strings come back double-quoted and escaped.
pub fn decode(buf: &[u8], offset: usize, kind: ScalarKind) -> Result<(String, usize)> {
    let mut is = CodedInputStream::from_bytes(remaining(buf, offset)?);
    let literal = match kind {
        ScalarKind::Bool => {
            let text = if is.read_raw_varint64()? == 1 {
                "true"
            } else {
                "false"
            };
            text.to_string()
        }
        ScalarKind::Int32 | ScalarKind::Enum => (is.read_raw_varint64()? as i32).to_string(),
        ScalarKind::Int64 => (is.read_raw_varint64()? as i64).to_string(),
        ScalarKind::Uint32 => (is.read_raw_varint64()? as u32).to_string(),
        ScalarKind::Uint64 => is.read_raw_varint64()?.to_string(),
        ScalarKind::Sint32 => is.read_sint32()?.to_string(),
        ScalarKind::Sint64 => is.read_sint64()?.to_string(),
        ScalarKind::Fixed32 => is.read_fixed32()?.to_string(),
        ScalarKind::Sfixed32 => is.read_sfixed32()?.to_string(),
        ScalarKind::Float => float_literal(is.read_float()?),
        ScalarKind::Fixed64 => is.read_fixed64()?.to_string(),
        ScalarKind::Sfixed64 => is.read_sfixed64()?.to_string(),
        ScalarKind::Double => float_literal(is.read_double()?),
        ScalarKind::String => {
            let bytes = is.read_bytes()?;
            format!("\"{}\"", escape_string(&String::from_utf8_lossy(&bytes)))
        }
        ScalarKind::Bytes => format!("\"{}\"", escape_bytes(&is.read_bytes()?)),
    };
    Ok((literal, is.pos() as usize))
}

fn remaining(buf: &[u8], offset: usize) -> Result<&[u8]> {
    match buf.get(offset..) {
        Some(rest) if !rest.is_empty() => Ok(rest),
        _ => bail!(
            "read at offset {offset} past the end of a {}-byte buffer",
            buf.len()
        ),
    }
}

/// Shortest literal for `value`. Magnitudes outside `[1e-5, 1e15)` use an
/// exponent, since plain digits would overflow the integer-literal range.
fn float_literal<T>(value: T) -> String
where
    T: Copy + Into<f64> + fmt::Display + fmt::LowerExp,
{
    let wide: f64 = value.into();
    if wide.is_nan() {
        "nan".to_string()
    } else if wide.is_infinite() {
        if wide > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if wide == 0.0 || (1e-5..1e15).contains(&wide.abs()) {
        value.to_string()
    } else {
        format!("{value:e}")
    }
}

pub(crate) fn escape_string(s: &str) -> String {
    let mut result = String::new();
    for ch in s.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            _ => result.push(ch),
        }
    }
    result
}

pub(crate) fn escape_bytes(b: &[u8]) -> String {
    let mut out = String::new();
    for &byte in b {
        match byte {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7E => out.push(byte as char),
            _ => out.push_str(&format!("\\{byte:03o}")),
        }
    }
    out
}
