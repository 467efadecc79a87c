//! Per-field payload marshallers.
//!
//! Each marshaller is a pure decode/encode pair working on one field
//! payload, independent of the surrounding record:
//!
//! - `Pass`: identity on raw bytes (binary attachments).
//! - `Short` / `Int`: u16 / u32, little-endian.
//! - `Text`: NUL-terminated UTF-8 string.  Decode strips every trailing
//!   NUL byte; encode appends exactly one.
//! - `HexText`: decode converts raw bytes to lowercase hex text; encode
//!   converts hex text back to raw bytes plus one trailing NUL.  The
//!   encoded form is one byte longer than the original raw value.  This
//!   asymmetry is part of the on-disk format and must not be normalized.
//! - `Date`: 5 bytes with year/month/day/hour/minute/second bit-packed
//!   across byte boundaries.  Whole-second precision, naive local time.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::errors::{KdbError, Result};

/// A decoded field payload.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bytes(Vec<u8>),
    U16(u16),
    U32(u32),
    Text(String),
    Hex(String),
    Date(NaiveDateTime),
}

impl FieldValue {
    fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Bytes(_) => "bytes",
            FieldValue::U16(_) => "u16",
            FieldValue::U32(_) => "u32",
            FieldValue::Text(_) => "text",
            FieldValue::Hex(_) => "hex",
            FieldValue::Date(_) => "date",
        }
    }

    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            FieldValue::Bytes(v) => Ok(v),
            other => Err(type_mismatch("bytes", &other)),
        }
    }

    pub fn into_u16(self) -> Result<u16> {
        match self {
            FieldValue::U16(v) => Ok(v),
            other => Err(type_mismatch("u16", &other)),
        }
    }

    pub fn into_u32(self) -> Result<u32> {
        match self {
            FieldValue::U32(v) => Ok(v),
            other => Err(type_mismatch("u32", &other)),
        }
    }

    pub fn into_text(self) -> Result<String> {
        match self {
            FieldValue::Text(v) => Ok(v),
            other => Err(type_mismatch("text", &other)),
        }
    }

    pub fn into_hex(self) -> Result<String> {
        match self {
            FieldValue::Hex(v) => Ok(v),
            other => Err(type_mismatch("hex", &other)),
        }
    }

    pub fn into_date(self) -> Result<NaiveDateTime> {
        match self {
            FieldValue::Date(v) => Ok(v),
            other => Err(type_mismatch("date", &other)),
        }
    }
}

fn type_mismatch(expected: &str, got: &FieldValue) -> KdbError {
    KdbError::Structural(format!(
        "field value type mismatch: expected {expected}, got {}",
        got.type_name()
    ))
}

/// The marshaller applied to a field payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marshal {
    Pass,
    Short,
    Int,
    Text,
    HexText,
    Date,
}

impl Marshal {
    /// Decode a raw field payload into a typed value.
    pub fn decode(self, buf: &[u8]) -> Result<FieldValue> {
        match self {
            Marshal::Pass => Ok(FieldValue::Bytes(buf.to_vec())),
            Marshal::Short => {
                let bytes: [u8; 2] = buf.try_into().map_err(|_| {
                    KdbError::Structural(format!("u16 field must be 2 bytes, got {}", buf.len()))
                })?;
                Ok(FieldValue::U16(u16::from_le_bytes(bytes)))
            }
            Marshal::Int => {
                let bytes: [u8; 4] = buf.try_into().map_err(|_| {
                    KdbError::Structural(format!("u32 field must be 4 bytes, got {}", buf.len()))
                })?;
                Ok(FieldValue::U32(u32::from_le_bytes(bytes)))
            }
            Marshal::Text => {
                let mut end = buf.len();
                while end > 0 && buf[end - 1] == 0 {
                    end -= 1;
                }
                let text = std::str::from_utf8(&buf[..end])
                    .map_err(|e| KdbError::Structural(format!("string field is not UTF-8: {e}")))?;
                Ok(FieldValue::Text(text.to_string()))
            }
            Marshal::HexText => Ok(FieldValue::Hex(hex::encode(buf))),
            Marshal::Date => decode_date(buf).map(FieldValue::Date),
        }
    }

    /// Encode a typed value back into a raw field payload.
    pub fn encode(self, value: &FieldValue) -> Result<Vec<u8>> {
        match (self, value) {
            (Marshal::Pass, FieldValue::Bytes(v)) => Ok(v.clone()),
            (Marshal::Short, FieldValue::U16(v)) => Ok(v.to_le_bytes().to_vec()),
            (Marshal::Int, FieldValue::U32(v)) => Ok(v.to_le_bytes().to_vec()),
            (Marshal::Text, FieldValue::Text(v)) => {
                let mut out = v.as_bytes().to_vec();
                out.push(0);
                Ok(out)
            }
            (Marshal::HexText, FieldValue::Hex(v)) => {
                let mut out = hex::decode(v)
                    .map_err(|e| KdbError::Structural(format!("bad hex field value: {e}")))?;
                out.push(0);
                Ok(out)
            }
            (Marshal::Date, FieldValue::Date(v)) => Ok(encode_date(v).to_vec()),
            (_, other) => Err(KdbError::Structural(format!(
                "cannot encode {} value with {self:?} marshaller",
                other.type_name()
            ))),
        }
    }
}

/// Unpack a 5-byte packed date.
fn decode_date(buf: &[u8]) -> Result<NaiveDateTime> {
    let b: [u8; 5] = buf.try_into().map_err(|_| {
        KdbError::Structural(format!("date field must be 5 bytes, got {}", buf.len()))
    })?;
    let (d1, d2, d3, d4, d5) = (
        b[0] as u32,
        b[1] as u32,
        b[2] as u32,
        b[3] as u32,
        b[4] as u32,
    );

    let year = (d1 << 6) | (d2 >> 2);
    let month = ((d2 & 0x3) << 2) | (d3 >> 6);
    let day = (d3 >> 1) & 0x1F;
    let hour = ((d3 & 0x1) << 4) | (d4 >> 4);
    let minute = ((d4 & 0xF) << 2) | (d5 >> 6);
    let second = d5 & 0x3F;

    NaiveDate::from_ymd_opt(year as i32, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .ok_or_else(|| {
            KdbError::Structural(format!(
                "invalid packed date {year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
            ))
        })
}

/// Pack a datetime into the 5-byte on-disk form, the exact inverse of
/// `decode_date`.  Each derived byte is masked to 8 bits.
fn encode_date(value: &NaiveDateTime) -> [u8; 5] {
    let y = value.year() as u32;
    let mon = value.month();
    let d = value.day();
    let h = value.hour();
    let min = value.minute();
    let s = value.second();

    [
        ((y >> 6) & 0x3F) as u8,
        (((y & 0x3F) << 2) | ((mon >> 2) & 0x3)) as u8,
        (((mon & 0x3) << 6) | ((d & 0x1F) << 1) | ((h >> 4) & 0x1)) as u8,
        (((h & 0xF) << 4) | ((min >> 2) & 0xF)) as u8,
        (((min & 0x3) << 6) | (s & 0x3F)) as u8,
    ]
}
