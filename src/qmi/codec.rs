//! Generic TLV codec driven by element-info tables
//!
//! One encode walker and one decode walker handle every message in the
//! protocol. Per-message code only builds or plucks [`Value`] trees.
//!
//! Bounds policy:
//! - a declared variable-length count larger than the table's `max` aborts
//!   decoding with `BadPayload` before any element is read
//! - truncated input is `BadPayload`, never a panic
//! - unknown TLV types are skipped (firmware adds TLVs over time)
//! - a kind mismatch between a schema and a supplied value is a programmer
//!   error (`Error::Schema`)

use super::element::{ArrayKind, ElementInfo, ElementKind, LenWidth, TlvInfo, Value};
use crate::error::{Error, Result};

/// Encode one message body: values parallel to `schema`, `None` for an
/// absent optional TLV.
pub fn encode_tlvs(schema: &[TlvInfo], values: &[Option<Value>]) -> Result<Vec<u8>> {
    debug_assert_eq!(schema.len(), values.len());
    if schema.len() != values.len() {
        return Err(Error::Schema("value count does not match schema"));
    }

    let mut out = Vec::new();
    for (tlv, value) in schema.iter().zip(values) {
        let Some(value) = value else {
            if tlv.required {
                return Err(Error::Schema("required TLV missing at encode"));
            }
            continue;
        };

        let mut body = Vec::new();
        encode_element(&tlv.element, value, &mut body)?;
        if body.len() > u16::MAX as usize {
            return Err(Error::Schema("TLV value exceeds 64 KiB"));
        }

        out.push(tlv.tlv_type);
        out.extend_from_slice(&(body.len() as u16).to_le_bytes());
        out.extend_from_slice(&body);
    }
    Ok(out)
}

/// Decode one message body against `schema`
///
/// Returns one slot per schema entry, in schema order. Missing optional
/// TLVs decode to `None`; missing required TLVs are an error.
pub fn decode_tlvs(schema: &[TlvInfo], payload: &[u8]) -> Result<Vec<Option<Value>>> {
    let mut slots: Vec<Option<Value>> = vec![None; schema.len()];
    let mut cursor = Cursor::new(payload);

    while cursor.remaining() > 0 {
        let tlv_type = cursor.read_u8()?;
        let len = cursor.read_u16()? as usize;
        let body = cursor.read_slice(len)?;

        let Some(idx) = schema.iter().position(|t| t.tlv_type == tlv_type) else {
            log::debug!("Skipping unknown TLV type {:#04x} ({} bytes)", tlv_type, len);
            continue;
        };

        let mut body_cursor = Cursor::new(body);
        let value = decode_element(&schema[idx].element, &mut body_cursor)?;
        if body_cursor.remaining() > 0 {
            // Longer than the table describes: firmware from a newer build.
            log::debug!(
                "TLV {:#04x} carries {} undescribed trailing bytes",
                tlv_type,
                body_cursor.remaining()
            );
        }
        slots[idx] = Some(value);
    }

    for (tlv, slot) in schema.iter().zip(&slots) {
        if tlv.required && slot.is_none() {
            return Err(Error::BadPayload(format!(
                "missing required TLV {:#04x} ({})",
                tlv.tlv_type, tlv.element.name
            )));
        }
    }
    Ok(slots)
}

fn encode_element(info: &ElementInfo, value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match info.array {
        ArrayKind::None => encode_scalar(info, value, out),
        ArrayKind::Fixed(n) => {
            let items = value.as_array()?;
            if items.len() != n {
                return Err(Error::Schema("fixed array length mismatch"));
            }
            for item in items {
                encode_scalar(info, item, out)?;
            }
            Ok(())
        }
        ArrayKind::Variable { max, len_width } => {
            let items = value.as_array()?;
            if items.len() > max {
                return Err(Error::Schema("variable array exceeds capacity"));
            }
            match len_width {
                LenWidth::U8 => out.push(items.len() as u8),
                LenWidth::U16 => out.extend_from_slice(&(items.len() as u16).to_le_bytes()),
            }
            for item in items {
                encode_scalar(info, item, out)?;
            }
            Ok(())
        }
    }
}

fn encode_scalar(info: &ElementInfo, value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match info.kind {
        ElementKind::U8 => out.push(value.as_u8()?),
        ElementKind::U16 => out.extend_from_slice(&value.as_u16()?.to_le_bytes()),
        ElementKind::U32 => out.extend_from_slice(&value.as_u32()?.to_le_bytes()),
        ElementKind::U64 => out.extend_from_slice(&value.as_u64()?.to_le_bytes()),
        ElementKind::Struct(fields) => {
            let field_values = value.as_struct()?;
            if field_values.len() != fields.len() {
                return Err(Error::Schema("struct field count mismatch"));
            }
            for (field_info, field_value) in fields.iter().zip(field_values) {
                encode_element(field_info, field_value, out)?;
            }
        }
    }
    Ok(())
}

fn decode_element(info: &ElementInfo, cursor: &mut Cursor) -> Result<Value> {
    match info.array {
        ArrayKind::None => decode_scalar(info, cursor),
        ArrayKind::Fixed(n) => {
            let mut items = Vec::with_capacity(n);
            for _ in 0..n {
                items.push(decode_scalar(info, cursor)?);
            }
            Ok(Value::Array(items))
        }
        ArrayKind::Variable { max, len_width } => {
            let count = match len_width {
                LenWidth::U8 => cursor.read_u8()? as usize,
                LenWidth::U16 => cursor.read_u16()? as usize,
            };
            if count > max {
                return Err(Error::BadPayload(format!(
                    "{}: declared count {} exceeds capacity {}",
                    info.name, count, max
                )));
            }
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(decode_scalar(info, cursor)?);
            }
            Ok(Value::Array(items))
        }
    }
}

fn decode_scalar(info: &ElementInfo, cursor: &mut Cursor) -> Result<Value> {
    Ok(match info.kind {
        ElementKind::U8 => Value::U8(cursor.read_u8()?),
        ElementKind::U16 => Value::U16(cursor.read_u16()?),
        ElementKind::U32 => Value::U32(cursor.read_u32()?),
        ElementKind::U64 => Value::U64(cursor.read_u64()?),
        ElementKind::Struct(fields) => {
            let mut out = Vec::with_capacity(fields.len());
            for field_info in fields {
                out.push(decode_element(field_info, cursor)?);
            }
            Value::Struct(out)
        }
    })
}

/// Bounds-checked little-endian reader
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(Error::BadPayload(format!(
                "truncated: wanted {} bytes, {} left",
                len,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_slice(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        let b = self.read_slice(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let b = self.read_slice(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let b = self.read_slice(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }
}
