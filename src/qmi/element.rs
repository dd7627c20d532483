//! Element-info schema types for QMI marshaling
//!
//! A QMI message body is a sequence of TLVs. The layout of each TLV's value
//! is described once, as data, by an element-info table: an ordered slice of
//! [`ElementInfo`] descriptors. The generic codec in [`super::codec`] walks
//! these tables to encode and decode message structures, so no message ever
//! carries hand-written marshaling code.
//!
//! Tables are ordinary Rust slices; the slice bound marks the table end.

use crate::error::{Error, Result};

/// Scalar or nested layout of one element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    U8,
    U16,
    U32,
    U64,
    /// Nested structure, laid out by a child element-info table
    Struct(&'static [ElementInfo]),
}

/// Width of the on-wire count field preceding a variable-length array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LenWidth {
    U8,
    U16,
}

/// Array shape of one element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayKind {
    /// A single value
    None,
    /// Exactly `n` consecutive values, no count on the wire
    Fixed(usize),
    /// A count field followed by that many values. `max` is the capacity of
    /// the destination; a larger declared count is a protocol error.
    Variable { max: usize, len_width: LenWidth },
}

/// One element of a TLV value layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementInfo {
    pub name: &'static str,
    pub kind: ElementKind,
    pub array: ArrayKind,
}

/// One TLV of a message
#[derive(Debug, Clone, Copy)]
pub struct TlvInfo {
    pub tlv_type: u8,
    pub required: bool,
    pub element: ElementInfo,
}

/// Decoded (or to-be-encoded) value tree
///
/// `Struct` fields appear in element-table order; `Array` holds the items of
/// a fixed or variable array.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Array(Vec<Value>),
    Struct(Vec<Value>),
}

impl Value {
    /// Build an `Array` of `U8` items from a byte slice
    pub fn bytes(data: &[u8]) -> Value {
        Value::Array(data.iter().map(|&b| Value::U8(b)).collect())
    }

    pub fn as_u8(&self) -> Result<u8> {
        match self {
            Value::U8(v) => Ok(*v),
            _ => Err(Error::Schema("expected u8")),
        }
    }

    pub fn as_u16(&self) -> Result<u16> {
        match self {
            Value::U16(v) => Ok(*v),
            _ => Err(Error::Schema("expected u16")),
        }
    }

    pub fn as_u32(&self) -> Result<u32> {
        match self {
            Value::U32(v) => Ok(*v),
            _ => Err(Error::Schema("expected u32")),
        }
    }

    pub fn as_u64(&self) -> Result<u64> {
        match self {
            Value::U64(v) => Ok(*v),
            _ => Err(Error::Schema("expected u64")),
        }
    }

    pub fn as_array(&self) -> Result<&[Value]> {
        match self {
            Value::Array(items) => Ok(items),
            _ => Err(Error::Schema("expected array")),
        }
    }

    pub fn as_struct(&self) -> Result<&[Value]> {
        match self {
            Value::Struct(fields) => Ok(fields),
            _ => Err(Error::Schema("expected struct")),
        }
    }

    /// Collect an `Array` of `U8` items back into bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.as_array()?.iter().map(|v| v.as_u8()).collect()
    }
}
