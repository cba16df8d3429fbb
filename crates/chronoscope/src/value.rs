//! Arbitrary values attached to the capture stream alongside blocks/events
//! (spec §3 `ArbitraryValue`).
//!
//! Values are not exposed as a numbered closed set that every consumer must
//! grow to match. Instead `ValueType` enumerates the primitive wire
//! encodings and a value carries its own bytes, which keeps
//! `chronoscope::value(...)` additions here independent of the capture
//! reader's own versioning.

/// Wire-level primitive type of a single value (spec §3, §4.7 value records).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    Bool,
    Char,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    String,
}

impl ValueType {
    /// Fixed encoded size in bytes, or `None` for the variable-length
    /// `String` encoding (length carried by the record's own `size` field).
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            ValueType::Bool | ValueType::Char | ValueType::Int8 | ValueType::UInt8 => Some(1),
            ValueType::Int16 | ValueType::UInt16 => Some(2),
            ValueType::Int32 | ValueType::UInt32 | ValueType::Float => Some(4),
            ValueType::Int64 | ValueType::UInt64 | ValueType::Double => Some(8),
            ValueType::String => None,
        }
    }

    pub fn wire_tag(self) -> u8 {
        match self {
            ValueType::Bool => 0,
            ValueType::Char => 1,
            ValueType::Int8 => 2,
            ValueType::UInt8 => 3,
            ValueType::Int16 => 4,
            ValueType::UInt16 => 5,
            ValueType::Int32 => 6,
            ValueType::UInt32 => 7,
            ValueType::Int64 => 8,
            ValueType::UInt64 => 9,
            ValueType::Float => 10,
            ValueType::Double => 11,
            ValueType::String => 12,
        }
    }

    pub fn from_wire_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => ValueType::Bool,
            1 => ValueType::Char,
            2 => ValueType::Int8,
            3 => ValueType::UInt8,
            4 => ValueType::Int16,
            5 => ValueType::UInt16,
            6 => ValueType::Int32,
            7 => ValueType::UInt32,
            8 => ValueType::Int64,
            9 => ValueType::UInt64,
            10 => ValueType::Float,
            11 => ValueType::Double,
            12 => ValueType::String,
            _ => return None,
        })
    }
}

/// A single arbitrary-value sample, already encoded to its wire bytes so the
/// hot path (`chronoscope::value`) never allocates beyond this struct
/// itself.
///
/// `thread_id` is bookkeeping only: like a block record, a value record
/// never carries its own thread id on the wire, since it is already scoped
/// to the thread section it is written into.
#[derive(Clone, Debug, PartialEq)]
pub struct ArbitraryValue {
    pub timestamp: u64,
    /// Variable identity ("vin"): distinguishes independent value streams
    /// sharing one descriptor, e.g. the same counter sampled for several
    /// entities (spec §6.1 `store_value`).
    pub value_id: u64,
    pub descriptor: crate::descriptor::DescriptorId,
    pub thread_id: u32,
    pub value_type: ValueType,
    pub is_array: bool,
    pub bytes: Vec<u8>,
}

macro_rules! impl_from_numeric {
    ($ty:ty, $variant:ident, $to_bytes:ident) => {
        impl From<$ty> for (ValueType, Vec<u8>) {
            fn from(v: $ty) -> Self {
                (ValueType::$variant, v.$to_bytes().to_vec())
            }
        }
    };
}

impl_from_numeric!(i8, Int8, to_le_bytes);
impl_from_numeric!(u8, UInt8, to_le_bytes);
impl_from_numeric!(i16, Int16, to_le_bytes);
impl_from_numeric!(u16, UInt16, to_le_bytes);
impl_from_numeric!(i32, Int32, to_le_bytes);
impl_from_numeric!(u32, UInt32, to_le_bytes);
impl_from_numeric!(i64, Int64, to_le_bytes);
impl_from_numeric!(u64, UInt64, to_le_bytes);
impl_from_numeric!(f32, Float, to_le_bytes);
impl_from_numeric!(f64, Double, to_le_bytes);

impl From<bool> for (ValueType, Vec<u8>) {
    fn from(v: bool) -> Self {
        (ValueType::Bool, vec![v as u8])
    }
}

impl From<char> for (ValueType, Vec<u8>) {
    fn from(v: char) -> Self {
        (ValueType::Char, vec![v as u8])
    }
}

impl From<&str> for (ValueType, Vec<u8>) {
    fn from(v: &str) -> Self {
        let mut bytes = v.as_bytes().to_vec();
        bytes.push(0);
        (ValueType::String, bytes)
    }
}

/// Appends a value's wire bytes to `out` (spec §3/§4.7 value record):
/// timestamp, variable id, descriptor id, payload size, value-type tag,
/// `is_array` flag, then the payload itself.
pub fn encode_value(value: &ArbitraryValue, out: &mut Vec<u8>) {
    out.extend_from_slice(&value.timestamp.to_le_bytes());
    out.extend_from_slice(&value.value_id.to_le_bytes());
    out.extend_from_slice(&value.descriptor.0.to_le_bytes());
    out.extend_from_slice(&(value.bytes.len() as u16).to_le_bytes());
    out.push(value.value_type.wire_tag());
    out.push(value.is_array as u8);
    out.extend_from_slice(&value.bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_tag_round_trips() {
        for ty in [
            ValueType::Bool,
            ValueType::Char,
            ValueType::Int8,
            ValueType::UInt8,
            ValueType::Int16,
            ValueType::UInt16,
            ValueType::Int32,
            ValueType::UInt32,
            ValueType::Int64,
            ValueType::UInt64,
            ValueType::Float,
            ValueType::Double,
            ValueType::String,
        ] {
            assert_eq!(ValueType::from_wire_tag(ty.wire_tag()), Some(ty));
        }
    }

    #[test]
    fn string_values_are_nul_terminated() {
        let (ty, bytes): (ValueType, Vec<u8>) = "hi".into();
        assert_eq!(ty, ValueType::String);
        assert_eq!(bytes, b"hi\0");
    }

    fn value(value_type: ValueType, bytes: Vec<u8>) -> ArbitraryValue {
        ArbitraryValue {
            timestamp: 42,
            value_id: 7,
            descriptor: crate::descriptor::DescriptorId(1),
            thread_id: 9,
            value_type,
            is_array: false,
            bytes,
        }
    }

    #[test]
    fn encode_value_writes_timestamp_before_everything_else() {
        let mut out = Vec::new();
        encode_value(&value(ValueType::Int32, 42i32.to_le_bytes().to_vec()), &mut out);
        assert_eq!(u64::from_le_bytes(out[0..8].try_into().unwrap()), 42);
        assert_eq!(u64::from_le_bytes(out[8..16].try_into().unwrap()), 7);
    }

    #[test]
    fn encode_value_size_field_matches_the_payload_length() {
        let mut out = Vec::new();
        encode_value(&value(ValueType::Int32, 42i32.to_le_bytes().to_vec()), &mut out);
        let size = u16::from_le_bytes(out[20..22].try_into().unwrap());
        assert_eq!(size as usize, 4);
        assert_eq!(out.len(), 8 + 8 + 4 + 2 + 1 + 1 + 4);
    }
}
