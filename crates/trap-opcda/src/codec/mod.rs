// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Value codec.
//!
//! Converts between the self-describing wire value and [`Variant`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   encode(&Variant, heap)   ┌─────────────────────────┐
//! │   Variant    │ ─────────────────────────▶ │      WireVariant        │
//! │ (owned, Rust │                            │  vt + Scalar(u64)       │
//! │    types)    │ ◀───────────────────────── │     | Text(Bstr)        │
//! └──────────────┘   decode(WireVariant)      │     | Array(SafeArray)  │
//!                    copies, then frees       └───────────┬─────────────┘
//!                                                         │ alloc / free
//!                                              ┌──────────▼─────────────┐
//!                                              │      ForeignHeap       │
//!                                              └────────────────────────┘
//! ```
//!
//! Decoding takes the wire value by value: the payload is copied into owned
//! storage and every foreign allocation is freed exactly once, on success and
//! on error alike.
//!
//! # Examples
//!
//! ```
//! use trap_opcda::codec::{decode, encode, TrackingHeap, Variant};
//!
//! let heap = TrackingHeap::shared();
//! let wire = encode(&Variant::from("pump-1"), &heap).unwrap();
//! assert_eq!(decode(wire).unwrap(), Variant::from("pump-1"));
//! assert_eq!(heap.stats().live_allocations, 0);
//! ```

mod date;
mod heap;
mod variant;
mod wire;

pub use date::{from_ole_date, to_ole_date};
pub use heap::{task_heap, AllocKind, AllocationId, ForeignHeap, HeapStatsSnapshot, TrackingHeap};
pub use variant::{ArrayValue, Variant};
pub use wire::{element_stride, ArrayData, Bstr, SafeArray, WirePayload, WireVariant};

use std::sync::Arc;

use crate::error::ConversionError;
use crate::types::VarType;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, ConversionError>;

// =============================================================================
// Decoding
// =============================================================================

/// Decodes a wire value and frees its payload.
pub fn decode(mut wire: WireVariant) -> CodecResult<Variant> {
    let result = decode_borrowed(&wire);
    wire.clear();
    result
}

/// Decodes every value of a batch, freeing each one.
pub fn decode_all(values: Vec<WireVariant>) -> Vec<CodecResult<Variant>> {
    values.into_iter().map(decode).collect()
}

/// Decodes a wire value the caller does not own; nothing is freed.
pub fn decode_borrowed(wire: &WireVariant) -> CodecResult<Variant> {
    let vt = wire.vt();
    match wire.payload() {
        WirePayload::Cleared => Err(ConversionError::Cleared),
        WirePayload::None => match vt {
            VarType::EMPTY => Ok(Variant::Empty),
            VarType::NULL => Ok(Variant::Null),
            other => Err(ConversionError::PayloadMismatch {
                vt: other.0,
                expected: 8,
                actual: 0,
            }),
        },
        WirePayload::Scalar(bits) => decode_scalar(vt, *bits),
        WirePayload::Text(text) if vt == VarType::BSTR => {
            text.to_string_checked().map(Variant::String)
        }
        WirePayload::Array(array) if vt.is_array() => decode_array(array).map(Variant::Array),
        _ => Err(ConversionError::UnknownVarType { vt: vt.0 }),
    }
}

fn decode_scalar(vt: VarType, bits: u64) -> CodecResult<Variant> {
    let value = match vt {
        VarType::EMPTY => Variant::Empty,
        VarType::NULL => Variant::Null,
        VarType::BOOL => Variant::Bool(bits as u16 as i16 != 0),
        VarType::I1 => Variant::I8(bits as u8 as i8),
        VarType::UI1 => Variant::U8(bits as u8),
        VarType::I2 => Variant::I16(bits as u16 as i16),
        VarType::UI2 => Variant::U16(bits as u16),
        VarType::I4 | VarType::INT => Variant::I32(bits as u32 as i32),
        VarType::UI4 | VarType::UINT => Variant::U32(bits as u32),
        VarType::I8 => Variant::I64(bits as i64),
        VarType::UI8 => Variant::U64(bits),
        VarType::R4 => Variant::F32(f32::from_bits(bits as u32)),
        VarType::R8 => Variant::F64(f64::from_bits(bits)),
        VarType::CY => Variant::Currency(bits as i64),
        VarType::DATE => Variant::Date(from_ole_date(f64::from_bits(bits))?),
        VarType::ERROR => Variant::Error(bits as u32 as i32),
        other => return Err(ConversionError::UnknownVarType { vt: other.0 }),
    };
    Ok(value)
}

fn decode_array(array: &SafeArray) -> CodecResult<ArrayValue> {
    let count = array.element_count();
    let element_type = array.element_type();

    match array.data() {
        ArrayData::Strings(strings) => {
            if element_type != VarType::BSTR || strings.len() != count {
                return Err(ConversionError::PayloadMismatch {
                    vt: element_type.0,
                    expected: count,
                    actual: strings.len(),
                });
            }
            strings
                .iter()
                .map(Bstr::to_string_checked)
                .collect::<CodecResult<Vec<_>>>()
                .map(ArrayValue::String)
        }
        ArrayData::Variants(variants) => {
            if element_type != VarType::VARIANT || variants.len() != count {
                return Err(ConversionError::PayloadMismatch {
                    vt: element_type.0,
                    expected: count,
                    actual: variants.len(),
                });
            }
            variants
                .iter()
                .map(decode_borrowed)
                .collect::<CodecResult<Vec<_>>>()
                .map(ArrayValue::Variant)
        }
        ArrayData::Bytes(_) => decode_packed(array, element_type, count),
    }
}

fn decode_packed(array: &SafeArray, element_type: VarType, count: usize) -> CodecResult<ArrayValue> {
    macro_rules! collect {
        ($variant:ident, $convert:expr) => {{
            let mut out = Vec::with_capacity(count);
            for index in 0..count {
                let bytes = array.element_bytes(index)?;
                out.push($convert(bytes)?);
            }
            ArrayValue::$variant(out)
        }};
    }

    let value = match element_type {
        VarType::BOOL => collect!(Bool, |b: &[u8]| Ok::<_, ConversionError>(
            i16::from_le_bytes([b[0], b[1]]) != 0
        )),
        VarType::I1 => collect!(I8, |b: &[u8]| Ok::<_, ConversionError>(b[0] as i8)),
        VarType::UI1 => collect!(U8, |b: &[u8]| Ok::<_, ConversionError>(b[0])),
        VarType::I2 => collect!(I16, |b: &[u8]| Ok::<_, ConversionError>(
            i16::from_le_bytes([b[0], b[1]])
        )),
        VarType::UI2 => collect!(U16, |b: &[u8]| Ok::<_, ConversionError>(
            u16::from_le_bytes([b[0], b[1]])
        )),
        VarType::I4 | VarType::INT => collect!(I32, |b: &[u8]| Ok::<_, ConversionError>(
            i32::from_le_bytes(le4(b))
        )),
        VarType::UI4 | VarType::UINT => collect!(U32, |b: &[u8]| Ok::<_, ConversionError>(
            u32::from_le_bytes(le4(b))
        )),
        VarType::ERROR => collect!(Error, |b: &[u8]| Ok::<_, ConversionError>(
            i32::from_le_bytes(le4(b))
        )),
        VarType::R4 => collect!(F32, |b: &[u8]| Ok::<_, ConversionError>(
            f32::from_le_bytes(le4(b))
        )),
        VarType::I8 => collect!(I64, |b: &[u8]| Ok::<_, ConversionError>(
            i64::from_le_bytes(le8(b))
        )),
        VarType::UI8 => collect!(U64, |b: &[u8]| Ok::<_, ConversionError>(
            u64::from_le_bytes(le8(b))
        )),
        VarType::CY => collect!(Currency, |b: &[u8]| Ok::<_, ConversionError>(
            i64::from_le_bytes(le8(b))
        )),
        VarType::R8 => collect!(F64, |b: &[u8]| Ok::<_, ConversionError>(
            f64::from_le_bytes(le8(b))
        )),
        VarType::DATE => collect!(Date, |b: &[u8]| from_ole_date(f64::from_le_bytes(le8(b)))),
        other => return Err(ConversionError::UnsupportedArrayType { vt: other.0 }),
    };
    Ok(value)
}

fn le4(bytes: &[u8]) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&bytes[..4]);
    out
}

fn le8(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&bytes[..8]);
    out
}

// =============================================================================
// Encoding
// =============================================================================

/// Encodes a value, allocating text and array payloads in `heap`.
pub fn encode(value: &Variant, heap: &Arc<dyn ForeignHeap>) -> CodecResult<WireVariant> {
    let wire = match value {
        Variant::Empty => WireVariant::empty(),
        Variant::Null => WireVariant::null(),
        Variant::Bool(v) => WireVariant::scalar(VarType::BOOL, bool_bits(*v) as u16 as u64),
        Variant::I8(v) => WireVariant::scalar(VarType::I1, *v as u8 as u64),
        Variant::U8(v) => WireVariant::scalar(VarType::UI1, *v as u64),
        Variant::I16(v) => WireVariant::scalar(VarType::I2, *v as u16 as u64),
        Variant::U16(v) => WireVariant::scalar(VarType::UI2, *v as u64),
        Variant::I32(v) => WireVariant::scalar(VarType::I4, *v as u32 as u64),
        Variant::U32(v) => WireVariant::scalar(VarType::UI4, *v as u64),
        Variant::I64(v) => WireVariant::scalar(VarType::I8, *v as u64),
        Variant::U64(v) => WireVariant::scalar(VarType::UI8, *v),
        Variant::F32(v) => WireVariant::scalar(VarType::R4, v.to_bits() as u64),
        Variant::F64(v) => WireVariant::scalar(VarType::R8, v.to_bits()),
        Variant::Currency(v) => WireVariant::scalar(VarType::CY, *v as u64),
        Variant::Date(v) => WireVariant::scalar(VarType::DATE, to_ole_date(v).to_bits()),
        Variant::Error(v) => WireVariant::scalar(VarType::ERROR, *v as u32 as u64),
        Variant::String(v) => WireVariant::text(Bstr::alloc(heap, v)),
        Variant::Array(array) => WireVariant::array(encode_array(array, heap)?),
    };
    Ok(wire)
}

/// Encodes a batch. On failure every value encoded so far is freed.
pub fn encode_all(
    values: &[Variant],
    heap: &Arc<dyn ForeignHeap>,
) -> CodecResult<Vec<WireVariant>> {
    values.iter().map(|value| encode(value, heap)).collect()
}

fn bool_bits(value: bool) -> i16 {
    if value {
        -1
    } else {
        0
    }
}

fn encode_array(array: &ArrayValue, heap: &Arc<dyn ForeignHeap>) -> CodecResult<SafeArray> {
    fn pack<T: Copy, const N: usize>(values: &[T], to_bytes: impl Fn(T) -> [u8; N]) -> ArrayData {
        let mut bytes = Vec::with_capacity(values.len() * N);
        for value in values {
            bytes.extend_from_slice(&to_bytes(*value));
        }
        ArrayData::Bytes(bytes)
    }

    let data = match array {
        ArrayValue::Bool(v) => pack(v, |x| bool_bits(x).to_le_bytes()),
        ArrayValue::I8(v) => pack(v, |x| x.to_le_bytes()),
        ArrayValue::U8(v) => pack(v, |x| x.to_le_bytes()),
        ArrayValue::I16(v) => pack(v, |x| x.to_le_bytes()),
        ArrayValue::U16(v) => pack(v, |x| x.to_le_bytes()),
        ArrayValue::I32(v) | ArrayValue::Error(v) => pack(v, |x| x.to_le_bytes()),
        ArrayValue::U32(v) => pack(v, |x| x.to_le_bytes()),
        ArrayValue::I64(v) | ArrayValue::Currency(v) => pack(v, |x| x.to_le_bytes()),
        ArrayValue::U64(v) => pack(v, |x| x.to_le_bytes()),
        ArrayValue::F32(v) => pack(v, |x| x.to_le_bytes()),
        ArrayValue::F64(v) => pack(v, |x| x.to_le_bytes()),
        ArrayValue::Date(v) => {
            let dates: Vec<f64> = v.iter().map(to_ole_date).collect();
            pack(&dates, |x| x.to_le_bytes())
        }
        ArrayValue::String(v) => {
            ArrayData::Strings(v.iter().map(|s| Bstr::alloc(heap, s)).collect())
        }
        ArrayValue::Variant(v) => ArrayData::Variants(
            v.iter()
                .map(|element| encode(element, heap))
                .collect::<CodecResult<Vec<_>>>()?,
        ),
    };

    SafeArray::create_vector(heap, array.element_type(), data)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn round_trip(value: Variant) {
        let heap = TrackingHeap::shared();
        let wire = encode(&value, &heap).unwrap();
        assert_eq!(wire.vt(), value.var_type(), "tag for {:?}", value);
        let decoded = decode(wire).unwrap();
        assert_eq!(decoded, value);

        let stats = heap.stats();
        assert_eq!(stats.live_allocations, 0, "leak for {:?}", value);
        assert_eq!(stats.invalid_frees, 0);
    }

    #[test]
    fn test_scalar_round_trip() {
        let date = Utc.with_ymd_and_hms(2023, 7, 1, 12, 30, 0).unwrap();
        for value in [
            Variant::Empty,
            Variant::Null,
            Variant::Bool(true),
            Variant::Bool(false),
            Variant::I8(i8::MIN),
            Variant::U8(u8::MAX),
            Variant::I16(-1),
            Variant::U16(0),
            Variant::I32(i32::MIN),
            Variant::U32(u32::MAX),
            Variant::I64(i64::MAX),
            Variant::U64(u64::MAX),
            Variant::F32(-0.5),
            Variant::F64(f64::MAX),
            Variant::Currency(-12_345),
            Variant::Date(date),
            Variant::Error(hresult_fail()),
            Variant::from(""),
            Variant::from("Tank level Ω"),
        ] {
            round_trip(value);
        }
    }

    #[test]
    fn test_array_round_trip() {
        let date = Utc.with_ymd_and_hms(1999, 12, 31, 23, 59, 59).unwrap();
        for array in [
            ArrayValue::Bool(vec![true, false]),
            ArrayValue::I8(vec![i8::MIN, 0, i8::MAX]),
            ArrayValue::U8(vec![]),
            ArrayValue::I16(vec![-300, 300]),
            ArrayValue::U16(vec![u16::MAX]),
            ArrayValue::I32(vec![]),
            ArrayValue::U32(vec![1, 2, 3]),
            ArrayValue::I64(vec![i64::MIN]),
            ArrayValue::U64(vec![u64::MAX, 0]),
            ArrayValue::F32(vec![1.5, -2.25]),
            ArrayValue::F64(vec![123.45, f64::MIN]),
            ArrayValue::Currency(vec![10_000]),
            ArrayValue::Date(vec![date]),
            ArrayValue::String(vec!["".into(), "abc".into()]),
            ArrayValue::String(vec![]),
            ArrayValue::Error(vec![0, -1]),
            ArrayValue::Variant(vec![Variant::I32(1), Variant::from("two")]),
        ] {
            round_trip(Variant::Array(array));
        }
    }

    #[test]
    fn test_int_and_uint_decode_as_32_bit() {
        let decoded = decode(WireVariant::scalar(VarType::INT, (-7i32) as u32 as u64)).unwrap();
        assert_eq!(decoded, Variant::I32(-7));
        let decoded = decode(WireVariant::scalar(VarType::UINT, 9)).unwrap();
        assert_eq!(decoded, Variant::U32(9));
    }

    #[test]
    fn test_bool_nonzero_is_true() {
        let decoded = decode(WireVariant::scalar(VarType::BOOL, 1)).unwrap();
        assert_eq!(decoded, Variant::Bool(true));
    }

    #[test]
    fn test_unknown_tag_is_error() {
        let result = decode(WireVariant::scalar(VarType(0x0049), 0));
        assert_eq!(result, Err(ConversionError::UnknownVarType { vt: 0x0049 }));
    }

    #[test]
    fn test_array_uses_declared_bounds() {
        let heap = TrackingHeap::shared();
        let mut bytes = Vec::new();
        for v in [10i32, 20, 30] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let array =
            SafeArray::with_bounds(&heap, VarType::I4, 1, 3, ArrayData::Bytes(bytes)).unwrap();
        let decoded = decode(WireVariant::array(array)).unwrap();
        assert_eq!(decoded, Variant::Array(ArrayValue::I32(vec![10, 20, 30])));
        assert_eq!(heap.stats().live_allocations, 0);
    }

    #[test]
    fn test_failed_decode_still_frees() {
        let heap = TrackingHeap::shared();
        let strings = vec![
            Bstr::alloc(&heap, "ok"),
            Bstr::from_units(&heap, vec![0xDC00]),
        ];
        let array =
            SafeArray::create_vector(&heap, VarType::BSTR, ArrayData::Strings(strings)).unwrap();
        assert_eq!(heap.stats().live_allocations, 3);

        let result = decode(WireVariant::array(array));
        assert!(matches!(result, Err(ConversionError::InvalidText { .. })));

        let stats = heap.stats();
        assert_eq!(stats.live_allocations, 0);
        assert_eq!(stats.frees, 3);
        assert_eq!(stats.invalid_frees, 0);
    }

    #[test]
    fn test_bad_date_is_error() {
        let result = decode(WireVariant::scalar(VarType::DATE, f64::NAN.to_bits()));
        assert!(matches!(result, Err(ConversionError::DateOutOfRange { .. })));
    }

    fn hresult_fail() -> i32 {
        crate::types::hresult::E_FAIL
    }
}
