// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Wire representation of variants.
//!
//! A [`WireVariant`] is a type tag plus a payload. Scalars travel as the raw
//! 8-byte union value; text travels as a [`Bstr`] and arrays as a
//! [`SafeArray`], both allocated in a [`ForeignHeap`]. The owner of a wire
//! value is responsible for clearing it exactly once; [`WireVariant::clear`]
//! is idempotent and `Drop` clears anything still held.

use std::sync::Arc;

use crate::error::ConversionError;
use crate::types::VarType;

use super::heap::{AllocKind, AllocationId, ForeignHeap};

// =============================================================================
// Allocation
// =============================================================================

/// A live allocation together with the heap that owns it.
#[derive(Debug)]
struct Allocation {
    id: AllocationId,
    heap: Arc<dyn ForeignHeap>,
}

impl Allocation {
    fn new(heap: &Arc<dyn ForeignHeap>, kind: AllocKind, bytes: usize) -> Self {
        Self {
            id: heap.allocate(kind, bytes),
            heap: Arc::clone(heap),
        }
    }

    fn release(self) -> bool {
        self.heap.free(self.id)
    }
}

// =============================================================================
// Bstr
// =============================================================================

/// A length-prefixed UTF-16 string allocated in a foreign heap.
#[derive(Debug)]
pub struct Bstr {
    units: Vec<u16>,
    allocation: Option<Allocation>,
}

impl Bstr {
    /// Allocates a string holding `text`.
    pub fn alloc(heap: &Arc<dyn ForeignHeap>, text: &str) -> Self {
        Self::from_units(heap, text.encode_utf16().collect())
    }

    /// Allocates a string holding raw UTF-16 code units.
    pub fn from_units(heap: &Arc<dyn ForeignHeap>, units: Vec<u16>) -> Self {
        // Length prefix plus terminator.
        let bytes = 4 + units.len() * 2 + 2;
        Self {
            units,
            allocation: Some(Allocation::new(heap, AllocKind::String, bytes)),
        }
    }

    /// Returns the code units.
    pub fn units(&self) -> &[u16] {
        &self.units
    }

    /// Copies the text into owned storage.
    pub fn to_string_checked(&self) -> Result<String, ConversionError> {
        if self.is_freed() {
            return Err(ConversionError::Cleared);
        }
        String::from_utf16(&self.units).map_err(|e| ConversionError::InvalidText {
            message: e.to_string(),
        })
    }

    /// Frees the allocation. Returns `true` only for the call that freed it.
    pub fn free(&mut self) -> bool {
        match self.allocation.take() {
            Some(allocation) => allocation.release(),
            None => false,
        }
    }

    /// Returns `true` once freed.
    pub fn is_freed(&self) -> bool {
        self.allocation.is_none()
    }
}

impl Drop for Bstr {
    fn drop(&mut self) {
        self.free();
    }
}

// =============================================================================
// SafeArray
// =============================================================================

/// Element storage of a [`SafeArray`].
#[derive(Debug)]
pub enum ArrayData {
    /// Fixed-size elements packed little-endian at the element stride.
    Bytes(Vec<u8>),
    /// One string allocation per element.
    Strings(Vec<Bstr>),
    /// Nested variants.
    Variants(Vec<WireVariant>),
}

impl ArrayData {
    fn len_for(&self, stride: usize) -> usize {
        match self {
            Self::Bytes(bytes) if stride > 0 => bytes.len() / stride,
            Self::Bytes(_) => 0,
            Self::Strings(strings) => strings.len(),
            Self::Variants(variants) => variants.len(),
        }
    }
}

/// A one-dimensional array descriptor with its bounds and element buffer.
#[derive(Debug)]
pub struct SafeArray {
    element_type: VarType,
    lower_bound: i32,
    upper_bound: i64,
    data: ArrayData,
    allocation: Option<Allocation>,
}

impl SafeArray {
    /// Creates a vector with lower bound 0 sized to `data`.
    pub fn create_vector(
        heap: &Arc<dyn ForeignHeap>,
        element_type: VarType,
        data: ArrayData,
    ) -> Result<Self, ConversionError> {
        let stride = element_stride(element_type)?;
        let count = data.len_for(stride) as i64;
        Self::with_bounds(heap, element_type, 0, count - 1, data)
    }

    /// Creates an array with explicit bounds.
    ///
    /// `upper_bound` may be `lower_bound - 1` for an empty array.
    pub fn with_bounds(
        heap: &Arc<dyn ForeignHeap>,
        element_type: VarType,
        lower_bound: i32,
        upper_bound: i64,
        data: ArrayData,
    ) -> Result<Self, ConversionError> {
        let stride = element_stride(element_type)?;
        let count = upper_bound - lower_bound as i64 + 1;
        if count < 0 {
            return Err(ConversionError::InvalidBounds {
                lower: lower_bound,
                upper: upper_bound,
            });
        }

        let consistent = match &data {
            ArrayData::Bytes(bytes) => {
                stride > 0 && bytes.len() == count as usize * stride
            }
            ArrayData::Strings(strings) => {
                element_type == VarType::BSTR && strings.len() == count as usize
            }
            ArrayData::Variants(variants) => {
                element_type == VarType::VARIANT && variants.len() == count as usize
            }
        };
        if !consistent {
            return Err(ConversionError::PayloadMismatch {
                vt: element_type.0,
                expected: count as usize * stride.max(1),
                actual: data.len_for(stride.max(1)),
            });
        }

        // Descriptor plus the element buffer.
        let bytes = 24 + count as usize * stride.max(8);
        Ok(Self {
            element_type,
            lower_bound,
            upper_bound,
            data,
            allocation: Some(Allocation::new(heap, AllocKind::Array, bytes)),
        })
    }

    /// Returns the element type tag.
    pub fn element_type(&self) -> VarType {
        self.element_type
    }

    /// Returns the declared lower bound.
    pub fn lower_bound(&self) -> i32 {
        self.lower_bound
    }

    /// Returns the declared upper bound.
    pub fn upper_bound(&self) -> i64 {
        self.upper_bound
    }

    /// Returns `upper - lower + 1`.
    pub fn element_count(&self) -> usize {
        (self.upper_bound - self.lower_bound as i64 + 1).max(0) as usize
    }

    /// Returns the element storage.
    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    /// Returns the raw bytes of element `index` (0-based from the lower bound).
    pub fn element_bytes(&self, index: usize) -> Result<&[u8], ConversionError> {
        let stride = element_stride(self.element_type)?;
        match &self.data {
            ArrayData::Bytes(bytes) => {
                let start = index * stride;
                bytes
                    .get(start..start + stride)
                    .ok_or(ConversionError::PayloadMismatch {
                        vt: self.element_type.0,
                        expected: start + stride,
                        actual: bytes.len(),
                    })
            }
            _ => Err(ConversionError::UnsupportedArrayType {
                vt: self.element_type.0,
            }),
        }
    }

    /// Frees the element allocations and the descriptor.
    ///
    /// Returns `true` only for the call that freed the descriptor.
    pub fn destroy(&mut self) -> bool {
        match &mut self.data {
            ArrayData::Strings(strings) => strings.iter_mut().for_each(|s| {
                s.free();
            }),
            ArrayData::Variants(variants) => variants.iter_mut().for_each(WireVariant::clear),
            ArrayData::Bytes(_) => {}
        }
        match self.allocation.take() {
            Some(allocation) => allocation.release(),
            None => false,
        }
    }

    /// Returns `true` once destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.allocation.is_none()
    }
}

impl Drop for SafeArray {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Returns the in-buffer byte width of an element type.
///
/// Strings and variants are stored out of line and report 0.
pub fn element_stride(element_type: VarType) -> Result<usize, ConversionError> {
    let stride = match element_type {
        VarType::I1 | VarType::UI1 => 1,
        VarType::I2 | VarType::UI2 | VarType::BOOL => 2,
        VarType::I4
        | VarType::UI4
        | VarType::INT
        | VarType::UINT
        | VarType::R4
        | VarType::ERROR => 4,
        VarType::I8 | VarType::UI8 | VarType::R8 | VarType::CY | VarType::DATE => 8,
        VarType::BSTR | VarType::VARIANT => 0,
        other => {
            return Err(ConversionError::UnsupportedArrayType { vt: other.0 });
        }
    };
    Ok(stride)
}

// =============================================================================
// WireVariant
// =============================================================================

/// Payload of a [`WireVariant`].
#[derive(Debug)]
pub enum WirePayload {
    /// No payload (`VT_EMPTY`, `VT_NULL`).
    None,
    /// The 8-byte union value of a scalar.
    Scalar(u64),
    /// A `VT_BSTR` payload.
    Text(Bstr),
    /// A `VT_ARRAY` payload.
    Array(SafeArray),
    /// The value was cleared.
    Cleared,
}

/// A tagged wire value.
#[derive(Debug)]
pub struct WireVariant {
    vt: VarType,
    payload: WirePayload,
}

impl WireVariant {
    /// Creates an empty value.
    pub fn empty() -> Self {
        Self {
            vt: VarType::EMPTY,
            payload: WirePayload::None,
        }
    }

    /// Creates a null value.
    pub fn null() -> Self {
        Self {
            vt: VarType::NULL,
            payload: WirePayload::None,
        }
    }

    /// Creates a scalar from its tag and raw union bits.
    pub fn scalar(vt: VarType, bits: u64) -> Self {
        Self {
            vt,
            payload: WirePayload::Scalar(bits),
        }
    }

    /// Creates a text value.
    pub fn text(text: Bstr) -> Self {
        Self {
            vt: VarType::BSTR,
            payload: WirePayload::Text(text),
        }
    }

    /// Creates an array value.
    pub fn array(array: SafeArray) -> Self {
        Self {
            vt: array.element_type().array_of(),
            payload: WirePayload::Array(array),
        }
    }

    /// Returns the type tag.
    pub fn vt(&self) -> VarType {
        self.vt
    }

    /// Returns the payload.
    pub fn payload(&self) -> &WirePayload {
        &self.payload
    }

    /// Returns `true` once cleared.
    pub fn is_cleared(&self) -> bool {
        matches!(self.payload, WirePayload::Cleared)
    }

    /// Frees any foreign payload and resets the tag to `VT_EMPTY`.
    pub fn clear(&mut self) {
        match std::mem::replace(&mut self.payload, WirePayload::Cleared) {
            WirePayload::Text(mut text) => {
                text.free();
            }
            WirePayload::Array(mut array) => {
                array.destroy();
            }
            WirePayload::None | WirePayload::Scalar(_) | WirePayload::Cleared => {}
        }
        self.vt = VarType::EMPTY;
    }
}

impl Drop for WireVariant {
    fn drop(&mut self) {
        self.clear();
    }
}

impl Default for WireVariant {
    fn default() -> Self {
        Self::empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
