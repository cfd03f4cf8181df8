// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Owned, typed values exchanged with applications.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::ConversionError;
use crate::types::VarType;

// =============================================================================
// Variant
// =============================================================================

/// A decoded item value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Variant {
    /// No value.
    #[default]
    Empty,
    /// SQL-style null.
    Null,
    /// Boolean.
    Bool(bool),
    /// 8-bit signed integer.
    I8(i8),
    /// 8-bit unsigned integer.
    U8(u8),
    /// 16-bit signed integer.
    I16(i16),
    /// 16-bit unsigned integer.
    U16(u16),
    /// 32-bit signed integer.
    I32(i32),
    /// 32-bit unsigned integer.
    U32(u32),
    /// 64-bit signed integer.
    I64(i64),
    /// 64-bit unsigned integer.
    U64(u64),
    /// 32-bit float.
    F32(f32),
    /// 64-bit float.
    F64(f64),
    /// Currency in units of 1/10 000.
    Currency(i64),
    /// Date and time.
    Date(DateTime<Utc>),
    /// Text.
    String(String),
    /// Status code.
    Error(i32),
    /// One-dimensional array.
    Array(ArrayValue),
}

impl Variant {
    /// Returns the wire type tag for this value.
    pub fn var_type(&self) -> VarType {
        match self {
            Self::Empty => VarType::EMPTY,
            Self::Null => VarType::NULL,
            Self::Bool(_) => VarType::BOOL,
            Self::I8(_) => VarType::I1,
            Self::U8(_) => VarType::UI1,
            Self::I16(_) => VarType::I2,
            Self::U16(_) => VarType::UI2,
            Self::I32(_) => VarType::I4,
            Self::U32(_) => VarType::UI4,
            Self::I64(_) => VarType::I8,
            Self::U64(_) => VarType::UI8,
            Self::F32(_) => VarType::R4,
            Self::F64(_) => VarType::R8,
            Self::Currency(_) => VarType::CY,
            Self::Date(_) => VarType::DATE,
            Self::String(_) => VarType::BSTR,
            Self::Error(_) => VarType::ERROR,
            Self::Array(array) => array.element_type().array_of(),
        }
    }

    /// Returns a short type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::I8(_) => "i8",
            Self::U8(_) => "u8",
            Self::I16(_) => "i16",
            Self::U16(_) => "u16",
            Self::I32(_) => "i32",
            Self::U32(_) => "u32",
            Self::I64(_) => "i64",
            Self::U64(_) => "u64",
            Self::F32(_) => "f32",
            Self::F64(_) => "f64",
            Self::Currency(_) => "currency",
            Self::Date(_) => "date",
            Self::String(_) => "string",
            Self::Error(_) => "error",
            Self::Array(_) => "array",
        }
    }

    /// Returns `true` for `Empty`.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns the value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as i64 for any integer that fits.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I8(v) => Some(*v as i64),
            Self::U8(v) => Some(*v as i64),
            Self::I16(v) => Some(*v as i64),
            Self::U16(v) => Some(*v as i64),
            Self::I32(v) => Some(*v as i64),
            Self::U32(v) => Some(*v as i64),
            Self::I64(v) => Some(*v),
            Self::U64(v) => i64::try_from(*v).ok(),
            Self::Error(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Returns the value as f64 for any numeric type.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::F32(v) => Some(*v as f64),
            Self::F64(v) => Some(*v),
            Self::U64(v) => Some(*v as f64),
            Self::Currency(v) => Some(*v as f64 / 10_000.0),
            Self::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Returns the text, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the array, if this is one.
    pub fn as_array(&self) -> Option<&ArrayValue> {
        match self {
            Self::Array(v) => Some(v),
            _ => None,
        }
    }

    /// Converts to another scalar type.
    ///
    /// `VT_EMPTY` means "no conversion". Numeric conversions reject values
    /// that do not fit the target; text is parsed for numeric targets.
    pub fn coerce_to(&self, target: VarType) -> Result<Variant, ConversionError> {
        if target == VarType::EMPTY || target == self.var_type() {
            return Ok(self.clone());
        }
        if target.is_array() || matches!(self, Self::Array(_)) {
            return Err(ConversionError::coercion(self.type_name(), "array"));
        }

        let fail = || ConversionError::coercion(self.type_name(), target.name());

        if target == VarType::BSTR {
            return match self {
                Self::Empty | Self::Null => Err(fail()),
                other => Ok(Self::String(other.to_string())),
            };
        }

        if let Self::String(text) = self {
            let text = text.trim();
            return match target {
                VarType::BOOL => text
                    .parse::<bool>()
                    .map(Self::Bool)
                    .or_else(|_| text.parse::<f64>().map(|v| Self::Bool(v != 0.0)))
                    .map_err(|_| fail()),
                VarType::R4 | VarType::R8 => {
                    let v = text.parse::<f64>().map_err(|_| fail())?;
                    Self::F64(v).coerce_to(target)
                }
                _ => {
                    let v = text.parse::<i64>().map_err(|_| fail())?;
                    Self::I64(v).coerce_to(target)
                }
            };
        }

        if target == VarType::BOOL {
            return self.as_f64().map(|v| Self::Bool(v != 0.0)).ok_or_else(fail);
        }

        if target == VarType::R4 || target == VarType::R8 || target == VarType::CY {
            let v = self.as_f64().ok_or_else(fail)?;
            return Ok(match target {
                VarType::R4 => Self::F32(v as f32),
                VarType::R8 => Self::F64(v),
                _ => Self::Currency((v * 10_000.0).round() as i64),
            });
        }

        if target == VarType::DATE {
            return match self {
                Self::F64(v) => super::date::from_ole_date(*v).map(Self::Date),
                _ => Err(fail()),
            };
        }

        let whole = match self {
            Self::F32(v) => float_to_i128(*v as f64),
            Self::F64(v) => float_to_i128(*v),
            Self::Bool(v) => Some(if *v { -1 } else { 0 }),
            Self::U64(v) => Some(*v as i128),
            other => other.as_i64().map(|v| v as i128),
        }
        .ok_or_else(fail)?;

        let converted = match target {
            VarType::I1 => i8::try_from(whole).ok().map(Self::I8),
            VarType::UI1 => u8::try_from(whole).ok().map(Self::U8),
            VarType::I2 => i16::try_from(whole).ok().map(Self::I16),
            VarType::UI2 => u16::try_from(whole).ok().map(Self::U16),
            VarType::I4 | VarType::INT => i32::try_from(whole).ok().map(Self::I32),
            VarType::UI4 | VarType::UINT => u32::try_from(whole).ok().map(Self::U32),
            VarType::I8 => i64::try_from(whole).ok().map(Self::I64),
            VarType::UI8 => u64::try_from(whole).ok().map(Self::U64),
            VarType::ERROR => i32::try_from(whole).ok().map(Self::Error),
            _ => None,
        };
        converted.ok_or_else(fail)
    }
}

fn float_to_i128(value: f64) -> Option<i128> {
    if value.is_finite() {
        Some(value.round() as i128)
    } else {
        None
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, ""),
            Self::Null => write!(f, "null"),
            Self::Bool(v) => write!(f, "{}", v),
            Self::I8(v) => write!(f, "{}", v),
            Self::U8(v) => write!(f, "{}", v),
            Self::I16(v) => write!(f, "{}", v),
            Self::U16(v) => write!(f, "{}", v),
            Self::I32(v) => write!(f, "{}", v),
            Self::U32(v) => write!(f, "{}", v),
            Self::I64(v) => write!(f, "{}", v),
            Self::U64(v) => write!(f, "{}", v),
            Self::F32(v) => write!(f, "{}", v),
            Self::F64(v) => write!(f, "{}", v),
            Self::Currency(v) => write!(f, "{}", *v as f64 / 10_000.0),
            Self::Date(v) => write!(f, "{}", v.to_rfc3339()),
            Self::String(v) => write!(f, "{}", v),
            Self::Error(v) => write!(f, "0x{:08X}", *v as u32),
            Self::Array(v) => write!(f, "{}", v),
        }
    }
}

macro_rules! impl_from_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Variant {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

impl_from_scalar! {
    bool => Bool,
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    String => String,
    DateTime<Utc> => Date,
    ArrayValue => Array,
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

// =============================================================================
// ArrayValue
// =============================================================================

/// A typed one-dimensional array.
///
/// The element type survives even when the array is empty.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayValue {
    /// Booleans.
    Bool(Vec<bool>),
    /// 8-bit signed integers.
    I8(Vec<i8>),
    /// 8-bit unsigned integers.
    U8(Vec<u8>),
    /// 16-bit signed integers.
    I16(Vec<i16>),
    /// 16-bit unsigned integers.
    U16(Vec<u16>),
    /// 32-bit signed integers.
    I32(Vec<i32>),
    /// 32-bit unsigned integers.
    U32(Vec<u32>),
    /// 64-bit signed integers.
    I64(Vec<i64>),
    /// 64-bit unsigned integers.
    U64(Vec<u64>),
    /// 32-bit floats.
    F32(Vec<f32>),
    /// 64-bit floats.
    F64(Vec<f64>),
    /// Currency values.
    Currency(Vec<i64>),
    /// Dates.
    Date(Vec<DateTime<Utc>>),
    /// Strings.
    String(Vec<String>),
    /// Status codes.
    Error(Vec<i32>),
    /// Heterogeneous elements.
    Variant(Vec<Variant>),
}

impl ArrayValue {
    /// Returns the element type tag.
    pub fn element_type(&self) -> VarType {
        match self {
            Self::Bool(_) => VarType::BOOL,
            Self::I8(_) => VarType::I1,
            Self::U8(_) => VarType::UI1,
            Self::I16(_) => VarType::I2,
            Self::U16(_) => VarType::UI2,
            Self::I32(_) => VarType::I4,
            Self::U32(_) => VarType::UI4,
            Self::I64(_) => VarType::I8,
            Self::U64(_) => VarType::UI8,
            Self::F32(_) => VarType::R4,
            Self::F64(_) => VarType::R8,
            Self::Currency(_) => VarType::CY,
            Self::Date(_) => VarType::DATE,
            Self::String(_) => VarType::BSTR,
            Self::Error(_) => VarType::ERROR,
            Self::Variant(_) => VarType::VARIANT,
        }
    }

    /// Returns the number of elements.
    pub fn len(&self) -> usize {
        match self {
            Self::Bool(v) => v.len(),
            Self::I8(v) => v.len(),
            Self::U8(v) => v.len(),
            Self::I16(v) => v.len(),
            Self::U16(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::U32(v) => v.len(),
            Self::I64(v) | Self::Currency(v) => v.len(),
            Self::U64(v) => v.len(),
            Self::F32(v) => v.len(),
            Self::F64(v) => v.len(),
            Self::Date(v) => v.len(),
            Self::String(v) => v.len(),
            Self::Error(v) => v.len(),
            Self::Variant(v) => v.len(),
        }
    }

    /// Returns `true` when there are no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns element `index` as a scalar variant.
    pub fn get(&self, index: usize) -> Option<Variant> {
        match self {
            Self::Bool(v) => v.get(index).copied().map(Variant::Bool),
            Self::I8(v) => v.get(index).copied().map(Variant::I8),
            Self::U8(v) => v.get(index).copied().map(Variant::U8),
            Self::I16(v) => v.get(index).copied().map(Variant::I16),
            Self::U16(v) => v.get(index).copied().map(Variant::U16),
            Self::I32(v) => v.get(index).copied().map(Variant::I32),
            Self::U32(v) => v.get(index).copied().map(Variant::U32),
            Self::I64(v) => v.get(index).copied().map(Variant::I64),
            Self::U64(v) => v.get(index).copied().map(Variant::U64),
            Self::F32(v) => v.get(index).copied().map(Variant::F32),
            Self::F64(v) => v.get(index).copied().map(Variant::F64),
            Self::Currency(v) => v.get(index).copied().map(Variant::Currency),
            Self::Date(v) => v.get(index).copied().map(Variant::Date),
            Self::String(v) => v.get(index).cloned().map(Variant::String),
            Self::Error(v) => v.get(index).copied().map(Variant::Error),
            Self::Variant(v) => v.get(index).cloned(),
        }
    }
}

impl fmt::Display for ArrayValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for index in 0..self.len() {
            if index > 0 {
                write!(f, ", ")?;
            }
            if let Some(element) = self.get(index) {
                write!(f, "{}", element)?;
            }
        }
        write!(f, "]")
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_type() {
        assert_eq!(Variant::F64(1.0).var_type(), VarType::R8);
        assert_eq!(Variant::from("x").var_type(), VarType::BSTR);
        assert_eq!(
            Variant::Array(ArrayValue::I16(vec![])).var_type(),
            VarType::I2.array_of()
        );
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Variant::U16(7).as_i64(), Some(7));
        assert_eq!(Variant::U64(u64::MAX).as_i64(), None);
        assert_eq!(Variant::Currency(12_345).as_f64(), Some(1.2345));
        assert_eq!(Variant::from("abc").as_str(), Some("abc"));
        assert!(Variant::default().is_empty());
    }

    #[test]
    fn test_coerce_numeric() {
        assert_eq!(Variant::F64(41.6).coerce_to(VarType::I4).unwrap(), Variant::I32(42));
        assert_eq!(Variant::I32(300).coerce_to(VarType::I2).unwrap(), Variant::I16(300));
        assert!(Variant::I32(300).coerce_to(VarType::UI1).is_err());
        assert!(Variant::I32(-1).coerce_to(VarType::UI4).is_err());
        assert_eq!(Variant::I32(0).coerce_to(VarType::BOOL).unwrap(), Variant::Bool(false));
        assert_eq!(Variant::Bool(true).coerce_to(VarType::I2).unwrap(), Variant::I16(-1));
    }

    #[test]
    fn test_coerce_text() {
        assert_eq!(
            Variant::from(" 12.5 ").coerce_to(VarType::R8).unwrap(),
            Variant::F64(12.5)
        );
        assert_eq!(
            Variant::I32(5).coerce_to(VarType::BSTR).unwrap(),
            Variant::from("5")
        );
        assert!(Variant::from("abc").coerce_to(VarType::I4).is_err());
        assert_eq!(
            Variant::from("true").coerce_to(VarType::BOOL).unwrap(),
            Variant::Bool(true)
        );
    }

    #[test]
    fn test_coerce_native_is_identity() {
        let value = Variant::Array(ArrayValue::F64(vec![1.0, 2.0]));
        assert_eq!(value.coerce_to(VarType::EMPTY).unwrap(), value);
        assert!(value.coerce_to(VarType::I4).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Variant::Array(ArrayValue::I32(vec![1, 2, 3])).to_string(), "[1, 2, 3]");
        assert_eq!(Variant::Error(-2147467259).to_string(), "0x80004005");
    }
}
