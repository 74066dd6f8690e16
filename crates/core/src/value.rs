//! Scalar values that saga instances can be correlated by.
//!
//! Only a fixed set of scalar kinds is correlatable: booleans, 16/32/64-bit
//! integers, UUIDs and strings. Anything else is rejected at compile time (the
//! accessor bound is not implemented) or at registration time (a rule whose
//! extracted value can never be converted to the property's kind).

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::id::SagaId;

/// Kind of a correlatable scalar.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    Bool,
    I16,
    I32,
    I64,
    Uuid,
    String,
}

impl ScalarKind {
    fn is_integer(self) -> bool {
        matches!(self, ScalarKind::I16 | ScalarKind::I32 | ScalarKind::I64)
    }

    /// Whether some value of kind `self` can be converted to kind `target`.
    ///
    /// Strings parse into any kind, every kind formats into a string, and
    /// integers convert between widths (range-checked per value).
    pub fn can_coerce_to(self, target: ScalarKind) -> bool {
        self == target
            || self == ScalarKind::String
            || target == ScalarKind::String
            || (self.is_integer() && target.is_integer())
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarKind::Bool => "bool",
            ScalarKind::I16 => "i16",
            ScalarKind::I32 => "i32",
            ScalarKind::I64 => "i64",
            ScalarKind::Uuid => "uuid",
            ScalarKind::String => "string",
        };
        f.write_str(name)
    }
}

/// A concrete correlation value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CorrelationValue {
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    Uuid(Uuid),
    String(String),
}

impl CorrelationValue {
    pub fn kind(&self) -> ScalarKind {
        match self {
            CorrelationValue::Bool(_) => ScalarKind::Bool,
            CorrelationValue::I16(_) => ScalarKind::I16,
            CorrelationValue::I32(_) => ScalarKind::I32,
            CorrelationValue::I64(_) => ScalarKind::I64,
            CorrelationValue::Uuid(_) => ScalarKind::Uuid,
            CorrelationValue::String(_) => ScalarKind::String,
        }
    }

    /// Whether this is the default of its kind (`false`, `0`, nil UUID, `""`).
    pub fn is_unset(&self) -> bool {
        match self {
            CorrelationValue::Bool(v) => !*v,
            CorrelationValue::I16(v) => *v == 0,
            CorrelationValue::I32(v) => *v == 0,
            CorrelationValue::I64(v) => *v == 0,
            CorrelationValue::Uuid(v) => v.is_nil(),
            CorrelationValue::String(v) => v.is_empty(),
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            CorrelationValue::I16(v) => Some(i64::from(*v)),
            CorrelationValue::I32(v) => Some(i64::from(*v)),
            CorrelationValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Convert this value to `target`, returning `None` when the conversion
    /// is impossible for this particular value (unparseable string, integer
    /// out of range, or incompatible kinds).
    pub fn coerce(self, target: ScalarKind) -> Option<CorrelationValue> {
        if self.kind() == target {
            return Some(self);
        }

        if target == ScalarKind::String {
            return Some(CorrelationValue::String(self.to_string()));
        }

        if let CorrelationValue::String(s) = &self {
            let s = s.trim();
            return match target {
                ScalarKind::Bool => bool::from_str(s).ok().map(CorrelationValue::Bool),
                ScalarKind::I16 => s.parse().ok().map(CorrelationValue::I16),
                ScalarKind::I32 => s.parse().ok().map(CorrelationValue::I32),
                ScalarKind::I64 => s.parse().ok().map(CorrelationValue::I64),
                ScalarKind::Uuid => Uuid::from_str(s).ok().map(CorrelationValue::Uuid),
                ScalarKind::String => Some(CorrelationValue::String(s.to_string())),
            };
        }

        let wide = self.as_i64()?;
        match target {
            ScalarKind::I16 => i16::try_from(wide).ok().map(CorrelationValue::I16),
            ScalarKind::I32 => i32::try_from(wide).ok().map(CorrelationValue::I32),
            ScalarKind::I64 => Some(CorrelationValue::I64(wide)),
            _ => None,
        }
    }
}

impl fmt::Display for CorrelationValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationValue::Bool(v) => write!(f, "{v}"),
            CorrelationValue::I16(v) => write!(f, "{v}"),
            CorrelationValue::I32(v) => write!(f, "{v}"),
            CorrelationValue::I64(v) => write!(f, "{v}"),
            CorrelationValue::Uuid(v) => write!(f, "{v}"),
            CorrelationValue::String(v) => f.write_str(v),
        }
    }
}

/// A Rust type that maps onto one of the correlatable scalar kinds.
pub trait CorrelationScalar: Clone + Send + Sync + 'static {
    const KIND: ScalarKind;

    fn to_value(&self) -> CorrelationValue;

    /// Read a value that has already been coerced to [`Self::KIND`].
    fn from_value(value: &CorrelationValue) -> Option<Self>;
}

macro_rules! impl_scalar {
    ($t:ty, $kind:ident) => {
        impl CorrelationScalar for $t {
            const KIND: ScalarKind = ScalarKind::$kind;

            fn to_value(&self) -> CorrelationValue {
                CorrelationValue::$kind(self.clone())
            }

            fn from_value(value: &CorrelationValue) -> Option<Self> {
                match value {
                    CorrelationValue::$kind(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }
    };
}

impl_scalar!(bool, Bool);
impl_scalar!(i16, I16);
impl_scalar!(i32, I32);
impl_scalar!(i64, I64);
impl_scalar!(Uuid, Uuid);
impl_scalar!(String, String);

impl CorrelationScalar for SagaId {
    const KIND: ScalarKind = ScalarKind::Uuid;

    fn to_value(&self) -> CorrelationValue {
        CorrelationValue::Uuid(*self.as_uuid())
    }

    fn from_value(value: &CorrelationValue) -> Option<Self> {
        match value {
            CorrelationValue::Uuid(v) => Some(SagaId::from_uuid(*v)),
            _ => None,
        }
    }
}

/// Anything an extractor may return: a scalar, an optional scalar, or a string slice.
pub trait IntoCorrelationValue {
    /// Kind of the produced value, used to validate rules at registration time.
    const KIND: ScalarKind;

    fn into_correlation_value(self) -> Option<CorrelationValue>;
}

macro_rules! impl_into_value {
    ($($t:ty),*) => {
        $(
            impl IntoCorrelationValue for $t {
                const KIND: ScalarKind = <$t as CorrelationScalar>::KIND;

                fn into_correlation_value(self) -> Option<CorrelationValue> {
                    Some(self.to_value())
                }
            }

            impl IntoCorrelationValue for Option<$t> {
                const KIND: ScalarKind = <$t as CorrelationScalar>::KIND;

                fn into_correlation_value(self) -> Option<CorrelationValue> {
                    self.map(|v| v.to_value())
                }
            }
        )*
    };
}

impl_into_value!(bool, i16, i32, i64, Uuid, String, SagaId);

impl IntoCorrelationValue for &str {
    const KIND: ScalarKind = ScalarKind::String;

    fn into_correlation_value(self) -> Option<CorrelationValue> {
        Some(CorrelationValue::String(self.to_string()))
    }
}
