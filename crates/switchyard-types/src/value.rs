//! Runtime values: [`Value`] and [`DynamicData`].
//!
//! [`Value`] is a closed tagged variant; there is no open-ended reflection.
//! A [`DynamicData`] always conforms to exactly one [`DynamicType`]: every
//! mutation is checked against the field's declared kind and rejected with
//! [`BridgeError::TypeMismatch`] instead of being coerced.

use std::sync::Arc;

use crate::error::BridgeError;
use crate::schema::{DynamicType, FieldKind, PrimitiveKind};

// ─────────────────────────────────────────────────────────────────────────────
// Values
// ─────────────────────────────────────────────────────────────────────────────

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Char(char),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    String(String),
    /// Ordinal of an [`EnumType`][crate::schema::EnumType] label.
    Enum(i32),
    Struct(DynamicData),
    Sequence(Vec<Value>),
    /// Entries in insertion order.
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// The primitive kind of a scalar value, `None` for composite values.
    pub fn primitive_kind(&self) -> Option<PrimitiveKind> {
        Some(match self {
            Value::Bool(_) => PrimitiveKind::Bool,
            Value::Char(_) => PrimitiveKind::Char,
            Value::Int8(_) => PrimitiveKind::Int8,
            Value::Int16(_) => PrimitiveKind::Int16,
            Value::Int32(_) => PrimitiveKind::Int32,
            Value::Int64(_) => PrimitiveKind::Int64,
            Value::UInt8(_) => PrimitiveKind::UInt8,
            Value::UInt16(_) => PrimitiveKind::UInt16,
            Value::UInt32(_) => PrimitiveKind::UInt32,
            Value::UInt64(_) => PrimitiveKind::UInt64,
            Value::Float32(_) => PrimitiveKind::Float32,
            Value::Float64(_) => PrimitiveKind::Float64,
            Value::String(_) => PrimitiveKind::String,
            Value::Enum(_) | Value::Struct(_) | Value::Sequence(_) | Value::Map(_) => return None,
        })
    }

    /// Short description of what this value holds, for error messages.
    pub fn kind_name(&self) -> String {
        match self {
            Value::Enum(ordinal) => format!("enum ordinal {ordinal}"),
            Value::Struct(data) => format!("struct {}", data.type_name()),
            Value::Sequence(_) => "sequence".to_string(),
            Value::Map(_) => "map".to_string(),
            scalar => scalar
                .primitive_kind()
                .map(|p| p.name().to_string())
                .unwrap_or_default(),
        }
    }

    /// Whether this value may be stored in a field of `kind`.
    pub fn conforms_to(&self, kind: &FieldKind) -> bool {
        match (self, kind) {
            (Value::Enum(ordinal), FieldKind::Enum(e)) => e.contains(*ordinal),
            (Value::Struct(data), FieldKind::Struct(t)) => {
                Arc::ptr_eq(data.dynamic_type(), t) || data.dynamic_type().as_ref() == t.as_ref()
            }
            (Value::Sequence(items), FieldKind::Sequence(element)) => {
                items.iter().all(|v| v.conforms_to(element))
            }
            (Value::Map(entries), FieldKind::Map(k, v)) => entries
                .iter()
                .all(|(key, value)| key.conforms_to(k) && value.conforms_to(v)),
            (scalar, FieldKind::Primitive(p)) => scalar.primitive_kind() == Some(*p),
            _ => false,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Any integer value that fits in an `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int8(v) => Some(i64::from(*v)),
            Value::Int16(v) => Some(i64::from(*v)),
            Value::Int32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            Value::UInt8(v) => Some(i64::from(*v)),
            Value::UInt16(v) => Some(i64::from(*v)),
            Value::UInt32(v) => Some(i64::from(*v)),
            Value::UInt64(v) => i64::try_from(*v).ok(),
            Value::Enum(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float32(v) => Some(f64::from(*v)),
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&DynamicData> {
        match self {
            Value::Struct(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Sequence(items) => Some(items),
            _ => None,
        }
    }
}

macro_rules! impl_from_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from_scalar! {
    bool => Bool,
    char => Char,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
    String => String,
    DynamicData => Struct,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Sequence(items)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────────────────────────────────────

/// A runtime value conforming to one [`DynamicType`].
///
/// Cloning produces an independent copy; ownership of a message is handed
/// between components by value, never through shared mutable references.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicData {
    ty: Arc<DynamicType>,
    values: Vec<Value>,
}

impl DynamicData {
    /// Create a value of `ty` with every field at its declared default, or at
    /// the kind's zero value when none is declared.
    pub fn new(ty: &Arc<DynamicType>) -> Self {
        let values = ty.fields().iter().map(|f| f.initial_value()).collect();
        Self {
            ty: Arc::clone(ty),
            values,
        }
    }

    /// Assemble a value from parts already known to conform.
    pub(crate) fn from_parts(ty: Arc<DynamicType>, values: Vec<Value>) -> Self {
        debug_assert_eq!(ty.fields().len(), values.len());
        Self { ty, values }
    }

    pub fn dynamic_type(&self) -> &Arc<DynamicType> {
        &self.ty
    }

    pub fn type_name(&self) -> &str {
        self.ty.name()
    }

    pub(crate) fn values(&self) -> &[Value] {
        &self.values
    }

    /// Read a field by name.
    pub fn get(&self, name: &str) -> Result<&Value, BridgeError> {
        let index = self.index_of(name)?;
        Ok(&self.values[index])
    }

    /// Read a field by position.
    pub fn get_at(&self, index: usize) -> Result<&Value, BridgeError> {
        self.values
            .get(index)
            .ok_or_else(|| self.not_found(&index.to_string()))
    }

    /// Write a field by name.
    ///
    /// # Errors
    ///
    /// [`BridgeError::FieldNotFound`] for an unknown name,
    /// [`BridgeError::TypeMismatch`] when `value` does not conform to the
    /// field's kind.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), BridgeError> {
        let index = self.index_of(name)?;
        self.set_at(index, value)
    }

    /// Write a field by position.
    pub fn set_at(&mut self, index: usize, value: impl Into<Value>) -> Result<(), BridgeError> {
        let value = value.into();
        let Some(field) = self.ty.field_at(index) else {
            return Err(self.not_found(&index.to_string()));
        };
        if !value.conforms_to(field.kind()) {
            return Err(BridgeError::TypeMismatch {
                field: field.name().to_string(),
                expected: field.kind().describe(),
                found: value.kind_name(),
            });
        }
        self.values[index] = value;
        Ok(())
    }

    /// Builder-style [`set`][Self::set].
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Result<Self, BridgeError> {
        self.set(name, value)?;
        Ok(self)
    }

    /// Iterate `(field name, value)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.ty
            .fields()
            .iter()
            .map(|f| f.name())
            .zip(self.values.iter())
    }

    fn index_of(&self, name: &str) -> Result<usize, BridgeError> {
        self.ty.index_of(name).ok_or_else(|| self.not_found(name))
    }

    fn not_found(&self, field: &str) -> BridgeError {
        BridgeError::FieldNotFound {
            type_name: self.ty.name().to_string(),
            field: field.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
