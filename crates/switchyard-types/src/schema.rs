//! Runtime schemas: [`DynamicType`], [`FieldKind`], [`EnumType`] and
//! [`ServiceType`].
//!
//! A [`DynamicType`] is built once during configuration with a
//! [`DynamicTypeBuilder`] and then shared as `Arc<DynamicType>`.  It is never
//! mutated afterwards.

use std::fmt;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::value::{DynamicData, Value};

// ─────────────────────────────────────────────────────────────────────────────
// Primitives and enums
// ─────────────────────────────────────────────────────────────────────────────

/// Scalar kinds understood by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveKind {
    Bool,
    Char,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    String,
}

impl PrimitiveKind {
    const ALL: [PrimitiveKind; 13] = [
        PrimitiveKind::Bool,
        PrimitiveKind::Char,
        PrimitiveKind::Int8,
        PrimitiveKind::Int16,
        PrimitiveKind::Int32,
        PrimitiveKind::Int64,
        PrimitiveKind::UInt8,
        PrimitiveKind::UInt16,
        PrimitiveKind::UInt32,
        PrimitiveKind::UInt64,
        PrimitiveKind::Float32,
        PrimitiveKind::Float64,
        PrimitiveKind::String,
    ];

    /// The lowercase name used in configuration files.
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Bool => "bool",
            PrimitiveKind::Char => "char",
            PrimitiveKind::Int8 => "int8",
            PrimitiveKind::Int16 => "int16",
            PrimitiveKind::Int32 => "int32",
            PrimitiveKind::Int64 => "int64",
            PrimitiveKind::UInt8 => "uint8",
            PrimitiveKind::UInt16 => "uint16",
            PrimitiveKind::UInt32 => "uint32",
            PrimitiveKind::UInt64 => "uint64",
            PrimitiveKind::Float32 => "float32",
            PrimitiveKind::Float64 => "float64",
            PrimitiveKind::String => "string",
        }
    }

    /// Parse a configuration-file kind name.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// The zero value of this kind.
    pub fn zero_value(self) -> Value {
        match self {
            PrimitiveKind::Bool => Value::Bool(false),
            PrimitiveKind::Char => Value::Char('\0'),
            PrimitiveKind::Int8 => Value::Int8(0),
            PrimitiveKind::Int16 => Value::Int16(0),
            PrimitiveKind::Int32 => Value::Int32(0),
            PrimitiveKind::Int64 => Value::Int64(0),
            PrimitiveKind::UInt8 => Value::UInt8(0),
            PrimitiveKind::UInt16 => Value::UInt16(0),
            PrimitiveKind::UInt32 => Value::UInt32(0),
            PrimitiveKind::UInt64 => Value::UInt64(0),
            PrimitiveKind::Float32 => Value::Float32(0.0),
            PrimitiveKind::Float64 => Value::Float64(0.0),
            PrimitiveKind::String => Value::String(String::new()),
        }
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A named enumeration: an ordered list of labels with `i32` ordinals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumType {
    name: String,
    values: Vec<(String, i32)>,
}

impl EnumType {
    /// Build an enum whose labels are numbered from zero in declaration order.
    pub fn new<I, S>(name: impl Into<String>, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values = labels
            .into_iter()
            .zip(0..)
            .map(|(label, ordinal)| (label.into(), ordinal))
            .collect();
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ordinal_of(&self, label: &str) -> Option<i32> {
        self.values
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, ordinal)| *ordinal)
    }

    pub fn label_of(&self, ordinal: i32) -> Option<&str> {
        self.values
            .iter()
            .find(|(_, o)| *o == ordinal)
            .map(|(label, _)| label.as_str())
    }

    pub fn contains(&self, ordinal: i32) -> bool {
        self.label_of(ordinal).is_some()
    }

    /// The ordinal of the first declared label, used as the zero value.
    fn first_ordinal(&self) -> i32 {
        self.values.first().map(|(_, o)| *o).unwrap_or(0)
    }
}
// ─────────────────────────────────────────────────────────────────────────────
// Fields
// ─────────────────────────────────────────────────────────────────────────────

/// The kind of a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Primitive(PrimitiveKind),
    Struct(Arc<DynamicType>),
    Sequence(Box<FieldKind>),
    Map(Box<FieldKind>, Box<FieldKind>),
    Enum(Arc<EnumType>),
}

impl FieldKind {
    pub fn string() -> Self {
        FieldKind::Primitive(PrimitiveKind::String)
    }

    pub fn sequence(element: FieldKind) -> Self {
        FieldKind::Sequence(Box::new(element))
    }

    pub fn map(key: FieldKind, value: FieldKind) -> Self {
        FieldKind::Map(Box::new(key), Box::new(value))
    }

    /// Human-readable description used in error messages.
    pub fn describe(&self) -> String {
        match self {
            FieldKind::Primitive(p) => p.name().to_string(),
            FieldKind::Struct(t) => format!("struct {}", t.name()),
            FieldKind::Sequence(e) => format!("sequence<{}>", e.describe()),
            FieldKind::Map(k, v) => format!("map<{},{}>", k.describe(), v.describe()),
            FieldKind::Enum(e) => format!("enum {}", e.name()),
        }
    }

    /// The value a freshly constructed [`DynamicData`] holds for this kind
    /// when no default is declared.
    pub fn zero_value(&self) -> Value {
        match self {
            FieldKind::Primitive(p) => p.zero_value(),
            FieldKind::Struct(t) => Value::Struct(DynamicData::new(t)),
            FieldKind::Sequence(_) => Value::Sequence(Vec::new()),
            FieldKind::Map(_, _) => Value::Map(Vec::new()),
            FieldKind::Enum(e) => Value::Enum(e.first_ordinal()),
        }
    }
}

impl From<PrimitiveKind> for FieldKind {
    fn from(kind: PrimitiveKind) -> Self {
        FieldKind::Primitive(kind)
    }
}

/// One named member of a [`DynamicType`].
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    name: String,
    kind: FieldKind,
    default: Option<Value>,
}

impl Field {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// The declared default, used when a conversion source lacks this field.
    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub(crate) fn initial_value(&self) -> Value {
        self.default
            .clone()
            .unwrap_or_else(|| self.kind.zero_value())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message types
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable, named runtime schema.
///
/// # Example
///
/// ```
/// use switchyard_types::{DynamicType, FieldKind, PrimitiveKind};
///
/// let point = DynamicType::builder("geometry/Point")
///     .field("x", PrimitiveKind::Float64)
///     .field("y", PrimitiveKind::Float64)
///     .field_with_default("label", FieldKind::string(), "origin")
///     .build()
///     .unwrap();
///
/// assert_eq!(point.fields().len(), 3);
/// assert_eq!(point.index_of("y"), Some(1));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicType {
    name: String,
    fields: Vec<Field>,
}

impl DynamicType {
    pub fn builder(name: impl Into<String>) -> DynamicTypeBuilder {
        DynamicTypeBuilder {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Process-wide qualified name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_at(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Struct types referenced directly by this type's fields, including
    /// those nested inside sequences and maps.
    pub fn nested_types(&self) -> Vec<Arc<DynamicType>> {
        fn collect(kind: &FieldKind, out: &mut Vec<Arc<DynamicType>>) {
            match kind {
                FieldKind::Struct(t) => out.push(Arc::clone(t)),
                FieldKind::Sequence(e) => collect(e, out),
                FieldKind::Map(k, v) => {
                    collect(k, out);
                    collect(v, out);
                }
                FieldKind::Primitive(_) | FieldKind::Enum(_) => {}
            }
        }
        let mut out = Vec::new();
        for field in &self.fields {
            collect(&field.kind, &mut out);
        }
        out
    }
}

/// Incremental constructor for [`DynamicType`].
pub struct DynamicTypeBuilder {
    name: String,
    fields: Vec<Field>,
}

impl DynamicTypeBuilder {
    pub fn field(mut self, name: impl Into<String>, kind: impl Into<FieldKind>) -> Self {
        self.fields.push(Field {
            name: name.into(),
            kind: kind.into(),
            default: None,
        });
        self
    }

    pub fn field_with_default(
        mut self,
        name: impl Into<String>,
        kind: impl Into<FieldKind>,
        default: impl Into<Value>,
    ) -> Self {
        self.fields.push(Field {
            name: name.into(),
            kind: kind.into(),
            default: Some(default.into()),
        });
        self
    }

    /// Validate and freeze the schema.
    ///
    /// # Errors
    ///
    /// * [`BridgeError::InvalidSchema`] – empty name or duplicate field names.
    /// * [`BridgeError::TypeMismatch`] – a declared default does not conform
    ///   to its field kind.
    pub fn build(self) -> Result<DynamicType, BridgeError> {
        if self.name.trim().is_empty() {
            return Err(BridgeError::InvalidSchema {
                type_name: self.name,
                details: "type name must not be empty".to_string(),
            });
        }
        for (i, field) in self.fields.iter().enumerate() {
            if self.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(BridgeError::InvalidSchema {
                    type_name: self.name.clone(),
                    details: format!("duplicate field '{}'", field.name),
                });
            }
            if let Some(default) = &field.default
                && !default.conforms_to(&field.kind)
            {
                return Err(BridgeError::TypeMismatch {
                    field: field.name.clone(),
                    expected: field.kind.describe(),
                    found: default.kind_name(),
                });
            }
        }
        Ok(DynamicType {
            name: self.name,
            fields: self.fields,
        })
    }
}
// ─────────────────────────────────────────────────────────────────────────────
// Services
// ─────────────────────────────────────────────────────────────────────────────

/// A named request/response pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceType {
    name: String,
    request: Arc<DynamicType>,
    response: Arc<DynamicType>,
}

impl ServiceType {
    pub fn new(
        name: impl Into<String>,
        request: Arc<DynamicType>,
        response: Arc<DynamicType>,
    ) -> Self {
        Self {
            name: name.into(),
            request,
            response,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn request(&self) -> &Arc<DynamicType> {
        &self.request
    }

    pub fn response(&self) -> &Arc<DynamicType> {
        &self.response
    }
}
// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_kind_parse_roundtrip() {
        for kind in PrimitiveKind::ALL {
            assert_eq!(PrimitiveKind::parse(kind.name()), Some(kind));
        }
        assert_eq!(PrimitiveKind::parse("int128"), None);
    }

    #[test]
    fn build_rejects_duplicate_fields() {
        let result = DynamicType::builder("dup")
            .field("a", PrimitiveKind::Int32)
            .field("a", PrimitiveKind::Int64)
            .build();
        assert!(matches!(result, Err(BridgeError::InvalidSchema { .. })));
    }

    #[test]
    fn build_rejects_empty_name() {
        let result = DynamicType::builder("  ").build();
        assert!(matches!(result, Err(BridgeError::InvalidSchema { .. })));
    }

    #[test]
    fn build_rejects_nonconforming_default() {
        let result = DynamicType::builder("bad_default")
            .field_with_default("count", PrimitiveKind::UInt32, "ten")
            .build();
        match result {
            Err(BridgeError::TypeMismatch { field, expected, .. }) => {
                assert_eq!(field, "count");
                assert_eq!(expected, "uint32");
            }
            other => panic!("expected TypeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn enum_ordinals_follow_declaration_order() {
        let mode = EnumType::new("Mode", ["idle", "busy", "fault"]);
        assert_eq!(mode.ordinal_of("busy"), Some(1));
        assert_eq!(mode.label_of(2), Some("fault"));
        assert!(!mode.contains(3));
    }

    #[test]
    fn describe_nested_kinds() {
        let inner = Arc::new(
            DynamicType::builder("Inner")
                .field("v", PrimitiveKind::Bool)
                .build()
                .unwrap(),
        );
        let kind = FieldKind::map(
            FieldKind::string(),
            FieldKind::sequence(FieldKind::Struct(inner)),
        );
        assert_eq!(kind.describe(), "map<string,sequence<struct Inner>>");
    }

    #[test]
    fn nested_types_found_through_containers() {
        let inner = Arc::new(
            DynamicType::builder("Inner")
                .field("v", PrimitiveKind::Bool)
                .build()
                .unwrap(),
        );
        let outer = DynamicType::builder("Outer")
            .field("many", FieldKind::sequence(FieldKind::Struct(Arc::clone(&inner))))
            .field("n", PrimitiveKind::Int8)
            .build()
            .unwrap();
        let nested = outer.nested_types();
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0].name(), "Inner");
    }
}
