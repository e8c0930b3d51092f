//! Schema declarations embedded in the bridge configuration.
//!
//! Backends normally bring their own schemas (generated from their IDL).
//! Declarations let a configuration supply schemas for backends that have
//! none, such as the in-process loopback backend.
//!
//! Kind strings:
//!
//! | Kind | Meaning |
//! |---|---|
//! | `bool`, `char`, `int8`…`int64`, `uint8`…`uint64`, `float32`, `float64`, `string` | scalar |
//! | `sequence<K>` | list of `K` |
//! | `map<K,V>` | ordered key/value list |
//! | any other name | a previously declared enum or type |

use std::collections::HashMap;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::registry::TypeRegistry;
use crate::schema::{DynamicType, EnumType, FieldKind, PrimitiveKind, ServiceType};
use crate::value::{DynamicData, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TypeDeclaration {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FieldDeclaration {
    pub name: String,
    pub kind: String,
    /// Value used when a conversion source lacks this field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct EnumDeclaration {
    pub name: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ServiceTypeDeclaration {
    pub name: String,
    pub request: String,
    pub response: String,
}

/// Resolve every declaration in `config` and register it.
///
/// Declarations are processed in order: enums first, then types (each may
/// reference enums and earlier types), then service types.
pub fn declare_types(config: &BridgeConfig, registry: &TypeRegistry) -> Result<(), BridgeError> {
    let enums: HashMap<String, Arc<EnumType>> = config
        .enums
        .iter()
        .map(|e| (e.name.clone(), Arc::new(EnumType::new(&e.name, e.values.iter().cloned()))))
        .collect();

    for decl in &config.types {
        let ty = resolve_type(decl, &enums, registry)?;
        registry.register(ty)?;
    }

    for decl in &config.service_types {
        let request = registry.require(&decl.request)?;
        let response = registry.require(&decl.response)?;
        registry.register_service(ServiceType::new(&decl.name, request, response))?;
    }
    Ok(())
}

fn resolve_type(
    decl: &TypeDeclaration,
    enums: &HashMap<String, Arc<EnumType>>,
    registry: &TypeRegistry,
) -> Result<DynamicType, BridgeError> {
    let mut builder = DynamicType::builder(&decl.name);
    for field in &decl.fields {
        let kind = parse_kind(&field.kind, enums, registry)?;
        builder = match &field.default {
            Some(json) => {
                let default = value_from_json(json, &kind, &field.name)?;
                builder.field_with_default(&field.name, kind, default)
            }
            None => builder.field(&field.name, kind),
        };
    }
    builder.build()
}

/// Parse a kind string against the known enums and registered types.
pub fn parse_kind(
    text: &str,
    enums: &HashMap<String, Arc<EnumType>>,
    registry: &TypeRegistry,
) -> Result<FieldKind, BridgeError> {
    let text = text.trim();
    if let Some(inner) = text.strip_prefix("sequence<").and_then(|s| s.strip_suffix('>')) {
        return Ok(FieldKind::sequence(parse_kind(inner, enums, registry)?));
    }
    if let Some(inner) = text.strip_prefix("map<").and_then(|s| s.strip_suffix('>')) {
        let (key, value) = split_top_level(inner).ok_or_else(|| BridgeError::InvalidSchema {
            type_name: text.to_string(),
            details: "map kind needs two parameters".to_string(),
        })?;
        return Ok(FieldKind::map(
            parse_kind(key, enums, registry)?,
            parse_kind(value, enums, registry)?,
        ));
    }
    if let Some(primitive) = PrimitiveKind::parse(text) {
        return Ok(FieldKind::Primitive(primitive));
    }
    if let Some(e) = enums.get(text) {
        return Ok(FieldKind::Enum(Arc::clone(e)));
    }
    registry.require(text).map(FieldKind::Struct)
}

/// Split `K,V` at the first comma not nested inside angle brackets.
fn split_top_level(inner: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    for (i, c) in inner.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => return Some((&inner[..i], &inner[i + 1..])),
            _ => {}
        }
    }
    None
}

/// Convert a JSON literal into a [`Value`] of `kind`.
pub fn value_from_json(
    json: &serde_json::Value,
    kind: &FieldKind,
    field: &str,
) -> Result<Value, BridgeError> {
    let mismatch = || BridgeError::TypeMismatch {
        field: field.to_string(),
        expected: kind.describe(),
        found: json.to_string(),
    };
    let value = match kind {
        FieldKind::Primitive(p) => primitive_from_json(json, *p).ok_or_else(mismatch)?,
        FieldKind::Enum(e) => {
            let label = json.as_str().ok_or_else(mismatch)?;
            Value::Enum(e.ordinal_of(label).ok_or_else(mismatch)?)
        }
        FieldKind::Sequence(element) => Value::Sequence(
            json.as_array()
                .ok_or_else(mismatch)?
                .iter()
                .map(|item| value_from_json(item, element, field))
                .collect::<Result<_, _>>()?,
        ),
        FieldKind::Map(key, value) => Value::Map(
            json.as_object()
                .ok_or_else(mismatch)?
                .iter()
                .map(|(k, v)| {
                    Ok((
                        value_from_json(&serde_json::Value::String(k.clone()), key, field)?,
                        value_from_json(v, value, field)?,
                    ))
                })
                .collect::<Result<_, BridgeError>>()?,
        ),
        FieldKind::Struct(ty) => {
            let object = json.as_object().ok_or_else(mismatch)?;
            let mut data = DynamicData::new(ty);
            for (name, item) in object {
                let Some(member) = ty.field(name) else {
                    return Err(BridgeError::FieldNotFound {
                        type_name: ty.name().to_string(),
                        field: name.clone(),
                    });
                };
                let member_value = value_from_json(item, member.kind(), name)?;
                data.set(name, member_value)?;
            }
            Value::Struct(data)
        }
    };
    Ok(value)
}

fn primitive_from_json(json: &serde_json::Value, kind: PrimitiveKind) -> Option<Value> {
    Some(match kind {
        PrimitiveKind::Bool => Value::Bool(json.as_bool()?),
        PrimitiveKind::Char => {
            let s = json.as_str()?;
            let mut chars = s.chars();
            let c = chars.next()?;
            if chars.next().is_some() {
                return None;
            }
            Value::Char(c)
        }
        PrimitiveKind::Int8 => Value::Int8(i8::try_from(json.as_i64()?).ok()?),
        PrimitiveKind::Int16 => Value::Int16(i16::try_from(json.as_i64()?).ok()?),
        PrimitiveKind::Int32 => Value::Int32(i32::try_from(json.as_i64()?).ok()?),
        PrimitiveKind::Int64 => Value::Int64(json.as_i64()?),
        PrimitiveKind::UInt8 => Value::UInt8(u8::try_from(json.as_u64()?).ok()?),
        PrimitiveKind::UInt16 => Value::UInt16(u16::try_from(json.as_u64()?).ok()?),
        PrimitiveKind::UInt32 => Value::UInt32(u32::try_from(json.as_u64()?).ok()?),
        PrimitiveKind::UInt64 => Value::UInt64(json.as_u64()?),
        PrimitiveKind::Float32 => Value::Float32(json.as_f64()? as f32),
        PrimitiveKind::Float64 => Value::Float64(json.as_f64()?),
        PrimitiveKind::String => Value::String(json.as_str()?.to_string()),
    })
}
