//! Cross-backend value transfer.
//!
//! Two backends rarely share generated schemas.  [`DynamicData::convert_to`]
//! maps a value field-by-field onto a structurally compatible destination
//! type, which may carry a different name:
//!
//! * fields absent from the destination are dropped;
//! * fields absent from the source take the destination's declared default,
//!   or fail with [`BridgeError::MissingRequiredField`];
//! * structs, sequences and maps convert recursively;
//! * scalar kinds must match exactly and enum ordinals must be declared by
//!   the destination enum, otherwise [`BridgeError::TypeMismatch`].

use std::sync::Arc;

use crate::error::BridgeError;
use crate::schema::{DynamicType, FieldKind};
use crate::value::{DynamicData, Value};

impl DynamicData {
    /// Convert this value into an instance of `target`.
    pub fn convert_to(&self, target: &Arc<DynamicType>) -> Result<DynamicData, BridgeError> {
        if Arc::ptr_eq(self.dynamic_type(), target) {
            return Ok(self.clone());
        }
        if self.dynamic_type().as_ref() == target.as_ref() {
            return Ok(DynamicData::from_parts(
                Arc::clone(target),
                self.values().to_vec(),
            ));
        }

        let source = self.dynamic_type();
        let mut values = Vec::with_capacity(target.fields().len());
        for field in target.fields() {
            let value = match source.index_of(field.name()) {
                Some(index) => convert_value(&self.values()[index], field.kind(), field.name())?,
                None => match field.default_value() {
                    Some(default) => default.clone(),
                    None => {
                        return Err(BridgeError::MissingRequiredField {
                            type_name: target.name().to_string(),
                            field: field.name().to_string(),
                        });
                    }
                },
            };
            values.push(value);
        }
        Ok(DynamicData::from_parts(Arc::clone(target), values))
    }
}

fn convert_value(value: &Value, kind: &FieldKind, field: &str) -> Result<Value, BridgeError> {
    match (value, kind) {
        (Value::Struct(inner), FieldKind::Struct(target)) => {
            inner.convert_to(target).map(Value::Struct)
        }
        (Value::Sequence(items), FieldKind::Sequence(element)) => items
            .iter()
            .map(|item| convert_value(item, element, field))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Sequence),
        (Value::Map(entries), FieldKind::Map(key_kind, value_kind)) => entries
            .iter()
            .map(|(k, v)| {
                Ok((
                    convert_value(k, key_kind, field)?,
                    convert_value(v, value_kind, field)?,
                ))
            })
            .collect::<Result<Vec<_>, BridgeError>>()
            .map(Value::Map),
        (Value::Enum(ordinal), FieldKind::Enum(target)) if target.contains(*ordinal) => {
            Ok(Value::Enum(*ordinal))
        }
        (scalar, FieldKind::Primitive(p)) if scalar.primitive_kind() == Some(*p) => {
            Ok(scalar.clone())
        }
        (other, _) => Err(BridgeError::TypeMismatch {
            field: field.to_string(),
            expected: kind.describe(),
            found: other.kind_name(),
        }),
    }
}
