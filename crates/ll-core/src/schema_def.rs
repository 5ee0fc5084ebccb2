//! Explicit schema definitions for attribute-bag entities.
//!
//! The index never interprets attributes; a `SchemaDefinition` is itself an
//! ordinary value describing the fields a given entity type is expected to
//! carry. Validation happens at the write boundary and produces violations
//! as data — no types are synthesized at runtime.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Number,
    Boolean,
    List,
    Map,
}

impl FieldKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            FieldKind::Text => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::List => value.is_array(),
            FieldKind::Map => value.is_object(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
}

/// Expected fields for one entity type. Advisory only — used for UI hints and
/// boundary validation, never consulted by the index itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub entity_type: String,
    pub fields: Vec<FieldDef>,
}

impl SchemaDefinition {
    /// Check a flattened attribute map against this schema.
    ///
    /// A field named `appearance` is satisfied by either an exact key or any
    /// nested path under it (`appearance.hair`). Returns human-readable
    /// violations; an empty vec means the map conforms.
    pub fn validate(&self, attributes: &BTreeMap<String, Value>) -> Vec<String> {
        let mut violations = Vec::new();

        for field in &self.fields {
            let exact = attributes.get(&field.name);
            let nested_prefix = format!("{}.", field.name);
            let has_nested = attributes.keys().any(|k| k.starts_with(&nested_prefix));

            match exact {
                Some(value) => {
                    // Nested paths flatten Map fields away, so only check the
                    // kind when the field is present as an exact key.
                    if !field.kind.matches(value) {
                        violations.push(format!(
                            "field '{}' expected {:?}, got {}",
                            field.name,
                            field.kind,
                            type_name(value)
                        ));
                    }
                }
                None if has_nested => {
                    if field.kind != FieldKind::Map {
                        violations.push(format!(
                            "field '{}' expected {:?}, got nested object",
                            field.name, field.kind
                        ));
                    }
                }
                None if field.required => {
                    violations.push(format!("required field '{}' is missing", field.name));
                }
                None => {}
            }
        }

        violations
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
