//! Typed values and their wire packages.
//!
//! This module provides:
//! - [`Value`], the native representation a context hands to the codec
//! - Type inference over values ([`infer_type`])
//! - Packing into and unpacking from the `{type, format, data}` wire shape
//! - Columnar tables and function signatures

mod function;
mod package;
mod table;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub use function::{Docstring, FunctionSpec, Method, Param, Returns};
pub use package::{Format, Package, TablePointer, pack, unpack, unpack_str};
pub use table::{Column, Table};

/// Type tag carried by every package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Array,
    Object,
    Table,
    Image,
    Function,
}

impl TypeTag {
    /// All tags, in declaration order.
    pub const ALL: [TypeTag; 10] = [
        TypeTag::Null,
        TypeTag::Boolean,
        TypeTag::Integer,
        TypeTag::Number,
        TypeTag::String,
        TypeTag::Array,
        TypeTag::Object,
        TypeTag::Table,
        TypeTag::Image,
        TypeTag::Function,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TypeTag::Null => "null",
            TypeTag::Boolean => "boolean",
            TypeTag::Integer => "integer",
            TypeTag::Number => "number",
            TypeTag::String => "string",
            TypeTag::Array => "array",
            TypeTag::Object => "object",
            TypeTag::Table => "table",
            TypeTag::Image => "image",
            TypeTag::Function => "function",
        }
    }

    /// Look a tag up by its wire name.
    pub fn parse(name: &str) -> Option<TypeTag> {
        Self::ALL.into_iter().find(|tag| tag.as_str() == name)
    }

    /// Tags an object may claim through its own `type` field.
    pub(crate) fn is_envelope(&self) -> bool {
        matches!(self, TypeTag::Table | TypeTag::Image | TypeTag::Function)
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value that can cross the boundary between a context and a caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
    Table(Table),
    /// PNG encoded image bytes.
    Image(Vec<u8>),
    Function(FunctionSpec),
    /// Lazy reference to a table held by a context.
    Pointer(TablePointer),
}

impl Value {
    /// Convert a plain JSON value. Integral numbers that fit in an `i64`
    /// become integers, all other numbers become floats.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Render as plain JSON.
    ///
    /// Primitive leaves map directly; tables, images, functions and pointers
    /// nested inside arrays or objects are rendered as their full package.
    pub fn to_json(&self) -> crate::Result<serde_json::Value> {
        Ok(match self {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(Value::to_json)
                    .collect::<crate::Result<Vec<_>>>()?,
            ),
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, value) in map {
                    out.insert(key.clone(), value.to_json()?);
                }
                serde_json::Value::Object(out)
            }
            Value::Table(_) | Value::Image(_) | Value::Function(_) | Value::Pointer(_) => {
                serde_json::to_value(pack(self)?)?
            }
        })
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Table> for Value {
    fn from(t: Table) -> Self {
        Value::Table(t)
    }
}

/// Infer the type tag of a value.
///
/// An object whose own `type` field names a table, image or function tag is
/// passed through as that type.
pub fn infer_type(value: &Value) -> TypeTag {
    match value {
        Value::Null => TypeTag::Null,
        Value::Boolean(_) => TypeTag::Boolean,
        Value::Integer(_) => TypeTag::Integer,
        Value::Number(_) => TypeTag::Number,
        Value::String(_) => TypeTag::String,
        Value::Array(_) => TypeTag::Array,
        Value::Object(map) => match map.get("type") {
            Some(Value::String(claimed)) => TypeTag::parse(claimed)
                .filter(TypeTag::is_envelope)
                .unwrap_or(TypeTag::Object),
            _ => TypeTag::Object,
        },
        Value::Table(_) | Value::Pointer(_) => TypeTag::Table,
        Value::Image(_) => TypeTag::Image,
        Value::Function(_) => TypeTag::Function,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_infer_type_primitives() {
        assert_eq!(infer_type(&Value::Null), TypeTag::Null);
        assert_eq!(infer_type(&Value::from(true)), TypeTag::Boolean);
        assert_eq!(infer_type(&Value::from(42)), TypeTag::Integer);
        assert_eq!(infer_type(&Value::from(1.1e-20)), TypeTag::Number);
        assert_eq!(infer_type(&Value::from("Yo!")), TypeTag::String);
        assert_eq!(infer_type(&Value::Array(vec![])), TypeTag::Array);
        assert_eq!(infer_type(&Value::Object(IndexMap::new())), TypeTag::Object);
    }

    #[test]
    fn test_infer_type_envelope() {
        let image = Value::from_json(json!({"type": "image", "src": ""}));
        assert_eq!(infer_type(&image), TypeTag::Image);

        // Unrecognised or non-string tags fall back to object
        let html = Value::from_json(json!({"type": "html", "content": "<img>"}));
        assert_eq!(infer_type(&html), TypeTag::Object);
        let numeric = Value::from_json(json!({"type": 1}));
        assert_eq!(infer_type(&numeric), TypeTag::Object);
    }

    #[test]
    fn test_from_json_number_split() {
        assert_eq!(Value::from_json(json!(7)), Value::Integer(7));
        assert_eq!(Value::from_json(json!(7.5)), Value::Number(7.5));
        assert_eq!(
            Value::from_json(json!(u64::MAX)),
            Value::Number(u64::MAX as f64)
        );
    }

    #[test]
    fn test_tag_names() {
        for tag in TypeTag::ALL {
            assert_eq!(TypeTag::parse(tag.as_str()), Some(tag));
        }
        assert_eq!(TypeTag::parse("matplotlib"), None);
    }
}
