//! The `{type, format, data}` wire package and the pack/unpack codec.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{FunctionSpec, Table, TypeTag, Value, infer_type};
use crate::error::{Error, Result};

/// Prefix of an inline PNG image source.
const PNG_DATA_URL: &str = "data:image/png;base64,";

/// Encoding of a package's `data` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// `data` is JSON. Older clients call this `text`.
    #[default]
    #[serde(alias = "text")]
    Json,
    /// `data` is comma separated text.
    Csv,
    /// `data` is tab separated text.
    Tsv,
    /// `data` is a data URL.
    Src,
    /// `data` is a [`TablePointer`].
    Pointer,
}

impl Format {
    fn parse(name: &str) -> Option<Format> {
        match name {
            "json" | "text" => Some(Format::Json),
            "csv" => Some(Format::Csv),
            "tsv" => Some(Format::Tsv),
            "src" => Some(Format::Src),
            "pointer" => Some(Format::Pointer),
            _ => None,
        }
    }
}

/// A single packed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    #[serde(rename = "type")]
    pub type_tag: TypeTag,
    #[serde(default)]
    pub format: Format,
    pub data: serde_json::Value,
    /// Identity of the native object this package was made from, when the
    /// packing context still owns that object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Reference to a table that stays inside the context that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TablePointer {
    /// Instance name of the owning context.
    pub context: String,
    /// Table name inside that context.
    pub name: String,
    /// Row count at the time the pointer was made.
    pub rows: usize,
}

impl Package {
    fn json(type_tag: TypeTag, data: serde_json::Value) -> Self {
        Self {
            type_tag,
            format: Format::Json,
            data,
            id: None,
        }
    }

    /// Attach an ownership token.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Validate a decoded JSON package, or a JSON encoded string holding one.
    pub fn from_json(json: &serde_json::Value) -> Result<Package> {
        if let serde_json::Value::String(text) = json {
            let parsed: serde_json::Value = serde_json::from_str(text)
                .map_err(|e| Error::MalformedPackage(format!("invalid JSON: {e}")))?;
            if parsed.is_string() {
                return Err(Error::MalformedPackage(
                    "package should be an object".to_string(),
                ));
            }
            return Package::from_json(&parsed);
        }

        let Some(fields) = json.as_object() else {
            return Err(Error::MalformedPackage(
                "package should be an object".to_string(),
            ));
        };
        let (Some(type_name), Some(data)) = (fields.get("type"), fields.get("data")) else {
            return Err(Error::MalformedPackage(
                "package should have fields `type`, `data`".to_string(),
            ));
        };
        let type_name = type_name
            .as_str()
            .ok_or_else(|| Error::MalformedPackage("`type` should be a string".to_string()))?;
        let type_tag = TypeTag::parse(type_name)
            .ok_or_else(|| Error::MalformedPackage(format!("unknown type: {type_name}")))?;

        let format = match fields.get("format") {
            None | Some(serde_json::Value::Null) => Format::Json,
            Some(serde_json::Value::String(name)) => Format::parse(name).ok_or_else(|| {
                Error::MalformedPackage(format!("unknown format: {name} (type: {type_name})"))
            })?,
            Some(other) => {
                return Err(Error::MalformedPackage(format!(
                    "`format` should be a string, got {other}"
                )));
            }
        };

        let id = fields
            .get("id")
            .and_then(|id| id.as_str())
            .map(str::to_string);

        Ok(Package {
            type_tag,
            format,
            data: data.clone(),
            id,
        })
    }

    /// Decode this package into a value.
    ///
    /// The package records only the type tag, so an object that claimed an
    /// envelope type with its own `type` field (`table`, `image`, `function`)
    /// decodes as that type rather than as an object.
    pub fn unpack(&self) -> Result<Value> {
        let malformed = |what: &str| {
            Error::MalformedPackage(format!(
                "{what} (type: {}, format: {:?})",
                self.type_tag, self.format
            ))
        };

        match (self.type_tag, self.format) {
            (TypeTag::Null, _) => Ok(Value::Null),
            (TypeTag::Boolean, _) => match &self.data {
                serde_json::Value::Bool(b) => Ok(Value::Boolean(*b)),
                serde_json::Value::String(s) if s == "true" => Ok(Value::Boolean(true)),
                serde_json::Value::String(s) if s == "false" => Ok(Value::Boolean(false)),
                _ => Err(malformed("expected a boolean")),
            },
            (TypeTag::Integer, _) => match &self.data {
                serde_json::Value::Number(n) => {
                    n.as_i64().map(Value::Integer).ok_or_else(|| malformed("expected an integer"))
                }
                serde_json::Value::String(s) => s
                    .trim()
                    .parse()
                    .map(Value::Integer)
                    .map_err(|_| malformed("expected an integer")),
                _ => Err(malformed("expected an integer")),
            },
            (TypeTag::Number, _) => match &self.data {
                serde_json::Value::Number(n) => n
                    .as_f64()
                    .map(Value::Number)
                    .ok_or_else(|| malformed("expected a number")),
                serde_json::Value::String(s) => s
                    .trim()
                    .parse()
                    .map(Value::Number)
                    .map_err(|_| malformed("expected a number")),
                serde_json::Value::Null => Ok(Value::Number(f64::NAN)),
                _ => Err(malformed("expected a number")),
            },
            (TypeTag::String, _) => match &self.data {
                serde_json::Value::String(s) => Ok(Value::String(s.clone())),
                _ => Err(malformed("expected a string")),
            },
            (TypeTag::Array, _) => match embedded_json(&self.data)? {
                json @ serde_json::Value::Array(_) => Ok(Value::from_json(json)),
                _ => Err(malformed("expected an array")),
            },
            (TypeTag::Object, _) => match embedded_json(&self.data)? {
                json @ serde_json::Value::Object(_) => Ok(Value::from_json(json)),
                _ => Err(malformed("expected an object")),
            },
            (TypeTag::Table, Format::Json) => {
                let columns = self
                    .data
                    .get("data")
                    .ok_or_else(|| malformed("table data should have a `data` field"))?;
                Table::from_json_columns(columns).map(Value::Table)
            }
            (TypeTag::Table, Format::Csv) => {
                let text = self.data.as_str().ok_or_else(|| malformed("expected text"))?;
                Table::from_delimited(text, b',').map(Value::Table)
            }
            (TypeTag::Table, Format::Tsv) => {
                let text = self.data.as_str().ok_or_else(|| malformed("expected text"))?;
                Table::from_delimited(text, b'\t').map(Value::Table)
            }
            (TypeTag::Table, Format::Pointer) => serde_json::from_value(self.data.clone())
                .map(Value::Pointer)
                .map_err(|e| malformed(&format!("invalid pointer: {e}"))),
            (TypeTag::Image, _) => match &self.data {
                serde_json::Value::String(src) => decode_image(src).map(Value::Image),
                json @ serde_json::Value::Object(_) => Ok(Value::from_json(json.clone())),
                _ => Err(malformed("expected an image source")),
            },
            (TypeTag::Function, _) => {
                match serde_json::from_value::<FunctionSpec>(self.data.clone()) {
                    Ok(spec) => Ok(Value::Function(spec)),
                    Err(_) if self.data.is_object() => Ok(Value::from_json(self.data.clone())),
                    Err(e) => Err(malformed(&format!("invalid function: {e}"))),
                }
            }
            (TypeTag::Table, Format::Src) => Err(malformed("unable to unpack")),
        }
    }
}

/// Pack a value into a package.
pub fn pack(value: &Value) -> Result<Package> {
    let type_tag = infer_type(value);
    Ok(match value {
        Value::Null => Package::json(type_tag, serde_json::Value::Null),
        Value::Boolean(_)
        | Value::Integer(_)
        | Value::Number(_)
        | Value::String(_)
        | Value::Array(_)
        | Value::Object(_) => Package::json(type_tag, value.to_json()?),
        Value::Table(table) => Package::json(
            TypeTag::Table,
            json!({"type": "table", "data": table.to_json_columns()?}),
        ),
        Value::Image(png) => Package {
            type_tag: TypeTag::Image,
            format: Format::Src,
            data: serde_json::Value::String(format!("{PNG_DATA_URL}{}", STANDARD.encode(png))),
            id: None,
        },
        Value::Function(spec) => Package::json(TypeTag::Function, serde_json::to_value(spec)?),
        Value::Pointer(pointer) => Package {
            type_tag: TypeTag::Table,
            format: Format::Pointer,
            data: serde_json::to_value(pointer)?,
            id: None,
        },
    })
}

/// Unpack a package given as decoded JSON (or a JSON string holding one).
pub fn unpack(json: &serde_json::Value) -> Result<Value> {
    Package::from_json(json)?.unpack()
}

/// Unpack a JSON encoded package.
pub fn unpack_str(text: &str) -> Result<Value> {
    unpack(&serde_json::Value::String(text.to_string()))
}

/// Array and object data may arrive JSON encoded as a string.
fn embedded_json(data: &serde_json::Value) -> Result<serde_json::Value> {
    match data {
        serde_json::Value::String(text) => serde_json::from_str(text)
            .map_err(|e| Error::MalformedPackage(format!("invalid embedded JSON: {e}"))),
        other => Ok(other.clone()),
    }
}

/// Decode a data URL or a bare base64 payload into image bytes.
fn decode_image(src: &str) -> Result<Vec<u8>> {
    let payload = match src.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest.split_once(',').ok_or_else(|| {
                Error::MalformedPackage("image data URL has no payload".to_string())
            })?;
            if !header.ends_with(";base64") {
                return Err(Error::MalformedPackage(
                    "image data URL is not base64 encoded".to_string(),
                ));
            }
            payload
        }
        None => src,
    };
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(STANDARD.decode(compact)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: Value) {
        let package = pack(&value).unwrap();
        let json = serde_json::to_value(&package).unwrap();
        assert_eq!(unpack(&json).unwrap(), value);
    }

    #[test]
    fn test_pack_primitives() {
        let package = pack(&Value::Null).unwrap();
        assert_eq!(package.type_tag, TypeTag::Null);
        assert_eq!(package.format, Format::Json);
        assert_eq!(package.data, serde_json::Value::Null);

        assert_eq!(pack(&Value::from(true)).unwrap().data, json!(true));
        assert_eq!(pack(&Value::from(1_000_000_000)).unwrap().data, json!(1_000_000_000));
        assert_eq!(pack(&Value::from(3.14)).unwrap().data, json!(3.14));
        assert_eq!(pack(&Value::from(1.1e20)).unwrap().data, json!(1.1e20));
        assert_eq!(pack(&Value::from("Yo!")).unwrap().data, json!("Yo!"));
    }

    #[test]
    fn test_primitive_roundtrips() {
        roundtrip(Value::Null);
        roundtrip(Value::from(false));
        roundtrip(Value::from(-42));
        roundtrip(Value::from(std::f64::consts::PI));
        roundtrip(Value::from(""));
        roundtrip(Value::from_json(json!([1, 2.5, "x", [true, null]])));
        roundtrip(Value::from_json(
            json!({"a": 1, "b": 3.14, "c": "foo", "d": {"e": 1, "f": 2}}),
        ));
    }

    #[test]
    fn test_table_packing_is_exact() {
        let table = Table::from_columns(vec![
            ("a".to_string(), vec![Value::from(1), Value::from(2), Value::from(3)]),
            ("b".to_string(), vec![Value::from("x"), Value::from("y"), Value::from("z")]),
        ])
        .unwrap();
        let package = pack(&Value::Table(table.clone())).unwrap();
        assert_eq!(package.type_tag, TypeTag::Table);
        assert_eq!(
            serde_json::to_string(&package.data).unwrap(),
            r#"{"type":"table","data":{"a":[1,2,3],"b":["x","y","z"]}}"#
        );
        roundtrip(Value::Table(table));
    }

    #[test]
    fn test_unpack_accepts_json_string() {
        assert_eq!(
            unpack_str(r#"{"type":"null","format":"text","data":"null"}"#).unwrap(),
            Value::Null
        );
        assert_eq!(
            unpack(&json!({"type": "integer", "format": "text", "data": "42"})).unwrap(),
            Value::Integer(42)
        );
        assert_eq!(
            unpack(&json!({"type": "boolean", "data": "false"})).unwrap(),
            Value::Boolean(false)
        );
        assert_eq!(
            unpack(&json!({"type": "array", "data": "[1,2,3]"})).unwrap(),
            Value::from_json(json!([1, 2, 3]))
        );
    }

    #[test]
    fn test_unpack_malformed() {
        let cases = [
            json!(1),
            json!({}),
            json!("{}"),
            json!({"type": "null"}),
            json!({"type": "null", "format": "text"}),
            json!({"type": "foo", "format": "foo", "data": "bar"}),
            json!({"type": "table", "format": "foo", "data": "bar"}),
            json!({"type": "integer", "data": "forty two"}),
        ];
        for case in cases {
            let err = unpack(&case).unwrap_err();
            assert!(
                matches!(err, Error::MalformedPackage(_)),
                "{case} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_unpack_delimited_tables() {
        let expected = Table::from_columns(vec![
            ("a".to_string(), vec![Value::from(1), Value::from(2), Value::from(3)]),
            ("b".to_string(), vec![Value::from("x"), Value::from("y"), Value::from("z")]),
        ])
        .unwrap();
        let csv = unpack(&json!({"type": "table", "format": "csv", "data": "a,b\n1,x\n2,y\n3,z"}))
            .unwrap();
        let tsv = unpack(&json!({"type": "table", "format": "tsv", "data": "a\tb\n1\tx\n2\ty\n3\tz"}))
            .unwrap();
        assert_eq!(csv, Value::Table(expected.clone()));
        assert_eq!(tsv, Value::Table(expected));
    }

    #[test]
    fn test_image_packing() {
        let png = vec![0x89, b'P', b'N', b'G', 0, 1, 2, 3];
        let package = pack(&Value::Image(png.clone())).unwrap();
        assert_eq!(package.format, Format::Src);
        assert!(package.data.as_str().unwrap().starts_with("data:image/png;base64,"));
        roundtrip(Value::Image(png.clone()));

        // Bare base64 payloads decode as well
        let bare = json!({"type": "image", "format": "json", "data": STANDARD.encode(&png)});
        assert_eq!(unpack(&bare).unwrap(), Value::Image(png));
    }

    #[test]
    fn test_object_envelope_passes_through() {
        let envelope = Value::from_json(json!({"type": "table", "data": {"x": [1, 2]}}));
        let package = pack(&envelope).unwrap();
        assert_eq!(package.type_tag, TypeTag::Table);
        match package.unpack().unwrap() {
            Value::Table(table) => assert_eq!(table.row_count(), 2),
            other => panic!("expected a table, got {other:?}"),
        }
    }

    #[test]
    fn test_function_envelope_decodes_as_function() {
        let envelope = Value::from_json(json!({
            "type": "function",
            "name": "f",
            "methods": {"f": {"params": []}}
        }));
        let package = pack(&envelope).unwrap();
        assert_eq!(package.type_tag, TypeTag::Function);
        match package.unpack().unwrap() {
            Value::Function(spec) => assert_eq!(spec.name, "f"),
            other => panic!("expected a function, got {other:?}"),
        }

        let plain = Value::from_json(json!({"type": "integer", "value": 1}));
        assert_eq!(pack(&plain).unwrap().unpack().unwrap(), plain);
    }

    #[test]
    fn test_pointer_roundtrip() {
        roundtrip(Value::Pointer(TablePointer {
            context: "sqliteContext1".to_string(),
            name: "big".to_string(),
            rows: 1000,
        }));
    }

    #[test]
    fn test_id_is_carried() {
        let package = pack(&Value::from(1)).unwrap().with_id("abc");
        let json = serde_json::to_value(&package).unwrap();
        assert_eq!(json["id"], json!("abc"));
        assert_eq!(Package::from_json(&json).unwrap().id.as_deref(), Some("abc"));

        let plain = serde_json::to_value(pack(&Value::from(1)).unwrap()).unwrap();
        assert!(plain.get("id").is_none());
    }
}
