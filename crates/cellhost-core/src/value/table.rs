//! Columnar tables.

use super::{TypeTag, Value, infer_type};
use crate::error::{Error, Result};

/// A named column of cell values.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Value>,
}

impl Column {
    /// Element type of the column, taken from its first non-null value.
    pub fn kind(&self) -> TypeTag {
        self.values
            .iter()
            .find(|v| !matches!(v, Value::Null))
            .map(infer_type)
            .unwrap_or(TypeTag::Null)
    }
}

/// A table: ordered, equal length, named columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    /// Build a table from `(name, values)` pairs in column order.
    pub fn from_columns(columns: Vec<(String, Vec<Value>)>) -> Result<Table> {
        let mut table = Table::default();
        for (name, values) in columns {
            table.push_column(name, values)?;
        }
        Ok(table)
    }

    /// Append a column. Fails if the name is taken or the length differs
    /// from existing columns.
    pub fn push_column(&mut self, name: String, values: Vec<Value>) -> Result<()> {
        if self.column(&name).is_some() {
            return Err(Error::MalformedPackage(format!(
                "duplicate table column: {name}"
            )));
        }
        if let Some(first) = self.columns.first()
            && first.values.len() != values.len()
        {
            return Err(Error::MalformedPackage(format!(
                "column {name} has {} rows, expected {}",
                values.len(),
                first.values.len()
            )));
        }
        self.columns.push(Column { name, values });
        Ok(())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.columns.first().map_or(0, |c| c.values.len())
    }

    /// Iterate over rows, each a vector of references in column order.
    pub fn rows(&self) -> impl Iterator<Item = Vec<&Value>> + '_ {
        (0..self.row_count()).map(move |row| {
            self.columns.iter().map(|c| &c.values[row]).collect()
        })
    }

    /// Column-major JSON: `{"<col>": [v0, v1, ...], ...}`.
    pub(crate) fn to_json_columns(&self) -> Result<serde_json::Value> {
        let mut map = serde_json::Map::with_capacity(self.columns.len());
        for column in &self.columns {
            let values = column
                .values
                .iter()
                .map(Value::to_json)
                .collect::<Result<Vec<_>>>()?;
            map.insert(column.name.clone(), serde_json::Value::Array(values));
        }
        Ok(serde_json::Value::Object(map))
    }

    pub(crate) fn from_json_columns(json: &serde_json::Value) -> Result<Table> {
        let map = json.as_object().ok_or_else(|| {
            Error::MalformedPackage("table columns should be an object".to_string())
        })?;
        let mut table = Table::default();
        for (name, column) in map {
            let values = column.as_array().ok_or_else(|| {
                Error::MalformedPackage(format!("table column {name} should be an array"))
            })?;
            table.push_column(
                name.clone(),
                values.iter().cloned().map(Value::from_json).collect(),
            )?;
        }
        Ok(table)
    }

    /// Parse delimited text with a header row. Column types are inferred:
    /// integer, then number, then boolean, falling back to string. Empty
    /// fields are null.
    pub fn from_delimited(text: &str, delimiter: u8) -> Result<Table> {
        let malformed = |e: csv::Error| Error::MalformedPackage(format!("invalid delimited text: {e}"));

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .from_reader(text.as_bytes());

        let names: Vec<String> = reader
            .headers()
            .map_err(malformed)?
            .iter()
            .map(str::to_string)
            .collect();
        let mut raw: Vec<Vec<String>> = vec![Vec::new(); names.len()];
        for record in reader.records() {
            let record = record.map_err(malformed)?;
            for (index, field) in record.iter().enumerate() {
                if let Some(column) = raw.get_mut(index) {
                    column.push(field.to_string());
                }
            }
        }

        let mut table = Table::default();
        for (name, fields) in names.into_iter().zip(raw) {
            if name.is_empty() && fields.is_empty() {
                continue;
            }
            table.push_column(name, infer_column(fields))?;
        }
        Ok(table)
    }
}

fn infer_column(fields: Vec<String>) -> Vec<Value> {
    let present = || fields.iter().map(|f| f.trim()).filter(|f| !f.is_empty());

    let convert = |parse: &dyn Fn(&str) -> Value| -> Vec<Value> {
        fields
            .iter()
            .map(|f| {
                let f = f.trim();
                if f.is_empty() { Value::Null } else { parse(f) }
            })
            .collect()
    };

    if present().all(|f| f.parse::<i64>().is_ok()) {
        convert(&|f| f.parse().map(Value::Integer).unwrap_or(Value::Null))
    } else if present().all(|f| f.parse::<f64>().is_ok()) {
        convert(&|f| f.parse().map(Value::Number).unwrap_or(Value::Null))
    } else if present().all(|f| f.eq_ignore_ascii_case("true") || f.eq_ignore_ascii_case("false")) {
        convert(&|f| Value::Boolean(f.eq_ignore_ascii_case("true")))
    } else {
        convert(&|f| Value::String(f.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unequal_columns_rejected() {
        let result = Table::from_columns(vec![
            ("a".to_string(), vec![Value::from(1)]),
            ("b".to_string(), vec![]),
        ]);
        assert!(matches!(result, Err(Error::MalformedPackage(_))));
    }

    #[test]
    fn test_column_kind_from_first_value() {
        let column = Column {
            name: "c".to_string(),
            values: vec![Value::Null, Value::from("x"), Value::from(2)],
        };
        assert_eq!(column.kind(), TypeTag::String);
    }

    #[test]
    fn test_delimited_type_inference() {
        let table = Table::from_delimited("i,f,b,s\n1,1.5,true,x\n2,,False,\n", b',').unwrap();
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.column("i").unwrap().values, vec![Value::from(1), Value::from(2)]);
        assert_eq!(table.column("f").unwrap().values, vec![Value::from(1.5), Value::Null]);
        assert_eq!(
            table.column("b").unwrap().values,
            vec![Value::from(true), Value::from(false)]
        );
        assert_eq!(table.column("s").unwrap().values, vec![Value::from("x"), Value::Null]);
    }

    #[test]
    fn test_rows_follow_column_order() {
        let table = Table::from_columns(vec![
            ("a".to_string(), vec![Value::from(1), Value::from(2)]),
            ("b".to_string(), vec![Value::from("x"), Value::from("y")]),
        ])
        .unwrap();
        let rows: Vec<_> = table.rows().collect();
        assert_eq!(rows[1], vec![&Value::from(2), &Value::from("y")]);
    }
}
