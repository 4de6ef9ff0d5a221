//! SQL context backed by SQLite.
//!
//! SQL cells are not analysed. Instead:
//! - table inputs are materialised as temporary tables named after the input
//! - other inputs are substituted into the code at `${name}` or `$name`
//! - `name = SELECT ...` creates a temporary table `name` and makes it the
//!   cell's output; a bare `SELECT` produces an unnamed output
//!
//! Small output tables are returned inline, larger ones as a pointer that
//! can later be resolved with `fetch`.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use rusqlite::Connection;
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde::{Deserialize, Serialize};

use super::{Context, check_language};
use crate::cell::{Cell, Message, Output};
use crate::error::{Error, Result};
use crate::value::{Package, Table, TablePointer, TypeTag, Value, pack};

/// Table holding the result of a bare `SELECT`.
const RESULT_TABLE: &str = "_result";

static ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*(\w+)\s*=\s*(SELECT\b.*)$").expect("valid regex")
});

static BARE_SELECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)^\s*SELECT\b").expect("valid regex"));

static DATABASE_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.*\.(sqlite3?|db3?)$").expect("valid regex"));

/// Options for a SQLite context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteOptions {
    /// Database file to open.
    pub path: Option<PathBuf>,
    /// Directory searched for a database file when no path is given.
    pub dir: Option<PathBuf>,
    /// Largest output table returned inline rather than as a pointer.
    pub max_rows: usize,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            path: None,
            dir: None,
            max_rows: 30,
        }
    }
}

impl SqliteOptions {
    /// The database to open: the explicit path, else the first database file
    /// in `dir` by name, else none (in memory).
    pub fn database(&self) -> Result<Option<PathBuf>> {
        if let Some(path) = &self.path {
            return Ok(Some(path.clone()));
        }
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        let mut found: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| DATABASE_FILE.is_match(name))
            })
            .collect();
        found.sort();
        Ok(found.into_iter().next())
    }
}

/// Context executing SQL cells against a SQLite database.
pub struct SqliteContext {
    name: String,
    database: Option<PathBuf>,
    connection: Connection,
    max_rows: usize,
}

impl SqliteContext {
    /// Open a context. `name` is the instance name used in pointers.
    pub fn new(name: impl Into<String>, options: SqliteOptions) -> Result<Self> {
        let database = options.database()?;
        let connection = match &database {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        tracing::info!(database = ?database, "opened sqlite context");
        Ok(Self {
            name: name.into(),
            database,
            connection,
            max_rows: options.max_rows,
        })
    }

    pub fn database(&self) -> Option<&Path> {
        self.database.as_deref()
    }

    /// Read a whole table.
    pub fn read_table(&self, name: &str) -> Result<Table> {
        let mut statement = self
            .connection
            .prepare(&format!("SELECT * FROM {}", quote_identifier(name)))?;
        let names: Vec<String> = statement.column_names().into_iter().map(str::to_string).collect();
        let mut columns: Vec<Vec<Value>> = vec![Vec::new(); names.len()];
        let mut rows = statement.query([])?;
        while let Some(row) = rows.next()? {
            for (index, column) in columns.iter_mut().enumerate() {
                column.push(from_sql(row.get_ref(index)?));
            }
        }
        Table::from_columns(names.into_iter().zip(columns).collect())
    }

    /// Full package for a table, used to resolve a pointer.
    pub fn fetch(&self, name: &str) -> Result<Package> {
        pack(&Value::Table(self.read_table(name)?))
    }

    fn row_count(&self, name: &str) -> Result<usize> {
        let count: i64 = self.connection.query_row(
            &format!("SELECT count(*) FROM {}", quote_identifier(name)),
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Create a temporary table holding a table input.
    fn materialize(&self, name: &str, table: &Table) -> Result<()> {
        let quoted = quote_identifier(name);
        let columns: Vec<String> = table
            .columns()
            .iter()
            .map(|column| {
                let affinity = match column.kind() {
                    TypeTag::Boolean | TypeTag::Integer => " INTEGER",
                    TypeTag::Number => " REAL",
                    TypeTag::String => " TEXT",
                    _ => "",
                };
                format!("{}{affinity}", quote_identifier(&column.name))
            })
            .collect();
        self.connection.execute_batch(&format!(
            "DROP TABLE IF EXISTS temp.{quoted}; CREATE TEMPORARY TABLE {quoted} ({});",
            columns.join(", ")
        ))?;

        let placeholders = vec!["?"; table.column_count()].join(", ");
        let mut insert = self
            .connection
            .prepare(&format!("INSERT INTO temp.{quoted} VALUES ({placeholders})"))?;
        for row in table.rows() {
            let params = row.into_iter().map(to_sql).collect::<Result<Vec<_>>>()?;
            insert.execute(rusqlite::params_from_iter(params))?;
        }
        tracing::debug!(name, rows = table.row_count(), "materialised table input");
        Ok(())
    }

    /// Bind inputs: materialise tables and render everything else as SQL
    /// literals for substitution.
    fn bind_inputs(&self, cell: &Cell) -> Result<Vec<(String, String)>> {
        let mut variables = Vec::with_capacity(cell.inputs.len());
        for input in &cell.inputs {
            let raw = input
                .value
                .as_ref()
                .filter(|raw| !raw.is_null())
                .ok_or_else(|| Error::MissingInput(input.name.clone()))?;
            let literal = match Package::from_json(raw)?.unpack()? {
                Value::Table(table) => {
                    self.materialize(&input.name, &table)?;
                    quote_identifier(&input.name)
                }
                Value::Pointer(pointer) if pointer.context == self.name => {
                    if pointer.name != input.name {
                        let alias = quote_identifier(&input.name);
                        self.connection.execute_batch(&format!(
                            "DROP VIEW IF EXISTS temp.{alias}; CREATE TEMPORARY VIEW {alias} AS SELECT * FROM {};",
                            quote_identifier(&pointer.name)
                        ))?;
                    }
                    quote_identifier(&pointer.name)
                }
                Value::Pointer(pointer) => {
                    return Err(Error::InvalidArguments(format!(
                        "input \"{}\" points to a table in another context: {}",
                        input.name, pointer.context
                    )));
                }
                value => sql_literal(&value)?,
            };
            variables.push((input.name.clone(), literal));
        }
        Ok(variables)
    }

    fn run(&mut self, cell: &mut Cell) -> Result<()> {
        let variables = self.bind_inputs(cell)?;
        let sql = match substitute(&cell.code, &variables) {
            Ok(sql) => sql,
            Err(message) => {
                cell.push_error(Message::error(message));
                return Ok(());
            }
        };

        let (sql, output) = if let Some(caps) = ASSIGNMENT.captures(&sql) {
            let name = caps[1].to_string();
            (create_table(&name, &caps[2]), Some(Some(name)))
        } else if BARE_SELECT.is_match(&sql) {
            (create_table(RESULT_TABLE, &sql), Some(None))
        } else {
            (sql, None)
        };

        tracing::debug!(%sql, "executing sql cell");
        if let Err(err) = self.connection.execute_batch(&sql) {
            cell.push_error(Message::error(engine_message(err)));
            return Ok(());
        }

        let Some(name) = output else {
            return Ok(());
        };
        let table = name.as_deref().unwrap_or(RESULT_TABLE);
        let rows = self.row_count(table)?;
        let value = if rows <= self.max_rows {
            Value::Table(self.read_table(table)?)
        } else {
            Value::Pointer(TablePointer {
                context: self.name.clone(),
                name: table.to_string(),
                rows,
            })
        };
        let package = pack(&value)?;
        match cell.outputs.first_mut() {
            Some(slot) => {
                if name.is_some() {
                    slot.name = name;
                }
                slot.value = Some(package);
            }
            None => cell.outputs.push(Output {
                name,
                value: Some(package),
            }),
        }
        Ok(())
    }
}

fn create_table(name: &str, select: &str) -> String {
    format!("DROP TABLE IF EXISTS {name}; CREATE TEMPORARY TABLE {name} AS {select}")
}

/// The engine's own message for a failed statement, without the statement
/// text and offset rusqlite appends.
pub(crate) fn engine_message(err: rusqlite::Error) -> String {
    match err {
        rusqlite::Error::SqlInputError { msg, .. } => msg,
        rusqlite::Error::SqliteFailure(_, Some(msg)) => msg,
        err => err.to_string(),
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Number(f),
        ValueRef::Text(text) => Value::String(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(bytes) => Value::String(STANDARD.encode(bytes)),
    }
}

fn to_sql(value: &Value) -> Result<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Boolean(b) => SqlValue::Integer(i64::from(*b)),
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Number(n) if n.is_nan() => SqlValue::Null,
        Value::Number(n) => SqlValue::Real(*n),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Image(png) => SqlValue::Blob(png.clone()),
        other => SqlValue::Text(other.to_json()?.to_string()),
    })
}

/// Render a value as a SQL literal. Arrays become tuples so they can be
/// used with `IN`.
fn sql_literal(value: &Value) -> Result<String> {
    Ok(match value {
        Value::Null => "NULL".to_string(),
        Value::Boolean(b) => (if *b { "1" } else { "0" }).to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) if n.is_finite() => n.to_string(),
        Value::Number(_) => "NULL".to_string(),
        Value::String(s) => quote_string(s),
        Value::Array(items) => {
            let items = items.iter().map(sql_literal).collect::<Result<Vec<_>>>()?;
            format!("({})", items.join(", "))
        }
        other => quote_string(&other.to_json()?.to_string()),
    })
}

fn quote_string(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Replace `${name}` and `$name` placeholders. `$$` is a literal dollar.
/// A placeholder with no matching variable is an error.
fn substitute(code: &str, variables: &[(String, String)]) -> std::result::Result<String, String> {
    let lookup = |name: &str| {
        variables
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, literal)| literal.as_str())
            .ok_or_else(|| format!("No value for placeholder: {name}"))
    };

    let mut out = String::with_capacity(code.len());
    let mut chars = code.char_indices().peekable();
    while let Some((index, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek().map(|&(_, next)| next) {
            Some('$') => {
                chars.next();
                out.push('$');
            }
            Some('{') => {
                let rest = &code[index + 2..];
                let end = rest
                    .find('}')
                    .ok_or_else(|| format!("Unterminated placeholder at {index}"))?;
                out.push_str(lookup(rest[..end].trim())?);
                // Skip past the closing brace
                while let Some((_, skipped)) = chars.next() {
                    if skipped == '}' {
                        break;
                    }
                }
            }
            Some(next) if next == '_' || next.is_ascii_alphabetic() => {
                let mut name = String::new();
                while let Some(&(_, next)) = chars.peek() {
                    if next == '_' || next.is_ascii_alphanumeric() {
                        name.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(lookup(&name)?);
            }
            _ => out.push('$'),
        }
    }
    Ok(out)
}

#[derive(Deserialize)]
struct FetchArgs {
    name: String,
}

impl Context for SqliteContext {
    fn type_name(&self) -> &'static str {
        "SqliteContext"
    }

    fn language(&self) -> &'static str {
        "sql"
    }

    fn compile(&mut self, mut cell: Cell) -> Cell {
        check_language(&*self, &mut cell);
        cell
    }

    fn execute(&mut self, cell: Cell) -> Cell {
        let mut cell = self.compile(cell);
        if cell.has_errors() || cell.code.trim().is_empty() {
            return cell;
        }
        if let Err(err) = self.run(&mut cell) {
            cell.push_error(Message::error(err.to_string()));
        }
        cell
    }

    fn list(&mut self, types: Option<&[TypeTag]>) -> Result<Vec<String>> {
        if types.is_some_and(|types| !types.contains(&TypeTag::Table)) {
            return Ok(Vec::new());
        }
        let mut statement = self.connection.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' \
             UNION SELECT name FROM sqlite_temp_master WHERE type = 'table' \
             ORDER BY name",
        )?;
        let names = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    fn call_extra(&mut self, method: &str, args: serde_json::Value) -> Result<serde_json::Value> {
        match method {
            "fetch" => {
                let args: FetchArgs = serde_json::from_value(args)
                    .map_err(|e| Error::InvalidArguments(format!("invalid fetch arguments: {e}")))?;
                Ok(serde_json::to_value(self.fetch(&args.name)?)?)
            }
            _ => Err(Error::UnknownMethod(method.to_string())),
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "SqliteContext",
            "lang": "sql",
            "name": self.name,
            "database": self.database.as_ref().map(|path| path.display().to_string()),
            "max_rows": self.max_rows,
        })
    }
}

impl std::fmt::Debug for SqliteContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteContext")
            .field("name", &self.name)
            .field("database", &self.database)
            .finish()
    }
}
