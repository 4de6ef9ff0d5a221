//! Stateful execution contexts.
//!
//! A context owns a persistent scope and runs cells against it:
//! - `compile` analyses a cell's dependencies without running it
//! - `execute` compiles, binds inputs, runs the code and packs the output
//! - `list` names the bindings currently held by the scope
//!
//! Each guest language is one implementing type, behind a Cargo feature.

#[cfg(feature = "python")]
pub mod python;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "python")]
pub use python::PythonContext;
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteContext, SqliteOptions};

use serde::Deserialize;

use crate::cell::{Cell, Message};
use crate::error::{Error, Result};
use crate::registry::Instance;
use crate::value::TypeTag;

/// A language specific evaluator with a persistent scope.
pub trait Context: Send {
    /// Registry type name, such as `PythonContext`.
    fn type_name(&self) -> &'static str;

    /// Language code that cells must carry, if they carry one.
    fn language(&self) -> &'static str;

    /// Analyse a cell's inputs and output. Never fails: problems are
    /// reported as messages on the returned cell.
    fn compile(&mut self, cell: Cell) -> Cell;

    /// Compile and run a cell. Never fails: problems are reported as
    /// messages on the returned cell.
    fn execute(&mut self, cell: Cell) -> Cell;

    /// Names bound in the scope, optionally restricted to some value types.
    fn list(&mut self, types: Option<&[TypeTag]>) -> Result<Vec<String>>;

    /// Methods beyond the common ones. The default knows none.
    fn call_extra(&mut self, method: &str, _args: serde_json::Value) -> Result<serde_json::Value> {
        Err(Error::UnknownMethod(method.to_string()))
    }

    /// Serializable summary of the context, used as the instance snapshot.
    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "type": self.type_name(),
            "lang": self.language(),
        })
    }
}

/// Check that a cell is meant for this language, recording a message if not.
pub(crate) fn check_language(context: &dyn Context, cell: &mut Cell) -> bool {
    match cell.language.as_deref() {
        Some(found) if !found.is_empty() && found != context.language() => {
            let err = Error::LanguageMismatch {
                expected: context.language().to_string(),
                found: found.to_string(),
            };
            cell.push_error(Message::error(err.to_string()));
            false
        }
        _ => true,
    }
}

/// Arguments to `compile` and `execute`: the cell itself or `{cell: ...}`.
fn cell_argument(args: serde_json::Value) -> Result<Cell> {
    let args = match args {
        serde_json::Value::Object(mut map) if map.contains_key("cell") => {
            map.remove("cell").unwrap_or_default()
        }
        other => other,
    };
    serde_json::from_value(args).map_err(|e| Error::InvalidArguments(format!("invalid cell: {e}")))
}

#[derive(Deserialize)]
struct ListArgs {
    #[serde(default)]
    types: Option<Vec<TypeTag>>,
}

impl<C: Context> Instance for C {
    fn type_name(&self) -> &'static str {
        Context::type_name(self)
    }

    fn call(&mut self, method: &str, args: serde_json::Value) -> Result<serde_json::Value> {
        match method {
            "compile" => {
                let cell = self.compile(cell_argument(args)?);
                Ok(serde_json::to_value(cell)?)
            }
            "execute" => {
                let cell = self.execute(cell_argument(args)?);
                Ok(serde_json::to_value(cell)?)
            }
            "list" => {
                let args: ListArgs = if args.is_null() {
                    ListArgs { types: None }
                } else {
                    serde_json::from_value(args)
                        .map_err(|e| Error::InvalidArguments(format!("invalid list arguments: {e}")))?
                };
                Ok(serde_json::to_value(self.list(args.types.as_deref())?)?)
            }
            _ => self.call_extra(method, args),
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        Context::snapshot(self)
    }
}
