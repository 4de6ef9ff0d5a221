//! Python context backed by an embedded CPython interpreter.
//!
//! The persistent scope is a Python dict used as the globals of every
//! execution. Input bindings are placed in that scope before the code runs
//! and withdrawn afterwards unless the cell is global, so lookups check the
//! cell's inputs first and fall back to earlier bindings.
//!
//! A trailing expression statement is split off the parsed code and
//! evaluated once after the other statements, giving the cell's value. It is
//! not run a second time, so its side effects happen once.

mod analyze;
mod convert;

use pyo3::prelude::*;
use pyo3::types::{PyDict, PyModule};
use rustc_hash::{FxHashMap, FxHashSet};

use super::{Context, check_language};
use crate::cell::{Cell, Message, Output};
use crate::error::{Error, Result};
use crate::trace::{self, CODE_FILE, Frame};
use crate::value::{Package, TypeTag, Value, pack};

/// A binding placed in the scope for the duration of one execution.
struct Injected {
    name: String,
    value: Py<PyAny>,
    previous: Option<Py<PyAny>>,
}

/// Package id handed out for a named output, and the object it named.
struct OwnerToken {
    id: String,
    object: Py<PyAny>,
}

/// Context executing Python cells.
pub struct PythonContext {
    scope: Py<PyDict>,
    binding_owner_token: FxHashMap<String, OwnerToken>,
}

impl PythonContext {
    pub fn new() -> Result<Self> {
        let scope = Python::attach(|py| -> PyResult<Py<PyDict>> {
            let scope = PyDict::new(py);
            scope.set_item("__builtins__", py.import("builtins")?)?;
            scope.set_item("__name__", "__main__")?;
            Ok(scope.unbind())
        })?;
        Ok(Self {
            scope,
            binding_owner_token: FxHashMap::default(),
        })
    }

    /// Bind the cell's inputs into the scope. Returns `None`, after
    /// recording a message, if a declared input is missing or malformed.
    ///
    /// Inputs inferred by the compile step of this execution and given no
    /// value are left unbound so the code raises its own name error.
    fn bind_inputs(
        &mut self,
        py: Python<'_>,
        scope: &Bound<'_, PyDict>,
        cell: &mut Cell,
        declared: &FxHashSet<String>,
    ) -> PyResult<Option<Vec<Injected>>> {
        let mut injected = Vec::new();
        let mut failure = None;
        for input in &cell.inputs {
            let Some(raw) = input.value.as_ref().filter(|raw| !raw.is_null()) else {
                if !declared.contains(&input.name) {
                    continue;
                }
                failure = Some(Error::MissingInput(input.name.clone()));
                break;
            };
            let package = match Package::from_json(raw) {
                Ok(package) => package,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            };

            let previous = scope.get_item(&input.name)?;
            let owned = match (&package.id, self.binding_owner_token.get(&input.name), &previous) {
                (Some(id), Some(token), Some(current)) => {
                    *id == token.id && current.is(token.object.bind(py))
                }
                _ => false,
            };
            if owned {
                tracing::debug!(name = %input.name, "reusing scope binding for input");
                continue;
            }

            let object = match package.unpack().and_then(|value| convert::to_python(py, &value)) {
                Ok(object) => object,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            };
            scope.set_item(&input.name, &object)?;
            self.binding_owner_token.remove(&input.name);
            injected.push(Injected {
                name: input.name.clone(),
                value: object.unbind(),
                previous: previous.map(Bound::unbind),
            });
        }

        match failure {
            Some(err) => {
                cell.push_error(Message::error(err.to_string()));
                self.withdraw(py, scope, injected)?;
                Ok(None)
            }
            None => Ok(Some(injected)),
        }
    }

    /// Choose and pack the cell's output value.
    fn capture_output<'py>(
        &mut self,
        py: Python<'py>,
        scope: &Bound<'py, PyDict>,
        cell: &mut Cell,
        evaluated: Option<Bound<'py, PyAny>>,
    ) -> PyResult<()> {
        let named = cell.output_name().map(str::to_string);
        let (object, owner) = match (evaluated, &named) {
            (Some(object), _) => (Some(object), None),
            // An imported module names no value
            (None, Some(name)) => (
                scope
                    .get_item(name)?
                    .filter(|object| !object.is_instance_of::<PyModule>()),
                Some(name.clone()),
            ),
            (None, None) => (None, None),
        };

        let value = match &object {
            Some(object) => convert::to_value(object),
            None => match convert::pending_plot(py)? {
                Some(png) => Ok(Value::Image(png)),
                None => return Ok(()),
            },
        };

        match value.and_then(|value| pack(&value)) {
            Ok(mut package) => {
                if let (Some(name), Some(object)) = (owner, object) {
                    let id = uuid::Uuid::new_v4().to_string();
                    package = package.with_id(id.clone());
                    self.binding_owner_token.insert(
                        name,
                        OwnerToken {
                            id,
                            object: object.unbind(),
                        },
                    );
                }
                cell.set_output(package);
            }
            Err(err) => cell.push_error(Message::error(err.to_string())),
        }
        Ok(())
    }

    fn try_compile(&self, py: Python<'_>, cell: &mut Cell) -> PyResult<()> {
        let scope = self.scope.bind(py);
        match analyze::analyze(py, &cell.code, scope)? {
            Ok(analysis) => {
                for name in &analysis.inputs {
                    cell.declare_input(name);
                }
                if let Some(name) = analysis.output {
                    match cell.outputs.first_mut() {
                        Some(output) => output.name = Some(name),
                        None => cell.outputs.push(Output {
                            name: Some(name),
                            value: None,
                        }),
                    }
                }
            }
            Err(message) => cell.push_error(message),
        }
        Ok(())
    }

    fn try_execute(
        &mut self,
        py: Python<'_>,
        cell: &mut Cell,
        declared: &FxHashSet<String>,
    ) -> PyResult<()> {
        let scope = self.scope.bind(py).clone();
        let Some(injected) = self.bind_inputs(py, &scope, cell, declared)? else {
            return Ok(());
        };

        let result = if cell.is_expression {
            evaluate(py, &scope, &cell.code).map(Some)
        } else {
            run(py, &scope, &cell.code)
        };

        match result {
            Ok(evaluated) => self.capture_output(py, &scope, cell, evaluated)?,
            Err(err) => cell.push_error(exception_message(py, &err)),
        }

        if !cell.is_global {
            self.withdraw(py, &scope, injected)?;
        }
        convert::clear_plots(py)
    }

    /// Remove injected bindings the code did not rebind, restoring what they
    /// replaced.
    fn withdraw(
        &mut self,
        py: Python<'_>,
        scope: &Bound<'_, PyDict>,
        injected: Vec<Injected>,
    ) -> PyResult<()> {
        for entry in injected.into_iter().rev() {
            let Some(current) = scope.get_item(&entry.name)? else {
                continue;
            };
            if !current.is(entry.value.bind(py)) {
                continue;
            }
            self.binding_owner_token.remove(&entry.name);
            match entry.previous {
                Some(previous) => scope.set_item(&entry.name, previous)?,
                None => scope.del_item(&entry.name)?,
            }
        }
        Ok(())
    }
}

/// Run code in the scope. A trailing expression statement is evaluated
/// separately and its value returned.
fn run<'py>(
    py: Python<'py>,
    scope: &Bound<'py, PyDict>,
    code: &str,
) -> PyResult<Option<Bound<'py, PyAny>>> {
    let ast = py.import("ast")?;
    let builtins = py.import("builtins")?;
    let module = ast.call_method1("parse", (code,))?;
    let body = module.getattr("body")?;

    let trailing = match body.len()? {
        0 => None,
        len => {
            let last = body.get_item(len - 1)?;
            let kind: String = last.get_type().getattr("__name__")?.extract()?;
            if kind == "Expr" {
                body.call_method0("pop")?;
                Some(last.getattr("value")?)
            } else {
                None
            }
        }
    };

    let compiled = builtins.call_method1("compile", (module, CODE_FILE, "exec"))?;
    builtins.call_method1("exec", (compiled, scope))?;

    match trailing {
        Some(expression) => {
            let expression = ast.getattr("Expression")?.call1((expression,))?;
            let compiled = builtins.call_method1("compile", (expression, CODE_FILE, "eval"))?;
            builtins.call_method1("eval", (compiled, scope)).map(Some)
        }
        None => Ok(None),
    }
}

/// Evaluate code that is a single expression.
fn evaluate<'py>(
    py: Python<'py>,
    scope: &Bound<'py, PyDict>,
    code: &str,
) -> PyResult<Bound<'py, PyAny>> {
    let builtins = py.import("builtins")?;
    let compiled = builtins.call_method1("compile", (code.trim(), CODE_FILE, "eval"))?;
    builtins.call_method1("eval", (compiled, scope))
}

fn frames(py: Python<'_>, err: &PyErr) -> PyResult<Vec<Frame>> {
    let Some(traceback) = err.traceback(py) else {
        return Ok(Vec::new());
    };
    let summary = py
        .import("traceback")?
        .call_method1("extract_tb", (traceback,))?;
    let mut frames = Vec::new();
    for entry in summary.try_iter()? {
        let entry = entry?;
        let mut frame = Frame::new(
            entry.getattr("filename")?.extract::<String>()?,
            entry.getattr("lineno")?.extract::<Option<usize>>()?.unwrap_or(0),
            entry.getattr("name")?.extract::<String>()?,
        );
        frame.text = entry.getattr("line")?.extract::<Option<String>>()?.unwrap_or_default();
        frames.push(frame);
    }
    Ok(frames)
}

/// Message for an exception raised by user code.
fn exception_message(py: Python<'_>, err: &PyErr) -> Message {
    let value = err.value(py);
    let class_name = value
        .get_type()
        .getattr("__name__")
        .and_then(|name| name.extract::<String>())
        .unwrap_or_else(|_| "Exception".to_string());
    let text = value.str().map(|text| text.to_string()).unwrap_or_default();
    let frames = frames(py, err).unwrap_or_default();
    trace::format_exception(&class_name, &text, &frames)
}

/// Message for a failure of the host machinery rather than of user code.
fn internal_message(py: Python<'_>, err: &PyErr) -> Message {
    let message = exception_message(py, err);
    Message::error(format!("Internal error: {}", message.message))
        .with_trace(message.trace.unwrap_or_default())
}

impl Context for PythonContext {
    fn type_name(&self) -> &'static str {
        "PythonContext"
    }

    fn language(&self) -> &'static str {
        "py"
    }

    fn compile(&mut self, mut cell: Cell) -> Cell {
        if !check_language(&*self, &mut cell) || cell.code.trim().is_empty() {
            return cell;
        }
        tracing::debug!(code_len = cell.code.len(), "compiling python cell");
        Python::attach(|py| {
            if let Err(err) = self.try_compile(py, &mut cell) {
                cell.push_error(internal_message(py, &err));
            }
        });
        cell
    }

    fn execute(&mut self, cell: Cell) -> Cell {
        let declared: FxHashSet<String> =
            cell.inputs.iter().map(|input| input.name.clone()).collect();
        let mut cell = self.compile(cell);
        if cell.has_errors() || cell.code.trim().is_empty() {
            return cell;
        }
        tracing::debug!(inputs = cell.inputs.len(), "executing python cell");
        Python::attach(|py| {
            if let Err(err) = self.try_execute(py, &mut cell, &declared) {
                cell.push_error(internal_message(py, &err));
            }
        });
        cell
    }

    fn list(&mut self, types: Option<&[TypeTag]>) -> Result<Vec<String>> {
        Python::attach(|py| {
            let scope = self.scope.bind(py);
            let mut names = Vec::new();
            for (name, object) in scope.iter() {
                let name: String = name.extract()?;
                if name.starts_with('_') || object.is_instance_of::<PyModule>() {
                    continue;
                }
                if let Some(types) = types {
                    // Bindings with no wire form match no type
                    match convert::type_of(&object)? {
                        Some(tag) if types.contains(&tag) => {}
                        _ => continue,
                    }
                }
                names.push(name);
            }
            Ok(names)
        })
    }
}

impl std::fmt::Debug for PythonContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PythonContext")
            .field("owned_bindings", &self.binding_owner_token.len())
            .finish()
    }
}
