//! Dependency analysis of Python code using the interpreter's own `ast`
//! module.

use pyo3::exceptions::PySyntaxError;
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList};

use crate::analysis::{Analysis, NameCollector};
use crate::cell::Message;

/// Class name of an AST node.
fn kind(node: &Bound<'_, PyAny>) -> PyResult<String> {
    node.get_type().getattr("__name__")?.extract()
}

/// Name bound by an import alias: the alias, else the top-level package.
fn alias_name(alias: &Bound<'_, PyAny>) -> PyResult<Option<String>> {
    let asname = alias.getattr("asname")?;
    if !asname.is_none() {
        return Ok(Some(asname.extract()?));
    }
    let name: String = alias.getattr("name")?.extract()?;
    if name == "*" {
        return Ok(None);
    }
    Ok(name.split('.').next().map(str::to_string))
}

struct Walker<'py> {
    node_class: Bound<'py, PyAny>,
    names: NameCollector,
}

impl<'py> Walker<'py> {
    fn visit_all(&mut self, nodes: &Bound<'py, PyAny>) -> PyResult<()> {
        if nodes.is_none() {
            return Ok(());
        }
        for node in nodes.try_iter()? {
            let node = node?;
            if node.is_instance(&self.node_class)? {
                self.visit(&node)?;
            }
        }
        Ok(())
    }

    /// Descend into every child node.
    fn visit_children(&mut self, node: &Bound<'py, PyAny>) -> PyResult<()> {
        for field in node.getattr("_fields")?.try_iter()? {
            let field: String = field?.extract()?;
            let Ok(child) = node.getattr(field.as_str()) else {
                continue;
            };
            if child.is_instance_of::<PyList>() {
                self.visit_all(&child)?;
            } else if child.is_instance(&self.node_class)? {
                self.visit(&child)?;
            }
        }
        Ok(())
    }

    /// Names assigned by a loop or comprehension target are local to it.
    fn exclude_targets(&mut self, target: &Bound<'py, PyAny>) -> PyResult<()> {
        match kind(target)?.as_str() {
            "Name" => self.names.excluded(&target.getattr("id")?.extract::<String>()?),
            "Tuple" | "List" => {
                for element in target.getattr("elts")?.try_iter()? {
                    self.exclude_targets(&element?)?;
                }
            }
            "Starred" => self.exclude_targets(&target.getattr("value")?)?,
            _ => {}
        }
        Ok(())
    }

    /// Defaults and decorators are evaluated where a function is defined;
    /// its body is not.
    fn visit_signature(&mut self, node: &Bound<'py, PyAny>) -> PyResult<()> {
        let args = node.getattr("args")?;
        self.visit_all(&args.getattr("defaults")?)?;
        self.visit_all(&args.getattr("kw_defaults")?)?;
        Ok(())
    }

    fn visit(&mut self, node: &Bound<'py, PyAny>) -> PyResult<()> {
        match kind(node)?.as_str() {
            "Name" => {
                let id: String = node.getattr("id")?.extract()?;
                match kind(&node.getattr("ctx")?)?.as_str() {
                    "Load" => self.names.used(&id),
                    "Store" => self.names.declared(&id),
                    _ => {}
                }
            }
            "FunctionDef" | "AsyncFunctionDef" => {
                self.names.declared(&node.getattr("name")?.extract::<String>()?);
                self.visit_all(&node.getattr("decorator_list")?)?;
                self.visit_signature(node)?;
            }
            "ClassDef" => {
                self.names.declared(&node.getattr("name")?.extract::<String>()?);
                self.visit_all(&node.getattr("decorator_list")?)?;
                self.visit_all(&node.getattr("bases")?)?;
            }
            "Lambda" => self.visit_signature(node)?,
            "Import" | "ImportFrom" => {
                for alias in node.getattr("names")?.try_iter()? {
                    if let Some(name) = alias_name(&alias?)? {
                        self.names.declared(&name);
                    }
                }
            }
            "Global" | "Nonlocal" => {
                for name in node.getattr("names")?.try_iter()? {
                    self.names.declared(&name?.extract::<String>()?);
                }
            }
            "For" | "AsyncFor" => {
                self.exclude_targets(&node.getattr("target")?)?;
                self.visit_children(node)?;
            }
            "ListComp" | "SetComp" | "GeneratorExp" | "DictComp" => {
                for generator in node.getattr("generators")?.try_iter()? {
                    self.exclude_targets(&generator?.getattr("target")?)?;
                }
                self.visit_children(node)?;
            }
            _ => self.visit_children(node)?,
        }
        Ok(())
    }
}

/// Name bound by a top-level statement, if it binds exactly one.
fn bound_name(statement: &Bound<'_, PyAny>) -> PyResult<Option<String>> {
    fn target_name(target: Bound<'_, PyAny>) -> PyResult<Option<String>> {
        if kind(&target)? == "Name" {
            Ok(Some(target.getattr("id")?.extract()?))
        } else {
            Ok(None)
        }
    }
    match kind(statement)?.as_str() {
        "Assign" => match statement.getattr("targets")?.try_iter()?.next() {
            Some(target) => target_name(target?),
            None => Ok(None),
        },
        "AnnAssign" | "AugAssign" => target_name(statement.getattr("target")?),
        "FunctionDef" | "AsyncFunctionDef" | "ClassDef" => {
            Ok(Some(statement.getattr("name")?.extract()?))
        }
        "Import" | "ImportFrom" => {
            let mut last = None;
            for alias in statement.getattr("names")?.try_iter()? {
                last = alias_name(&alias?)?;
            }
            Ok(last)
        }
        _ => Ok(None),
    }
}

/// Parse code into a module node, or a syntax error message.
pub(super) fn parse<'py>(
    py: Python<'py>,
    code: &str,
) -> PyResult<std::result::Result<Bound<'py, PyAny>, Message>> {
    match py.import("ast")?.call_method1("parse", (code,)) {
        Ok(module) => Ok(Ok(module)),
        Err(err) if err.is_instance_of::<PySyntaxError>(py) => {
            let value = err.value(py);
            let text: String = value
                .getattr("msg")
                .and_then(|msg| msg.extract())
                .unwrap_or_else(|_| "invalid syntax".to_string());
            let line = value.getattr("lineno")?.extract::<Option<usize>>()?.unwrap_or(0);
            let column = value.getattr("offset")?.extract::<Option<usize>>()?.unwrap_or(0);
            Ok(Err(Message::error(format!("SyntaxError: {text}")).at(line, column)))
        }
        Err(err) => Err(err),
    }
}

/// Analyse Python code against a scope.
///
/// Returns a syntax error as `Ok(Err(message))`; an `Err` means the analysis
/// itself failed.
pub(super) fn analyze(
    py: Python<'_>,
    code: &str,
    scope: &Bound<'_, PyDict>,
) -> PyResult<std::result::Result<Analysis, Message>> {
    let module = match parse(py, code)? {
        Ok(module) => module,
        Err(message) => return Ok(Err(message)),
    };

    let mut walker = Walker {
        node_class: py.import("ast")?.getattr("AST")?,
        names: NameCollector::new(),
    };
    let body = module.getattr("body")?;
    walker.visit_all(&body)?;

    let last = body.try_iter()?.last().transpose()?;
    let output = match last {
        Some(statement) => bound_name(&statement)?,
        None => None,
    };
    walker.names.set_output(output);

    let builtins: Vec<String> = py.import("builtins")?.dir()?.extract()?;
    let builtins: Vec<&str> = builtins.iter().map(String::as_str).collect();
    let analysis = walker
        .names
        .finish(|name| scope.contains(name).unwrap_or(false), &builtins);
    Ok(Ok(analysis))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(code: &str) -> std::result::Result<Analysis, Message> {
        Python::attach(|py| analyze(py, code, &PyDict::new(py)).unwrap())
    }

    #[test]
    fn test_free_names_are_inputs() {
        let analysis = run("x * y").unwrap();
        assert_eq!(analysis.inputs, ["x", "y"]);
        assert_eq!(analysis.output, None);
    }

    #[test]
    fn test_assignment_is_output() {
        let analysis = run("x = 1").unwrap();
        assert!(analysis.inputs.is_empty());
        assert_eq!(analysis.output.as_deref(), Some("x"));
    }

    #[test]
    fn test_loop_variables_and_builtins_excluded() {
        let analysis = run("for i in range(10): print(i)").unwrap();
        assert!(analysis.inputs.is_empty());
        assert_eq!(analysis.output, None);

        let analysis = run("[a * k for k in ks]").unwrap();
        assert_eq!(analysis.inputs, ["a", "ks"]);
    }

    #[test]
    fn test_function_bodies_not_descended() {
        let analysis = run("def f(a, b=c):\n    return a + d\n").unwrap();
        assert_eq!(analysis.inputs, ["c"]);
        assert_eq!(analysis.output.as_deref(), Some("f"));
    }

    #[test]
    fn test_imports_bind_alias() {
        let analysis = run("import os.path\nimport numpy as np\nnp.zeros(n)").unwrap();
        assert_eq!(analysis.inputs, ["n"]);

        let analysis = run("from math import pi as PI").unwrap();
        assert_eq!(analysis.output.as_deref(), Some("PI"));
    }

    #[test]
    fn test_bound_scope_names_are_not_inputs() {
        Python::attach(|py| {
            let scope = PyDict::new(py);
            scope.set_item("x", 1).unwrap();
            let analysis = analyze(py, "x + y", &scope).unwrap().unwrap();
            assert_eq!(analysis.inputs, ["y"]);
        });
    }

    #[test]
    fn test_syntax_error_location() {
        let message = run("x = 1\ndef broken:\n").unwrap_err();
        assert_eq!(message.line, 2);
        assert!(message.column > 0);
        assert!(message.message.starts_with("SyntaxError: "));
    }
}
