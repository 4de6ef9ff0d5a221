//! Conversion between Python objects and [`Value`]s.

use indexmap::IndexMap;
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyBytes, PyDict, PyFloat, PyInt, PyList, PyString, PyTuple};
use pyo3::IntoPyObjectExt;

use crate::error::{Error, Result};
use crate::value::{Docstring, FunctionSpec, Method, Param, Table, TypeTag, Value, pack};

/// Look up an already imported module without importing it.
fn loaded_module<'py>(py: Python<'py>, name: &str) -> PyResult<Option<Bound<'py, PyAny>>> {
    let modules = py.import("sys")?.getattr("modules")?;
    let modules = modules.cast::<PyDict>()?;
    modules.get_item(name)
}

/// Whether `obj` is an instance of `module.class`, for a module the user
/// code has already imported.
fn is_instance_of_loaded(obj: &Bound<'_, PyAny>, module: &str, class: &str) -> PyResult<bool> {
    match loaded_module(obj.py(), module)? {
        Some(module) => obj.is_instance(&module.getattr(class)?),
        None => Ok(false),
    }
}

fn is_plot(obj: &Bound<'_, PyAny>) -> PyResult<bool> {
    if loaded_module(obj.py(), "matplotlib")?.is_none() {
        return Ok(false);
    }
    let py = obj.py();
    let figure = py.import("matplotlib.figure")?.getattr("Figure")?;
    let artist = py.import("matplotlib.artist")?.getattr("Artist")?;
    Ok(obj.is_instance(&figure)? || obj.is_instance(&artist)?)
}

/// Render a figure (or the figure owning an artist) to PNG and clear all
/// open figures.
fn render_plot(obj: &Bound<'_, PyAny>) -> PyResult<Vec<u8>> {
    let py = obj.py();
    let figure = if obj.hasattr("savefig")? {
        obj.clone()
    } else {
        obj.call_method0("get_figure")?
    };
    let buffer = py.import("io")?.call_method0("BytesIO")?;
    let kwargs = PyDict::new(py);
    kwargs.set_item("format", "png")?;
    figure.call_method("savefig", (&buffer,), Some(&kwargs))?;
    let png = buffer.call_method0("getvalue")?.cast::<PyBytes>()?.as_bytes().to_vec();
    clear_plots(py)?;
    Ok(png)
}

/// Close open figures so a later execution does not emit a stale plot.
pub(super) fn clear_plots(py: Python<'_>) -> PyResult<()> {
    if let Some(pyplot) = loaded_module(py, "matplotlib.pyplot")? {
        pyplot.call_method1("close", ("all",))?;
    }
    Ok(())
}

/// Render the current pyplot figure if plotting left one open.
pub(super) fn pending_plot(py: Python<'_>) -> PyResult<Option<Vec<u8>>> {
    let Some(pyplot) = loaded_module(py, "matplotlib.pyplot")? else {
        return Ok(None);
    };
    if pyplot.call_method0("get_fignums")?.len()? == 0 {
        return Ok(None);
    }
    let figure = pyplot.call_method0("gcf")?;
    render_plot(&figure).map(Some)
}

fn type_name(obj: &Bound<'_, PyAny>) -> String {
    obj.get_type()
        .getattr("__qualname__")
        .and_then(|name| name.extract::<String>())
        .unwrap_or_else(|_| "object".to_string())
}

/// Convert a Python object into a value.
///
/// Unsupported objects fail with [`Error::UnpackableType`] naming the
/// object's type.
pub(super) fn to_value(obj: &Bound<'_, PyAny>) -> Result<Value> {
    if obj.is_none() {
        return Ok(Value::Null);
    }
    if obj.is_instance_of::<PyBool>() {
        return Ok(Value::Boolean(obj.extract()?));
    }
    if obj.is_instance_of::<PyInt>() {
        return Ok(match obj.extract::<i64>() {
            Ok(i) => Value::Integer(i),
            Err(_) => Value::Number(obj.extract()?),
        });
    }
    if obj.is_instance_of::<PyFloat>() {
        return Ok(Value::Number(obj.extract()?));
    }
    if obj.is_instance_of::<PyString>() {
        return Ok(Value::String(obj.extract()?));
    }
    if is_plot(obj)? {
        return Ok(Value::Image(render_plot(obj)?));
    }
    if obj.is_instance_of::<PyList>() || obj.is_instance_of::<PyTuple>() {
        let items: Vec<Bound<'_, PyAny>> = obj.try_iter()?.collect::<PyResult<_>>()?;
        // `plt.plot()` returns a one element list of lines
        if let [single] = items.as_slice()
            && is_plot(single)?
        {
            return Ok(Value::Image(render_plot(single)?));
        }
        return items
            .iter()
            .map(to_value)
            .collect::<Result<Vec<_>>>()
            .map(Value::Array);
    }
    if let Ok(dict) = obj.cast::<PyDict>() {
        let mut map = IndexMap::with_capacity(dict.len());
        for (key, value) in dict.iter() {
            let key = match key.extract::<String>() {
                Ok(key) => key,
                Err(_) => key.str()?.to_string(),
            };
            map.insert(key, to_value(&value)?);
        }
        return Ok(Value::Object(map));
    }
    if is_instance_of_loaded(obj, "pandas", "DataFrame")? {
        return data_frame_to_table(obj).map(Value::Table);
    }
    if is_instance_of_loaded(obj, "numpy", "generic")? {
        return to_value(&obj.call_method0("item")?);
    }
    if obj.is_callable() {
        return function_spec(obj).map(Value::Function);
    }
    Err(Error::UnpackableType(type_name(obj)))
}

/// Type tag `to_value` would give an object, without converting it.
///
/// Plots are not rendered and containers are not walked, so `None` means
/// only that the object itself has no wire form.
pub(super) fn type_of(obj: &Bound<'_, PyAny>) -> PyResult<Option<TypeTag>> {
    let tag = if obj.is_none() {
        TypeTag::Null
    } else if obj.is_instance_of::<PyBool>() {
        TypeTag::Boolean
    } else if obj.is_instance_of::<PyInt>() {
        match obj.extract::<i64>() {
            Ok(_) => TypeTag::Integer,
            Err(_) => TypeTag::Number,
        }
    } else if obj.is_instance_of::<PyFloat>() {
        TypeTag::Number
    } else if obj.is_instance_of::<PyString>() {
        TypeTag::String
    } else if is_plot(obj)? {
        TypeTag::Image
    } else if obj.is_instance_of::<PyList>() || obj.is_instance_of::<PyTuple>() {
        if obj.len()? == 1 && is_plot(&obj.get_item(0)?)? {
            TypeTag::Image
        } else {
            TypeTag::Array
        }
    } else if let Ok(dict) = obj.cast::<PyDict>() {
        match dict.get_item("type")? {
            Some(claimed) if claimed.is_instance_of::<PyString>() => {
                TypeTag::parse(&claimed.extract::<String>()?)
                    .filter(TypeTag::is_envelope)
                    .unwrap_or(TypeTag::Object)
            }
            _ => TypeTag::Object,
        }
    } else if is_instance_of_loaded(obj, "pandas", "DataFrame")? {
        TypeTag::Table
    } else if is_instance_of_loaded(obj, "numpy", "generic")? {
        return type_of(&obj.call_method0("item")?);
    } else if obj.is_callable() {
        TypeTag::Function
    } else {
        return Ok(None);
    };
    Ok(Some(tag))
}

/// Convert a data frame column by column, following each column's dtype.
fn data_frame_to_table(frame: &Bound<'_, PyAny>) -> Result<Table> {
    let mut table = Table::default();
    for name in frame.getattr("columns")?.try_iter()? {
        let name = name?;
        let column = frame.get_item(&name)?;
        let kind: String = column.getattr("dtype")?.getattr("kind")?.extract()?;
        let items = column.call_method0("tolist")?;
        let mut values = Vec::new();
        for item in items.try_iter()? {
            let item = item?;
            let value = match kind.as_str() {
                "b" => Value::Boolean(item.extract()?),
                "i" | "u" => Value::Integer(item.extract()?),
                "f" => Value::Number(item.extract()?),
                _ => to_value(&item)?,
            };
            values.push(value);
        }
        table.push_column(name.str()?.to_string(), values)?;
    }
    Ok(table)
}

/// Describe a callable from its signature and docstring.
fn function_spec(func: &Bound<'_, PyAny>) -> Result<FunctionSpec> {
    let py = func.py();
    let inspect = py.import("inspect")?;
    let name = func
        .getattr("__name__")
        .and_then(|name| name.extract::<String>())
        .unwrap_or_else(|_| "anonymous".to_string());

    let mut method = Method::default();
    // Some builtins have no retrievable signature
    if let Ok(signature) = inspect.call_method1("signature", (func,)) {
        let empty = inspect.getattr("Parameter")?.getattr("empty")?;
        for param in signature.getattr("parameters")?.call_method0("values")?.try_iter()? {
            let param = param?;
            let mut spec = Param::new(param.getattr("name")?.extract::<String>()?);
            match param.getattr("kind")?.getattr("name")?.extract::<String>()?.as_str() {
                "VAR_POSITIONAL" => spec.repeat = true,
                "VAR_KEYWORD" => spec.extend = true,
                _ => {}
            }
            let default = param.getattr("default")?;
            if !default.is(&empty) {
                // Defaults with no wire form are left out
                if let Ok(value) = to_value(&default) {
                    spec.default = Some(pack(&value)?);
                }
            }
            method.params.push(spec);
        }
    }

    let doc = inspect.call_method1("getdoc", (func,))?;
    if !doc.is_none() {
        Docstring::parse(&doc.extract::<String>()?).apply(&mut method);
    }
    Ok(FunctionSpec::new(name, method))
}

/// Convert a value into a Python object.
///
/// Tables become pandas data frames when pandas is installed, otherwise a
/// dict of column lists.
pub(super) fn to_python<'py>(py: Python<'py>, value: &Value) -> Result<Bound<'py, PyAny>> {
    Ok(match value {
        Value::Null => py.None().into_bound(py),
        Value::Boolean(b) => b.into_bound_py_any(py)?,
        Value::Integer(i) => i.into_bound_py_any(py)?,
        Value::Number(n) => n.into_bound_py_any(py)?,
        Value::String(s) => s.into_bound_py_any(py)?,
        Value::Array(items) => {
            let items = items
                .iter()
                .map(|item| to_python(py, item))
                .collect::<Result<Vec<_>>>()?;
            PyList::new(py, items)?.into_any()
        }
        Value::Object(map) => {
            let dict = PyDict::new(py);
            for (key, item) in map {
                dict.set_item(key, to_python(py, item)?)?;
            }
            dict.into_any()
        }
        Value::Table(table) => {
            let columns = PyDict::new(py);
            for column in table.columns() {
                let values = column
                    .values
                    .iter()
                    .map(|item| to_python(py, item))
                    .collect::<Result<Vec<_>>>()?;
                columns.set_item(&column.name, PyList::new(py, values)?)?;
            }
            match py.import("pandas") {
                Ok(pandas) => {
                    let names: Vec<&str> = table.columns().iter().map(|c| c.name.as_str()).collect();
                    let kwargs = PyDict::new(py);
                    kwargs.set_item("columns", names)?;
                    pandas.getattr("DataFrame")?.call((columns,), Some(&kwargs))?
                }
                Err(_) => columns.into_any(),
            }
        }
        Value::Image(png) => PyBytes::new(py, png).into_any(),
        Value::Function(spec) => to_python(py, &Value::from_json(serde_json::to_value(spec)?))?,
        Value::Pointer(pointer) => to_python(py, &Value::from_json(serde_json::to_value(pointer)?))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::infer_type;
    use std::ffi::CString;

    fn eval(code: &str) -> Result<Value> {
        Python::attach(|py| {
            let code = CString::new(code).unwrap();
            let obj = py.eval(&code, None, None)?;
            to_value(&obj)
        })
    }

    fn has_module(name: &str) -> bool {
        Python::attach(|py| py.import(name).is_ok())
    }

    #[test]
    fn test_primitives() {
        assert_eq!(eval("None").unwrap(), Value::Null);
        assert_eq!(eval("True").unwrap(), Value::Boolean(true));
        assert_eq!(eval("42").unwrap(), Value::Integer(42));
        assert_eq!(eval("3.14").unwrap(), Value::Number(3.14));
        assert_eq!(eval("'Yo!'").unwrap(), Value::from("Yo!"));
        assert_eq!(
            eval("[1, (2.5, 'x'), {'a': None}]").unwrap(),
            Value::from_json(serde_json::json!([1, [2.5, "x"], {"a": null}]))
        );
    }

    fn tag(code: &str) -> Option<TypeTag> {
        Python::attach(|py| {
            let code = CString::new(code).unwrap();
            type_of(&py.eval(&code, None, None).unwrap()).unwrap()
        })
    }

    #[test]
    fn test_type_of_agrees_with_conversion() {
        for code in ["None", "True", "42", "2 ** 80", "1.5", "'a'", "[1, 'b']", "{'a': 1}", "lambda x: x"] {
            let expected = infer_type(&eval(code).unwrap());
            assert_eq!(tag(code), Some(expected), "{code}");
        }
        assert_eq!(tag("{'type': 'image', 'src': ''}"), Some(TypeTag::Image));
        assert_eq!(tag("{'type': 'integer'}"), Some(TypeTag::Object));
        assert_eq!(tag("__import__('socket').socket()"), None);
    }

    #[test]
    fn test_unpackable_type_is_named() {
        let err = eval("__import__('socket').socket()").unwrap_err();
        match err {
            Error::UnpackableType(name) => assert_eq!(name, "socket"),
            other => panic!("expected UnpackableType, got {other:?}"),
        }
    }

    #[test]
    fn test_function_signature() {
        let value = eval("len").unwrap();
        assert_eq!(infer_type(&value), TypeTag::Function);

        Python::attach(|py| {
            let scope = PyDict::new(py);
            let code = CString::new(
                "def hello(who='world', *rest, **extra):\n    \"\"\"Say hello\n\n    :param who: Who to greet\n    \"\"\"\n    return 'Hello ' + who\n",
            )
            .unwrap();
            py.run(&code, Some(&scope), None).unwrap();
            let hello = scope.get_item("hello").unwrap().unwrap();
            let Value::Function(spec) = to_value(&hello).unwrap() else {
                panic!("expected a function");
            };
            assert_eq!(spec.name, "hello");
            let method = &spec.methods["hello"];
            assert_eq!(method.summary.as_deref(), Some("Say hello"));
            assert_eq!(method.params.len(), 3);
            assert_eq!(method.params[0].description.as_deref(), Some("Who to greet"));
            assert_eq!(
                method.params[0].default.as_ref().unwrap().data,
                serde_json::json!("world")
            );
            assert!(method.params[1].repeat);
            assert!(method.params[2].extend);
        });
    }

    #[test]
    fn test_table_through_pandas() {
        if !has_module("pandas") {
            return;
        }
        let value = eval("__import__('pandas').DataFrame({'a': [1, 2, 3], 'b': ['x', 'y', 'z'], 'c': [0.5, 1.0, 1.5]})").unwrap();
        let Value::Table(table) = &value else {
            panic!("expected a table, got {value:?}");
        };
        assert_eq!(table.column("a").unwrap().values, vec![Value::from(1), Value::from(2), Value::from(3)]);
        assert_eq!(table.column("c").unwrap().values[1], Value::Number(1.0));

        let back = Python::attach(|py| to_python(py, &value).and_then(|obj| to_value(&obj))).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_plot_becomes_image() {
        if !has_module("matplotlib") {
            return;
        }
        let value = eval(
            "(__import__('matplotlib').use('Agg'), __import__('matplotlib.pyplot').pyplot.plot([1, 2, 3]))[1]",
        )
        .unwrap();
        let Value::Image(png) = value else {
            panic!("expected an image");
        };
        assert_eq!(&png[1..4], b"PNG");
    }
}
