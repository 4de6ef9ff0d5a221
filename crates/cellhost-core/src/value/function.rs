//! Function signatures and docstring parsing.

use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::Package;

/// Packed description of a callable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    pub methods: IndexMap<String, Method>,
}

/// One call signature of a function.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Method {
    pub params: Vec<Param>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<Returns>,
}

/// A function parameter.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    /// Collects remaining positional arguments.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub repeat: bool,
    /// Collects remaining keyword arguments.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub extend: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Package>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
}

impl Param {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Description of a function's return value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Returns {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
}

impl FunctionSpec {
    /// A spec with a single method named after the function.
    pub fn new(name: impl Into<String>, method: Method) -> Self {
        let name = name.into();
        let mut methods = IndexMap::new();
        methods.insert(name.clone(), method);
        Self { name, methods }
    }
}

static FIELD_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^:(param|returns|return|type|rtype)(?:\s+(\w+))?:(.*)$").expect("valid regex")
});

static GOOGLE_PARAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\*{0,2}\w+)\s*(?:\(([^)]*)\))?\s*:\s*(.*)$").expect("valid regex")
});

/// Which section of a docstring a line belongs to.
#[derive(Clone, Copy, PartialEq)]
enum Section {
    Body,
    Args,
    Returns,
    NumpyParams,
    NumpyReturns,
}

/// Parsed docstring.
///
/// The first line is the summary. Lines of the form `:param NAME: text`,
/// `:type NAME: text`, `:returns: text` and `:rtype: text` attach to the
/// matching parameter or to the return slot. Google style `Args:` and
/// `Returns:` sections, and NumPy style underlined `Parameters` and
/// `Returns` sections, are understood as well. Everything else accumulates
/// into the description.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Docstring {
    pub summary: Option<String>,
    pub description: Option<String>,
    pub params: IndexMap<String, (Option<String>, Option<String>)>,
    pub returns: Option<Returns>,
}

fn is_underline(line: Option<&&str>) -> bool {
    line.map(|l| l.trim())
        .is_some_and(|l| !l.is_empty() && l.chars().all(|c| c == '-'))
}

fn append(slot: &mut Option<String>, text: &str) {
    match slot {
        Some(existing) if !existing.is_empty() => {
            existing.push(' ');
            existing.push_str(text);
        }
        _ => *slot = Some(text.to_string()),
    }
}

impl Docstring {
    pub fn parse(text: &str) -> Docstring {
        let mut doc = Docstring::default();
        let lines: Vec<&str> = text.trim().lines().collect();

        if let Some(summary) = lines.first().map(|l| l.trim()).filter(|s| !s.is_empty()) {
            doc.summary = Some(summary.to_string());
        }

        let mut description = Vec::new();
        let mut section = Section::Body;
        let mut current: Option<String> = None;
        let mut index = 1;
        while index < lines.len() {
            let line = lines[index];
            let trimmed = line.trim();
            index += 1;

            if let Some(caps) = FIELD_LINE.captures(trimmed) {
                let text = caps[3].trim().to_string();
                let name = caps.get(2).map(|m| m.as_str().to_string());
                match (&caps[1], name) {
                    ("param", Some(name)) => doc.param_mut(name).0 = Some(text),
                    ("type", Some(name)) => doc.param_mut(name).1 = Some(text),
                    ("returns" | "return", _) => {
                        doc.returns.get_or_insert_with(Returns::default).description = Some(text)
                    }
                    ("rtype", _) => {
                        doc.returns.get_or_insert_with(Returns::default).type_name = Some(text)
                    }
                    _ => description.push(trimmed.to_string()),
                }
                continue;
            }

            // NumPy headers are underlined with dashes
            if is_underline(lines.get(index)) {
                match trimmed {
                    "Parameters" | "Arguments" => {
                        section = Section::NumpyParams;
                        index += 1;
                        continue;
                    }
                    "Returns" | "Return" => {
                        section = Section::NumpyReturns;
                        index += 1;
                        continue;
                    }
                    _ => {}
                }
            }

            match trimmed {
                "Args:" | "Arguments:" | "Parameters:" => {
                    section = Section::Args;
                    continue;
                }
                "Returns:" | "Return:" => {
                    section = Section::Returns;
                    continue;
                }
                _ => {}
            }

            let indented = line.starts_with(char::is_whitespace);

            // Google sections run until the first unindented line
            if matches!(section, Section::Args | Section::Returns) && !trimmed.is_empty() && !indented {
                section = Section::Body;
            }

            if trimmed.is_empty() {
                if section == Section::Body {
                    description.push(String::new());
                }
                continue;
            }

            match section {
                Section::Body => description.push(trimmed.to_string()),
                Section::Args => {
                    if let Some(caps) = GOOGLE_PARAM.captures(trimmed) {
                        let name = caps[1].trim_start_matches('*').to_string();
                        let type_name = caps.get(2).map(|m| m.as_str().trim().to_string());
                        let entry = doc.param_mut(name);
                        entry.0 = Some(caps[3].trim().to_string());
                        if type_name.is_some() {
                            entry.1 = type_name;
                        }
                    }
                }
                Section::Returns => {
                    let returns = doc.returns.get_or_insert_with(Returns::default);
                    match trimmed.split_once(':') {
                        Some((type_name, text)) if !type_name.trim().contains(' ') => {
                            returns.type_name = Some(type_name.trim().to_string());
                            returns.description = Some(text.trim().to_string());
                        }
                        _ => returns.description = Some(trimmed.to_string()),
                    }
                }
                Section::NumpyParams if !indented => {
                    let (name, type_name) = match trimmed.split_once(':') {
                        Some((name, type_name)) => (name.trim(), Some(type_name.trim().to_string())),
                        None => (trimmed, None),
                    };
                    let name = name.trim_start_matches('*').to_string();
                    doc.param_mut(name.clone()).1 = type_name;
                    current = Some(name);
                }
                Section::NumpyParams => {
                    if let Some(name) = current.clone() {
                        append(&mut doc.param_mut(name).0, trimmed);
                    }
                }
                Section::NumpyReturns if !indented => {
                    let type_name = trimmed
                        .split_once(':')
                        .map_or(trimmed, |(_, type_name)| type_name)
                        .trim();
                    doc.returns.get_or_insert_with(Returns::default).type_name =
                        Some(type_name.to_string());
                }
                Section::NumpyReturns => {
                    append(
                        &mut doc.returns.get_or_insert_with(Returns::default).description,
                        trimmed,
                    );
                }
            }
        }

        let description = description.join("\n").trim().to_string();
        if !description.is_empty() {
            doc.description = Some(description);
        }
        doc
    }

    fn param_mut(&mut self, name: String) -> &mut (Option<String>, Option<String>) {
        self.params.entry(name).or_default()
    }

    /// Merge the docstring into a method. Parameter docs attach only to
    /// parameters the method already has.
    pub fn apply(self, method: &mut Method) {
        method.summary = self.summary;
        method.description = self.description;
        method.returns = self.returns;
        for (name, (description, type_name)) in self.params {
            if let Some(param) = method.params.iter_mut().find(|p| p.name == name) {
                if description.is_some() {
                    param.description = description;
                }
                if type_name.is_some() {
                    param.type_name = type_name;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_lines() {
        let doc = Docstring::parse(
            "Say hello\n\nGreets someone by name.\n:param who: Who to greet\n:type who: string\n:returns: The greeting\n:rtype: string",
        );
        assert_eq!(doc.summary.as_deref(), Some("Say hello"));
        assert_eq!(doc.description.as_deref(), Some("Greets someone by name."));
        assert_eq!(
            doc.params["who"],
            (Some("Who to greet".to_string()), Some("string".to_string()))
        );
        let returns = doc.returns.unwrap();
        assert_eq!(returns.description.as_deref(), Some("The greeting"));
        assert_eq!(returns.type_name.as_deref(), Some("string"));
    }

    #[test]
    fn test_google_sections() {
        let doc = Docstring::parse(
            "Summary\n\nDescription of function\n\nArgs:\n    x (integer): A Google style parameter spec\n\nReturns:\n    string: The result\n",
        );
        assert_eq!(doc.description.as_deref(), Some("Description of function"));
        assert_eq!(
            doc.params["x"],
            (
                Some("A Google style parameter spec".to_string()),
                Some("integer".to_string())
            )
        );
        let returns = doc.returns.unwrap();
        assert_eq!(returns.type_name.as_deref(), Some("string"));
        assert_eq!(returns.description.as_deref(), Some("The result"));
    }

    #[test]
    fn test_numpy_sections() {
        let doc = Docstring::parse(
            "Summary\n\nDescription of function\n\nArgs:\n    x (integer) : A Google style parameter spec\n\nReturns\n-------\nstring\n    A NumPy style return spec\n",
        );
        assert_eq!(doc.description.as_deref(), Some("Description of function"));
        assert_eq!(doc.params["x"].1.as_deref(), Some("integer"));
        assert_eq!(
            doc.returns,
            Some(Returns {
                description: Some("A NumPy style return spec".to_string()),
                type_name: Some("string".to_string()),
            })
        );

        let doc = Docstring::parse("Scale\n\nParameters\n----------\nfactor : number\n    How much\n    to scale\n");
        assert_eq!(
            doc.params["factor"],
            (Some("How much to scale".to_string()), Some("number".to_string()))
        );
        assert_eq!(doc.description, None);
    }

    #[test]
    fn test_apply_ignores_unknown_params() {
        let mut method = Method {
            params: vec![Param::new("x"), Param::new("y")],
            ..Default::default()
        };
        Docstring::parse("Sum\n:param x: first\n:param z: nobody").apply(&mut method);
        assert_eq!(method.params[0].description.as_deref(), Some("first"));
        assert_eq!(method.params[1].description, None);
        assert_eq!(method.summary.as_deref(), Some("Sum"));
    }

    #[test]
    fn test_param_serialization_skips_defaults() {
        let mut param = Param::new("x");
        param.repeat = true;
        let json = serde_json::to_value(&param).unwrap();
        assert_eq!(json, serde_json::json!({"name": "x", "repeat": true}));
    }
}
