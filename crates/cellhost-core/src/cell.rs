//! The cell: a unit of submitted code with its inputs, outputs and messages.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::value::Package;

/// A unit of executable work, as exchanged with callers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    #[serde(default)]
    pub code: String,
    #[serde(rename = "lang", default)]
    pub language: Option<String>,
    /// The final expression is the implicit output.
    #[serde(rename = "expr", default)]
    pub is_expression: bool,
    /// Input bindings stay in the persistent scope after execution.
    #[serde(rename = "global", default)]
    pub is_global: bool,
    #[serde(default)]
    pub options: IndexMap<String, serde_json::Value>,
    #[serde(default)]
    pub inputs: Vec<Input>,
    #[serde(default)]
    pub outputs: Vec<Output>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// A declared input of a cell.
///
/// The value is kept as raw JSON until execution so that a malformed package
/// is reported on the cell instead of rejecting the whole request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Input {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

/// The single output slot of a cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Output {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Package>,
}

/// Severity of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Error,
    Warning,
}

/// A diagnostic attached to a cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub level: MessageLevel,
    pub message: String,
    #[serde(default)]
    pub line: usize,
    #[serde(default)]
    pub column: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl Message {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: MessageLevel::Error,
            message: message.into(),
            line: 0,
            column: 0,
            trace: None,
        }
    }

    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.line = line;
        self.column = column;
        self
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }
}

impl Cell {
    /// A cell holding only code.
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Default::default()
        }
    }

    /// Builder helper to set an input value.
    pub fn with_input(mut self, name: impl Into<String>, value: &Package) -> Self {
        let name = name.into();
        let json = serde_json::to_value(value).ok();
        match self.inputs.iter_mut().find(|i| i.name == name) {
            Some(input) => input.value = json,
            None => self.inputs.push(Input { name, value: json }),
        }
        self
    }

    /// Declare an input unless one with this name already exists.
    pub fn declare_input(&mut self, name: &str) {
        if !self.inputs.iter().any(|i| i.name == name) {
            self.inputs.push(Input {
                name: name.to_string(),
                value: None,
            });
        }
    }

    /// Name of the declared output, if any.
    pub fn output_name(&self) -> Option<&str> {
        self.outputs.first().and_then(|o| o.name.as_deref())
    }

    /// Store the output value, creating the output slot if needed.
    pub fn set_output(&mut self, value: Package) {
        match self.outputs.first_mut() {
            Some(output) => output.value = Some(value),
            None => self.outputs.push(Output {
                name: None,
                value: Some(value),
            }),
        }
    }

    pub fn push_error(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(|m| m.level == MessageLevel::Error)
    }
}
