//! Conversion of guest exceptions into cell messages.

use std::fmt::Write;

use crate::cell::Message;

/// File marker the interpreter reports for dynamically executed code.
pub const CODE_FILE: &str = "<string>";

/// Function marker the interpreter reports for top-level code.
pub const MODULE_FUNCTION: &str = "<module>";

/// One stack frame of a guest exception.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub file: String,
    pub line: usize,
    pub function: String,
    pub text: String,
}

impl Frame {
    pub fn new(file: impl Into<String>, line: usize, function: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            function: function.into(),
            text: String::new(),
        }
    }

    fn is_user_code(&self) -> bool {
        self.file == CODE_FILE
    }

    fn readable(&self) -> Frame {
        Frame {
            file: self.file.replace(CODE_FILE, "code"),
            line: self.line,
            function: self.function.replace(MODULE_FUNCTION, ""),
            text: self.text.clone(),
        }
    }
}

/// Build the message for an exception raised while running user code.
///
/// Leading frames that belong to the execution harness are dropped. The
/// message line is that of the deepest remaining frame, or 0 when no user
/// frame remains (a syntax error, for example).
pub fn format_exception(class_name: &str, text: &str, frames: &[Frame]) -> Message {
    let user: Vec<Frame> = frames
        .iter()
        .skip_while(|frame| !frame.is_user_code())
        .map(Frame::readable)
        .collect();

    let line = user
        .iter()
        .rev()
        .find(|frame| frame.file == "code")
        .map_or(0, |frame| frame.line);

    let message = if text.is_empty() {
        class_name.to_string()
    } else {
        format!("{class_name}: {text}")
    };

    Message::error(message.clone())
        .at(line, 0)
        .with_trace(render(frames, &message))
}

/// Render frames in the familiar traceback layout.
fn render(frames: &[Frame], message: &str) -> String {
    let mut out = String::from("Traceback (most recent call last):\n");
    for frame in frames {
        let frame = frame.readable();
        let _ = write!(out, "  File \"{}\", line {}", frame.file, frame.line);
        if !frame.function.is_empty() {
            let _ = write!(out, ", in {}", frame.function);
        }
        out.push('\n');
        if !frame.text.is_empty() {
            let _ = writeln!(out, "    {}", frame.text.trim());
        }
    }
    out.push_str(message);
    out
}
