//! Execute command implementation for the cellhost CLI.
//!
//! Runs a single cell in a fresh instance and prints the resulting cell.

use std::io::Read;

use cellhost_core::{Cell, HostConfig, Registry};

use crate::colors;

/// Execute (or only compile) one cell.
pub fn execute(
    config: HostConfig,
    type_name: &str,
    code: &str,
    compile_only: bool,
) -> anyhow::Result<()> {
    let code = if code == "-" {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        code.to_string()
    };

    let registry = Registry::new(config);
    let address = registry.post(type_name, None, serde_json::Value::Null)?;
    let method = if compile_only { "compile" } else { "execute" };
    let result = registry.put(&address, method, serde_json::to_value(Cell::new(code))?)?;
    let cell: Cell = serde_json::from_value(result)?;

    for message in &cell.messages {
        eprintln!(
            "{}error{} (line {}): {}",
            colors::RED,
            colors::RESET,
            message.line,
            message.message
        );
    }
    println!("{}", serde_json::to_string_pretty(&cell)?);

    registry.delete(&address)?;
    Ok(())
}
