//! Serve command implementation for the cellhost CLI.

use std::sync::Arc;

use cellhost_core::{HostConfig, Registry};
use cellhost_server::ServerConfig;

use crate::colors;

/// Start the HTTP server.
pub async fn execute(
    host_config: HostConfig,
    host: String,
    port: u16,
    authorization: bool,
    debug: bool,
) -> anyhow::Result<()> {
    let registry = Arc::new(Registry::new(host_config));
    let config = ServerConfig {
        host,
        port,
        authorization,
        debug,
    };

    println!("\n{}cellhost{} - Execution Host", colors::BOLD, colors::RESET);
    println!("{}", "─".repeat(50));
    println!(
        "{}  ◆ Host:{} {}",
        colors::CYAN,
        colors::RESET,
        registry.id()
    );
    println!(
        "{}  ◆ Types:{} {}",
        colors::CYAN,
        colors::RESET,
        registry.types().join(", ")
    );
    if !authorization {
        println!(
            "{}  ◆ Authorization disabled{}",
            colors::YELLOW,
            colors::RESET
        );
    }
    println!("{}", "─".repeat(50));
    println!("{}Press Ctrl+C to stop{}", colors::GREEN, colors::RESET);
    println!();

    cellhost_server::serve(registry, config).await?;

    Ok(())
}
