//! cellhost CLI - execution host for Python and SQL cells.

mod colors;
mod execute;
mod serve;

use std::path::PathBuf;

use cellhost_core::{HostConfig, SqliteOptions};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "cellhost")]
#[command(about = "Execution host for Python and SQL cells")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// SQLite database file for SQL contexts
    #[arg(long, global = true)]
    sqlite_path: Option<PathBuf>,

    /// Directory searched for a SQLite database file
    #[arg(long, global = true)]
    sqlite_dir: Option<PathBuf>,

    /// Largest SQL result returned inline rather than as a pointer
    #[arg(long, global = true, default_value = "30")]
    max_rows: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the host over HTTP
    Serve {
        /// Host address to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(short, long, default_value = "2000")]
        port: u16,

        /// Accept requests without a ticket or token
        #[arg(long)]
        no_auth: bool,

        /// Include error detail in internal error responses
        #[arg(long)]
        debug: bool,
    },

    /// Execute one cell and print the resulting cell as JSON
    Execute {
        /// Code to execute, or `-` to read it from stdin
        code: String,

        /// Context type to execute in
        #[arg(short = 't', long = "type", default_value = "PythonContext")]
        type_name: String,

        /// Compile only, without executing
        #[arg(long)]
        compile: bool,
    },

    /// Print the host manifest
    Manifest,
}

impl Cli {
    fn host_config(&self) -> HostConfig {
        HostConfig {
            sqlite: SqliteOptions {
                path: self.sqlite_path.clone(),
                dir: self.sqlite_dir.clone(),
                max_rows: self.max_rows,
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.host_config();

    match cli.command {
        Commands::Serve {
            host,
            port,
            no_auth,
            debug,
        } => {
            serve::execute(config, host, port, !no_auth, debug).await?;
        }

        Commands::Execute {
            code,
            type_name,
            compile,
        } => {
            execute::execute(config, &type_name, &code, compile)?;
        }

        Commands::Manifest => {
            let registry = cellhost_core::Registry::new(config);
            println!("{}", serde_json::to_string_pretty(&registry.manifest())?);
        }
    }

    Ok(())
}
