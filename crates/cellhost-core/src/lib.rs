//! Core engine of the cellhost execution host.
//!
//! This crate provides:
//! - The value codec: type inference, packing and unpacking of wire packages
//! - The cell model exchanged with callers
//! - Dependency analysis and exception formatting
//! - Stateful execution contexts (Python, SQLite)
//! - The registry of named instances

pub mod analysis;
pub mod cell;
pub mod context;
pub mod error;
pub mod registry;
pub mod trace;
pub mod value;

pub use cell::{Cell, Input, Message, MessageLevel, Output};
pub use context::Context;
#[cfg(feature = "python")]
pub use context::PythonContext;
#[cfg(feature = "sqlite")]
pub use context::{SqliteContext, SqliteOptions};
pub use error::{Error, Result};
pub use registry::{HostConfig, Instance, Registry, SharedInstance};
pub use value::{Format, Package, Table, TypeTag, Value, infer_type, pack, unpack};
