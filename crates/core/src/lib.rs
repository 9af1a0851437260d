//! luai: typed access to an embedded Lua runtime's value stack
//!
//! The runtime exposes its state only through a shared value stack. This
//! crate lets callers read globals, nested table fields and array elements
//! with an expected Rust type, while keeping the stack balanced:
//!
//! - scalar retrievals (`i64`, `f64`, `String`, `bool`, [`ValueKind`]) push,
//!   validate, convert and pop, leaving the stack height unchanged
//! - table retrievals leave the table on the stack and hand back a
//!   [`TableHandle`] that owns that slot until it is dropped
//!
//! # Modules
//!
//! - `stack`: stack machine adapter over the raw runtime API
//! - `fetch`: typed retrieval dispatcher
//! - `frames`: registry of stack slots owned by table handles
//! - `table`: table handles
//! - `session`: runtime ownership, library loading and chunk execution
//! - `config`: session configuration (environment driven)
//! - `error`: error types

pub mod config;
pub mod error;
mod fetch;
mod frames;
pub mod session;
pub mod stack;
pub mod table;

pub use config::SessionConfig;
pub use error::{Error, Result};
pub use fetch::{FromStack, PROBE_KEY, TypeTag};
pub use session::Session;
pub use stack::{Probe, StackIndex, StackMachine, ValueKind};
pub use table::TableHandle;
