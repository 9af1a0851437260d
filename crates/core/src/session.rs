//! Session: one runtime state, end to end
//!
//! The session owns the runtime context (the stack machine, the frame
//! registry and the configuration) behind an `Rc`. Table handles hold a
//! clone of that `Rc`, so the runtime is closed only after the session *and*
//! every handle derived from it are gone.
//!
//! # Example
//!
//! ```rust
//! use luai::{Session, TableHandle};
//!
//! let session = Session::open()?;
//! session.load_standard_library();
//! session.exec("config = { name = 'demo', sizes = { 4, 8, 15 } }")?;
//!
//! let config = session.get_global::<TableHandle>("config")?;
//! assert_eq!(config.get_field::<String>("name")?, "demo");
//!
//! let sizes = config.get_field::<TableHandle>("sizes")?;
//! assert_eq!(sizes.len()?, 3);
//! assert_eq!(sizes.get_index::<i64>(3)?, 15);
//! # Ok::<(), luai::Error>(())
//! ```

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::fetch::{FromStack, Lookup, Scope};
use crate::frames::FrameTable;
use crate::stack::StackMachine;
use std::cell::{Cell, RefCell};
use std::ffi::CString;
use std::fmt;
use std::path::Path;
use std::rc::Rc;
use tracing::{debug, warn};

/// Shared state behind a session and all of its handles
pub(crate) struct Context {
    pub(crate) stack: StackMachine,
    pub(crate) frames: RefCell<FrameTable>,
    pub(crate) config: SessionConfig,
    libs_loaded: Cell<bool>,
}

/// An embedded runtime and typed access to its globals
pub struct Session {
    context: Rc<Context>,
}

impl Session {
    /// Open a session with the default configuration
    pub fn open() -> Result<Self> {
        Self::with_config(SessionConfig::default())
    }

    /// Open a session with configuration taken from the environment
    pub fn from_env() -> Result<Self> {
        Self::with_config(SessionConfig::from_env())
    }

    pub fn with_config(config: SessionConfig) -> Result<Self> {
        let stack = StackMachine::new()?;
        debug!(version = stack.version(), ?config, "opened session");
        let open_libs = config.open_libs;
        let session = Session {
            context: Rc::new(Context {
                stack,
                frames: RefCell::new(FrameTable::default()),
                config,
                libs_loaded: Cell::new(false),
            }),
        };
        if open_libs {
            session.load_standard_library();
        }
        Ok(session)
    }

    /// Load the standard library (once; later calls do nothing)
    pub fn load_standard_library(&self) {
        if self.context.libs_loaded.replace(true) {
            return;
        }
        self.context.stack.open_libs();
        debug!("loaded standard library");
    }

    /// Compile and run `source` at the top level
    ///
    /// Never fails outright: returns `(true, "")` on success and
    /// `(false, diagnostic)` when the chunk does not compile or raises. The
    /// stack height is unchanged in both cases.
    pub fn run_chunk(&self, source: &str) -> (bool, String) {
        let name = chunk_name(&self.context.config.chunk_name);
        self.run_named(source.as_bytes(), &name)
    }

    fn run_named(&self, source: &[u8], name: &CString) -> (bool, String) {
        match self.context.stack.load_and_run(source, name) {
            Ok(()) => (true, String::new()),
            Err(message) => {
                warn!(chunk = %name.to_string_lossy(), %message, "chunk failed");
                (false, message)
            }
        }
    }

    /// Like [`run_chunk`](Self::run_chunk), reporting failure as [`Error::Script`]
    pub fn exec(&self, source: &str) -> Result<()> {
        match self.run_chunk(source) {
            (true, _) => Ok(()),
            (false, message) => Err(Error::Script(message)),
        }
    }

    /// Read `path` and run it as a chunk named after the file
    pub fn run_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let source = std::fs::read(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = chunk_name(&format!("@{}", path.display()));
        match self.run_named(&source, &name) {
            (true, _) => Ok(()),
            (false, message) => Err(Error::Script(message)),
        }
    }

    /// Retrieve global `name` as `T`
    ///
    /// Asking for a [`TableHandle`](crate::TableHandle) returns a root-level
    /// handle that owns one stack slot.
    pub fn get_global<T: FromStack>(&self, name: &str) -> Result<T> {
        let scope = Scope {
            context: &self.context,
            parent: None,
        };
        T::from_stack(&scope, Lookup::Global(name))
    }

    /// The raw stack machine
    ///
    /// Popping or removing slots through it while table handles are alive
    /// invalidates those handles (they then fail with
    /// [`Error::StackIndex`]).
    pub fn stack(&self) -> &StackMachine {
        &self.context.stack
    }

    /// Version number of the embedded runtime (504 for Lua 5.4)
    pub fn runtime_version(&self) -> u32 {
        self.context.stack.version()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.context.config
    }

    /// Number of table handles currently owning a stack slot
    pub fn live_tables(&self) -> usize {
        self.context.frames.borrow().len()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("stack", &self.context.stack)
            .field("live_tables", &self.live_tables())
            .field("libs_loaded", &self.context.libs_loaded.get())
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        debug!(
            outstanding_handles = Rc::strong_count(&self.context) - 1,
            "closing session"
        );
    }
}

// Interior NUL bytes become '?' so the name survives as a C string.
fn chunk_name(name: &str) -> CString {
    let safe: String = name
        .chars()
        .map(|c| if c == '\0' { '?' } else { c })
        .collect();
    CString::new(safe).unwrap_or_default()
}
