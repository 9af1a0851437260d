//! Stack Machine Adapter
//!
//! A thin façade over the Lua 5.4 value stack. Every value the runtime
//! hands out lives in one contiguous stack owned by the runtime state and is
//! addressed by absolute, 1-based position:
//!
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────┬─────────┐
//! │    1     │    2     │    3     │    4     │  ...    │
//! │ (table)  │ (table)  │ (value)  │          │         │
//! └──────────┴──────────┴──────────┴──────────┴─────────┘
//!                         ↑ top_index() == 3
//!
//! - Push: value lands at top_index() + 1
//! - Pop: removes the value at top_index()
//! - remove_at(p): removes position p, everything above shifts down by one
//! ```
//!
//! The adapter does not enforce any nesting discipline. Callers (the
//! retrieval dispatcher and table handles) are responsible for leaving the
//! stack at the height they found it.
//!
//! Lookups (`push_global`, `push_field`, `push_index`, `push_probe`) honour
//! metamethods, so they run under a protected call: a metamethod that raises
//! is reported as [`Error::Script`] with nothing left on the stack.

use crate::error::{Error, Result};
use crate::fetch::TypeTag;
use mlua_sys as ffi;
use std::ffi::{CStr, c_char, c_int, c_void};
use std::fmt;
use std::ptr::{self, NonNull};

/// Absolute, 1-based position on the value stack (0 means empty)
pub type StackIndex = c_int;

/// Extra slots a protected lookup needs: function, container, key
const LOOKUP_SLOTS: c_int = 3;

/// Classification of a value on the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Nil,
    Boolean,
    /// A number with the integer subtype
    Integer,
    /// A number with the float subtype
    Float,
    String,
    /// A table
    Container,
    /// Functions, userdata and threads
    Other,
}

impl ValueKind {
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Nil => "nil",
            ValueKind::Boolean => "boolean",
            ValueKind::Integer => "integer",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::Container => "table",
            ValueKind::Other => "other",
        }
    }

    pub fn is_number(self) -> bool {
        matches!(self, ValueKind::Integer | ValueKind::Float)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Built-in introspection applied to a container instead of a named key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// The length operator (`#t`, honouring `__len`)
    Length,
}

// [container, key] -> value
unsafe extern "C-unwind" fn get_trampoline(state: *mut ffi::lua_State) -> c_int {
    unsafe { ffi::lua_gettable(state, 1) };
    1
}

// [container] -> #container
unsafe extern "C-unwind" fn len_trampoline(state: *mut ffi::lua_State) -> c_int {
    unsafe { ffi::lua_len(state, 1) };
    1
}

/// Owner of one runtime state and its value stack
///
/// Closing the state (on drop) empties the stack, so no per-slot cleanup is
/// needed once the machine itself goes away.
pub struct StackMachine {
    state: NonNull<ffi::lua_State>,
}

impl StackMachine {
    /// Allocate a fresh runtime state
    pub(crate) fn new() -> Result<Self> {
        let state = unsafe { ffi::luaL_newstate() };
        NonNull::new(state)
            .map(|state| StackMachine { state })
            .ok_or_else(|| Error::RuntimeInit("out of memory".to_string()))
    }

    #[inline(always)]
    fn as_ptr(&self) -> *mut ffi::lua_State {
        self.state.as_ptr()
    }

    /// Open the standard libraries in this state
    pub(crate) fn open_libs(&self) {
        unsafe { ffi::luaL_openlibs(self.as_ptr()) };
    }

    /// Version number of the runtime (504 for Lua 5.4)
    pub fn version(&self) -> u32 {
        unsafe { ffi::lua_version(self.as_ptr()) as u32 }
    }

    /// Current stack height (1-based index of the top value, 0 when empty)
    #[inline]
    pub fn top_index(&self) -> StackIndex {
        unsafe { ffi::lua_gettop(self.as_ptr()) }
    }

    /// Fail with [`Error::StackIndex`] unless `pos` addresses a live slot
    pub fn check_position(&self, pos: StackIndex) -> Result<()> {
        let top = self.top_index();
        if pos < 1 || pos > top {
            return Err(Error::StackIndex { position: pos, top });
        }
        Ok(())
    }

    fn reserve(&self, slots: c_int) -> Result<()> {
        if unsafe { ffi::lua_checkstack(self.as_ptr(), slots) } == 0 {
            return Err(Error::StackExhausted(self.top_index()));
        }
        Ok(())
    }

    // Runs `function` with the arguments pushed by `push_args` under a
    // protected call. Net effect: +1 on success, 0 on failure.
    fn protected_lookup(
        &self,
        function: ffi::lua_CFunction,
        nargs: c_int,
        push_args: impl FnOnce(*mut ffi::lua_State),
    ) -> Result<()> {
        self.reserve(LOOKUP_SLOTS)?;
        let state = self.as_ptr();
        unsafe { ffi::lua_pushcfunction(state, function) };
        push_args(state);
        let status = unsafe { ffi::lua_pcall(state, nargs, 1, 0) };
        if status == ffi::LUA_OK {
            return Ok(());
        }
        let message = self.error_message_at_top();
        self.discard_top();
        Err(Error::Script(message))
    }

    /// Push the value bound to global `name` (nil when unbound)
    pub fn push_global(&self, name: &str) -> Result<()> {
        self.protected_lookup(get_trampoline, 2, |state| unsafe {
            ffi::lua_rawgeti(
                state,
                ffi::LUA_REGISTRYINDEX,
                ffi::LUA_RIDX_GLOBALS as ffi::lua_Integer,
            );
            push_str(state, name);
        })
    }

    /// Push field `name` of the container at `container`
    pub fn push_field(&self, container: StackIndex, name: &str) -> Result<()> {
        self.check_position(container)?;
        self.protected_lookup(get_trampoline, 2, |state| unsafe {
            ffi::lua_pushvalue(state, container);
            push_str(state, name);
        })
    }

    /// Push element `key` of the container at `container`
    pub fn push_index(&self, container: StackIndex, key: i64) -> Result<()> {
        self.check_position(container)?;
        self.protected_lookup(get_trampoline, 2, |state| unsafe {
            ffi::lua_pushvalue(state, container);
            ffi::lua_pushinteger(state, key);
        })
    }

    /// Push the result of `probe` applied to the container at `container`
    pub fn push_probe(&self, container: StackIndex, probe: Probe) -> Result<()> {
        self.check_position(container)?;
        let function = match probe {
            Probe::Length => len_trampoline,
        };
        self.protected_lookup(function, 1, |state| unsafe {
            ffi::lua_pushvalue(state, container);
        })
    }

    /// Remove the top value
    pub fn pop(&self) -> Result<()> {
        let top = self.top_index();
        if top == 0 {
            return Err(Error::StackIndex { position: 0, top });
        }
        self.discard_top();
        Ok(())
    }

    /// Remove the top value; the caller knows the stack is non-empty
    #[inline]
    pub(crate) fn discard_top(&self) {
        debug_assert!(self.top_index() > 0, "discard_top: stack is empty");
        unsafe { ffi::lua_pop(self.as_ptr(), 1) };
    }

    /// Remove the value at `pos`, shifting everything above it down by one
    pub fn remove_at(&self, pos: StackIndex) -> Result<()> {
        self.check_position(pos)?;
        unsafe { ffi::lua_remove(self.as_ptr(), pos) };
        Ok(())
    }

    /// Classify the value at `pos` (`Nil` for positions outside the stack)
    pub fn kind_at(&self, pos: StackIndex) -> ValueKind {
        if self.check_position(pos).is_err() {
            return ValueKind::Nil;
        }
        let state = self.as_ptr();
        match unsafe { ffi::lua_type(state, pos) } {
            ffi::LUA_TBOOLEAN => ValueKind::Boolean,
            ffi::LUA_TNUMBER => {
                if unsafe { ffi::lua_isinteger(state, pos) } != 0 {
                    ValueKind::Integer
                } else {
                    ValueKind::Float
                }
            }
            ffi::LUA_TSTRING => ValueKind::String,
            ffi::LUA_TTABLE => ValueKind::Container,
            ffi::LUA_TNIL | ffi::LUA_TNONE => ValueKind::Nil,
            _ => ValueKind::Other,
        }
    }

    /// Address of the table at `pos`, or null for anything else
    ///
    /// Two live tables never share an address, so this tells a handle's own
    /// table apart from another one that moved into its slot.
    pub(crate) fn identity_at(&self, pos: StackIndex) -> *const c_void {
        if self.kind_at(pos) != ValueKind::Container {
            return ptr::null();
        }
        unsafe { ffi::lua_topointer(self.as_ptr(), pos) }
    }

    /// Classify the top value (`Nil` on an empty stack)
    pub fn kind_of_top(&self) -> ValueKind {
        self.kind_at(self.top_index())
    }

    /// Whether the top value can be converted as `tag` requires
    pub fn is_of_kind(&self, tag: TypeTag) -> bool {
        if self.top_index() == 0 {
            return false;
        }
        let state = self.as_ptr();
        unsafe {
            match tag {
                TypeTag::Integer => ffi::lua_isinteger(state, -1) != 0,
                TypeTag::Number => ffi::lua_isnumber(state, -1) != 0,
                TypeTag::String => ffi::lua_isstring(state, -1) != 0,
                TypeTag::Boolean => ffi::lua_isboolean(state, -1) != 0,
                TypeTag::Kind => true,
                TypeTag::Container => ffi::lua_istable(state, -1) != 0,
            }
        }
    }

    // The top_as_* conversions are only meaningful after a matching
    // is_of_kind check; they never pop.

    pub(crate) fn top_as_integer(&self) -> i64 {
        unsafe { ffi::lua_tointegerx(self.as_ptr(), -1, ptr::null_mut()) }
    }

    pub(crate) fn top_as_number(&self) -> f64 {
        unsafe { ffi::lua_tonumberx(self.as_ptr(), -1, ptr::null_mut()) }
    }

    /// A number on top is replaced by its text; callers convert a copy
    pub(crate) fn top_as_string(&self) -> String {
        let mut len = 0usize;
        let data = unsafe { ffi::lua_tolstring(self.as_ptr(), -1, &mut len) };
        if data.is_null() {
            return String::new();
        }
        let bytes = unsafe { std::slice::from_raw_parts(data as *const u8, len) };
        String::from_utf8_lossy(bytes).into_owned()
    }

    pub(crate) fn top_as_boolean(&self) -> bool {
        unsafe { ffi::lua_toboolean(self.as_ptr(), -1) != 0 }
    }

    fn type_name_of_top(&self) -> String {
        let state = self.as_ptr();
        unsafe {
            let name = ffi::lua_typename(state, ffi::lua_type(state, -1));
            CStr::from_ptr(name).to_string_lossy().into_owned()
        }
    }

    // Error objects that are not strings or numbers get lua.c's wording.
    fn error_message_at_top(&self) -> String {
        match self.kind_of_top() {
            ValueKind::String | ValueKind::Integer | ValueKind::Float => self.top_as_string(),
            _ => format!("(error object is a {} value)", self.type_name_of_top()),
        }
    }

    /// Compile and run `source` under a protected call
    ///
    /// Net stack effect is zero in both outcomes; on failure the runtime's
    /// diagnostic is returned.
    pub(crate) fn load_and_run(
        &self,
        source: &[u8],
        chunk_name: &CStr,
    ) -> std::result::Result<(), String> {
        let state = self.as_ptr();
        let mut status = unsafe {
            ffi::luaL_loadbufferx(
                state,
                source.as_ptr() as *const c_char,
                source.len(),
                chunk_name.as_ptr(),
                c"t".as_ptr(),
            )
        };
        if status == ffi::LUA_OK {
            status = unsafe { ffi::lua_pcall(state, 0, 0, 0) };
        }
        if status == ffi::LUA_OK {
            return Ok(());
        }
        let message = self.error_message_at_top();
        self.discard_top();
        Err(message)
    }
}

unsafe fn push_str(state: *mut ffi::lua_State, s: &str) {
    unsafe { ffi::lua_pushlstring(state, s.as_ptr() as *const c_char, s.len()) };
}

impl fmt::Debug for StackMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackMachine")
            .field("top", &self.top_index())
            .finish()
    }
}

impl Drop for StackMachine {
    fn drop(&mut self) {
        unsafe { ffi::lua_close(self.as_ptr()) };
    }
}
