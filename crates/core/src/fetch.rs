//! Typed Retrieval Dispatcher
//!
//! One generic operation, "fetch by key, validate kind, convert, pop",
//! specialized per requested type. The lookup strategy (global, field,
//! index, probe) is a [`Lookup`] value; the expected type is the type
//! parameter, which selects a [`TypeTag`] and a conversion at compile time.
//!
//! Stack effect:
//! - scalar types: always zero, on success and on failure
//! - [`TableHandle`](crate::TableHandle): +1 on success (the slot belongs to
//!   the returned handle), zero on failure

use crate::error::{Error, Result};
use crate::session::Context;
use crate::stack::{Probe, StackIndex, StackMachine, ValueKind};
use crate::table::{Frame, TableHandle};
use std::rc::Rc;
use tracing::trace;

/// Key text used in errors for probe lookups
pub const PROBE_KEY: &str = "function()";

/// The closed set of retrievable value categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    /// Exact integer (integer subtype only)
    Integer,
    /// Any number, or a string convertible to one
    Number,
    /// A string, or a number (converted to its canonical text)
    String,
    /// An actual boolean
    Boolean,
    /// Any value; yields its [`ValueKind`]
    Kind,
    /// A table
    Container,
}

impl TypeTag {
    /// Expected-type text used in mismatch errors
    pub fn expected(self) -> &'static str {
        match self {
            TypeTag::Integer => "integer",
            TypeTag::Number => "number or string convertible to number",
            TypeTag::String => "string or number",
            TypeTag::Boolean => "boolean",
            TypeTag::Kind => "any value",
            TypeTag::Container => "table",
        }
    }
}

/// Where a value comes from
#[derive(Debug, Clone, Copy)]
pub enum Lookup<'k> {
    Global(&'k str),
    Field(StackIndex, &'k str),
    Index(StackIndex, i64),
    Probe(StackIndex, Probe),
}

impl Lookup<'_> {
    /// Human-readable key for error messages
    pub fn describe(&self) -> String {
        match self {
            Lookup::Global(name) | Lookup::Field(_, name) => (*name).to_string(),
            Lookup::Index(_, index) => index.to_string(),
            Lookup::Probe(..) => PROBE_KEY.to_string(),
        }
    }

    fn push(&self, stack: &StackMachine) -> Result<()> {
        match *self {
            Lookup::Global(name) => stack.push_global(name),
            Lookup::Field(container, name) => stack.push_field(container, name),
            Lookup::Index(container, index) => stack.push_index(container, index),
            Lookup::Probe(container, probe) => stack.push_probe(container, probe),
        }
    }
}

/// Who is asking: the session context plus the handle in scope, if any
pub struct Scope<'s> {
    pub(crate) context: &'s Rc<Context>,
    pub(crate) parent: Option<&'s Rc<Frame>>,
}

/// Types that can be retrieved from the value stack
///
/// Implemented for `i64`, `f64`, `String`, `bool`, [`ValueKind`] and
/// [`TableHandle`]. The set is closed.
pub trait FromStack: Sized {
    /// The category this type retrieves
    const TAG: TypeTag;

    #[doc(hidden)]
    fn from_stack(scope: &Scope<'_>, lookup: Lookup<'_>) -> Result<Self>;
}

/// Scalar conversion of the (already validated) top value
trait Scalar: FromStack {
    fn convert_top(stack: &StackMachine) -> Self;
}

impl Scalar for i64 {
    fn convert_top(stack: &StackMachine) -> Self {
        stack.top_as_integer()
    }
}

impl Scalar for f64 {
    fn convert_top(stack: &StackMachine) -> Self {
        stack.top_as_number()
    }
}

impl Scalar for String {
    fn convert_top(stack: &StackMachine) -> Self {
        stack.top_as_string()
    }
}

impl Scalar for bool {
    fn convert_top(stack: &StackMachine) -> Self {
        stack.top_as_boolean()
    }
}

impl Scalar for ValueKind {
    fn convert_top(stack: &StackMachine) -> Self {
        stack.kind_of_top()
    }
}

macro_rules! scalar_from_stack {
    ($($ty:ty => $tag:ident),* $(,)?) => {
        $(
            impl FromStack for $ty {
                const TAG: TypeTag = TypeTag::$tag;

                fn from_stack(scope: &Scope<'_>, lookup: Lookup<'_>) -> Result<Self> {
                    fetch::<$ty>(&scope.context.stack, lookup)
                }
            }
        )*
    };
}

scalar_from_stack!(
    i64 => Integer,
    f64 => Number,
    String => String,
    bool => Boolean,
    ValueKind => Kind,
);

impl FromStack for TableHandle {
    const TAG: TypeTag = TypeTag::Container;

    fn from_stack(scope: &Scope<'_>, lookup: Lookup<'_>) -> Result<Self> {
        let position = begin_container(&scope.context.stack, lookup)?;
        Ok(TableHandle::attach(scope.context, scope.parent, position))
    }
}

// Push, validate, pop the pushed value on the failure path.
fn push_validated(stack: &StackMachine, lookup: Lookup<'_>, tag: TypeTag) -> Result<()> {
    lookup.push(stack)?;
    if !stack.is_of_kind(tag) {
        let actual = stack.kind_of_top();
        stack.discard_top();
        trace!(key = %lookup.describe(), %actual, expected = tag.expected(), "type mismatch");
        return Err(Error::type_mismatch(lookup.describe(), tag.expected()));
    }
    Ok(())
}

/// Fetch a scalar. Net stack effect is zero in every outcome.
fn fetch<T: Scalar>(stack: &StackMachine, lookup: Lookup<'_>) -> Result<T> {
    let height = stack.top_index();
    push_validated(stack, lookup, T::TAG)?;
    let value = T::convert_top(stack);
    stack.discard_top();
    debug_assert_eq!(stack.top_index(), height, "fetch must not change stack height");
    Ok(value)
}

/// Length of the container at `container`
pub(crate) fn fetch_length(stack: &StackMachine, container: StackIndex) -> Result<i64> {
    fetch::<i64>(stack, Lookup::Probe(container, Probe::Length))
}

/// Push and validate a table, leaving it on the stack
///
/// Returns the position the table now occupies (the new top).
fn begin_container(stack: &StackMachine, lookup: Lookup<'_>) -> Result<StackIndex> {
    push_validated(stack, lookup, TableHandle::TAG)?;
    Ok(stack.top_index())
}
