//! Table handles
//!
//! A [`TableHandle`] is a capability for one table resident on the value
//! stack. It is created by a container retrieval (which leaves the table on
//! top of the stack) and owns that slot until the last clone of the handle
//! is dropped.
//!
//! ## Ownership chain
//!
//! ```text
//! Session ──Rc<Context>──┐
//!                        ▼
//!   TableHandle(t) ─► Frame { pos: 1, parent: None }
//!   TableHandle(a) ─► Frame { pos: 2, parent: ─► Frame(t) }
//!   TableHandle(b) ─► Frame { pos: 3, parent: ─► Frame(a) }
//! ```
//!
//! A child frame holds an `Rc` of its parent, so a parent's slot is never
//! removed while a child (which sits above it) is still alive. Every frame
//! also holds the session context, so the runtime outlives every handle.
//!
//! When frame verification is on, a handle only trusts its slot while the
//! slot still holds the very table it was created for; otherwise it behaves
//! as detached.
//!
//! Releasing a frame removes exactly the slot it owns, wherever that slot is
//! at the time: the frame registry shifts the recorded positions of frames
//! above a removed slot, the same way the runtime shifts the values.

use crate::error::{Error, Result};
use crate::fetch::{self, FromStack, Lookup, Scope};
use crate::frames::{FrameId, Slot};
use crate::session::Context;
use crate::stack::StackIndex;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, warn};

pub(crate) struct Frame {
    id: FrameId,
    context: Rc<Context>,
    parent: Option<Rc<Frame>>,
}

impl Frame {
    /// The recorded position, checked against the live stack
    fn checked_position(&self) -> Result<StackIndex> {
        let stack = &self.context.stack;
        let top = stack.top_index();
        let slot = self
            .context
            .frames
            .borrow()
            .slot(self.id)
            .ok_or(Error::StackIndex { position: 0, top })?;
        stack.check_position(slot.position)?;
        if !self.holds_own_table(&slot) {
            return Err(Error::StackIndex {
                position: slot.position,
                top,
            });
        }
        Ok(slot.position)
    }

    // With verification off only the height is trusted.
    fn holds_own_table(&self, slot: &Slot) -> bool {
        !self.context.config.verify_frames
            || self.context.stack.identity_at(slot.position) == slot.identity
    }

    fn depth(&self) -> usize {
        self.parent.as_ref().map_or(0, |p| p.depth() + 1)
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        let Some(slot) = self.context.frames.borrow_mut().release(self.id) else {
            warn!(frame = self.id, "table frame already detached from the stack");
            return;
        };
        let position = slot.position;
        let top = self.context.stack.top_index();
        if position > top || !self.holds_own_table(&slot) {
            warn!(
                frame = self.id,
                position, top, "table slot vanished before its handle was released"
            );
            return;
        }
        if self.context.stack.remove_at(position).is_ok() {
            self.context.frames.borrow_mut().slot_removed(position);
            debug!(frame = self.id, position, "released table frame");
        }
    }
}

/// A table on the value stack
///
/// Cloning a handle shares the same slot; the slot is released when the
/// last clone is dropped. Handles are tied to one thread, like the session
/// they came from.
#[derive(Clone)]
pub struct TableHandle {
    frame: Rc<Frame>,
}

impl TableHandle {
    /// Wrap the table that was just pushed on top of the stack
    pub(crate) fn attach(
        context: &Rc<Context>,
        parent: Option<&Rc<Frame>>,
        position: StackIndex,
    ) -> Self {
        debug_assert_eq!(position, context.stack.top_index());
        let identity = context.stack.identity_at(position);
        let id = context.frames.borrow_mut().register(position, identity);
        debug!(frame = id, position, nested = parent.is_some(), "attached table frame");
        TableHandle {
            frame: Rc::new(Frame {
                id,
                context: Rc::clone(context),
                parent: parent.cloned(),
            }),
        }
    }

    fn scope(&self) -> Scope<'_> {
        Scope {
            context: &self.frame.context,
            parent: Some(&self.frame),
        }
    }

    /// Retrieve field `name` as `T`
    ///
    /// Asking for a [`TableHandle`] returns a child handle that keeps this
    /// one alive.
    pub fn get_field<T: FromStack>(&self, name: &str) -> Result<T> {
        let position = self.frame.checked_position()?;
        T::from_stack(&self.scope(), Lookup::Field(position, name))
    }

    /// Retrieve element `index` as `T`
    pub fn get_index<T: FromStack>(&self, index: i64) -> Result<T> {
        let position = self.frame.checked_position()?;
        T::from_stack(&self.scope(), Lookup::Index(position, index))
    }

    /// Length of the table (the `#` operator, honouring `__len`)
    pub fn len(&self) -> Result<i64> {
        let position = self.frame.checked_position()?;
        fetch::fetch_length(&self.frame.context.stack, position)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Current stack position of this table, if the handle is still valid
    pub fn position(&self) -> Option<StackIndex> {
        self.frame.checked_position().ok()
    }

    /// Number of enclosing handles (0 for a table fetched from a global)
    pub fn depth(&self) -> usize {
        self.frame.depth()
    }
}

impl fmt::Debug for TableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableHandle")
            .field("frame", &self.frame.id)
            .field("position", &self.position())
            .field("depth", &self.depth())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Session, ValueKind};

    fn session_with(code: &str) -> Session {
        let session = Session::open().unwrap();
        session.load_standard_library();
        let (ok, message) = session.run_chunk(code);
        assert!(ok, "chunk failed: {}", message);
        session
    }

    #[test]
    fn test_handle_records_top_position() {
        let session = session_with("t = { x = 1 }");
        let t = session.get_global::<TableHandle>("t").unwrap();
        assert_eq!(t.position(), Some(1));
        assert_eq!(session.stack().top_index(), 1);
        assert_eq!(t.depth(), 0);
        drop(t);
        assert_eq!(session.stack().top_index(), 0);
    }

    #[test]
    fn test_child_keeps_parent_alive() {
        let session = session_with("t = { a = { b = 5 } }");
        let t = session.get_global::<TableHandle>("t").unwrap();
        let a = t.get_field::<TableHandle>("a").unwrap();
        assert_eq!(a.depth(), 1);
        assert_eq!(a.position(), Some(2));

        // Dropping the parent first leaves its slot in place
        drop(t);
        assert_eq!(session.stack().top_index(), 2);
        assert_eq!(a.get_field::<i64>("b").unwrap(), 5);

        drop(a);
        assert_eq!(session.stack().top_index(), 0);
    }

    #[test]
    fn test_siblings_released_out_of_order() {
        let session = session_with("p = { 1 }; q = { 2, 2 }; r = { 3, 3, 3 }");
        let p = session.get_global::<TableHandle>("p").unwrap();
        let q = session.get_global::<TableHandle>("q").unwrap();
        let r = session.get_global::<TableHandle>("r").unwrap();

        drop(p);
        assert_eq!(session.stack().top_index(), 2);
        assert_eq!(q.position(), Some(1));
        assert_eq!(r.position(), Some(2));
        assert_eq!(q.len().unwrap(), 2);
        assert_eq!(r.len().unwrap(), 3);

        drop(r);
        assert_eq!(q.get_index::<i64>(2).unwrap(), 2);
        drop(q);
        assert_eq!(session.stack().top_index(), 0);
    }

    #[test]
    fn test_clone_shares_slot() {
        let session = session_with("t = { 1, 2 }");
        let t = session.get_global::<TableHandle>("t").unwrap();
        let copy = t.clone();
        drop(t);
        assert_eq!(session.stack().top_index(), 1);
        assert_eq!(copy.len().unwrap(), 2);
        drop(copy);
        assert_eq!(session.stack().top_index(), 0);
    }

    #[test]
    fn test_popped_slot_is_stack_index_error() {
        let session = session_with("t = { a = { b = 5 } }");
        let t = session.get_global::<TableHandle>("t").unwrap();
        let a = t.get_field::<TableHandle>("a").unwrap();

        session.stack().pop().unwrap();
        let err = a.get_field::<i64>("b").unwrap_err();
        assert!(err.is_stack_index(), "got {:?}", err);
        assert_eq!(a.position(), None);

        // Releasing the orphaned handle must not touch its parent's slot
        drop(a);
        assert_eq!(session.stack().top_index(), 1);
        assert_eq!(t.position(), Some(1));
        drop(t);
        assert_eq!(session.stack().top_index(), 0);
    }

    #[test]
    fn test_verify_frames_detects_foreign_slot() {
        let session = session_with("t = {}; n = 7");
        let t = session.get_global::<TableHandle>("t").unwrap();

        session.stack().pop().unwrap();
        session.stack().push_global("n").unwrap();
        assert!(t.len().unwrap_err().is_stack_index());

        // The number is not ours to remove
        drop(t);
        assert_eq!(session.stack().top_index(), 1);
        session.stack().pop().unwrap();
    }

    #[test]
    fn test_debug_output() {
        let session = session_with("t = {}");
        let t = session.get_global::<TableHandle>("t").unwrap();
        let text = format!("{:?}", t);
        assert!(text.contains("TableHandle"));
        assert!(text.contains("Some(1)"));
    }

    #[test]
    fn test_sibling_sliding_into_slot_is_not_adopted() {
        let session = session_with("p = { 1 }; q = { 2, 2 }");
        let p = session.get_global::<TableHandle>("p").unwrap();
        let q = session.get_global::<TableHandle>("q").unwrap();

        // p's table is removed behind its back; q's table slides into slot 1
        session.stack().remove_at(1).unwrap();
        assert!(p.len().unwrap_err().is_stack_index());
        assert_eq!(p.position(), None);

        // Dropping p must leave q's table alone
        drop(p);
        assert_eq!(session.stack().top_index(), 1);
        session.stack().push_index(1, 2).unwrap();
        assert_eq!(session.stack().kind_of_top(), ValueKind::Integer);
        session.stack().pop().unwrap();

        // q's recorded slot moved without its knowledge, so q is stale too
        assert!(q.len().unwrap_err().is_stack_index());
        drop(q);
        assert_eq!(session.stack().top_index(), 1);
        session.stack().pop().unwrap();
    }
}
