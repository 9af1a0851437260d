//! Registry of live table frames
//!
//! Each [`TableHandle`](crate::TableHandle) owns one stack slot. The registry
//! maps a frame id to the absolute position of that slot. When a frame's slot
//! is removed, every frame recorded above it moves down by one, matching the
//! shift the runtime applies to the stack itself. Handles therefore stay
//! valid even when siblings are released out of order.
//!
//! A frame whose slot disappeared behind the registry's back (someone popped
//! it through the raw adapter) is detached as soon as a new frame claims its
//! position, so it can never release a slot it does not own. Each frame also
//! records the identity of its table, which lets the owner notice a foreign
//! table that slid into the recorded position.

use crate::stack::StackIndex;
use std::ffi::c_void;

pub(crate) type FrameId = u64;

/// Address of a table as reported by the runtime
pub(crate) type Identity = *const c_void;

/// Where a frame's table lives and which table it is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Slot {
    pub(crate) position: StackIndex,
    pub(crate) identity: Identity,
}

// Position of a frame that no longer owns any slot
const DETACHED: StackIndex = 0;

#[derive(Debug, Default)]
pub(crate) struct FrameTable {
    next_id: FrameId,
    live: Vec<(FrameId, Slot)>,
}

impl FrameTable {
    /// Record a new frame for the table `identity` at `position` (the
    /// current top)
    pub(crate) fn register(&mut self, position: StackIndex, identity: Identity) -> FrameId {
        let id = self.next_id;
        self.next_id += 1;
        for (_, slot) in self.live.iter_mut().filter(|(_, s)| s.position >= position) {
            slot.position = DETACHED;
        }
        self.live.push((id, Slot { position, identity }));
        id
    }

    /// Slot of a live frame (`None` once detached or released)
    pub(crate) fn slot(&self, id: FrameId) -> Option<Slot> {
        self.live
            .iter()
            .find(|(i, _)| *i == id)
            .map(|&(_, s)| s)
            .filter(|s| s.position != DETACHED)
    }

    /// Forget a frame, returning the slot it still owned
    pub(crate) fn release(&mut self, id: FrameId) -> Option<Slot> {
        let at = self.live.iter().position(|(i, _)| *i == id)?;
        Some(self.live.remove(at).1).filter(|s| s.position != DETACHED)
    }

    /// The slot at `position` was removed; frames above it move down
    pub(crate) fn slot_removed(&mut self, position: StackIndex) {
        for (_, slot) in self.live.iter_mut().filter(|(_, s)| s.position > position) {
            slot.position -= 1;
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Distinct fake addresses standing in for tables
    fn table(n: usize) -> Identity {
        n as Identity
    }

    #[test]
    fn test_register_and_lookup() {
        let mut frames = FrameTable::default();
        let a = frames.register(1, table(1));
        let b = frames.register(2, table(2));
        assert_ne!(a, b);
        assert_eq!(frames.slot(a).map(|s| s.position), Some(1));
        assert_eq!(frames.slot(b).map(|s| s.position), Some(2));
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn test_release_in_order() {
        let mut frames = FrameTable::default();
        let a = frames.register(1, table(1));
        let b = frames.register(2, table(2));

        assert_eq!(frames.release(b).map(|s| s.position), Some(2));
        frames.slot_removed(2);
        assert_eq!(frames.slot(a).map(|s| s.position), Some(1));

        assert_eq!(frames.release(a).map(|s| s.position), Some(1));
        assert_eq!(frames.len(), 0);
        assert_eq!(frames.release(a), None);
    }

    #[test]
    fn test_out_of_order_release_shifts_frames_above() {
        let mut frames = FrameTable::default();
        let a = frames.register(1, table(1));
        let b = frames.register(2, table(2));
        let c = frames.register(3, table(3));

        assert_eq!(frames.release(a).map(|s| s.position), Some(1));
        frames.slot_removed(1);

        assert_eq!(frames.slot(b).map(|s| s.position), Some(1));
        assert_eq!(frames.slot(c).map(|s| s.position), Some(2));

        // A new frame lands on the new top
        let d = frames.register(3, table(30));
        assert_eq!(frames.slot(d).map(|s| s.position), Some(3));
    }

    #[test]
    fn test_register_detaches_stale_frames() {
        let mut frames = FrameTable::default();
        let a = frames.register(1, table(1));
        let stale = frames.register(2, table(2));

        // Slot 2 vanished without a release; a new frame claims position 2
        let fresh = frames.register(2, table(20));
        assert_eq!(frames.slot(stale).map(|s| s.position), None);
        assert_eq!(frames.slot(fresh).map(|s| s.position), Some(2));
        assert_eq!(frames.slot(a).map(|s| s.position), Some(1));

        assert_eq!(frames.release(stale), None);
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn test_slot_removed_below_frames_only() {
        let mut frames = FrameTable::default();
        let a = frames.register(2, table(2));
        frames.slot_removed(3);
        assert_eq!(frames.slot(a).map(|s| s.position), Some(2));
        frames.slot_removed(1);
        assert_eq!(frames.slot(a).map(|s| s.position), Some(1));
    }

    #[test]
    fn test_slot_keeps_identity_across_shifts() {
        let mut frames = FrameTable::default();
        let a = frames.register(1, table(7));
        let b = frames.register(2, table(8));

        frames.release(a);
        frames.slot_removed(1);
        assert_eq!(
            frames.slot(b),
            Some(Slot {
                position: 1,
                identity: table(8)
            })
        );
    }
}
