//! Propagation nodes for layered cancellation.
//!
//! A composed operation owns one [`State`] per layer: the node claims the
//! slot handed down from above and exposes a child slot of its own, so a
//! cancellation request entering at the top fans down through every layer
//! to whatever handler the innermost operation installed.

use alloc::rc::{Rc, Weak};
use core::cell::Cell;
use core::fmt;

use crate::signal::{Signal, Slot};

/// A node that records cancellation of a parent channel and forwards it to
/// a child channel.
///
/// Dropping the node tears the child channel down, disconnecting every slot
/// obtained from [`slot`](State::slot); requests arriving on the parent
/// afterwards go nowhere.
///
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use tripline_cancel::{Signal, State};
///
/// let signal = Signal::new();
/// let state = State::new(&signal.slot());
///
/// let hits = Rc::new(Cell::new(0));
/// state.slot().emplace({
///     let hits = Rc::clone(&hits);
///     move || hits.set(hits.get() + 1)
/// });
///
/// signal.emit();
/// assert!(state.cancelled());
/// assert_eq!(hits.get(), 1);
/// ```
pub struct State {
    node: Option<Rc<Node>>,
}

struct Node {
    child: Signal,
    cancelled: Cell<bool>,
}

impl State {
    /// Builds a node wired to `parent`.
    ///
    /// Claims the parent slot: a handler already installed there is
    /// destroyed. If `parent` is disconnected or its signal is gone the
    /// node is permanently uncancelled and [`slot`](State::slot) returns
    /// disconnected slots.
    pub fn new(parent: &Slot) -> Self {
        if !parent.is_connected() {
            return Self { node: None };
        }
        let node = Rc::new(Node {
            child: Signal::new(),
            cancelled: Cell::new(false),
        });
        let forward = Rc::downgrade(&node);
        parent.emplace(move || forward_cancel(&forward));
        Self { node: Some(node) }
    }

    /// The child channel's slot, for the nested operation to install into.
    pub fn slot(&self) -> Slot {
        match &self.node {
            Some(node) => node.child.slot(),
            None => Slot::disconnected(),
        }
    }

    /// Whether the parent channel has fired since this node was built.
    ///
    /// Once true it never resets, even if the parent's handler is later
    /// cleared.
    pub fn cancelled(&self) -> bool {
        self.node.as_deref().is_some_and(|node| node.cancelled.get())
    }
}

fn forward_cancel(node: &Weak<Node>) {
    // A failed upgrade means the node's owner already dropped it, taking the
    // child channel along; the request has nowhere to go. On success the
    // temporary strong reference keeps the child signal alive until its emit
    // returns, even if a downstream handler drops the owning State mid-call.
    if let Some(node) = node.upgrade() {
        node.cancelled.set(true);
        tracing::trace!("forwarding cancellation to child signal");
        node.child.emit();
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("linked", &self.node.is_some())
            .field("cancelled", &self.cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::format;
    use std::rc::Rc;

    struct Tally {
        hits: Rc<Cell<u32>>,
        drops: Rc<Cell<u32>>,
    }

    impl Tally {
        fn new(hits: &Rc<Cell<u32>>, drops: &Rc<Cell<u32>>) -> Self {
            Self {
                hits: Rc::clone(hits),
                drops: Rc::clone(drops),
            }
        }
    }

    impl crate::Handler for Tally {
        fn on_cancel(&mut self) {
            self.hits.set(self.hits.get() + 1);
        }
    }

    impl Drop for Tally {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    fn counters() -> (Rc<Cell<u32>>, Rc<Cell<u32>>) {
        (Rc::new(Cell::new(0)), Rc::new(Cell::new(0)))
    }

    #[test]
    fn disconnected_parent_yields_an_inert_node() {
        let state = State::new(&Slot::disconnected());
        assert!(!state.cancelled());
        assert_eq!(state.slot(), Slot::disconnected());
        assert!(!state.slot().is_connected());

        let signal = Signal::new();
        let orphan = signal.slot();
        drop(signal);
        let state = State::new(&orphan);
        assert!(!state.cancelled());
        assert!(!state.slot().is_connected());
    }

    #[test]
    fn parent_emit_marks_the_node_and_reaches_the_child() {
        let signal = Signal::new();
        let state = State::new(&signal.slot());
        assert!(!state.cancelled());

        let (hits, drops) = counters();
        state.slot().emplace(Tally::new(&hits, &drops));

        signal.emit();
        assert!(state.cancelled());
        assert_eq!(hits.get(), 1);

        signal.emit();
        assert_eq!(hits.get(), 2);
        assert_eq!(drops.get(), 0);
    }

    #[test]
    fn node_creation_claims_the_parent_slot() {
        let signal = Signal::new();
        let (hits, drops) = counters();
        signal.slot().emplace(Tally::new(&hits, &drops));

        let state = State::new(&signal.slot());
        assert_eq!(drops.get(), 1);

        signal.emit();
        assert_eq!(hits.get(), 0);
        assert!(state.cancelled());
    }

    #[test]
    fn chained_nodes_forward_to_the_leaf() {
        let signal = Signal::new();
        let outer = State::new(&signal.slot());
        let inner = State::new(&outer.slot());

        let (hits, drops) = counters();
        inner.slot().emplace(Tally::new(&hits, &drops));

        signal.emit();
        assert!(outer.cancelled());
        assert!(inner.cancelled());
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn cancelled_is_sticky() {
        let signal = Signal::new();
        let state = State::new(&signal.slot());

        signal.emit();
        assert!(state.cancelled());

        // Removing the forwarding handler does not rewind the node.
        signal.slot().clear();
        signal.emit();
        assert!(state.cancelled());
    }

    #[test]
    fn dropping_the_node_detaches_the_child_channel() {
        let signal = Signal::new();
        let state = State::new(&signal.slot());
        let child = state.slot();

        let (hits, drops) = counters();
        child.emplace(Tally::new(&hits, &drops));

        drop(state);
        assert_eq!(drops.get(), 1);
        assert!(!child.is_connected());

        // The forwarding handler is still installed upstream but now has
        // nowhere to deliver.
        assert!(signal.slot().has_handler());
        signal.emit();
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn debug_output_reflects_linkage_and_cancellation() {
        let state = State::new(&Slot::disconnected());
        assert_eq!(
            format!("{state:?}"),
            "State { linked: false, cancelled: false }"
        );

        let signal = Signal::new();
        let state = State::new(&signal.slot());
        signal.emit();
        assert_eq!(
            format!("{state:?}"),
            "State { linked: true, cancelled: true }"
        );
    }

    #[test]
    fn dropping_the_parent_signal_strands_the_node() {
        let signal = Signal::new();
        let state = State::new(&signal.slot());

        let (hits, drops) = counters();
        state.slot().emplace(Tally::new(&hits, &drops));

        drop(signal);
        assert!(!state.cancelled());
        assert!(state.slot().is_connected());

        // The child channel still works when driven from its own side.
        assert_eq!(drops.get(), 0);
        drop(state);
        assert_eq!(drops.get(), 1);
    }
}
