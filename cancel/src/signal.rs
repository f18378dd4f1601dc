//! Cancellation signals and the slots that receive them.
//!
//! A [`Signal`] is the requesting side of one cancellation channel and owns a
//! single handler cell. Its [`Slot`]s are cheap handles onto that cell; the
//! operation being cancelled installs a handler through one, and
//! [`Signal::emit`] runs whatever is installed at that moment, synchronously
//! and on the calling thread.
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use tripline_cancel::Signal;
//!
//! let stopped = Rc::new(Cell::new(false));
//! let signal = Signal::new();
//! signal.slot().emplace({
//!     let stopped = Rc::clone(&stopped);
//!     move || stopped.set(true)
//! });
//!
//! signal.emit();
//! assert!(stopped.get());
//! ```

use alloc::rc::Rc;
use core::cell::Cell;
use core::fmt;
use core::ptr::NonNull;

use crate::handler::Handler;
use crate::record::{self, ErasedHandler};

/// What the shared cell currently holds.
#[derive(Clone, Copy)]
enum CellState {
    /// No handler installed.
    Empty,
    /// A handler is installed and at rest.
    Installed(NonNull<dyn ErasedHandler>),
    /// The installed record is checked out and running inside `emit`.
    Emitting,
}

/// The cell a signal and all of its slots share.
struct HandlerCell {
    state: Cell<CellState>,
    /// Cleared when the owning signal is dropped.
    attached: Cell<bool>,
}

impl HandlerCell {
    fn new() -> Self {
        Self {
            state: Cell::new(CellState::Empty),
            attached: Cell::new(true),
        }
    }

    fn has_handler(&self) -> bool {
        matches!(
            self.state.get(),
            CellState::Installed(_) | CellState::Emitting
        )
    }

    fn emit(&self) {
        let CellState::Installed(mut record) = self.state.get() else {
            // Empty is a no-op. Emitting means a handler re-emitted its own
            // signal, which stays inert rather than recursing.
            return;
        };
        self.state.set(CellState::Emitting);
        let _retire = Retire { cell: self, record };
        tracing::trace!("invoking cancellation handler");
        // SAFETY: the record is live and checked out of the cell, so nothing
        // frees it while the state is Emitting; `Retire` retires it exactly
        // once even if the handler panics.
        unsafe { record.as_mut() }.invoke();
    }

    fn install<H, F>(&self, init: F)
    where
        H: Handler,
        F: FnOnce() -> H,
    {
        let reclaimed = match self.state.get() {
            CellState::Installed(mut record) => {
                self.state.set(CellState::Empty);
                // SAFETY: the record was just unhooked from the cell and is
                // not checked out, so this is its only remaining user.
                Some(unsafe { record.as_mut().reclaim() })
            }
            // A checked-out record belongs to the emit that took it; the
            // replacement gets fresh storage.
            CellState::Emitting => None,
            CellState::Empty => None,
        };
        self.state.set(CellState::Installed(record::write(reclaimed, init)));
    }

    fn clear(&self) {
        match self.state.get() {
            CellState::Installed(record) => {
                self.state.set(CellState::Empty);
                // SAFETY: unhooked and not checked out, as in `install`.
                unsafe { record::destroy(record) };
            }
            // The emit that checked the record out frees it on the way out.
            CellState::Emitting => self.state.set(CellState::Empty),
            CellState::Empty => {}
        }
    }

    fn sever(&self) {
        self.clear();
        self.attached.set(false);
    }
}

/// Retires an emit's checked-out record: re-installs it if the cell was left
/// alone, destroys it if the handler cleared or replaced itself mid-call.
struct Retire<'a> {
    cell: &'a HandlerCell,
    record: NonNull<dyn ErasedHandler>,
}

impl Drop for Retire<'_> {
    fn drop(&mut self) {
        match self.cell.state.get() {
            CellState::Emitting => self.cell.state.set(CellState::Installed(self.record)),
            CellState::Empty | CellState::Installed(_) => {
                // SAFETY: the cell no longer refers to the checked-out
                // record, leaving this guard as its sole owner.
                unsafe { record::destroy(self.record) }
            }
        }
    }
}

/// The requesting side of a cancellation channel.
///
/// Dropping the signal destroys the installed handler without running it and
/// disconnects every surviving [`Slot`].
pub struct Signal {
    cell: Rc<HandlerCell>,
}

impl Signal {
    /// Creates a signal with no handler installed.
    pub fn new() -> Self {
        Self {
            cell: Rc::new(HandlerCell::new()),
        }
    }

    /// Requests cancellation, synchronously running the installed handler.
    ///
    /// With no handler installed this is a no-op. The handler stays installed
    /// afterwards: a later `emit` runs it again until [`Slot::emplace`]
    /// replaces it or [`Slot::clear`] removes it. A panic from the handler
    /// propagates to the caller and the handler still stays installed.
    ///
    /// The handler may clear or replace its own slot while it runs; the
    /// record it replaced is retired once the emit returns. A nested `emit`
    /// of the same signal during the call is inert.
    pub fn emit(&self) {
        self.cell.emit();
    }

    /// Returns the slot paired with this signal.
    ///
    /// Every call returns an equal slot backed by the same handler cell.
    pub fn slot(&self) -> Slot {
        Slot {
            cell: Some(Rc::clone(&self.cell)),
        }
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Signal {
    fn drop(&mut self) {
        self.cell.sever();
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("has_handler", &self.cell.has_handler())
            .finish()
    }
}

/// The receiving side of a cancellation channel.
///
/// A slot does not keep its signal alive; it is a handle onto the signal's
/// handler cell. All slots of one signal are interchangeable and compare
/// equal, and stay equal after the signal is dropped.
#[derive(Clone, Default)]
pub struct Slot {
    cell: Option<Rc<HandlerCell>>,
}

impl Slot {
    /// Creates a slot that was never connected to a signal.
    ///
    /// Useful as the "cancellation not supported" default for operations
    /// that take a slot parameter.
    pub const fn disconnected() -> Self {
        Self { cell: None }
    }

    /// Installs `handler`, replacing any handler installed before.
    ///
    /// The previous handler is destroyed first, and its storage is reused
    /// for the new one whenever it is large enough, so rebinding an
    /// equal-or-smaller handler does not touch the allocator.
    ///
    /// # Panics
    ///
    /// Panics if the slot is disconnected, or if its signal has been
    /// dropped.
    pub fn emplace<H: Handler>(&self, handler: H) {
        self.emplace_with(move || handler)
    }

    /// Installs the handler produced by `init`, replacing any handler
    /// installed before.
    ///
    /// The previous handler is destroyed before `init` runs. If `init`
    /// panics, the panic propagates and the slot is left connected with no
    /// handler installed; the previous handler is not restored.
    ///
    /// # Panics
    ///
    /// Panics if the slot is disconnected, or if its signal has been
    /// dropped.
    pub fn emplace_with<H, F>(&self, init: F)
    where
        H: Handler,
        F: FnOnce() -> H,
    {
        let Some(cell) = self.cell.as_deref() else {
            panic!("cannot install a handler on a disconnected slot");
        };
        assert!(
            cell.attached.get(),
            "cannot install a handler on a slot whose signal has been dropped"
        );
        cell.install(init);
    }

    /// Destroys the installed handler, if any, without running it.
    ///
    /// The slot stays connected; a later [`emplace`](Slot::emplace) starts
    /// from fresh storage. No-op on an empty or disconnected slot.
    pub fn clear(&self) {
        if let Some(cell) = self.cell.as_deref() {
            cell.clear();
        }
    }

    /// Whether this slot came from a signal that is still alive.
    pub fn is_connected(&self) -> bool {
        self.cell.as_deref().is_some_and(|cell| cell.attached.get())
    }

    /// Whether a handler is currently installed.
    pub fn has_handler(&self) -> bool {
        self.cell.as_deref().is_some_and(HandlerCell::has_handler)
    }
}

/// Slots are equal when they share a handler cell; disconnected slots are
/// all equal to each other.
impl PartialEq for Slot {
    fn eq(&self, other: &Self) -> bool {
        match (&self.cell, &other.cell) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl Eq for Slot {}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("connected", &self.is_connected())
            .field("has_handler", &self.has_handler())
            .finish()
    }
}
