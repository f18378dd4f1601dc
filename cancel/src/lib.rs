#![cfg_attr(not(feature = "std"), no_std)]

//! Single-slot cooperative cancellation channels for asynchronous operations.
//!
//! This crate provides the per-operation cancellation plumbing used by
//! Tripline I/O objects: a [`Signal`] held by whoever may want an operation
//! stopped, a [`Slot`] held by the operation itself, and a [`State`] node
//! for composed operations that relay cancellation into the operations they
//! wrap.
//!
//! # Features
//!
//! - **Signal/Slot**: One channel, one handler. [`Slot::emplace`] installs
//!   the abort callback, [`Signal::emit`] runs it synchronously. Emission is
//!   level-triggered, so a handler keeps firing until replaced or cleared.
//! - **State**: Chains channels for layered operations. A request entering
//!   the parent slot marks the node cancelled and fans down to the child.
//! - **Storage reuse**: Rebinding an equal-or-smaller handler on the same
//!   slot reuses the previous handler's heap record, keeping per-attempt
//!   rebinds off the allocator.
//!
//! Everything here is single-threaded: signals, slots, and states are not
//! `Send` or `Sync`, and emission runs handlers on the emitting thread.
//!
//! # Example
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use tripline_cancel::Signal;
//!
//! let aborted = Rc::new(Cell::new(false));
//!
//! // The operation wires up what cancelling it means.
//! let signal = Signal::new();
//! signal.slot().emplace({
//!     let aborted = Rc::clone(&aborted);
//!     move || aborted.set(true)
//! });
//!
//! // The caller decides it no longer wants the result.
//! signal.emit();
//! assert!(aborted.get());
//! ```

extern crate alloc;

#[cfg(test)]
extern crate std;

mod record;

pub mod handler;
pub mod signal;
pub mod state;

pub use handler::Handler;
pub use signal::{Signal, Slot};
pub use state::State;
