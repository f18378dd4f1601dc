//! The callable contract for installed cancellation handlers.

/// A callback a [`Slot`](crate::Slot) can install and a
/// [`Signal`](crate::Signal) can invoke.
///
/// Handlers stay installed after they run, so [`on_cancel`](Handler::on_cancel)
/// may be called any number of times, once per emission. Every `FnMut()`
/// closure is a handler; implement the trait directly when the callback
/// carries state worth naming.
///
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use tripline_cancel::{Handler, Signal};
///
/// struct CountAborts(Rc<Cell<u32>>);
///
/// impl Handler for CountAborts {
///     fn on_cancel(&mut self) {
///         self.0.set(self.0.get() + 1);
///     }
/// }
///
/// let aborts = Rc::new(Cell::new(0));
/// let signal = Signal::new();
/// signal.slot().emplace(CountAborts(aborts.clone()));
///
/// signal.emit();
/// signal.emit();
/// assert_eq!(aborts.get(), 2);
/// ```
pub trait Handler: 'static {
    /// Reacts to a cancellation request.
    fn on_cancel(&mut self);
}

impl<F: FnMut() + 'static> Handler for F {
    fn on_cancel(&mut self) {
        self()
    }
}
