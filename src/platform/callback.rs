//! Functionality for calling host callbacks.

use std::{cell::RefCell, fmt, rc::Rc};

/// Single-slot typed listener.
///
/// Setting a new function replaces the previous one. Invocation happens
/// synchronously on the calling task.
pub struct Callback<A>(RefCell<Option<Rc<dyn Fn(A)>>>);

impl<A> Callback<A> {
    /// Sets the inner function of this [`Callback`].
    #[inline]
    pub fn set_func<F>(&self, f: F)
    where
        F: Fn(A) + 'static,
    {
        self.0.borrow_mut().replace(Rc::new(f));
    }

    /// Indicates whether this [`Callback`]'s inner function is set.
    #[inline]
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.borrow().is_some()
    }

    /// Invokes the inner function with the provided argument.
    ///
    /// No-op if the function is not set.
    pub fn call1<T: Into<A>>(&self, arg: T) {
        // The function is cloned out, so it may replace itself while running.
        let func = self.0.borrow().as_ref().map(Rc::clone);
        if let Some(f) = func {
            f(arg.into());
        }
    }
}

impl Callback<()> {
    /// Invokes the inner function without arguments.
    #[inline]
    pub fn call0(&self) {
        self.call1(());
    }
}

impl<A> Default for Callback<A> {
    #[inline]
    fn default() -> Self {
        Self(RefCell::new(None))
    }
}

impl<A> fmt::Debug for Callback<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("is_set", &self.is_set())
            .finish()
    }
}

#[cfg(test)]
mod spec {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn unset_callback_is_noop() {
        let cb: Callback<u8> = Callback::default();
        assert!(!cb.is_set());
        cb.call1(3);
    }

    #[test]
    fn calls_latest_function() {
        let cb: Callback<u8> = Callback::default();
        let got = Rc::new(Cell::new(0));

        cb.set_func({
            let got = Rc::clone(&got);
            move |v| got.set(v)
        });
        cb.call1(1);
        assert_eq!(got.get(), 1);

        cb.set_func({
            let got = Rc::clone(&got);
            move |v| got.set(v * 10)
        });
        cb.call1(2);
        assert_eq!(got.get(), 20);
    }
}
