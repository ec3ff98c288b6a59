//! Errors shared across the crate.

use derive_more::Display;

/// Occurs if the referenced value was dropped or the handle table it was
/// registered in was disposed.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[display(fmt = "Handler is in detached state")]
pub struct HandleDetachedError;

/// Upgrades provided [`Weak`] reference, mapping it to a [`Result`] with
/// [`HandleDetachedError`] wrapped into [`tracerr::Traced`].
///
/// The second form converts the traced error with [`From`] into the provided
/// type.
///
/// [`Weak`]: std::rc::Weak
macro_rules! upgrade_or_detached {
    ($v:expr) => {{
        $v.upgrade()
            .ok_or_else(|| tracerr::new!($crate::utils::HandleDetachedError))
    }};
    ($v:expr, $err:ty) => {{
        $v.upgrade().ok_or_else(|| {
            <$err>::from(tracerr::new!($crate::utils::HandleDetachedError))
        })
    }};
}
