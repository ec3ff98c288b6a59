//! Miscellaneous utility structs and functions.

#[macro_use]
mod errors;

mod handle;
mod resettable_delay;

use derive_more::From;
use futures::future::AbortHandle;

#[doc(inline)]
pub use self::{
    errors::HandleDetachedError,
    handle::{Handle, HandleKey, HandleSlot, HandleTable},
    resettable_delay::{resettable_delay_for, ResettableDelayHandle},
};

/// Wrapper around [`AbortHandle`] which aborts [`Future`] on [`Drop`].
///
/// [`Future`]: std::future::Future
#[derive(Debug, From)]
pub struct TaskHandle(AbortHandle);

impl Drop for TaskHandle {
    #[inline]
    fn drop(&mut self) {
        self.0.abort();
    }
}
