//! Delay that can be stopped and started over again.

use std::{cell::RefCell, future::Future, rc::Rc, time::Duration};

use futures::{
    channel::oneshot,
    future::{self, AbortHandle, FutureExt as _},
};

use crate::platform;

type FutureResolver = Rc<RefCell<Option<oneshot::Sender<()>>>>;

/// Returns [`Future`] resolving after the provided [`Duration`] and a
/// [`ResettableDelayHandle`] controlling it.
///
/// If `is_stopped` is `true`, the timer starts only after
/// [`ResettableDelayHandle::reset()`].
pub fn resettable_delay_for(
    delay: Duration,
    is_stopped: bool,
) -> (impl Future<Output = ()>, ResettableDelayHandle) {
    ResettableDelayHandle::new(delay, is_stopped)
}

/// Handle to a timer created by [`resettable_delay_for()`].
#[derive(Debug)]
pub struct ResettableDelayHandle {
    /// Resolver of the delay [`Future`].
    future_resolver: FutureResolver,

    /// Timeout after which the delay resolves.
    timeout: Duration,

    /// [`AbortHandle`] of the running timer.
    abort_handle: RefCell<AbortHandle>,
}

impl ResettableDelayHandle {
    /// Stops the timer. The delay never resolves until reset.
    pub fn stop(&self) {
        self.abort_handle.borrow().abort();
    }

    /// Restarts the timer from zero.
    pub fn reset(&self) {
        self.abort_handle.borrow().abort();
        self.spawn_timer();
    }

    fn new(
        timeout: Duration,
        is_stopped: bool,
    ) -> (impl Future<Output = ()>, Self) {
        let (tx, rx) = oneshot::channel();
        let tx = Rc::new(RefCell::new(Some(tx)));

        let (abort, _) = AbortHandle::new_pair();
        let this = Self {
            future_resolver: tx,
            abort_handle: RefCell::new(abort),
            timeout,
        };
        if !is_stopped {
            this.spawn_timer();
        }

        let delay_fut = async move {
            if rx.await.is_err() {
                // delay was stopped and handle was dropped
                future::pending::<()>().await;
            };
        };

        (delay_fut, this)
    }

    fn spawn_timer(&self) {
        let future_resolver = Rc::clone(&self.future_resolver);
        let timeout = self.timeout;
        let (fut, abort) = future::abortable(async move {
            platform::delay_for(timeout).await;
            if let Some(rsvr) = future_resolver.borrow_mut().take() {
                let _ = rsvr.send(());
            }
        });
        platform::spawn(fut.map(drop));

        self.abort_handle.replace(abort);
    }
}

#[cfg(test)]
mod spec {
    use std::{cell::Cell, time::Duration};

    use tokio::task::LocalSet;

    use super::*;

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn resolves_after_timeout() {
        LocalSet::new()
            .run_until(async {
                let done = Rc::new(Cell::new(false));
                let (delay, _handle) =
                    resettable_delay_for(Duration::from_millis(100), false);
                platform::spawn({
                    let done = Rc::clone(&done);
                    async move {
                        delay.await;
                        done.set(true);
                    }
                });

                platform::delay_for(Duration::from_millis(50)).await;
                assert!(!done.get());
                platform::delay_for(Duration::from_millis(60)).await;
                assert!(done.get());
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn stopped_delay_resolves_only_after_reset() {
        LocalSet::new()
            .run_until(async {
                let done = Rc::new(Cell::new(false));
                let (delay, handle) =
                    resettable_delay_for(Duration::from_millis(100), false);
                platform::spawn({
                    let done = Rc::clone(&done);
                    async move {
                        delay.await;
                        done.set(true);
                    }
                });

                handle.stop();
                platform::delay_for(Duration::from_millis(300)).await;
                assert!(!done.get());

                handle.reset();
                platform::delay_for(Duration::from_millis(110)).await;
                assert!(done.get());
            })
            .await;
    }
}
