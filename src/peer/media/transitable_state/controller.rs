//! Component managing a [`TransitableState`].

use std::{
    cell::RefCell,
    rc::{Rc, Weak},
    time::Duration,
};

use futures::{
    future::{self, Either, LocalBoxFuture},
    FutureExt as _, StreamExt as _,
};
use medea_reactive::ObservableCell;
use tracerr::Traced;

use crate::{
    platform,
    utils::{resettable_delay_for, ResettableDelayHandle},
};

use super::{
    media_exchange_state, mute_state, ConflictingTransition, InStable,
    InTransition, MediaState, OppositeState, TransitableState,
};

/// [`TransitableStateController`] of the mute axis.
pub type MuteStateController =
    TransitableStateController<mute_state::Stable, mute_state::Transition>;

/// [`TransitableStateController`] of the media exchange axis.
pub type MediaExchangeStateController = TransitableStateController<
    media_exchange_state::Stable,
    media_exchange_state::Transition,
>;

/// Component managing a [`TransitableState`].
///
/// A transition stays in flight until the server settles the state with
/// [`TransitableStateController::update()`]. If that doesn't happen within
/// the configured timeout, the transition is cancelled.
#[derive(Debug)]
pub struct TransitableStateController<S, T> {
    state: ObservableCell<TransitableState<S, T>>,

    /// Timer of the in-flight transition.
    timeout_handle: RefCell<Option<ResettableDelayHandle>>,

    /// Time after which an unanswered transition is cancelled.
    timeout: Duration,
}

impl<S, T> TransitableStateController<S, T>
where
    S: InStable<Transition = T>
        + Into<TransitableState<S, T>>
        + Into<MediaState>
        + std::fmt::Debug
        + 'static,
    T: InTransition<Stable = S>
        + Into<TransitableState<S, T>>
        + std::fmt::Debug
        + 'static,
{
    /// Returns a new [`TransitableStateController`] in the provided
    /// [`InStable`] state.
    #[must_use]
    pub fn new(state: S, timeout: Duration) -> Rc<Self> {
        let this = Rc::new(Self {
            state: ObservableCell::new(state.into()),
            timeout_handle: RefCell::new(None),
            timeout,
        });
        Self::spawn(Rc::downgrade(&this), this.state.subscribe().skip(1));
        this
    }

    /// Watches state changes and arms the transition timeout every time a
    /// transition starts.
    fn spawn(
        weak_this: Weak<Self>,
        mut state_changes: impl futures::Stream<Item = TransitableState<S, T>>
            + Unpin
            + 'static,
    ) {
        platform::spawn(async move {
            while let Some(state) = state_changes.next().await {
                let this = if let Some(this) = weak_this.upgrade() {
                    this
                } else {
                    break;
                };
                if let TransitableState::Transition(_) = state {
                    let mut states = this.state.subscribe().skip(1);
                    let (timeout, timeout_handle) =
                        resettable_delay_for(this.timeout, false);
                    drop(this.timeout_handle.borrow_mut().replace(timeout_handle));
                    let weak_this = Weak::clone(&weak_this);
                    drop(this);
                    platform::spawn(async move {
                        if let Either::Right(_) =
                            future::select(states.next(), Box::pin(timeout))
                                .await
                        {
                            if let Some(this) = weak_this.upgrade() {
                                let stable = this.state.get().cancel_transition();
                                log::debug!(
                                    "Media state transition timed out, \
                                     falling back to {:?}",
                                    stable,
                                );
                                this.state.set(stable);
                            }
                        }
                    });
                }
            }
        });
    }

    /// Stops the transition timeout.
    pub fn stop_transition_timeout(&self) {
        if let Some(timer) = &*self.timeout_handle.borrow() {
            timer.stop();
        }
    }

    /// Restarts the transition timeout.
    pub fn reset_transition_timeout(&self) {
        if let Some(timer) = &*self.timeout_handle.borrow() {
            timer.reset();
        }
    }

    /// Returns the current [`TransitableState`].
    #[inline]
    #[must_use]
    pub fn state(&self) -> TransitableState<S, T> {
        self.state.get()
    }

    /// Starts transition into the `desired_state`.
    ///
    /// # Errors
    ///
    /// With [`ConflictingTransition`] if a transition into the opposite
    /// state is in flight. The state is left untouched then.
    pub fn transition_to(
        &self,
        desired_state: S,
    ) -> Result<(), Traced<ConflictingTransition>> {
        let new_state = self
            .state
            .get()
            .transition_to(desired_state)
            .map_err(|intended| {
                tracerr::new!(ConflictingTransition(intended.into()))
            })?;
        self.state.set(new_state);
        Ok(())
    }

    /// Cancels the in-flight transition, falling back to the stable state it
    /// started from.
    pub fn cancel_transition(&self) {
        let state = self.state.get();
        if !state.is_stable() {
            self.state.set(state.cancel_transition());
        }
    }

    /// Returns [`Future`] resolving once the state becomes
    /// [`TransitableState::Stable`], or this controller is dropped.
    ///
    /// # Errors
    ///
    /// With [`OppositeState`] if the state settles on the opposite of the
    /// `desired_state`.
    ///
    /// [`Future`]: std::future::Future
    pub fn when_media_state_stable(
        &self,
        desired_state: S,
    ) -> LocalBoxFuture<'static, Result<(), Traced<OppositeState>>> {
        let mut states = self.state.subscribe();
        async move {
            while let Some(state) = states.next().await {
                if let TransitableState::Stable(s) = state {
                    return if s == desired_state {
                        Ok(())
                    } else {
                        Err(tracerr::new!(OppositeState(s.into())))
                    };
                }
            }
            Ok(())
        }
        .boxed_local()
    }

    /// Applies the state settled by the server.
    ///
    /// An in-flight transition heading to `new_state` completes. Otherwise
    /// the transition keeps going from the new base state.
    pub fn update(&self, new_state: S) {
        let state_update = match self.state.get() {
            TransitableState::Stable(_) => new_state.into(),
            TransitableState::Transition(t) => {
                if t.intended() == new_state {
                    new_state.into()
                } else {
                    t.set_inner(new_state).into()
                }
            }
        };

        self.state.set(state_update);
    }

    /// Returns the stable state this controller is at or heading to.
    #[must_use]
    pub fn intended(&self) -> S {
        match self.state.get() {
            TransitableState::Stable(s) => s,
            TransitableState::Transition(t) => t.intended(),
        }
    }

    /// Indicates whether a transition is in flight.
    #[inline]
    #[must_use]
    pub fn is_transitioning(&self) -> bool {
        !self.state.get().is_stable()
    }
}

impl MuteStateController {
    /// Indicates whether the state is settled on
    /// [`mute_state::Stable::Muted`].
    #[inline]
    #[must_use]
    pub fn muted(&self) -> bool {
        self.state.get() == mute_state::Stable::Muted.into()
    }

    /// Indicates whether the state is settled on
    /// [`mute_state::Stable::Unmuted`].
    #[inline]
    #[must_use]
    pub fn unmuted(&self) -> bool {
        self.state.get() == mute_state::Stable::Unmuted.into()
    }
}

impl MediaExchangeStateController {
    /// Indicates whether the state is settled on
    /// [`media_exchange_state::Stable::Disabled`].
    #[inline]
    #[must_use]
    pub fn disabled(&self) -> bool {
        self.state.get() == media_exchange_state::Stable::Disabled.into()
    }

    /// Indicates whether the state is settled on
    /// [`media_exchange_state::Stable::Enabled`].
    #[inline]
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.state.get() == media_exchange_state::Stable::Enabled.into()
    }
}

#[cfg(test)]
mod spec {
    use tokio::task::LocalSet;

    use super::*;
    use crate::peer::media::transitable_state::media_exchange_state::Stable;

    const TIMEOUT: Duration = Duration::from_millis(500);

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn unanswered_transition_is_cancelled() {
        LocalSet::new()
            .run_until(async {
                let ctrl =
                    MediaExchangeStateController::new(Stable::Enabled, TIMEOUT);
                ctrl.transition_to(Stable::Disabled).unwrap();
                assert!(ctrl.is_transitioning());

                platform::delay_for(TIMEOUT + Duration::from_millis(10)).await;

                assert!(ctrl.enabled());
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn opposite_transition_fails_fast() {
        LocalSet::new()
            .run_until(async {
                let ctrl =
                    MediaExchangeStateController::new(Stable::Enabled, TIMEOUT);
                ctrl.transition_to(Stable::Disabled).unwrap();

                let err = ctrl.transition_to(Stable::Enabled).unwrap_err();

                assert_eq!(
                    err.into_inner(),
                    ConflictingTransition(Stable::Disabled.into())
                );
                assert_eq!(ctrl.intended(), Stable::Disabled);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn cancelled_transition_frees_opposite_one() {
        LocalSet::new()
            .run_until(async {
                let ctrl =
                    MediaExchangeStateController::new(Stable::Disabled, TIMEOUT);
                ctrl.transition_to(Stable::Enabled).unwrap();
                let wait = ctrl.when_media_state_stable(Stable::Enabled);

                ctrl.cancel_transition();

                assert!(wait.await.is_err());
                assert!(ctrl.disabled());
                ctrl.transition_to(Stable::Enabled).unwrap();
                assert_eq!(ctrl.intended(), Stable::Enabled);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn server_decision_resolves_waiters() {
        LocalSet::new()
            .run_until(async {
                let ctrl =
                    MediaExchangeStateController::new(Stable::Enabled, TIMEOUT);
                ctrl.transition_to(Stable::Disabled).unwrap();
                let wait = ctrl.when_media_state_stable(Stable::Disabled);

                ctrl.update(Stable::Disabled);

                wait.await.unwrap();
                assert!(ctrl.disabled());
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn timed_out_transition_reports_opposite_state() {
        LocalSet::new()
            .run_until(async {
                let ctrl =
                    MediaExchangeStateController::new(Stable::Enabled, TIMEOUT);
                ctrl.transition_to(Stable::Disabled).unwrap();

                let err = ctrl
                    .when_media_state_stable(Stable::Disabled)
                    .await
                    .unwrap_err();

                assert_eq!(
                    err.into_inner(),
                    OppositeState(Stable::Enabled.into())
                );
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn update_during_transition_changes_fallback() {
        LocalSet::new()
            .run_until(async {
                let ctrl =
                    MediaExchangeStateController::new(Stable::Enabled, TIMEOUT);
                ctrl.transition_to(Stable::Disabled).unwrap();
                ctrl.stop_transition_timeout();

                ctrl.update(Stable::Enabled);

                assert!(ctrl.is_transitioning());
                assert_eq!(ctrl.intended(), Stable::Disabled);
            })
            .await;
    }
}
