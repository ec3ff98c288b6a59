//! Media states of senders and receivers that change only with the server's
//! approval.

mod controller;
pub mod media_exchange_state;
pub mod mute_state;

use derive_more::{Display, From};
use medea_jason_proto::{TrackId, TrackPatchCommand};

#[doc(inline)]
pub use self::controller::{
    MediaExchangeStateController, MuteStateController,
    TransitableStateController,
};

/// [`TransitableState`] of the media exchange axis.
pub type MediaExchangeState =
    TransitableState<media_exchange_state::Stable, media_exchange_state::Transition>;

/// [`TransitableState`] of the mute axis.
pub type MuteState =
    TransitableState<mute_state::Stable, mute_state::Transition>;

/// Every media state a sender or receiver can be switched into.
#[derive(Clone, Copy, Debug, Display, Eq, From, PartialEq)]
pub enum MediaState {
    /// Toggles `MediaStreamTrack.enabled`.
    ///
    /// Needs no renegotiation, the traffic keeps flowing.
    Mute(mute_state::Stable),

    /// Drops the track when [`media_exchange_state::Stable::Disabled`].
    ///
    /// Needs renegotiation and stops the traffic.
    MediaExchange(media_exchange_state::Stable),
}

impl MediaState {
    /// Builds a [`TrackPatchCommand`] requesting this [`MediaState`] for the
    /// provided [`TrackId`].
    #[must_use]
    pub fn generate_track_patch(self, track_id: TrackId) -> TrackPatchCommand {
        match self {
            Self::Mute(mute) => TrackPatchCommand {
                id: track_id,
                muted: Some(mute == mute_state::Stable::Muted),
                enabled: None,
            },
            Self::MediaExchange(media_exchange) => TrackPatchCommand {
                id: track_id,
                enabled: Some(
                    media_exchange == media_exchange_state::Stable::Enabled,
                ),
                muted: None,
            },
        }
    }

    /// Returns the opposite of this [`MediaState`].
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Mute(mute) => Self::Mute(mute.opposite()),
            Self::MediaExchange(media_exchange) => {
                Self::MediaExchange(media_exchange.opposite())
            }
        }
    }
}

/// A transition into the opposite of the requested [`MediaState`] is in
/// flight.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[display(fmt = "Transition into {} is already in progress", _0)]
pub struct ConflictingTransition(pub MediaState);

/// The server settled the state on the opposite of the requested
/// [`MediaState`].
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[display(fmt = "MediaState transits into opposite ({}) of the requested", _0)]
pub struct OppositeState(pub MediaState);

/// [`TransitableState::Stable`] variant of a [`TransitableState`].
pub trait InStable: Clone + Copy + PartialEq {
    type Transition: InTransition;

    /// Converts this [`InStable`] into [`InStable::Transition`].
    fn start_transition(self) -> Self::Transition;
}

/// [`TransitableState::Transition`] variant of a [`TransitableState`].
pub trait InTransition: Clone + Copy + PartialEq {
    type Stable: InStable;

    /// Returns the state this [`InTransition`] heads to.
    fn intended(self) -> Self::Stable;

    /// Replaces the inner [`InTransition::Stable`] state.
    fn set_inner(self, inner: Self::Stable) -> Self;

    /// Returns the inner [`InTransition::Stable`] state.
    fn into_inner(self) -> Self::Stable;
}

/// State which is either settled or on its way to another settled state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransitableState<S, T> {
    Transition(T),
    Stable(S),
}

impl<S, T> TransitableState<S, T>
where
    T: InTransition<Stable = S> + Into<TransitableState<S, T>>,
    S: InStable<Transition = T> + Into<TransitableState<S, T>>,
{
    /// Indicates whether this [`TransitableState`] is not in transition.
    #[inline]
    #[must_use]
    pub fn is_stable(self) -> bool {
        matches!(self, Self::Stable(_))
    }

    /// Starts transition into the `desired_state`.
    ///
    /// No-op if already in or heading to the `desired_state`.
    ///
    /// # Errors
    ///
    /// Returns the intended state of the in-flight transition if it heads
    /// to the opposite of the `desired_state`.
    pub fn transition_to(self, desired_state: S) -> Result<Self, S> {
        if self == desired_state.into() {
            return Ok(self);
        }
        match self {
            Self::Stable(stable) => Ok(stable.start_transition().into()),
            Self::Transition(transition) => {
                let intended = transition.intended();
                if intended == desired_state {
                    Ok(self)
                } else {
                    Err(intended)
                }
            }
        }
    }

    /// Cancels the ongoing transition, if any.
    #[inline]
    #[must_use]
    pub fn cancel_transition(self) -> Self {
        match self {
            Self::Stable(_) => self,
            Self::Transition(t) => t.into_inner().into(),
        }
    }
}

impl From<media_exchange_state::Stable> for MediaExchangeState {
    #[inline]
    fn from(from: media_exchange_state::Stable) -> Self {
        Self::Stable(from)
    }
}

impl From<media_exchange_state::Transition> for MediaExchangeState {
    #[inline]
    fn from(from: media_exchange_state::Transition) -> Self {
        Self::Transition(from)
    }
}

impl From<mute_state::Stable> for MuteState {
    #[inline]
    fn from(from: mute_state::Stable) -> Self {
        Self::Stable(from)
    }
}

impl From<mute_state::Transition> for MuteState {
    #[inline]
    fn from(from: mute_state::Transition) -> Self {
        Self::Transition(from)
    }
}

#[cfg(test)]
mod spec {
    use super::{
        media_exchange_state::{Stable, Transition},
        *,
    };

    const DISABLED: MediaExchangeState =
        TransitableState::Stable(Stable::Disabled);
    const ENABLED: MediaExchangeState =
        TransitableState::Stable(Stable::Enabled);
    const ENABLING_DISABLED: MediaExchangeState =
        TransitableState::Transition(Transition::Enabling(Stable::Disabled));
    const ENABLING_ENABLED: MediaExchangeState =
        TransitableState::Transition(Transition::Enabling(Stable::Enabled));
    const DISABLING_DISABLED: MediaExchangeState =
        TransitableState::Transition(Transition::Disabling(Stable::Disabled));
    const DISABLING_ENABLED: MediaExchangeState =
        TransitableState::Transition(Transition::Disabling(Stable::Enabled));

    #[test]
    fn transition_to() {
        assert_eq!(DISABLED.transition_to(Stable::Disabled), Ok(DISABLED));
        assert_eq!(
            DISABLED.transition_to(Stable::Enabled),
            Ok(ENABLING_DISABLED)
        );
        assert_eq!(ENABLED.transition_to(Stable::Enabled), Ok(ENABLED));
        assert_eq!(
            ENABLED.transition_to(Stable::Disabled),
            Ok(DISABLING_ENABLED)
        );
        assert_eq!(
            ENABLING_DISABLED.transition_to(Stable::Enabled),
            Ok(ENABLING_DISABLED)
        );
        assert_eq!(
            DISABLING_ENABLED.transition_to(Stable::Disabled),
            Ok(DISABLING_ENABLED)
        );
    }

    #[test]
    fn opposite_transition_conflicts() {
        assert_eq!(
            ENABLING_DISABLED.transition_to(Stable::Disabled),
            Err(Stable::Enabled)
        );
        assert_eq!(
            DISABLING_ENABLED.transition_to(Stable::Enabled),
            Err(Stable::Disabled)
        );
        assert_eq!(
            ENABLING_ENABLED.transition_to(Stable::Disabled),
            Err(Stable::Enabled)
        );
        assert_eq!(
            DISABLING_DISABLED.transition_to(Stable::Enabled),
            Err(Stable::Disabled)
        );
    }

    #[test]
    fn cancel_transition() {
        assert_eq!(DISABLED.cancel_transition(), DISABLED);
        assert_eq!(ENABLED.cancel_transition(), ENABLED);
        assert_eq!(ENABLING_DISABLED.cancel_transition(), DISABLED);
        assert_eq!(ENABLING_ENABLED.cancel_transition(), ENABLED);
        assert_eq!(DISABLING_DISABLED.cancel_transition(), DISABLED);
        assert_eq!(DISABLING_ENABLED.cancel_transition(), ENABLED);
    }

    #[test]
    fn generates_track_patches() {
        let id = TrackId(3);

        let patch = MediaState::from(Stable::Disabled).generate_track_patch(id);
        assert_eq!(patch.enabled, Some(false));
        assert_eq!(patch.muted, None);

        let patch =
            MediaState::from(mute_state::Stable::Muted).generate_track_patch(id);
        assert_eq!(patch.muted, Some(true));
        assert_eq!(patch.enabled, None);
    }
}
