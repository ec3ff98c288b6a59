//! Mute state of media.

use derive_more::Display;

use super::{InStable, InTransition};

/// Stable mute state.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum Stable {
    Muted,
    Unmuted,
}

impl Stable {
    /// Returns the opposite value to this [`Stable`].
    #[inline]
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Muted => Self::Unmuted,
            Self::Unmuted => Self::Muted,
        }
    }
}

impl From<bool> for Stable {
    #[inline]
    fn from(is_muted: bool) -> Self {
        if is_muted {
            Self::Muted
        } else {
            Self::Unmuted
        }
    }
}

impl InStable for Stable {
    type Transition = Transition;

    #[inline]
    fn start_transition(self) -> Self::Transition {
        match self {
            Self::Unmuted => Transition::Muting(self),
            Self::Muted => Transition::Unmuting(self),
        }
    }
}

/// Mute state in transition to another [`Stable`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Transition {
    /// Should be muted, but awaits the server's permission.
    Muting(Stable),

    /// Should be unmuted, but awaits the server's permission.
    Unmuting(Stable),
}

impl InTransition for Transition {
    type Stable = Stable;

    #[inline]
    fn intended(self) -> Self::Stable {
        match self {
            Self::Muting(_) => Stable::Muted,
            Self::Unmuting(_) => Stable::Unmuted,
        }
    }

    #[inline]
    fn set_inner(self, inner: Self::Stable) -> Self {
        match self {
            Self::Muting(_) => Self::Muting(inner),
            Self::Unmuting(_) => Self::Unmuting(inner),
        }
    }

    #[inline]
    fn into_inner(self) -> Self::Stable {
        match self {
            Self::Muting(s) | Self::Unmuting(s) => s,
        }
    }
}
