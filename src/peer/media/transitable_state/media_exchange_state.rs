//! State of media publishing or receiving.

use derive_more::Display;

use super::{InStable, InTransition};

/// Stable media exchange state.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum Stable {
    /// Media flows.
    Enabled,

    /// Media doesn't flow.
    Disabled,
}

impl Stable {
    /// Returns the opposite value to this [`Stable`].
    #[inline]
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Enabled => Self::Disabled,
            Self::Disabled => Self::Enabled,
        }
    }
}

impl InStable for Stable {
    type Transition = Transition;

    /// [`Stable::Enabled`] starts [`Transition::Disabling`] and vice versa.
    #[inline]
    fn start_transition(self) -> Self::Transition {
        match self {
            Self::Enabled => Transition::Disabling(self),
            Self::Disabled => Transition::Enabling(self),
        }
    }
}

impl From<bool> for Stable {
    #[inline]
    fn from(enabled: bool) -> Self {
        if enabled {
            Self::Enabled
        } else {
            Self::Disabled
        }
    }
}

/// Media exchange state in transition to another [`Stable`].
///
/// The inner [`Stable`] is the state in effect right now. It is restored if
/// the server never confirms the desired one.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Transition {
    /// Should be enabled, but awaits the server's permission.
    Enabling(Stable),

    /// Should be disabled, but awaits the server's permission.
    Disabling(Stable),
}

impl InTransition for Transition {
    type Stable = Stable;

    #[inline]
    fn intended(self) -> Self::Stable {
        match self {
            Self::Enabling(_) => Stable::Enabled,
            Self::Disabling(_) => Stable::Disabled,
        }
    }

    #[inline]
    fn set_inner(self, inner: Self::Stable) -> Self {
        match self {
            Self::Enabling(_) => Self::Enabling(inner),
            Self::Disabling(_) => Self::Disabling(inner),
        }
    }

    #[inline]
    fn into_inner(self) -> Self::Stable {
        match self {
            Self::Enabling(s) | Self::Disabling(s) => s,
        }
    }
}
