//! Errors reported by the host environment.

use std::borrow::Cow;

use derive_more::Display;

/// Error thrown by the host.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
#[display(fmt = "{}: {}", name, message)]
pub struct Error {
    /// Name of this [`Error`], e.g. `NotAllowedError`.
    pub name: Cow<'static, str>,

    /// Human-readable description of this [`Error`].
    pub message: String,
}

impl Error {
    /// Creates a new [`Error`] with the provided name and message.
    #[inline]
    pub fn new<N, M>(name: N, message: M) -> Self
    where
        N: Into<Cow<'static, str>>,
        M: Into<String>,
    {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Failure of a `getUserMedia()` request.
///
/// Hosts able to tell which device failed report [`GetUserMediaError::Audio`]
/// or [`GetUserMediaError::Video`].
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum GetUserMediaError {
    /// Acquiring the audio device failed.
    #[display(fmt = "Failed to get audio track: {}", _0)]
    Audio(Error),

    /// Acquiring the video device failed.
    #[display(fmt = "Failed to get video track: {}", _0)]
    Video(Error),

    /// Request failed for a reason not tied to a device kind.
    #[display(fmt = "{}", _0)]
    Unknown(Error),
}
