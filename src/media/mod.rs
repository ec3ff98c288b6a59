//! Local and remote media: constraints, acquisition and tracks.

mod constraints;
mod manager;
pub mod track;

use derive_more::Display;

#[doc(inline)]
pub use medea_jason_proto::MediaSourceKind;

#[doc(inline)]
pub use self::{
    constraints::{
        AudioTrackConstraints, ConstrainString, DeviceVideoTrackConstraints,
        DisplayMediaStreamConstraints, DisplayVideoTrackConstraints,
        FacingMode, LocalTracksConstraints, MediaStreamConstraints,
        MediaStreamSettings, MultiSourceTracksConstraints, RecvConstraints,
        TrackConstraints, VideoSource,
    },
    manager::{
        EnumerateDevicesError, EnumerateDisplaysError, GetDisplayMediaError,
        GetUserMediaError, InitLocalTracksError, MediaManager,
        MediaManagerHandle, SetOutputAudioIdError,
    },
};

/// Media exchange direction of a track.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum TrackDirection {
    /// Outbound track.
    Send,

    /// Inbound track.
    Recv,
}

/// Kind of a media.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum MediaKind {
    /// Audio media.
    Audio,

    /// Video media.
    Video,
}

impl MediaKind {
    /// Returns string representation of this [`MediaKind`].
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}
