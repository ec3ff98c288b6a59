//! Native media track.

use std::rc::Rc;

use crate::media::MediaKind;

/// Liveness of a [`MediaStreamTrack`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MediaStreamTrackState {
    /// Track is producing or able to produce media.
    Live,

    /// Track has ended and will never produce media again.
    Ended,
}

/// Media track produced by a capture device or received from a remote peer.
pub trait MediaStreamTrack {
    /// Unique identifier of this track.
    fn id(&self) -> String;

    /// Kind of media carried by this track.
    fn kind(&self) -> MediaKind;

    /// Identifier of the device backing this track, if any.
    fn device_id(&self) -> Option<String>;

    /// Indicates whether this track was captured from a display.
    fn is_display(&self) -> bool;

    /// Current [`MediaStreamTrackState`].
    fn ready_state(&self) -> MediaStreamTrackState;

    /// Indicates whether this track is allowed to render media.
    fn enabled(&self) -> bool;

    /// Sets the `enabled` property of this track.
    fn set_enabled(&self, enabled: bool);

    /// Stops this track, releasing the underlying device.
    fn stop(&self);

    /// Creates a new track sharing the same source.
    fn fork(&self) -> Rc<dyn MediaStreamTrack>;

    /// Sets a function invoked once this track ends for reasons other than
    /// [`MediaStreamTrack::stop()`].
    fn on_ended(&self, f: Option<Box<dyn FnOnce()>>);
}
