//! Access to the host's capture devices.

use std::rc::Rc;

use async_trait::async_trait;

use crate::{
    media::{DisplayMediaStreamConstraints, MediaStreamConstraints},
    platform::{Error, GetUserMediaError, MediaStreamTrack},
};

/// Kind of an input device.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MediaDeviceKind {
    /// Microphone.
    AudioInput,

    /// Camera.
    VideoInput,
}

/// Information about a capture device available on the host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InputDeviceInfo {
    /// Unique identifier of the device.
    pub device_id: String,

    /// Kind of the device.
    pub kind: MediaDeviceKind,

    /// Human-readable label, empty until the permission is granted.
    pub label: String,

    /// Identifier shared by devices belonging to the same physical device.
    pub group_id: String,
}

/// Display available for capturing on the host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MediaDisplayInfo {
    /// Unique identifier of the display.
    pub device_id: String,

    /// Title describing the display, if any.
    pub title: Option<String>,
}

/// Host's `MediaDevices` interface.
#[async_trait(?Send)]
pub trait MediaDevices {
    /// Lists the capture devices available on the host.
    async fn enumerate_devices(&self) -> Result<Vec<InputDeviceInfo>, Error>;

    /// Lists the displays available for capturing.
    async fn enumerate_displays(&self) -> Result<Vec<MediaDisplayInfo>, Error>;

    /// Acquires device tracks satisfying the provided constraints.
    async fn get_user_media(
        &self,
        caps: MediaStreamConstraints,
    ) -> Result<Vec<Rc<dyn MediaStreamTrack>>, GetUserMediaError>;

    /// Acquires display capture tracks satisfying the provided constraints.
    async fn get_display_media(
        &self,
        caps: DisplayMediaStreamConstraints,
    ) -> Result<Vec<Rc<dyn MediaStreamTrack>>, Error>;

    /// Switches the audio output to the device with the provided `device_id`.
    ///
    /// Fails if there is no such output device.
    async fn set_output_audio_id(&self, device_id: String) -> Result<(), Error>;

    /// Sets a function invoked whenever the set of devices changes.
    fn on_device_change(&self, f: Option<Box<dyn Fn()>>);
}
