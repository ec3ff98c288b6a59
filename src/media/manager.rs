//! Acquiring and storing [`local::Track`]s.

use std::{
    cell::RefCell,
    collections::HashMap,
    fmt,
    rc::{Rc, Weak},
};

use derive_more::{Display, From};
use tracerr::Traced;

use super::track::local::{self, LocalMediaTrack};
use crate::{
    api,
    media::{
        DisplayMediaStreamConstraints, MediaKind, MediaSourceKind,
        MediaStreamConstraints, MediaStreamSettings,
        MultiSourceTracksConstraints,
    },
    platform::{
        self, InputDeviceInfo, MediaDevices, MediaDisplayInfo,
        MediaStreamTrackState,
    },
    utils::{Handle, HandleDetachedError, HandleSlot, HandleTable},
};

/// Errors occurring when enumerating the host's devices.
#[derive(Clone, Debug, Display, From)]
pub enum EnumerateDevicesError {
    /// `MediaDevices.enumerateDevices()` failed.
    #[display(fmt = "MediaDevices.enumerateDevices() failed: {}", _0)]
    Failed(platform::Error),

    /// [`MediaManagerHandle`] is detached.
    #[display(fmt = "MediaManagerHandle is in detached state")]
    #[from(ignore)]
    Detached,
}

impl From<HandleDetachedError> for EnumerateDevicesError {
    #[inline]
    fn from(_: HandleDetachedError) -> Self {
        Self::Detached
    }
}

/// Errors occurring when enumerating the host's displays.
#[derive(Clone, Debug, Display, From)]
pub enum EnumerateDisplaysError {
    /// `MediaDevices.enumerateDisplays()` failed.
    #[display(fmt = "MediaDevices.enumerateDisplays() failed: {}", _0)]
    Failed(platform::Error),

    /// [`MediaManagerHandle`] is detached.
    #[display(fmt = "MediaManagerHandle is in detached state")]
    #[from(ignore)]
    Detached,
}

impl From<HandleDetachedError> for EnumerateDisplaysError {
    #[inline]
    fn from(_: HandleDetachedError) -> Self {
        Self::Detached
    }
}

/// Errors occurring when switching the audio output device.
#[derive(Clone, Debug, Display)]
pub enum SetOutputAudioIdError {
    /// Host rejected the provided device ID.
    #[display(fmt = "Invalid output audio device ID: {}", _0)]
    InvalidDeviceId(platform::Error),

    /// [`MediaManagerHandle`] is detached.
    #[display(fmt = "MediaManagerHandle is in detached state")]
    Detached,
}

impl From<HandleDetachedError> for SetOutputAudioIdError {
    #[inline]
    fn from(_: HandleDetachedError) -> Self {
        Self::Detached
    }
}

/// Errors occurring when acquiring [`local::Track`]s.
#[derive(Clone, Debug, Display, From)]
pub enum InitLocalTracksError {
    /// [`MediaManagerHandle`] is detached.
    #[display(fmt = "MediaManagerHandle is in detached state")]
    #[from(ignore)]
    Detached,

    /// `getUserMedia()` request failed.
    #[display(fmt = "Failed to get local tracks: {}", _0)]
    GetUserMediaFailed(GetUserMediaError),

    /// `getDisplayMedia()` request failed.
    #[display(fmt = "Failed to get local tracks: {}", _0)]
    GetDisplayMediaFailed(GetDisplayMediaError),
}

impl From<HandleDetachedError> for InitLocalTracksError {
    #[inline]
    fn from(_: HandleDetachedError) -> Self {
        Self::Detached
    }
}

/// Acquired track was not `live`.
#[derive(Clone, Copy, Debug, Display)]
#[display(fmt = "{} track is ended", _0)]
struct LocalTrackIsEndedError(MediaKind);

/// Errors of a `getUserMedia()` request.
#[derive(Clone, Debug, Display, From)]
pub enum GetUserMediaError {
    /// The host failed the request.
    #[display(fmt = "MediaDevices.getUserMedia() failed: {}", _0)]
    PlatformRequestFailed(platform::GetUserMediaError),

    /// One of the returned tracks is not `live`.
    #[display(fmt = "New {} local track was ended", _0)]
    #[from(ignore)]
    LocalTrackIsEnded(MediaKind),
}

impl From<LocalTrackIsEndedError> for GetUserMediaError {
    #[inline]
    fn from(err: LocalTrackIsEndedError) -> Self {
        Self::LocalTrackIsEnded(err.0)
    }
}

/// Errors of a `getDisplayMedia()` request.
#[derive(Clone, Debug, Display, From)]
pub enum GetDisplayMediaError {
    /// The host failed the request.
    #[display(fmt = "MediaDevices.getDisplayMedia() failed: {}", _0)]
    PlatformRequestFailed(platform::Error),

    /// One of the returned tracks is not `live`.
    #[display(fmt = "New {} local track was ended", _0)]
    #[from(ignore)]
    LocalTrackIsEnded(MediaKind),
}

impl From<LocalTrackIsEndedError> for GetDisplayMediaError {
    #[inline]
    fn from(err: LocalTrackIsEndedError) -> Self {
        Self::LocalTrackIsEnded(err.0)
    }
}

/// Acquirer and weak cache of [`local::Track`]s.
///
/// The cache only holds [`Weak`] references: once every sender and host
/// handle drops a track, its capture stops and the entry is evicted lazily.
/// The next request for the same media acquires it anew.
#[derive(Clone)]
pub struct MediaManager(Rc<InnerMediaManager>);

struct InnerMediaManager {
    /// Acquired tracks by their IDs.
    tracks: RefCell<HashMap<String, Weak<local::Track>>>,

    media_devices: Rc<dyn MediaDevices>,

    /// Host callback fired when the set of devices changes.
    on_device_change: platform::Callback<()>,

    /// [`HandleTable`] new [`LocalMediaTrack`]s are registered in.
    table: Weak<HandleTable>,

    slot: HandleSlot,
}

impl MediaManager {
    /// Creates a new [`MediaManager`] acquiring media from the provided
    /// [`MediaDevices`].
    #[must_use]
    pub fn new(
        media_devices: Rc<dyn MediaDevices>,
        table: &Rc<HandleTable>,
    ) -> Self {
        let inner = Rc::new(InnerMediaManager {
            tracks: RefCell::default(),
            media_devices,
            on_device_change: platform::Callback::default(),
            table: Rc::downgrade(table),
            slot: HandleSlot::new(table),
        });

        let weak_inner = Rc::downgrade(&inner);
        inner.media_devices.on_device_change(Some(Box::new(move || {
            if let Some(inner) = weak_inner.upgrade() {
                inner.forget_device_tracks();
                inner.on_device_change.call0();
            }
        })));

        Self(inner)
    }

    /// Returns [`local::Track`]s satisfying the provided
    /// [`MediaStreamSettings`].
    ///
    /// Live cached tracks are reused, the rest is acquired from the host.
    /// The returned flag tells whether a track was acquired by this call.
    ///
    /// # Errors
    ///
    /// With [`InitLocalTracksError`] if the host fails the acquisition or
    /// hands out an ended track.
    pub async fn get_tracks<I: Into<MediaStreamSettings>>(
        &self,
        caps: I,
    ) -> Result<Vec<(Rc<local::Track>, bool)>, Traced<InitLocalTracksError>>
    {
        self.0.get_tracks(caps.into()).await
    }

    /// Creates a new [`MediaManagerHandle`] for the host.
    #[inline]
    #[must_use]
    pub fn new_handle(&self) -> MediaManagerHandle {
        MediaManagerHandle(self.0.slot.handle(Rc::downgrade(&self.0)))
    }

    /// Number of live tracks in the cache.
    #[must_use]
    pub fn cached_tracks_count(&self) -> usize {
        self.0
            .tracks
            .borrow()
            .values()
            .filter(|t| Weak::strong_count(t) > 0)
            .count()
    }
}

impl fmt::Debug for MediaManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaManager")
            .field("tracks", &self.0.tracks.borrow().len())
            .finish()
    }
}

impl InnerMediaManager {
    async fn enumerate_devices(
        &self,
    ) -> Result<Vec<InputDeviceInfo>, Traced<platform::Error>> {
        self.media_devices
            .enumerate_devices()
            .await
            .map_err(tracerr::wrap!())
    }

    async fn enumerate_displays(
        &self,
    ) -> Result<Vec<MediaDisplayInfo>, Traced<EnumerateDisplaysError>> {
        self.media_devices
            .enumerate_displays()
            .await
            .map_err(|e| tracerr::new!(EnumerateDisplaysError::Failed(e)))
    }

    async fn set_output_audio_id(
        &self,
        device_id: String,
    ) -> Result<(), Traced<SetOutputAudioIdError>> {
        log::debug!("Switching audio output to {}", device_id);
        self.media_devices
            .set_output_audio_id(device_id)
            .await
            .map_err(|e| {
                tracerr::new!(SetOutputAudioIdError::InvalidDeviceId(e))
            })
    }

    async fn get_tracks(
        &self,
        mut caps: MediaStreamSettings,
    ) -> Result<Vec<(Rc<local::Track>, bool)>, Traced<InitLocalTracksError>>
    {
        let tracks_from_storage = self
            .get_from_storage(&mut caps)
            .into_iter()
            .map(|t| (t, false));

        let new_tracks = match caps.into() {
            None => Vec::new(),
            Some(MultiSourceTracksConstraints::Device(caps)) => self
                .get_user_media(caps)
                .await
                .map_err(tracerr::map_from_and_wrap!())?,
            Some(MultiSourceTracksConstraints::Display(caps)) => self
                .get_display_media(caps)
                .await
                .map_err(tracerr::map_from_and_wrap!())?,
            Some(MultiSourceTracksConstraints::DeviceAndDisplay(
                device_caps,
                display_caps,
            )) => {
                let mut device_tracks = self
                    .get_user_media(device_caps)
                    .await
                    .map_err(tracerr::map_from_and_wrap!())?;
                let display_tracks = self
                    .get_display_media(display_caps)
                    .await
                    .map_err(tracerr::map_from_and_wrap!())?;
                device_tracks.extend(display_tracks);
                device_tracks
            }
        };

        Ok(tracks_from_storage
            .chain(new_tracks.into_iter().map(|t| (t, true)))
            .collect())
    }

    /// Picks cached tracks satisfying the provided [`MediaStreamSettings`]
    /// and drops the picked constraints from them.
    fn get_from_storage(
        &self,
        caps: &mut MediaStreamSettings,
    ) -> Vec<Rc<local::Track>> {
        let storage: Vec<_> = {
            let mut tracks = self.tracks.borrow_mut();
            tracks.retain(|_, track| Weak::strong_count(track) > 0);
            tracks.values().filter_map(Weak::upgrade).collect()
        };

        let mut tracks = Vec::new();
        for track in &storage {
            if track.ready_state() != MediaStreamTrackState::Live {
                continue;
            }
            if track.kind() == MediaKind::Audio
                && caps.unconstrain_if_satisfies_audio(
                    track.platform_track().as_ref(),
                )
            {
                tracks.push(Rc::clone(track));
                break;
            }
        }
        for track in storage {
            if track.ready_state() != MediaStreamTrackState::Live {
                continue;
            }
            if track.kind() == MediaKind::Video
                && caps.unconstrain_if_satisfies_video(
                    track.platform_track().as_ref(),
                )
            {
                tracks.push(track);
            }
        }

        tracks
    }

    async fn get_user_media(
        &self,
        caps: MediaStreamConstraints,
    ) -> Result<Vec<Rc<local::Track>>, Traced<GetUserMediaError>> {
        let tracks = self
            .media_devices
            .get_user_media(caps)
            .await
            .map_err(GetUserMediaError::from)
            .map_err(tracerr::wrap!())?;

        self.parse_and_save_tracks(tracks, MediaSourceKind::Device)
            .map_err(tracerr::map_from_and_wrap!())
    }

    async fn get_display_media(
        &self,
        caps: DisplayMediaStreamConstraints,
    ) -> Result<Vec<Rc<local::Track>>, Traced<GetDisplayMediaError>> {
        let tracks = self
            .media_devices
            .get_display_media(caps)
            .await
            .map_err(GetDisplayMediaError::from)
            .map_err(tracerr::wrap!())?;

        self.parse_and_save_tracks(tracks, MediaSourceKind::Display)
            .map_err(tracerr::map_from_and_wrap!())
    }

    /// Wraps the acquired tracks into [`local::Track`]s and caches them.
    ///
    /// Nothing is cached if any of the tracks is not `live`. Such tracks are
    /// stopped once dropped.
    fn parse_and_save_tracks(
        &self,
        tracks: Vec<Rc<dyn platform::MediaStreamTrack>>,
        kind: MediaSourceKind,
    ) -> Result<Vec<Rc<local::Track>>, Traced<LocalTrackIsEndedError>> {
        let tracks: Vec<_> = tracks
            .into_iter()
            .map(|tr| Rc::new(local::Track::new(tr, kind)))
            .collect();
        if let Some(ended) = tracks
            .iter()
            .find(|t| t.ready_state() != MediaStreamTrackState::Live)
        {
            return Err(tracerr::new!(LocalTrackIsEndedError(ended.kind())));
        }

        let mut storage = self.tracks.borrow_mut();
        for track in &tracks {
            drop(storage.insert(track.id(), Rc::downgrade(track)));
        }

        Ok(tracks)
    }

    /// Evicts cached device tracks, so pinned devices are looked up anew on
    /// the next request.
    ///
    /// Tracks in use keep running: this only affects future acquisitions.
    fn forget_device_tracks(&self) {
        self.tracks.borrow_mut().retain(|_, track| {
            track.upgrade().map_or(false, |t| {
                t.media_source_kind() != MediaSourceKind::Device
                    || t.platform_track().device_id().is_none()
            })
        });
    }
}

/// External handle to a [`MediaManager`].
#[derive(Clone, Debug)]
pub struct MediaManagerHandle(Handle<InnerMediaManager>);

impl MediaManagerHandle {
    /// Lists the capture devices available on the host.
    ///
    /// # Errors
    ///
    /// With `StateError` if the engine is disposed, or with
    /// `EnumerateDevicesException` if the host fails the request.
    pub async fn enumerate_devices(
        &self,
    ) -> Result<Vec<InputDeviceInfo>, api::Error> {
        let this = self
            .0
            .upgrade()
            .map_err(tracerr::map_from_and_wrap!(=> EnumerateDevicesError))?;
        this.enumerate_devices()
            .await
            .map_err(tracerr::map_from_and_wrap!(=> EnumerateDevicesError))
            .map_err(api::Error::from)
    }

    /// Lists the displays available for capturing.
    ///
    /// # Errors
    ///
    /// With `StateError` if the engine is disposed, or with
    /// `EnumerateDevicesException` if the host fails the request.
    pub async fn enumerate_displays(
        &self,
    ) -> Result<Vec<MediaDisplayInfo>, api::Error> {
        let this = self
            .0
            .upgrade()
            .map_err(tracerr::map_from_and_wrap!(=> EnumerateDisplaysError))?;
        this.enumerate_displays().await.map_err(api::Error::from)
    }

    /// Switches the audio output to the device with the provided
    /// `device_id`.
    ///
    /// # Errors
    ///
    /// With `StateError` if the engine is disposed, or with
    /// `InvalidOutputAudioDeviceIdException` if there is no such device.
    pub async fn set_output_audio_id(
        &self,
        device_id: String,
    ) -> Result<(), api::Error> {
        let this = self
            .0
            .upgrade()
            .map_err(tracerr::map_from_and_wrap!(=> SetOutputAudioIdError))?;
        this.set_output_audio_id(device_id)
            .await
            .map_err(api::Error::from)
    }

    /// Acquires [`LocalMediaTrack`]s satisfying the provided
    /// [`MediaStreamSettings`].
    ///
    /// # Errors
    ///
    /// With `StateError` if the engine is disposed, or with
    /// `LocalMediaInitException` if the acquisition fails.
    pub async fn init_local_tracks(
        &self,
        caps: MediaStreamSettings,
    ) -> Result<Vec<LocalMediaTrack>, api::Error> {
        let this = self
            .0
            .upgrade()
            .map_err(tracerr::map_from_and_wrap!(=> InitLocalTracksError))?;
        let tracks = this.get_tracks(caps).await?;
        let table = this.table.upgrade().ok_or_else(|| {
            api::Error::from(tracerr::new!(InitLocalTracksError::Detached))
        })?;

        Ok(tracks
            .into_iter()
            .map(|(track, _)| LocalMediaTrack::new(track, &table))
            .collect())
    }

    /// Sets a callback invoked whenever the set of host devices changes.
    ///
    /// # Errors
    ///
    /// With `StateError` if the engine is disposed.
    pub fn on_device_change<F>(&self, f: F) -> Result<(), api::Error>
    where
        F: Fn() + 'static,
    {
        self.0.upgrade()?.on_device_change.set_func(move |()| f());
        Ok(())
    }
}
