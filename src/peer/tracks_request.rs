//! Matching of acquired [`local::Track`]s to the requirements of senders.

use std::{collections::HashMap, convert::TryFrom, rc::Rc};

use derive_more::Display;
use medea_jason_proto::{MediaSourceKind, TrackId};
use tracerr::Traced;

use crate::media::{
    track::local, AudioTrackConstraints, DeviceVideoTrackConstraints,
    DisplayVideoTrackConstraints, MediaKind, MediaStreamSettings,
    TrackConstraints, VideoSource,
};

/// Errors that may occur when validating a [`TracksRequest`] or parsing
/// [`local::Track`]s.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum TracksRequestError {
    /// [`TracksRequest`] contains multiple [`AudioTrackConstraints`].
    #[display(fmt = "only one audio track is allowed in SimpleTracksRequest")]
    TooManyAudioTracks,

    /// [`TracksRequest`] contains multiple [`DeviceVideoTrackConstraints`].
    #[display(
        fmt = "only one device video track is allowed in SimpleTracksRequest"
    )]
    TooManyDeviceVideoTracks,

    /// [`TracksRequest`] contains multiple [`DisplayVideoTrackConstraints`].
    #[display(
        fmt = "only one display video track is allowed in SimpleTracksRequest"
    )]
    TooManyDisplayVideoTracks,

    /// [`TracksRequest`] contains no track constraints at all.
    #[display(fmt = "SimpleTracksRequest should have at least one track")]
    NoTracks,

    /// Required audio is disabled by the provided settings.
    #[display(fmt = "required audio track is disabled")]
    ExpectedAudioTracks,

    /// Required device video is disabled by the provided settings.
    #[display(fmt = "required device video track is disabled")]
    ExpectedDeviceVideoTracks,

    /// Required display video is disabled by the provided settings.
    #[display(fmt = "required display video track is disabled")]
    ExpectedDisplayVideoTracks,

    /// Audio track fails to satisfy the requested constraints.
    #[display(
        fmt = "provided audio track does not satisfy specified constraints"
    )]
    InvalidAudioTrack,

    /// Video track fails to satisfy the requested constraints.
    #[display(
        fmt = "provided video track does not satisfy specified constraints"
    )]
    InvalidVideoTrack,
}

/// Track constraints of all senders of a peer which need a local track.
#[derive(Debug, Default)]
pub struct TracksRequest {
    audio: HashMap<TrackId, AudioTrackConstraints>,
    device_video: HashMap<TrackId, DeviceVideoTrackConstraints>,
    display_video: HashMap<TrackId, DisplayVideoTrackConstraints>,
}

impl TracksRequest {
    /// Adds the constraints of the sender with the provided [`TrackId`].
    pub fn add_track_request<T: Into<TrackConstraints>>(
        &mut self,
        track_id: TrackId,
        caps: T,
    ) {
        match caps.into() {
            TrackConstraints::Audio(audio) => {
                drop(self.audio.insert(track_id, audio));
            }
            TrackConstraints::Video(VideoSource::Device(device)) => {
                drop(self.device_video.insert(track_id, device));
            }
            TrackConstraints::Video(VideoSource::Display(display)) => {
                drop(self.display_video.insert(track_id, display));
            }
        }
    }
}

/// [`TracksRequest`] with at most one track of each media and at least one
/// track in total.
#[derive(Debug)]
pub struct SimpleTracksRequest {
    audio: Option<(TrackId, AudioTrackConstraints)>,
    device_video: Option<(TrackId, DeviceVideoTrackConstraints)>,
    display_video: Option<(TrackId, DisplayVideoTrackConstraints)>,
}

impl SimpleTracksRequest {
    /// Assigns the provided [`local::Track`]s to the requested [`TrackId`]s.
    ///
    /// Media without a provided track is skipped.
    ///
    /// # Errors
    ///
    /// With [`TracksRequestError::InvalidAudioTrack`] or
    /// [`TracksRequestError::InvalidVideoTrack`] if a provided track doesn't
    /// satisfy the constraints requested for it.
    pub fn parse_tracks(
        &self,
        tracks: Vec<Rc<local::Track>>,
    ) -> Result<HashMap<TrackId, Rc<local::Track>>, Traced<TracksRequestError>>
    {
        use TracksRequestError::{InvalidAudioTrack, InvalidVideoTrack};

        let mut audio_tracks = Vec::new();
        let mut device_video_tracks = Vec::new();
        let mut display_video_tracks = Vec::new();
        for track in tracks {
            match (track.kind(), track.media_source_kind()) {
                (MediaKind::Audio, _) => audio_tracks.push(track),
                (MediaKind::Video, MediaSourceKind::Device) => {
                    device_video_tracks.push(track);
                }
                (MediaKind::Video, MediaSourceKind::Display) => {
                    display_video_tracks.push(track);
                }
            }
        }

        let mut parsed_tracks = HashMap::new();
        if let Some((id, audio)) = &self.audio {
            if let Some(track) = audio_tracks.into_iter().next() {
                if !audio.satisfies(track.platform_track().as_ref()) {
                    return Err(tracerr::new!(InvalidAudioTrack));
                }
                drop(parsed_tracks.insert(*id, track));
            }
        }
        if let Some((id, device_video)) = &self.device_video {
            if let Some(track) = device_video_tracks.into_iter().next() {
                if !device_video.satisfies(track.platform_track().as_ref()) {
                    return Err(tracerr::new!(InvalidVideoTrack));
                }
                drop(parsed_tracks.insert(*id, track));
            }
        }
        if let Some((id, display_video)) = &self.display_video {
            if let Some(track) = display_video_tracks.into_iter().next() {
                if !display_video.satisfies(track.platform_track().as_ref()) {
                    return Err(tracerr::new!(InvalidVideoTrack));
                }
                drop(parsed_tracks.insert(*id, track));
            }
        }

        Ok(parsed_tracks)
    }

    /// Narrows this [`SimpleTracksRequest`] with the host's
    /// [`MediaStreamSettings`].
    ///
    /// Media disabled or unconstrained in `other` is dropped from the
    /// request, and the rest gets the host's constraints merged in.
    ///
    /// # Errors
    ///
    /// With [`TracksRequestError::ExpectedAudioTracks`],
    /// [`TracksRequestError::ExpectedDeviceVideoTracks`] or
    /// [`TracksRequestError::ExpectedDisplayVideoTracks`] if a required media
    /// is not requested by `other`.
    pub fn merge<T: Into<MediaStreamSettings>>(
        &mut self,
        other: T,
    ) -> Result<(), Traced<TracksRequestError>> {
        use MediaKind as MK;
        use MediaSourceKind as SK;

        let other = other.into();

        match (
            other.get_audio().filter(|_| {
                other.is_track_enabled_and_constrained(MK::Audio, None)
            }),
            self.audio.as_mut(),
        ) {
            (Some(caps), Some((_, audio))) => audio.merge(caps.clone()),
            (None, Some((_, audio))) => {
                if audio.is_required() {
                    return Err(tracerr::new!(
                        TracksRequestError::ExpectedAudioTracks
                    ));
                }
                self.audio = None;
            }
            (_, None) => (),
        }

        match (
            other.get_device_video().filter(|_| {
                other.is_track_enabled_and_constrained(
                    MK::Video,
                    Some(SK::Device),
                )
            }),
            self.device_video.as_mut(),
        ) {
            (Some(caps), Some((_, video))) => video.merge(caps.clone()),
            (None, Some((_, video))) => {
                if video.is_required() {
                    return Err(tracerr::new!(
                        TracksRequestError::ExpectedDeviceVideoTracks
                    ));
                }
                self.device_video = None;
            }
            (_, None) => (),
        }

        match (
            other.get_display_video().filter(|_| {
                other.is_track_enabled_and_constrained(
                    MK::Video,
                    Some(SK::Display),
                )
            }),
            self.display_video.as_mut(),
        ) {
            (Some(caps), Some((_, video))) => video.merge(caps.clone()),
            (None, Some((_, video))) => {
                if video.is_required() {
                    return Err(tracerr::new!(
                        TracksRequestError::ExpectedDisplayVideoTracks
                    ));
                }
                self.display_video = None;
            }
            (_, None) => (),
        }

        Ok(())
    }

    /// Indicates whether nothing is left to request.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.audio.is_none()
            && self.device_video.is_none()
            && self.display_video.is_none()
    }
}

impl TryFrom<TracksRequest> for SimpleTracksRequest {
    type Error = TracksRequestError;

    fn try_from(value: TracksRequest) -> Result<Self, Self::Error> {
        use TracksRequestError::{
            NoTracks, TooManyAudioTracks, TooManyDeviceVideoTracks,
            TooManyDisplayVideoTracks,
        };

        if value.device_video.len() > 1 {
            return Err(TooManyDeviceVideoTracks);
        } else if value.display_video.len() > 1 {
            return Err(TooManyDisplayVideoTracks);
        } else if value.audio.len() > 1 {
            return Err(TooManyAudioTracks);
        } else if value.device_video.is_empty()
            && value.display_video.is_empty()
            && value.audio.is_empty()
        {
            return Err(NoTracks);
        }

        Ok(Self {
            audio: value.audio.into_iter().next(),
            device_video: value.device_video.into_iter().next(),
            display_video: value.display_video.into_iter().next(),
        })
    }
}

impl From<&SimpleTracksRequest> for MediaStreamSettings {
    fn from(request: &SimpleTracksRequest) -> Self {
        let mut constraints = Self::new();

        if let Some((_, audio)) = &request.audio {
            constraints.audio(audio.clone());
        }
        if let Some((_, device_video)) = &request.device_video {
            constraints.device_video(device_video.clone());
        }
        if let Some((_, display_video)) = &request.display_video {
            constraints.display_video(display_video.clone());
        }

        constraints
    }
}

#[cfg(test)]
mod spec {
    use medea_jason_proto::{AudioSettings, MediaType, VideoSettings};

    use super::*;

    fn audio(required: bool) -> MediaType {
        MediaType::Audio(AudioSettings { required })
    }

    fn video(required: bool, source_kind: MediaSourceKind) -> MediaType {
        MediaType::Video(VideoSettings {
            required,
            source_kind,
        })
    }

    #[test]
    fn rejects_duplicated_media() {
        let mut request = TracksRequest::default();
        request.add_track_request(TrackId(1), audio(false));
        request.add_track_request(TrackId(2), audio(false));

        assert_eq!(
            SimpleTracksRequest::try_from(request).unwrap_err(),
            TracksRequestError::TooManyAudioTracks,
        );
        assert_eq!(
            SimpleTracksRequest::try_from(TracksRequest::default())
                .unwrap_err(),
            TracksRequestError::NoTracks,
        );
    }

    #[test]
    fn merge_drops_optional_media_disabled_by_host() {
        let mut request = TracksRequest::default();
        request.add_track_request(TrackId(1), audio(false));
        request
            .add_track_request(TrackId(2), video(false, MediaSourceKind::Device));
        let mut request = SimpleTracksRequest::try_from(request).unwrap();

        let mut settings = MediaStreamSettings::new();
        settings.audio(AudioTrackConstraints::new());
        request.merge(settings).unwrap();

        let merged = MediaStreamSettings::from(&request);
        assert!(merged.get_audio().is_some());
        assert!(merged.get_device_video().is_none());
    }

    #[test]
    fn merge_refuses_to_drop_required_media() {
        let mut request = TracksRequest::default();
        request.add_track_request(
            TrackId(1),
            video(true, MediaSourceKind::Display),
        );
        let mut request = SimpleTracksRequest::try_from(request).unwrap();

        let mut settings = MediaStreamSettings::new();
        settings.display_video(DisplayVideoTrackConstraints::new());
        settings.set_track_enabled(
            false,
            MediaKind::Video,
            Some(MediaSourceKind::Display),
        );

        assert_eq!(
            request.merge(settings).unwrap_err().into_inner(),
            TracksRequestError::ExpectedDisplayVideoTracks,
        );
    }
}
