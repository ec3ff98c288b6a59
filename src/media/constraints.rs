//! Constraints of local and remote media.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use medea_jason_proto::{
    AudioSettings as ProtoAudioConstraints, MediaSourceKind,
    MediaType as ProtoTrackConstraints, VideoSettings as ProtoVideoConstraints,
};

use crate::{
    media::MediaKind,
    peer::{media_exchange_state, mute_state, MediaState},
    platform::{MediaStreamTrack, MediaStreamTrackState},
};

/// Local media settings shared by all `PeerConnection`s of a `Room`.
///
/// New senders are created from the latest [`MediaStreamSettings`] stored
/// here.
#[derive(Clone, Debug, Default)]
pub struct LocalTracksConstraints(Rc<RefCell<MediaStreamSettings>>);

impl LocalTracksConstraints {
    /// Returns new [`LocalTracksConstraints`] with default values.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the constraints of the underlying [`MediaStreamSettings`]
    /// with the ones of `other`.
    ///
    /// A media type disabled in this [`LocalTracksConstraints`] stays
    /// disabled.
    #[inline]
    pub fn constrain(&self, other: MediaStreamSettings) {
        let updated = self.0.borrow().constrained_by(other);
        self.0.replace(updated);
    }

    /// Clones underlying [`MediaStreamSettings`].
    #[inline]
    #[must_use]
    pub fn inner(&self) -> MediaStreamSettings {
        self.0.borrow().clone()
    }

    /// Changes the [`MediaState`] of the provided [`MediaKind`] and
    /// [`MediaSourceKind`].
    ///
    /// `None` source kind means all sources of the [`MediaKind`].
    pub fn set_media_state(
        &self,
        state: MediaState,
        kind: MediaKind,
        source_kind: Option<MediaSourceKind>,
    ) {
        let mut updated = self.inner();
        match state {
            MediaState::MediaExchange(state) => updated.set_track_enabled(
                state == media_exchange_state::Stable::Enabled,
                kind,
                source_kind,
            ),
            MediaState::Mute(state) => updated.set_track_muted(
                state == mute_state::Stable::Muted,
                kind,
                source_kind,
            ),
        }
        self.0.replace(updated);
    }

    /// Indicates whether the provided media is enabled and constrained.
    #[inline]
    #[must_use]
    pub fn enabled(
        &self,
        kind: MediaKind,
        source_kind: Option<MediaSourceKind>,
    ) -> bool {
        self.0
            .borrow()
            .is_track_enabled_and_constrained(kind, source_kind)
    }

    /// Indicates whether the provided media is muted.
    #[inline]
    #[must_use]
    pub fn muted(
        &self,
        kind: MediaKind,
        source_kind: Option<MediaSourceKind>,
    ) -> bool {
        self.0.borrow().is_track_muted(kind, source_kind)
    }

    /// Indicates whether the provided media is enabled, regardless of
    /// whether it is constrained.
    #[inline]
    #[must_use]
    pub fn is_track_enabled(
        &self,
        kind: MediaKind,
        source_kind: Option<MediaSourceKind>,
    ) -> bool {
        self.0.borrow().is_track_enabled(kind, source_kind)
    }
}

impl From<MediaStreamSettings> for LocalTracksConstraints {
    #[inline]
    fn from(from: MediaStreamSettings) -> Self {
        Self(Rc::new(RefCell::new(from)))
    }
}

/// Constraints to the media received from remote. Used to disable or enable
/// media receiving.
#[derive(Debug)]
pub struct RecvConstraints {
    /// Is audio receiving enabled.
    is_audio_enabled: Cell<bool>,

    /// Is device video receiving enabled.
    is_device_video_enabled: Cell<bool>,

    /// Is display video receiving enabled.
    is_display_video_enabled: Cell<bool>,
}

impl Default for RecvConstraints {
    fn default() -> Self {
        Self {
            is_audio_enabled: Cell::new(true),
            is_device_video_enabled: Cell::new(true),
            is_display_video_enabled: Cell::new(true),
        }
    }
}

impl RecvConstraints {
    /// Enables or disables receiving of the provided media.
    pub fn set_enabled(
        &self,
        enabled: bool,
        kind: MediaKind,
        source_kind: Option<MediaSourceKind>,
    ) {
        match kind {
            MediaKind::Audio => self.is_audio_enabled.set(enabled),
            MediaKind::Video => match source_kind {
                None => {
                    self.is_device_video_enabled.set(enabled);
                    self.is_display_video_enabled.set(enabled);
                }
                Some(MediaSourceKind::Device) => {
                    self.is_device_video_enabled.set(enabled);
                }
                Some(MediaSourceKind::Display) => {
                    self.is_display_video_enabled.set(enabled);
                }
            },
        }
    }

    /// Indicates whether receiving of the provided media is enabled.
    #[must_use]
    pub fn is_track_enabled(
        &self,
        kind: MediaKind,
        source_kind: Option<MediaSourceKind>,
    ) -> bool {
        match kind {
            MediaKind::Audio => self.is_audio_enabled.get(),
            MediaKind::Video => match source_kind {
                None => {
                    self.is_device_video_enabled.get()
                        || self.is_display_video_enabled.get()
                }
                Some(MediaSourceKind::Device) => {
                    self.is_device_video_enabled.get()
                }
                Some(MediaSourceKind::Display) => {
                    self.is_display_video_enabled.get()
                }
            },
        }
    }
}

/// Constraints of one media type together with its enabled and muted flags.
#[derive(Clone, Debug, PartialEq)]
struct TrackSettings<C> {
    /// Constraints of the media, `None` if the media is not requested.
    constraints: Option<C>,

    /// Indicator whether the media should be published.
    enabled: bool,

    /// Indicator whether the published media is muted.
    muted: bool,
}

impl<C> Default for TrackSettings<C> {
    #[inline]
    fn default() -> Self {
        Self {
            constraints: None,
            enabled: true,
            muted: false,
        }
    }
}

impl<C> TrackSettings<C> {
    /// Indicates whether the media is enabled and constrained.
    #[inline]
    fn is_enabled_and_constrained(&self) -> bool {
        self.enabled && self.constraints.is_some()
    }

    /// Returns constraints of the media if it is enabled.
    #[inline]
    fn enabled_constraints(&self) -> Option<&C> {
        if self.enabled {
            self.constraints.as_ref()
        } else {
            None
        }
    }
}

/// Snapshot of local media constraints.
///
/// Once handed to a `Room` it is never mutated in place: updates produce a
/// new [`MediaStreamSettings`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MediaStreamSettings {
    audio: TrackSettings<AudioTrackConstraints>,
    device_video: TrackSettings<DeviceVideoTrackConstraints>,
    display_video: TrackSettings<DisplayVideoTrackConstraints>,
}

impl MediaStreamSettings {
    /// Creates new [`MediaStreamSettings`] requesting no media.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests audio with the provided constraints.
    #[inline]
    pub fn audio(&mut self, constraints: AudioTrackConstraints) {
        self.audio.constraints = Some(constraints);
    }

    /// Requests device video with the provided constraints.
    #[inline]
    pub fn device_video(&mut self, constraints: DeviceVideoTrackConstraints) {
        self.device_video.constraints = Some(constraints);
    }

    /// Requests display video with the provided constraints.
    #[inline]
    pub fn display_video(
        &mut self,
        constraints: DisplayVideoTrackConstraints,
    ) {
        self.display_video.constraints = Some(constraints);
    }

    /// Returns audio constraints, if requested.
    #[inline]
    #[must_use]
    pub fn get_audio(&self) -> Option<&AudioTrackConstraints> {
        self.audio.constraints.as_ref()
    }

    /// Returns device video constraints, if requested.
    #[inline]
    #[must_use]
    pub fn get_device_video(&self) -> Option<&DeviceVideoTrackConstraints> {
        self.device_video.constraints.as_ref()
    }

    /// Returns display video constraints, if requested.
    #[inline]
    #[must_use]
    pub fn get_display_video(&self) -> Option<&DisplayVideoTrackConstraints> {
        self.display_video.constraints.as_ref()
    }

    /// Enables or disables the provided media.
    pub fn set_track_enabled(
        &mut self,
        enabled: bool,
        kind: MediaKind,
        source_kind: Option<MediaSourceKind>,
    ) {
        match kind {
            MediaKind::Audio => self.audio.enabled = enabled,
            MediaKind::Video => match source_kind {
                None => {
                    self.device_video.enabled = enabled;
                    self.display_video.enabled = enabled;
                }
                Some(MediaSourceKind::Device) => {
                    self.device_video.enabled = enabled;
                }
                Some(MediaSourceKind::Display) => {
                    self.display_video.enabled = enabled;
                }
            },
        }
    }

    /// Mutes or unmutes the provided media.
    pub fn set_track_muted(
        &mut self,
        muted: bool,
        kind: MediaKind,
        source_kind: Option<MediaSourceKind>,
    ) {
        match kind {
            MediaKind::Audio => self.audio.muted = muted,
            MediaKind::Video => match source_kind {
                None => {
                    self.device_video.muted = muted;
                    self.display_video.muted = muted;
                }
                Some(MediaSourceKind::Device) => {
                    self.device_video.muted = muted;
                }
                Some(MediaSourceKind::Display) => {
                    self.display_video.muted = muted;
                }
            },
        }
    }

    /// Indicates whether the provided media is enabled.
    ///
    /// `None` source kind asks whether any video source is enabled.
    #[must_use]
    pub fn is_track_enabled(
        &self,
        kind: MediaKind,
        source_kind: Option<MediaSourceKind>,
    ) -> bool {
        match kind {
            MediaKind::Audio => self.audio.enabled,
            MediaKind::Video => match source_kind {
                None => self.device_video.enabled || self.display_video.enabled,
                Some(MediaSourceKind::Device) => self.device_video.enabled,
                Some(MediaSourceKind::Display) => self.display_video.enabled,
            },
        }
    }

    /// Indicates whether the provided media is enabled and constrained.
    #[must_use]
    pub fn is_track_enabled_and_constrained(
        &self,
        kind: MediaKind,
        source_kind: Option<MediaSourceKind>,
    ) -> bool {
        match kind {
            MediaKind::Audio => self.audio.is_enabled_and_constrained(),
            MediaKind::Video => match source_kind {
                None => {
                    self.device_video.is_enabled_and_constrained()
                        || self.display_video.is_enabled_and_constrained()
                }
                Some(MediaSourceKind::Device) => {
                    self.device_video.is_enabled_and_constrained()
                }
                Some(MediaSourceKind::Display) => {
                    self.display_video.is_enabled_and_constrained()
                }
            },
        }
    }

    /// Indicates whether the provided media is muted.
    ///
    /// `None` source kind asks whether every video source is muted.
    #[must_use]
    pub fn is_track_muted(
        &self,
        kind: MediaKind,
        source_kind: Option<MediaSourceKind>,
    ) -> bool {
        match kind {
            MediaKind::Audio => self.audio.muted,
            MediaKind::Video => match source_kind {
                None => self.device_video.muted && self.display_video.muted,
                Some(MediaSourceKind::Device) => self.device_video.muted,
                Some(MediaSourceKind::Display) => self.display_video.muted,
            },
        }
    }

    /// Returns every media this [`MediaStreamSettings`] requests.
    #[must_use]
    pub fn requested_kinds(&self) -> Vec<(MediaKind, MediaSourceKind)> {
        let mut kinds = Vec::new();
        if self.audio.is_enabled_and_constrained() {
            kinds.push((MediaKind::Audio, MediaSourceKind::Device));
        }
        if self.device_video.is_enabled_and_constrained() {
            kinds.push((MediaKind::Video, MediaSourceKind::Device));
        }
        if self.display_video.is_enabled_and_constrained() {
            kinds.push((MediaKind::Video, MediaSourceKind::Display));
        }
        kinds
    }

    /// Indicates whether any requested constraint pins an exact device.
    #[must_use]
    pub fn is_device_id_pinned(&self) -> bool {
        self.audio
            .constraints
            .as_ref()
            .map_or(false, AudioTrackConstraints::is_device_id_pinned)
            || self
                .device_video
                .constraints
                .as_ref()
                .map_or(false, DeviceVideoTrackConstraints::is_device_id_pinned)
    }

    /// Drops the audio constraints if the provided track satisfies them.
    ///
    /// Returns `true` if the constraints were dropped.
    pub fn unconstrain_if_satisfies_audio(
        &mut self,
        track: &dyn MediaStreamTrack,
    ) -> bool {
        if self
            .audio
            .enabled_constraints()
            .map_or(false, |c| c.satisfies(track))
        {
            self.audio.constraints = None;
            true
        } else {
            false
        }
    }

    /// Drops the device or display video constraints if the provided track
    /// satisfies them.
    ///
    /// Returns `true` if some constraints were dropped.
    pub fn unconstrain_if_satisfies_video(
        &mut self,
        track: &dyn MediaStreamTrack,
    ) -> bool {
        if self
            .device_video
            .enabled_constraints()
            .map_or(false, |c| c.satisfies(track))
        {
            self.device_video.constraints = None;
            true
        } else if self
            .display_video
            .enabled_constraints()
            .map_or(false, |c| c.satisfies(track))
        {
            self.display_video.constraints = None;
            true
        } else {
            false
        }
    }

    /// Builds new [`MediaStreamSettings`] with constraints of `other` and the
    /// enabled and muted flags of this one.
    ///
    /// A media disabled in either settings ends up disabled.
    #[must_use]
    fn constrained_by(&self, other: Self) -> Self {
        Self {
            audio: TrackSettings {
                constraints: other.audio.constraints,
                enabled: self.audio.enabled && other.audio.enabled,
                muted: self.audio.muted,
            },
            device_video: TrackSettings {
                constraints: other.device_video.constraints,
                enabled: self.device_video.enabled
                    && other.device_video.enabled,
                muted: self.device_video.muted,
            },
            display_video: TrackSettings {
                constraints: other.display_video.constraints,
                enabled: self.display_video.enabled
                    && other.display_video.enabled,
                muted: self.display_video.muted,
            },
        }
    }
}

/// Wrapper around [`MediaStreamConstraints`] and
/// [`DisplayMediaStreamConstraints`] saying which of them should be
/// requested.
#[derive(Clone, Debug, PartialEq)]
pub enum MultiSourceTracksConstraints {
    /// Only device media is requested (`getUserMedia()`).
    Device(MediaStreamConstraints),

    /// Only display media is requested (`getDisplayMedia()`).
    Display(DisplayMediaStreamConstraints),

    /// Both device and display media are requested.
    DeviceAndDisplay(MediaStreamConstraints, DisplayMediaStreamConstraints),
}

impl From<MediaStreamSettings> for Option<MultiSourceTracksConstraints> {
    fn from(settings: MediaStreamSettings) -> Self {
        let device = MediaStreamConstraints {
            audio: settings.audio.enabled_constraints().cloned(),
            video: settings.device_video.enabled_constraints().cloned(),
        };
        let display = DisplayMediaStreamConstraints {
            video: settings.display_video.enabled_constraints().cloned(),
        };
        let is_device = device.audio.is_some() || device.video.is_some();
        let is_display = display.video.is_some();

        match (is_device, is_display) {
            (true, true) => Some(MultiSourceTracksConstraints::DeviceAndDisplay(
                device, display,
            )),
            (true, false) => Some(MultiSourceTracksConstraints::Device(device)),
            (false, true) => {
                Some(MultiSourceTracksConstraints::Display(display))
            }
            (false, false) => None,
        }
    }
}

/// Constraints passed to the host's `getUserMedia()`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MediaStreamConstraints {
    /// Audio constraints, `None` if audio is not requested.
    pub audio: Option<AudioTrackConstraints>,

    /// Video constraints, `None` if video is not requested.
    pub video: Option<DeviceVideoTrackConstraints>,
}

/// Constraints passed to the host's `getDisplayMedia()`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DisplayMediaStreamConstraints {
    /// Video constraints, `None` if video is not requested.
    pub video: Option<DisplayVideoTrackConstraints>,
}

/// Constraints of a video source.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VideoSource {
    /// Video captured from a device.
    Device(DeviceVideoTrackConstraints),

    /// Video captured from a display.
    Display(DisplayVideoTrackConstraints),
}

impl VideoSource {
    /// Indicates whether this [`VideoSource`] is required to call starting.
    #[inline]
    #[must_use]
    pub fn is_required(&self) -> bool {
        match self {
            Self::Device(device) => device.required,
            Self::Display(display) => display.required,
        }
    }

    /// Checks whether the provided track satisfies this [`VideoSource`].
    #[inline]
    pub fn satisfies(&self, track: &dyn MediaStreamTrack) -> bool {
        match self {
            Self::Device(device) => device.satisfies(track),
            Self::Display(display) => display.satisfies(track),
        }
    }
}

impl From<ProtoVideoConstraints> for VideoSource {
    fn from(caps: ProtoVideoConstraints) -> Self {
        match caps.source_kind {
            MediaSourceKind::Device => Self::Device(DeviceVideoTrackConstraints {
                required: caps.required,
                ..DeviceVideoTrackConstraints::default()
            }),
            MediaSourceKind::Display => {
                Self::Display(DisplayVideoTrackConstraints {
                    required: caps.required,
                    ..DisplayVideoTrackConstraints::default()
                })
            }
        }
    }
}

/// Constraints of a single track, as declared by the server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TrackConstraints {
    /// Audio track constraints.
    Audio(AudioTrackConstraints),

    /// Video track constraints.
    Video(VideoSource),
}

impl TrackConstraints {
    /// Checks whether the provided track satisfies these constraints.
    pub fn satisfies(&self, track: &dyn MediaStreamTrack) -> bool {
        match self {
            Self::Audio(audio) => audio.satisfies(track),
            Self::Video(video) => video.satisfies(track),
        }
    }

    /// Indicates whether the track is required to call starting.
    #[must_use]
    pub fn is_required(&self) -> bool {
        match self {
            Self::Audio(audio) => audio.required,
            Self::Video(video) => video.is_required(),
        }
    }

    /// Returns [`MediaKind`] of these constraints.
    #[inline]
    #[must_use]
    pub fn media_kind(&self) -> MediaKind {
        match self {
            Self::Audio(_) => MediaKind::Audio,
            Self::Video(_) => MediaKind::Video,
        }
    }

    /// Returns [`MediaSourceKind`] of these constraints.
    #[inline]
    #[must_use]
    pub fn media_source_kind(&self) -> MediaSourceKind {
        match self {
            Self::Audio(_) | Self::Video(VideoSource::Device(_)) => {
                MediaSourceKind::Device
            }
            Self::Video(VideoSource::Display(_)) => MediaSourceKind::Display,
        }
    }
}

impl From<ProtoTrackConstraints> for TrackConstraints {
    fn from(caps: ProtoTrackConstraints) -> Self {
        match caps {
            ProtoTrackConstraints::Audio(audio) => Self::Audio(audio.into()),
            ProtoTrackConstraints::Video(video) => Self::Video(video.into()),
        }
    }
}

impl From<TrackConstraints> for ProtoTrackConstraints {
    fn from(caps: TrackConstraints) -> Self {
        let source_kind = caps.media_source_kind();
        match caps {
            TrackConstraints::Audio(audio) => {
                Self::Audio(ProtoAudioConstraints {
                    required: audio.required,
                })
            }
            TrackConstraints::Video(video) => {
                Self::Video(ProtoVideoConstraints {
                    required: video.is_required(),
                    source_kind,
                })
            }
        }
    }
}

/// Constraint of a string-like track setting.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConstrainString<T> {
    /// The setting must have exactly this value.
    Exact(T),

    /// The setting should preferably have this value.
    Ideal(T),
}

impl<T: PartialEq> ConstrainString<T> {
    /// Checks whether the `actual` setting value satisfies the provided
    /// constraint. Absent and ideal constraints are always satisfied.
    fn satisfies(this: &Option<Self>, actual: Option<&T>) -> bool {
        match this {
            None | Some(Self::Ideal(_)) => true,
            Some(Self::Exact(expected)) => actual == Some(expected),
        }
    }

    /// Returns the constrained value.
    #[inline]
    pub fn value(&self) -> &T {
        match self {
            Self::Exact(v) | Self::Ideal(v) => v,
        }
    }
}

/// Direction the camera faces.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FacingMode {
    /// Facing toward the user (a self-view camera).
    User,

    /// Facing away from the user (viewing the environment).
    Environment,

    /// Facing toward the user but to their left.
    Left,

    /// Facing toward the user but to their right.
    Right,
}

/// Constraints applicable to audio tracks.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AudioTrackConstraints {
    /// The identifier of the device generating the content for the media
    /// track.
    device_id: Option<ConstrainString<String>>,

    /// Importance of this constraint. Disabling of a required track is
    /// prohibited.
    required: bool,
}

impl AudioTrackConstraints {
    /// Creates new [`AudioTrackConstraints`] with none constraints configured.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an exact [deviceId][1] constraint.
    ///
    /// [1]: https://w3.org/TR/mediacapture-streams/#def-constraint-deviceId
    #[inline]
    pub fn device_id(&mut self, device_id: String) {
        self.device_id = Some(ConstrainString::Exact(device_id));
    }

    /// Returns the [deviceId][1] constraint.
    ///
    /// [1]: https://w3.org/TR/mediacapture-streams/#def-constraint-deviceId
    #[inline]
    #[must_use]
    pub fn get_device_id(&self) -> Option<&ConstrainString<String>> {
        self.device_id.as_ref()
    }

    /// Indicates whether these constraints require an exact device.
    #[inline]
    #[must_use]
    pub fn is_device_id_pinned(&self) -> bool {
        matches!(self.device_id, Some(ConstrainString::Exact(_)))
    }

    /// Checks whether the provided track satisfies these constraints.
    pub fn satisfies(&self, track: &dyn MediaStreamTrack) -> bool {
        track.kind() == MediaKind::Audio
            && track.ready_state() == MediaStreamTrackState::Live
            && ConstrainString::satisfies(
                &self.device_id,
                track.device_id().as_ref(),
            )
    }

    /// Merges these constraints with `another` ones, preferring the values
    /// already set.
    pub fn merge(&mut self, another: Self) {
        if self.device_id.is_none() && another.device_id.is_some() {
            self.device_id = another.device_id;
        }
        self.required |= another.required;
    }

    /// Indicates whether a track satisfying these constraints is required to
    /// call starting.
    #[inline]
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.required
    }
}

impl From<ProtoAudioConstraints> for AudioTrackConstraints {
    #[inline]
    fn from(caps: ProtoAudioConstraints) -> Self {
        Self {
            required: caps.required,
            device_id: None,
        }
    }
}

/// Constraints applicable to video tracks captured from a device.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeviceVideoTrackConstraints {
    /// The identifier of the device generating the content for the media
    /// track.
    device_id: Option<ConstrainString<String>>,

    /// Describes the directions that the camera can face, as seen from the
    /// user's perspective.
    facing_mode: Option<ConstrainString<FacingMode>>,

    /// Width of the video in pixels.
    width: Option<u32>,

    /// Height of the video in pixels.
    height: Option<u32>,

    /// Importance of this constraint. Disabling of a required track is
    /// prohibited.
    required: bool,
}

impl DeviceVideoTrackConstraints {
    /// Creates new [`DeviceVideoTrackConstraints`] with none constraints
    /// configured.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an exact [deviceId][1] constraint.
    ///
    /// [1]: https://w3.org/TR/mediacapture-streams/#def-constraint-deviceId
    #[inline]
    pub fn device_id(&mut self, device_id: String) {
        self.device_id = Some(ConstrainString::Exact(device_id));
    }

    /// Sets an exact [facingMode][1] constraint.
    ///
    /// [1]: https://w3.org/TR/mediacapture-streams/#dom-constraindomstring
    #[inline]
    pub fn exact_facing_mode(&mut self, facing_mode: FacingMode) {
        self.facing_mode = Some(ConstrainString::Exact(facing_mode));
    }

    /// Sets an ideal [facingMode][1] constraint.
    ///
    /// [1]: https://w3.org/TR/mediacapture-streams/#dom-constraindomstring
    #[inline]
    pub fn ideal_facing_mode(&mut self, facing_mode: FacingMode) {
        self.facing_mode = Some(ConstrainString::Ideal(facing_mode));
    }

    /// Sets the width of the video.
    #[inline]
    pub fn width(&mut self, width: u32) {
        self.width = Some(width);
    }

    /// Sets the height of the video.
    #[inline]
    pub fn height(&mut self, height: u32) {
        self.height = Some(height);
    }

    /// Returns the [deviceId][1] constraint.
    ///
    /// [1]: https://w3.org/TR/mediacapture-streams/#def-constraint-deviceId
    #[inline]
    #[must_use]
    pub fn get_device_id(&self) -> Option<&ConstrainString<String>> {
        self.device_id.as_ref()
    }

    /// Returns the [facingMode][1] constraint.
    ///
    /// [1]: https://w3.org/TR/mediacapture-streams/#dom-constraindomstring
    #[inline]
    #[must_use]
    pub fn get_facing_mode(&self) -> Option<&ConstrainString<FacingMode>> {
        self.facing_mode.as_ref()
    }

    /// Returns the requested `(width, height)` of the video.
    #[inline]
    #[must_use]
    pub fn get_size(&self) -> (Option<u32>, Option<u32>) {
        (self.width, self.height)
    }

    /// Indicates whether these constraints require an exact device.
    #[inline]
    #[must_use]
    pub fn is_device_id_pinned(&self) -> bool {
        matches!(self.device_id, Some(ConstrainString::Exact(_)))
    }

    /// Checks whether the provided track satisfies these constraints.
    pub fn satisfies(&self, track: &dyn MediaStreamTrack) -> bool {
        track.kind() == MediaKind::Video
            && !track.is_display()
            && track.ready_state() == MediaStreamTrackState::Live
            && ConstrainString::satisfies(
                &self.device_id,
                track.device_id().as_ref(),
            )
    }

    /// Merges these constraints with `another` ones, preferring the values
    /// already set.
    pub fn merge(&mut self, another: Self) {
        if self.device_id.is_none() && another.device_id.is_some() {
            self.device_id = another.device_id;
        }
        if self.facing_mode.is_none() && another.facing_mode.is_some() {
            self.facing_mode = another.facing_mode;
        }
        if self.width.is_none() {
            self.width = another.width;
        }
        if self.height.is_none() {
            self.height = another.height;
        }
        self.required |= another.required;
    }

    /// Indicates whether a track satisfying these constraints is required to
    /// call starting.
    #[inline]
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.required
    }
}

/// Constraints applicable to video tracks captured from a display.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DisplayVideoTrackConstraints {
    /// Width of the video in pixels.
    width: Option<u32>,

    /// Height of the video in pixels.
    height: Option<u32>,

    /// Importance of this constraint. Disabling of a required track is
    /// prohibited.
    required: bool,
}

impl DisplayVideoTrackConstraints {
    /// Creates new [`DisplayVideoTrackConstraints`] with none constraints
    /// configured.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the width of the video.
    #[inline]
    pub fn width(&mut self, width: u32) {
        self.width = Some(width);
    }

    /// Sets the height of the video.
    #[inline]
    pub fn height(&mut self, height: u32) {
        self.height = Some(height);
    }

    /// Returns the requested `(width, height)` of the video.
    #[inline]
    #[must_use]
    pub fn get_size(&self) -> (Option<u32>, Option<u32>) {
        (self.width, self.height)
    }

    /// Checks whether the provided track satisfies these constraints.
    pub fn satisfies(&self, track: &dyn MediaStreamTrack) -> bool {
        track.kind() == MediaKind::Video
            && track.is_display()
            && track.ready_state() == MediaStreamTrackState::Live
    }

    /// Merges these constraints with `another` ones, preferring the values
    /// already set.
    pub fn merge(&mut self, another: Self) {
        if self.width.is_none() {
            self.width = another.width;
        }
        if self.height.is_none() {
            self.height = another.height;
        }
        self.required |= another.required;
    }

    /// Indicates whether a track satisfying these constraints is required to
    /// call starting.
    #[inline]
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.required
    }
}

#[cfg(test)]
mod spec {
    use super::*;

    fn settings() -> MediaStreamSettings {
        let mut settings = MediaStreamSettings::new();
        settings.audio(AudioTrackConstraints::new());
        settings.device_video(DeviceVideoTrackConstraints::new());
        settings
    }

    #[test]
    fn builds_multi_source_constraints() {
        let caps: Option<MultiSourceTracksConstraints> = settings().into();
        assert!(matches!(
            caps,
            Some(MultiSourceTracksConstraints::Device(
                MediaStreamConstraints {
                    audio: Some(_),
                    video: Some(_)
                }
            ))
        ));

        let mut only_display = MediaStreamSettings::new();
        only_display.display_video(DisplayVideoTrackConstraints::new());
        let caps: Option<MultiSourceTracksConstraints> = only_display.into();
        assert!(matches!(
            caps,
            Some(MultiSourceTracksConstraints::Display(_))
        ));

        let caps: Option<MultiSourceTracksConstraints> =
            MediaStreamSettings::new().into();
        assert!(caps.is_none());
    }

    #[test]
    fn disabled_media_is_not_requested() {
        let mut settings = settings();
        settings.set_track_enabled(false, MediaKind::Audio, None);

        let caps: Option<MultiSourceTracksConstraints> =
            settings.clone().into();
        assert!(matches!(
            caps,
            Some(MultiSourceTracksConstraints::Device(
                MediaStreamConstraints {
                    audio: None,
                    video: Some(_)
                }
            ))
        ));
        assert_eq!(
            settings.requested_kinds(),
            vec![(MediaKind::Video, MediaSourceKind::Device)]
        );
    }

    #[test]
    fn constrain_keeps_disabled_media_disabled() {
        let local = LocalTracksConstraints::from(settings());
        local.set_media_state(
            media_exchange_state::Stable::Disabled.into(),
            MediaKind::Video,
            Some(MediaSourceKind::Device),
        );

        let mut new_settings = MediaStreamSettings::new();
        let mut audio = AudioTrackConstraints::new();
        audio.device_id("mic-2".into());
        new_settings.audio(audio);
        new_settings.device_video(DeviceVideoTrackConstraints::new());
        local.constrain(new_settings);

        assert!(local.enabled(MediaKind::Audio, None));
        assert!(!local.enabled(MediaKind::Video, Some(MediaSourceKind::Device)));
        assert!(local.inner().is_device_id_pinned());
    }

    #[test]
    fn recv_constraints_per_source() {
        let recv = RecvConstraints::default();
        recv.set_enabled(false, MediaKind::Video, Some(MediaSourceKind::Device));

        assert!(!recv.is_track_enabled(
            MediaKind::Video,
            Some(MediaSourceKind::Device)
        ));
        assert!(recv.is_track_enabled(
            MediaKind::Video,
            Some(MediaSourceKind::Display)
        ));
        assert!(recv.is_track_enabled(MediaKind::Video, None));
        assert!(recv.is_track_enabled(MediaKind::Audio, None));
    }

    #[test]
    fn constrain_string_exact_and_ideal() {
        let exact = Some(ConstrainString::Exact("a".to_owned()));
        let ideal = Some(ConstrainString::Ideal("a".to_owned()));

        assert!(ConstrainString::satisfies(&exact, Some(&"a".to_owned())));
        assert!(!ConstrainString::satisfies(&exact, Some(&"b".to_owned())));
        assert!(!ConstrainString::satisfies(&exact, None));
        assert!(ConstrainString::satisfies(&ideal, Some(&"b".to_owned())));
        assert!(ConstrainString::<String>::satisfies(&None, None));
    }
}
