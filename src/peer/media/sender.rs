//! Implementation of the sending side of a [`Transceiver`].

use std::{cell::RefCell, rc::Rc};

use medea_jason_proto::{
    state, MediaSourceKind, MediaType, MemberId, TrackId, TrackPatchEvent,
};

use crate::{
    media::{
        track::local, LocalTracksConstraints, MediaKind, TrackConstraints,
    },
    platform::{Transceiver, TransceiverDirection},
};

use super::{
    media_exchange_state, mute_state, InnerMediaConnections,
    MediaConnectionsError, MediaExchangeStateController, MediaState,
    MediaStateControllable, MuteStateController, Result, TransceiverSide,
};

/// Representation of a local [`local::Track`] being sent to remote members.
pub struct Sender {
    track_id: TrackId,
    caps: TrackConstraints,
    transceiver: Rc<dyn Transceiver>,

    /// Individual media exchange state of this [`Sender`].
    media_exchange_state: Rc<MediaExchangeStateController>,
    mute_state: Rc<MuteStateController>,

    /// Media exchange state of the [`Sender`] and all its receivers.
    enabled_general: RefCell<media_exchange_state::Stable>,

    track: RefCell<Option<Rc<local::Track>>>,
    receivers: Vec<MemberId>,
    send_constraints: LocalTracksConstraints,
}

impl Sender {
    /// Creates a new [`Sender`].
    ///
    /// A [`Transceiver`] is looked up by the provided `mid`. Without `mid`
    /// the transceiver of a receiver of the same media is reused, or a new
    /// one is created.
    ///
    /// # Errors
    ///
    /// With [`MediaConnectionsError::TransceiverNotFound`] if no
    /// [`Transceiver`] has the provided `mid`, or with
    /// [`MediaConnectionsError::CannotDisableRequiredSender`] if the
    /// [`Sender`] is required but disabled by the `send_constraints`.
    pub(super) fn new(
        media_connections: &InnerMediaConnections,
        id: TrackId,
        media_type: MediaType,
        mid: Option<String>,
        receivers: Vec<MemberId>,
        send_constraints: LocalTracksConstraints,
    ) -> Result<Rc<Self>> {
        let caps = TrackConstraints::from(media_type);
        let kind = caps.media_kind();
        let source_kind = caps.media_source_kind();

        let enabled = send_constraints.is_track_enabled(kind, Some(source_kind));
        if caps.is_required() && !enabled {
            return Err(tracerr::new!(
                MediaConnectionsError::CannotDisableRequiredSender
            ));
        }
        let muted = send_constraints.muted(kind, Some(source_kind));

        let transceiver = match mid {
            None => media_connections
                .iter_receivers_with_kind_and_source_kind(kind, Some(source_kind))
                .find_map(|rcvr| {
                    rcvr.transceiver().filter(|t| {
                        !t.has_direction(TransceiverDirection::SEND)
                    })
                })
                .unwrap_or_else(|| {
                    media_connections
                        .add_transceiver(kind, TransceiverDirection::INACTIVE)
                }),
            Some(mid) => media_connections
                .get_transceiver_by_mid(&mid)
                .ok_or(MediaConnectionsError::TransceiverNotFound(mid))
                .map_err(tracerr::wrap!())?,
        };

        let this = Rc::new(Self {
            track_id: id,
            caps,
            transceiver,
            media_exchange_state: MediaExchangeStateController::new(
                media_exchange_state::Stable::from(enabled),
                media_connections.transition_timeout,
            ),
            mute_state: MuteStateController::new(
                mute_state::Stable::from(muted),
                media_connections.transition_timeout,
            ),
            enabled_general: RefCell::new(
                media_exchange_state::Stable::from(enabled),
            ),
            track: RefCell::new(None),
            receivers,
            send_constraints,
        });
        this.update_direction();

        Ok(this)
    }

    /// Returns [`TrackConstraints`] of this [`Sender`].
    #[inline]
    #[must_use]
    pub fn caps(&self) -> &TrackConstraints {
        &self.caps
    }

    /// Returns the [`Transceiver`] of this [`Sender`].
    #[inline]
    #[must_use]
    pub fn transceiver(&self) -> Rc<dyn Transceiver> {
        Rc::clone(&self.transceiver)
    }

    /// Returns the members receiving this [`Sender`]'s media.
    #[inline]
    #[must_use]
    pub fn receivers(&self) -> &[MemberId] {
        &self.receivers
    }

    /// Indicates whether the media of this [`Sender`] is actually sent.
    #[must_use]
    pub fn is_publishing(&self) -> bool {
        self.transceiver.has_direction(TransceiverDirection::SEND)
    }

    /// Indicates whether a [`local::Track`] is attached.
    #[inline]
    #[must_use]
    pub fn has_track(&self) -> bool {
        self.track.borrow().is_some()
    }

    /// Indicates whether this [`Sender`] is enabled but still waits for a
    /// [`local::Track`].
    #[inline]
    #[must_use]
    pub fn is_local_stream_update_needed(&self) -> bool {
        self.enabled() && !self.has_track()
    }

    /// Indicates whether this [`Sender`] is settled as enabled.
    #[inline]
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.media_exchange_state.enabled()
    }

    /// Indicates whether this [`Sender`] is settled as disabled.
    #[inline]
    #[must_use]
    pub fn disabled(&self) -> bool {
        self.media_exchange_state.disabled()
    }

    /// Indicates whether this [`Sender`] is settled as muted.
    #[inline]
    #[must_use]
    pub fn muted(&self) -> bool {
        self.mute_state.muted()
    }

    /// Indicates whether this [`Sender`] is disabled for all its receivers.
    #[inline]
    #[must_use]
    pub fn general_disabled(&self) -> bool {
        *self.enabled_general.borrow() == media_exchange_state::Stable::Disabled
    }

    /// Inserts the provided [`local::Track`] into the [`Transceiver`].
    ///
    /// Inserting the already attached track is no-op.
    ///
    /// # Errors
    ///
    /// With [`MediaConnectionsError::CouldNotInsertLocalTrack`] if the host
    /// fails to attach the track.
    pub(super) async fn insert_track(
        &self,
        new_track: Rc<local::Track>,
    ) -> Result<()> {
        if let Some(current) = self.track.borrow().as_ref() {
            if current.id() == new_track.id() {
                return Ok(());
            }
        }

        let new_track = Rc::new(new_track.fork());
        new_track.set_enabled(!self.muted());

        self.transceiver
            .set_send_track(Some(Rc::clone(new_track.platform_track())))
            .await
            .map_err(MediaConnectionsError::CouldNotInsertLocalTrack)
            .map_err(tracerr::wrap!())?;

        drop(self.track.replace(Some(new_track)));

        Ok(())
    }

    /// Detaches and drops the current [`local::Track`], if any.
    pub(super) async fn remove_track(&self) {
        let track = self.track.borrow_mut().take();
        if track.is_some() {
            if let Err(e) = self.transceiver.set_send_track(None).await {
                log::error!("Failed to detach local track: {}", e);
            }
        }
    }

    /// Starts sending media if this [`Sender`] is enabled and has a track.
    pub(super) fn maybe_enable(&self) {
        if self.enabled() && !self.general_disabled() && self.has_track() {
            self.transceiver.add_direction(TransceiverDirection::SEND);
        }
    }

    /// Syncs the [`Transceiver`] direction with the states of this
    /// [`Sender`].
    fn update_direction(&self) {
        if self.enabled() && !self.general_disabled() && self.has_track() {
            self.transceiver.add_direction(TransceiverDirection::SEND);
        } else {
            self.transceiver.sub_direction(TransceiverDirection::SEND);
        }
    }

    /// Applies the provided [`TrackPatchEvent`].
    ///
    /// Returns `true` if this [`Sender`] became enabled and needs a
    /// [`local::Track`] now.
    pub(super) async fn update(&self, track: &TrackPatchEvent) -> bool {
        if track.id != self.track_id {
            return false;
        }

        let mut requires_media_update = false;
        if let Some(muted) = track.muted {
            self.mute_state.update(mute_state::Stable::from(muted));
            if let Some(local) = self.track.borrow().as_ref() {
                local.set_enabled(!muted);
            }
        }
        if let Some(enabled) = track.enabled_individual {
            let was_disabled = !self.enabled();
            self.media_exchange_state
                .update(media_exchange_state::Stable::from(enabled));
            if enabled {
                requires_media_update = was_disabled && !self.has_track();
            } else {
                self.remove_track().await;
            }
        }
        if let Some(enabled) = track.enabled_general {
            drop(
                self.enabled_general
                    .replace(media_exchange_state::Stable::from(enabled)),
            );
        }
        self.update_direction();

        requires_media_update
    }

    /// Returns a snapshot of this [`Sender`].
    #[must_use]
    pub fn state(&self) -> state::Sender {
        state::Sender {
            id: self.track_id,
            mid: self.mid(),
            media_type: self.caps.clone().into(),
            receivers: self.receivers.clone(),
            enabled_individual: self.media_exchange_state.intended()
                == media_exchange_state::Stable::Enabled,
            enabled_general: !self.general_disabled(),
            muted: self.mute_state.intended() == mute_state::Stable::Muted,
        }
    }
}

impl MediaStateControllable for Sender {
    #[inline]
    fn media_exchange_state_controller(
        &self,
    ) -> Rc<MediaExchangeStateController> {
        Rc::clone(&self.media_exchange_state)
    }

    #[inline]
    fn mute_state_controller(&self) -> Rc<MuteStateController> {
        Rc::clone(&self.mute_state)
    }

    /// Starts transition into the provided [`MediaState`].
    ///
    /// # Errors
    ///
    /// With [`MediaConnectionsError::CannotDisableRequiredSender`] if a
    /// required [`Sender`] is asked to be disabled. Muting is allowed.
    ///
    /// With [`MediaConnectionsError::ConflictingTransition`] if a transition
    /// into the opposite [`MediaState`] is in flight.
    fn media_state_transition_to(
        &self,
        desired_state: MediaState,
    ) -> Result<()> {
        if self.caps.is_required()
            && desired_state
                == media_exchange_state::Stable::Disabled.into()
        {
            return Err(tracerr::new!(
                MediaConnectionsError::CannotDisableRequiredSender
            ));
        }

        match desired_state {
            MediaState::MediaExchange(desired_state) => {
                self.media_exchange_state.transition_to(desired_state)
            }
            MediaState::Mute(desired_state) => {
                self.mute_state.transition_to(desired_state)
            }
        }
        .map_err(tracerr::map_from_and_wrap!())
    }
}

impl TransceiverSide for Sender {
    #[inline]
    fn track_id(&self) -> TrackId {
        self.track_id
    }

    #[inline]
    fn kind(&self) -> MediaKind {
        self.caps.media_kind()
    }

    #[inline]
    fn source_kind(&self) -> MediaSourceKind {
        self.caps.media_source_kind()
    }

    #[inline]
    fn mid(&self) -> Option<String> {
        self.transceiver.mid()
    }

    /// Video is transitable only while [`LocalTracksConstraints`] request
    /// its source.
    fn is_transitable(&self) -> bool {
        let settings = self.send_constraints.inner();
        match (self.caps.media_kind(), self.caps.media_source_kind()) {
            (MediaKind::Audio, _) => true,
            (MediaKind::Video, MediaSourceKind::Device) => {
                settings.get_device_video().is_some()
            }
            (MediaKind::Video, MediaSourceKind::Display) => {
                settings.get_display_video().is_some()
            }
        }
    }
}
