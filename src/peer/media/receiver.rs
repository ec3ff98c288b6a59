//! Implementation of the receiving side of a [`Transceiver`].

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use futures::channel::mpsc;
use medea_jason_proto::{
    state, MediaSourceKind, MediaType, MemberId, TrackId, TrackPatchEvent,
};

use crate::{
    media::{
        track::{remote, MediaDirection},
        MediaKind, RecvConstraints, TrackConstraints,
    },
    peer::PeerEvent,
    platform::{MediaStreamTrack, Transceiver, TransceiverDirection},
    utils::HandleTable,
};

use super::{
    media_exchange_state, mute_state, InnerMediaConnections,
    MediaExchangeStateController, MediaStateControllable, MuteStateController,
    TransceiverSide,
};

/// Representation of a remote track received from some remote sender.
///
/// The remote track arrives after SDP negotiation, so the [`Receiver`] lives
/// without it in the meantime.
pub struct Receiver {
    track_id: TrackId,
    caps: TrackConstraints,
    sender_id: MemberId,
    transceiver: RefCell<Option<Rc<dyn Transceiver>>>,
    mid: RefCell<Option<String>>,
    track: RefCell<Option<Rc<remote::Track>>>,

    /// Media exchange state of the remote sender and all its receivers.
    enabled_general: Cell<media_exchange_state::Stable>,

    /// Individual media exchange state of this [`Receiver`].
    media_exchange_state: Rc<MediaExchangeStateController>,

    /// Mute state of the remote sender, settled by the server only.
    mute_state: Rc<MuteStateController>,

    is_track_notified: Cell<bool>,
    peer_events_sender: mpsc::UnboundedSender<PeerEvent>,
}

impl Receiver {
    /// Creates a new [`Receiver`].
    ///
    /// Without `mid` a [`Transceiver`] is created right away: the one of a
    /// sender of the same media is reused if it doesn't receive yet.
    #[must_use]
    pub(super) fn new(
        media_connections: &InnerMediaConnections,
        track_id: TrackId,
        media_type: MediaType,
        sender_id: MemberId,
        mid: Option<String>,
        recv_constraints: &RecvConstraints,
    ) -> Rc<Self> {
        let caps = TrackConstraints::from(media_type);
        let kind = caps.media_kind();
        let source_kind = caps.media_source_kind();
        let enabled =
            recv_constraints.is_track_enabled(kind, Some(source_kind));

        let transceiver = if mid.is_none() {
            let direction = if enabled {
                TransceiverDirection::RECV
            } else {
                TransceiverDirection::INACTIVE
            };
            let reused = media_connections
                .iter_senders_with_kind_and_source_kind(kind, Some(source_kind))
                .map(|s| s.transceiver())
                .find(|t| !t.has_direction(TransceiverDirection::RECV));
            Some(reused.map_or_else(
                || media_connections.add_transceiver(kind, direction),
                |t| {
                    t.add_direction(direction);
                    t
                },
            ))
        } else {
            None
        };

        Rc::new(Self {
            track_id,
            caps,
            sender_id,
            transceiver: RefCell::new(transceiver),
            mid: RefCell::new(mid),
            track: RefCell::new(None),
            enabled_general: Cell::new(enabled.into()),
            media_exchange_state: MediaExchangeStateController::new(
                enabled.into(),
                media_connections.transition_timeout,
            ),
            mute_state: MuteStateController::new(
                mute_state::Stable::Unmuted,
                media_connections.transition_timeout,
            ),
            is_track_notified: Cell::new(false),
            peer_events_sender: media_connections.peer_events_sender.clone(),
        })
    }

    /// Returns the ID of the member sending the media.
    #[inline]
    #[must_use]
    pub fn sender_id(&self) -> &MemberId {
        &self.sender_id
    }

    /// Returns the [`Transceiver`] of this [`Receiver`], if any.
    #[inline]
    #[must_use]
    pub fn transceiver(&self) -> Option<Rc<dyn Transceiver>> {
        self.transceiver.borrow().clone()
    }

    /// Sets the [`Transceiver`] of this [`Receiver`] found after
    /// negotiation.
    pub(super) fn replace_transceiver(&self, transceiver: Rc<dyn Transceiver>) {
        if self.mid.borrow().is_none() {
            drop(self.mid.replace(transceiver.mid()));
        }
        self.set_transceiver_direction(&transceiver);
        drop(self.transceiver.replace(Some(transceiver)));
    }

    /// Returns the received [`remote::Track`], if arrived already.
    #[inline]
    #[must_use]
    pub fn track(&self) -> Option<Rc<remote::Track>> {
        self.track.borrow().clone()
    }

    /// Indicates whether the media is actually received.
    #[must_use]
    pub fn is_receiving(&self) -> bool {
        let is_recv_direction = self
            .transceiver
            .borrow()
            .as_ref()
            .map_or(false, |t| t.has_direction(TransceiverDirection::RECV));
        self.media_exchange_state.enabled() && is_recv_direction
    }

    fn media_direction(&self) -> MediaDirection {
        MediaDirection::new(
            self.enabled_general.get() == media_exchange_state::Stable::Enabled,
            self.media_exchange_state.enabled(),
        )
    }

    fn set_transceiver_direction(&self, transceiver: &Rc<dyn Transceiver>) {
        if self.enabled_general.get() == media_exchange_state::Stable::Enabled
            && self.media_exchange_state.enabled()
        {
            transceiver.add_direction(TransceiverDirection::RECV);
        } else {
            transceiver.sub_direction(TransceiverDirection::RECV);
        }
    }

    /// Wraps the arrived remote [`MediaStreamTrack`] into a
    /// [`remote::Track`] and notifies about it.
    ///
    /// A repeated arrival of the same track is ignored.
    pub(super) fn set_remote_track(
        &self,
        transceiver: Rc<dyn Transceiver>,
        new_track: Rc<dyn MediaStreamTrack>,
        table: &Rc<HandleTable>,
    ) {
        if let Some(old_track) = self.track.borrow().as_ref() {
            if old_track.id() == new_track.id() {
                return;
            }
        }

        let new_track = remote::Track::new(
            new_track,
            self.caps.media_source_kind(),
            self.media_exchange_state.enabled(),
            self.mute_state.muted(),
            self.media_direction(),
            table,
        );

        self.replace_transceiver(transceiver);
        if let Some(prev_track) = self.track.replace(Some(new_track)) {
            prev_track.stop();
        }
        self.is_track_notified.set(false);
        self.maybe_notify_track();
    }

    /// Applies the provided [`TrackPatchEvent`].
    pub(super) fn update(&self, track_patch: &TrackPatchEvent) {
        if self.track_id != track_patch.id {
            return;
        }

        if let Some(enabled) = track_patch.enabled_general {
            self.enabled_general.set(enabled.into());
        }
        if let Some(enabled) = track_patch.enabled_individual {
            self.media_exchange_state.update(enabled.into());
            if let Some(track) = self.track.borrow().as_ref() {
                track.set_enabled(enabled);
            }
        }
        if let Some(muted) = track_patch.muted {
            self.mute_state.update(muted.into());
            if let Some(track) = self.track.borrow().as_ref() {
                track.set_muted(muted);
            }
        }

        if let Some(transceiver) = self.transceiver.borrow().as_ref() {
            self.set_transceiver_direction(transceiver);
        }
        if let Some(track) = self.track.borrow().as_ref() {
            track.set_media_direction(self.media_direction());
        }
    }

    /// Stops the received [`remote::Track`], if any.
    pub(super) fn stop(&self) {
        if let Some(track) = self.track.borrow_mut().take() {
            track.stop();
        }
    }

    /// Returns a snapshot of this [`Receiver`].
    #[must_use]
    pub fn state(&self) -> state::Receiver {
        state::Receiver {
            id: self.track_id,
            mid: self.mid(),
            media_type: self.caps.clone().into(),
            sender_id: self.sender_id.clone(),
            enabled_individual: self.media_exchange_state.intended()
                == media_exchange_state::Stable::Enabled,
            enabled_general: self.enabled_general.get()
                == media_exchange_state::Stable::Enabled,
            muted: self.mute_state.intended() == mute_state::Stable::Muted,
        }
    }

    /// Sends [`PeerEvent::NewRemoteTrack`] once per arrived track.
    fn maybe_notify_track(&self) {
        if self.is_track_notified.get() {
            return;
        }
        let track = if let Some(track) = self.track.borrow().clone() {
            track
        } else {
            return;
        };
        if self
            .peer_events_sender
            .unbounded_send(PeerEvent::NewRemoteTrack {
                sender_id: self.sender_id.clone(),
                track,
            })
            .is_err()
        {
            log::debug!("PeerEvent receiver is dropped");
        }
        self.is_track_notified.set(true);
    }
}

impl MediaStateControllable for Receiver {
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
}

impl TransceiverSide for Receiver {
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

    fn mid(&self) -> Option<String> {
        if self.mid.borrow().is_none() {
            let mid = self.transceiver.borrow().as_ref().and_then(|t| t.mid());
            drop(self.mid.replace(mid));
        }
        self.mid.borrow().clone()
    }

    #[inline]
    fn is_transitable(&self) -> bool {
        true
    }
}
