//! [`PeerConnection`] media management.
//!
//! [`PeerConnection`]: crate::peer::PeerConnection

mod receiver;
mod sender;
pub mod transitable_state;

use std::{
    cell::RefCell,
    collections::HashMap,
    rc::{Rc, Weak},
    time::Duration,
};

use derive_more::Display;
use futures::{
    channel::mpsc, future, future::LocalBoxFuture, FutureExt as _,
};
use medea_jason_proto::{
    self as proto, state, MediaSourceKind, TrackId, TrackPatchEvent,
};
use tracerr::Traced;

use crate::{
    media::{
        track::local, LocalTracksConstraints, MediaKind, RecvConstraints,
        TrackDirection,
    },
    peer::{LocalStreamUpdateCriteria, PeerEvent},
    platform::{self, MediaStreamTrack, RtcPeerConnection, Transceiver},
    utils::HandleTable,
};

use super::tracks_request::TracksRequest;

#[doc(inline)]
pub use self::{
    receiver::Receiver,
    sender::Sender,
    transitable_state::{
        media_exchange_state, mute_state, ConflictingTransition, InStable,
        InTransition, MediaExchangeState, MediaExchangeStateController,
        MediaState, MuteState, MuteStateController, OppositeState,
        TransitableState, TransitableStateController,
    },
};

/// Transceiver's sending ([`Sender`]) or receiving ([`Receiver`]) side.
pub trait TransceiverSide: MediaStateControllable {
    /// Returns [`TrackId`] of this [`TransceiverSide`].
    fn track_id(&self) -> TrackId;

    /// Returns [`MediaKind`] of this [`TransceiverSide`].
    fn kind(&self) -> MediaKind;

    /// Returns [`MediaSourceKind`] of this [`TransceiverSide`].
    fn source_kind(&self) -> MediaSourceKind;

    /// Returns [`mid`] of this [`TransceiverSide`].
    ///
    /// [`mid`]: https://w3.org/TR/webrtc/#dom-rtptransceiver-mid
    fn mid(&self) -> Option<String>;

    /// Indicates whether this [`TransceiverSide`] can be enabled or disabled
    /// without updating [`LocalTracksConstraints`].
    fn is_transitable(&self) -> bool;
}

/// Common operations over the [`MediaExchangeStateController`] and the
/// [`MuteStateController`] of an object.
pub trait MediaStateControllable {
    /// Returns the [`MediaExchangeStateController`].
    #[must_use]
    fn media_exchange_state_controller(
        &self,
    ) -> Rc<MediaExchangeStateController>;

    /// Returns the [`MuteStateController`].
    #[must_use]
    fn mute_state_controller(&self) -> Rc<MuteStateController>;

    /// Returns the current [`MediaExchangeState`].
    #[inline]
    #[must_use]
    fn media_exchange_state(&self) -> MediaExchangeState {
        self.media_exchange_state_controller().state()
    }

    /// Returns the current [`MuteState`].
    #[inline]
    #[must_use]
    fn mute_state(&self) -> MuteState {
        self.mute_state_controller().state()
    }

    /// Starts transition into the provided [`MediaState`].
    ///
    /// # Errors
    ///
    /// With [`MediaConnectionsError::ConflictingTransition`] if a transition
    /// into the opposite [`MediaState`] is in flight.
    fn media_state_transition_to(
        &self,
        desired_state: MediaState,
    ) -> Result<()> {
        match desired_state {
            MediaState::MediaExchange(desired_state) => self
                .media_exchange_state_controller()
                .transition_to(desired_state),
            MediaState::Mute(desired_state) => {
                self.mute_state_controller().transition_to(desired_state)
            }
        }
        .map_err(tracerr::map_from_and_wrap!())
    }

    /// Cancels the in-flight transition of the axis of the provided
    /// [`MediaState`].
    fn cancel_media_state_transition(&self, state: MediaState) {
        match state {
            MediaState::MediaExchange(_) => {
                self.media_exchange_state_controller().cancel_transition();
            }
            MediaState::Mute(_) => {
                self.mute_state_controller().cancel_transition();
            }
        }
    }

    /// Indicates whether the caller has to wait for the server to settle the
    /// provided [`MediaState`].
    #[must_use]
    fn is_subscription_needed(&self, desired_state: MediaState) -> bool {
        match desired_state {
            MediaState::MediaExchange(media_exchange) => {
                match self.media_exchange_state() {
                    MediaExchangeState::Transition(_) => true,
                    MediaExchangeState::Stable(stable) => {
                        stable != media_exchange
                    }
                }
            }
            MediaState::Mute(mute) => match self.mute_state() {
                MuteState::Transition(_) => true,
                MuteState::Stable(stable) => stable != mute,
            },
        }
    }

    /// Indicates whether a [`proto::TrackPatchCommand`] has to be sent to
    /// reach the provided [`MediaState`].
    #[must_use]
    fn is_track_patch_needed(&self, desired_state: MediaState) -> bool {
        match desired_state {
            MediaState::MediaExchange(media_exchange) => {
                match self.media_exchange_state() {
                    MediaExchangeState::Stable(stable) => {
                        stable != media_exchange
                    }
                    MediaExchangeState::Transition(transition) => {
                        transition.intended() != media_exchange
                    }
                }
            }
            MediaState::Mute(mute) => match self.mute_state() {
                MuteState::Stable(stable) => stable != mute,
                MuteState::Transition(transition) => {
                    transition.intended() != mute
                }
            },
        }
    }

    /// Returns [`Future`] resolving once the [`MediaState`] becomes stable.
    ///
    /// # Errors
    ///
    /// With [`MediaConnectionsError::MediaStateTransitsIntoOppositeState`]
    /// if the state settles on the opposite of the `desired_state`.
    ///
    /// [`Future`]: std::future::Future
    fn when_media_state_stable(
        &self,
        desired_state: MediaState,
    ) -> LocalBoxFuture<'static, Result<()>> {
        let fut = match desired_state {
            MediaState::Mute(desired_state) => self
                .mute_state_controller()
                .when_media_state_stable(desired_state),
            MediaState::MediaExchange(desired_state) => self
                .media_exchange_state_controller()
                .when_media_state_stable(desired_state),
        };
        fut.map(|res| res.map_err(tracerr::map_from_and_wrap!()))
            .boxed_local()
    }

    /// Stops the state transition timers.
    #[inline]
    fn stop_media_state_transition_timeout(&self) {
        self.media_exchange_state_controller()
            .stop_transition_timeout();
        self.mute_state_controller().stop_transition_timeout();
    }

    /// Resets the state transition timers.
    #[inline]
    fn reset_media_state_transition_timeout(&self) {
        self.media_exchange_state_controller()
            .reset_transition_timeout();
        self.mute_state_controller().reset_transition_timeout();
    }
}

/// Errors that may occur in [`MediaConnections`] storage.
#[derive(Clone, Debug, Display)]
pub enum MediaConnectionsError {
    /// [`local::Track`] could not be inserted into a [`Sender`]'s
    /// transceiver.
    #[display(fmt = "Failed to insert Track to a sender: {}", _0)]
    CouldNotInsertLocalTrack(platform::Error),

    /// A remote track arrived on a transceiver no [`Receiver`] knows.
    #[display(
        fmt = "Could not insert remote track with mid: {:?} into media \
               connections",
        _0
    )]
    CouldNotInsertRemoteTrack(Option<String>),

    /// Could not find a [`Transceiver`] by `mid`.
    #[display(fmt = "Unable to find Transceiver with provided mid: {}", _0)]
    TransceiverNotFound(String),

    /// Some [`Sender`] has no `mid`.
    #[display(fmt = "Peer has senders without mid")]
    SendersWithoutMid,

    /// Some [`Receiver`] has no `mid`.
    #[display(fmt = "Peer has receivers without mid")]
    ReceiversWithoutMid,

    /// A required [`Sender`] got no [`local::Track`].
    #[display(fmt = "Provided stream does not have all necessary Tracks")]
    InvalidMediaTracks,

    /// A [`local::Track`] doesn't satisfy its [`Sender`]'s constraints.
    #[display(fmt = "Provided Track does not satisfy senders constraints")]
    InvalidMediaTrack,

    /// [`MediaState`] settled on the opposite of the requested one.
    #[display(fmt = "{}", _0)]
    MediaStateTransitsIntoOppositeState(OppositeState),

    /// A transition into the opposite [`MediaState`] is in flight.
    #[display(fmt = "{}", _0)]
    ConflictingTransition(ConflictingTransition),

    /// A required [`Sender`] can't be disabled.
    #[display(fmt = "MediaExchangeState of Sender can't be transited into \
                     disabled state, because this Sender is required.")]
    CannotDisableRequiredSender,
}

impl From<OppositeState> for MediaConnectionsError {
    #[inline]
    fn from(err: OppositeState) -> Self {
        Self::MediaStateTransitsIntoOppositeState(err)
    }
}

impl From<ConflictingTransition> for MediaConnectionsError {
    #[inline]
    fn from(err: ConflictingTransition) -> Self {
        Self::ConflictingTransition(err)
    }
}

type Result<T> = std::result::Result<T, Traced<MediaConnectionsError>>;

/// Actual data of [`MediaConnections`] storage.
struct InnerMediaConnections {
    /// Parent [`RtcPeerConnection`], used to create transceivers.
    peer: Rc<dyn RtcPeerConnection>,

    peer_events_sender: mpsc::UnboundedSender<PeerEvent>,

    senders: HashMap<TrackId, Rc<Sender>>,

    receivers: HashMap<TrackId, Rc<Receiver>>,

    /// [`HandleTable`] remote tracks are registered in.
    table: Weak<HandleTable>,

    /// Timeout of [`TransitableStateController`]s.
    transition_timeout: Duration,
}

impl InnerMediaConnections {
    /// Returns [`Iterator`] over [`Sender`]s with the provided [`MediaKind`]
    /// and [`MediaSourceKind`].
    fn iter_senders_with_kind_and_source_kind(
        &self,
        kind: MediaKind,
        source_kind: Option<MediaSourceKind>,
    ) -> impl Iterator<Item = &Rc<Sender>> {
        self.senders.values().filter(move |sender| {
            sender.kind() == kind
                && source_kind.map_or(true, |sk| sender.source_kind() == sk)
        })
    }

    /// Returns [`Iterator`] over [`Receiver`]s with the provided
    /// [`MediaKind`] and [`MediaSourceKind`].
    fn iter_receivers_with_kind_and_source_kind(
        &self,
        kind: MediaKind,
        source_kind: Option<MediaSourceKind>,
    ) -> impl Iterator<Item = &Rc<Receiver>> {
        self.receivers.values().filter(move |receiver| {
            receiver.kind() == kind
                && source_kind.map_or(true, |sk| receiver.source_kind() == sk)
        })
    }

    fn get_transceivers_by_direction_and_kind(
        &self,
        direction: TrackDirection,
        kind: MediaKind,
        source_kind: Option<MediaSourceKind>,
    ) -> Vec<Rc<dyn TransceiverSide>> {
        match direction {
            TrackDirection::Send => self
                .iter_senders_with_kind_and_source_kind(kind, source_kind)
                .map(|tx| Rc::clone(tx) as Rc<dyn TransceiverSide>)
                .collect(),
            TrackDirection::Recv => self
                .iter_receivers_with_kind_and_source_kind(kind, source_kind)
                .map(|rx| Rc::clone(rx) as Rc<dyn TransceiverSide>)
                .collect(),
        }
    }

    /// Creates a new [`Transceiver`] in the [`RtcPeerConnection`].
    #[inline]
    fn add_transceiver(
        &self,
        kind: MediaKind,
        direction: platform::TransceiverDirection,
    ) -> Rc<dyn Transceiver> {
        self.peer.add_transceiver(kind, direction)
    }

    /// Looks up a [`Transceiver`] by its `mid`.
    #[inline]
    fn get_transceiver_by_mid(&self, mid: &str) -> Option<Rc<dyn Transceiver>> {
        self.peer.get_transceiver_by_mid(mid)
    }
}

/// Storage of the [`Sender`]s and [`Receiver`]s of one
/// [`RtcPeerConnection`].
pub struct MediaConnections(RefCell<InnerMediaConnections>);

impl MediaConnections {
    /// Creates a new empty [`MediaConnections`] of the provided
    /// [`RtcPeerConnection`].
    #[inline]
    #[must_use]
    pub fn new(
        peer: Rc<dyn RtcPeerConnection>,
        peer_events_sender: mpsc::UnboundedSender<PeerEvent>,
        table: Weak<HandleTable>,
        transition_timeout: Duration,
    ) -> Self {
        Self(RefCell::new(InnerMediaConnections {
            peer,
            peer_events_sender,
            senders: HashMap::new(),
            receivers: HashMap::new(),
            table,
            transition_timeout,
        }))
    }

    /// Creates [`Sender`]s and [`Receiver`]s of the provided
    /// [`proto::Track`]s.
    ///
    /// # Errors
    ///
    /// With [`MediaConnectionsError::TransceiverNotFound`] if a track's
    /// `mid` is unknown to the [`RtcPeerConnection`], or with
    /// [`MediaConnectionsError::CannotDisableRequiredSender`] if a required
    /// track is disabled by the `send_constraints`.
    pub fn create_tracks(
        &self,
        tracks: Vec<proto::Track>,
        send_constraints: &LocalTracksConstraints,
        recv_constraints: &RecvConstraints,
    ) -> Result<()> {
        for track in tracks {
            match track.direction {
                proto::Direction::Send { mid, receivers } => {
                    let sender = {
                        let inner = self.0.borrow();
                        Sender::new(
                            &inner,
                            track.id,
                            track.media_type,
                            mid,
                            receivers,
                            send_constraints.clone(),
                        )?
                    };
                    drop(self.0.borrow_mut().senders.insert(track.id, sender));
                }
                proto::Direction::Recv { mid, sender } => {
                    let receiver = {
                        let inner = self.0.borrow();
                        Receiver::new(
                            &inner,
                            track.id,
                            track.media_type,
                            sender,
                            mid,
                            recv_constraints,
                        )
                    };
                    drop(
                        self.0.borrow_mut().receivers.insert(track.id, receiver),
                    );
                }
            }
        }
        Ok(())
    }

    /// Returns all [`Sender`]s or [`Receiver`]s with the provided
    /// [`MediaKind`], [`TrackDirection`] and [`MediaSourceKind`].
    #[must_use]
    pub fn get_transceivers_sides(
        &self,
        kind: MediaKind,
        direction: TrackDirection,
        source_kind: Option<MediaSourceKind>,
    ) -> Vec<Rc<dyn TransceiverSide>> {
        self.0.borrow().get_transceivers_by_direction_and_kind(
            direction,
            kind,
            source_kind,
        )
    }

    /// Indicates whether all transitable [`TransceiverSide`]s with the
    /// provided [`MediaKind`], [`TrackDirection`] and [`MediaSourceKind`]
    /// are in the provided [`MediaState`].
    #[must_use]
    pub fn is_all_in_media_state(
        &self,
        kind: MediaKind,
        direction: TrackDirection,
        source_kind: Option<MediaSourceKind>,
        state: MediaState,
    ) -> bool {
        self.get_transceivers_sides(kind, direction, source_kind)
            .into_iter()
            .filter(|t| t.is_transitable())
            .all(|t| match state {
                MediaState::Mute(mute) => t.mute_state() == mute.into(),
                MediaState::MediaExchange(media_exchange) => {
                    t.media_exchange_state() == media_exchange.into()
                }
            })
    }

    /// Returns mapping of [`TrackId`]s to `mid`s of their transceivers.
    ///
    /// # Errors
    ///
    /// With [`MediaConnectionsError::SendersWithoutMid`] or
    /// [`MediaConnectionsError::ReceiversWithoutMid`] if some transceiver is
    /// not negotiated yet.
    pub fn get_mids(&self) -> Result<HashMap<TrackId, String>> {
        let inner = self.0.borrow();
        let mut mids =
            HashMap::with_capacity(inner.senders.len() + inner.receivers.len());
        for (track_id, sender) in &inner.senders {
            drop(
                mids.insert(
                    *track_id,
                    sender
                        .mid()
                        .ok_or(MediaConnectionsError::SendersWithoutMid)
                        .map_err(tracerr::wrap!())?,
                ),
            );
        }
        for (track_id, receiver) in &inner.receivers {
            drop(
                mids.insert(
                    *track_id,
                    receiver
                        .mid()
                        .ok_or(MediaConnectionsError::ReceiversWithoutMid)
                        .map_err(tracerr::wrap!())?,
                ),
            );
        }
        Ok(mids)
    }

    /// Returns activity statuses of all [`Sender`]s and [`Receiver`]s.
    #[must_use]
    pub fn get_transceivers_statuses(&self) -> HashMap<TrackId, bool> {
        let inner = self.0.borrow();
        inner
            .senders
            .iter()
            .map(|(id, s)| (*id, s.is_publishing()))
            .chain(inner.receivers.iter().map(|(id, r)| (*id, r.is_receiving())))
            .collect()
    }

    /// Returns the [`TransceiverSide`] with the provided [`TrackId`].
    #[must_use]
    pub fn get_transceiver_side_by_id(
        &self,
        track_id: TrackId,
    ) -> Option<Rc<dyn TransceiverSide>> {
        let inner = self.0.borrow();
        inner
            .senders
            .get(&track_id)
            .map(|s| Rc::clone(s) as Rc<dyn TransceiverSide>)
            .or_else(|| {
                inner
                    .receivers
                    .get(&track_id)
                    .map(|r| Rc::clone(r) as Rc<dyn TransceiverSide>)
            })
    }

    /// Returns the [`Sender`] with the provided [`TrackId`].
    #[must_use]
    pub fn get_sender_by_id(&self, id: TrackId) -> Option<Rc<Sender>> {
        self.0.borrow().senders.get(&id).cloned()
    }

    /// Returns the [`Receiver`] with the provided [`TrackId`].
    #[must_use]
    pub fn get_receiver_by_id(&self, id: TrackId) -> Option<Rc<Receiver>> {
        self.0.borrow().receivers.get(&id).cloned()
    }

    /// Returns all [`Sender`]s.
    #[must_use]
    pub fn get_senders(&self) -> Vec<Rc<Sender>> {
        self.0.borrow().senders.values().cloned().collect()
    }

    /// Builds a [`TracksRequest`] of the [`Sender`]s matching the provided
    /// [`LocalStreamUpdateCriteria`].
    ///
    /// Disabled [`Sender`]s are skipped. `None` if nothing is requested.
    #[must_use]
    pub fn get_tracks_request(
        &self,
        kinds: LocalStreamUpdateCriteria,
    ) -> Option<TracksRequest> {
        let mut request = None;
        for sender in self.0.borrow().senders.values() {
            if kinds.has(sender.kind(), sender.source_kind())
                && !sender.media_exchange_state_controller().disabled()
            {
                request
                    .get_or_insert_with(TracksRequest::default)
                    .add_track_request(sender.track_id(), sender.caps().clone());
            }
        }
        request
    }

    /// Inserts the provided [`local::Track`]s into the [`Sender`]s matching
    /// the provided [`LocalStreamUpdateCriteria`] by their [`TrackId`]s.
    ///
    /// Returns the media exchange states the [`Sender`]s end up in: a
    /// [`Sender`] left without any track is disabled.
    ///
    /// # Errors
    ///
    /// With [`MediaConnectionsError::InvalidMediaTracks`] if a required
    /// [`Sender`] gets no track, with
    /// [`MediaConnectionsError::InvalidMediaTrack`] if a track doesn't
    /// satisfy its [`Sender`], or with
    /// [`MediaConnectionsError::CouldNotInsertLocalTrack`] if the host fails
    /// to attach a track.
    pub async fn insert_local_tracks(
        &self,
        tracks: &HashMap<TrackId, Rc<local::Track>>,
        kinds: LocalStreamUpdateCriteria,
    ) -> Result<HashMap<TrackId, media_exchange_state::Stable>> {
        let senders: Vec<_> = self
            .get_senders()
            .into_iter()
            .filter(|s| kinds.has(s.kind(), s.source_kind()))
            .collect();

        // Pairs are built first, so nothing is inserted on a mismatch.
        let mut sender_and_track = Vec::with_capacity(senders.len());
        let mut media_exchange_state_updates = HashMap::new();
        for sender in senders {
            if let Some(track) = tracks.get(&sender.track_id()).cloned() {
                if !sender.caps().satisfies(track.platform_track().as_ref()) {
                    return Err(tracerr::new!(
                        MediaConnectionsError::InvalidMediaTrack
                    ));
                }
                drop(media_exchange_state_updates.insert(
                    sender.track_id(),
                    media_exchange_state::Stable::Enabled,
                ));
                sender_and_track.push((sender, track));
            } else if sender.has_track() {
                continue;
            } else if sender.caps().is_required() {
                return Err(tracerr::new!(
                    MediaConnectionsError::InvalidMediaTracks
                ));
            } else {
                drop(media_exchange_state_updates.insert(
                    sender.track_id(),
                    media_exchange_state::Stable::Disabled,
                ));
            }
        }

        let _ = future::try_join_all(sender_and_track.into_iter().map(
            |(sender, track)| async move {
                sender.insert_track(track).await?;
                sender.maybe_enable();
                Ok::<_, Traced<MediaConnectionsError>>(())
            },
        ))
        .await?;

        Ok(media_exchange_state_updates)
    }

    /// Hands the remote track arrived on the provided [`Transceiver`] to its
    /// [`Receiver`].
    ///
    /// Returns the [`TrackId`] and [`MediaKind`] of the [`Receiver`].
    ///
    /// # Errors
    ///
    /// With [`MediaConnectionsError::CouldNotInsertRemoteTrack`] if no
    /// [`Receiver`] matches the transceiver's `mid`.
    pub fn add_remote_track(
        &self,
        track: Rc<dyn MediaStreamTrack>,
        transceiver: Rc<dyn Transceiver>,
    ) -> Result<(TrackId, MediaKind)> {
        let mid = transceiver.mid();
        let receiver = mid.as_ref().and_then(|mid| {
            self.0
                .borrow()
                .receivers
                .values()
                .find(|r| r.mid().as_ref() == Some(mid))
                .cloned()
        });

        if let Some(receiver) = receiver {
            let table = self.0.borrow().table.upgrade();
            if let Some(table) = table {
                receiver.set_remote_track(transceiver, track, &table);
            }
            Ok((receiver.track_id(), receiver.kind()))
        } else {
            Err(tracerr::new!(
                MediaConnectionsError::CouldNotInsertRemoteTrack(mid)
            ))
        }
    }

    /// Finds [`Transceiver`]s of the [`Receiver`]s which know their `mid`
    /// but have no [`Transceiver`] yet.
    pub fn sync_receivers(&self) {
        let inner = self.0.borrow();
        for receiver in inner
            .receivers
            .values()
            .filter(|r| r.transceiver().is_none())
        {
            if let Some(mid) = receiver.mid() {
                if let Some(transceiver) = inner.get_transceiver_by_mid(&mid) {
                    receiver.replace_transceiver(transceiver);
                }
            }
        }
    }

    /// Applies the provided [`TrackPatchEvent`]s.
    ///
    /// Returns the [`LocalStreamUpdateCriteria`] of the [`Sender`]s which got
    /// enabled and need a local track now.
    pub async fn patch_tracks(
        &self,
        patches: &[TrackPatchEvent],
    ) -> LocalStreamUpdateCriteria {
        let mut criteria = LocalStreamUpdateCriteria::empty();
        for patch in patches {
            if let Some(sender) = self.get_sender_by_id(patch.id) {
                if sender.update(patch).await {
                    criteria.add(sender.kind(), sender.source_kind());
                }
            } else if let Some(receiver) = self.get_receiver_by_id(patch.id) {
                receiver.update(patch);
            } else {
                log::warn!("Patch for unknown track {} skipped", patch.id);
            }
        }
        criteria
    }

    /// Removes the [`Sender`] or [`Receiver`] with the provided [`TrackId`].
    ///
    /// Returns `true` if something was removed.
    pub async fn remove_track(&self, track_id: TrackId) -> bool {
        let sender = self.0.borrow_mut().senders.remove(&track_id);
        if let Some(sender) = sender {
            sender.remove_track().await;
            return true;
        }
        let receiver = self.0.borrow_mut().receivers.remove(&track_id);
        receiver.map_or(false, |r| {
            r.stop();
            true
        })
    }

    fn get_all_transceivers_sides(&self) -> Vec<Rc<dyn TransceiverSide>> {
        let inner = self.0.borrow();
        inner
            .senders
            .values()
            .map(|s| Rc::clone(s) as Rc<dyn TransceiverSide>)
            .chain(
                inner
                    .receivers
                    .values()
                    .map(|r| Rc::clone(r) as Rc<dyn TransceiverSide>),
            )
            .collect()
    }

    /// Stops state transition timers of all [`TransceiverSide`]s.
    pub fn stop_state_transitions_timers(&self) {
        self.get_all_transceivers_sides()
            .into_iter()
            .for_each(|t| t.stop_media_state_transition_timeout());
    }

    /// Resets state transition timers of all [`TransceiverSide`]s.
    pub fn reset_state_transitions_timers(&self) {
        self.get_all_transceivers_sides()
            .into_iter()
            .for_each(|t| t.reset_media_state_transition_timeout());
    }

    /// Returns enabled [`Sender`]s matching the provided
    /// [`LocalStreamUpdateCriteria`] which have no [`local::Track`].
    #[must_use]
    pub fn get_senders_without_tracks(
        &self,
        kinds: LocalStreamUpdateCriteria,
    ) -> Vec<Rc<Sender>> {
        self.0
            .borrow()
            .senders
            .values()
            .filter(|s| {
                kinds.has(s.kind(), s.source_kind())
                    && s.is_local_stream_update_needed()
            })
            .cloned()
            .collect()
    }

    /// Drops [`local::Track`]s of all [`Sender`]s matching the provided
    /// [`LocalStreamUpdateCriteria`].
    pub async fn drop_send_tracks(&self, kinds: LocalStreamUpdateCriteria) {
        let senders: Vec<_> = self
            .get_senders()
            .into_iter()
            .filter(|s| kinds.has(s.kind(), s.source_kind()))
            .collect();
        for sender in senders {
            sender.remove_track().await;
        }
    }

    /// Returns snapshots of all [`Sender`]s.
    #[must_use]
    pub fn senders_state(&self) -> HashMap<TrackId, state::Sender> {
        self.0
            .borrow()
            .senders
            .iter()
            .map(|(id, s)| (*id, s.state()))
            .collect()
    }

    /// Returns snapshots of all [`Receiver`]s.
    #[must_use]
    pub fn receivers_state(&self) -> HashMap<TrackId, state::Receiver> {
        self.0
            .borrow()
            .receivers
            .iter()
            .map(|(id, r)| (*id, r.state()))
            .collect()
    }

    /// Stops every received track.
    pub fn stop_receivers(&self) {
        for receiver in self.0.borrow().receivers.values() {
            receiver.stop();
        }
    }
}

#[cfg(test)]
mod spec {
    use futures::channel::mpsc;
    use medea_jason_proto::{
        AudioSettings, Direction, MediaType, MemberId, VideoSettings,
    };
    use tokio::task::LocalSet;

    use super::*;
    use crate::{
        media::{
            AudioTrackConstraints, DeviceVideoTrackConstraints,
            MediaStreamSettings,
        },
        utils::test::{FakePeerConnection, FakeTrack},
    };

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn send_track(id: u32, media_type: MediaType) -> proto::Track {
        proto::Track {
            id: TrackId(id),
            direction: Direction::Send {
                receivers: vec![MemberId::from("bob")],
                mid: None,
            },
            media_type,
        }
    }

    fn audio(required: bool) -> MediaType {
        MediaType::Audio(AudioSettings { required })
    }

    fn device_video() -> MediaType {
        MediaType::Video(VideoSettings {
            required: false,
            source_kind: MediaSourceKind::Device,
        })
    }

    fn media_connections(table: &Rc<HandleTable>) -> MediaConnections {
        let (tx, _rx) = mpsc::unbounded();
        MediaConnections::new(
            Rc::new(FakePeerConnection::default()),
            tx,
            Rc::downgrade(table),
            TIMEOUT,
        )
    }

    fn constraints() -> LocalTracksConstraints {
        let mut settings = MediaStreamSettings::new();
        settings.audio(AudioTrackConstraints::new());
        settings.device_video(DeviceVideoTrackConstraints::new());
        settings.into()
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn required_sender_must_get_a_track() {
        LocalSet::new()
            .run_until(async {
                let table = HandleTable::new();
                let media = media_connections(&table);
                media
                    .create_tracks(
                        vec![send_track(1, audio(true)), send_track(2, device_video())],
                        &constraints(),
                        &RecvConstraints::default(),
                    )
                    .unwrap();

                let err = media
                    .insert_local_tracks(
                        &HashMap::new(),
                        LocalStreamUpdateCriteria::all(),
                    )
                    .await
                    .unwrap_err();

                assert!(matches!(
                    err.into_inner(),
                    MediaConnectionsError::InvalidMediaTracks
                ));
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn inserts_tracks_and_disables_the_rest() {
        LocalSet::new()
            .run_until(async {
                let table = HandleTable::new();
                let media = media_connections(&table);
                media
                    .create_tracks(
                        vec![send_track(1, audio(false)), send_track(2, device_video())],
                        &constraints(),
                        &RecvConstraints::default(),
                    )
                    .unwrap();
                let track = Rc::new(local::Track::new(
                    FakeTrack::new("mic", MediaKind::Audio, false),
                    MediaSourceKind::Device,
                ));
                let tracks: HashMap<_, _> =
                    vec![(TrackId(1), track)].into_iter().collect();

                let updates = media
                    .insert_local_tracks(&tracks, LocalStreamUpdateCriteria::all())
                    .await
                    .unwrap();

                assert_eq!(
                    updates.get(&TrackId(1)),
                    Some(&media_exchange_state::Stable::Enabled)
                );
                assert_eq!(
                    updates.get(&TrackId(2)),
                    Some(&media_exchange_state::Stable::Disabled)
                );
                assert!(media.get_sender_by_id(TrackId(1)).unwrap().has_track());
                assert_eq!(
                    media
                        .get_senders_without_tracks(
                            LocalStreamUpdateCriteria::all()
                        )
                        .len(),
                    1
                );

                media.drop_send_tracks(LocalStreamUpdateCriteria::all()).await;
                assert!(!media.get_sender_by_id(TrackId(1)).unwrap().has_track());
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn required_sender_rejects_disabling_but_mutes() {
        LocalSet::new()
            .run_until(async {
                let table = HandleTable::new();
                let media = media_connections(&table);
                media
                    .create_tracks(
                        vec![send_track(1, audio(true))],
                        &constraints(),
                        &RecvConstraints::default(),
                    )
                    .unwrap();
                let sender = media.get_sender_by_id(TrackId(1)).unwrap();

                let err = sender
                    .media_state_transition_to(
                        media_exchange_state::Stable::Disabled.into(),
                    )
                    .unwrap_err();
                assert!(matches!(
                    err.into_inner(),
                    MediaConnectionsError::CannotDisableRequiredSender
                ));
                assert!(sender.enabled());

                sender
                    .media_state_transition_to(mute_state::Stable::Muted.into())
                    .unwrap();
                assert!(sender.mute_state_controller().is_transitioning());
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn checks_media_state_of_all_sides() {
        LocalSet::new()
            .run_until(async {
                let table = HandleTable::new();
                let media = media_connections(&table);
                media
                    .create_tracks(
                        vec![send_track(1, audio(false))],
                        &constraints(),
                        &RecvConstraints::default(),
                    )
                    .unwrap();
                let enabled: MediaState =
                    media_exchange_state::Stable::Enabled.into();
                assert!(media.is_all_in_media_state(
                    MediaKind::Audio,
                    TrackDirection::Send,
                    None,
                    enabled,
                ));

                let criteria = media
                    .patch_tracks(&[TrackPatchEvent {
                        id: TrackId(1),
                        enabled_individual: Some(false),
                        enabled_general: Some(false),
                        muted: None,
                    }])
                    .await;

                assert!(criteria.is_empty());
                assert!(media.is_all_in_media_state(
                    MediaKind::Audio,
                    TrackDirection::Send,
                    None,
                    enabled.opposite(),
                ));
                assert_eq!(
                    media.get_transceivers_statuses().get(&TrackId(1)),
                    Some(&false)
                );
            })
            .await;
    }
}
