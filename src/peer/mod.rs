//! Adapters to [`RtcPeerConnection`] and related objects.

mod media;
mod repo;
pub mod stats;
mod stream_update_criteria;
mod tracks_request;

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
    convert::TryFrom as _,
    rc::{Rc, Weak},
    time::Duration,
};

use derive_more::{Display, From};
use futures::channel::mpsc;
use medea_jason_proto::{
    self as proto, state, stats::RtcStat, Command, Direction, IceCandidate,
    IceConnectionState, IceServer, MemberId, NegotiationRole,
    PeerConnectionState, PeerId, TrackId, TrackPatchCommand,
    TrackPatchEvent,
};
use medea_macro::dispatchable;
use tracerr::Traced;

use crate::{
    media::{
        track::{local, remote},
        InitLocalTracksError, LocalTracksConstraints, MediaKind, MediaManager,
        MediaStreamSettings, RecvConstraints, TrackDirection,
    },
    platform::{
        self, MediaStreamTrack, RtcPeerConnection, SdpType, Transceiver,
    },
    utils::HandleTable,
};

use self::{
    stats::{BitrateSampler, StatsScheduler},
    tracks_request::SimpleTracksRequest,
};

#[doc(inline)]
pub use self::{
    media::{
        media_exchange_state, mute_state, ConflictingTransition,
        MediaConnections, MediaConnectionsError, MediaExchangeState,
        MediaExchangeStateController, MediaState, MediaStateControllable,
        MuteState, MuteStateController, OppositeState, Receiver, Sender,
        TransceiverSide, TransitableState, TransitableStateController,
    },
    repo::PeerRepository,
    stream_update_criteria::LocalStreamUpdateCriteria,
    tracks_request::{TracksRequest, TracksRequestError},
};

/// Errors that may occur in a [`PeerConnection`].
#[derive(Clone, Debug, Display, From)]
pub enum PeerError {
    /// Error of the [`MediaConnections`].
    #[display(fmt = "{}", _0)]
    MediaConnections(MediaConnectionsError),

    /// Local tracks could not be acquired.
    #[display(fmt = "{}", _0)]
    MediaManager(InitLocalTracksError),

    /// Error of the underlying [`RtcPeerConnection`].
    #[display(fmt = "{}", _0)]
    RtcPeerConnection(platform::Error),

    /// Acquired local tracks don't match the senders.
    #[display(fmt = "Invalid local tracks: {}", _0)]
    TracksRequest(TracksRequestError),
}

type Result<T> = std::result::Result<T, Traced<PeerError>>;

/// Events emitted from a [`PeerConnection`].
#[dispatchable(self: &Self, async_trait(?Send))]
#[derive(Clone, Debug)]
pub enum PeerEvent {
    /// [`RtcPeerConnection`] discovered a new ICE candidate.
    IceCandidateDiscovered {
        /// ID of the [`PeerConnection`] that discovered the candidate.
        peer_id: PeerId,

        /// Discovered candidate.
        candidate: IceCandidate,
    },

    /// [`RtcPeerConnection`]'s ICE connection state changed.
    IceConnectionStateChanged {
        /// ID of the [`PeerConnection`].
        peer_id: PeerId,

        /// New ICE connection state.
        ice_connection_state: IceConnectionState,
    },

    /// [`RtcPeerConnection`]'s connection state changed.
    ConnectionStateChanged {
        /// ID of the [`PeerConnection`].
        peer_id: PeerId,

        /// New connection state.
        peer_connection_state: PeerConnectionState,
    },

    /// A track from a remote member arrived.
    NewRemoteTrack {
        /// ID of the member who sends the track.
        sender_id: MemberId,

        /// Received track.
        track: Rc<remote::Track>,
    },

    /// A new [`local::Track`] was acquired.
    NewLocalTrack {
        /// Acquired track.
        local_track: Rc<local::Track>,
    },

    /// The [`PeerConnection`] asks the server to change its media.
    MediaUpdateCommand {
        /// [`Command`] to send.
        command: Command,
    },

    /// Local media could not be acquired or inserted.
    FailedLocalMedia {
        /// Cause of the failure.
        error: Traced<PeerError>,
    },

    /// New stats of the [`RtcPeerConnection`] were scraped.
    StatsUpdate {
        /// ID of the [`PeerConnection`].
        peer_id: PeerId,

        /// Scraped stats.
        stats: Vec<RtcStat>,

        /// Bitrates of inbound video streams in bits per second, keyed by the
        /// stat ID.
        bitrates: HashMap<String, u64>,
    },
}

/// Aggregates the states of several [`PeerConnection`]s into one.
///
/// The worst state wins in this order: `Closed`, `Failed`, `Disconnected`,
/// `Connected`, `Connecting`, `New`. `None` if there are no states.
pub fn aggregate_state<I>(states: I) -> Option<PeerConnectionState>
where
    I: IntoIterator<Item = PeerConnectionState>,
{
    fn precedence(state: PeerConnectionState) -> u8 {
        use PeerConnectionState as S;

        match state {
            S::New => 0,
            S::Connecting => 1,
            S::Connected => 2,
            S::Disconnected => 3,
            S::Failed => 4,
            S::Closed => 5,
        }
    }

    states.into_iter().max_by_key(|s| precedence(*s))
}

/// Wrapper around a platform [`RtcPeerConnection`] with its senders and
/// receivers.
pub struct PeerConnection {
    id: PeerId,

    /// Underlying [`RtcPeerConnection`].
    peer: Rc<dyn RtcPeerConnection>,

    /// [`Sender`]s and [`Receiver`]s of this [`PeerConnection`].
    media_connections: MediaConnections,

    /// [`MediaManager`] used to acquire [`local::Track`]s.
    media_manager: MediaManager,

    peer_events_sender: mpsc::UnboundedSender<PeerEvent>,

    /// Settings of the local media the [`Sender`]s are created with.
    send_constraints: LocalTracksConstraints,

    /// Settings of the remote media the [`Receiver`]s are created with.
    recv_constraints: Rc<RecvConstraints>,

    ice_servers: Vec<IceServer>,
    force_relay: bool,

    /// Remote ICE candidates received before the remote description was set.
    ice_candidates_buffer: RefCell<Vec<IceCandidate>>,

    /// All remote ICE candidates ever received.
    remote_ice_candidates: RefCell<HashSet<IceCandidate>>,

    has_remote_description: Cell<bool>,
    negotiation_role: RefCell<Option<NegotiationRole>>,
    local_sdp: RefCell<Option<String>>,
    remote_sdp: RefCell<Option<String>>,

    /// Whether ICE restart is requested but not negotiated yet.
    restart_ice_pending: Cell<bool>,

    /// Whether ICE is restarted on `Failed` state and network changes.
    ice_restart_on_failure: bool,

    ice_connection_state: Cell<IceConnectionState>,
    connection_state: Cell<Option<PeerConnectionState>>,

    bitrate_sampler: RefCell<BitrateSampler>,
    stats_scheduler: Rc<StatsScheduler>,
}

/// Dependencies shared by all [`PeerConnection`]s of a room.
#[derive(Clone)]
pub struct PeerContext {
    /// [`MediaManager`] used to acquire [`local::Track`]s.
    pub media_manager: MediaManager,

    /// Where [`PeerEvent`]s are sent to.
    pub peer_events_sender: mpsc::UnboundedSender<PeerEvent>,

    /// Settings of the local media.
    pub send_constraints: LocalTracksConstraints,

    /// Settings of the remote media.
    pub recv_constraints: Rc<RecvConstraints>,

    /// Scraper of inbound video stats.
    pub stats_scheduler: Rc<StatsScheduler>,

    /// [`HandleTable`] remote tracks are registered in.
    pub table: Weak<HandleTable>,

    /// Timeout of media state transitions.
    pub transition_timeout: Duration,

    /// Whether ICE is restarted on failures.
    pub ice_restart_on_failure: bool,
}

impl PeerConnection {
    /// Creates a new [`PeerConnection`] over the provided
    /// [`RtcPeerConnection`] and subscribes to its events.
    pub fn new(
        id: PeerId,
        peer: Rc<dyn RtcPeerConnection>,
        ice_servers: Vec<IceServer>,
        force_relay: bool,
        ctx: PeerContext,
    ) -> Rc<Self> {
        let media_connections = MediaConnections::new(
            Rc::clone(&peer),
            ctx.peer_events_sender.clone(),
            ctx.table,
            ctx.transition_timeout,
        );
        let this = Rc::new(Self {
            id,
            ice_connection_state: Cell::new(peer.ice_connection_state()),
            connection_state: Cell::new(peer.connection_state()),
            peer,
            media_connections,
            media_manager: ctx.media_manager,
            peer_events_sender: ctx.peer_events_sender,
            send_constraints: ctx.send_constraints,
            recv_constraints: ctx.recv_constraints,
            ice_servers,
            force_relay,
            ice_candidates_buffer: RefCell::new(Vec::new()),
            remote_ice_candidates: RefCell::default(),
            has_remote_description: Cell::new(false),
            negotiation_role: RefCell::new(None),
            local_sdp: RefCell::new(None),
            remote_sdp: RefCell::new(None),
            restart_ice_pending: Cell::new(false),
            ice_restart_on_failure: ctx.ice_restart_on_failure,
            bitrate_sampler: RefCell::default(),
            stats_scheduler: ctx.stats_scheduler,
        });
        this.bind_events();
        this
    }

    fn bind_events(self: &Rc<Self>) {
        let weak_this = Rc::downgrade(self);
        self.peer.on_ice_candidate(Some(Box::new(move |candidate| {
            if let Some(this) = weak_this.upgrade() {
                this.send_event(PeerEvent::IceCandidateDiscovered {
                    peer_id: this.id,
                    candidate,
                });
            }
        })));

        let weak_this = Rc::downgrade(self);
        self.peer
            .on_ice_connection_state_change(Some(Box::new(move |state| {
                if let Some(this) = weak_this.upgrade() {
                    this.on_ice_connection_state_changed(state);
                }
            })));

        let weak_this = Rc::downgrade(self);
        self.peer.on_connection_state_change(Some(Box::new(move |state| {
            if let Some(this) = weak_this.upgrade() {
                this.connection_state.set(Some(state));
                this.send_event(PeerEvent::ConnectionStateChanged {
                    peer_id: this.id,
                    peer_connection_state: state,
                });
            }
        })));

        let weak_this = Rc::downgrade(self);
        self.peer
            .on_track(Some(Box::new(move |track, transceiver| {
                if let Some(this) = weak_this.upgrade() {
                    this.on_track(track, transceiver);
                }
            })));
    }

    fn send_event(&self, event: PeerEvent) {
        if self.peer_events_sender.unbounded_send(event).is_err() {
            log::debug!("PeerEvent receiver of Peer {} is dropped", self.id);
        }
    }

    fn on_ice_connection_state_changed(&self, state: IceConnectionState) {
        self.ice_connection_state.set(state);
        self.send_event(PeerEvent::IceConnectionStateChanged {
            peer_id: self.id,
            ice_connection_state: state,
        });
        if state == IceConnectionState::Failed {
            self.handle_ice_failure();
        }
    }

    /// Hands the arrived remote track to its [`Receiver`] and starts
    /// sampling its stats if it's a video.
    fn on_track(
        self: &Rc<Self>,
        track: Rc<dyn MediaStreamTrack>,
        transceiver: Rc<dyn Transceiver>,
    ) {
        match self.media_connections.add_remote_track(track, transceiver) {
            Ok((track_id, MediaKind::Video)) => {
                self.stats_scheduler.register(self, track_id);
            }
            Ok(_) => (),
            Err(e) => {
                log::error!("Peer {} is out of sync: {}", self.id, e);
            }
        }
    }

    /// Returns ID of this [`PeerConnection`].
    #[inline]
    #[must_use]
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Returns the last known ICE connection state.
    #[inline]
    #[must_use]
    pub fn ice_connection_state(&self) -> IceConnectionState {
        self.ice_connection_state.get()
    }

    /// Returns the connection state, derived from the ICE connection state
    /// if the platform doesn't report one.
    #[must_use]
    pub fn connection_state(&self) -> PeerConnectionState {
        self.connection_state
            .get()
            .unwrap_or_else(|| self.ice_connection_state.get().into())
    }

    /// Creates [`Sender`]s and [`Receiver`]s of the provided
    /// [`proto::Track`]s.
    ///
    /// # Errors
    ///
    /// With [`PeerError::MediaConnections`] if a [`Sender`] can't be created.
    pub fn create_tracks(&self, tracks: Vec<proto::Track>) -> Result<()> {
        self.media_connections
            .create_tracks(
                tracks,
                &self.send_constraints,
                &self.recv_constraints,
            )
            .map_err(tracerr::map_from_and_wrap!())
    }

    /// Creates tracks of the provided [`proto::Track`]s, acquires local media
    /// for them and returns a new SDP offer set as the local description.
    ///
    /// A failure to acquire local media is reported via
    /// [`PeerEvent::FailedLocalMedia`] and doesn't fail the offer.
    ///
    /// # Errors
    ///
    /// If tracks can't be created or the [`RtcPeerConnection`] fails.
    pub async fn get_offer(&self, tracks: Vec<proto::Track>) -> Result<String> {
        let criteria = LocalStreamUpdateCriteria::from_tracks(&tracks);
        self.create_tracks(tracks)?;
        self.update_local_stream_or_notify(criteria).await;
        self.create_and_set_offer().await
    }

    /// Creates a new SDP offer and sets it as the local description.
    ///
    /// # Errors
    ///
    /// With [`PeerError::RtcPeerConnection`] if the [`RtcPeerConnection`]
    /// fails.
    pub async fn create_and_set_offer(&self) -> Result<String> {
        drop(self.negotiation_role.replace(Some(NegotiationRole::Offerer)));
        let offer = self
            .peer
            .create_offer()
            .await
            .map_err(tracerr::from_and_wrap!())?;
        self.peer
            .set_local_description(SdpType::Offer(offer.clone()))
            .await
            .map_err(tracerr::from_and_wrap!())?;
        drop(self.local_sdp.replace(Some(offer.clone())));
        self.restart_ice_pending.set(false);

        Ok(offer)
    }

    /// Applies the provided remote SDP offer and returns an SDP answer set as
    /// the local description.
    ///
    /// [`Receiver`]s are created before the offer is applied, so its remote
    /// tracks find them, and [`Sender`]s after.
    ///
    /// # Errors
    ///
    /// If tracks can't be created or the [`RtcPeerConnection`] fails.
    pub async fn process_offer(
        &self,
        offer: String,
        tracks: Vec<proto::Track>,
    ) -> Result<String> {
        let (recv, send): (Vec<_>, Vec<_>) = tracks
            .into_iter()
            .partition(|t| matches!(t.direction, Direction::Recv { .. }));
        let criteria = LocalStreamUpdateCriteria::from_tracks(&send);

        drop(
            self.negotiation_role
                .replace(Some(NegotiationRole::Answerer(offer.clone()))),
        );
        self.create_tracks(recv)?;
        self.set_remote_description(SdpType::Offer(offer)).await?;
        self.create_tracks(send)?;
        self.update_local_stream_or_notify(criteria).await;

        let answer = self
            .peer
            .create_answer()
            .await
            .map_err(tracerr::from_and_wrap!())?;
        self.peer
            .set_local_description(SdpType::Answer(answer.clone()))
            .await
            .map_err(tracerr::from_and_wrap!())?;
        drop(self.local_sdp.replace(Some(answer.clone())));
        drop(self.negotiation_role.take());
        self.restart_ice_pending.set(false);

        Ok(answer)
    }

    /// Applies the provided remote SDP answer.
    ///
    /// # Errors
    ///
    /// With [`PeerError::RtcPeerConnection`] if the [`RtcPeerConnection`]
    /// rejects the answer.
    pub async fn set_remote_answer(&self, answer: String) -> Result<()> {
        self.set_remote_description(SdpType::Answer(answer)).await?;
        drop(self.negotiation_role.take());
        Ok(())
    }

    /// Handles the server's confirmation of the provided local SDP offer.
    pub fn local_description_applied(&self, sdp_offer: &str) {
        if self.local_sdp.borrow().as_deref() != Some(sdp_offer) {
            log::warn!(
                "Peer {} got confirmation of an outdated SDP offer",
                self.id,
            );
        }
    }

    async fn set_remote_description(&self, sdp: SdpType) -> Result<()> {
        let sdp_string = match &sdp {
            SdpType::Offer(sdp) | SdpType::Answer(sdp) => sdp.clone(),
        };
        self.peer
            .set_remote_description(sdp)
            .await
            .map_err(tracerr::from_and_wrap!())?;
        drop(self.remote_sdp.replace(Some(sdp_string)));
        self.has_remote_description.set(true);
        self.media_connections.sync_receivers();

        let buffered: Vec<_> =
            self.ice_candidates_buffer.borrow_mut().drain(..).collect();
        for candidate in buffered {
            self.peer
                .add_ice_candidate(candidate)
                .await
                .map_err(tracerr::from_and_wrap!())?;
        }
        Ok(())
    }

    /// Adds the provided remote ICE candidate.
    ///
    /// Candidates arrived before the remote description are buffered and
    /// added once it's set.
    ///
    /// # Errors
    ///
    /// With [`PeerError::RtcPeerConnection`] if the [`RtcPeerConnection`]
    /// rejects the candidate.
    pub async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let _ = self
            .remote_ice_candidates
            .borrow_mut()
            .insert(candidate.clone());
        if self.has_remote_description.get() {
            self.peer
                .add_ice_candidate(candidate)
                .await
                .map_err(tracerr::from_and_wrap!())?;
        } else {
            self.ice_candidates_buffer.borrow_mut().push(candidate);
        }
        Ok(())
    }

    /// Number of remote ICE candidates waiting for the remote description.
    #[inline]
    #[must_use]
    pub fn buffered_ice_candidates_count(&self) -> usize {
        self.ice_candidates_buffer.borrow().len()
    }

    /// Marks ICE to be restarted by the next SDP offer.
    pub fn restart_ice(&self) {
        self.peer.restart_ice();
        self.restart_ice_pending.set(true);
    }

    /// Restarts ICE after a connection failure or a network change, unless
    /// disabled by the settings.
    pub fn handle_ice_failure(&self) {
        if self.ice_restart_on_failure {
            log::warn!("Restarting ICE of Peer {}", self.id);
            self.restart_ice();
        }
    }

    /// Acquires [`local::Track`]s for the [`Sender`]s matching the provided
    /// [`LocalStreamUpdateCriteria`] and inserts them.
    ///
    /// Returns the media exchange states the [`Sender`]s end up in.
    ///
    /// # Errors
    ///
    /// With [`PeerError::TracksRequest`] if the request is inconsistent or
    /// the tracks don't match it, with [`PeerError::MediaManager`] if the
    /// media can't be acquired, or with [`PeerError::MediaConnections`] if
    /// the tracks can't be inserted.
    pub async fn update_local_stream(
        &self,
        criteria: LocalStreamUpdateCriteria,
    ) -> Result<HashMap<TrackId, media_exchange_state::Stable>> {
        let request =
            match self.media_connections.get_tracks_request(criteria) {
                Some(request) => request,
                None => return Ok(HashMap::new()),
            };
        let mut request = SimpleTracksRequest::try_from(request)
            .map_err(tracerr::from_and_wrap!())?;
        request
            .merge(self.send_constraints.inner())
            .map_err(tracerr::map_from_and_wrap!())?;

        let tracks = if request.is_empty() {
            Vec::new()
        } else {
            self.media_manager
                .get_tracks(&request)
                .await
                .map_err(tracerr::map_from_and_wrap!())?
        };
        for (track, is_new) in &tracks {
            if *is_new {
                self.send_event(PeerEvent::NewLocalTrack {
                    local_track: Rc::clone(track),
                });
            }
        }

        let parsed = request
            .parse_tracks(tracks.into_iter().map(|(t, _)| t).collect())
            .map_err(tracerr::map_from_and_wrap!())?;
        self.media_connections
            .insert_local_tracks(&parsed, criteria)
            .await
            .map_err(tracerr::map_from_and_wrap!())
    }

    /// Runs [`PeerConnection::update_local_stream`] on negotiation.
    ///
    /// A failure is reported via [`PeerEvent::FailedLocalMedia`]. Enabled
    /// [`Sender`]s left without tracks are asked to be disabled via
    /// [`PeerEvent::MediaUpdateCommand`].
    pub async fn update_local_stream_or_notify(
        &self,
        criteria: LocalStreamUpdateCriteria,
    ) {
        if criteria.is_empty() {
            return;
        }
        match self.update_local_stream(criteria).await {
            Ok(updates) => {
                let tracks_patches: Vec<_> = updates
                    .into_iter()
                    .filter(|(_, state)| {
                        *state == media_exchange_state::Stable::Disabled
                    })
                    .filter_map(|(id, _)| {
                        self.media_connections.get_sender_by_id(id)
                    })
                    .filter(|s| s.enabled() && !s.caps().is_required())
                    .filter_map(|s| {
                        s.media_state_transition_to(
                            media_exchange_state::Stable::Disabled.into(),
                        )
                        .map_err(|e| log::warn!("{}", e))
                        .ok()
                        .map(|_| TrackPatchCommand {
                            id: s.track_id(),
                            enabled: Some(false),
                            muted: None,
                        })
                    })
                    .collect();
                if !tracks_patches.is_empty() {
                    self.send_event(PeerEvent::MediaUpdateCommand {
                        command: Command::UpdateTracks {
                            peer_id: self.id,
                            tracks_patches,
                        },
                    });
                }
            }
            Err(error) => {
                log::warn!(
                    "Peer {} failed to update local media: {}",
                    self.id,
                    error,
                );
                self.send_event(PeerEvent::FailedLocalMedia { error });
            }
        }
    }

    /// Applies the provided [`TrackPatchEvent`]s.
    ///
    /// Returns the [`LocalStreamUpdateCriteria`] of the [`Sender`]s needing a
    /// local track now.
    #[inline]
    pub async fn patch_tracks(
        &self,
        patches: &[TrackPatchEvent],
    ) -> LocalStreamUpdateCriteria {
        self.media_connections.patch_tracks(patches).await
    }

    /// Removes the [`Sender`] or [`Receiver`] with the provided [`TrackId`].
    pub async fn remove_track(&self, track_id: TrackId) {
        if self.media_connections.remove_track(track_id).await {
            self.stats_scheduler.unregister(self.id, track_id);
        }
    }

    /// Returns the [`Sender`]s or [`Receiver`]s with the provided
    /// [`MediaKind`], [`TrackDirection`] and [`MediaSourceKind`].
    ///
    /// [`MediaSourceKind`]: proto::MediaSourceKind
    #[inline]
    #[must_use]
    pub fn get_transceivers_sides(
        &self,
        kind: MediaKind,
        direction: TrackDirection,
        source_kind: Option<proto::MediaSourceKind>,
    ) -> Vec<Rc<dyn TransceiverSide>> {
        self.media_connections
            .get_transceivers_sides(kind, direction, source_kind)
    }

    /// Indicates whether all the transitable [`TransceiverSide`]s of the
    /// provided media are in the provided [`MediaState`].
    #[inline]
    #[must_use]
    pub fn is_all_in_media_state(
        &self,
        kind: MediaKind,
        direction: TrackDirection,
        source_kind: Option<proto::MediaSourceKind>,
        state: MediaState,
    ) -> bool {
        self.media_connections
            .is_all_in_media_state(kind, direction, source_kind, state)
    }

    /// Returns the [`Sender`] with the provided [`TrackId`].
    #[inline]
    #[must_use]
    pub fn get_sender_by_id(&self, id: TrackId) -> Option<Rc<Sender>> {
        self.media_connections.get_sender_by_id(id)
    }

    /// Returns the [`TransceiverSide`] with the provided [`TrackId`].
    #[inline]
    #[must_use]
    pub fn get_transceiver_side_by_id(
        &self,
        id: TrackId,
    ) -> Option<Rc<dyn TransceiverSide>> {
        self.media_connections.get_transceiver_side_by_id(id)
    }

    /// Returns the [`Receiver`] with the provided [`TrackId`].
    #[inline]
    #[must_use]
    pub fn get_receiver_by_id(&self, id: TrackId) -> Option<Rc<Receiver>> {
        self.media_connections.get_receiver_by_id(id)
    }

    /// Returns enabled [`Sender`]s of the provided media without tracks.
    #[inline]
    #[must_use]
    pub fn get_senders_without_tracks(
        &self,
        kinds: LocalStreamUpdateCriteria,
    ) -> Vec<Rc<Sender>> {
        self.media_connections.get_senders_without_tracks(kinds)
    }

    /// Returns [`MediaStreamSettings`] to acquire local media for all the
    /// [`Sender`]s of the provided media with, regardless of their current
    /// [`MediaExchangeState`].
    ///
    /// `None` if this [`PeerConnection`] sends nothing of the media or the
    /// room settings don't request it.
    ///
    /// # Errors
    ///
    /// With [`PeerError::TracksRequest`] if the [`Sender`]s can't be served
    /// by a single request or a required media is not requested.
    pub fn get_media_settings(
        &self,
        kind: MediaKind,
        source_kind: Option<proto::MediaSourceKind>,
    ) -> Result<Option<MediaStreamSettings>> {
        let mut request = TracksRequest::default();
        let mut is_empty = true;
        for sender in self.media_connections.get_senders() {
            let source_matches =
                source_kind.map_or(true, |s| s == sender.source_kind());
            if sender.kind() == kind && source_matches {
                request.add_track_request(
                    sender.track_id(),
                    sender.caps().clone(),
                );
                is_empty = false;
            }
        }
        if is_empty {
            return Ok(None);
        }

        let mut request = SimpleTracksRequest::try_from(request)
            .map_err(tracerr::from_and_wrap!())?;
        request
            .merge(self.send_constraints.inner())
            .map_err(tracerr::map_from_and_wrap!())?;

        Ok(if request.is_empty() {
            None
        } else {
            Some(MediaStreamSettings::from(&request))
        })
    }

    /// Drops [`local::Track`]s of the [`Sender`]s of the provided media.
    #[inline]
    pub async fn drop_send_tracks(&self, kinds: LocalStreamUpdateCriteria) {
        self.media_connections.drop_send_tracks(kinds).await;
    }

    /// Returns mapping of [`TrackId`]s to `mid`s of their transceivers.
    ///
    /// # Errors
    ///
    /// If some transceiver is not negotiated yet.
    pub fn get_mids(&self) -> Result<HashMap<TrackId, String>> {
        self.media_connections
            .get_mids()
            .map_err(tracerr::map_from_and_wrap!())
    }

    /// Returns activity statuses of all the transceivers.
    #[inline]
    #[must_use]
    pub fn get_transceivers_statuses(&self) -> HashMap<TrackId, bool> {
        self.media_connections.get_transceivers_statuses()
    }

    /// Stops state transition timers of all [`TransceiverSide`]s.
    #[inline]
    pub fn stop_state_transitions_timers(&self) {
        self.media_connections.stop_state_transitions_timers();
    }

    /// Resets state transition timers of all [`TransceiverSide`]s.
    #[inline]
    pub fn reset_state_transitions_timers(&self) {
        self.media_connections.reset_state_transitions_timers();
    }

    /// Scrapes stats of the [`RtcPeerConnection`] and sends them with the
    /// inbound video bitrates via [`PeerEvent::StatsUpdate`].
    pub async fn scrape_and_send_stats(&self) {
        match self.peer.get_stats().await {
            Ok(stats) => {
                let bitrates =
                    self.bitrate_sampler.borrow_mut().sample_inbound_video(&stats);
                self.send_event(PeerEvent::StatsUpdate {
                    peer_id: self.id,
                    stats,
                    bitrates,
                });
            }
            Err(e) => {
                log::warn!("Failed to get stats of Peer {}: {}", self.id, e);
            }
        }
    }

    /// Returns a snapshot of this [`PeerConnection`].
    #[must_use]
    pub fn state(&self) -> state::Peer {
        state::Peer {
            id: self.id,
            senders: self.media_connections.senders_state(),
            receivers: self.media_connections.receivers_state(),
            force_relay: self.force_relay,
            ice_servers: self.ice_servers.clone(),
            negotiation_role: self.negotiation_role.borrow().clone(),
            local_sdp: self.local_sdp.borrow().clone(),
            remote_sdp: self.remote_sdp.borrow().clone(),
            restart_ice: self.restart_ice_pending.get(),
            ice_candidates: self.remote_ice_candidates.borrow().clone(),
        }
    }

    /// Applies the authoritative snapshot of this [`PeerConnection`] sent by
    /// the server.
    ///
    /// Unknown tracks are created, vanished tracks are removed and the rest
    /// are patched. Returns the [`LocalStreamUpdateCriteria`] of the
    /// [`Sender`]s needing a local track now.
    ///
    /// # Errors
    ///
    /// If new tracks can't be created or a missed ICE candidate is rejected.
    pub async fn apply_state(
        &self,
        state: state::Peer,
    ) -> Result<LocalStreamUpdateCriteria> {
        let known_senders = self.media_connections.senders_state();
        let known_receivers = self.media_connections.receivers_state();

        for id in known_senders.keys().chain(known_receivers.keys()) {
            if !state.senders.contains_key(id)
                && !state.receivers.contains_key(id)
            {
                self.remove_track(*id).await;
            }
        }

        let mut new_tracks = Vec::new();
        let mut patches = Vec::new();
        for (id, sender) in state.senders {
            if known_senders.contains_key(&id) {
                patches.push(TrackPatchEvent {
                    id,
                    enabled_individual: Some(sender.enabled_individual),
                    enabled_general: Some(sender.enabled_general),
                    muted: Some(sender.muted),
                });
            } else {
                new_tracks.push(proto::Track {
                    id,
                    direction: Direction::Send {
                        receivers: sender.receivers,
                        mid: sender.mid,
                    },
                    media_type: sender.media_type,
                });
            }
        }
        for (id, receiver) in state.receivers {
            if known_receivers.contains_key(&id) {
                patches.push(TrackPatchEvent {
                    id,
                    enabled_individual: Some(receiver.enabled_individual),
                    enabled_general: Some(receiver.enabled_general),
                    muted: Some(receiver.muted),
                });
            } else {
                new_tracks.push(proto::Track {
                    id,
                    direction: Direction::Recv {
                        sender: receiver.sender_id,
                        mid: receiver.mid,
                    },
                    media_type: receiver.media_type,
                });
            }
        }

        let mut criteria = LocalStreamUpdateCriteria::from_tracks(&new_tracks);
        self.create_tracks(new_tracks)?;
        let patched = self.patch_tracks(&patches).await;
        for sender in self.get_senders_without_tracks(patched) {
            criteria.add(sender.kind(), sender.source_kind());
        }

        let missed: Vec<_> = state
            .ice_candidates
            .into_iter()
            .filter(|c| !self.remote_ice_candidates.borrow().contains(c))
            .collect();
        for candidate in missed {
            self.add_ice_candidate(candidate).await?;
        }
        if state.restart_ice && !self.restart_ice_pending.get() {
            self.restart_ice();
        }

        Ok(criteria)
    }
}

impl Drop for PeerConnection {
    /// Drops event callbacks of the [`RtcPeerConnection`] and closes it.
    fn drop(&mut self) {
        self.peer.on_ice_candidate(None);
        self.peer.on_ice_connection_state_change(None);
        self.peer.on_connection_state_change(None);
        self.peer.on_track(None);
        self.peer.close();
        self.media_connections.stop_receivers();
        self.stats_scheduler.unregister_peer(self.id);
    }
}
