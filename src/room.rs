//! Room coordinator: the host side of a single signaling session.

use std::{
    cell::RefCell,
    collections::HashMap,
    rc::{Rc, Weak},
};

use async_recursion::async_recursion;
use async_trait::async_trait;
use derive_more::{Display, From};
use futures::{channel::mpsc, future, FutureExt as _, StreamExt as _};
use medea_jason_proto::{
    state, stats::RtcStat, CloseReason as CloseByServerReason, Command,
    ConnectionQualityScore, Direction, Event as RpcEvent, EventHandler,
    IceCandidate, IceConnectionState, IceServer, MemberId, NegotiationRole,
    PeerConnectionState, PeerId, PeerMetrics, PeerUpdate, Track, TrackId,
};
use tracerr::Traced;

use crate::{
    api,
    conf::{self, Conf},
    connection::{ConnectionHandle, Connections, RecvMediaStateChanger},
    media::{
        track::{
            local::{self, LocalMediaTrack},
            remote,
        },
        AudioTrackConstraints, DeviceVideoTrackConstraints,
        InitLocalTracksError, LocalTracksConstraints, MediaKind, MediaManager,
        MediaSourceKind, MediaStreamSettings, RecvConstraints, TrackDirection,
    },
    peer::{
        media_exchange_state, mute_state, stats::StatsScheduler,
        ConflictingTransition, LocalStreamUpdateCriteria, MediaConnectionsError,
        MediaState, MediaStateControllable as _, OppositeState, PeerConnection,
        PeerContext, PeerError, PeerEvent, PeerEventHandler, PeerRepository,
        TracksRequestError, TransceiverSide,
    },
    platform::{self, PeerConnectionFactory},
    rpc::{
        ClientDisconnect, CloseReason, ConnectionInfo,
        ConnectionInfoParseError, ReconnectHandle, RpcSession, SessionError,
    },
    utils::{Handle, HandleDetachedError, HandleSlot, HandleTable},
};

/// Closed set of reasons a room can be closed with.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum RoomCloseKind {
    /// Unexpected client side failure.
    InternalClientError,

    /// Unexpected server side failure.
    InternalServerError,

    /// Room was closed normally.
    Finished,

    /// Server closed the connection because of inactivity.
    Idle,

    /// Server rejected the connection.
    Rejected,

    /// Member was evicted from the room or replaced by a newer connection.
    Evicted,
}

/// Reason of why a [`Room`] has been closed.
///
/// Passed into the [`RoomHandle::on_close`] callback.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RoomCloseReason {
    kind: RoomCloseKind,
    is_closed_by_server: bool,
    is_err: bool,
}

impl RoomCloseReason {
    /// Creates a new [`RoomCloseReason`] out of the provided [`CloseReason`].
    #[must_use]
    pub fn new(reason: CloseReason) -> Self {
        use RoomCloseKind as K;

        let (kind, is_closed_by_server) = match reason {
            CloseReason::ByServer(reason) => {
                let kind = match reason {
                    CloseByServerReason::Finished => K::Finished,
                    CloseByServerReason::Idle => K::Idle,
                    CloseByServerReason::Rejected => K::Rejected,
                    CloseByServerReason::InternalError => {
                        K::InternalServerError
                    }
                    CloseByServerReason::Reconnected
                    | CloseByServerReason::Evicted => K::Evicted,
                };
                (kind, true)
            }
            CloseReason::ByClient { reason, .. } => {
                let kind = match reason {
                    ClientDisconnect::RoomClosed => K::Finished,
                    ClientDisconnect::RoomUnexpectedlyDropped
                    | ClientDisconnect::RpcClientUnexpectedlyDropped
                    | ClientDisconnect::RpcTransportUnexpectedlyDropped
                    | ClientDisconnect::SessionUnexpectedlyDropped => {
                        K::InternalClientError
                    }
                };
                (kind, false)
            }
        };

        Self {
            kind,
            is_closed_by_server,
            is_err: !matches!(kind, K::Finished | K::Evicted),
        }
    }

    /// Returns the [`RoomCloseKind`] of this [`RoomCloseReason`].
    #[inline]
    #[must_use]
    pub fn kind(&self) -> RoomCloseKind {
        self.kind
    }

    /// Indicates whether the room was closed by the server.
    #[inline]
    #[must_use]
    pub fn is_closed_by_server(&self) -> bool {
        self.is_closed_by_server
    }

    /// Indicates whether the closing is considered an error.
    #[inline]
    #[must_use]
    pub fn is_err(&self) -> bool {
        self.is_err
    }
}

/// Errors of [`RoomHandle::join`].
#[derive(Clone, Debug, Display, From)]
pub enum RoomJoinError {
    /// [`RoomHandle`] is detached.
    #[display(fmt = "Room is in detached state")]
    #[from(ignore)]
    Detached,

    /// Mandatory callback isn't set.
    #[display(fmt = "`{}` callback isn't set", _0)]
    #[from(ignore)]
    CallbackNotSet(&'static str),

    /// Join token is malformed.
    #[display(fmt = "Failed to parse ConnectionInfo: {}", _0)]
    ConnectionInfoParse(ConnectionInfoParseError),

    /// [`RpcSession`] failed to connect.
    #[display(fmt = "RPC session error: {}", _0)]
    SessionError(SessionError),
}

impl From<HandleDetachedError> for RoomJoinError {
    #[inline]
    fn from(_: HandleDetachedError) -> Self {
        Self::Detached
    }
}

/// Errors of changing media state of senders and receivers.
#[derive(Clone, Debug, Display, From)]
pub enum ChangeMediaStateError {
    /// [`RoomHandle`] is detached.
    #[display(fmt = "Room is in detached state")]
    #[from(ignore)]
    Detached,

    /// Local media couldn't be acquired.
    #[display(fmt = "Failed to get local media: {}", _0)]
    CouldNotGetLocalMedia(InitLocalTracksError),

    /// Acquired local media doesn't match the senders.
    #[display(fmt = "Invalid local tracks: {}", _0)]
    InvalidLocalTracks(TracksRequestError),

    /// Senders or receivers failed.
    #[display(fmt = "{}", _0)]
    #[from(ignore)]
    MediaConnections(MediaConnectionsError),

    /// Peer connection failed.
    #[display(fmt = "{}", _0)]
    RtcPeerConnection(platform::Error),

    /// Requested state is not allowed by the sender settings.
    #[display(fmt = "Required sender can't be disabled")]
    #[from(ignore)]
    ProhibitedState,

    /// Media state transits into the opposite of the requested one.
    #[display(fmt = "{}", _0)]
    TransitionIntoOppositeState(OppositeState),

    /// Another transition is in flight.
    #[display(fmt = "{}", _0)]
    ConflictingTransition(ConflictingTransition),
}

/// Fails with [`ChangeMediaStateError::ConflictingTransition`] if the
/// provided [`TransceiverSide`] is transiting into the opposite of the
/// provided [`MediaState`].
fn check_no_conflicting_transition(
    side: &dyn TransceiverSide,
    state: MediaState,
) -> Result<(), Traced<ChangeMediaStateError>> {
    let conflict = match state {
        MediaState::MediaExchange(desired) => side
            .media_exchange_state()
            .transition_to(desired)
            .err()
            .map(MediaState::from),
        MediaState::Mute(desired) => side
            .mute_state()
            .transition_to(desired)
            .err()
            .map(MediaState::from),
    };
    conflict.map_or(Ok(()), |intended| {
        Err(tracerr::new!(ChangeMediaStateError::ConflictingTransition(
            ConflictingTransition(intended)
        )))
    })
}

impl From<HandleDetachedError> for ChangeMediaStateError {
    #[inline]
    fn from(_: HandleDetachedError) -> Self {
        Self::Detached
    }
}

impl From<MediaConnectionsError> for ChangeMediaStateError {
    fn from(err: MediaConnectionsError) -> Self {
        use MediaConnectionsError as E;

        match err {
            E::CannotDisableRequiredSender => Self::ProhibitedState,
            E::MediaStateTransitsIntoOppositeState(e) => {
                Self::TransitionIntoOppositeState(e)
            }
            E::ConflictingTransition(e) => Self::ConflictingTransition(e),
            _ => Self::MediaConnections(err),
        }
    }
}

impl From<PeerError> for ChangeMediaStateError {
    fn from(err: PeerError) -> Self {
        match err {
            PeerError::MediaConnections(e) => Self::from(e),
            PeerError::MediaManager(e) => Self::CouldNotGetLocalMedia(e),
            PeerError::RtcPeerConnection(e) => Self::RtcPeerConnection(e),
            PeerError::TracksRequest(e) => Self::InvalidLocalTracks(e),
        }
    }
}

/// Errors of [`RoomHandle::set_local_media_settings`].
#[derive(Clone, Debug, Display)]
pub enum ConstraintsUpdateError {
    /// New settings failed and the previous ones were restored.
    #[display(fmt = "RecoveredException")]
    Recovered(Traced<ChangeMediaStateError>),

    /// New settings failed and restoring the previous ones failed too.
    #[display(fmt = "RecoverFailedException")]
    RecoverFailed {
        /// Error the recovery was started because of.
        recover_reason: Traced<ChangeMediaStateError>,

        /// Errors the recovery failed with.
        recover_fail_reasons: Vec<Traced<ChangeMediaStateError>>,
    },

    /// New settings failed and nothing was restored.
    #[display(fmt = "ErroredException")]
    Errored(Traced<ChangeMediaStateError>),
}

impl ConstraintsUpdateError {
    /// Returns a name of this [`ConstraintsUpdateError`].
    #[inline]
    #[must_use]
    pub fn name(&self) -> String {
        self.to_string()
    }

    /// Returns the error a recovery was started because of.
    #[must_use]
    pub fn recover_reason(&self) -> Option<Traced<ChangeMediaStateError>> {
        match &self {
            Self::RecoverFailed { recover_reason, .. }
            | Self::Recovered(recover_reason) => Some(recover_reason.clone()),
            Self::Errored(_) => None,
        }
    }

    /// Returns the errors a recovery failed with.
    #[must_use]
    pub fn recover_fail_reasons(&self) -> Vec<Traced<ChangeMediaStateError>> {
        match &self {
            Self::RecoverFailed {
                recover_fail_reasons,
                ..
            } => recover_fail_reasons.clone(),
            Self::Recovered(_) | Self::Errored(_) => Vec::new(),
        }
    }

    /// Returns the error of an [`ConstraintsUpdateError::Errored`].
    #[must_use]
    pub fn error(&self) -> Option<Traced<ChangeMediaStateError>> {
        match &self {
            Self::Errored(error) => Some(error.clone()),
            Self::Recovered(_) | Self::RecoverFailed { .. } => None,
        }
    }

    /// Indicates whether the previous settings are active again.
    #[inline]
    #[must_use]
    pub fn is_rolled_back(&self) -> bool {
        matches!(self, Self::Recovered(_))
    }

    #[inline]
    fn recovered(recover_reason: Traced<ChangeMediaStateError>) -> Self {
        Self::Recovered(recover_reason)
    }

    #[inline]
    fn errored(err: Traced<ChangeMediaStateError>) -> Self {
        Self::Errored(err)
    }

    /// Converts this error of a failed recovery into a
    /// [`ConstraintsUpdateError::RecoverFailed`] caused by the provided
    /// `reason`.
    fn recovery_failed(self, reason: Traced<ChangeMediaStateError>) -> Self {
        let recover_fail_reasons = match self {
            Self::Recovered(e) | Self::Errored(e) => vec![e],
            Self::RecoverFailed {
                recover_reason,
                mut recover_fail_reasons,
            } => {
                recover_fail_reasons.insert(0, recover_reason);
                recover_fail_reasons
            }
        };
        Self::RecoverFailed {
            recover_reason: reason,
            recover_fail_reasons,
        }
    }
}

/// Host handle to a [`Room`].
///
/// Every method fails with a `StateError` once the [`Room`] is closed or the
/// engine is disposed.
#[derive(Clone, Debug)]
pub struct RoomHandle(Handle<InnerRoom>);

impl RoomHandle {
    /// Connects to the media server and joins the room with the provided
    /// token.
    ///
    /// The token format is
    /// `{{ Host URL }}/{{ Room ID }}/{{ Member ID }}?token={{ Auth Token }}`.
    ///
    /// # Errors
    ///
    /// See [`RoomJoinError`] for details.
    pub async fn join(&self, token: String) -> Result<(), api::Error> {
        self.inner_join(token).await.map_err(api::Error::from)
    }

    async fn inner_join(
        &self,
        token: String,
    ) -> Result<(), Traced<RoomJoinError>> {
        let inner = self
            .0
            .upgrade()
            .map_err(tracerr::map_from_and_wrap!(=> RoomJoinError))?;

        let info: ConnectionInfo =
            token.parse().map_err(tracerr::from_and_wrap!())?;

        if !inner.on_failed_local_media.is_set() {
            return Err(tracerr::new!(RoomJoinError::CallbackNotSet(
                "Room.on_failed_local_media()"
            )));
        }
        if !inner.on_connection_loss.is_set() {
            return Err(tracerr::new!(RoomJoinError::CallbackNotSet(
                "Room.on_connection_loss()"
            )));
        }

        let rpc = Rc::clone(&inner.rpc);
        drop(inner);
        rpc.connect(info)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> RoomJoinError))
    }

    /// Sets callback, invoked when a new [`Connection`] with a remote member
    /// is established.
    ///
    /// # Errors
    ///
    /// With `StateError` if the [`Room`] is gone.
    ///
    /// [`Connection`]: crate::connection::Connection
    pub fn on_new_connection<F>(&self, f: F) -> Result<(), api::Error>
    where
        F: Fn(ConnectionHandle) + 'static,
    {
        self.0.upgrade()?.connections.on_new_connection(f);
        Ok(())
    }

    /// Sets callback, invoked when this [`Room`] is closed.
    ///
    /// # Errors
    ///
    /// With `StateError` if the [`Room`] is gone.
    pub fn on_close<F>(&self, f: F) -> Result<(), api::Error>
    where
        F: Fn(RoomCloseReason) + 'static,
    {
        self.0.upgrade()?.on_close.set_func(f);
        Ok(())
    }

    /// Sets callback, invoked when a new local track is acquired by this
    /// [`Room`].
    ///
    /// # Errors
    ///
    /// With `StateError` if the [`Room`] is gone.
    pub fn on_local_track<F>(&self, f: F) -> Result<(), api::Error>
    where
        F: Fn(LocalMediaTrack) + 'static,
    {
        self.0.upgrade()?.on_local_track.set_func(f);
        Ok(())
    }

    /// Sets callback, invoked on local media acquisition failures.
    ///
    /// # Errors
    ///
    /// With `StateError` if the [`Room`] is gone.
    pub fn on_failed_local_media<F>(&self, f: F) -> Result<(), api::Error>
    where
        F: Fn(api::Error) + 'static,
    {
        self.0.upgrade()?.on_failed_local_media.set_func(f);
        Ok(())
    }

    /// Sets callback, invoked when the connection with the media server is
    /// lost.
    ///
    /// # Errors
    ///
    /// With `StateError` if the [`Room`] is gone.
    pub fn on_connection_loss<F>(&self, f: F) -> Result<(), api::Error>
    where
        F: Fn(ReconnectHandle) + 'static,
    {
        self.0.upgrade()?.on_connection_loss.set_func(f);
        Ok(())
    }

    /// Updates [`MediaStreamSettings`] of this [`Room`], replacing local
    /// tracks of all its senders.
    ///
    /// With `stop_first` the affected local tracks are dropped before the
    /// new ones are requested. With `rollback_on_fail` the previous settings
    /// are restored on a failure, otherwise the affected media is disabled.
    ///
    /// # Errors
    ///
    /// With `MediaSettingsUpdateException` wrapping the
    /// [`ConstraintsUpdateError`], or with `StateError` if the [`Room`] is
    /// gone.
    pub async fn set_local_media_settings(
        &self,
        settings: MediaStreamSettings,
        stop_first: bool,
        rollback_on_fail: bool,
    ) -> Result<(), api::Error> {
        let inner = self.0.upgrade()?;
        inner
            .set_local_media_settings(settings, stop_first, rollback_on_fail)
            .await
            .map_err(api::Error::from)
    }

    async fn change_media_state<S>(
        &self,
        new_state: S,
        kind: MediaKind,
        direction: TrackDirection,
        source_kind: Option<MediaSourceKind>,
    ) -> Result<(), api::Error>
    where
        S: Into<MediaState>,
    {
        let inner = self.0.upgrade()?;
        inner
            .change_media_state(new_state.into(), kind, direction, source_kind)
            .await
            .map_err(api::Error::from)
    }

    /// Mutes outbound audio.
    ///
    /// # Errors
    ///
    /// If the transition is rejected or the [`Room`] is gone.
    pub async fn mute_audio(&self) -> Result<(), api::Error> {
        self.change_media_state(
            mute_state::Stable::Muted,
            MediaKind::Audio,
            TrackDirection::Send,
            None,
        )
        .await
    }

    /// Unmutes outbound audio.
    ///
    /// # Errors
    ///
    /// If the transition is rejected or the [`Room`] is gone.
    pub async fn unmute_audio(&self) -> Result<(), api::Error> {
        self.change_media_state(
            mute_state::Stable::Unmuted,
            MediaKind::Audio,
            TrackDirection::Send,
            None,
        )
        .await
    }

    /// Mutes outbound video of the provided source, or of all sources.
    ///
    /// # Errors
    ///
    /// If the transition is rejected or the [`Room`] is gone.
    pub async fn mute_video(
        &self,
        source_kind: Option<MediaSourceKind>,
    ) -> Result<(), api::Error> {
        self.change_media_state(
            mute_state::Stable::Muted,
            MediaKind::Video,
            TrackDirection::Send,
            source_kind,
        )
        .await
    }

    /// Unmutes outbound video of the provided source, or of all sources.
    ///
    /// # Errors
    ///
    /// If the transition is rejected or the [`Room`] is gone.
    pub async fn unmute_video(
        &self,
        source_kind: Option<MediaSourceKind>,
    ) -> Result<(), api::Error> {
        self.change_media_state(
            mute_state::Stable::Unmuted,
            MediaKind::Video,
            TrackDirection::Send,
            source_kind,
        )
        .await
    }

    /// Disables outbound audio.
    ///
    /// # Errors
    ///
    /// With `MediaStateTransitionException` of `ProhibitedState` kind if the
    /// audio is required, or if the [`Room`] is gone.
    pub async fn disable_audio(&self) -> Result<(), api::Error> {
        self.change_media_state(
            media_exchange_state::Stable::Disabled,
            MediaKind::Audio,
            TrackDirection::Send,
            None,
        )
        .await
    }

    /// Enables outbound audio, acquiring a local track if needed.
    ///
    /// # Errors
    ///
    /// If local media can't be acquired, the transition is rejected or the
    /// [`Room`] is gone.
    pub async fn enable_audio(&self) -> Result<(), api::Error> {
        self.change_media_state(
            media_exchange_state::Stable::Enabled,
            MediaKind::Audio,
            TrackDirection::Send,
            None,
        )
        .await
    }

    /// Disables outbound video of the provided source, or of all sources.
    ///
    /// # Errors
    ///
    /// If the transition is rejected or the [`Room`] is gone.
    pub async fn disable_video(
        &self,
        source_kind: Option<MediaSourceKind>,
    ) -> Result<(), api::Error> {
        self.change_media_state(
            media_exchange_state::Stable::Disabled,
            MediaKind::Video,
            TrackDirection::Send,
            source_kind,
        )
        .await
    }

    /// Enables outbound video of the provided source, or of all sources.
    ///
    /// # Errors
    ///
    /// If local media can't be acquired, the transition is rejected or the
    /// [`Room`] is gone.
    pub async fn enable_video(
        &self,
        source_kind: Option<MediaSourceKind>,
    ) -> Result<(), api::Error> {
        self.change_media_state(
            media_exchange_state::Stable::Enabled,
            MediaKind::Video,
            TrackDirection::Send,
            source_kind,
        )
        .await
    }

    /// Disables inbound audio.
    ///
    /// # Errors
    ///
    /// If the transition is rejected or the [`Room`] is gone.
    pub async fn disable_remote_audio(&self) -> Result<(), api::Error> {
        self.change_media_state(
            media_exchange_state::Stable::Disabled,
            MediaKind::Audio,
            TrackDirection::Recv,
            None,
        )
        .await
    }

    /// Enables inbound audio.
    ///
    /// # Errors
    ///
    /// If the transition is rejected or the [`Room`] is gone.
    pub async fn enable_remote_audio(&self) -> Result<(), api::Error> {
        self.change_media_state(
            media_exchange_state::Stable::Enabled,
            MediaKind::Audio,
            TrackDirection::Recv,
            None,
        )
        .await
    }

    /// Disables inbound video of the provided source, or of all sources.
    ///
    /// # Errors
    ///
    /// If the transition is rejected or the [`Room`] is gone.
    pub async fn disable_remote_video(
        &self,
        source_kind: Option<MediaSourceKind>,
    ) -> Result<(), api::Error> {
        self.change_media_state(
            media_exchange_state::Stable::Disabled,
            MediaKind::Video,
            TrackDirection::Recv,
            source_kind,
        )
        .await
    }

    /// Enables inbound video of the provided source, or of all sources.
    ///
    /// # Errors
    ///
    /// If the transition is rejected or the [`Room`] is gone.
    pub async fn enable_remote_video(
        &self,
        source_kind: Option<MediaSourceKind>,
    ) -> Result<(), api::Error> {
        self.change_media_state(
            media_exchange_state::Stable::Enabled,
            MediaKind::Video,
            TrackDirection::Recv,
            source_kind,
        )
        .await
    }

    /// Notifies the [`Room`] that the host network changed, restarting ICE
    /// of every peer connection.
    ///
    /// # Errors
    ///
    /// With `StateError` if the [`Room`] is gone.
    pub fn network_changed(&self) -> Result<(), api::Error> {
        for peer in self.0.upgrade()?.peers.get_all() {
            peer.handle_ice_failure();
        }
        Ok(())
    }
}

/// Weak reference to a [`Room`], not keeping it alive.
#[derive(Clone)]
pub struct WeakRoom(Weak<InnerRoom>);

impl WeakRoom {
    /// Upgrades this [`WeakRoom`] to a [`Room`], if it's still alive.
    #[inline]
    #[must_use]
    pub fn upgrade(&self) -> Option<Room> {
        self.0.upgrade().map(Room)
    }
}

/// Engine side of a room, owning its peers, connections and signaling
/// session.
///
/// Dropping the last [`Room`] closes it and fires `on_close`.
pub struct Room(Rc<InnerRoom>);

impl Room {
    /// Creates a new [`Room`] over the provided [`RpcSession`] and spawns
    /// its event loop.
    ///
    /// Must be called inside a [`tokio::task::LocalSet`].
    pub fn new(
        rpc: Rc<dyn RpcSession>,
        media_manager: MediaManager,
        peer_factory: PeerConnectionFactory,
        table: &Rc<HandleTable>,
        conf: &Conf,
    ) -> Self {
        enum RoomEvent {
            RpcEvent(RpcEvent),
            PeerEvent(PeerEvent),
            RpcClientLostConnection,
            RpcClientReconnected,
        }

        let (tx, peer_events_rx) = mpsc::unbounded();

        let mut rpc_events_stream =
            Rc::clone(&rpc).subscribe().map(RoomEvent::RpcEvent).fuse();
        let mut peer_events_stream =
            peer_events_rx.map(RoomEvent::PeerEvent).fuse();
        let mut rpc_connection_lost = rpc
            .on_connection_loss()
            .map(|_| RoomEvent::RpcClientLostConnection)
            .fuse();
        let mut rpc_client_reconnected = rpc
            .on_reconnected()
            .map(|_| RoomEvent::RpcClientReconnected)
            .fuse();

        let room = Rc::new_cyclic(|this| {
            InnerRoom::new(
                this,
                rpc,
                media_manager,
                peer_factory,
                tx,
                table,
                conf,
            )
        });
        let inner = Rc::downgrade(&room);

        platform::spawn(async move {
            loop {
                let event: RoomEvent = futures::select! {
                    event = rpc_events_stream.select_next_some() => event,
                    event = peer_events_stream.select_next_some() => event,
                    event = rpc_connection_lost.select_next_some() => event,
                    event = rpc_client_reconnected.select_next_some() => event,
                    complete => break,
                };

                let inner = if let Some(inner) = inner.upgrade() {
                    inner
                } else {
                    log::debug!("Room is dropped, stopping its event loop");
                    break;
                };
                match event {
                    RoomEvent::RpcEvent(event) => {
                        if let Err(e) = event.dispatch_with(&*inner).await {
                            log::error!("Failed to handle RPC event: {}", e);
                        }
                    }
                    RoomEvent::PeerEvent(event) => {
                        if let Err(e) = event.dispatch_with(&*inner).await {
                            log::error!("Failed to handle Peer event: {}", e);
                        }
                    }
                    RoomEvent::RpcClientLostConnection => {
                        inner.handle_rpc_connection_lost();
                    }
                    RoomEvent::RpcClientReconnected => {
                        inner.handle_rpc_connection_recovered();
                    }
                }
            }
        });

        Self(room)
    }

    /// Sets the close reason and consumes this [`Room`].
    ///
    /// `on_close` fires once the last reference is dropped.
    #[inline]
    pub fn close(self, reason: CloseReason) {
        self.0.set_close_reason(reason);
    }

    /// Sets the [`CloseReason`] `on_close` will be fired with.
    #[inline]
    pub fn set_close_reason(&self, reason: CloseReason) {
        self.0.set_close_reason(reason);
    }

    /// Creates a new host handle to this [`Room`].
    #[inline]
    #[must_use]
    pub fn new_handle(&self) -> RoomHandle {
        RoomHandle(self.0.slot.handle(Rc::downgrade(&self.0)))
    }

    /// Indicates whether both [`Room`]s point to the same room.
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Room) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Indicates whether the provided [`RoomHandle`] points to this [`Room`].
    #[must_use]
    pub fn inner_ptr_eq(&self, handle: &RoomHandle) -> bool {
        handle
            .0
            .upgrade()
            .map_or(false, |inner| Rc::ptr_eq(&self.0, &inner))
    }

    /// Downgrades this [`Room`] to a [`WeakRoom`].
    #[inline]
    #[must_use]
    pub fn downgrade(&self) -> WeakRoom {
        WeakRoom(Rc::downgrade(&self.0))
    }

    /// Returns the [`PeerConnection`] with the provided [`PeerId`].
    #[inline]
    #[must_use]
    pub fn get_peer_by_id(&self, id: PeerId) -> Option<Rc<PeerConnection>> {
        self.0.peers.get(id)
    }

    /// Returns the current outbound [`MediaStreamSettings`].
    #[inline]
    #[must_use]
    pub fn send_settings(&self) -> MediaStreamSettings {
        self.0.send_constraints.inner()
    }
}

/// Actual data of a [`Room`], shared between [`RoomHandle`]s and the
/// [`Room`] itself.
struct InnerRoom {
    rpc: Rc<dyn RpcSession>,

    /// Settings of the local media senders are created and updated with.
    send_constraints: LocalTracksConstraints,

    /// Settings of the remote media receivers are created with.
    recv_constraints: Rc<RecvConstraints>,

    peers: PeerRepository,

    media_manager: MediaManager,

    /// [`Connection`]s with remote members.
    ///
    /// [`Connection`]: crate::connection::Connection
    connections: Rc<Connections>,

    table: Weak<HandleTable>,

    /// Settings of the [`ReconnectHandle`]s provided on connection loss.
    rpc_conf: conf::Rpc,

    on_local_track: platform::Callback<LocalMediaTrack>,
    on_failed_local_media: platform::Callback<api::Error>,
    on_connection_loss: platform::Callback<ReconnectHandle>,
    on_close: platform::Callback<RoomCloseReason>,

    /// Reason `on_close` is fired with on [`Drop`].
    close_reason: RefCell<CloseReason>,

    slot: HandleSlot,
}

impl InnerRoom {
    fn new(
        this: &Weak<Self>,
        rpc: Rc<dyn RpcSession>,
        media_manager: MediaManager,
        peer_factory: PeerConnectionFactory,
        peer_events_sender: mpsc::UnboundedSender<PeerEvent>,
        table: &Rc<HandleTable>,
        conf: &Conf,
    ) -> Self {
        let mut settings = MediaStreamSettings::new();
        settings.audio(AudioTrackConstraints::new());
        settings.device_video(DeviceVideoTrackConstraints::new());
        let send_constraints = LocalTracksConstraints::from(settings);
        let recv_constraints = Rc::new(RecvConstraints::default());

        let peers = PeerRepository::new(
            peer_factory,
            PeerContext {
                media_manager: media_manager.clone(),
                peer_events_sender,
                send_constraints: send_constraints.clone(),
                recv_constraints: Rc::clone(&recv_constraints),
                stats_scheduler: StatsScheduler::new(conf.peer.stats_interval),
                table: Rc::downgrade(table),
                transition_timeout: conf.media.transition_timeout,
                ice_restart_on_failure: conf.peer.ice_restart_on_failure,
            },
        );

        Self {
            rpc,
            send_constraints,
            recv_constraints,
            peers,
            media_manager,
            connections: Rc::new(Connections::new(
                Rc::downgrade(table),
                Self::recv_media_state_changer(Weak::clone(this)),
            )),
            table: Rc::downgrade(table),
            rpc_conf: conf.rpc.clone(),
            on_local_track: platform::Callback::default(),
            on_failed_local_media: platform::Callback::default(),
            on_connection_loss: platform::Callback::default(),
            on_close: platform::Callback::default(),
            close_reason: RefCell::new(CloseReason::ByClient {
                reason: ClientDisconnect::RoomUnexpectedlyDropped,
                is_err: true,
            }),
            slot: HandleSlot::new(table),
        }
    }

    fn set_close_reason(&self, reason: CloseReason) {
        drop(self.close_reason.replace(reason));
    }

    /// Returns [`RecvMediaStateChanger`] of the [`Connections`] routing into
    /// [`InnerRoom::change_member_recv_media_state()`].
    fn recv_media_state_changer(this: Weak<Self>) -> RecvMediaStateChanger {
        Rc::new(
            move |member_id: MemberId,
                  state: MediaState,
                  kind: MediaKind,
                  source_kind: Option<MediaSourceKind>| {
                let this = Weak::clone(&this);
                async move {
                    let this = this.upgrade().ok_or_else(|| {
                        tracerr::new!(ChangeMediaStateError::Detached)
                    })?;
                    this.change_member_recv_media_state(
                        &member_id,
                        state,
                        kind,
                        source_kind,
                    )
                    .await
                }
                .boxed_local()
            },
        )
    }

    /// Changes media state of the [`RecvConstraints`] or the
    /// [`LocalTracksConstraints`] of the provided media.
    fn set_constraints_media_state(
        &self,
        state: MediaState,
        kind: MediaKind,
        direction: TrackDirection,
        source_kind: Option<MediaSourceKind>,
    ) {
        use media_exchange_state::Stable::Enabled;
        use MediaState::{MediaExchange, Mute};
        use TrackDirection::{Recv, Send};

        match (direction, state) {
            (Send, _) => {
                self.send_constraints
                    .set_media_state(state, kind, source_kind);
            }
            (Recv, MediaExchange(exchange)) => {
                self.recv_constraints.set_enabled(
                    exchange == Enabled,
                    kind,
                    source_kind,
                );
            }
            (Recv, Mute(_)) => {
                log::error!("Muting of receivers is not supported");
            }
        }
    }

    /// Checks that the provided media can start transiting into the
    /// provided [`MediaState`] without touching anything.
    fn check_media_state_transition(
        &self,
        state: MediaState,
        kind: MediaKind,
        direction: TrackDirection,
        source_kind: Option<MediaSourceKind>,
    ) -> Result<(), Traced<ChangeMediaStateError>> {
        let disabling_send = matches!(direction, TrackDirection::Send)
            && state == media_exchange_state::Stable::Disabled.into();

        for peer in self.peers.get_all() {
            for side in peer.get_transceivers_sides(kind, direction, source_kind)
            {
                if !side.is_transitable() {
                    continue;
                }
                if disabling_send {
                    let is_required = peer
                        .get_sender_by_id(side.track_id())
                        .map_or(false, |s| s.caps().is_required());
                    if is_required {
                        return Err(tracerr::new!(
                            ChangeMediaStateError::ProhibitedState
                        ));
                    }
                }
                check_no_conflicting_transition(&*side, state)?;
            }
        }
        Ok(())
    }

    /// Moves the receivers of media published by the provided remote member
    /// into the provided [`MediaState`], waiting for the server to confirm
    /// it.
    ///
    /// The room-wide [`RecvConstraints`] are left untouched.
    async fn change_member_recv_media_state(
        &self,
        member_id: &MemberId,
        state: MediaState,
        kind: MediaKind,
        source_kind: Option<MediaSourceKind>,
    ) -> Result<(), Traced<ChangeMediaStateError>> {
        let mut desired_states = HashMap::new();
        for peer in self.peers.get_all() {
            let mut states = HashMap::new();
            for side in peer.get_transceivers_sides(
                kind,
                TrackDirection::Recv,
                source_kind,
            ) {
                let is_member = peer
                    .get_receiver_by_id(side.track_id())
                    .map_or(false, |r| r.sender_id() == member_id);
                if !is_member || !side.is_transitable() {
                    continue;
                }
                check_no_conflicting_transition(&*side, state)?;
                let _ = states.insert(side.track_id(), state);
            }
            if !states.is_empty() {
                let _ = desired_states.insert(peer.id(), states);
            }
        }
        self.update_media_states(desired_states).await
    }

    /// Moves all the senders or receivers of the provided media into the
    /// provided [`MediaState`], waiting for the server to confirm it.
    async fn change_media_state(
        &self,
        new_state: MediaState,
        kind: MediaKind,
        direction: TrackDirection,
        source_kind: Option<MediaSourceKind>,
    ) -> Result<(), Traced<ChangeMediaStateError>> {
        self.check_media_state_transition(
            new_state,
            kind,
            direction,
            source_kind,
        )?;
        self.set_constraints_media_state(
            new_state,
            kind,
            direction,
            source_kind,
        );

        let enabling_send = matches!(direction, TrackDirection::Send)
            && new_state == media_exchange_state::Stable::Enabled.into();

        // Acquired before any sender is touched, and held until the end, so
        // senders reuse them without new requests. Senders are put into
        // transition first, so opposite requests fail while acquiring.
        let _tracks = if enabling_send {
            let reserved = self.reserve_media_state_transition(
                new_state,
                kind,
                direction,
                source_kind,
            )?;
            match self.get_local_tracks(kind, source_kind).await {
                Ok(tracks) => {
                    self.send_track_patches(reserved, new_state);
                    tracks
                }
                Err(e) => {
                    self.cancel_media_state_transition(&reserved, new_state);
                    self.set_constraints_media_state(
                        new_state.opposite(),
                        kind,
                        direction,
                        source_kind,
                    );
                    return Err(tracerr::wrap!()(e));
                }
            }
        } else {
            Vec::new()
        };

        while !self.is_all_peers_in_media_state(
            kind,
            direction,
            source_kind,
            new_state,
        ) {
            let res = self
                .toggle_media_state(new_state, kind, direction, source_kind)
                .await
                .and_then(|progressed| {
                    if progressed {
                        Ok(())
                    } else {
                        Err(tracerr::new!(
                            ChangeMediaStateError::TransitionIntoOppositeState(
                                OppositeState(new_state.opposite())
                            )
                        ))
                    }
                });
            if let Err(e) = res {
                self.set_constraints_media_state(
                    new_state.opposite(),
                    kind,
                    direction,
                    source_kind,
                );
                if enabling_send {
                    let _ = self
                        .toggle_media_state(
                            new_state.opposite(),
                            kind,
                            direction,
                            source_kind,
                        )
                        .await
                        .map_err(tracerr::wrap!())?;
                }
                return Err(tracerr::wrap!()(e));
            }
        }
        Ok(())
    }

    /// Starts transitions of all the transitable senders or receivers of the
    /// provided media that are not in the provided [`MediaState`] yet,
    /// without notifying the server.
    ///
    /// Returns the [`TrackId`]s of the started transitions.
    fn reserve_media_state_transition(
        &self,
        state: MediaState,
        kind: MediaKind,
        direction: TrackDirection,
        source_kind: Option<MediaSourceKind>,
    ) -> Result<HashMap<PeerId, Vec<TrackId>>, Traced<ChangeMediaStateError>>
    {
        let mut reserved: HashMap<_, Vec<_>> = HashMap::new();
        for peer in self.peers.get_all() {
            for side in peer.get_transceivers_sides(kind, direction, source_kind)
            {
                if !side.is_transitable() || !side.is_track_patch_needed(state)
                {
                    continue;
                }
                side.media_state_transition_to(state)
                    .map_err(tracerr::map_from_and_wrap!())?;
                reserved.entry(peer.id()).or_default().push(side.track_id());
            }
        }
        Ok(reserved)
    }

    /// Sends [`Command::UpdateTracks`] requesting the provided [`MediaState`]
    /// for the transitions started by
    /// [`InnerRoom::reserve_media_state_transition()`].
    fn send_track_patches(
        &self,
        reserved: HashMap<PeerId, Vec<TrackId>>,
        state: MediaState,
    ) {
        for (peer_id, track_ids) in reserved {
            self.rpc.send_command(Command::UpdateTracks {
                peer_id,
                tracks_patches: track_ids
                    .into_iter()
                    .map(|id| state.generate_track_patch(id))
                    .collect(),
            });
        }
    }

    /// Cancels the transitions started by
    /// [`InnerRoom::reserve_media_state_transition()`].
    fn cancel_media_state_transition(
        &self,
        reserved: &HashMap<PeerId, Vec<TrackId>>,
        state: MediaState,
    ) {
        for (peer_id, track_ids) in reserved {
            let peer = if let Some(peer) = self.peers.get(*peer_id) {
                peer
            } else {
                continue;
            };
            for id in track_ids {
                if let Some(side) = peer.get_transceiver_side_by_id(*id) {
                    side.cancel_media_state_transition(state);
                }
            }
        }
    }

    /// Requests the provided [`MediaState`] for all the transitable senders
    /// or receivers of the provided media.
    ///
    /// Returns `false` if none of them needed to be driven.
    async fn toggle_media_state(
        &self,
        state: MediaState,
        kind: MediaKind,
        direction: TrackDirection,
        source_kind: Option<MediaSourceKind>,
    ) -> Result<bool, Traced<ChangeMediaStateError>> {
        let mut progressed = false;
        let states = self
            .peers
            .get_all()
            .into_iter()
            .map(|peer| {
                let states: HashMap<_, _> = peer
                    .get_transceivers_sides(kind, direction, source_kind)
                    .into_iter()
                    .filter(|side| {
                        side.is_transitable()
                            && side.is_subscription_needed(state)
                    })
                    .map(|side| (side.track_id(), state))
                    .collect();
                progressed |= !states.is_empty();
                (peer.id(), states)
            })
            .collect();

        self.update_media_states(states).await?;
        Ok(progressed)
    }

    /// Starts transitions of the provided senders and receivers, sends the
    /// resulting [`Command::UpdateTracks`] and waits for all of them to
    /// become stable.
    ///
    /// Senders being enabled get their local tracks afterwards.
    async fn update_media_states(
        &self,
        desired_states: HashMap<PeerId, HashMap<TrackId, MediaState>>,
    ) -> Result<(), Traced<ChangeMediaStateError>> {
        let mut stable_futs = Vec::new();
        let mut stream_updates = Vec::new();

        for (peer_id, states) in desired_states {
            let peer = if let Some(peer) = self.peers.get(peer_id) {
                peer
            } else {
                continue;
            };

            let mut criteria = LocalStreamUpdateCriteria::empty();
            let mut tracks_patches = Vec::new();
            for (track_id, desired) in states {
                let side =
                    if let Some(side) = peer.get_transceiver_side_by_id(track_id)
                    {
                        side
                    } else {
                        continue;
                    };
                if !side.is_subscription_needed(desired) {
                    continue;
                }
                if desired == media_exchange_state::Stable::Enabled.into()
                    && peer.get_sender_by_id(track_id).is_some()
                {
                    criteria.add(side.kind(), side.source_kind());
                }
                if side.is_track_patch_needed(desired) {
                    tracks_patches.push(desired.generate_track_patch(track_id));
                }
                side.media_state_transition_to(desired)
                    .map_err(tracerr::map_from_and_wrap!())?;
                stable_futs.push(side.when_media_state_stable(desired));
            }

            if !tracks_patches.is_empty() {
                self.rpc.send_command(Command::UpdateTracks {
                    peer_id,
                    tracks_patches,
                });
            }
            if !criteria.is_empty() {
                stream_updates.push((peer, criteria));
            }
        }

        let _ = future::try_join_all(stable_futs)
            .await
            .map_err(tracerr::map_from_and_wrap!())?;

        for (peer, criteria) in stream_updates {
            let _ = peer
                .update_local_stream(criteria)
                .await
                .map_err(tracerr::map_from_and_wrap!())?;
        }
        Ok(())
    }

    /// Acquires local tracks for all the senders of the provided media.
    ///
    /// Fires `on_failed_local_media` on failure and `on_local_track` for each
    /// newly acquired track.
    async fn get_local_tracks(
        &self,
        kind: MediaKind,
        source_kind: Option<MediaSourceKind>,
    ) -> Result<Vec<Rc<local::Track>>, Traced<ChangeMediaStateError>> {
        let requests = self
            .peers
            .get_all()
            .into_iter()
            .filter_map(|p| p.get_media_settings(kind, source_kind).transpose())
            .collect::<Result<Vec<_>, _>>()
            .map_err(tracerr::map_from_and_wrap!())?;

        let mut result = Vec::new();
        for request in requests {
            let tracks = match self.media_manager.get_tracks(request).await {
                Ok(tracks) => tracks,
                Err(e) => {
                    self.on_failed_local_media
                        .call1(api::Error::from(e.clone()));
                    return Err(tracerr::map_from_and_wrap!()(e));
                }
            };
            for (track, is_new) in tracks {
                if is_new {
                    self.notify_local_track(&track);
                }
                result.push(track);
            }
        }
        Ok(result)
    }

    /// Fires `on_local_track` with a new handle to the provided
    /// [`local::Track`].
    fn notify_local_track(&self, track: &Rc<local::Track>) {
        if let Some(table) = self.table.upgrade() {
            self.on_local_track
                .call1(LocalMediaTrack::new(Rc::clone(track), &table));
        }
    }

    /// Indicates whether all the senders or receivers of the provided media
    /// are in the provided [`MediaState`].
    fn is_all_peers_in_media_state(
        &self,
        kind: MediaKind,
        direction: TrackDirection,
        source_kind: Option<MediaSourceKind>,
        state: MediaState,
    ) -> bool {
        self.peers.get_all().iter().all(|p| {
            p.is_all_in_media_state(kind, direction, source_kind, state)
        })
    }

    /// Disables the provided media in the [`LocalTracksConstraints`] and all
    /// the enabled senders of it left without local tracks, along with the
    /// provided `states_update`.
    async fn disable_senders_without_tracks(
        &self,
        kinds: LocalStreamUpdateCriteria,
        mut states_update: HashMap<PeerId, HashMap<TrackId, MediaState>>,
    ) -> Result<(), Traced<ChangeMediaStateError>> {
        use media_exchange_state::Stable::Disabled;

        for (kind, source_kind) in &[
            (MediaKind::Audio, MediaSourceKind::Device),
            (MediaKind::Video, MediaSourceKind::Device),
            (MediaKind::Video, MediaSourceKind::Display),
        ] {
            if kinds.has(*kind, *source_kind) {
                self.send_constraints.set_media_state(
                    Disabled.into(),
                    *kind,
                    Some(*source_kind),
                );
            }
        }

        for peer in self.peers.get_all() {
            let senders = peer.get_senders_without_tracks(kinds);
            states_update.entry(peer.id()).or_default().extend(
                senders
                    .into_iter()
                    .map(|s| (s.track_id(), MediaState::from(Disabled))),
            );
        }
        self.update_media_states(states_update)
            .await
            .map_err(tracerr::wrap!())
    }

    /// Applies the provided [`MediaStreamSettings`] to all the senders of
    /// this [`Room`].
    #[async_recursion(?Send)]
    async fn set_local_media_settings(
        &self,
        new_settings: MediaStreamSettings,
        stop_first: bool,
        rollback_on_fail: bool,
    ) -> Result<(), ConstraintsUpdateError> {
        use ConstraintsUpdateError as E;

        let current_settings = self.send_constraints.inner();
        let mut kinds = LocalStreamUpdateCriteria::empty();
        for (kind, source_kind) in new_settings.requested_kinds() {
            kinds.add(kind, source_kind);
        }
        self.send_constraints.constrain(new_settings);
        let peers = self.peers.get_all();

        if stop_first {
            for peer in &peers {
                peer.drop_send_tracks(kinds).await;
            }
        }

        let mut states_update: HashMap<_, HashMap<_, _>> = HashMap::new();
        for peer in peers {
            let err = match peer
                .update_local_stream(LocalStreamUpdateCriteria::all())
                .await
            {
                Ok(states) => {
                    states_update.entry(peer.id()).or_default().extend(
                        states.into_iter().map(|(id, s)| (id, s.into())),
                    );
                    continue;
                }
                Err(e) => e,
            };
            let cause: Traced<ChangeMediaStateError> =
                tracerr::map_from_and_wrap!()(err.clone());
            if let PeerError::MediaManager(_) = err.as_ref() {
                self.on_failed_local_media.call1(api::Error::from(err));
            }

            return Err(if rollback_on_fail {
                match self
                    .set_local_media_settings(current_settings, stop_first, false)
                    .await
                {
                    Ok(()) => E::recovered(cause),
                    Err(e) => e.recovery_failed(cause),
                }
            } else {
                match self
                    .disable_senders_without_tracks(kinds, states_update)
                    .await
                {
                    Ok(()) => E::errored(cause),
                    Err(e) => E::RecoverFailed {
                        recover_reason: cause,
                        recover_fail_reasons: vec![e],
                    },
                }
            });
        }

        self.update_media_states(states_update)
            .await
            .map_err(|e| E::errored(tracerr::wrap!()(e)))
    }

    /// Pauses transition timers and hands a [`ReconnectHandle`] to the host.
    fn handle_rpc_connection_lost(&self) {
        self.peers.connection_lost();
        self.on_connection_loss.call1(ReconnectHandle::new(
            self.slot.handle(Rc::downgrade(&self.rpc)),
            self.rpc_conf.clone(),
        ));
    }

    /// Resumes transition timers and asks the server to synchronize with the
    /// current state.
    fn handle_rpc_connection_recovered(&self) {
        self.peers.connection_recovered();
        self.rpc.send_command(Command::SynchronizeMe {
            state: self.peers.state(),
        });
    }

    /// Creates [`Connection`]s with the remote members of the provided
    /// [`Track`]s.
    ///
    /// [`Connection`]: crate::connection::Connection
    fn create_connections(&self, peer_id: PeerId, tracks: &[Track]) {
        for track in tracks {
            match &track.direction {
                Direction::Send { receivers, .. } => {
                    for receiver in receivers {
                        self.connections.create_connection(peer_id, receiver);
                    }
                }
                Direction::Recv { sender, .. } => {
                    self.connections.create_connection(peer_id, sender);
                }
            }
        }
    }

    /// Creates [`Connection`]s with the remote members of the provided
    /// [`state::Peer`].
    ///
    /// [`Connection`]: crate::connection::Connection
    fn create_connections_from_state(&self, state: &state::Peer) {
        for sender in state.senders.values() {
            for receiver in &sender.receivers {
                self.connections.create_connection(state.id, receiver);
            }
        }
        for receiver in state.receivers.values() {
            self.connections
                .create_connection(state.id, &receiver.sender_id);
        }
    }

    /// Performs the provided [`NegotiationRole`] on the provided
    /// [`PeerConnection`], creating the provided [`Track`]s first.
    async fn negotiate(
        &self,
        peer: &PeerConnection,
        role: NegotiationRole,
        tracks: Vec<Track>,
    ) -> Result<(), Traced<PeerError>> {
        match role {
            NegotiationRole::Offerer => {
                let sdp_offer =
                    peer.get_offer(tracks).await.map_err(tracerr::wrap!())?;
                let mids = peer.get_mids().map_err(tracerr::wrap!())?;
                self.rpc.send_command(Command::MakeSdpOffer {
                    peer_id: peer.id(),
                    sdp_offer,
                    mids,
                    transceivers_statuses: peer.get_transceivers_statuses(),
                });
            }
            NegotiationRole::Answerer(offer) => {
                let sdp_answer = peer
                    .process_offer(offer, tracks)
                    .await
                    .map_err(tracerr::wrap!())?;
                self.rpc.send_command(Command::MakeSdpAnswer {
                    peer_id: peer.id(),
                    sdp_answer,
                    transceivers_statuses: peer.get_transceivers_statuses(),
                });
            }
        }
        Ok(())
    }

    fn get_peer(
        &self,
        peer_id: PeerId,
    ) -> Result<Rc<PeerConnection>, Traced<EventError>> {
        self.peers
            .get(peer_id)
            .ok_or_else(|| tracerr::new!(EventError::UnknownPeer(peer_id)))
    }
}

/// Errors of handling server and peer events.
#[derive(Clone, Debug, Display, From)]
enum EventError {
    /// Event refers to an unknown [`PeerConnection`].
    #[display(fmt = "Peer with id {} doesn't exist", _0)]
    #[from(ignore)]
    UnknownPeer(PeerId),

    /// Remote track came from an unknown member.
    #[display(fmt = "Remote track from unknown member {}", _0)]
    #[from(ignore)]
    UnknownRemoteMember(MemberId),

    /// [`PeerConnection`] failed.
    #[display(fmt = "{}", _0)]
    Peer(PeerError),
}

#[async_trait(?Send)]
impl EventHandler for InnerRoom {
    type Output = Result<(), Traced<EventError>>;

    #[inline]
    async fn on_room_joined(&self, member_id: MemberId) -> Self::Output {
        log::debug!("Joined the room as {}", member_id);
        Ok(())
    }

    #[inline]
    async fn on_room_left(
        &self,
        close_reason: CloseByServerReason,
    ) -> Self::Output {
        log::debug!("Left the room: {}", close_reason);
        Ok(())
    }

    /// Creates a [`PeerConnection`] with the [`Connection`]s of its tracks
    /// and starts negotiating it.
    ///
    /// [`Connection`]: crate::connection::Connection
    async fn on_peer_created(
        &self,
        peer_id: PeerId,
        negotiation_role: NegotiationRole,
        tracks: Vec<Track>,
        ice_servers: Vec<IceServer>,
        force_relay: bool,
    ) -> Self::Output {
        let peer = self
            .peers
            .create_peer(peer_id, ice_servers, force_relay)
            .map_err(tracerr::map_from_and_wrap!())?;
        self.create_connections(peer_id, &tracks);
        self.negotiate(&peer, negotiation_role, tracks)
            .await
            .map_err(tracerr::map_from_and_wrap!())
    }

    async fn on_sdp_answer_made(
        &self,
        peer_id: PeerId,
        sdp_answer: String,
    ) -> Self::Output {
        self.get_peer(peer_id)?
            .set_remote_answer(sdp_answer)
            .await
            .map_err(tracerr::map_from_and_wrap!())
    }

    async fn on_local_description_applied(
        &self,
        peer_id: PeerId,
        sdp_offer: String,
    ) -> Self::Output {
        self.get_peer(peer_id)?.local_description_applied(&sdp_offer);
        Ok(())
    }

    async fn on_ice_candidate_discovered(
        &self,
        peer_id: PeerId,
        candidate: IceCandidate,
    ) -> Self::Output {
        self.get_peer(peer_id)?
            .add_ice_candidate(candidate)
            .await
            .map_err(tracerr::map_from_and_wrap!())
    }

    /// Disposes the provided [`PeerConnection`]s and closes the
    /// [`Connection`]s nobody else uses.
    ///
    /// [`Connection`]: crate::connection::Connection
    async fn on_peers_removed(&self, peer_ids: Vec<PeerId>) -> Self::Output {
        for id in peer_ids {
            drop(self.peers.remove(id));
            self.connections.close_connection(id);
        }
        Ok(())
    }

    /// Applies the provided [`PeerUpdate`]s in order and renegotiates if the
    /// server asks to.
    async fn on_peer_updated(
        &self,
        peer_id: PeerId,
        updates: Vec<PeerUpdate>,
        negotiation_role: Option<NegotiationRole>,
    ) -> Self::Output {
        let peer = self.get_peer(peer_id)?;

        let mut added = Vec::new();
        let mut patches = Vec::new();
        for update in updates {
            match update {
                PeerUpdate::Added(track) => added.push(track),
                PeerUpdate::Updated(patch) => patches.push(patch),
                PeerUpdate::Removed(id) => peer.remove_track(id).await,
                PeerUpdate::IceRestart => peer.restart_ice(),
            }
        }
        self.create_connections(peer_id, &added);

        if !patches.is_empty() {
            let criteria = peer.patch_tracks(&patches).await;
            peer.update_local_stream_or_notify(criteria).await;
        }

        if let Some(role) = negotiation_role {
            self.negotiate(&peer, role, added)
                .await
                .map_err(tracerr::map_from_and_wrap!())?;
        } else if !added.is_empty() {
            let criteria = LocalStreamUpdateCriteria::from_tracks(&added);
            peer.create_tracks(added)
                .map_err(tracerr::map_from_and_wrap!())?;
            peer.update_local_stream_or_notify(criteria).await;
        }
        Ok(())
    }

    async fn on_connection_quality_updated(
        &self,
        partner_member_id: MemberId,
        quality_score: ConnectionQualityScore,
    ) -> Self::Output {
        if let Some(conn) = self.connections.get(&partner_member_id) {
            conn.update_quality_score(quality_score);
        }
        Ok(())
    }

    /// Brings peers in line with the authoritative [`state::Room`] sent by
    /// the server after a reconnect.
    async fn on_state_synchronized(&self, state: state::Room) -> Self::Output {
        for peer in self.peers.get_all() {
            if !state.peers.contains_key(&peer.id()) {
                drop(self.peers.remove(peer.id()));
                self.connections.close_connection(peer.id());
            }
        }

        for (id, peer_state) in state.peers {
            let peer = if let Some(peer) = self.peers.get(id) {
                peer
            } else {
                let peer = self
                    .peers
                    .create_peer(
                        id,
                        peer_state.ice_servers.clone(),
                        peer_state.force_relay,
                    )
                    .map_err(tracerr::map_from_and_wrap!())?;
                self.create_connections_from_state(&peer_state);
                peer
            };

            let role = peer_state.negotiation_role.clone();
            let criteria = peer
                .apply_state(peer_state)
                .await
                .map_err(tracerr::map_from_and_wrap!())?;
            peer.update_local_stream_or_notify(criteria).await;

            if let Some(role) = role {
                if peer.state().negotiation_role.as_ref() != Some(&role) {
                    self.negotiate(&peer, role, Vec::new())
                        .await
                        .map_err(tracerr::map_from_and_wrap!())?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl PeerEventHandler for InnerRoom {
    type Output = Result<(), Traced<EventError>>;

    async fn on_ice_candidate_discovered(
        &self,
        peer_id: PeerId,
        candidate: IceCandidate,
    ) -> Self::Output {
        self.rpc
            .send_command(Command::SetIceCandidate { peer_id, candidate });
        Ok(())
    }

    async fn on_ice_connection_state_changed(
        &self,
        peer_id: PeerId,
        ice_connection_state: IceConnectionState,
    ) -> Self::Output {
        self.rpc.send_command(Command::AddPeerConnectionMetrics {
            peer_id,
            metrics: PeerMetrics::IceConnectionState(ice_connection_state),
        });
        Ok(())
    }

    /// Reports the new state to the server and scrapes the first stats once
    /// connected.
    async fn on_connection_state_changed(
        &self,
        peer_id: PeerId,
        peer_connection_state: PeerConnectionState,
    ) -> Self::Output {
        self.rpc.send_command(Command::AddPeerConnectionMetrics {
            peer_id,
            metrics: PeerMetrics::PeerConnectionState(peer_connection_state),
        });
        if peer_connection_state == PeerConnectionState::Connected {
            if let Some(peer) = self.peers.get(peer_id) {
                peer.scrape_and_send_stats().await;
            }
        }
        Ok(())
    }

    /// Passes the received [`remote::Track`] to the [`Connection`] with its
    /// sender.
    ///
    /// [`Connection`]: crate::connection::Connection
    async fn on_new_remote_track(
        &self,
        sender_id: MemberId,
        track: Rc<remote::Track>,
    ) -> Self::Output {
        let conn = self.connections.get(&sender_id).ok_or_else(|| {
            tracerr::new!(EventError::UnknownRemoteMember(sender_id))
        })?;
        conn.add_remote_track(&track);
        Ok(())
    }

    async fn on_new_local_track(
        &self,
        local_track: Rc<local::Track>,
    ) -> Self::Output {
        self.notify_local_track(&local_track);
        Ok(())
    }

    async fn on_media_update_command(&self, command: Command) -> Self::Output {
        self.rpc.send_command(command);
        Ok(())
    }

    async fn on_failed_local_media(
        &self,
        error: Traced<PeerError>,
    ) -> Self::Output {
        self.on_failed_local_media.call1(api::Error::from(error));
        Ok(())
    }

    async fn on_stats_update(
        &self,
        peer_id: PeerId,
        stats: Vec<RtcStat>,
        bitrates: HashMap<String, u64>,
    ) -> Self::Output {
        for (track, bitrate) in &bitrates {
            log::debug!(
                "Peer {} receives track {} at {} bit/s",
                peer_id,
                track,
                bitrate,
            );
        }
        self.rpc.send_command(Command::AddPeerConnectionMetrics {
            peer_id,
            metrics: PeerMetrics::RtcStats(stats),
        });
        Ok(())
    }
}

impl Drop for InnerRoom {
    /// Closes the [`RpcSession`] if closing was initiated by the client and
    /// fires `on_close`.
    fn drop(&mut self) {
        let reason = *self.close_reason.borrow();
        if let CloseReason::ByClient { reason, .. } = reason {
            self.rpc.close_with_reason(reason);
        }
        self.connections.close_all();
        self.on_close.call1(RoomCloseReason::new(reason));
    }
}
