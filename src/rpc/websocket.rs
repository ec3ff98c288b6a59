//! Client API RPC client over a [WebSocket]-like [`RpcTransport`].
//!
//! [WebSocket]: https://developer.mozilla.org/docs/WebSockets

use std::{cell::RefCell, rc::Rc, time::Duration};

use derive_more::Display;
use futures::{
    channel::{mpsc, oneshot},
    future::{self, Either, LocalBoxFuture},
    stream::LocalBoxStream,
    StreamExt as _,
};
use medea_jason_proto::{
    ClientMsg, CloseReason as CloseByServerReason, Command, Credential, Event,
    MemberId, RoomId, RpcSettings, ServerMsg,
};
use medea_macro::dispatchable;
use medea_reactive::ObservableCell;
use tracerr::Traced;

use crate::{
    conf,
    platform::{self, RpcTransport, RpcTransportFactory, TransportState},
};

use super::{
    ApiUrl, CloseMsg, CloseReason, ClosedStateReason, ConnectionLostReason,
    Heartbeat, IdleTimeout, PingInterval, RpcClientError,
};

/// Reasons of closing an RPC connection by the client side.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum ClientDisconnect {
    /// Room was dropped without any [`CloseReason`].
    RoomUnexpectedlyDropped,

    /// Room was normally closed by the client.
    RoomClosed,

    /// [`WebSocketRpcClient`] was unexpectedly dropped.
    RpcClientUnexpectedlyDropped,

    /// [`RpcTransport`] was unexpectedly dropped.
    RpcTransportUnexpectedlyDropped,

    /// [`WebSocketRpcSession`] was unexpectedly dropped.
    ///
    /// [`WebSocketRpcSession`]: super::WebSocketRpcSession
    SessionUnexpectedlyDropped,
}

impl ClientDisconnect {
    /// Indicates whether this [`ClientDisconnect`] is an error.
    ///
    /// Only [`ClientDisconnect::RoomClosed`] is a normal close.
    #[inline]
    #[must_use]
    pub fn is_err(self) -> bool {
        !matches!(self, Self::RoomClosed)
    }
}

/// State of a [`WebSocketRpcClient`] and its [`RpcTransport`].
#[derive(Clone, Debug, PartialEq)]
pub enum ClientState {
    /// Connection is being established.
    Connecting,

    /// Connection is active.
    Open,

    /// Connection is closed.
    Closed(ClosedStateReason),
}

/// Events emitted by a [`WebSocketRpcClient`].
#[dispatchable(self: &Self)]
#[derive(Clone, Debug, PartialEq)]
pub enum RpcEvent {
    /// Server acknowledged joining a room.
    JoinedRoom { room_id: RoomId, member_id: MemberId },

    /// Server reports the client left a room.
    LeftRoom {
        room_id: RoomId,
        close_reason: CloseReason,
    },

    /// Any other [`Event`] of a room.
    Event { room_id: RoomId, event: Event },
}

struct Inner {
    /// Transport connection with the server.
    sock: Option<Rc<dyn RpcTransport>>,

    /// Connection loss detector via ping/pong mechanism.
    heartbeat: Option<Heartbeat>,

    /// [`RpcEvent`] subscribers.
    subs: Vec<mpsc::UnboundedSender<RpcEvent>>,

    /// Subscribers notified when the transport is closed normally.
    on_close_subscribers: Vec<oneshot::Sender<CloseReason>>,

    /// Reason passed to the [`RpcTransport`] when this client is dropped.
    close_reason: ClientDisconnect,

    /// Subscribers notified when the connection is lost.
    on_connection_loss_subs: Vec<mpsc::UnboundedSender<ConnectionLostReason>>,

    rpc_transport_factory: RpcTransportFactory,

    /// URL of the last connection attempt.
    url: Option<ApiUrl>,

    state: ObservableCell<ClientState>,

    /// Heartbeat timings used until the server sends its [`RpcSettings`].
    idle_timeout: IdleTimeout,
    ping_interval: PingInterval,
}

impl Drop for Inner {
    /// Passes the close reason to the transport, if any.
    fn drop(&mut self) {
        if let Some(sock) = self.sock.take() {
            sock.set_close_reason(self.close_reason);
        }
    }
}

/// Client API RPC client.
pub struct WebSocketRpcClient(RefCell<Inner>);

impl WebSocketRpcClient {
    /// Creates a new [`WebSocketRpcClient`] connecting with transports of the
    /// provided factory.
    #[must_use]
    pub fn new(
        rpc_transport_factory: RpcTransportFactory,
        conf: &conf::Rpc,
    ) -> Self {
        Self(RefCell::new(Inner {
            sock: None,
            heartbeat: None,
            subs: Vec::new(),
            on_close_subscribers: Vec::new(),
            close_reason: ClientDisconnect::RpcClientUnexpectedlyDropped,
            on_connection_loss_subs: Vec::new(),
            rpc_transport_factory,
            url: None,
            state: ObservableCell::new(ClientState::Closed(
                ClosedStateReason::NeverConnected,
            )),
            idle_timeout: IdleTimeout(conf.idle_timeout),
            ping_interval: PingInterval(conf.ping_interval),
        }))
    }

    /// Returns the current [`ClientState`].
    #[inline]
    #[must_use]
    pub fn state(&self) -> ClientState {
        self.0.borrow().state.get()
    }

    /// Asks the server to join the room as the provided member.
    pub fn join_room(
        &self,
        room_id: RoomId,
        member_id: MemberId,
        credential: Credential,
    ) {
        self.send_command(
            room_id,
            Command::JoinRoom {
                member_id,
                credential,
            },
        );
    }

    /// Asks the server to leave the room.
    pub fn leave_room(&self, room_id: RoomId, member_id: MemberId) {
        self.send_command(room_id, Command::LeaveRoom { member_id });
    }

    /// Stops [`Heartbeat`] and notifies
    /// [`WebSocketRpcClient::on_connection_loss`] subscribers.
    fn handle_connection_loss(&self, reason: ConnectionLostReason) {
        log::warn!("RPC connection lost: {}", reason);
        self.0.borrow().state.set(ClientState::Closed(
            ClosedStateReason::ConnectionLost(reason),
        ));
        drop(self.0.borrow_mut().heartbeat.take());
        drop(self.0.borrow_mut().sock.take());
        self.0
            .borrow_mut()
            .on_connection_loss_subs
            .retain(|sub| sub.unbounded_send(reason).is_ok());
    }

    /// Handles every [`CloseMsg`] of the [`RpcTransport`], normal or not.
    fn handle_close_message(&self, close_msg: CloseMsg) {
        drop(self.0.borrow_mut().heartbeat.take());

        match close_msg {
            CloseMsg::Normal(_, CloseByServerReason::Reconnected) => (),
            CloseMsg::Normal(_, CloseByServerReason::Idle) => {
                self.handle_connection_loss(ConnectionLostReason::Idle);
            }
            CloseMsg::Normal(_, reason) => {
                log::info!("RPC connection closed by server: {}", reason);
                self.0.borrow().state.set(ClientState::Closed(
                    ClosedStateReason::ConnectionLost(
                        ConnectionLostReason::WithMessage(close_msg),
                    ),
                ));
                drop(self.0.borrow_mut().sock.take());
                let subs: Vec<_> =
                    self.0.borrow_mut().on_close_subscribers.drain(..).collect();
                for sub in subs {
                    let _ = sub.send(CloseReason::ByServer(reason));
                }
            }
            CloseMsg::Abnormal(_) => {
                self.handle_connection_loss(ConnectionLostReason::WithMessage(
                    close_msg,
                ));
            }
        }
    }

    /// Handles a [`ServerMsg`] received after the connection is established.
    fn on_transport_message(&self, msg: ServerMsg) {
        let event = match msg {
            ServerMsg::Event { room_id, event } => match event {
                Event::RoomJoined { member_id } => RpcEvent::JoinedRoom {
                    room_id,
                    member_id,
                },
                Event::RoomLeft { close_reason } => RpcEvent::LeftRoom {
                    room_id,
                    close_reason: CloseReason::ByServer(close_reason),
                },
                Event::PeerCreated { .. }
                | Event::SdpAnswerMade { .. }
                | Event::LocalDescriptionApplied { .. }
                | Event::IceCandidateDiscovered { .. }
                | Event::PeersRemoved { .. }
                | Event::PeerUpdated { .. }
                | Event::ConnectionQualityUpdated { .. }
                | Event::StateSynchronized { .. } => {
                    RpcEvent::Event { room_id, event }
                }
            },
            ServerMsg::RpcSettings(settings) => {
                if let Some(heartbeat) = self.0.borrow().heartbeat.as_ref() {
                    let (idle_timeout, ping_interval) = timings(settings);
                    heartbeat.update_settings(idle_timeout, ping_interval);
                } else {
                    log::error!(
                        "Failed to update RPC settings: no Heartbeat is running",
                    );
                }
                return;
            }
            ServerMsg::Ping(_) => return,
        };
        self.0
            .borrow_mut()
            .subs
            .retain(|sub| sub.unbounded_send(event.clone()).is_ok());
    }

    /// Tries to establish a new connection with the provided [`ApiUrl`].
    ///
    /// The connection is considered established once the server sends its
    /// [`RpcSettings`].
    async fn establish_connection(
        self: Rc<Self>,
        url: ApiUrl,
    ) -> Result<(), Traced<RpcClientError>> {
        self.0.borrow_mut().url = Some(url.clone());
        self.0.borrow().state.set(ClientState::Connecting);

        let transport_fut = (self.0.borrow().rpc_transport_factory)(url);
        let transport = match transport_fut.await {
            Ok(transport) => transport,
            Err(e) => {
                let reason = ClosedStateReason::CouldNotEstablish(e.into_inner());
                return Err(self.fail_connecting(reason));
            }
        };

        let mut on_message = transport.on_message();
        let (idle_timeout, ping_interval) = {
            let inner = self.0.borrow();
            (inner.idle_timeout, inner.ping_interval)
        };
        let heartbeat =
            Heartbeat::start(Rc::clone(&transport), ping_interval, idle_timeout);
        let mut on_idle = heartbeat.on_idle();

        match future::select(on_message.next(), on_idle.next()).await {
            Either::Left((Some(ServerMsg::RpcSettings(settings)), _)) => {
                let (idle_timeout, ping_interval) = timings(settings);
                heartbeat.update_settings(idle_timeout, ping_interval);
            }
            Either::Left(_) => {
                return Err(self.fail_connecting(
                    ClosedStateReason::FirstServerMsgIsNotRpcSettings,
                ));
            }
            Either::Right(_) => {
                return Err(self.fail_connecting(
                    ClosedStateReason::ConnectionLost(ConnectionLostReason::Idle),
                ));
            }
        }

        let weak_this = Rc::downgrade(&self);
        platform::spawn(async move {
            while on_idle.next().await.is_some() {
                if let Some(this) = weak_this.upgrade() {
                    this.handle_connection_loss(ConnectionLostReason::Idle);
                } else {
                    break;
                }
            }
        });

        let mut state_changes = transport.on_state_change();
        let weak_this = Rc::downgrade(&self);
        platform::spawn(async move {
            while let Some(state) = state_changes.next().await {
                if let Some(this) = weak_this.upgrade() {
                    if let TransportState::Closed(msg) = state {
                        this.handle_close_message(msg);
                    }
                } else {
                    break;
                }
            }
        });

        let weak_this = Rc::downgrade(&self);
        platform::spawn(async move {
            while let Some(msg) = on_message.next().await {
                if let Some(this) = weak_this.upgrade() {
                    this.on_transport_message(msg);
                } else {
                    break;
                }
            }
        });

        {
            let mut inner = self.0.borrow_mut();
            inner.heartbeat = Some(heartbeat);
            drop(inner.sock.replace(transport));
        }
        self.0.borrow().state.set(ClientState::Open);
        log::debug!("RPC connection established");

        Ok(())
    }

    /// Moves into [`ClientState::Closed`] with the provided reason and returns
    /// the error to fail connecting with.
    fn fail_connecting(
        &self,
        reason: ClosedStateReason,
    ) -> Traced<RpcClientError> {
        log::error!("Failed to establish RPC connection: {}", reason);
        self.0.borrow().state.set(ClientState::Closed(reason.clone()));
        tracerr::new!(RpcClientError::ConnectionFailed(reason))
    }

    /// Resolves once the [`ClientState::Connecting`] is over.
    async fn connecting_result(&self) -> Result<(), Traced<RpcClientError>> {
        let mut state_changes = self.0.borrow().state.subscribe();
        while let Some(state) = state_changes.next().await {
            match state {
                ClientState::Open => return Ok(()),
                ClientState::Connecting => (),
                ClientState::Closed(reason) => {
                    return Err(tracerr::new!(
                        RpcClientError::ConnectionFailed(reason)
                    ));
                }
            }
        }
        Err(tracerr::new!(RpcClientError::RpcClientGone))
    }

    /// Connects to the provided [`ApiUrl`], reusing the current connection if
    /// it leads there.
    ///
    /// If connecting to the same [`ApiUrl`] is in progress already, waits for
    /// its result instead of starting a second attempt.
    ///
    /// # Errors
    ///
    /// With [`RpcClientError::ConnectionFailed`] if the transport can't be
    /// created or the server doesn't greet with [`RpcSettings`].
    pub async fn connect(
        self: Rc<Self>,
        url: ApiUrl,
    ) -> Result<(), Traced<RpcClientError>> {
        let same_url = self.0.borrow().url.as_ref() == Some(&url);
        if !same_url {
            return self.establish_connection(url).await;
        }
        let state = self.state();
        match state {
            ClientState::Open => Ok(()),
            ClientState::Connecting => self.connecting_result().await,
            ClientState::Closed(_) => self.establish_connection(url).await,
        }
    }

    /// Subscribes to [`RpcEvent`]s of this [`WebSocketRpcClient`].
    pub fn subscribe(&self) -> LocalBoxStream<'static, RpcEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.0.borrow_mut().subs.push(tx);
        Box::pin(rx)
    }

    /// Sends a [`Command`] of the provided room to the server.
    ///
    /// Does nothing without an established connection.
    pub fn send_command(&self, room_id: RoomId, command: Command) {
        let sock = self.0.borrow().sock.clone();
        if let Some(sock) = sock {
            if let Err(e) = sock
                .send(&ClientMsg::Command { room_id, command })
                .map_err(tracerr::map_from_and_wrap!(=> RpcClientError))
            {
                log::error!("Failed to send command: {}", e);
            }
        }
    }

    /// Returns [`Future`] resolving on a normal connection close by the
    /// server.
    ///
    /// Abnormal closes are reported via
    /// [`WebSocketRpcClient::on_connection_loss`] instead.
    ///
    /// [`Future`]: std::future::Future
    pub fn on_normal_close(
        &self,
    ) -> LocalBoxFuture<'static, Result<CloseReason, oneshot::Canceled>> {
        let (tx, rx) = oneshot::channel();
        self.0.borrow_mut().on_close_subscribers.push(tx);
        Box::pin(rx)
    }

    /// Subscribes to unexpected connection losses.
    pub fn on_connection_loss(
        &self,
    ) -> LocalBoxStream<'static, ConnectionLostReason> {
        let (tx, rx) = mpsc::unbounded();
        self.0.borrow_mut().on_connection_loss_subs.push(tx);
        Box::pin(rx)
    }

    /// Sets the reason passed to the [`RpcTransport`] when this client is
    /// dropped.
    pub fn set_close_reason(&self, close_reason: ClientDisconnect) {
        self.0.borrow_mut().close_reason = close_reason;
    }
}

/// Converts [`RpcSettings`] into [`Heartbeat`] timings.
fn timings(settings: RpcSettings) -> (IdleTimeout, PingInterval) {
    (
        IdleTimeout(Duration::from_millis(settings.idle_timeout_ms.into())),
        PingInterval(Duration::from_millis(settings.ping_interval_ms.into())),
    )
}
