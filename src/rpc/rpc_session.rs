//! Room-scoped session over a [`WebSocketRpcClient`].

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use async_trait::async_trait;
use derivative::Derivative;
use derive_more::Display;
use futures::{
    channel::mpsc,
    future::{self, LocalBoxFuture},
    stream::LocalBoxStream,
    StreamExt as _,
};
use medea_jason_proto::{Command, Event, MemberId, RoomId};
use medea_reactive::ObservableCell;
use tracerr::Traced;

use crate::platform;

use super::{
    websocket::RpcEventHandler, ClientDisconnect, CloseReason, ConnectionInfo,
    ConnectionLostReason, RpcClientError, WebSocketRpcClient,
};

/// Errors of a [`WebSocketRpcSession`].
#[derive(Clone, Debug, Display, PartialEq)]
pub enum SessionError {
    /// Session is [`SessionState::Finished`] and can't be used anymore.
    #[display(fmt = "RPC Session finished with {} close reason", _0)]
    SessionFinished(CloseReason),

    /// Session has no [`ConnectionInfo`] to authorize with.
    #[display(fmt = "RPC Session doesn't have any credentials to authorize with")]
    NoCredentials,

    /// Server rejected the authorization.
    #[display(fmt = "Failed to authorize RPC session")]
    AuthorizationFailed,

    /// [`WebSocketRpcClient`] failed.
    #[display(fmt = "RpcClientError: {}", _0)]
    RpcClient(RpcClientError),

    /// Session was dropped while connecting.
    #[display(fmt = "RPC Session was unexpectedly dropped")]
    SessionUnexpectedlyDropped,

    /// Connection with the server was lost while connecting.
    #[display(fmt = "Connection with a server was lost: {}", _0)]
    ConnectionLost(SessionLostReason),

    /// Another [`ConnectionInfo`] was provided while connecting, so the
    /// previous attempt was abandoned.
    #[display(fmt = "New connection info was provided")]
    NewConnectionInfo,

    /// Session is authorized already with another [`ConnectionInfo`].
    #[display(fmt = "RPC Session is already opened with other credentials")]
    AlreadyOpened,
}

/// Reason of why a [`WebSocketRpcSession`] lost its connection.
#[derive(Clone, Debug, Display, PartialEq)]
pub enum SessionLostReason {
    /// [`WebSocketRpcClient::connect`] failed.
    #[display(fmt = "{}", _0)]
    ConnectError(RpcClientError),

    /// [`WebSocketRpcClient`] reported a connection loss.
    #[display(fmt = "{}", _0)]
    Lost(ConnectionLostReason),
}

/// State of a [`WebSocketRpcSession`].
///
/// ```text
///  +---------------+
///  | Uninitialized |<-----------------------+
///  +-------+-------+                        |
///          v                                |
///  +-------+-------+                        |
///  |  Initialized  |                        |
///  +-------+-------+                        |
///          v                                |
///  +-------+-------+      +----------+      |
///  |  Connecting   +----->+   Lost   |      |
///  +-------+-------+<-----+          |      |
///          v              +-+------+-+      |
///  +-------+-------+        ^      ^        |
///  |  Authorizing  +--------+      |        |
///  +-------+-------+---------------|--------+
///          v                       |
///  +-------+-------+               |
///  |    Opened     +---------------+
///  +-------+-------+
///          v
///  +-------+-------+
///  |   Finished    |
///  +---------------+
/// ```
#[derive(Clone, Debug, Derivative)]
#[derivative(PartialEq)]
pub enum SessionState {
    /// No [`ConnectionInfo`] to authorize with.
    Uninitialized,

    /// [`ConnectionInfo`] is provided, but no connection attempts were made.
    Initialized(Rc<ConnectionInfo>),

    /// Transport connection is being established.
    Connecting(Rc<ConnectionInfo>),

    /// Transport is established and the session is being authorized.
    Authorizing(Rc<ConnectionInfo>),

    /// Connection was lost, but may be recovered.
    Lost(
        #[derivative(PartialEq = "ignore")] SessionLostReason,
        Rc<ConnectionInfo>,
    ),

    /// Session is authorized and operational.
    Opened(Rc<ConnectionInfo>),

    /// Terminal state.
    Finished(CloseReason),
}

/// Client API RPC session of a single room.
#[async_trait(?Send)]
#[cfg_attr(feature = "mockable", mockall::automock)]
pub trait RpcSession {
    /// Connects and authorizes with the provided [`ConnectionInfo`].
    ///
    /// Joins an in-flight connection attempt with the same
    /// [`ConnectionInfo`] instead of starting another one. Resolves
    /// immediately if the session is opened already.
    async fn connect(
        self: Rc<Self>,
        connection_info: ConnectionInfo,
    ) -> Result<(), Traced<SessionError>>;

    /// Reconnects with the last provided [`ConnectionInfo`].
    ///
    /// Joins an in-flight connection attempt, if any.
    async fn reconnect(self: Rc<Self>) -> Result<(), Traced<SessionError>>;

    /// Returns [`LocalBoxStream`] of the [`Event`]s of the room.
    fn subscribe(&self) -> LocalBoxStream<'static, Event>;

    /// Sends the provided [`Command`] if the session is opened.
    fn send_command(&self, command: Command);

    /// Returns [`Future`] resolving once the session is finished.
    ///
    /// [`Future`]: std::future::Future
    fn on_normal_close(&self) -> LocalBoxFuture<'static, CloseReason>;

    /// Finishes the session with the provided reason.
    fn close_with_reason(&self, close_reason: ClientDisconnect);

    /// Returns [`LocalBoxStream`] yielding once per loss of an opened
    /// connection.
    fn on_connection_loss(&self) -> LocalBoxStream<'static, ()>;

    /// Returns [`LocalBoxStream`] yielding each time the session is opened
    /// again after a connection loss.
    fn on_reconnected(&self) -> LocalBoxStream<'static, ()>;
}

/// [`RpcSession`] authorizing in a room over a [`WebSocketRpcClient`].
pub struct WebSocketRpcSession {
    client: Rc<WebSocketRpcClient>,

    state: ObservableCell<SessionState>,

    /// Indicates whether the connection was lost after being opened, so
    /// losses and reconnects are reported.
    can_reconnect: Rc<Cell<bool>>,

    /// [`RpcSession::subscribe`] subscribers.
    event_txs: RefCell<Vec<mpsc::UnboundedSender<Event>>>,
}

impl WebSocketRpcSession {
    /// Creates a new [`SessionState::Uninitialized`] [`WebSocketRpcSession`]
    /// and spawns its tasks.
    #[must_use]
    pub fn new(client: Rc<WebSocketRpcClient>) -> Rc<Self> {
        let this = Rc::new(Self {
            client,
            state: ObservableCell::new(SessionState::Uninitialized),
            can_reconnect: Rc::new(Cell::new(false)),
            event_txs: RefCell::default(),
        });

        this.spawn_state_watcher();
        this.spawn_connection_loss_watcher();
        this.spawn_close_watcher();
        this.spawn_server_msg_listener();

        this
    }

    /// Returns the current [`SessionState`].
    #[inline]
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Moves towards [`SessionState::Opened`] and waits for the outcome.
    async fn inner_connect(self: Rc<Self>) -> Result<(), Traced<SessionError>> {
        use SessionError as E;
        use SessionState as S;

        match self.state.get() {
            S::Connecting(_) | S::Authorizing(_) | S::Opened(_) => {}
            S::Initialized(info) | S::Lost(_, info) => {
                self.state.set(S::Connecting(info));
            }
            S::Uninitialized => return Err(tracerr::new!(E::NoCredentials)),
            S::Finished(reason) => {
                return Err(tracerr::new!(E::SessionFinished(reason)));
            }
        }

        let mut state_updates = self.state.subscribe();
        drop(self);
        while let Some(state) = state_updates.next().await {
            match state {
                S::Opened(_) => return Ok(()),
                S::Initialized(_) => {
                    return Err(tracerr::new!(E::NewConnectionInfo));
                }
                S::Lost(reason, _) => {
                    return Err(tracerr::new!(E::ConnectionLost(reason)));
                }
                S::Uninitialized => {
                    return Err(tracerr::new!(E::AuthorizationFailed));
                }
                S::Finished(reason) => {
                    return Err(tracerr::new!(E::SessionFinished(reason)));
                }
                S::Connecting(_) | S::Authorizing(_) => {}
            }
        }

        Err(tracerr::new!(E::SessionUnexpectedlyDropped))
    }

    /// Drives the transport connection and authorization on
    /// [`SessionState`] changes.
    fn spawn_state_watcher(self: &Rc<Self>) {
        use SessionState as S;

        let mut state_updates = self.state.subscribe();
        let weak_this = Rc::downgrade(self);
        platform::spawn(async move {
            while let Some(state) = state_updates.next().await {
                let this = if let Some(this) = weak_this.upgrade() {
                    this
                } else {
                    break;
                };
                match state {
                    S::Connecting(info) => {
                        let res = Rc::clone(&this.client)
                            .connect(info.url().clone())
                            .await;
                        if this.state.get() != S::Connecting(Rc::clone(&info)) {
                            continue;
                        }
                        match res {
                            Ok(()) => this.state.set(S::Authorizing(info)),
                            Err(e) => {
                                log::error!("RPC Session failed to connect: {}", e);
                                this.state.set(S::Lost(
                                    SessionLostReason::ConnectError(
                                        e.into_inner(),
                                    ),
                                    info,
                                ));
                            }
                        }
                    }
                    S::Authorizing(info) => {
                        this.client.join_room(
                            info.room_id().clone(),
                            info.member_id().clone(),
                            info.credential().clone(),
                        );
                    }
                    S::Opened(_) => {
                        log::debug!("RPC Session opened");
                    }
                    S::Uninitialized
                    | S::Initialized(_)
                    | S::Lost(..)
                    | S::Finished(_) => {}
                }
            }
        });
    }

    /// Moves into [`SessionState::Lost`] on [`WebSocketRpcClient`]
    /// connection losses.
    fn spawn_connection_loss_watcher(self: &Rc<Self>) {
        use SessionState as S;

        let mut on_connection_loss = self.client.on_connection_loss();
        let weak_this = Rc::downgrade(self);
        platform::spawn(async move {
            while let Some(reason) = on_connection_loss.next().await {
                let this = if let Some(this) = weak_this.upgrade() {
                    this
                } else {
                    break;
                };
                let state = this.state.get();
                if matches!(state, S::Opened(_)) {
                    this.can_reconnect.set(true);
                }
                match state {
                    S::Connecting(info)
                    | S::Authorizing(info)
                    | S::Opened(info) => {
                        this.state
                            .set(S::Lost(SessionLostReason::Lost(reason), info));
                    }
                    S::Uninitialized
                    | S::Initialized(_)
                    | S::Lost(..)
                    | S::Finished(_) => {}
                }
            }
        });
    }

    /// Moves into [`SessionState::Finished`] once the server closes the
    /// connection normally.
    fn spawn_close_watcher(self: &Rc<Self>) {
        let on_normal_close = self.client.on_normal_close();
        let weak_this = Rc::downgrade(self);
        platform::spawn(async move {
            let reason = on_normal_close.await.unwrap_or_else(|_| {
                ClientDisconnect::RpcClientUnexpectedlyDropped.into()
            });
            if let Some(this) = weak_this.upgrade() {
                this.state.set(SessionState::Finished(reason));
            }
        });
    }

    /// Dispatches [`WebSocketRpcClient`] events to this session.
    fn spawn_server_msg_listener(self: &Rc<Self>) {
        let mut server_msgs = self.client.subscribe();
        let weak_this = Rc::downgrade(self);
        platform::spawn(async move {
            while let Some(msg) = server_msgs.next().await {
                if let Some(this) = weak_this.upgrade() {
                    msg.dispatch_with(this.as_ref());
                } else {
                    break;
                }
            }
        });
    }
}

#[async_trait(?Send)]
impl RpcSession for WebSocketRpcSession {
    async fn connect(
        self: Rc<Self>,
        connection_info: ConnectionInfo,
    ) -> Result<(), Traced<SessionError>> {
        use SessionState as S;

        match self.state.get() {
            S::Uninitialized | S::Initialized(_) | S::Lost(..) => {
                self.state.set(S::Initialized(Rc::new(connection_info)));
            }
            S::Connecting(info) => {
                if *info != connection_info {
                    self.state.set(S::Initialized(Rc::new(connection_info)));
                }
            }
            S::Authorizing(info) | S::Opened(info) => {
                if *info != connection_info {
                    return Err(tracerr::new!(SessionError::AlreadyOpened));
                }
            }
            S::Finished(reason) => {
                return Err(tracerr::new!(SessionError::SessionFinished(
                    reason
                )));
            }
        }

        self.inner_connect().await.map_err(tracerr::wrap!())
    }

    async fn reconnect(self: Rc<Self>) -> Result<(), Traced<SessionError>> {
        self.inner_connect().await.map_err(tracerr::wrap!())
    }

    fn subscribe(&self) -> LocalBoxStream<'static, Event> {
        let (tx, rx) = mpsc::unbounded();
        self.event_txs.borrow_mut().push(tx);
        Box::pin(rx)
    }

    fn send_command(&self, command: Command) {
        if let SessionState::Opened(info) = self.state.get() {
            self.client.send_command(info.room_id().clone(), command);
        } else {
            log::warn!("Command is dropped since RPC Session is not opened");
        }
    }

    fn on_normal_close(&self) -> LocalBoxFuture<'static, CloseReason> {
        let mut finished = self.state.subscribe().filter_map(|s| {
            future::ready(if let SessionState::Finished(reason) = s {
                Some(reason)
            } else {
                None
            })
        });
        Box::pin(async move {
            finished.next().await.unwrap_or_else(|| {
                ClientDisconnect::SessionUnexpectedlyDropped.into()
            })
        })
    }

    /// Leaves the room if opened, and passes the `close_reason` to the
    /// [`WebSocketRpcClient`].
    fn close_with_reason(&self, close_reason: ClientDisconnect) {
        if let SessionState::Opened(info) = self.state.get() {
            self.client
                .leave_room(info.room_id().clone(), info.member_id().clone());
        }
        self.client.set_close_reason(close_reason);
        self.state.set(SessionState::Finished(close_reason.into()));
    }

    /// Yields once per transition from [`SessionState::Opened`] into
    /// [`SessionState::Lost`], so failed reconnection attempts are not
    /// reported as new losses.
    fn on_connection_loss(&self) -> LocalBoxStream<'static, ()> {
        let mut was_opened = false;
        Box::pin(self.state.subscribe().filter_map(move |state| {
            let lost = match state {
                SessionState::Opened(_) => {
                    was_opened = true;
                    false
                }
                SessionState::Lost(..) => std::mem::take(&mut was_opened),
                _ => false,
            };
            future::ready(if lost { Some(()) } else { None })
        }))
    }

    fn on_reconnected(&self) -> LocalBoxStream<'static, ()> {
        let can_reconnect = Rc::clone(&self.can_reconnect);
        Box::pin(self.state.subscribe().filter_map(move |state| {
            future::ready(
                if matches!(state, SessionState::Opened(_))
                    && can_reconnect.get()
                {
                    Some(())
                } else {
                    None
                },
            )
        }))
    }
}

impl RpcEventHandler for WebSocketRpcSession {
    type Output = ();

    /// Opens an [`SessionState::Authorizing`] session of the same room and
    /// member.
    fn on_joined_room(&self, room_id: RoomId, member_id: MemberId) {
        if let SessionState::Authorizing(info) = self.state.get() {
            if *info.room_id() == room_id && *info.member_id() == member_id {
                self.state.set(SessionState::Opened(info));
            }
        }
    }

    /// Finishes an opened session, or resets an authorizing one since the
    /// server rejected it.
    fn on_left_room(&self, room_id: RoomId, close_reason: CloseReason) {
        match self.state.get() {
            SessionState::Opened(info) if *info.room_id() == room_id => {
                self.state.set(SessionState::Finished(close_reason));
            }
            SessionState::Authorizing(info) if *info.room_id() == room_id => {
                self.state.set(SessionState::Uninitialized);
            }
            _ => {}
        }
    }

    /// Forwards [`Event`]s of the opened room to the subscribers.
    fn on_event(&self, room_id: RoomId, event: Event) {
        if let SessionState::Opened(info) = self.state.get() {
            if *info.room_id() == room_id {
                self.event_txs
                    .borrow_mut()
                    .retain(|tx| tx.unbounded_send(event.clone()).is_ok());
            }
        }
    }
}
