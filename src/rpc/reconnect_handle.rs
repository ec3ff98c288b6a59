//! Reconnection for [`RpcSession`].

use std::time::Duration;

use derive_more::{Display, From};
use tracerr::Traced;

use crate::{
    conf,
    platform,
    rpc::{BackoffDelayer, RpcSession, SessionError},
    utils::{Handle, HandleDetachedError},
};

/// Errors of a [`ReconnectHandle`].
#[derive(Clone, Debug, Display, From, PartialEq)]
pub enum ReconnectError {
    /// [`RpcSession`] is gone or its room was closed.
    #[display(fmt = "{}", _0)]
    Detached(HandleDetachedError),

    /// [`RpcSession`] failed to reconnect.
    #[display(fmt = "{}", _0)]
    Session(SessionError),
}

/// Handle the host reconnects to the media server with on a connection
/// loss.
///
/// Provided into the `on_connection_loss` callback of a room.
#[derive(Clone, Debug)]
pub struct ReconnectHandle {
    session: Handle<dyn RpcSession>,

    /// Settings of the [`ReconnectHandle::reconnect_with_default_backoff()`].
    conf: conf::Rpc,
}

impl ReconnectHandle {
    /// Instantiates a new [`ReconnectHandle`] from the provided
    /// [`RpcSession`] [`Handle`].
    #[inline]
    #[must_use]
    pub fn new(session: Handle<dyn RpcSession>, conf: conf::Rpc) -> Self {
        Self { session, conf }
    }

    /// Tries to reconnect after the provided delay in milliseconds.
    ///
    /// If the [`RpcSession`] is reconnecting already, then a new attempt
    /// won't be performed. Instead, the outcome of the in-flight one is
    /// returned.
    ///
    /// # Errors
    ///
    /// With [`ReconnectError::Detached`] if the [`RpcSession`] is gone.
    ///
    /// With [`ReconnectError::Session`] if the attempt fails.
    pub async fn reconnect_with_delay(
        &self,
        delay_ms: u32,
    ) -> Result<(), Traced<ReconnectError>> {
        platform::delay_for(Duration::from_millis(u64::from(delay_ms))).await;

        let session = self
            .session
            .upgrade()
            .map_err(tracerr::map_from_and_wrap!(=> ReconnectError))?;
        session
            .reconnect()
            .await
            .map_err(tracerr::map_from_and_wrap!(=> ReconnectError))
    }

    /// Tries to reconnect the [`RpcSession`] in a loop with a growing backoff
    /// delay.
    ///
    /// The first attempt happens immediately. The delay after the `n`th
    /// failed attempt is `min(starting_delay_ms * multiplier^n, max_delay)`,
    /// and a negative `multiplier` is considered as `0.0`.
    ///
    /// Gives up once the next attempt would start after
    /// `max_elapsed_time_ms`, if provided, or after
    /// [`MAX_IMMEDIATE_RETRIES`] retries in a row without a delay. Terminal
    /// failures, such as a finished session or a rejected authorization, are
    /// never retried.
    ///
    /// Joins an in-flight reconnection, if any.
    ///
    /// # Errors
    ///
    /// With [`ReconnectError::Detached`] if the [`RpcSession`] is gone.
    ///
    /// With the last [`ReconnectError::Session`] if reconnection fails.
    ///
    /// [`MAX_IMMEDIATE_RETRIES`]: super::MAX_IMMEDIATE_RETRIES
    pub async fn reconnect_with_backoff(
        &self,
        starting_delay_ms: u32,
        multiplier: f64,
        max_delay: u32,
        max_elapsed_time_ms: Option<u32>,
    ) -> Result<(), Traced<ReconnectError>> {
        let delayer = BackoffDelayer::new(
            Duration::from_millis(u64::from(starting_delay_ms)),
            multiplier,
            Duration::from_millis(u64::from(max_delay)),
            max_elapsed_time_ms.map(|ms| Duration::from_millis(u64::from(ms))),
        );
        self.retry(delayer).await
    }

    /// Same as [`ReconnectHandle::reconnect_with_backoff()`] with the
    /// configured [`conf::Rpc`] reconnection settings.
    ///
    /// # Errors
    ///
    /// See [`ReconnectHandle::reconnect_with_backoff()`].
    pub async fn reconnect_with_default_backoff(
        &self,
    ) -> Result<(), Traced<ReconnectError>> {
        let delayer = BackoffDelayer::new(
            self.conf.reconnect_start_delay,
            self.conf.reconnect_multiplier,
            self.conf.reconnect_max_delay,
            self.conf.reconnect_max_elapsed,
        );
        self.retry(delayer).await
    }

    /// Reconnects the [`RpcSession`] until success, a terminal failure or
    /// the [`BackoffDelayer`] running out.
    async fn retry(
        &self,
        delayer: BackoffDelayer,
    ) -> Result<(), Traced<ReconnectError>> {
        delayer
            .retry(|| async {
                let session = self
                    .session
                    .upgrade()
                    .map_err(tracerr::map_from_and_wrap!(=> ReconnectError))
                    .map_err(backoff::Error::Permanent)?;
                session.reconnect().await.map_err(|e| {
                    let err: &SessionError = e.as_ref();
                    let is_terminal = matches!(
                        err,
                        SessionError::SessionFinished(_)
                            | SessionError::AuthorizationFailed
                            | SessionError::NoCredentials
                    );
                    let e = tracerr::map_from_and_wrap!(=> ReconnectError)(e);
                    if is_terminal {
                        backoff::Error::Permanent(e)
                    } else {
                        log::debug!("Reconnection attempt failed: {}", e);
                        backoff::Error::Transient(e)
                    }
                })
            })
            .await
    }
}

#[cfg(test)]
mod spec {
    use std::{
        cell::{Cell, RefCell},
        rc::{Rc, Weak},
    };

    use futures::{FutureExt as _, StreamExt as _};
    use medea_jason_proto::CloseReason as CloseByServerReason;
    use tokio::task::LocalSet;

    use super::*;
    use crate::{
        platform::{RpcTransportFactory, TransportError, TransportState},
        rpc::{
            CloseMsg, ConnectionInfo, WebSocketRpcClient, WebSocketRpcSession,
        },
        utils::{
            test::{transport_factory, FakeTransport},
            HandleSlot, HandleTable,
        },
    };

    type Transports = Rc<RefCell<Vec<Rc<FakeTransport>>>>;

    struct Fixture {
        session: Rc<WebSocketRpcSession>,
        transports: Transports,
        table: Rc<HandleTable>,
        slot: HandleSlot,
    }

    impl Fixture {
        fn new(
            factory: impl FnOnce(Transports) -> RpcTransportFactory,
        ) -> Self {
            let transports = Transports::default();
            let client = Rc::new(WebSocketRpcClient::new(
                factory(Rc::clone(&transports)),
                &conf::Rpc::default(),
            ));
            let table = HandleTable::new();
            let slot = HandleSlot::new(&table);
            Self {
                session: WebSocketRpcSession::new(client),
                transports,
                table,
                slot,
            }
        }

        fn handle(&self) -> ReconnectHandle {
            let session: Weak<dyn RpcSession> =
                Rc::<WebSocketRpcSession>::downgrade(&self.session);
            ReconnectHandle::new(
                self.slot.handle(session),
                conf::Rpc::default(),
            )
        }

        async fn open_and_lose(&self) {
            let info: ConnectionInfo =
                "ws://localhost/ws/room/alice?token=secret".parse().unwrap();
            Rc::clone(&self.session).connect(info).await.unwrap();
            let mut on_loss = self.session.on_connection_loss();
            self.transports
                .borrow()
                .last()
                .unwrap()
                .set_state(TransportState::Closed(CloseMsg::Abnormal(1006)));
            on_loss.next().await.unwrap();
        }
    }

    /// [`RpcTransportFactory`] failing to create transports while the
    /// returned flag is `true`.
    fn flaky_factory(
        unreachable: Rc<Cell<bool>>,
    ) -> impl FnOnce(Transports) -> RpcTransportFactory {
        move |transports| {
            let fallback = transport_factory(transports);
            Box::new(move |url| {
                if unreachable.get() {
                    async { Err(tracerr::new!(TransportError::InitSocket)) }
                        .boxed_local()
                } else {
                    fallback(url)
                }
            })
        }
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn reconnects_after_delay() {
        LocalSet::new()
            .run_until(async {
                let fixture = Fixture::new(transport_factory);
                fixture.open_and_lose().await;
                let started = tokio::time::Instant::now();

                fixture.handle().reconnect_with_delay(1000).await.unwrap();

                assert!(started.elapsed() >= Duration::from_secs(1));
                assert_eq!(fixture.transports.borrow().len(), 2);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn parallel_requests_share_one_attempt() {
        LocalSet::new()
            .run_until(async {
                let fixture = Fixture::new(transport_factory);
                fixture.open_and_lose().await;
                let handle = fixture.handle();

                let (first, second) = futures::join!(
                    handle.reconnect_with_delay(0),
                    handle.reconnect_with_backoff(100, 2.0, 1000, None),
                );

                assert!(first.is_ok());
                assert!(second.is_ok());
                assert_eq!(fixture.transports.borrow().len(), 2);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn backoff_retries_until_server_is_reachable() {
        LocalSet::new()
            .run_until(async {
                let unreachable = Rc::new(Cell::new(false));
                let fixture =
                    Fixture::new(flaky_factory(Rc::clone(&unreachable)));
                fixture.open_and_lose().await;
                unreachable.set(true);
                platform::spawn({
                    let unreachable = Rc::clone(&unreachable);
                    async move {
                        tokio::time::sleep(Duration::from_millis(1200)).await;
                        unreachable.set(false);
                    }
                });
                let started = tokio::time::Instant::now();

                fixture
                    .handle()
                    .reconnect_with_backoff(500, 2.0, 5000, None)
                    .await
                    .unwrap();

                assert_eq!(started.elapsed(), Duration::from_millis(1500));
                assert_eq!(fixture.transports.borrow().len(), 2);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn backoff_gives_up_after_max_elapsed() {
        LocalSet::new()
            .run_until(async {
                let unreachable = Rc::new(Cell::new(false));
                let fixture =
                    Fixture::new(flaky_factory(Rc::clone(&unreachable)));
                fixture.open_and_lose().await;
                unreachable.set(true);
                let started = tokio::time::Instant::now();

                let err = fixture
                    .handle()
                    .reconnect_with_backoff(500, 1.0, 5000, Some(2000))
                    .await
                    .unwrap_err();

                assert!(matches!(
                    err.into_inner(),
                    ReconnectError::Session(SessionError::ConnectionLost(_)),
                ));
                assert!(started.elapsed() <= Duration::from_secs(2));
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn zero_multiplier_caps_attempts() {
        LocalSet::new()
            .run_until(async {
                let unreachable = Rc::new(Cell::new(false));
                let fixture =
                    Fixture::new(flaky_factory(Rc::clone(&unreachable)));
                fixture.open_and_lose().await;
                unreachable.set(true);
                let started = tokio::time::Instant::now();

                let res = fixture
                    .handle()
                    .reconnect_with_backoff(100, -1.0, 1000, None)
                    .await;

                assert!(res.is_err());
                assert_eq!(started.elapsed(), Duration::from_millis(100));
            })
            .await;
    }
    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn finished_session_is_not_retried() {
        LocalSet::new()
            .run_until(async {
                let fixture = Fixture::new(transport_factory);
                fixture.open_and_lose().await;
                Rc::clone(&fixture.session)
                    .reconnect()
                    .await
                    .unwrap();
                fixture.transports.borrow()[1].set_state(
                    TransportState::Closed(CloseMsg::Normal(
                        1000,
                        CloseByServerReason::Rejected,
                    )),
                );
                tokio::task::yield_now().await;
                let started = tokio::time::Instant::now();

                let err = fixture
                    .handle()
                    .reconnect_with_default_backoff()
                    .await
                    .unwrap_err();

                assert!(matches!(
                    err.into_inner(),
                    ReconnectError::Session(SessionError::SessionFinished(_)),
                ));
                assert_eq!(started.elapsed(), Duration::ZERO);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn detaches_once_table_is_disposed() {
        LocalSet::new()
            .run_until(async {
                let fixture = Fixture::new(transport_factory);
                let handle = fixture.handle();

                fixture.table.dispose();

                assert_eq!(
                    handle
                        .reconnect_with_delay(0)
                        .await
                        .unwrap_err()
                        .into_inner(),
                    ReconnectError::Detached(HandleDetachedError),
                );
                assert_eq!(
                    handle
                        .reconnect_with_default_backoff()
                        .await
                        .unwrap_err()
                        .into_inner(),
                    ReconnectError::Detached(HandleDetachedError),
                );
            })
            .await;
    }

}
