//! Connection loss detection via ping/pong mechanism.

use std::{
    cell::RefCell,
    rc::{Rc, Weak},
    time::Duration,
};

use futures::{channel::mpsc, future, stream::LocalBoxStream, StreamExt as _};
use medea_jason_proto::{ClientMsg, ServerMsg};

use crate::{
    platform::{self, RpcTransport},
    utils::TaskHandle,
};

/// Idle timeout of a [`WebSocketRpcClient`].
///
/// [`WebSocketRpcClient`]: super::WebSocketRpcClient
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IdleTimeout(pub Duration);

/// Ping interval of a [`WebSocketRpcClient`].
///
/// [`WebSocketRpcClient`]: super::WebSocketRpcClient
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PingInterval(pub Duration);

struct Inner {
    /// [`RpcTransport`] which heartbeats.
    transport: Rc<dyn RpcTransport>,

    idle_timeout: IdleTimeout,
    ping_interval: PingInterval,

    /// [`TaskHandle`] of the task answering [`ServerMsg::Ping`]s.
    ping_task: Option<TaskHandle>,

    /// [`TaskHandle`] of the idle watchdog.
    idle_watchdog_task: Option<TaskHandle>,

    /// Number of the last received [`ServerMsg::Ping`].
    last_ping_num: u32,

    /// [`mpsc::UnboundedSender`]s for a [`Heartbeat::on_idle`].
    on_idle_subs: Vec<mpsc::UnboundedSender<()>>,
}

impl Inner {
    /// Sends [`ClientMsg::Pong`] with the provided number, logging failures.
    fn send_pong(&self, n: u32) {
        if let Err(e) = self.transport.send(&ClientMsg::Pong(n)) {
            log::error!("Failed to send pong: {}", e);
        }
    }
}

/// Detector of a connection loss via ping/pong mechanism.
pub struct Heartbeat(Rc<RefCell<Inner>>);

impl Heartbeat {
    /// Starts [`Heartbeat`] for the provided [`RpcTransport`].
    #[must_use]
    pub fn start(
        transport: Rc<dyn RpcTransport>,
        ping_interval: PingInterval,
        idle_timeout: IdleTimeout,
    ) -> Self {
        let inner = Rc::new(RefCell::new(Inner {
            transport,
            idle_timeout,
            ping_interval,
            ping_task: None,
            idle_watchdog_task: None,
            last_ping_num: 0,
            on_idle_subs: Vec::new(),
        }));

        let ping_task = spawn_ping_task(Rc::downgrade(&inner));
        let idle_watchdog_task = spawn_idle_watchdog(Rc::downgrade(&inner));
        inner.borrow_mut().ping_task = Some(ping_task);
        inner.borrow_mut().idle_watchdog_task = Some(idle_watchdog_task);

        Self(inner)
    }

    /// Updates the timings of this [`Heartbeat`].
    ///
    /// Applied starting from the next received message.
    pub fn update_settings(
        &self,
        idle_timeout: IdleTimeout,
        ping_interval: PingInterval,
    ) {
        let mut inner = self.0.borrow_mut();
        inner.idle_timeout = idle_timeout;
        inner.ping_interval = ping_interval;
    }

    /// Returns [`LocalBoxStream`] yielding `()` each time the
    /// [`RpcTransport`] is considered idle.
    #[must_use]
    pub fn on_idle(&self) -> LocalBoxStream<'static, ()> {
        let (tx, rx) = mpsc::unbounded();
        self.0.borrow_mut().on_idle_subs.push(tx);
        Box::pin(rx)
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        let mut inner = self.0.borrow_mut();
        drop(inner.ping_task.take());
        drop(inner.idle_watchdog_task.take());
    }
}

/// Spawns the idle watchdog.
///
/// After two ping intervals without server messages it probes the server with
/// a [`ClientMsg::Pong`]. After the idle timeout it notifies
/// [`Heartbeat::on_idle`] subscribers.
fn spawn_idle_watchdog(weak_inner: Weak<RefCell<Inner>>) -> TaskHandle {
    let (fut, abort) = future::abortable(async move {
        let (wait_for_ping, idle_timeout) = match weak_inner.upgrade() {
            Some(inner) => {
                let inner = inner.borrow();
                (inner.ping_interval.0 * 2, inner.idle_timeout.0)
            }
            None => return,
        };
        platform::delay_for(wait_for_ping).await;

        if let Some(inner) = weak_inner.upgrade() {
            let inner = inner.borrow();
            inner.send_pong(inner.last_ping_num + 1);
        } else {
            return;
        }

        platform::delay_for(idle_timeout.saturating_sub(wait_for_ping)).await;
        if let Some(inner) = weak_inner.upgrade() {
            log::warn!("Heartbeat considers connection idle");
            inner
                .borrow_mut()
                .on_idle_subs
                .retain(|sub| sub.unbounded_send(()).is_ok());
        }
    });
    platform::spawn(async move {
        let _ = fut.await;
    });

    abort.into()
}

/// Spawns the task answering [`ServerMsg::Ping`]s and renewing the idle
/// watchdog on every server message.
fn spawn_ping_task(weak_inner: Weak<RefCell<Inner>>) -> TaskHandle {
    let mut on_message = match weak_inner.upgrade() {
        Some(inner) => inner.borrow().transport.on_message(),
        None => Box::pin(futures::stream::empty()),
    };
    let (fut, abort) = future::abortable(async move {
        while let Some(msg) = on_message.next().await {
            let inner = if let Some(inner) = weak_inner.upgrade() {
                inner
            } else {
                break;
            };
            let watchdog = spawn_idle_watchdog(Rc::downgrade(&inner));
            drop(inner.borrow_mut().idle_watchdog_task.replace(watchdog));

            if let ServerMsg::Ping(num) = msg {
                inner.borrow_mut().last_ping_num = num;
                inner.borrow().send_pong(num);
            }
        }
    });
    platform::spawn(async move {
        let _ = fut.await;
    });

    abort.into()
}

#[cfg(test)]
mod spec {
    use std::cell::Cell;

    use medea_jason_proto::RpcSettings;
    use tokio::task::LocalSet;

    use super::*;
    use crate::utils::test::FakeTransport;

    fn heartbeat(transport: &Rc<FakeTransport>) -> Heartbeat {
        Heartbeat::start(
            Rc::clone(transport) as Rc<dyn RpcTransport>,
            PingInterval(Duration::from_secs(3)),
            IdleTimeout(Duration::from_secs(10)),
        )
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn answers_pings_with_pongs() {
        LocalSet::new()
            .run_until(async {
                let transport = Rc::new(FakeTransport::default());
                let _hb = heartbeat(&transport);
                tokio::task::yield_now().await;

                transport.push(ServerMsg::Ping(7));
                tokio::task::yield_now().await;

                assert_eq!(*transport.sent.borrow(), vec![ClientMsg::Pong(7)]);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn probes_and_then_reports_idle() {
        LocalSet::new()
            .run_until(async {
                let transport = Rc::new(FakeTransport::default());
                let hb = heartbeat(&transport);
                let mut on_idle = hb.on_idle();
                transport.push(ServerMsg::Ping(1));
                tokio::task::yield_now().await;

                tokio::time::sleep(Duration::from_millis(6100)).await;
                assert_eq!(
                    *transport.sent.borrow(),
                    vec![ClientMsg::Pong(1), ClientMsg::Pong(2)],
                );

                tokio::time::sleep(Duration::from_secs(4)).await;
                assert_eq!(on_idle.next().await, Some(()));
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn server_messages_postpone_idle() {
        LocalSet::new()
            .run_until(async {
                let transport = Rc::new(FakeTransport::default());
                let hb = heartbeat(&transport);
                let idle = Rc::new(Cell::new(false));
                let mut on_idle = hb.on_idle();
                platform::spawn({
                    let idle = Rc::clone(&idle);
                    async move {
                        if on_idle.next().await.is_some() {
                            idle.set(true);
                        }
                    }
                });

                for _ in 0..5 {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    transport.push(ServerMsg::RpcSettings(RpcSettings {
                        idle_timeout_ms: 10_000,
                        ping_interval_ms: 3_000,
                    }));
                }
                tokio::task::yield_now().await;

                assert!(!idle.get());
            })
            .await;
    }
}
