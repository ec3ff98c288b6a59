//! General library interface.

use std::{cell::RefCell, rc::Rc};

use futures::FutureExt as _;

use crate::{
    conf::Conf,
    media::{MediaManager, MediaManagerHandle},
    platform::{self, MediaDevices, PeerConnectionFactory, RpcTransportFactory},
    room::{Room, RoomHandle},
    rpc::{
        ClientDisconnect, RpcSession, WebSocketRpcClient, WebSocketRpcSession,
    },
    utils::HandleTable,
};

/// General library interface.
///
/// Responsible for managing shared transports, local media and room
/// initialization.
pub struct Jason(Rc<RefCell<Inner>>);

/// Inner representation if a [`Jason`].
struct Inner {
    /// [`Jason`]s [`MediaManager`].
    ///
    /// It's shared across [`Room`]s since [`MediaManager`] contains media
    /// tracks that can be used by multiple [`Room`]s.
    media_manager: MediaManager,

    /// [`Room`]s maintained by this [`Jason`] instance.
    rooms: Vec<Room>,

    /// Factory of the signaling transports, shared by the RPC clients of all
    /// the [`Room`]s.
    transport_factory: Rc<RpcTransportFactory>,

    /// Factory of the platform peer connections.
    peer_factory: PeerConnectionFactory,

    /// [`HandleTable`] every host handle of this [`Jason`] is registered in.
    table: Rc<HandleTable>,

    conf: Conf,
}

impl Jason {
    /// Instantiates a new [`Jason`] interface with the default [`Conf`].
    #[inline]
    #[must_use]
    pub fn new(
        transport_factory: RpcTransportFactory,
        peer_factory: PeerConnectionFactory,
        media_devices: Rc<dyn MediaDevices>,
    ) -> Self {
        Self::with_conf(
            Conf::default(),
            transport_factory,
            peer_factory,
            media_devices,
        )
    }

    /// Instantiates a new [`Jason`] interface with the provided [`Conf`] and
    /// platform factories.
    #[must_use]
    pub fn with_conf(
        conf: Conf,
        transport_factory: RpcTransportFactory,
        peer_factory: PeerConnectionFactory,
        media_devices: Rc<dyn MediaDevices>,
    ) -> Self {
        let table = HandleTable::new();
        Self(Rc::new(RefCell::new(Inner {
            media_manager: MediaManager::new(media_devices, &table),
            rooms: Vec::new(),
            transport_factory: Rc::new(transport_factory),
            peer_factory,
            table,
            conf,
        })))
    }

    /// Creates a new [`Room`] and returns its [`RoomHandle`].
    #[must_use]
    pub fn init_room(&self) -> RoomHandle {
        let rpc = {
            let inner = self.0.borrow();
            let factory = Rc::clone(&inner.transport_factory);
            WebSocketRpcClient::new(
                Box::new(move |url| (factory)(url)),
                &inner.conf.rpc,
            )
        };
        self.inner_init_room(WebSocketRpcSession::new(Rc::new(rpc)))
    }

    /// Returns a [`MediaManagerHandle`].
    #[inline]
    #[must_use]
    pub fn media_manager(&self) -> MediaManagerHandle {
        self.0.borrow().media_manager.new_handle()
    }

    /// Closes the provided [`RoomHandle`].
    ///
    /// Its `on_close` callback fires with [`RoomCloseKind::Finished`].
    ///
    /// [`RoomCloseKind::Finished`]: crate::room::RoomCloseKind::Finished
    #[allow(clippy::needless_pass_by_value)]
    pub fn close_room(&self, room_to_delete: RoomHandle) {
        let closed: Vec<_> = {
            let mut inner = self.0.borrow_mut();
            let (closed, kept) = inner
                .rooms
                .drain(..)
                .partition(|room| room.inner_ptr_eq(&room_to_delete));
            inner.rooms = kept;
            closed
        };
        for room in closed {
            room.close(ClientDisconnect::RoomClosed.into());
        }
    }

    /// Drops this [`Jason`] API object and closes all its rooms.
    ///
    /// Every handle created through it (rooms, connections, local tracks and
    /// the media manager) is detached afterwards: it can still be held, but
    /// any call on it fails with a `StateError`.
    pub fn dispose(self) {
        let rooms: Vec<_> = self.0.borrow_mut().rooms.drain(..).collect();
        for room in rooms {
            room.close(ClientDisconnect::RoomClosed.into());
        }
        self.0.borrow().table.dispose();
    }

    /// Number of the [`Room`]s maintained by this [`Jason`].
    #[inline]
    #[must_use]
    pub fn rooms_count(&self) -> usize {
        self.0.borrow().rooms.len()
    }

    /// Returns a [`RoomHandle`] for an initialized  [`Room`].
    fn inner_init_room(&self, rpc: Rc<dyn RpcSession>) -> RoomHandle {
        let on_normal_close = rpc.on_normal_close();
        let room = {
            let inner = self.0.borrow();
            Room::new(
                rpc,
                inner.media_manager.clone(),
                Rc::clone(&inner.peer_factory),
                &inner.table,
                &inner.conf,
            )
        };

        let weak_room = room.downgrade();
        let weak_inner = Rc::downgrade(&self.0);
        platform::spawn(on_normal_close.map(move |reason| {
            let room = (|| {
                let room = weak_room.upgrade()?;
                let inner = weak_inner.upgrade()?;
                let mut inner = inner.borrow_mut();
                let index = inner.rooms.iter().position(|r| r.ptr_eq(&room));
                index.map(|i| inner.rooms.remove(i))
            })();
            if let Some(room) = room {
                log::debug!("Room is closed by server: {}", reason);
                room.close(reason);
            }
        }));

        let handle = room.new_handle();
        self.0.borrow_mut().rooms.push(room);
        handle
    }
}
