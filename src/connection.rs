//! [`Connection`] with a specific remote member.

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
    rc::{Rc, Weak},
};

use futures::future::LocalBoxFuture;
use medea_jason_proto::{ConnectionQualityScore, MemberId, PeerId};
use tracerr::Traced;

use crate::{
    api,
    media::{
        track::remote::{self, RemoteMediaTrack},
        MediaKind, MediaSourceKind,
    },
    peer::{media_exchange_state, MediaState},
    platform,
    room::ChangeMediaStateError,
    utils::{Handle, HandleSlot, HandleTable},
};

/// Changes [`MediaState`] of all the receivers of media published by the
/// provided remote member.
pub type RecvMediaStateChanger = Rc<
    dyn Fn(
        MemberId,
        MediaState,
        MediaKind,
        Option<MediaSourceKind>,
    ) -> LocalBoxFuture<'static, Result<(), Traced<ChangeMediaStateError>>>,
>;

/// Service which manages [`Connection`]s with remote members.
pub struct Connections {
    /// Local [`PeerId`] to remote [`MemberId`]s.
    peer_members: RefCell<HashMap<PeerId, HashSet<MemberId>>>,

    /// Remote [`MemberId`] to [`Connection`] with that member.
    connections: RefCell<HashMap<MemberId, Connection>>,

    /// Callback invoked on remote member media arrival.
    on_new_connection: platform::Callback<ConnectionHandle>,

    /// [`HandleTable`] new [`ConnectionHandle`]s are registered in.
    table: Weak<HandleTable>,

    /// Toggles the receivers of a specific remote member.
    change_recv_media_state: RecvMediaStateChanger,
}

impl Connections {
    /// Creates new empty [`Connections`] registering their handles in the
    /// provided [`HandleTable`].
    ///
    /// Inbound media of each [`Connection`] is toggled with the provided
    /// [`RecvMediaStateChanger`].
    #[inline]
    #[must_use]
    pub fn new(
        table: Weak<HandleTable>,
        change_recv_media_state: RecvMediaStateChanger,
    ) -> Self {
        Self {
            peer_members: RefCell::default(),
            connections: RefCell::default(),
            on_new_connection: platform::Callback::default(),
            table,
            change_recv_media_state,
        }
    }

    /// Sets callback, invoked when a new [`Connection`] is established.
    #[inline]
    pub fn on_new_connection<F>(&self, f: F)
    where
        F: Fn(ConnectionHandle) + 'static,
    {
        self.on_new_connection.set_func(f);
    }

    /// Creates a new [`Connection`] with the remote member, unless it exists
    /// already, and binds it to the provided local [`PeerId`].
    ///
    /// `on_new_connection` fires once per remote member.
    pub fn create_connection(
        &self,
        local_peer_id: PeerId,
        remote_member_id: &MemberId,
    ) {
        let _ = self
            .peer_members
            .borrow_mut()
            .entry(local_peer_id)
            .or_default()
            .insert(remote_member_id.clone());

        if self.connections.borrow().contains_key(remote_member_id) {
            return;
        }
        let table = if let Some(table) = self.table.upgrade() {
            table
        } else {
            log::warn!(
                "Connection with {} is not created: engine is disposed",
                remote_member_id,
            );
            return;
        };

        let con = Connection::new(
            remote_member_id.clone(),
            &table,
            Rc::clone(&self.change_recv_media_state),
        );
        let handle = con.new_handle();
        drop(
            self.connections
                .borrow_mut()
                .insert(remote_member_id.clone(), con),
        );
        self.on_new_connection.call1(handle);
    }

    /// Lookups [`Connection`] by the provided remote [`MemberId`].
    #[must_use]
    pub fn get(&self, remote_member_id: &MemberId) -> Option<Connection> {
        self.connections.borrow().get(remote_member_id).cloned()
    }

    /// Closes [`Connection`]s associated with the provided local [`PeerId`].
    ///
    /// Invokes `on_close` callback of each of them. A [`Connection`] still
    /// used by another local peer is kept.
    pub fn close_connection(&self, local_peer: PeerId) {
        let remote_ids =
            self.peer_members.borrow_mut().remove(&local_peer);
        for remote_id in remote_ids.into_iter().flatten() {
            let still_used = self
                .peer_members
                .borrow()
                .values()
                .any(|members| members.contains(&remote_id));
            if still_used {
                continue;
            }
            let connection = self.connections.borrow_mut().remove(&remote_id);
            if let Some(connection) = connection {
                // Invoked here and not on `Drop`, so the `ConnectionHandle`
                // is still usable inside the callback.
                connection.0.on_close.call0();
            }
        }
    }

    /// Closes all the [`Connection`]s.
    pub fn close_all(&self) {
        let peers: Vec<_> =
            self.peer_members.borrow().keys().copied().collect();
        for peer_id in peers {
            self.close_connection(peer_id);
        }
    }

    /// Number of the live [`Connection`]s.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.borrow().len()
    }

    /// Indicates whether there are no [`Connection`]s.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.borrow().is_empty()
    }
}

/// Actual data of a connection with a specific remote member.
///
/// Shared between the host [`ConnectionHandle`] and the engine side
/// [`Connection`].
struct InnerConnection {
    remote_id: MemberId,

    /// Current [`ConnectionQualityScore`] of this [`Connection`].
    quality_score: Cell<Option<ConnectionQualityScore>>,

    /// Callback invoked when a [`remote::Track`] is received.
    on_remote_track_added: platform::Callback<RemoteMediaTrack>,

    /// Callback invoked when a [`ConnectionQualityScore`] is updated.
    on_quality_score_update: platform::Callback<u8>,

    /// Callback invoked when this [`Connection`] is closed.
    on_close: platform::Callback<()>,

    change_recv_media_state: RecvMediaStateChanger,

    slot: HandleSlot,
}

/// Host handle to a [`Connection`] with a remote member.
///
/// Every method fails with a `StateError` once the [`Connection`] is closed
/// or the engine is disposed.
#[derive(Clone, Debug)]
pub struct ConnectionHandle(Handle<InnerConnection>);

impl ConnectionHandle {
    /// Sets callback, invoked when this [`Connection`] is closed.
    ///
    /// # Errors
    ///
    /// With `StateError` if the [`Connection`] is gone.
    pub fn on_close<F>(&self, f: F) -> Result<(), api::Error>
    where
        F: Fn() + 'static,
    {
        self.0.upgrade()?.on_close.set_func(move |()| f());
        Ok(())
    }

    /// Returns ID of the remote member.
    ///
    /// # Errors
    ///
    /// With `StateError` if the [`Connection`] is gone.
    pub fn get_remote_member_id(&self) -> Result<String, api::Error> {
        Ok(self.0.upgrade()?.remote_id.0.clone())
    }

    /// Sets callback, invoked when a new [`remote::Track`] is added to this
    /// [`Connection`].
    ///
    /// # Errors
    ///
    /// With `StateError` if the [`Connection`] is gone.
    pub fn on_remote_track_added<F>(&self, f: F) -> Result<(), api::Error>
    where
        F: Fn(RemoteMediaTrack) + 'static,
    {
        self.0.upgrade()?.on_remote_track_added.set_func(f);
        Ok(())
    }

    /// Sets callback, invoked when the server updates the connection quality
    /// score.
    ///
    /// The score is in `1..=4` range, the higher the better.
    ///
    /// # Errors
    ///
    /// With `StateError` if the [`Connection`] is gone.
    pub fn on_quality_score_update<F>(&self, f: F) -> Result<(), api::Error>
    where
        F: Fn(u8) + 'static,
    {
        self.0.upgrade()?.on_quality_score_update.set_func(f);
        Ok(())
    }

    /// Enables inbound audio from the remote member.
    ///
    /// # Errors
    ///
    /// With `MediaStateTransitionException` if [`disable_remote_audio()`]
    /// was called while enabling or the server didn't approve the
    /// transition. With `StateError` if the [`Connection`] is gone.
    ///
    /// [`disable_remote_audio()`]: ConnectionHandle::disable_remote_audio
    pub async fn enable_remote_audio(&self) -> Result<(), api::Error> {
        self.change_media_state(
            media_exchange_state::Stable::Enabled,
            MediaKind::Audio,
            None,
        )
        .await
    }

    /// Disables inbound audio from the remote member.
    ///
    /// # Errors
    ///
    /// With `MediaStateTransitionException` if [`enable_remote_audio()`]
    /// was called while disabling or the server didn't approve the
    /// transition. With `StateError` if the [`Connection`] is gone.
    ///
    /// [`enable_remote_audio()`]: ConnectionHandle::enable_remote_audio
    pub async fn disable_remote_audio(&self) -> Result<(), api::Error> {
        self.change_media_state(
            media_exchange_state::Stable::Disabled,
            MediaKind::Audio,
            None,
        )
        .await
    }

    /// Enables inbound video of the provided source, or of all sources,
    /// from the remote member.
    ///
    /// # Errors
    ///
    /// Same as [`ConnectionHandle::enable_remote_audio()`].
    pub async fn enable_remote_video(
        &self,
        source_kind: Option<MediaSourceKind>,
    ) -> Result<(), api::Error> {
        self.change_media_state(
            media_exchange_state::Stable::Enabled,
            MediaKind::Video,
            source_kind,
        )
        .await
    }

    /// Disables inbound video of the provided source, or of all sources,
    /// from the remote member.
    ///
    /// # Errors
    ///
    /// Same as [`ConnectionHandle::disable_remote_audio()`].
    pub async fn disable_remote_video(
        &self,
        source_kind: Option<MediaSourceKind>,
    ) -> Result<(), api::Error> {
        self.change_media_state(
            media_exchange_state::Stable::Disabled,
            MediaKind::Video,
            source_kind,
        )
        .await
    }

    async fn change_media_state<S>(
        &self,
        state: S,
        kind: MediaKind,
        source_kind: Option<MediaSourceKind>,
    ) -> Result<(), api::Error>
    where
        S: Into<MediaState>,
    {
        let change = {
            let inner = self.0.upgrade()?;
            (inner.change_recv_media_state)(
                inner.remote_id.clone(),
                state.into(),
                kind,
                source_kind,
            )
        };
        change.await.map_err(api::Error::from)
    }
}

/// Connection with a specific remote member, used on the engine side.
#[derive(Clone)]
pub struct Connection(Rc<InnerConnection>);

impl Connection {
    /// Instantiates a new [`Connection`] with the provided member.
    #[must_use]
    pub fn new(
        remote_id: MemberId,
        table: &Rc<HandleTable>,
        change_recv_media_state: RecvMediaStateChanger,
    ) -> Self {
        Self(Rc::new(InnerConnection {
            remote_id,
            quality_score: Cell::default(),
            on_remote_track_added: platform::Callback::default(),
            on_quality_score_update: platform::Callback::default(),
            on_close: platform::Callback::default(),
            change_recv_media_state,
            slot: HandleSlot::new(table),
        }))
    }

    /// Invokes `on_remote_track_added` callback with a new handle to the
    /// provided [`remote::Track`].
    pub fn add_remote_track(&self, track: &Rc<remote::Track>) {
        self.0.on_remote_track_added.call1(track.new_handle());
    }

    /// Creates a new host handle to this [`Connection`].
    #[inline]
    #[must_use]
    pub fn new_handle(&self) -> ConnectionHandle {
        ConnectionHandle(self.0.slot.handle(Rc::downgrade(&self.0)))
    }

    /// Updates [`ConnectionQualityScore`] of this [`Connection`].
    ///
    /// `on_quality_score_update` fires only if the score changes.
    pub fn update_quality_score(&self, score: ConnectionQualityScore) {
        if self.0.quality_score.replace(Some(score)) != Some(score) {
            self.0.on_quality_score_update.call1(score as u8);
        }
    }

    /// Returns the last [`ConnectionQualityScore`] of this [`Connection`].
    #[inline]
    #[must_use]
    pub fn quality_score(&self) -> Option<ConnectionQualityScore> {
        self.0.quality_score.get()
    }
}

#[cfg(test)]
mod spec {
    use std::cell::Cell;

    use futures::{executor, future, FutureExt as _};

    use super::*;

    type Call = (MemberId, MediaState, MediaKind, Option<MediaSourceKind>);

    fn noop() -> RecvMediaStateChanger {
        Rc::new(
            |_: MemberId,
             _: MediaState,
             _: MediaKind,
             _: Option<MediaSourceKind>| {
                future::ok::<_, Traced<ChangeMediaStateError>>(())
                    .boxed_local()
            },
        )
    }

    fn counter() -> (Rc<Cell<u32>>, impl Fn() + 'static) {
        let count = Rc::new(Cell::new(0));
        let inc = {
            let count = Rc::clone(&count);
            move || count.set(count.get() + 1)
        };
        (count, inc)
    }

    #[test]
    fn fires_new_connection_once_per_member() {
        let table = HandleTable::new();
        let connections = Connections::new(Rc::downgrade(&table), noop());
        let (created, inc) = counter();
        connections.on_new_connection(move |_| inc());

        let bob = MemberId::from("bob");
        connections.create_connection(PeerId(1), &bob);
        connections.create_connection(PeerId(2), &bob);
        connections.create_connection(PeerId(1), &MemberId::from("alice"));

        assert_eq!(created.get(), 2);
        assert_eq!(connections.len(), 2);
    }

    #[test]
    fn close_fires_on_close_and_detaches_handle() {
        let table = HandleTable::new();
        let connections = Connections::new(Rc::downgrade(&table), noop());
        let handle = Rc::new(RefCell::new(None));
        connections.on_new_connection({
            let handle = Rc::clone(&handle);
            move |h| drop(handle.borrow_mut().replace(h))
        });
        connections.create_connection(PeerId(1), &MemberId::from("bob"));

        let handle = handle.borrow_mut().take().unwrap();
        let (closed, inc) = counter();
        handle.on_close(inc).unwrap();
        assert_eq!(handle.get_remote_member_id().unwrap(), "bob");

        connections.close_connection(PeerId(1));

        assert_eq!(closed.get(), 1);
        assert!(connections.is_empty());
        assert!(matches!(
            handle.get_remote_member_id(),
            Err(api::Error::State(_))
        ));
    }

    #[test]
    fn connection_shared_by_peers_survives_one_close() {
        let table = HandleTable::new();
        let connections = Connections::new(Rc::downgrade(&table), noop());
        let bob = MemberId::from("bob");
        connections.create_connection(PeerId(1), &bob);
        connections.create_connection(PeerId(2), &bob);

        connections.close_connection(PeerId(1));
        assert!(connections.get(&bob).is_some());

        connections.close_connection(PeerId(2));
        assert!(connections.get(&bob).is_none());
    }

    #[test]
    fn quality_score_fires_only_on_change() {
        let table = HandleTable::new();
        let con = Connection::new(MemberId::from("bob"), &table, noop());
        let scores = Rc::new(RefCell::new(Vec::new()));
        con.new_handle()
            .on_quality_score_update({
                let scores = Rc::clone(&scores);
                move |s| scores.borrow_mut().push(s)
            })
            .unwrap();

        con.update_quality_score(ConnectionQualityScore::High);
        con.update_quality_score(ConnectionQualityScore::High);
        con.update_quality_score(ConnectionQualityScore::Poor);

        assert_eq!(*scores.borrow(), vec![4, 1]);
        assert_eq!(con.quality_score(), Some(ConnectionQualityScore::Poor));
    }

    #[test]
    fn handles_detach_on_dispose() {
        let table = HandleTable::new();
        let con = Connection::new(MemberId::from("bob"), &table, noop());
        let handle = con.new_handle();

        table.dispose();

        assert!(matches!(
            handle.on_close(|| ()),
            Err(api::Error::State(_))
        ));
    }

    #[test]
    fn remote_media_is_toggled_for_its_member_only() {
        let table = HandleTable::new();
        let calls: Rc<RefCell<Vec<Call>>> = Rc::default();
        let changer: RecvMediaStateChanger = Rc::new({
            let calls = Rc::clone(&calls);
            move |member: MemberId,
                  state: MediaState,
                  kind: MediaKind,
                  source_kind: Option<MediaSourceKind>| {
                calls.borrow_mut().push((member, state, kind, source_kind));
                future::ok::<_, Traced<ChangeMediaStateError>>(())
                    .boxed_local()
            }
        });
        let con = Connection::new(MemberId::from("bob"), &table, changer);
        let handle = con.new_handle();

        executor::block_on(handle.disable_remote_audio()).unwrap();
        executor::block_on(
            handle.enable_remote_video(Some(MediaSourceKind::Display)),
        )
        .unwrap();

        assert_eq!(
            *calls.borrow(),
            vec![
                (
                    MemberId::from("bob"),
                    media_exchange_state::Stable::Disabled.into(),
                    MediaKind::Audio,
                    None,
                ),
                (
                    MemberId::from("bob"),
                    media_exchange_state::Stable::Enabled.into(),
                    MediaKind::Video,
                    Some(MediaSourceKind::Display),
                ),
            ],
        );
    }

    #[test]
    fn remote_media_toggle_fails_once_detached() {
        let table = HandleTable::new();
        let con = Connection::new(MemberId::from("bob"), &table, noop());
        let handle = con.new_handle();
        drop(con);

        assert!(matches!(
            executor::block_on(handle.enable_remote_audio()),
            Err(api::Error::State(_))
        ));
    }
}
