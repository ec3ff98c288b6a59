//! [`PeerConnection`] factory and repository.

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use medea_jason_proto::{state, IceServer, PeerConnectionState, PeerId};
use tracerr::Traced;

use crate::platform::PeerConnectionFactory;

use super::{
    aggregate_state, stats::StatsScheduler, PeerConnection, PeerContext,
    PeerError,
};

/// [`PeerConnection`] factory and repository of one room.
pub struct PeerRepository {
    /// Peer ID to [`PeerConnection`].
    peers: RefCell<HashMap<PeerId, Rc<PeerConnection>>>,

    /// Factory of the underlying platform peer connections.
    peer_factory: PeerConnectionFactory,

    /// Dependencies injected into every created [`PeerConnection`].
    ctx: PeerContext,
}

impl PeerRepository {
    /// Creates a new empty [`PeerRepository`].
    #[inline]
    #[must_use]
    pub fn new(peer_factory: PeerConnectionFactory, ctx: PeerContext) -> Self {
        Self {
            peers: RefCell::default(),
            peer_factory,
            ctx,
        }
    }

    /// Creates a new [`PeerConnection`] with the provided ID and stores it.
    ///
    /// # Errors
    ///
    /// With [`PeerError::RtcPeerConnection`] if the platform fails to create
    /// a peer connection.
    pub fn create_peer(
        &self,
        id: PeerId,
        ice_servers: Vec<IceServer>,
        force_relay: bool,
    ) -> Result<Rc<PeerConnection>, Traced<PeerError>> {
        let peer = (self.peer_factory)(ice_servers.clone(), force_relay)
            .map_err(tracerr::from_and_wrap!())?;
        let peer = PeerConnection::new(
            id,
            peer,
            ice_servers,
            force_relay,
            self.ctx.clone(),
        );
        if let Some(prev) =
            self.peers.borrow_mut().insert(id, Rc::clone(&peer))
        {
            log::warn!("Peer {} is replaced", prev.id());
        }
        log::debug!("Created Peer [id = {}]", id);

        Ok(peer)
    }

    /// Returns [`PeerConnection`] stored in the repository by its ID.
    #[inline]
    #[must_use]
    pub fn get(&self, id: PeerId) -> Option<Rc<PeerConnection>> {
        self.peers.borrow().get(&id).cloned()
    }

    /// Removes [`PeerConnection`] stored in the repository by its ID.
    pub fn remove(&self, id: PeerId) -> Option<Rc<PeerConnection>> {
        let peer = self.peers.borrow_mut().remove(&id);
        if peer.is_some() {
            self.ctx.stats_scheduler.unregister_peer(id);
        }
        peer
    }

    /// Returns all the stored [`PeerConnection`]s.
    #[must_use]
    pub fn get_all(&self) -> Vec<Rc<PeerConnection>> {
        self.peers.borrow().values().cloned().collect()
    }

    /// Removes all the stored [`PeerConnection`]s.
    pub fn clear(&self) {
        let peers: Vec<_> = self.peers.borrow_mut().drain().collect();
        for (id, _) in peers {
            self.ctx.stats_scheduler.unregister_peer(id);
        }
    }

    /// Returns the scraper of inbound video stats of this repository.
    #[inline]
    #[must_use]
    pub fn stats_scheduler(&self) -> &Rc<StatsScheduler> {
        &self.ctx.stats_scheduler
    }

    /// Pauses media state transition timers of all [`PeerConnection`]s while
    /// the server is unreachable.
    pub fn connection_lost(&self) {
        for peer in self.get_all() {
            peer.stop_state_transitions_timers();
        }
    }

    /// Restarts media state transition timers of all [`PeerConnection`]s.
    pub fn connection_recovered(&self) {
        for peer in self.get_all() {
            peer.reset_state_transitions_timers();
        }
    }

    /// Returns the aggregated connection state of all [`PeerConnection`]s.
    #[must_use]
    pub fn aggregate_state(&self) -> Option<PeerConnectionState> {
        aggregate_state(self.get_all().iter().map(|p| p.connection_state()))
    }

    /// Returns a snapshot of all [`PeerConnection`]s.
    #[must_use]
    pub fn state(&self) -> state::Room {
        state::Room {
            peers: self
                .peers
                .borrow()
                .iter()
                .map(|(id, p)| (*id, p.state()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod spec {
    use std::{rc::Rc, time::Duration};

    use futures::channel::mpsc;
    use medea_jason_proto::IceConnectionState;
    use tokio::task::LocalSet;

    use super::*;
    use crate::{
        media::{LocalTracksConstraints, MediaManager, RecvConstraints},
        platform::{self, RtcPeerConnection},
        utils::{
            test::{FakeMediaDevices, FakePeerConnection},
            HandleTable,
        },
    };

    fn repo(
        table: &Rc<HandleTable>,
        fakes: Rc<RefCell<Vec<Rc<FakePeerConnection>>>>,
    ) -> PeerRepository {
        let (tx, _rx) = mpsc::unbounded();
        let factory: PeerConnectionFactory = Rc::new(move |_, force_relay| {
            if force_relay {
                return Err(platform::Error::new(
                    "InvalidAccessError",
                    "no TURN servers",
                ));
            }
            let fake = Rc::new(FakePeerConnection::default());
            fakes.borrow_mut().push(Rc::clone(&fake));
            Ok(fake as Rc<dyn RtcPeerConnection>)
        });
        PeerRepository::new(
            factory,
            PeerContext {
                media_manager: MediaManager::new(
                    Rc::new(FakeMediaDevices::default()),
                    table,
                ),
                peer_events_sender: tx,
                send_constraints: LocalTracksConstraints::default(),
                recv_constraints: Rc::new(RecvConstraints::default()),
                stats_scheduler: StatsScheduler::new(Duration::from_secs(1)),
                table: Rc::downgrade(table),
                transition_timeout: Duration::from_secs(10),
                ice_restart_on_failure: true,
            },
        )
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn creates_and_removes_peers() {
        LocalSet::new()
            .run_until(async {
                let table = HandleTable::new();
                let fakes = Rc::default();
                let repo = repo(&table, Rc::clone(&fakes));

                let _ = repo.create_peer(PeerId(1), Vec::new(), false).unwrap();
                let _ = repo.create_peer(PeerId(2), Vec::new(), false).unwrap();
                assert!(repo.create_peer(PeerId(3), Vec::new(), true).is_err());

                assert_eq!(repo.get_all().len(), 2);
                assert!(repo.get(PeerId(3)).is_none());
                assert_eq!(repo.state().peers.len(), 2);

                drop(repo.remove(PeerId(1)));
                assert!(repo.get(PeerId(1)).is_none());
                assert!(fakes.borrow()[0].closed.get());
                assert!(!fakes.borrow()[1].closed.get());
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn aggregates_states_of_all_peers() {
        LocalSet::new()
            .run_until(async {
                let table = HandleTable::new();
                let fakes: Rc<RefCell<Vec<Rc<FakePeerConnection>>>> =
                    Rc::default();
                let repo = repo(&table, Rc::clone(&fakes));
                assert_eq!(repo.aggregate_state(), None);

                let _ = repo.create_peer(PeerId(1), Vec::new(), false).unwrap();
                let _ = repo.create_peer(PeerId(2), Vec::new(), false).unwrap();
                fakes.borrow()[0]
                    .fire_ice_connection_state(IceConnectionState::Connected);
                fakes.borrow()[1]
                    .fire_connection_state(PeerConnectionState::Disconnected);

                assert_eq!(
                    repo.aggregate_state(),
                    Some(PeerConnectionState::Disconnected),
                );
            })
            .await;
    }
}
