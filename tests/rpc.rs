mod common;

use std::{cell::RefCell, rc::Rc, time::Duration};

use futures::StreamExt as _;
use medea_jason_core::{
    conf,
    rpc::{
        ClientDisconnect, ConnectionInfo, RpcSession, SessionState,
        WebSocketRpcClient, WebSocketRpcSession,
    },
};
use medea_jason_proto::{
    ClientMsg, Command, Credential, Event, MemberId, PeerId, RoomId, ServerMsg,
};
use tokio::task::LocalSet;

use common::{settle, transport_factory, FakeTransport, TOKEN};

type Transports = Rc<RefCell<Vec<Rc<FakeTransport>>>>;

fn session() -> (Rc<WebSocketRpcSession>, Transports) {
    let transports = Rc::new(RefCell::new(Vec::new()));
    let client = WebSocketRpcClient::new(
        transport_factory(Rc::clone(&transports)),
        &conf::Rpc::default(),
    );
    (WebSocketRpcSession::new(Rc::new(client)), transports)
}

fn info() -> ConnectionInfo {
    TOKEN.parse().unwrap()
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn joins_with_token_credentials() {
    LocalSet::new()
        .run_until(async {
            let (session, transports) = session();

            Rc::clone(&session).connect(info()).await.unwrap();

            assert!(matches!(session.state(), SessionState::Opened(_)));
            let sent = transports.borrow()[0].sent_commands();
            assert_eq!(
                sent[0],
                Command::JoinRoom {
                    member_id: MemberId::from("alice"),
                    credential: Credential::from("secret"),
                },
            );
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn answers_server_pings() {
    LocalSet::new()
        .run_until(async {
            let (session, transports) = session();
            Rc::clone(&session).connect(info()).await.unwrap();

            transports.borrow()[0].push(ServerMsg::Ping(7));
            settle().await;

            assert!(transports.borrow()[0]
                .sent
                .borrow()
                .iter()
                .any(|msg| *msg == ClientMsg::Pong(7)));
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn silent_server_is_a_connection_loss() {
    LocalSet::new()
        .run_until(async {
            let (session, _transports) = session();
            Rc::clone(&session).connect(info()).await.unwrap();
            let mut on_loss = session.on_connection_loss();

            tokio::time::sleep(Duration::from_secs(11)).await;

            assert_eq!(on_loss.next().await, Some(()));
            assert!(matches!(session.state(), SessionState::Lost(..)));
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn routes_events_of_joined_room_only() {
    LocalSet::new()
        .run_until(async {
            let (session, transports) = session();
            let mut events = session.subscribe();
            Rc::clone(&session).connect(info()).await.unwrap();

            let removed = Event::PeersRemoved {
                peer_ids: vec![PeerId(3)],
            };
            transports.borrow()[0].push(ServerMsg::Event {
                room_id: RoomId::from("another"),
                event: removed.clone(),
            });
            transports.borrow()[0].event(removed.clone());

            let mut next = events.next().await;
            while matches!(next, Some(Event::RoomJoined { .. })) {
                next = events.next().await;
            }
            assert_eq!(next, Some(removed));
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn closing_leaves_room() {
    LocalSet::new()
        .run_until(async {
            let (session, transports) = session();
            Rc::clone(&session).connect(info()).await.unwrap();

            session.close_with_reason(ClientDisconnect::RoomClosed);

            assert!(transports.borrow()[0].sent_commands().contains(
                &Command::LeaveRoom {
                    member_id: MemberId::from("alice"),
                }
            ));
            assert!(matches!(session.state(), SessionState::Finished(_)));

            session.send_command(Command::LeaveRoom {
                member_id: MemberId::from("alice"),
            });
            let leaves = transports.borrow()[0]
                .sent_commands()
                .into_iter()
                .filter(|c| matches!(c, Command::LeaveRoom { .. }))
                .count();
            assert_eq!(leaves, 1);
        })
        .await;
}
