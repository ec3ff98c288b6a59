mod common;

use std::{cell::RefCell, rc::Rc, time::Duration};

use futures::future;
use medea_jason_core::{
    api::{self, MediaStateTransitionExceptionKind},
    media::{AudioTrackConstraints, MediaKind, MediaStreamSettings},
    platform::TransportState,
    rpc::{CloseMsg, ReconnectHandle},
    ConnectionHandle, LocalMediaTrack, RoomCloseKind, RoomCloseReason,
    RoomHandle,
};
use medea_jason_proto::{
    AudioSettings, Command, ConnectionQualityScore, Direction, Event,
    IceConnectionState, MediaType, MemberId, NegotiationRole, PeerId,
    PeerMetrics, PeerUpdate, Track, TrackId, TrackPatchCommand,
    TrackPatchEvent,
};
use tokio::task::LocalSet;

use common::{recv_audio, send_audio, settle, Env, TOKEN};

type Recorded<T> = Rc<RefCell<Vec<T>>>;

fn recorder<T: 'static>() -> (Recorded<T>, impl Fn(T) + 'static) {
    let store = Rc::new(RefCell::new(Vec::new()));
    let push = {
        let store = Rc::clone(&store);
        move |v| store.borrow_mut().push(v)
    };
    (store, push)
}

struct Room {
    handle: RoomHandle,
    connections: Recorded<ConnectionHandle>,
    local_tracks: Recorded<LocalMediaTrack>,
    failed_media: Recorded<api::Error>,
    losses: Recorded<ReconnectHandle>,
    closes: Recorded<RoomCloseReason>,
}

async fn joined_room(env: &Env) -> Room {
    let handle = env.jason.init_room();
    let (connections, on_connection) = recorder();
    let (local_tracks, on_local_track) = recorder();
    let (failed_media, on_failed_media) = recorder();
    let (losses, on_loss) = recorder();
    let (closes, on_close) = recorder();
    handle.on_new_connection(on_connection).unwrap();
    handle.on_local_track(on_local_track).unwrap();
    handle.on_failed_local_media(on_failed_media).unwrap();
    handle.on_connection_loss(on_loss).unwrap();
    handle.on_close(on_close).unwrap();

    handle.join(TOKEN.to_owned()).await.unwrap();

    Room {
        handle,
        connections,
        local_tracks,
        failed_media,
        losses,
        closes,
    }
}

async fn offerer_peer(env: &Env, required_audio: bool) {
    env.transport().event(Event::PeerCreated {
        peer_id: PeerId(1),
        negotiation_role: NegotiationRole::Offerer,
        tracks: vec![send_audio(1, required_audio)],
        ice_servers: Vec::new(),
        force_relay: false,
    });
    settle().await;
}

fn assert_transition_error(
    res: Result<(), api::Error>,
    expected: MediaStateTransitionExceptionKind,
) {
    match res {
        Err(api::Error::MediaStateTransition(e)) => {
            assert_eq!(e.kind(), expected);
        }
        Err(e) => panic!("unexpected error: {}", e),
        Ok(()) => panic!("transition unexpectedly succeeded"),
    }
}

fn audio_from_another_mic() -> MediaStreamSettings {
    let mut audio = AudioTrackConstraints::new();
    audio.device_id("another-mic".into());
    let mut settings = MediaStreamSettings::new();
    settings.audio(audio);
    settings
}

fn update_tracks(env: &Env) -> Vec<Vec<TrackPatchCommand>> {
    env.transport()
        .sent_commands()
        .into_iter()
        .filter_map(|cmd| match cmd {
            Command::UpdateTracks { tracks_patches, .. } => Some(tracks_patches),
            _ => None,
        })
        .collect()
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn offerer_publishes_local_audio() {
    LocalSet::new()
        .run_until(async {
            let env = Env::new();
            let room = joined_room(&env).await;

            offerer_peer(&env, false).await;

            assert_eq!(room.connections.borrow().len(), 1);
            assert_eq!(
                room.connections.borrow()[0].get_remote_member_id().unwrap(),
                "bob",
            );
            assert_eq!(room.local_tracks.borrow().len(), 1);
            assert_eq!(
                room.local_tracks.borrow()[0].kind().unwrap(),
                MediaKind::Audio,
            );
            assert_eq!(env.devices.gum_requests.get(), 1);
            assert_eq!(env.peer().sending_tracks_count(), 1);
            assert!(env.transport().sent_commands().iter().any(|cmd| matches!(
                cmd,
                Command::MakeSdpOffer { peer_id, .. } if *peer_id == PeerId(1)
            )));
            assert!(room.failed_media.borrow().is_empty());
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn answerer_answers_offer() {
    LocalSet::new()
        .run_until(async {
            let env = Env::new();
            let room = joined_room(&env).await;

            env.transport().event(Event::PeerCreated {
                peer_id: PeerId(2),
                negotiation_role: NegotiationRole::Answerer("offer".into()),
                tracks: vec![recv_audio(1, "0")],
                ice_servers: Vec::new(),
                force_relay: false,
            });
            settle().await;

            assert_eq!(room.connections.borrow().len(), 1);
            assert_eq!(env.devices.gum_requests.get(), 0);
            assert!(env.transport().sent_commands().iter().any(|cmd| matches!(
                cmd,
                Command::MakeSdpAnswer { peer_id, sdp_answer, .. }
                    if *peer_id == PeerId(2) && sdp_answer.starts_with("answer")
            )));
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn disable_and_enable_audio_are_confirmed_by_server() {
    LocalSet::new()
        .run_until(async {
            let env = Env::new();
            let room = joined_room(&env).await;
            offerer_peer(&env, false).await;

            room.handle.disable_audio().await.unwrap();
            assert_eq!(
                update_tracks(&env),
                vec![vec![TrackPatchCommand {
                    id: TrackId(1),
                    enabled: Some(false),
                    muted: None,
                }]],
            );

            room.handle.enable_audio().await.unwrap();
            assert_eq!(update_tracks(&env).len(), 2);
            assert_eq!(
                update_tracks(&env)[1],
                vec![TrackPatchCommand {
                    id: TrackId(1),
                    enabled: Some(true),
                    muted: None,
                }],
            );
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn mute_audio_is_confirmed_by_server() {
    LocalSet::new()
        .run_until(async {
            let env = Env::new();
            let room = joined_room(&env).await;
            offerer_peer(&env, false).await;

            room.handle.mute_audio().await.unwrap();

            assert_eq!(
                update_tracks(&env),
                vec![vec![TrackPatchCommand {
                    id: TrackId(1),
                    enabled: None,
                    muted: Some(true),
                }]],
            );
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn required_audio_cannot_be_disabled() {
    LocalSet::new()
        .run_until(async {
            let env = Env::new();
            let room = joined_room(&env).await;
            offerer_peer(&env, true).await;

            let err = room.handle.disable_audio().await.unwrap_err();

            match err {
                api::Error::MediaStateTransition(e) => assert_eq!(
                    e.kind(),
                    MediaStateTransitionExceptionKind::ProhibitedState,
                ),
                _ => panic!("unexpected error: {}", err),
            }
            assert!(update_tracks(&env).is_empty());
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn failed_settings_update_rolls_back() {
    LocalSet::new()
        .run_until(async {
            let env = Env::new();
            let room = joined_room(&env).await;
            offerer_peer(&env, false).await;
            env.devices.fail_audio.set(true);

            let err = room
                .handle
                .set_local_media_settings(audio_from_another_mic(), false, true)
                .await
                .unwrap_err();

            match err {
                api::Error::MediaSettingsUpdate(e) => {
                    assert!(e.rolled_back());
                    assert!(matches!(e.cause(), api::Error::LocalMedia(_)));
                }
                _ => panic!("unexpected error: {}", err),
            }
            assert_eq!(room.failed_media.borrow().len(), 1);
            assert_eq!(env.peer().sending_tracks_count(), 1);

            // Reacquiring audio shows which settings are in effect.
            room.handle.disable_audio().await.unwrap();
            for track in room.local_tracks.borrow().iter() {
                track.free();
            }
            env.devices.fail_audio.set(false);
            room.handle.enable_audio().await.unwrap();
            settle().await;

            assert_eq!(env.devices.requested_mics.borrow().last(), Some(&None));
            assert_eq!(env.peer().sending_tracks_count(), 1);
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn failed_settings_update_without_rollback_disables_media() {
    LocalSet::new()
        .run_until(async {
            let env = Env::new();
            let room = joined_room(&env).await;
            offerer_peer(&env, false).await;
            env.devices.fail_audio.set(true);

            let err = room
                .handle
                .set_local_media_settings(audio_from_another_mic(), true, false)
                .await
                .unwrap_err();

            match err {
                api::Error::MediaSettingsUpdate(e) => {
                    assert!(!e.rolled_back());
                    assert!(matches!(e.cause(), api::Error::LocalMedia(_)));
                }
                _ => panic!("unexpected error: {}", err),
            }
            assert_eq!(room.failed_media.borrow().len(), 1);
            assert_eq!(
                update_tracks(&env).last(),
                Some(&vec![TrackPatchCommand {
                    id: TrackId(1),
                    enabled: Some(false),
                    muted: None,
                }]),
            );
            assert_eq!(env.peer().sending_tracks_count(), 0);
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn failed_track_replacement_rolls_back() {
    LocalSet::new()
        .run_until(async {
            let env = Env::new();
            let room = joined_room(&env).await;
            offerer_peer(&env, false).await;
            env.peer().transceivers.borrow()[0]
                .fail_next_insert
                .set(true);

            let mut settings = MediaStreamSettings::new();
            settings.audio(AudioTrackConstraints::new());
            let err = room
                .handle
                .set_local_media_settings(settings, true, true)
                .await
                .unwrap_err();

            match err {
                api::Error::MediaSettingsUpdate(e) => {
                    assert!(e.rolled_back());
                    assert!(matches!(e.cause(), api::Error::Internal(_)));
                }
                _ => panic!("unexpected error: {}", err),
            }
            assert!(room.failed_media.borrow().is_empty());
            assert!(update_tracks(&env).is_empty());
            assert_eq!(env.peer().sending_tracks_count(), 1);
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn concurrent_opposite_requests_conflict() {
    LocalSet::new()
        .run_until(async {
            let env = Env::new();
            let room = joined_room(&env).await;
            offerer_peer(&env, false).await;
            env.transport().confirm_updates.set(false);

            let mut disabling = Box::pin(room.handle.disable_audio());
            assert!(futures::poll!(&mut disabling).is_pending());

            assert_transition_error(
                room.handle.enable_audio().await,
                MediaStateTransitionExceptionKind::ConflictingTransition,
            );
            assert_eq!(update_tracks(&env).len(), 1);

            env.transport().event(Event::PeerUpdated {
                peer_id: PeerId(1),
                updates: vec![PeerUpdate::Updated(TrackPatchEvent {
                    id: TrackId(1),
                    enabled_individual: Some(false),
                    enabled_general: Some(false),
                    muted: None,
                })],
                negotiation_role: None,
            });
            disabling.await.unwrap();
            settle().await;
            assert_eq!(env.peer().sending_tracks_count(), 0);
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn opposite_request_during_acquisition_conflicts() {
    LocalSet::new()
        .run_until(async {
            let env = Env::new();
            let room = joined_room(&env).await;
            offerer_peer(&env, false).await;
            room.handle.disable_audio().await.unwrap();
            for track in room.local_tracks.borrow().iter() {
                track.free();
            }
            env.devices.gum_delay.set(Duration::from_millis(100));

            let (enabled, disabled) = future::join(
                room.handle.enable_audio(),
                async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    room.handle.disable_audio().await
                },
            )
            .await;

            enabled.unwrap();
            assert_transition_error(
                disabled,
                MediaStateTransitionExceptionKind::ConflictingTransition,
            );
            settle().await;
            assert!(env.devices.gum_requests.get() >= 2);
            assert_eq!(env.peer().sending_tracks_count(), 1);
            assert_eq!(
                update_tracks(&env).last(),
                Some(&vec![TrackPatchCommand {
                    id: TrackId(1),
                    enabled: Some(true),
                    muted: None,
                }]),
            );
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn quality_score_is_routed_to_connection() {
    LocalSet::new()
        .run_until(async {
            let env = Env::new();
            let room = joined_room(&env).await;
            offerer_peer(&env, false).await;
            let (scores, on_score) = recorder();
            room.connections.borrow()[0]
                .on_quality_score_update(on_score)
                .unwrap();

            env.transport().event(Event::ConnectionQualityUpdated {
                partner_member_id: MemberId::from("bob"),
                quality_score: ConnectionQualityScore::Medium,
            });
            settle().await;

            assert_eq!(*scores.borrow(), vec![3]);
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn removed_peer_closes_its_connection() {
    LocalSet::new()
        .run_until(async {
            let env = Env::new();
            let room = joined_room(&env).await;
            offerer_peer(&env, false).await;
            let (closed, on_closed) = recorder();
            room.connections.borrow()[0]
                .on_close(move || on_closed(()))
                .unwrap();

            env.transport().event(Event::PeersRemoved {
                peer_ids: vec![PeerId(1)],
            });
            settle().await;

            assert_eq!(closed.borrow().len(), 1);
            assert!(env.peer().closed.get());
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn connection_loss_is_reported_and_resynchronized() {
    LocalSet::new()
        .run_until(async {
            let env = Env::new();
            let room = joined_room(&env).await;
            offerer_peer(&env, false).await;

            env.transport()
                .set_state(TransportState::Closed(CloseMsg::Abnormal(1006)));
            settle().await;

            assert_eq!(room.losses.borrow().len(), 1);
            let reconnect = room.losses.borrow()[0].clone();
            reconnect.reconnect_with_delay(0).await.unwrap();
            settle().await;

            assert_eq!(env.transports.borrow().len(), 2);
            assert!(env
                .transport()
                .sent_commands()
                .iter()
                .any(|cmd| matches!(cmd, Command::SynchronizeMe { .. })));
            assert_eq!(room.losses.borrow().len(), 1);
            assert!(room.closes.borrow().is_empty());
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn closing_room_fires_on_close_once() {
    LocalSet::new()
        .run_until(async {
            let env = Env::new();
            let room = joined_room(&env).await;
            offerer_peer(&env, false).await;
            let (closed, on_closed) = recorder();
            room.connections.borrow()[0]
                .on_close(move || on_closed(()))
                .unwrap();

            env.jason.close_room(room.handle.clone());
            settle().await;

            assert_eq!(closed.borrow().len(), 1);
            let closes = room.closes.borrow();
            assert_eq!(closes.len(), 1);
            assert_eq!(closes[0].kind(), RoomCloseKind::Finished);
            assert!(!closes[0].is_err());
            assert!(matches!(
                room.handle.disable_audio().await,
                Err(api::Error::State(_))
            ));
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn remote_media_is_toggled_per_connection() {
    LocalSet::new()
        .run_until(async {
            let env = Env::new();
            let room = joined_room(&env).await;
            env.transport().event(Event::PeerCreated {
                peer_id: PeerId(2),
                negotiation_role: NegotiationRole::Answerer("offer".into()),
                tracks: vec![
                    recv_audio(1, "0"),
                    Track {
                        id: TrackId(2),
                        direction: Direction::Recv {
                            sender: MemberId::from("carol"),
                            mid: Some("1".to_owned()),
                        },
                        media_type: MediaType::Audio(AudioSettings {
                            required: false,
                        }),
                    },
                ],
                ice_servers: Vec::new(),
                force_relay: false,
            });
            settle().await;
            let bob = room
                .connections
                .borrow()
                .iter()
                .find(|c| c.get_remote_member_id().unwrap() == "bob")
                .cloned()
                .unwrap();

            bob.disable_remote_audio().await.unwrap();
            assert_eq!(
                update_tracks(&env),
                vec![vec![TrackPatchCommand {
                    id: TrackId(1),
                    enabled: Some(false),
                    muted: None,
                }]],
            );

            bob.enable_remote_audio().await.unwrap();
            assert_eq!(update_tracks(&env).len(), 2);
            assert_eq!(update_tracks(&env)[1][0].id, TrackId(1));

            // Room-wide toggling still reaches every member.
            room.handle.disable_remote_audio().await.unwrap();
            let mut ids: Vec<_> =
                update_tracks(&env)[2].iter().map(|p| p.id).collect();
            ids.sort_by_key(|id| id.0);
            assert_eq!(ids, vec![TrackId(1), TrackId(2)]);
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn ice_failure_keeps_media_and_renegotiates() {
    LocalSet::new()
        .run_until(async {
            let env = Env::new();
            let room = joined_room(&env).await;
            offerer_peer(&env, false).await;
            let peer = env.peer();
            let transceivers = peer.transceivers.borrow().len();
            let offers = || {
                env.transport()
                    .sent_commands()
                    .into_iter()
                    .filter_map(|cmd| match cmd {
                        Command::MakeSdpOffer { mids, .. } => Some(mids),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
            };
            assert_eq!(offers().len(), 1);

            peer.fire_ice_connection_state(IceConnectionState::Failed);
            settle().await;

            assert_eq!(peer.ice_restarts.get(), 1);
            assert!(env.transport().sent_commands().iter().any(|cmd| matches!(
                cmd,
                Command::AddPeerConnectionMetrics {
                    metrics: PeerMetrics::IceConnectionState(
                        IceConnectionState::Failed
                    ),
                    ..
                }
            )));

            env.transport().event(Event::PeerUpdated {
                peer_id: PeerId(1),
                updates: vec![PeerUpdate::IceRestart],
                negotiation_role: Some(NegotiationRole::Offerer),
            });
            settle().await;

            let offers = offers();
            assert_eq!(offers.len(), 2);
            assert_eq!(offers[1], offers[0]);
            assert_eq!(env.peers.borrow().len(), 1);
            assert!(!peer.closed.get());
            assert_eq!(peer.transceivers.borrow().len(), transceivers);
            assert_eq!(peer.sending_tracks_count(), 1);
            assert_eq!(room.connections.borrow().len(), 1);
            assert!(room.losses.borrow().is_empty());
        })
        .await;
}
