//! In-memory platform and a scripted signaling server for integration tests.

#![allow(dead_code)]

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    time::Duration,
};

use async_trait::async_trait;
use futures::{channel::mpsc, stream::LocalBoxStream, FutureExt as _};
use medea_jason_core::{
    media::{
        DisplayMediaStreamConstraints, MediaKind, MediaSourceKind,
        MediaStreamConstraints,
    },
    platform::{
        self, InputDeviceInfo, MediaDevices, MediaDisplayInfo,
        MediaStreamTrack, MediaStreamTrackState, PeerConnectionFactory, RpcTransport,
        RpcTransportFactory, RtcPeerConnection, SdpType, Transceiver,
        TransceiverDirection, TransportError, TransportState,
    },
    rpc::ClientDisconnect,
    Jason,
};
use medea_jason_proto::{
    stats::RtcStat, AudioSettings, ClientMsg, Command, Direction, Event,
    IceCandidate, IceConnectionState, MediaType, MemberId, PeerConnectionState,
    PeerId, PeerUpdate, RoomId, RpcSettings, ServerMsg, Track, TrackId,
    TrackPatchEvent, VideoSettings,
};
use tracerr::Traced;

/// Token every test joins the room with.
pub const TOKEN: &str = "ws://localhost:8080/ws/room/alice?token=secret";

/// ID of the room the [`TOKEN`] points to.
pub fn room_id() -> RoomId {
    RoomId::from("room")
}

/// Lets spawned tasks and short timers run.
pub async fn settle() {
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
}

pub struct FakeTrack {
    id: String,
    kind: MediaKind,
    is_display: bool,
    state: Cell<MediaStreamTrackState>,
    enabled: Cell<bool>,
    on_ended: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl FakeTrack {
    pub fn new(id: &str, kind: MediaKind, is_display: bool) -> Rc<Self> {
        Rc::new(Self {
            id: id.to_owned(),
            kind,
            is_display,
            state: Cell::new(MediaStreamTrackState::Live),
            enabled: Cell::new(true),
            on_ended: RefCell::new(None),
        })
    }

    /// Ends this track as if the device was unplugged.
    pub fn end(&self) {
        self.state.set(MediaStreamTrackState::Ended);
        let on_ended = self.on_ended.borrow_mut().take();
        if let Some(f) = on_ended {
            f();
        }
    }
}

impl MediaStreamTrack for FakeTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn device_id(&self) -> Option<String> {
        Some(format!("{}-device", self.kind.as_str()))
    }

    fn is_display(&self) -> bool {
        self.is_display
    }

    fn ready_state(&self) -> MediaStreamTrackState {
        self.state.get()
    }

    fn enabled(&self) -> bool {
        self.enabled.get()
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    fn stop(&self) {
        self.state.set(MediaStreamTrackState::Ended);
    }

    fn fork(&self) -> Rc<dyn MediaStreamTrack> {
        Self::new(&format!("{}-fork", self.id), self.kind, self.is_display)
    }

    fn on_ended(&self, f: Option<Box<dyn FnOnce()>>) {
        drop(self.on_ended.replace(f));
    }
}

/// [`MediaDevices`] handing out [`FakeTrack`]s and remembering them.
#[derive(Default)]
pub struct FakeMediaDevices {
    pub gum_requests: Cell<u32>,
    pub gdm_requests: Cell<u32>,
    pub fail_audio: Cell<bool>,
    pub fail_video: Cell<bool>,
    pub tracks: RefCell<Vec<Rc<FakeTrack>>>,

    /// Microphone pinned by each `getUserMedia()` request asking for audio.
    pub requested_mics: RefCell<Vec<Option<String>>>,

    /// How long every `getUserMedia()` request takes.
    pub gum_delay: Cell<Duration>,

    /// Current audio output device.
    pub output_audio_id: RefCell<Option<String>>,

    on_device_change: RefCell<Option<Box<dyn Fn()>>>,
}

impl FakeMediaDevices {
    fn next_track(&self, kind: MediaKind, is_display: bool) -> Rc<FakeTrack> {
        let id = format!("{}{}", kind.as_str(), self.tracks.borrow().len());
        let track = FakeTrack::new(&id, kind, is_display);
        self.tracks.borrow_mut().push(Rc::clone(&track));
        track
    }

    /// Fires the `devicechange` callback.
    pub fn change_devices(&self) {
        if let Some(f) = self.on_device_change.borrow().as_ref() {
            f();
        }
    }
}

#[async_trait(?Send)]
impl MediaDevices for FakeMediaDevices {
    async fn enumerate_devices(
        &self,
    ) -> Result<Vec<InputDeviceInfo>, platform::Error> {
        Ok(Vec::new())
    }

    async fn enumerate_displays(
        &self,
    ) -> Result<Vec<MediaDisplayInfo>, platform::Error> {
        Ok(vec![
            MediaDisplayInfo {
                device_id: "0".to_owned(),
                title: Some("Built-in display".to_owned()),
            },
            MediaDisplayInfo {
                device_id: "1".to_owned(),
                title: None,
            },
        ])
    }

    async fn get_user_media(
        &self,
        caps: MediaStreamConstraints,
    ) -> Result<Vec<Rc<dyn MediaStreamTrack>>, platform::GetUserMediaError>
    {
        self.gum_requests.set(self.gum_requests.get() + 1);
        if let Some(audio) = &caps.audio {
            self.requested_mics
                .borrow_mut()
                .push(audio.get_device_id().map(|id| id.value().clone()));
        }
        let delay = self.gum_delay.get();
        if delay > Duration::from_millis(0) {
            tokio::time::sleep(delay).await;
        }
        let mut tracks: Vec<Rc<dyn MediaStreamTrack>> = Vec::new();
        if caps.audio.is_some() {
            if self.fail_audio.get() {
                return Err(platform::GetUserMediaError::Audio(
                    platform::Error::new("NotReadableError", "mic is busy"),
                ));
            }
            tracks.push(self.next_track(MediaKind::Audio, false));
        }
        if caps.video.is_some() {
            if self.fail_video.get() {
                return Err(platform::GetUserMediaError::Video(
                    platform::Error::new("NotReadableError", "camera is busy"),
                ));
            }
            tracks.push(self.next_track(MediaKind::Video, false));
        }
        Ok(tracks)
    }

    async fn get_display_media(
        &self,
        _: DisplayMediaStreamConstraints,
    ) -> Result<Vec<Rc<dyn MediaStreamTrack>>, platform::Error> {
        self.gdm_requests.set(self.gdm_requests.get() + 1);
        Ok(vec![self.next_track(MediaKind::Video, true)])
    }

    async fn set_output_audio_id(
        &self,
        device_id: String,
    ) -> Result<(), platform::Error> {
        if !device_id.starts_with("audiooutput") {
            return Err(platform::Error::new(
                "NotFoundError",
                "no such audio output",
            ));
        }
        drop(self.output_audio_id.replace(Some(device_id)));
        Ok(())
    }

    fn on_device_change(&self, f: Option<Box<dyn Fn()>>) {
        drop(self.on_device_change.replace(f));
    }
}

pub struct FakeTransceiver {
    mid: Option<String>,
    direction: Cell<TransceiverDirection>,
    send_track: RefCell<Option<Rc<dyn MediaStreamTrack>>>,

    /// Whether the next attempt to insert a track fails.
    pub fail_next_insert: Cell<bool>,
}

impl FakeTransceiver {
    pub fn new(mid: Option<String>, direction: TransceiverDirection) -> Rc<Self> {
        Rc::new(Self {
            mid,
            direction: Cell::new(direction),
            send_track: RefCell::new(None),
            fail_next_insert: Cell::new(false),
        })
    }
}

#[async_trait(?Send)]
impl Transceiver for FakeTransceiver {
    fn mid(&self) -> Option<String> {
        self.mid.clone()
    }

    async fn set_send_track(
        &self,
        track: Option<Rc<dyn MediaStreamTrack>>,
    ) -> Result<(), platform::Error> {
        if track.is_some() && self.fail_next_insert.replace(false) {
            return Err(platform::Error::new(
                "InvalidStateError",
                "transceiver is stopped",
            ));
        }
        drop(self.send_track.replace(track));
        Ok(())
    }

    fn has_send_track(&self) -> bool {
        self.send_track.borrow().is_some()
    }

    fn direction(&self) -> TransceiverDirection {
        self.direction.get()
    }

    fn set_direction(&self, direction: TransceiverDirection) {
        self.direction.set(direction);
    }
}

type OnTrack = Box<dyn FnMut(Rc<dyn MediaStreamTrack>, Rc<dyn Transceiver>)>;

/// [`RtcPeerConnection`] recording every call.
#[derive(Default)]
pub struct FakePeerConnection {
    pub transceivers: RefCell<Vec<Rc<FakeTransceiver>>>,
    pub local_descriptions: RefCell<Vec<SdpType>>,
    pub remote_descriptions: RefCell<Vec<SdpType>>,
    pub ice_candidates: RefCell<Vec<IceCandidate>>,
    pub ice_restarts: Cell<u32>,
    pub closed: Cell<bool>,
    on_ice_candidate: RefCell<Option<Box<dyn FnMut(IceCandidate)>>>,
    on_ice_connection_state_change:
        RefCell<Option<Box<dyn FnMut(IceConnectionState)>>>,
    on_connection_state_change:
        RefCell<Option<Box<dyn FnMut(PeerConnectionState)>>>,
    on_track: RefCell<Option<OnTrack>>,
}

impl FakePeerConnection {
    pub fn fire_ice_connection_state(&self, state: IceConnectionState) {
        if let Some(f) = self.on_ice_connection_state_change.borrow_mut().as_mut()
        {
            f(state);
        }
    }

    pub fn fire_connection_state(&self, state: PeerConnectionState) {
        if let Some(f) = self.on_connection_state_change.borrow_mut().as_mut() {
            f(state);
        }
    }

    pub fn fire_ice_candidate(&self, candidate: IceCandidate) {
        if let Some(f) = self.on_ice_candidate.borrow_mut().as_mut() {
            f(candidate);
        }
    }

    /// Delivers a remote track on the transceiver with the provided `mid`.
    pub fn fire_track(&self, mid: &str, track: Rc<dyn MediaStreamTrack>) {
        let transceiver = self
            .transceivers
            .borrow()
            .iter()
            .find(|t| t.mid.as_deref() == Some(mid))
            .cloned();
        if let Some(transceiver) = transceiver {
            if let Some(f) = self.on_track.borrow_mut().as_mut() {
                f(track, transceiver);
            }
        }
    }

    /// Number of transceivers having a track to send.
    pub fn sending_tracks_count(&self) -> usize {
        self.transceivers
            .borrow()
            .iter()
            .filter(|t| t.has_send_track())
            .count()
    }
}

#[async_trait(?Send)]
impl RtcPeerConnection for FakePeerConnection {
    fn ice_connection_state(&self) -> IceConnectionState {
        IceConnectionState::New
    }

    fn connection_state(&self) -> Option<PeerConnectionState> {
        None
    }

    fn on_ice_candidate(&self, f: Option<Box<dyn FnMut(IceCandidate)>>) {
        drop(self.on_ice_candidate.replace(f));
    }

    fn on_ice_connection_state_change(
        &self,
        f: Option<Box<dyn FnMut(IceConnectionState)>>,
    ) {
        drop(self.on_ice_connection_state_change.replace(f));
    }

    fn on_connection_state_change(
        &self,
        f: Option<Box<dyn FnMut(PeerConnectionState)>>,
    ) {
        drop(self.on_connection_state_change.replace(f));
    }

    fn on_track(&self, f: Option<OnTrack>) {
        drop(self.on_track.replace(f));
    }

    async fn create_offer(&self) -> Result<String, platform::Error> {
        Ok(format!("offer{}", self.local_descriptions.borrow().len()))
    }

    async fn create_answer(&self) -> Result<String, platform::Error> {
        Ok(format!("answer{}", self.local_descriptions.borrow().len()))
    }

    async fn set_local_description(
        &self,
        sdp: SdpType,
    ) -> Result<(), platform::Error> {
        self.local_descriptions.borrow_mut().push(sdp);
        Ok(())
    }

    async fn set_remote_description(
        &self,
        sdp: SdpType,
    ) -> Result<(), platform::Error> {
        self.remote_descriptions.borrow_mut().push(sdp);
        Ok(())
    }

    async fn rollback(&self) -> Result<(), platform::Error> {
        Ok(())
    }

    async fn add_ice_candidate(
        &self,
        candidate: IceCandidate,
    ) -> Result<(), platform::Error> {
        self.ice_candidates.borrow_mut().push(candidate);
        Ok(())
    }

    fn restart_ice(&self) {
        self.ice_restarts.set(self.ice_restarts.get() + 1);
    }

    fn add_transceiver(
        &self,
        _: MediaKind,
        direction: TransceiverDirection,
    ) -> Rc<dyn Transceiver> {
        let mut transceivers = self.transceivers.borrow_mut();
        let transceiver =
            FakeTransceiver::new(Some(transceivers.len().to_string()), direction);
        transceivers.push(Rc::clone(&transceiver));
        transceiver
    }

    fn get_transceiver_by_mid(&self, mid: &str) -> Option<Rc<dyn Transceiver>> {
        self.transceivers
            .borrow()
            .iter()
            .find(|t| t.mid.as_deref() == Some(mid))
            .map(|t| Rc::clone(t) as Rc<dyn Transceiver>)
    }

    async fn get_stats(&self) -> Result<Vec<RtcStat>, platform::Error> {
        Ok(Vec::new())
    }

    fn close(&self) {
        self.closed.set(true);
    }
}

/// Signaling server side of a [`FakeTransport`].
#[derive(Default)]
pub struct FakeTransport {
    pub sent: RefCell<Vec<ClientMsg>>,
    pub close_reason: Cell<Option<ClientDisconnect>>,

    /// Whether `UpdateTracks` commands are confirmed right away.
    pub confirm_updates: Cell<bool>,

    msg_subs: RefCell<Vec<mpsc::UnboundedSender<ServerMsg>>>,
    state_subs: RefCell<Vec<mpsc::UnboundedSender<TransportState>>>,
}

impl FakeTransport {
    pub fn new() -> Rc<Self> {
        let this = Rc::new(Self::default());
        this.confirm_updates.set(true);
        this
    }

    pub fn push(&self, msg: ServerMsg) {
        self.msg_subs
            .borrow_mut()
            .retain(|tx| tx.unbounded_send(msg.clone()).is_ok());
    }

    /// Sends the provided [`Event`] of the test room.
    pub fn event(&self, event: Event) {
        self.push(ServerMsg::Event {
            room_id: room_id(),
            event,
        });
    }

    pub fn set_state(&self, state: TransportState) {
        self.state_subs
            .borrow_mut()
            .retain(|tx| tx.unbounded_send(state).is_ok());
    }

    pub fn sent_commands(&self) -> Vec<Command> {
        self.sent
            .borrow()
            .iter()
            .filter_map(|msg| match msg {
                ClientMsg::Command { command, .. } => Some(command.clone()),
                ClientMsg::Pong(_) => None,
            })
            .collect()
    }

    /// Answers `UpdateTracks` with the matching `PeerUpdated`.
    fn confirm(&self, peer_id: PeerId, patches: &[TrackPatchCommandView]) {
        let updates = patches
            .iter()
            .map(|p| {
                PeerUpdate::Updated(TrackPatchEvent {
                    id: p.0,
                    enabled_individual: p.1,
                    enabled_general: p.1,
                    muted: p.2,
                })
            })
            .collect();
        self.event(Event::PeerUpdated {
            peer_id,
            updates,
            negotiation_role: None,
        });
    }
}

type TrackPatchCommandView = (TrackId, Option<bool>, Option<bool>);

impl RpcTransport for FakeTransport {
    fn on_message(&self) -> LocalBoxStream<'static, ServerMsg> {
        let (tx, rx) = mpsc::unbounded();
        let _ = tx.unbounded_send(ServerMsg::RpcSettings(RpcSettings {
            idle_timeout_ms: 10_000,
            ping_interval_ms: 3_000,
        }));
        self.msg_subs.borrow_mut().push(tx);
        Box::pin(rx)
    }

    fn set_close_reason(&self, reason: ClientDisconnect) {
        self.close_reason.set(Some(reason));
    }

    fn send(&self, msg: &ClientMsg) -> Result<(), Traced<TransportError>> {
        self.sent.borrow_mut().push(msg.clone());
        if let ClientMsg::Command { command, .. } = msg {
            match command {
                Command::JoinRoom { member_id, .. } => {
                    self.event(Event::RoomJoined {
                        member_id: member_id.clone(),
                    });
                }
                Command::UpdateTracks {
                    peer_id,
                    tracks_patches,
                } if self.confirm_updates.get() => {
                    let patches: Vec<_> = tracks_patches
                        .iter()
                        .map(|p| (p.id, p.enabled, p.muted))
                        .collect();
                    self.confirm(*peer_id, &patches);
                }
                _ => (),
            }
        }
        Ok(())
    }

    fn on_state_change(&self) -> LocalBoxStream<'static, TransportState> {
        let (tx, rx) = mpsc::unbounded();
        self.state_subs.borrow_mut().push(tx);
        Box::pin(rx)
    }
}

/// Everything a test drives a [`Jason`] through.
pub struct Env {
    pub jason: Jason,
    pub transports: Rc<RefCell<Vec<Rc<FakeTransport>>>>,
    pub peers: Rc<RefCell<Vec<Rc<FakePeerConnection>>>>,
    pub devices: Rc<FakeMediaDevices>,
}

impl Env {
    pub fn new() -> Self {
        let transports = Rc::new(RefCell::new(Vec::new()));
        let peers = Rc::new(RefCell::new(Vec::new()));
        let devices = Rc::new(FakeMediaDevices::default());
        let jason = Jason::new(
            transport_factory(Rc::clone(&transports)),
            peer_factory(Rc::clone(&peers)),
            Rc::clone(&devices) as Rc<dyn MediaDevices>,
        );
        Self {
            jason,
            transports,
            peers,
            devices,
        }
    }

    /// Last created [`FakeTransport`].
    pub fn transport(&self) -> Rc<FakeTransport> {
        Rc::clone(self.transports.borrow().last().unwrap())
    }

    /// Last created [`FakePeerConnection`].
    pub fn peer(&self) -> Rc<FakePeerConnection> {
        Rc::clone(self.peers.borrow().last().unwrap())
    }
}

/// Returns [`RpcTransportFactory`] of [`FakeTransport`]s, storing each
/// created one into the provided `transports`.
pub fn transport_factory(
    transports: Rc<RefCell<Vec<Rc<FakeTransport>>>>,
) -> RpcTransportFactory {
    Box::new(move |_| {
        let transports = Rc::clone(&transports);
        async move {
            let transport = FakeTransport::new();
            transports.borrow_mut().push(Rc::clone(&transport));
            Ok(transport as Rc<dyn RpcTransport>)
        }
        .boxed_local()
    })
}

/// Returns [`PeerConnectionFactory`] of [`FakePeerConnection`]s, storing
/// each created one into the provided `peers`.
pub fn peer_factory(
    peers: Rc<RefCell<Vec<Rc<FakePeerConnection>>>>,
) -> PeerConnectionFactory {
    Rc::new(move |_, _| {
        let peer = Rc::new(FakePeerConnection::default());
        peers.borrow_mut().push(Rc::clone(&peer));
        Ok(peer as Rc<dyn RtcPeerConnection>)
    })
}

/// Outbound audio [`Track`] sent to `bob`.
pub fn send_audio(id: u32, required: bool) -> Track {
    Track {
        id: TrackId(id),
        direction: Direction::Send {
            receivers: vec![MemberId::from("bob")],
            mid: None,
        },
        media_type: MediaType::Audio(AudioSettings { required }),
    }
}

/// Outbound device video [`Track`] sent to `bob`.
pub fn send_video(id: u32, required: bool) -> Track {
    Track {
        id: TrackId(id),
        direction: Direction::Send {
            receivers: vec![MemberId::from("bob")],
            mid: None,
        },
        media_type: MediaType::Video(VideoSettings {
            required,
            source_kind: MediaSourceKind::Device,
        }),
    }
}

/// Inbound audio [`Track`] published by `bob` on the provided `mid`.
pub fn recv_audio(id: u32, mid: &str) -> Track {
    Track {
        id: TrackId(id),
        direction: Direction::Recv {
            sender: MemberId::from("bob"),
            mid: Some(mid.to_owned()),
        },
        media_type: MediaType::Audio(AudioSettings { required: false }),
    }
}
