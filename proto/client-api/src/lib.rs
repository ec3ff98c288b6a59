//! Client API protocol spoken between `medea-jason-core` and a signaling
//! server.
//!
//! All messages are JSON encoded. [`ServerMsg`]s flow from the server to the
//! client, [`ClientMsg`]s flow back.
//!
//! # Contribution guide
//!
//! Avoid using 64 bit types. Host bindings of the engine may pass these
//! messages through runtimes that have no native 64 bit integers.

#![deny(broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod state;
pub mod stats;

use std::collections::HashMap;

use derive_more::{Constructor, Display, From};
use medea_macro::dispatchable;
use serde::{Deserialize, Serialize};

use self::stats::RtcStat;

/// ID of `Room`.
#[derive(
    Clone, Debug, Deserialize, Display, Eq, From, Hash, PartialEq, Serialize,
)]
#[from(forward)]
pub struct RoomId(pub String);

/// ID of `Member`.
#[derive(
    Clone, Debug, Deserialize, Display, Eq, From, Hash, PartialEq, Serialize,
)]
#[from(forward)]
pub struct MemberId(pub String);

/// ID of `Peer`.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Display,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct PeerId(pub u32);

/// ID of `MediaTrack`.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Display,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct TrackId(pub u32);

/// Credential used for `Member` authentication.
#[derive(
    Clone, Debug, Deserialize, Display, Eq, From, Hash, PartialEq, Serialize,
)]
#[from(forward)]
pub struct Credential(pub String);

/// Message sent by a signaling server to a client.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "msg", content = "data")]
pub enum ServerMsg {
    /// `ping` message that the server is expected to send periodically for
    /// probing client's aliveness.
    Ping(u32),

    /// Server notifies the client about happened facts and it reacts on them
    /// to reach the proper state.
    Event {
        /// ID of `Room` that this [`Event`] is associated with.
        room_id: RoomId,

        /// Actual [`Event`] sent to the client.
        event: Event,
    },

    /// Server notifies the client about necessity to update its RPC settings.
    RpcSettings(RpcSettings),
}

/// Message sent by a client to a signaling server.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum ClientMsg {
    /// `pong` message that the client answers with to the received
    /// [`ServerMsg::Ping`].
    Pong(u32),

    /// Request of the client to change the state on the server.
    Command {
        /// ID of `Room` that this [`Command`] is associated with.
        room_id: RoomId,

        /// Actual [`Command`] sent to the server.
        command: Command,
    },
}

/// RPC settings of a client received from a signaling server.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RpcSettings {
    /// Timeout of considering the client as lost by the server when it
    /// doesn't receive [`ClientMsg::Pong`].
    ///
    /// Unit: millisecond.
    pub idle_timeout_ms: u32,

    /// Interval that the server sends [`ServerMsg::Ping`] with.
    ///
    /// Unit: millisecond.
    pub ping_interval_ms: u32,
}

/// Request of a client to a signaling server.
#[dispatchable]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "command", content = "data")]
pub enum Command {
    /// Request to join `Room`.
    JoinRoom {
        /// ID of `Member` with which [`Credential`] the client joins.
        member_id: MemberId,

        /// [`Credential`] of the client's `Member`.
        credential: Credential,
    },

    /// Request to leave `Room`.
    LeaveRoom {
        /// ID of leaving `Member`.
        member_id: MemberId,
    },

    /// Client sends its SDP offer.
    MakeSdpOffer {
        /// ID of `Peer` the SDP offer is made for.
        peer_id: PeerId,

        /// SDP offer itself.
        sdp_offer: String,

        /// Associations between [`Track`]s and transceivers' [mid][1]s.
        ///
        /// [1]: https://tools.ietf.org/html/rfc5888#section-4
        mids: HashMap<TrackId, String>,

        /// Statuses of `Peer`'s transceivers.
        transceivers_statuses: HashMap<TrackId, bool>,
    },

    /// Client sends its SDP answer.
    MakeSdpAnswer {
        /// ID of `Peer` the SDP answer is made for.
        peer_id: PeerId,

        /// SDP answer itself.
        sdp_answer: String,

        /// Statuses of `Peer`'s transceivers.
        transceivers_statuses: HashMap<TrackId, bool>,
    },

    /// Client sends an ICE candidate it discovered.
    SetIceCandidate {
        peer_id: PeerId,
        candidate: IceCandidate,
    },

    /// Client sends metrics of its `Peer`.
    AddPeerConnectionMetrics {
        peer_id: PeerId,
        metrics: PeerMetrics,
    },

    /// Client asks to apply changes to its [`Track`]s.
    UpdateTracks {
        peer_id: PeerId,
        tracks_patches: Vec<TrackPatchCommand>,
    },

    /// Client asks for the actual `Room` state after a reconnection,
    /// reporting its own view of it.
    SynchronizeMe {
        /// Client-side view of the `Room`.
        state: state::Room,
    },
}

/// Metrics of a `Peer` sent with [`Command::AddPeerConnectionMetrics`].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum PeerMetrics {
    /// Peer's ICE connection state changed.
    IceConnectionState(IceConnectionState),

    /// Peer's connection state changed.
    PeerConnectionState(PeerConnectionState),

    /// Sampled RTC stats.
    RtcStats(Vec<RtcStat>),
}

/// [RTCIceConnectionState][1] representation.
///
/// [1]: https://w3.org/TR/webrtc/#rtciceconnectionstate-enum
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Failed,
    Disconnected,
    Closed,
}

/// [RTCPeerConnectionState][1] representation.
///
/// [1]: https://w3.org/TR/webrtc/#rtcpeerconnectionstate-enum
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl From<IceConnectionState> for PeerConnectionState {
    fn from(ice_con_state: IceConnectionState) -> Self {
        use IceConnectionState as IceState;

        match ice_con_state {
            IceState::New => Self::New,
            IceState::Checking => Self::Connecting,
            IceState::Connected | IceState::Completed => Self::Connected,
            IceState::Failed => Self::Failed,
            IceState::Disconnected => Self::Disconnected,
            IceState::Closed => Self::Closed,
        }
    }
}

/// Reason of disconnecting a client from a signaling server.
#[derive(
    Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize,
)]
pub enum CloseReason {
    /// Client session was finished on the server side.
    Finished,

    /// Old connection was closed due to a client reconnection.
    Reconnected,

    /// Connection has been inactive for a while and thus considered idle
    /// by the server.
    Idle,

    /// Establishing of connection with the server was rejected on the server
    /// side.
    ///
    /// Most likely because of an incorrect `Member` credential.
    Rejected,

    /// Server internal error has occurred while connecting.
    InternalError,

    /// Client was evicted on the server side.
    Evicted,
}

/// Description sent by a signaling server when a connection is closed.
#[derive(Constructor, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CloseDescription {
    /// Reason of why the connection was closed.
    pub reason: CloseReason,
}

/// Fact happened on a signaling server that a client must react on.
#[dispatchable(self: &Self, async_trait(?Send))]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum Event {
    /// Client joined `Room`.
    RoomJoined {
        /// ID of the joined `Member`.
        member_id: MemberId,
    },

    /// Client left `Room`.
    RoomLeft {
        /// [`CloseReason`] with which the client left `Room`.
        close_reason: CloseReason,
    },

    /// New `Peer` was created and the client must set it up.
    PeerCreated {
        peer_id: PeerId,
        negotiation_role: NegotiationRole,
        tracks: Vec<Track>,
        ice_servers: Vec<IceServer>,
        force_relay: bool,
    },

    /// Remote SDP answer for the client's offer.
    SdpAnswerMade { peer_id: PeerId, sdp_answer: String },

    /// The client's local SDP offer was applied on the server.
    LocalDescriptionApplied { peer_id: PeerId, sdp_offer: String },

    /// Remote ICE candidate for a `Peer`.
    IceCandidateDiscovered {
        peer_id: PeerId,
        candidate: IceCandidate,
    },

    /// `Peer`s were removed and the client must dispose them.
    PeersRemoved { peer_ids: Vec<PeerId> },

    /// `Peer`'s [`Track`]s were updated.
    PeerUpdated {
        peer_id: PeerId,

        /// Updates to apply in the given order.
        updates: Vec<PeerUpdate>,

        /// Renegotiation role, if the updates require one.
        negotiation_role: Option<NegotiationRole>,
    },

    /// Quality score of the connection with a partner `Member` changed.
    ConnectionQualityUpdated {
        partner_member_id: MemberId,
        quality_score: ConnectionQualityScore,
    },

    /// Authoritative `Room` state sent in response to
    /// [`Command::SynchronizeMe`].
    StateSynchronized { state: state::Room },
}

/// Role of a `Peer` in the negotiation process.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum NegotiationRole {
    /// Client must create the SDP offer.
    Offerer,

    /// Client must answer the provided SDP offer.
    Answerer(String),
}

/// Single update of a `Peer`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum PeerUpdate {
    /// New [`Track`] was added.
    Added(Track),

    /// [`Track`] was removed.
    Removed(TrackId),

    /// [`Track`] was patched.
    Updated(TrackPatchEvent),

    /// ICE restart was requested.
    IceRestart,
}

/// Representation of an [RTCIceCandidateInit][1].
///
/// [1]: https://w3.org/TR/webrtc/#dom-rtcicecandidateinit
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_m_line_index: Option<u16>,
    pub sdp_mid: Option<String>,
}

/// Media track of a `Peer`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Track {
    pub id: TrackId,
    pub direction: Direction,
    pub media_type: MediaType,
}

impl Track {
    /// Indicates whether this [`Track`] is required to call starting.
    #[inline]
    #[must_use]
    pub fn required(&self) -> bool {
        self.media_type.required()
    }
}

/// Patch of a [`Track`] requested by a client.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TrackPatchCommand {
    pub id: TrackId,
    pub enabled: Option<bool>,
    pub muted: Option<bool>,
}

/// Patch of a [`Track`] which a client must apply.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct TrackPatchEvent {
    /// ID of the [`Track`] to patch.
    pub id: TrackId,

    /// Media exchange state of the connection side this patch is sent to.
    pub enabled_individual: Option<bool>,

    /// Media exchange state of the whole [`Track`], considering both sides.
    pub enabled_general: Option<bool>,

    /// Mute state of the [`Track`].
    pub muted: Option<bool>,
}

impl From<TrackPatchCommand> for TrackPatchEvent {
    #[inline]
    fn from(from: TrackPatchCommand) -> Self {
        Self {
            id: from.id,
            enabled_individual: from.enabled,
            enabled_general: None,
            muted: from.muted,
        }
    }
}

impl TrackPatchEvent {
    /// Returns an empty [`TrackPatchEvent`] for the provided [`TrackId`].
    #[inline]
    #[must_use]
    pub fn new(id: TrackId) -> Self {
        Self {
            id,
            enabled_general: None,
            enabled_individual: None,
            muted: None,
        }
    }

    /// Merges `another` into this [`TrackPatchEvent`].
    ///
    /// Does nothing if the [`TrackId`]s differ.
    pub fn merge(&mut self, another: &Self) {
        if self.id != another.id {
            return;
        }

        if let Some(enabled_general) = another.enabled_general {
            self.enabled_general = Some(enabled_general);
        }
        if let Some(enabled_individual) = another.enabled_individual {
            self.enabled_individual = Some(enabled_individual);
        }
        if let Some(muted) = another.muted {
            self.muted = Some(muted);
        }
    }
}

/// Representation of an [RTCIceServer][1].
///
/// [1]: https://w3.org/TR/webrtc/#rtciceserver-dictionary
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Direction of a [`Track`].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Direction {
    /// Outbound [`Track`] sent to the listed `Member`s.
    Send {
        receivers: Vec<MemberId>,
        mid: Option<String>,
    },

    /// Inbound [`Track`] published by the `sender` `Member`.
    Recv {
        sender: MemberId,
        mid: Option<String>,
    },
}

/// Type of a [`Track`]'s media.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum MediaType {
    Audio(AudioSettings),
    Video(VideoSettings),
}

impl MediaType {
    /// Indicates whether the [`Track`] of this [`MediaType`] is required to
    /// call starting.
    #[inline]
    #[must_use]
    pub fn required(&self) -> bool {
        match self {
            Self::Audio(audio) => audio.required,
            Self::Video(video) => video.required,
        }
    }

    /// Returns [`MediaSourceKind`] of this [`MediaType`].
    #[inline]
    #[must_use]
    pub fn source_kind(&self) -> MediaSourceKind {
        match self {
            Self::Audio(_) => MediaSourceKind::Device,
            Self::Video(video) => video.source_kind,
        }
    }
}

/// Settings of an audio [`Track`].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AudioSettings {
    /// Disabling of a required [`Track`] is prohibited.
    pub required: bool,
}

/// Settings of a video [`Track`].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VideoSettings {
    /// Disabling of a required [`Track`] is prohibited.
    pub required: bool,

    /// Source of the video.
    pub source_kind: MediaSourceKind,
}

/// Source of a media.
#[derive(
    Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize,
)]
pub enum MediaSourceKind {
    /// Media is sourced from some media device (webcam or microphone).
    Device,

    /// Media is obtained with screen capture.
    Display,
}

/// Estimated connection quality.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Display,
    Eq,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub enum ConnectionQualityScore {
    /// Nearly all users dissatisfied.
    Poor = 1,

    /// Many users dissatisfied.
    Low = 2,

    /// Some users dissatisfied.
    Medium = 3,

    /// Satisfied.
    High = 4,
}
