//! Snapshots of a `Room` state exchanged on reconnection.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{
    IceCandidate, IceServer, MediaType, MemberId, NegotiationRole, PeerId,
    TrackId,
};

/// State of a `Room`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Room {
    /// States of all `Peer`s of this `Room`.
    pub peers: HashMap<PeerId, Peer>,
}

/// State of a `Peer`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Peer {
    pub id: PeerId,
    pub senders: HashMap<TrackId, Sender>,
    pub receivers: HashMap<TrackId, Receiver>,
    pub force_relay: bool,
    pub ice_servers: Vec<IceServer>,
    pub negotiation_role: Option<NegotiationRole>,
    pub local_sdp: Option<String>,
    pub remote_sdp: Option<String>,
    pub restart_ice: bool,
    pub ice_candidates: HashSet<IceCandidate>,
}

/// State of an outbound track.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Sender {
    pub id: TrackId,
    pub mid: Option<String>,
    pub media_type: MediaType,
    pub receivers: Vec<MemberId>,
    pub enabled_individual: bool,
    pub enabled_general: bool,
    pub muted: bool,
}

/// State of an inbound track.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Receiver {
    pub id: TrackId,
    pub mid: Option<String>,
    pub media_type: MediaType,
    pub sender_id: MemberId,
    pub enabled_individual: bool,
    pub enabled_general: bool,
    pub muted: bool,
}
