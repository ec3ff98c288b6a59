//! Client-side media session engine for multi-party WebRTC calls.
//!
//! The engine owns signaling sessions, peer connections, local media and
//! per-track media state. Everything the host environment provides
//! (WebSocket, `RTCPeerConnection`, `MediaDevices`) is consumed through the
//! traits of the [`platform`] module.

#![allow(clippy::module_name_repetitions, clippy::must_use_candidate)]

#[macro_use]
pub mod utils;

pub mod api;
pub mod conf;
pub mod connection;
pub mod jason;
pub mod log;
pub mod media;
pub mod peer;
pub mod platform;
pub mod room;
pub mod rpc;

#[doc(inline)]
pub use self::{
    api::Error,
    conf::Conf,
    connection::{Connection, ConnectionHandle},
    jason::Jason,
    media::{
        track::{local::LocalMediaTrack, remote::RemoteMediaTrack},
        MediaManagerHandle, MediaStreamSettings,
    },
    room::{RoomCloseKind, RoomCloseReason, RoomHandle},
    rpc::ReconnectHandle,
};
