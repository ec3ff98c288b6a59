//! Seam between the engine and the environment it runs in.
//!
//! A host provides implementations of [`RpcTransport`], [`RtcPeerConnection`],
//! [`Transceiver`], [`MediaDevices`] and [`MediaStreamTrack`]. Everything
//! else in the crate talks to the outer world only through these traits.

mod callback;
mod error;
mod media_devices;
mod media_track;
mod peer_connection;
mod transceiver;
pub mod transport;

use std::{future::Future, rc::Rc, time::Duration};

use futures::future::LocalBoxFuture;
use medea_jason_proto::IceServer;
use tracerr::Traced;

use crate::rpc::ApiUrl;

#[doc(inline)]
pub use self::{
    callback::Callback,
    error::{Error, GetUserMediaError},
    media_devices::{
        InputDeviceInfo, MediaDeviceKind, MediaDevices, MediaDisplayInfo,
    },
    media_track::{MediaStreamTrack, MediaStreamTrackState},
    peer_connection::{RtcPeerConnection, SdpType},
    transceiver::{Transceiver, TransceiverDirection},
    transport::{RpcTransport, TransportError, TransportState},
};

/// Factory producing new [`RpcTransport`]s connected to the provided
/// [`ApiUrl`].
pub type RpcTransportFactory = Box<
    dyn Fn(
        ApiUrl,
    ) -> LocalBoxFuture<
        'static,
        Result<Rc<dyn RpcTransport>, Traced<TransportError>>,
    >,
>;

/// Factory producing new [`RtcPeerConnection`]s with the provided ICE servers.
///
/// The second argument tells whether the connection must be relayed through
/// TURN servers only.
pub type PeerConnectionFactory =
    Rc<dyn Fn(Vec<IceServer>, bool) -> Result<Rc<dyn RtcPeerConnection>, Error>>;

/// Spawns the provided [`Future`] on the current thread.
///
/// Must be called inside a [`tokio::task::LocalSet`].
#[inline]
pub fn spawn<F>(task: F)
where
    F: Future<Output = ()> + 'static,
{
    drop(tokio::task::spawn_local(task));
}

/// [`Future`] which resolves after the provided [`Duration`].
#[inline]
pub async fn delay_for(delay: Duration) {
    tokio::time::sleep(delay).await;
}

/// Returns the current moment of the runtime clock.
///
/// Follows the runtime's virtual time when it is paused.
#[inline]
pub fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}
