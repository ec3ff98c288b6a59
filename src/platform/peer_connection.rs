//! Native `RTCPeerConnection`.

use std::rc::Rc;

use async_trait::async_trait;
use medea_jason_proto::{
    stats::RtcStat, IceCandidate, IceConnectionState, PeerConnectionState,
};

use crate::{
    media::MediaKind,
    platform::{Error, MediaStreamTrack, Transceiver, TransceiverDirection},
};

/// Description of an SDP to be applied.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SdpType {
    /// `offer` SDP.
    Offer(String),

    /// `answer` SDP.
    Answer(String),
}

/// Host's `RTCPeerConnection`.
///
/// Event setters replace the previously set function, `None` unsets it.
#[async_trait(?Send)]
pub trait RtcPeerConnection {
    /// Current ICE connection state.
    fn ice_connection_state(&self) -> IceConnectionState;

    /// Current aggregated connection state, if the host supports it.
    fn connection_state(&self) -> Option<PeerConnectionState>;

    /// Sets a function invoked on every locally gathered ICE candidate.
    fn on_ice_candidate(&self, f: Option<Box<dyn FnMut(IceCandidate)>>);

    /// Sets a function invoked on ICE connection state changes.
    fn on_ice_connection_state_change(
        &self,
        f: Option<Box<dyn FnMut(IceConnectionState)>>,
    );

    /// Sets a function invoked on connection state changes.
    fn on_connection_state_change(
        &self,
        f: Option<Box<dyn FnMut(PeerConnectionState)>>,
    );

    /// Sets a function invoked when a remote track arrives.
    fn on_track(
        &self,
        f: Option<Box<dyn FnMut(Rc<dyn MediaStreamTrack>, Rc<dyn Transceiver>)>>,
    );

    /// Creates an SDP offer.
    async fn create_offer(&self) -> Result<String, Error>;

    /// Creates an SDP answer.
    async fn create_answer(&self) -> Result<String, Error>;

    /// Applies the local SDP.
    async fn set_local_description(&self, sdp: SdpType) -> Result<(), Error>;

    /// Applies the remote SDP.
    async fn set_remote_description(&self, sdp: SdpType)
        -> Result<(), Error>;

    /// Rolls the local description back to the last stable one.
    async fn rollback(&self) -> Result<(), Error>;

    /// Adds a remote ICE candidate.
    async fn add_ice_candidate(
        &self,
        candidate: IceCandidate,
    ) -> Result<(), Error>;

    /// Marks the connection so the next offer restarts ICE.
    fn restart_ice(&self);

    /// Creates a new [`Transceiver`] of the provided [`MediaKind`].
    fn add_transceiver(
        &self,
        kind: MediaKind,
        direction: TransceiverDirection,
    ) -> Rc<dyn Transceiver>;

    /// Looks up a [`Transceiver`] by its negotiated `mid`.
    fn get_transceiver_by_mid(&self, mid: &str) -> Option<Rc<dyn Transceiver>>;

    /// Collects the statistics of this connection.
    async fn get_stats(&self) -> Result<Vec<RtcStat>, Error>;

    /// Closes this connection.
    fn close(&self);
}
