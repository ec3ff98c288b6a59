//! Native `RTCRtpTransceiver`.

use std::rc::Rc;

use async_trait::async_trait;
use bitflags::bitflags;
use medea_jason_proto::Direction as DirectionProto;

use crate::platform::{Error, MediaStreamTrack};

bitflags! {
    /// Representation of an `RTCRtpTransceiverDirection`.
    ///
    /// `sendrecv` is `SEND | RECV`.
    pub struct TransceiverDirection: u8 {
        /// `inactive` direction.
        const INACTIVE = 0b00;

        /// `sendonly` direction.
        const SEND = 0b01;

        /// `recvonly` direction.
        const RECV = 0b10;
    }
}

impl From<&DirectionProto> for TransceiverDirection {
    #[inline]
    fn from(proto: &DirectionProto) -> Self {
        match proto {
            DirectionProto::Recv { .. } => Self::RECV,
            DirectionProto::Send { .. } => Self::SEND,
        }
    }
}

/// Pairing of an outbound and an inbound media stream sharing one `mid`.
#[async_trait(?Send)]
pub trait Transceiver {
    /// Media ID negotiated for this [`Transceiver`], if negotiated already.
    fn mid(&self) -> Option<String>;

    /// Replaces the outbound track of this [`Transceiver`].
    async fn set_send_track(
        &self,
        track: Option<Rc<dyn MediaStreamTrack>>,
    ) -> Result<(), Error>;

    /// Indicates whether an outbound track is attached.
    fn has_send_track(&self) -> bool;

    /// Current [`TransceiverDirection`].
    fn direction(&self) -> TransceiverDirection;

    /// Sets the [`TransceiverDirection`] of this [`Transceiver`].
    fn set_direction(&self, direction: TransceiverDirection);

    /// Adds the provided [`TransceiverDirection`] to the current one.
    fn add_direction(&self, direction: TransceiverDirection) {
        self.set_direction(self.direction() | direction);
    }

    /// Removes the provided [`TransceiverDirection`] from the current one.
    fn sub_direction(&self, direction: TransceiverDirection) {
        self.set_direction(self.direction() - direction);
    }

    /// Indicates whether the current direction contains the provided one.
    #[inline]
    fn has_direction(&self, direction: TransceiverDirection) -> bool {
        self.direction().contains(direction)
    }
}
