//! Local and remote media tracks.

pub mod local;
pub mod remote;

/// Direction in which a remote track flows, as seen by the receiving side.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MediaDirection {
    /// Remote member publishes and the track is received.
    SendRecv,

    /// Remote member publishes, but receiving is disabled locally.
    SendOnly,

    /// Receiving is enabled locally, but the remote member doesn't publish.
    RecvOnly,

    /// Nothing flows.
    Inactive,
}

impl MediaDirection {
    /// Builds a [`MediaDirection`] out of whether the remote side sends and
    /// whether the local side receives.
    #[must_use]
    pub fn new(is_sending: bool, is_receiving: bool) -> Self {
        match (is_sending, is_receiving) {
            (true, true) => Self::SendRecv,
            (true, false) => Self::SendOnly,
            (false, true) => Self::RecvOnly,
            (false, false) => Self::Inactive,
        }
    }
}
