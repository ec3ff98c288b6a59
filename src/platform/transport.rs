//! Platform-specific functionality of an RPC transport.

use derive_more::Display;
use futures::stream::LocalBoxStream;
use medea_jason_proto::{ClientMsg, ServerMsg};
use tracerr::Traced;

use crate::{
    platform,
    rpc::{ClientDisconnect, CloseMsg},
};

/// [`RpcTransport`] states.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TransportState {
    /// Socket has been created. The connection is not open yet.
    Connecting,

    /// The connection is open and ready to communicate.
    Open,

    /// The connection is in the process of closing.
    Closing,

    /// The connection is closed or couldn't be opened.
    Closed(CloseMsg),
}

impl TransportState {
    /// Returns `true` if socket can be closed.
    #[inline]
    #[must_use]
    pub fn can_close(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

/// RPC transport between a client and a server.
#[cfg_attr(feature = "mockable", mockall::automock)]
pub trait RpcTransport {
    /// Returns [`LocalBoxStream`] of all messages received by this transport.
    fn on_message(&self) -> LocalBoxStream<'static, ServerMsg>;

    /// Sets reason, that will be sent to remote server when this transport
    /// will be dropped.
    fn set_close_reason(&self, reason: ClientDisconnect);

    /// Sends given [`ClientMsg`] to a server.
    ///
    /// # Errors
    ///
    /// Errors if sending [`ClientMsg`] fails.
    fn send(&self, msg: &ClientMsg) -> Result<(), Traced<TransportError>>;

    /// Subscribes to a [`RpcTransport`]'s [`TransportState`] changes.
    fn on_state_change(&self) -> LocalBoxStream<'static, TransportState>;
}

/// Errors that may occur when working with an [`RpcTransport`].
#[derive(Clone, Debug, Display, PartialEq)]
pub enum TransportError {
    /// Occurs when the port to which the connection is being attempted
    /// is being blocked.
    #[display(fmt = "Failed to create transport: {}", _0)]
    CreateSocket(platform::Error),

    /// Occurs when the connection close before becomes state active.
    #[display(fmt = "Failed to init transport")]
    InitSocket,

    /// Occurs when [`ClientMsg`] cannot be serialized.
    #[display(fmt = "Failed to parse client message: {}", _0)]
    SerializeClientMessage(String),

    /// Occurs when [`ServerMsg`] cannot be parsed.
    #[display(fmt = "Failed to parse server message: {}", _0)]
    ParseServerMessage(String),

    /// Occurs when [`ClientMsg`] cannot be sent over a closed socket.
    #[display(fmt = "Underlying socket is closed")]
    ClosedSocket,

    /// Occurs when sending [`ClientMsg`] fails.
    #[display(fmt = "Failed to send message: {}", _0)]
    SendMessage(platform::Error),
}
