//! Signaling session with a media server.

mod backoff_delayer;
mod heartbeat;
mod reconnect_handle;
mod rpc_session;
pub mod websocket;

use std::str::FromStr;

use derive_more::{AsRef, Display, From};
use medea_jason_proto::{
    CloseDescription, CloseReason as CloseByServerReason, Credential,
    MemberId, RoomId,
};
use url::Url;

use crate::platform::TransportError;

#[cfg(feature = "mockable")]
#[doc(inline)]
pub use self::rpc_session::MockRpcSession;
#[doc(inline)]
pub use self::{
    backoff_delayer::{BackoffDelayer, MAX_IMMEDIATE_RETRIES},
    heartbeat::{Heartbeat, IdleTimeout, PingInterval},
    reconnect_handle::{ReconnectError, ReconnectHandle},
    rpc_session::{
        RpcSession, SessionError, SessionLostReason, SessionState,
        WebSocketRpcSession,
    },
    websocket::{ClientDisconnect, ClientState, RpcEvent, WebSocketRpcClient},
};

/// URL of the signaling server endpoint.
#[derive(AsRef, Clone, Debug, Display, Eq, From, PartialEq)]
pub struct ApiUrl(Url);

/// Everything needed to connect to a signaling server and authorize in a
/// room, parsed out of a join token.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectionInfo {
    url: ApiUrl,
    room_id: RoomId,
    member_id: MemberId,
    credential: Credential,
}

impl ConnectionInfo {
    /// Returns the signaling server URL to connect to.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &ApiUrl {
        &self.url
    }

    /// Returns the ID of the room to join.
    #[inline]
    #[must_use]
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Returns the ID of the member to join as.
    #[inline]
    #[must_use]
    pub fn member_id(&self) -> &MemberId {
        &self.member_id
    }

    /// Returns the credential to authorize with.
    #[inline]
    #[must_use]
    pub fn credential(&self) -> &Credential {
        &self.credential
    }
}

/// Errors of parsing a join token into [`ConnectionInfo`].
#[derive(Clone, Debug, Display, PartialEq)]
pub enum ConnectionInfoParseError {
    /// Token is not a valid URL.
    #[display(fmt = "Failed to parse provided URL: {}", _0)]
    UrlParse(url::ParseError),

    /// URL path doesn't carry both a room ID and a member ID.
    #[display(fmt = "Provided URL doesn't have important segments")]
    NotEnoughSegments,

    /// URL has no `token` query parameter.
    #[display(fmt = "Provided URL does not contain auth token")]
    NoToken,
}

impl FromStr for ConnectionInfo {
    type Err = ConnectionInfoParseError;

    /// Parses `{host}/{room_id}/{member_id}?token={credential}`.
    ///
    /// The resulting [`ConnectionInfo::url`] is the provided one without the
    /// last two path segments, the query and the fragment.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use ConnectionInfoParseError as E;

        let mut url = Url::parse(s).map_err(E::UrlParse)?;

        let credential = url
            .query_pairs()
            .find(|(key, _)| key.as_ref() == "token")
            .map(|(_, token)| Credential(token.into_owned()))
            .ok_or(E::NoToken)?;

        url.set_query(None);
        url.set_fragment(None);

        let (room_id, member_id) = {
            let mut segments = url
                .path_segments()
                .ok_or(E::NotEnoughSegments)?
                .filter(|s| !s.is_empty())
                .rev();
            let member_id = segments
                .next()
                .map(|s| MemberId(s.to_owned()))
                .ok_or(E::NotEnoughSegments)?;
            let room_id = segments
                .next()
                .map(|s| RoomId(s.to_owned()))
                .ok_or(E::NotEnoughSegments)?;
            (room_id, member_id)
        };

        url.path_segments_mut()
            .map_err(|_| E::NotEnoughSegments)?
            .pop_if_empty()
            .pop()
            .pop();

        Ok(Self {
            url: url.into(),
            room_id,
            member_id,
            credential,
        })
    }
}

/// Reason of a signaling connection closing.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum CloseReason {
    /// Closed by the server.
    #[display(fmt = "closed by server: {}", _0)]
    ByServer(CloseByServerReason),

    /// Closed by the client.
    #[display(fmt = "closed by client: {}", reason)]
    ByClient {
        /// Client side reason of closing.
        reason: ClientDisconnect,

        /// Indicates whether closing is considered an error.
        is_err: bool,
    },
}

impl From<ClientDisconnect> for CloseReason {
    #[inline]
    fn from(reason: ClientDisconnect) -> Self {
        Self::ByClient {
            reason,
            is_err: reason.is_err(),
        }
    }
}

/// Reason of why a [`WebSocketRpcClient`] became closed.
#[derive(Clone, Debug, Display, PartialEq)]
pub enum ClosedStateReason {
    /// Connection was lost.
    #[display(fmt = "Connection lost: {}", _0)]
    ConnectionLost(ConnectionLostReason),

    /// Transport couldn't be established.
    #[display(fmt = "Failed to establish transport: {}", _0)]
    CouldNotEstablish(TransportError),

    /// Server sent something other than `RpcSettings` first.
    #[display(fmt = "First received server message is not RpcSettings")]
    FirstServerMsgIsNotRpcSettings,

    /// Never connected yet.
    #[display(fmt = "Never connected")]
    NeverConnected,
}

/// Reason of an unexpected connection loss.
#[derive(Clone, Copy, Debug, Display, PartialEq)]
pub enum ConnectionLostReason {
    /// Transport was closed with the provided message.
    #[display(fmt = "Transport closed: {}", _0)]
    WithMessage(CloseMsg),

    /// No server messages arrived within the idle timeout.
    #[display(fmt = "Connection is idle")]
    Idle,
}

/// Errors of a [`WebSocketRpcClient`].
#[derive(Clone, Debug, Display, From, PartialEq)]
pub enum RpcClientError {
    /// Connection couldn't be established or was closed while connecting.
    #[display(fmt = "Connection failed: {}", _0)]
    ConnectionFailed(ClosedStateReason),

    /// [`WebSocketRpcClient`] was dropped while connecting.
    #[display(fmt = "RPC client is gone")]
    #[from(ignore)]
    RpcClientGone,

    /// Underlying transport failed.
    #[display(fmt = "Transport error: {}", _0)]
    Transport(TransportError),
}

/// Close frame received from a transport.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum CloseMsg {
    /// Closed with the normal `1000` code and a known [`CloseByServerReason`].
    #[display(fmt = "Normal({}, {})", _0, _1)]
    Normal(u16, CloseByServerReason),

    /// Closed with any other code or without a recognizable reason.
    #[display(fmt = "Abnormal({})", _0)]
    Abnormal(u16),
}

impl From<(u16, String)> for CloseMsg {
    fn from((code, body): (u16, String)) -> Self {
        if code != 1000 {
            return Self::Abnormal(code);
        }
        match serde_json::from_str::<CloseDescription>(&body) {
            Ok(desc) => Self::Normal(code, desc.reason),
            Err(_) => Self::Abnormal(code),
        }
    }
}

#[cfg(test)]
mod spec {
    use super::*;

    #[test]
    fn parses_join_token() {
        let info: ConnectionInfo =
            "wss://example.com:8080/ws/room-1/alice?token=secret"
                .parse()
                .unwrap();

        assert_eq!(info.room_id(), &RoomId("room-1".into()));
        assert_eq!(info.member_id(), &MemberId("alice".into()));
        assert_eq!(info.credential(), &Credential("secret".into()));
        assert_eq!(info.url().as_ref().as_str(), "wss://example.com:8080/ws");
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(matches!(
            "not a url".parse::<ConnectionInfo>(),
            Err(ConnectionInfoParseError::UrlParse(_)),
        ));
        assert_eq!(
            "wss://example.com/room-1/alice".parse::<ConnectionInfo>(),
            Err(ConnectionInfoParseError::NoToken),
        );
        assert_eq!(
            "wss://example.com/alice?token=secret".parse::<ConnectionInfo>(),
            Err(ConnectionInfoParseError::NotEnoughSegments),
        );
    }

    #[test]
    fn parses_close_frames() {
        assert_eq!(
            CloseMsg::from((1000, r#"{"reason":"Evicted"}"#.to_owned())),
            CloseMsg::Normal(1000, CloseByServerReason::Evicted),
        );
        assert_eq!(
            CloseMsg::from((1000, "garbage".to_owned())),
            CloseMsg::Abnormal(1000),
        );
        assert_eq!(
            CloseMsg::from((1006, r#"{"reason":"Idle"}"#.to_owned())),
            CloseMsg::Abnormal(1006),
        );
    }
}
