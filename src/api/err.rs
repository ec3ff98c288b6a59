//! Errors the host receives from the engine.

use std::borrow::Cow;

use derive_more::{Display, From};
use tracerr::{Trace, Traced};

use crate::{
    media::{
        EnumerateDevicesError, EnumerateDisplaysError, GetDisplayMediaError,
        GetUserMediaError, InitLocalTracksError, SetOutputAudioIdError,
    },
    peer::PeerError,
    platform::{self, TransportError},
    room::{ChangeMediaStateError, ConstraintsUpdateError, RoomJoinError},
    rpc::{
        ClosedStateReason, ReconnectError, RpcClientError, SessionError,
        SessionLostReason,
    },
    utils::HandleDetachedError,
};

/// Any error the engine reports to the host.
#[derive(Clone, Debug, Display, From)]
pub enum Error {
    /// Operation was invoked on a disposed or detached object.
    State(StateError),

    /// Provided input is malformed.
    Format(FormatException),

    /// Requested media state transition can't be performed.
    MediaStateTransition(MediaStateTransitionException),

    /// [`MediaStreamSettings`] couldn't be applied.
    ///
    /// [`MediaStreamSettings`]: crate::media::MediaStreamSettings
    MediaSettingsUpdate(MediaSettingsUpdateException),

    /// Local media couldn't be acquired.
    LocalMedia(LocalMediaInitException),

    /// Signaling failed.
    RpcClient(RpcClientException),

    /// Unexpected engine failure.
    Internal(InternalException),

    /// Media devices couldn't be listed.
    EnumerateDevices(EnumerateDevicesException),

    /// Audio output couldn't be switched to the requested device.
    InvalidOutputAudioDeviceId(InvalidOutputAudioDeviceIdException),
}

/// Error thrown when the operation wasn't allowed by the current state of the
/// object.
#[derive(Clone, Debug, Display)]
#[display(fmt = "StateError: {}", message)]
pub struct StateError {
    /// Message describing the problem.
    message: Cow<'static, str>,

    /// Stacktrace of this [`StateError`].
    trace: Trace,
}

impl StateError {
    /// Creates a new [`StateError`] with the provided `message` and `trace`.
    #[inline]
    #[must_use]
    pub fn new<T: Into<Cow<'static, str>>>(message: T, trace: Trace) -> Self {
        Self {
            message: message.into(),
            trace,
        }
    }

    /// Returns message describing the problem.
    #[must_use]
    pub fn message(&self) -> String {
        self.message.to_string()
    }

    /// Returns stacktrace of this [`StateError`].
    #[must_use]
    pub fn trace(&self) -> String {
        self.trace.to_string()
    }
}

/// Possible error kinds of a [`LocalMediaInitException`].
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum LocalMediaInitExceptionKind {
    /// Device media request failed for an unknown media.
    GetUserMediaFailed,

    /// Device media request failed because of audio.
    GetUserMediaAudioFailed,

    /// Device media request failed because of video.
    GetUserMediaVideoFailed,

    /// Display media request failed.
    GetDisplayMediaFailed,

    /// Local track was ended right after it was acquired.
    LocalTrackIsEnded,
}

/// Exception thrown when accessing media devices.
#[derive(Clone, Debug, Display)]
#[display(fmt = "LocalMediaInitException ({}): {}", kind, message)]
pub struct LocalMediaInitException {
    kind: LocalMediaInitExceptionKind,
    message: Cow<'static, str>,

    /// [`platform::Error`] that caused this [`LocalMediaInitException`].
    cause: Option<platform::Error>,

    trace: Trace,
}

impl LocalMediaInitException {
    /// Creates a new [`LocalMediaInitException`].
    #[inline]
    #[must_use]
    pub fn new<M: Into<Cow<'static, str>>>(
        kind: LocalMediaInitExceptionKind,
        message: M,
        cause: Option<platform::Error>,
        trace: Trace,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            cause,
            trace,
        }
    }

    /// Returns concrete error kind of this [`LocalMediaInitException`].
    #[must_use]
    pub fn kind(&self) -> LocalMediaInitExceptionKind {
        self.kind
    }

    /// Returns error message describing the problem.
    #[must_use]
    pub fn message(&self) -> String {
        self.message.to_string()
    }

    /// Returns [`platform::Error`] that caused this exception.
    #[must_use]
    pub fn cause(&self) -> Option<platform::Error> {
        self.cause.clone()
    }

    /// Returns stacktrace of this [`LocalMediaInitException`].
    #[must_use]
    pub fn trace(&self) -> String {
        self.trace.to_string()
    }
}

/// Exception thrown when media devices can't be listed.
#[derive(Clone, Debug, Display)]
#[display(fmt = "EnumerateDevicesException: {}", cause)]
pub struct EnumerateDevicesException {
    cause: platform::Error,
    trace: Trace,
}

impl EnumerateDevicesException {
    /// Creates a new [`EnumerateDevicesException`].
    #[inline]
    #[must_use]
    pub fn new(cause: platform::Error, trace: Trace) -> Self {
        Self { cause, trace }
    }

    /// Returns [`platform::Error`] that caused this exception.
    #[must_use]
    pub fn cause(&self) -> platform::Error {
        self.cause.clone()
    }

    /// Returns stacktrace of this [`EnumerateDevicesException`].
    #[must_use]
    pub fn trace(&self) -> String {
        self.trace.to_string()
    }
}

/// Exception thrown when the audio output can't be switched to the requested
/// device.
#[derive(Clone, Debug, Display)]
#[display(fmt = "InvalidOutputAudioDeviceIdException: {}", cause)]
pub struct InvalidOutputAudioDeviceIdException {
    cause: platform::Error,
    trace: Trace,
}

impl InvalidOutputAudioDeviceIdException {
    /// Creates a new [`InvalidOutputAudioDeviceIdException`].
    #[inline]
    #[must_use]
    pub fn new(cause: platform::Error, trace: Trace) -> Self {
        Self { cause, trace }
    }

    /// Returns [`platform::Error`] the host rejected the device with.
    #[must_use]
    pub fn cause(&self) -> platform::Error {
        self.cause.clone()
    }

    /// Returns stacktrace of this [`InvalidOutputAudioDeviceIdException`].
    #[must_use]
    pub fn trace(&self) -> String {
        self.trace.to_string()
    }
}

/// Possible error kinds of a [`RpcClientException`].
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum RpcClientExceptionKind {
    /// Connection with the server was lost. Retryable via a
    /// [`ReconnectHandle`].
    ///
    /// [`ReconnectHandle`]: crate::rpc::ReconnectHandle
    ConnectionLost,

    /// Server rejected the credentials.
    AuthorizationFailed,

    /// Session is finished and can't be used anymore.
    SessionFinished,
}

/// Exception thrown when signaling fails.
#[derive(Clone, Debug, Display)]
#[display(fmt = "RpcClientException ({}): {}", kind, message)]
pub struct RpcClientException {
    kind: RpcClientExceptionKind,
    message: Cow<'static, str>,
    cause: Option<platform::Error>,
    trace: Trace,
}

impl RpcClientException {
    /// Creates a new [`RpcClientException`].
    #[inline]
    #[must_use]
    pub fn new<M: Into<Cow<'static, str>>>(
        kind: RpcClientExceptionKind,
        message: M,
        cause: Option<platform::Error>,
        trace: Trace,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            cause,
            trace,
        }
    }

    /// Returns concrete error kind of this [`RpcClientException`].
    #[must_use]
    pub fn kind(&self) -> RpcClientExceptionKind {
        self.kind
    }

    /// Returns error message describing the problem.
    #[must_use]
    pub fn message(&self) -> String {
        self.message.to_string()
    }

    /// Returns [`platform::Error`] that caused this exception.
    #[must_use]
    pub fn cause(&self) -> Option<platform::Error> {
        self.cause.clone()
    }

    /// Returns stacktrace of this [`RpcClientException`].
    #[must_use]
    pub fn trace(&self) -> String {
        self.trace.to_string()
    }
}

/// Exception thrown on an unexpected engine failure.
#[derive(Clone, Debug, Display)]
#[display(fmt = "InternalException: {}", message)]
pub struct InternalException {
    message: Cow<'static, str>,
    cause: Option<platform::Error>,
    trace: Trace,
}

impl InternalException {
    /// Creates a new [`InternalException`].
    #[inline]
    #[must_use]
    pub fn new<T: Into<Cow<'static, str>>>(
        message: T,
        cause: Option<platform::Error>,
        trace: Trace,
    ) -> Self {
        Self {
            message: message.into(),
            cause,
            trace,
        }
    }

    /// Returns error message describing the problem.
    #[must_use]
    pub fn message(&self) -> String {
        self.message.to_string()
    }

    /// Returns [`platform::Error`] that caused this exception.
    #[must_use]
    pub fn cause(&self) -> Option<platform::Error> {
        self.cause.clone()
    }

    /// Returns stacktrace of this [`InternalException`].
    #[must_use]
    pub fn trace(&self) -> String {
        self.trace.to_string()
    }
}

/// Exception thrown on a malformed input. Nothing is sent anywhere before it.
#[derive(Clone, Debug, Display)]
#[display(fmt = "FormatException: {}", _0)]
pub struct FormatException(Cow<'static, str>);

impl FormatException {
    /// Creates a new [`FormatException`] with the provided `message`.
    #[inline]
    #[must_use]
    pub fn new<T: Into<Cow<'static, str>>>(message: T) -> Self {
        Self(message.into())
    }

    /// Returns error message describing the problem.
    #[must_use]
    pub fn message(&self) -> String {
        self.0.to_string()
    }
}

/// Possible error kinds of a [`MediaStateTransitionException`].
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum MediaStateTransitionExceptionKind {
    /// Media state transits into the opposite of the requested one.
    OppositeState,

    /// Requested state isn't allowed, e.g. disabling a required sender.
    ProhibitedState,

    /// Another transition is in flight.
    ConflictingTransition,
}

/// Exception thrown when a media state transition can't be performed. The
/// local state is left unchanged.
#[derive(Clone, Debug, Display)]
#[display(fmt = "MediaStateTransitionException ({}): {}", kind, message)]
pub struct MediaStateTransitionException {
    kind: MediaStateTransitionExceptionKind,
    message: Cow<'static, str>,
    trace: Trace,
}

impl MediaStateTransitionException {
    /// Creates a new [`MediaStateTransitionException`].
    #[inline]
    #[must_use]
    pub fn new<T: Into<Cow<'static, str>>>(
        kind: MediaStateTransitionExceptionKind,
        message: T,
        trace: Trace,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            trace,
        }
    }

    /// Returns concrete error kind of this [`MediaStateTransitionException`].
    #[must_use]
    pub fn kind(&self) -> MediaStateTransitionExceptionKind {
        self.kind
    }

    /// Returns error message describing the problem.
    #[must_use]
    pub fn message(&self) -> String {
        self.message.to_string()
    }

    /// Returns stacktrace of this [`MediaStateTransitionException`].
    #[must_use]
    pub fn trace(&self) -> String {
        self.trace.to_string()
    }
}

/// Exception thrown when [`MediaStreamSettings`] can't be applied.
///
/// [`MediaStreamSettings`]: crate::media::MediaStreamSettings
#[derive(Clone, Debug, Display)]
#[display(fmt = "MediaSettingsUpdateException: {}", message)]
pub struct MediaSettingsUpdateException {
    message: Cow<'static, str>,

    /// Original error the update failed with.
    cause: Traced<ChangeMediaStateError>,

    /// Whether the previous settings are active again.
    rolled_back: bool,
}

impl MediaSettingsUpdateException {
    /// Creates a new [`MediaSettingsUpdateException`].
    #[inline]
    #[must_use]
    pub fn new<T: Into<Cow<'static, str>>>(
        message: T,
        cause: Traced<ChangeMediaStateError>,
        rolled_back: bool,
    ) -> Self {
        Self {
            message: message.into(),
            cause,
            rolled_back,
        }
    }

    /// Returns error message describing the problem.
    #[must_use]
    pub fn message(&self) -> String {
        self.message.to_string()
    }

    /// Returns the original error the update failed with.
    #[must_use]
    pub fn cause(&self) -> Error {
        self.cause.clone().into()
    }

    /// Indicates whether the previous settings were restored.
    #[must_use]
    pub fn rolled_back(&self) -> bool {
        self.rolled_back
    }
}

/// Extracts the [`platform::Error`] an [`RpcClientError`] was caused by.
fn rpc_client_error_cause(err: &RpcClientError) -> Option<platform::Error> {
    let transport_err = match err {
        RpcClientError::ConnectionFailed(
            ClosedStateReason::CouldNotEstablish(e),
        )
        | RpcClientError::Transport(e) => e,
        RpcClientError::ConnectionFailed(_)
        | RpcClientError::RpcClientGone => return None,
    };
    match transport_err {
        TransportError::CreateSocket(e) | TransportError::SendMessage(e) => {
            Some(e.clone())
        }
        TransportError::InitSocket
        | TransportError::SerializeClientMessage(_)
        | TransportError::ParseServerMessage(_)
        | TransportError::ClosedSocket => None,
    }
}

impl From<Traced<HandleDetachedError>> for Error {
    fn from(err: Traced<HandleDetachedError>) -> Self {
        let (err, trace) = err.into_parts();

        StateError::new(err.to_string(), trace).into()
    }
}

impl From<Traced<EnumerateDevicesError>> for Error {
    fn from(err: Traced<EnumerateDevicesError>) -> Self {
        let (err, trace) = err.into_parts();

        match err {
            EnumerateDevicesError::Detached => {
                StateError::new(err.to_string(), trace).into()
            }
            EnumerateDevicesError::Failed(cause) => {
                EnumerateDevicesException::new(cause, trace).into()
            }
        }
    }
}

impl From<Traced<EnumerateDisplaysError>> for Error {
    fn from(err: Traced<EnumerateDisplaysError>) -> Self {
        let (err, trace) = err.into_parts();

        match err {
            EnumerateDisplaysError::Detached => {
                StateError::new(err.to_string(), trace).into()
            }
            EnumerateDisplaysError::Failed(cause) => {
                EnumerateDevicesException::new(cause, trace).into()
            }
        }
    }
}

impl From<Traced<SetOutputAudioIdError>> for Error {
    fn from(err: Traced<SetOutputAudioIdError>) -> Self {
        let (err, trace) = err.into_parts();

        match err {
            SetOutputAudioIdError::Detached => {
                StateError::new(err.to_string(), trace).into()
            }
            SetOutputAudioIdError::InvalidDeviceId(cause) => {
                InvalidOutputAudioDeviceIdException::new(cause, trace).into()
            }
        }
    }
}

impl From<Traced<InitLocalTracksError>> for Error {
    fn from(err: Traced<InitLocalTracksError>) -> Self {
        use platform::GetUserMediaError as PlatformGum;
        use GetDisplayMediaError as Gdm;
        use GetUserMediaError as Gum;
        use InitLocalTracksError as Err;
        use LocalMediaInitExceptionKind as Kind;

        let (err, trace) = err.into_parts();
        let message = err.to_string();

        let (kind, cause) = match err {
            Err::Detached => return StateError::new(message, trace).into(),
            Err::GetUserMediaFailed(Gum::PlatformRequestFailed(e)) => match e {
                PlatformGum::Audio(e) => (Kind::GetUserMediaAudioFailed, e),
                PlatformGum::Video(e) => (Kind::GetUserMediaVideoFailed, e),
                PlatformGum::Unknown(e) => (Kind::GetUserMediaFailed, e),
            },
            Err::GetDisplayMediaFailed(Gdm::PlatformRequestFailed(e)) => {
                (Kind::GetDisplayMediaFailed, e)
            }
            Err::GetUserMediaFailed(Gum::LocalTrackIsEnded(_))
            | Err::GetDisplayMediaFailed(Gdm::LocalTrackIsEnded(_)) => {
                return LocalMediaInitException::new(
                    Kind::LocalTrackIsEnded,
                    message,
                    None,
                    trace,
                )
                .into();
            }
        };

        LocalMediaInitException::new(kind, message, Some(cause), trace).into()
    }
}

impl From<Traced<SessionError>> for Error {
    fn from(err: Traced<SessionError>) -> Self {
        use RpcClientExceptionKind as Kind;
        use SessionError as SE;

        let (err, trace) = err.into_parts();
        let message = err.to_string();

        let mut cause = None;
        let kind = match &err {
            SE::SessionFinished(_) => Some(Kind::SessionFinished),
            SE::AuthorizationFailed => Some(Kind::AuthorizationFailed),
            SE::ConnectionLost(reason) => {
                if let SessionLostReason::ConnectError(e) = reason {
                    cause = rpc_client_error_cause(e);
                }
                Some(Kind::ConnectionLost)
            }
            SE::RpcClient(e) => {
                cause = rpc_client_error_cause(e);
                None
            }
            SE::NoCredentials
            | SE::SessionUnexpectedlyDropped
            | SE::NewConnectionInfo
            | SE::AlreadyOpened => None,
        };

        if let Some(kind) = kind {
            RpcClientException::new(kind, message, cause, trace).into()
        } else {
            InternalException::new(message, cause, trace).into()
        }
    }
}

impl From<Traced<ReconnectError>> for Error {
    fn from(err: Traced<ReconnectError>) -> Self {
        let (err, trace) = err.into_parts();

        match err {
            ReconnectError::Detached(e) => {
                StateError::new(e.to_string(), trace).into()
            }
            ReconnectError::Session(e) => Traced::from_parts(e, trace).into(),
        }
    }
}

impl From<Traced<RoomJoinError>> for Error {
    fn from(err: Traced<RoomJoinError>) -> Self {
        let (err, trace) = err.into_parts();
        let message = err.to_string();

        match err {
            RoomJoinError::Detached | RoomJoinError::CallbackNotSet(_) => {
                StateError::new(message, trace).into()
            }
            RoomJoinError::ConnectionInfoParse(_) => {
                FormatException::new(message).into()
            }
            RoomJoinError::SessionError(e) => {
                Traced::from_parts(e, trace).into()
            }
        }
    }
}

impl From<Traced<ChangeMediaStateError>> for Error {
    fn from(err: Traced<ChangeMediaStateError>) -> Self {
        use ChangeMediaStateError as E;
        use MediaStateTransitionExceptionKind as Kind;

        let (err, trace) = err.into_parts();
        let message = err.to_string();

        let kind = match err {
            E::Detached => return StateError::new(message, trace).into(),
            E::CouldNotGetLocalMedia(e) => {
                return Traced::from_parts(e, trace).into()
            }
            E::MediaConnections(_) => {
                return InternalException::new(message, None, trace).into()
            }
            E::RtcPeerConnection(e) => {
                return InternalException::new(message, Some(e), trace).into()
            }
            E::ProhibitedState | E::InvalidLocalTracks(_) => {
                Kind::ProhibitedState
            }
            E::TransitionIntoOppositeState(_) => Kind::OppositeState,
            E::ConflictingTransition(_) => Kind::ConflictingTransition,
        };

        MediaStateTransitionException::new(kind, message, trace).into()
    }
}

impl From<Traced<PeerError>> for Error {
    #[inline]
    fn from(err: Traced<PeerError>) -> Self {
        let (err, trace) = err.into_parts();
        Traced::from_parts(ChangeMediaStateError::from(err), trace).into()
    }
}

impl From<ConstraintsUpdateError> for Error {
    fn from(err: ConstraintsUpdateError) -> Self {
        let message = err.to_string();

        let (err, rolled_back) = match err {
            ConstraintsUpdateError::Recovered(err) => (err, true),
            ConstraintsUpdateError::RecoverFailed {
                recover_reason, ..
            } => (recover_reason, false),
            ConstraintsUpdateError::Errored(err) => (err, false),
        };

        MediaSettingsUpdateException::new(message, err, rolled_back).into()
    }
}
