//! Host-facing API surface.

mod err;

#[doc(inline)]
pub use self::err::{
    EnumerateDevicesException, Error, FormatException, InternalException,
    InvalidOutputAudioDeviceIdException, LocalMediaInitException,
    LocalMediaInitExceptionKind, MediaSettingsUpdateException, MediaStateTransitionException,
    MediaStateTransitionExceptionKind, RpcClientException,
    RpcClientExceptionKind, StateError,
};
