//! Wrapper around a [`MediaStreamTrack`] acquired from a capture device or
//! a display.

use std::{cell::RefCell, fmt, rc::Rc};

use crate::{
    api,
    media::{MediaKind, MediaSourceKind},
    platform::{MediaStreamTrack, MediaStreamTrackState},
    utils::{Handle, HandleSlot, HandleTable},
};

/// Local media track.
///
/// Stops the underlying [`MediaStreamTrack`] when the last strong reference
/// to it is dropped.
pub struct Track {
    track: Rc<dyn MediaStreamTrack>,

    source_kind: MediaSourceKind,

    /// Parent [`Track`] this one was forked from. Keeps the parent's capture
    /// alive for as long as the fork lives.
    _parent: Option<Rc<Self>>,
}

impl Track {
    /// Wraps the provided [`MediaStreamTrack`].
    #[inline]
    #[must_use]
    pub fn new(
        track: Rc<dyn MediaStreamTrack>,
        source_kind: MediaSourceKind,
    ) -> Self {
        Self {
            track,
            source_kind,
            _parent: None,
        }
    }

    /// Returns the underlying [`MediaStreamTrack`].
    #[inline]
    #[must_use]
    pub fn platform_track(&self) -> &Rc<dyn MediaStreamTrack> {
        &self.track
    }

    /// Changes the `enabled` property of the underlying
    /// [`MediaStreamTrack`].
    #[inline]
    pub fn set_enabled(&self, enabled: bool) {
        self.track.set_enabled(enabled);
    }

    /// Returns ID of the underlying [`MediaStreamTrack`].
    #[inline]
    #[must_use]
    pub fn id(&self) -> String {
        self.track.id()
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.track.kind()
    }

    #[inline]
    #[must_use]
    pub fn media_source_kind(&self) -> MediaSourceKind {
        self.source_kind
    }

    /// Current [`MediaStreamTrackState`] of the underlying track.
    #[inline]
    #[must_use]
    pub fn ready_state(&self) -> MediaStreamTrackState {
        self.track.ready_state()
    }

    /// Creates a new [`Track`] sharing the source of this one.
    ///
    /// The fork keeps this [`Track`] alive, so the source is stopped only
    /// after every fork is dropped.
    #[must_use]
    pub fn fork(self: &Rc<Self>) -> Self {
        Self {
            track: self.track.fork(),
            source_kind: self.source_kind,
            _parent: Some(Rc::clone(self)),
        }
    }
}

impl Drop for Track {
    #[inline]
    fn drop(&mut self) {
        self.track.stop();
    }
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("id", &self.track.id())
            .field("kind", &self.track.kind())
            .field("source_kind", &self.source_kind)
            .finish()
    }
}

/// Local media track handed to the host.
///
/// Holds a strong reference to its [`Track`] until [`LocalMediaTrack::free()`]
/// is called or the engine is disposed. Calls made afterwards fail with a
/// `StateError`.
pub struct LocalMediaTrack {
    handle: Handle<Track>,
    owner: RefCell<Option<(HandleSlot, Rc<Track>)>>,
}

impl LocalMediaTrack {
    /// Registers the provided [`Track`] in the [`HandleTable`] and wraps it.
    #[must_use]
    pub fn new(track: Rc<Track>, table: &Rc<HandleTable>) -> Self {
        let slot = HandleSlot::new(table);
        let handle = slot.handle(Rc::downgrade(&track));
        Self {
            handle,
            owner: RefCell::new(Some((slot, track))),
        }
    }

    /// Returns the underlying [`MediaStreamTrack`].
    ///
    /// # Errors
    ///
    /// With `StateError` if this [`LocalMediaTrack`] is detached.
    pub fn get_track(&self) -> Result<Rc<dyn MediaStreamTrack>, api::Error> {
        Ok(Rc::clone(self.handle.upgrade()?.platform_track()))
    }

    /// Returns the [`MediaKind`] of this [`LocalMediaTrack`].
    ///
    /// # Errors
    ///
    /// With `StateError` if this [`LocalMediaTrack`] is detached.
    pub fn kind(&self) -> Result<MediaKind, api::Error> {
        Ok(self.handle.upgrade()?.kind())
    }

    /// Returns the [`MediaSourceKind`] of this [`LocalMediaTrack`].
    ///
    /// # Errors
    ///
    /// With `StateError` if this [`LocalMediaTrack`] is detached.
    pub fn media_source_kind(&self) -> Result<MediaSourceKind, api::Error> {
        Ok(self.handle.upgrade()?.media_source_kind())
    }

    /// Sets a callback invoked once the underlying track ends for reasons
    /// other than being stopped by the engine (device unplugged, permission
    /// revoked).
    ///
    /// # Errors
    ///
    /// With `StateError` if this [`LocalMediaTrack`] is detached.
    pub fn on_ended<F>(&self, f: F) -> Result<(), api::Error>
    where
        F: FnOnce() + 'static,
    {
        let track = self.handle.upgrade()?;
        track.platform_track().on_ended(Some(Box::new(f)));
        Ok(())
    }

    /// Drops the strong reference held by this [`LocalMediaTrack`].
    ///
    /// The capture stops once no sender uses the track anymore.
    pub fn free(&self) {
        drop(self.owner.borrow_mut().take());
    }

    /// Indicates whether this [`LocalMediaTrack`] can still be used.
    #[inline]
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.handle.is_live()
    }

    /// Returns the [`Track`] behind this [`LocalMediaTrack`].
    pub(crate) fn track(&self) -> Option<Rc<Track>> {
        self.handle.upgrade().ok()
    }
}

impl fmt::Debug for LocalMediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMediaTrack")
            .field("handle", &self.handle)
            .finish()
    }
}
