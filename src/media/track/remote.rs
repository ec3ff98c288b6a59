//! Wrapper around a received remote [`MediaStreamTrack`].

use std::{cell::Cell, fmt, rc::Rc};

use futures::StreamExt as _;
use medea_reactive::ObservableCell;

use crate::{
    api,
    media::{track::MediaDirection, MediaKind, MediaSourceKind},
    platform::{self, MediaStreamTrack, MediaStreamTrackState},
    utils::{Handle, HandleSlot, HandleTable},
};

/// Inbound media track.
pub struct Track {
    track: Rc<dyn MediaStreamTrack>,

    media_source_kind: MediaSourceKind,

    enabled: ObservableCell<bool>,

    muted: ObservableCell<bool>,

    media_direction: Cell<MediaDirection>,

    on_enabled: platform::Callback<()>,

    on_disabled: platform::Callback<()>,

    on_muted: platform::Callback<()>,

    on_unmuted: platform::Callback<()>,

    on_stopped: platform::Callback<()>,

    on_media_direction_changed: platform::Callback<MediaDirection>,

    /// Registration of this [`Track`] in the engine's [`HandleTable`].
    slot: HandleSlot,
}

impl Track {
    /// Wraps the provided [`MediaStreamTrack`] and starts watching its state
    /// to notify the host.
    #[must_use]
    pub fn new(
        track: Rc<dyn MediaStreamTrack>,
        media_source_kind: MediaSourceKind,
        enabled: bool,
        muted: bool,
        media_direction: MediaDirection,
        table: &Rc<HandleTable>,
    ) -> Rc<Self> {
        let this = Rc::new(Self {
            track,
            media_source_kind,
            enabled: ObservableCell::new(enabled),
            muted: ObservableCell::new(muted),
            media_direction: Cell::new(media_direction),
            on_enabled: platform::Callback::default(),
            on_disabled: platform::Callback::default(),
            on_muted: platform::Callback::default(),
            on_unmuted: platform::Callback::default(),
            on_stopped: platform::Callback::default(),
            on_media_direction_changed: platform::Callback::default(),
            slot: HandleSlot::new(table),
        });

        this.track.on_ended({
            let weak_this = Rc::downgrade(&this);
            Some(Box::new(move || {
                if let Some(this) = weak_this.upgrade() {
                    this.on_stopped.call0();
                }
            }))
        });

        let mut enabled_changes = this.enabled.subscribe().skip(1).fuse();
        let mut muted_changes = this.muted.subscribe().skip(1).fuse();
        platform::spawn({
            let weak_this = Rc::downgrade(&this);
            async move {
                loop {
                    futures::select! {
                        enabled = enabled_changes.select_next_some() => {
                            if let Some(this) = weak_this.upgrade() {
                                if enabled {
                                    this.on_enabled.call0();
                                } else {
                                    this.on_disabled.call0();
                                }
                            }
                        },
                        muted = muted_changes.select_next_some() => {
                            if let Some(this) = weak_this.upgrade() {
                                if muted {
                                    this.on_muted.call0();
                                } else {
                                    this.on_unmuted.call0();
                                }
                            }
                        },
                        complete => break,
                    }
                }
            }
        });

        this
    }

    /// Creates a new host handle to this [`Track`].
    #[inline]
    #[must_use]
    pub fn new_handle(self: &Rc<Self>) -> RemoteMediaTrack {
        RemoteMediaTrack(self.slot.handle(Rc::downgrade(self)))
    }

    #[inline]
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }

    #[inline]
    pub fn set_muted(&self, muted: bool) {
        self.muted.set(muted);
    }

    /// Updates the [`MediaDirection`] of this [`Track`], notifying the host
    /// if it changed.
    pub fn set_media_direction(&self, direction: MediaDirection) {
        if self.media_direction.replace(direction) != direction {
            self.on_media_direction_changed.call1(direction);
        }
    }

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
        self.media_source_kind
    }

    #[inline]
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled.get()
    }

    #[inline]
    #[must_use]
    pub fn muted(&self) -> bool {
        self.muted.get()
    }

    #[inline]
    #[must_use]
    pub fn media_direction(&self) -> MediaDirection {
        self.media_direction.get()
    }

    /// Returns the underlying [`MediaStreamTrack`].
    #[inline]
    #[must_use]
    pub fn platform_track(&self) -> &Rc<dyn MediaStreamTrack> {
        &self.track
    }

    /// Notifies the host that this [`Track`] is stopped, unless it has ended
    /// already.
    pub fn stop(&self) {
        if self.track.ready_state() == MediaStreamTrackState::Live {
            self.on_stopped.call0();
        }
    }
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("remote::Track")
            .field("id", &self.track.id())
            .field("media_source_kind", &self.media_source_kind)
            .field("enabled", &self.enabled.get())
            .field("muted", &self.muted.get())
            .finish()
    }
}

/// Inbound media track handed to the host.
#[derive(Clone, Debug)]
pub struct RemoteMediaTrack(Handle<Track>);

impl RemoteMediaTrack {
    /// Returns the underlying [`MediaStreamTrack`].
    ///
    /// # Errors
    ///
    /// With `StateError` if the track is gone.
    pub fn get_track(&self) -> Result<Rc<dyn MediaStreamTrack>, api::Error> {
        Ok(Rc::clone(self.0.upgrade()?.platform_track()))
    }

    /// # Errors
    ///
    /// With `StateError` if the track is gone.
    pub fn kind(&self) -> Result<MediaKind, api::Error> {
        Ok(self.0.upgrade()?.kind())
    }

    /// # Errors
    ///
    /// With `StateError` if the track is gone.
    pub fn media_source_kind(&self) -> Result<MediaSourceKind, api::Error> {
        Ok(self.0.upgrade()?.media_source_kind())
    }

    /// Indicates whether the remote side has this track enabled.
    ///
    /// # Errors
    ///
    /// With `StateError` if the track is gone.
    pub fn enabled(&self) -> Result<bool, api::Error> {
        Ok(self.0.upgrade()?.enabled())
    }

    /// # Errors
    ///
    /// With `StateError` if the track is gone.
    pub fn muted(&self) -> Result<bool, api::Error> {
        Ok(self.0.upgrade()?.muted())
    }

    /// # Errors
    ///
    /// With `StateError` if the track is gone.
    pub fn media_direction(&self) -> Result<MediaDirection, api::Error> {
        Ok(self.0.upgrade()?.media_direction())
    }

    /// Sets a callback invoked when this track gets enabled.
    ///
    /// # Errors
    ///
    /// With `StateError` if the track is gone.
    pub fn on_enabled<F: Fn() + 'static>(&self, f: F) -> Result<(), api::Error> {
        self.0.upgrade()?.on_enabled.set_func(move |()| f());
        Ok(())
    }

    /// Sets a callback invoked when this track gets disabled.
    ///
    /// # Errors
    ///
    /// With `StateError` if the track is gone.
    pub fn on_disabled<F: Fn() + 'static>(
        &self,
        f: F,
    ) -> Result<(), api::Error> {
        self.0.upgrade()?.on_disabled.set_func(move |()| f());
        Ok(())
    }

    /// Sets a callback invoked when this track gets muted.
    ///
    /// # Errors
    ///
    /// With `StateError` if the track is gone.
    pub fn on_muted<F: Fn() + 'static>(&self, f: F) -> Result<(), api::Error> {
        self.0.upgrade()?.on_muted.set_func(move |()| f());
        Ok(())
    }

    /// Sets a callback invoked when this track gets unmuted.
    ///
    /// # Errors
    ///
    /// With `StateError` if the track is gone.
    pub fn on_unmuted<F: Fn() + 'static>(&self, f: F) -> Result<(), api::Error> {
        self.0.upgrade()?.on_unmuted.set_func(move |()| f());
        Ok(())
    }

    /// Sets a callback invoked when this track stops.
    ///
    /// # Errors
    ///
    /// With `StateError` if the track is gone.
    pub fn on_stopped<F: Fn() + 'static>(&self, f: F) -> Result<(), api::Error> {
        self.0.upgrade()?.on_stopped.set_func(move |()| f());
        Ok(())
    }

    /// Sets a callback invoked when the [`MediaDirection`] of this track
    /// changes.
    ///
    /// # Errors
    ///
    /// With `StateError` if the track is gone.
    pub fn on_media_direction_changed<F>(&self, f: F) -> Result<(), api::Error>
    where
        F: Fn(MediaDirection) + 'static,
    {
        self.0.upgrade()?.on_media_direction_changed.set_func(f);
        Ok(())
    }
}
