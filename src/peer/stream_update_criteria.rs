//! [`MediaKind`] and [`MediaSourceKind`] criteria of local stream updates.

use std::ops::BitOrAssign as _;

use medea_jason_proto::{Direction, MediaSourceKind, MediaType, Track};

use crate::media::MediaKind;

bitflags::bitflags! {
    /// Bits of the media a [`LocalStreamUpdateCriteria`] covers.
    struct Inner: u8 {
        const AUDIO = 0b001;
        const DEVICE_VIDEO = 0b010;
        const DISPLAY_VIDEO = 0b100;
    }
}

/// Set of media kinds affected by a local stream update.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LocalStreamUpdateCriteria(Inner);

impl LocalStreamUpdateCriteria {
    /// Criteria covering every media.
    #[inline]
    #[must_use]
    pub fn all() -> Self {
        Self(Inner::all())
    }

    /// Criteria covering nothing.
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self(Inner::empty())
    }

    /// Criteria covering the provided media.
    ///
    /// `None` source kind covers every source of the [`MediaKind`].
    #[must_use]
    pub fn from_kinds(
        media_kind: MediaKind,
        source_kind: Option<MediaSourceKind>,
    ) -> Self {
        use MediaKind as MK;
        use MediaSourceKind as SK;

        let inner = match (source_kind, media_kind) {
            (_, MK::Audio) => Inner::AUDIO,
            (None, MK::Video) => Inner::DEVICE_VIDEO | Inner::DISPLAY_VIDEO,
            (Some(SK::Device), MK::Video) => Inner::DEVICE_VIDEO,
            (Some(SK::Display), MK::Video) => Inner::DISPLAY_VIDEO,
        };
        Self(inner)
    }

    /// Criteria covering the outbound media of the provided [`Track`]s.
    #[must_use]
    pub fn from_tracks(tracks: &[Track]) -> Self {
        let mut result = Self::empty();
        for track in tracks
            .iter()
            .filter(|t| matches!(t.direction, Direction::Send { .. }))
        {
            match &track.media_type {
                MediaType::Audio(_) => {
                    result.add(MediaKind::Audio, MediaSourceKind::Device);
                }
                MediaType::Video(video) => {
                    result.add(MediaKind::Video, video.source_kind);
                }
            }
        }
        result
    }

    /// Adds the provided media to this [`LocalStreamUpdateCriteria`].
    #[inline]
    pub fn add(&mut self, media_kind: MediaKind, source_kind: MediaSourceKind) {
        self.0
            .bitor_assign(Self::from_kinds(media_kind, Some(source_kind)).0);
    }

    /// Indicates whether the provided media is covered.
    #[inline]
    #[must_use]
    pub fn has(
        self,
        media_kind: MediaKind,
        source_kind: MediaSourceKind,
    ) -> bool {
        self.0
            .contains(Self::from_kinds(media_kind, Some(source_kind)).0)
    }

    /// Indicates whether nothing is covered.
    #[inline]
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod spec {
    use super::*;

    #[test]
    fn kind_without_source_covers_every_source() {
        let video = LocalStreamUpdateCriteria::from_kinds(MediaKind::Video, None);

        assert!(video.has(MediaKind::Video, MediaSourceKind::Device));
        assert!(video.has(MediaKind::Video, MediaSourceKind::Display));
        assert!(!video.has(MediaKind::Audio, MediaSourceKind::Device));
    }

    #[test]
    fn add_accumulates() {
        let mut criteria = LocalStreamUpdateCriteria::empty();
        assert!(criteria.is_empty());

        criteria.add(MediaKind::Audio, MediaSourceKind::Device);
        criteria.add(MediaKind::Video, MediaSourceKind::Display);

        assert!(criteria.has(MediaKind::Audio, MediaSourceKind::Device));
        assert!(criteria.has(MediaKind::Video, MediaSourceKind::Display));
        assert!(!criteria.has(MediaKind::Video, MediaSourceKind::Device));
    }
}
