//! Bitrate derivation and periodic scraping of [`PeerConnection`] stats.

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    rc::{Rc, Weak},
    time::Duration,
};

use futures::future;
use medea_jason_proto::{
    stats::{HighResTimeStamp, RtcStat, RtcStatsType, RtpMediaKind},
    PeerId, TrackId,
};

use crate::{peer::PeerConnection, platform, utils::TaskHandle};

/// Previous sample of a stream.
#[derive(Clone, Copy, Debug)]
struct Sample {
    bytes: u64,
    timestamp: HighResTimeStamp,
}

/// Derives bitrates of RTP streams from their successive byte counters.
#[derive(Debug, Default)]
pub struct BitrateSampler {
    samples: HashMap<String, Sample>,
}

impl BitrateSampler {
    /// Records a new byte counter of the stream with the provided `id`.
    ///
    /// Returns the bitrate in bits per second since the previous sample of
    /// this stream. The first sample of a stream yields `None`. A non-finite
    /// bitrate (e.g. a zero-length interval) is reported as `0`.
    pub fn sample(
        &mut self,
        id: &str,
        bytes: u64,
        timestamp: HighResTimeStamp,
    ) -> Option<u64> {
        let prev = self
            .samples
            .insert(id.to_owned(), Sample { bytes, timestamp })?;

        #[allow(clippy::cast_precision_loss)]
        let bits = 8.0 * (bytes.saturating_sub(prev.bytes)) as f64;
        let millis = timestamp.0 - prev.timestamp.0;
        let bitrate = bits * 1000.0 / millis;

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let bitrate = if bitrate.is_finite() && bitrate > 0.0 {
            bitrate.round() as u64
        } else {
            0
        };
        Some(bitrate)
    }

    /// Derives bitrates of all inbound video streams in the provided
    /// [`RtcStat`]s, keyed by the stat ID.
    pub fn sample_inbound_video(
        &mut self,
        stats: &[RtcStat],
    ) -> HashMap<String, u64> {
        stats
            .iter()
            .filter_map(|stat| match &stat.stats {
                RtcStatsType::InboundRtp(inbound)
                    if inbound.kind == RtpMediaKind::Video =>
                {
                    self.sample(
                        &stat.id.0,
                        inbound.bytes_received,
                        stat.timestamp,
                    )
                    .map(|bitrate| (stat.id.0.clone(), bitrate))
                }
                _ => None,
            })
            .collect()
    }

    /// Forgets every recorded sample.
    #[inline]
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Inbound tracks of one [`PeerConnection`] being sampled.
struct Tracked {
    peer: Weak<PeerConnection>,
    tracks: HashSet<TrackId>,
}

/// Periodic scraper of [`PeerConnection`] stats.
///
/// Runs only while at least one track is registered.
pub struct StatsScheduler {
    interval: Duration,
    tracked: RefCell<HashMap<PeerId, Tracked>>,
    task: RefCell<Option<TaskHandle>>,
}

impl StatsScheduler {
    /// Creates a new idle [`StatsScheduler`] polling with the provided
    /// `interval`.
    #[must_use]
    pub fn new(interval: Duration) -> Rc<Self> {
        Rc::new(Self {
            interval,
            tracked: RefCell::default(),
            task: RefCell::new(None),
        })
    }

    /// Starts sampling the provided track of the provided
    /// [`PeerConnection`].
    pub fn register(
        self: &Rc<Self>,
        peer: &Rc<PeerConnection>,
        track_id: TrackId,
    ) {
        let _ = self
            .tracked
            .borrow_mut()
            .entry(peer.id())
            .or_insert_with(|| Tracked {
                peer: Rc::downgrade(peer),
                tracks: HashSet::new(),
            })
            .tracks
            .insert(track_id);

        if self.task.borrow().is_none() {
            self.start();
        }
    }

    /// Stops sampling the provided track.
    pub fn unregister(&self, peer_id: PeerId, track_id: TrackId) {
        {
            let mut tracked = self.tracked.borrow_mut();
            if let Some(entry) = tracked.get_mut(&peer_id) {
                let _ = entry.tracks.remove(&track_id);
                if entry.tracks.is_empty() {
                    drop(tracked.remove(&peer_id));
                }
            }
        }
        self.stop_if_idle();
    }

    /// Stops sampling every track of the provided [`PeerConnection`].
    pub fn unregister_peer(&self, peer_id: PeerId) {
        drop(self.tracked.borrow_mut().remove(&peer_id));
        self.stop_if_idle();
    }

    /// Indicates whether the polling loop is running.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.borrow().is_some()
    }

    /// Number of registered tracks.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.tracked.borrow().values().map(|t| t.tracks.len()).sum()
    }

    fn stop_if_idle(&self) {
        if self.tracked.borrow().is_empty()
            && self.task.borrow_mut().take().is_some()
        {
            log::debug!("Stats scraping stopped");
        }
    }

    fn start(self: &Rc<Self>) {
        let weak_this = Rc::downgrade(self);
        let interval = self.interval;
        let (fut, abort) = future::abortable(async move {
            loop {
                platform::delay_for(interval).await;
                let peers: Vec<_> = if let Some(this) = weak_this.upgrade() {
                    this.tracked
                        .borrow()
                        .values()
                        .filter_map(|t| t.peer.upgrade())
                        .collect()
                } else {
                    break;
                };
                for peer in peers {
                    peer.scrape_and_send_stats().await;
                }
            }
        });
        platform::spawn(async move {
            let _ = fut.await;
        });
        drop(self.task.replace(Some(TaskHandle::from(abort))));
        log::debug!("Stats scraping started");
    }
}

#[cfg(test)]
mod spec {
    use super::*;
    use crate::utils::test::timestamp;

    #[test]
    fn bitrate_of_second_sample() {
        let mut sampler = BitrateSampler::default();

        assert_eq!(sampler.sample("in", 0, timestamp(0)), None);
        assert_eq!(sampler.sample("in", 12500, timestamp(1000)), Some(100_000));
    }

    #[test]
    fn zero_interval_yields_zero() {
        let mut sampler = BitrateSampler::default();

        assert_eq!(sampler.sample("in", 100, timestamp(500)), None);
        assert_eq!(sampler.sample("in", 900, timestamp(500)), Some(0));
        assert_eq!(sampler.sample("in", 900, timestamp(500)), Some(0));
    }

    #[test]
    fn streams_are_sampled_independently() {
        let mut sampler = BitrateSampler::default();

        assert_eq!(sampler.sample("a", 0, timestamp(0)), None);
        assert_eq!(sampler.sample("b", 1000, timestamp(0)), None);
        assert_eq!(sampler.sample("a", 1000, timestamp(1000)), Some(8000));

        sampler.clear();
        assert_eq!(sampler.sample("a", 2000, timestamp(2000)), None);
    }
}
