//! DTOs for [RTCPeerConnection] metrics.
//!
//! Only the stats consumed by the client engine are modeled, everything else
//! is collapsed into [`RtcStatsType::Other`].
//!
//! [RTCPeerConnection]: https://w3.org/TR/webrtc/#dom-rtcpeerconnection

#![allow(clippy::module_name_repetitions)]

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};

/// Unique ID that is associated with the object that was inspected to produce
/// an [`RtcStat`] object.
#[derive(
    Clone, Debug, Deserialize, Display, Eq, From, Hash, PartialEq, Serialize,
)]
#[from(forward)]
pub struct StatId(pub String);

/// [DOMHighResTimeStamp][1] in milliseconds.
///
/// [1]: https://w3.org/TR/hr-time/#dom-domhighrestimestamp
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, PartialOrd, Serialize)]
pub struct HighResTimeStamp(pub f64);

/// Single [RTCStats][1] record.
///
/// [1]: https://w3.org/TR/webrtc/#dom-rtcstats
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RtcStat {
    /// ID of the inspected object.
    pub id: StatId,

    /// Time when this stat was sampled.
    pub timestamp: HighResTimeStamp,

    /// Actual stats.
    #[serde(flatten)]
    pub stats: RtcStatsType,
}

/// All known types of [`RtcStat`]s.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RtcStatsType {
    /// Statistics for an inbound RTP stream.
    InboundRtp(Box<RtcInboundRtpStreamStats>),

    /// Statistics for an outbound RTP stream.
    OutboundRtp(Box<RtcOutboundRtpStreamStats>),

    /// Stats the engine doesn't use.
    #[serde(other)]
    Other,
}

/// Kind of the media an RTP stream carries.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RtpMediaKind {
    Audio,
    Video,
}

/// [RTCInboundRtpStreamStats][1] subset.
///
/// [1]: https://w3.org/TR/webrtc-stats/#dom-rtcinboundrtpstreamstats
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcInboundRtpStreamStats {
    /// ID of the received track.
    pub track_id: Option<String>,

    /// Kind of the received media.
    pub kind: RtpMediaKind,

    /// Total number of bytes received for this stream.
    pub bytes_received: u64,

    /// Total number of RTP packets received for this stream.
    pub packets_received: u64,

    /// Width of the last decoded frame.
    pub frame_width: Option<u32>,

    /// Height of the last decoded frame.
    pub frame_height: Option<u32>,
}

/// [RTCOutboundRtpStreamStats][1] subset.
///
/// [1]: https://w3.org/TR/webrtc-stats/#dom-rtcoutboundrtpstreamstats
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcOutboundRtpStreamStats {
    /// ID of the sent track.
    pub track_id: Option<String>,

    /// Kind of the sent media.
    pub kind: RtpMediaKind,

    /// Total number of bytes sent for this stream.
    pub bytes_sent: u64,

    /// Total number of RTP packets sent for this stream.
    pub packets_sent: u64,
}
