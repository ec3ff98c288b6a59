//! Signaling session settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Signaling session settings.
#[derive(Clone, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct Rpc {
    /// Interval the server is expected to ping with, until it sends its own
    /// `RpcSettings`. Defaults to `3s`.
    #[default(Duration::from_secs(3))]
    #[serde(with = "humantime_serde")]
    pub ping_interval: Duration,

    /// Duration without any server message after which the connection is
    /// considered lost, until the server sends its own `RpcSettings`.
    /// Defaults to `10s`.
    #[default(Duration::from_secs(10))]
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,

    /// First delay of the default reconnection backoff. Defaults to `500ms`.
    #[default(Duration::from_millis(500))]
    #[serde(with = "humantime_serde")]
    pub reconnect_start_delay: Duration,

    /// Growth factor of the default reconnection backoff. Defaults to `2.0`.
    #[default(2.0)]
    pub reconnect_multiplier: f64,

    /// Upper bound of a single delay of the default reconnection backoff.
    /// Defaults to `5s`.
    #[default(Duration::from_secs(5))]
    #[serde(with = "humantime_serde")]
    pub reconnect_max_delay: Duration,

    /// Total time after which the default reconnection backoff gives up.
    /// Unbounded by default.
    #[default(None)]
    #[serde(with = "humantime_serde")]
    pub reconnect_max_elapsed: Option<Duration>,
}
