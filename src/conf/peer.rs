//! [`PeerConnection`] settings.
//!
//! [`PeerConnection`]: crate::peer::PeerConnection

use std::time::Duration;

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

#[derive(Clone, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct Peer {
    /// Period of inbound video bitrate sampling. Defaults to `1s`.
    #[default(Duration::from_secs(1))]
    #[serde(with = "humantime_serde")]
    pub stats_interval: Duration,

    /// Whether ICE is restarted once the connection fails or the network
    /// changes. Defaults to `true`.
    #[default(true)]
    pub ice_restart_on_failure: bool,
}

#[cfg(test)]
mod spec {
    use std::time::Duration;

    use serial_test::serial;

    use crate::{conf::Conf, overrided_by_env_conf};

    #[test]
    #[serial]
    fn overrides_defaults() {
        let env_conf = overrided_by_env_conf!(
            "JASON_PEER__STATS_INTERVAL" => "250ms",
            "JASON_PEER__ICE_RESTART_ON_FAILURE" => "false",
        );

        assert_eq!(Conf::default().peer.stats_interval, Duration::from_secs(1));
        assert_eq!(env_conf.peer.stats_interval, Duration::from_millis(250));
        assert!(!env_conf.peer.ice_restart_on_failure);
    }
}
