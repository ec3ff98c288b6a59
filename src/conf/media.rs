//! Media state settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

#[derive(Clone, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct Media {
    /// Duration after which a media state transition not confirmed by the
    /// server is rolled back. Defaults to `10s` (`500ms` with the `mockable`
    /// feature).
    #[cfg_attr(not(feature = "mockable"), default(Duration::from_secs(10)))]
    #[cfg_attr(feature = "mockable", default(Duration::from_millis(500)))]
    #[serde(with = "humantime_serde")]
    pub transition_timeout: Duration,
}

#[cfg(test)]
mod spec {
    use std::time::Duration;

    use serial_test::serial;

    use crate::{conf::Conf, overrided_by_env_conf};

    #[test]
    #[serial]
    fn overrides_defaults() {
        let default_conf = Conf::default();
        let env_conf = overrided_by_env_conf!(
            "JASON_MEDIA__TRANSITION_TIMEOUT" => "502ms",
        );

        assert_ne!(
            default_conf.media.transition_timeout,
            env_conf.media.transition_timeout,
        );
        assert_eq!(
            env_conf.media.transition_timeout,
            Duration::from_millis(502),
        );
    }
}
