//! Logging settings.

use std::{borrow::Cow, str::FromStr as _};

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Logging settings.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize, SmartDefault)]
#[serde(default)]
pub struct Log {
    /// Maximum allowed level of engine log entries.
    /// Defaults to `INFO`.
    #[default("INFO")]
    pub level: Cow<'static, str>,
}

impl Log {
    /// Returns configured logging level. `None` if disabled.
    #[must_use]
    pub fn level(&self) -> Option<slog::Level> {
        slog::Level::from_str(&self.level).ok()
    }
}

#[cfg(test)]
mod spec {
    use serial_test::serial;

    use crate::{conf::Conf, overrided_by_env_conf};

    #[test]
    #[serial]
    fn overrides_defaults() {
        let default_conf = Conf::default();
        let warn_conf = overrided_by_env_conf!("JASON_LOG__LEVEL" => "WARN");
        let off_conf = overrided_by_env_conf!("JASON_LOG__LEVEL" => "OFF");

        assert_eq!(default_conf.log.level(), Some(slog::Level::Info));
        assert_eq!(warn_conf.log.level(), Some(slog::Level::Warning));
        assert_eq!(off_conf.log.level(), None);
    }
}
