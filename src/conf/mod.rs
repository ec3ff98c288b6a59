//! Provides engine configuration options.
//!
//! Configuration options can be parsed from config files in TOML format and
//! overridden by `JASON_`-prefixed environment variables.

pub mod log;
pub mod media;
pub mod peer;
pub mod rpc;

use std::env;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

#[doc(inline)]
pub use self::{log::Log, media::Media, peer::Peer, rpc::Rpc};

/// CLI argument that is responsible for holding application configuration
/// file path.
static APP_CONF_PATH_CMD_ARG_NAME: &str = "--conf";

/// Environment variable that is responsible for holding application
/// configuration file path.
static APP_CONF_PATH_ENV_VAR_NAME: &str = "JASON_CONF";

/// Holds engine config.
#[derive(Clone, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct Conf {
    /// Signaling session settings.
    pub rpc: Rpc,

    /// Local and remote media settings.
    pub media: Media,

    /// [`PeerConnection`]s settings.
    ///
    /// [`PeerConnection`]: crate::peer::PeerConnection
    pub peer: Peer,

    /// Logging settings.
    pub log: Log,
}

impl Conf {
    /// Creates new [`Conf`] and applies values from such sources
    /// and in that order:
    /// - default values;
    /// - configuration file, the name of which is given as a command line
    /// parameter or environment variable;
    /// - environment variables.
    ///
    /// # Errors
    ///
    /// Errors if parsing fails.
    pub fn parse() -> Result<Self, ConfigError> {
        let mut cfg = Config::new();

        if let Some(path) = get_conf_file_name(
            env::var(APP_CONF_PATH_ENV_VAR_NAME).ok(),
            env::args(),
        ) {
            cfg.merge(File::with_name(&path))?;
        }

        cfg.merge(Environment::with_prefix("JASON").separator("__"))?;

        cfg.try_into()
    }
}

/// Returns the path to a configuration file, if it's set through the
/// environment variable or the command line argument.
///
/// The environment variable wins over the argument.
fn get_conf_file_name<T>(env_var: Option<String>, mut cmd_args: T) -> Option<String>
where
    T: Iterator<Item = String>,
{
    env_var.or_else(|| {
        cmd_args
            .by_ref()
            .find(|arg| arg == APP_CONF_PATH_CMD_ARG_NAME)
            .and_then(|_| cmd_args.next())
    })
}

/// Parses [`Conf`] with the provided environment variables set for the
/// duration of parsing.
#[cfg(test)]
#[macro_export]
macro_rules! overrided_by_env_conf {
    ($($env:expr => $value:expr),+ $(,)?) => {{
        $(::std::env::set_var($env, $value);)+
        let conf = $crate::conf::Conf::parse().unwrap();
        $(::std::env::remove_var($env);)+
        conf
    }};
}
