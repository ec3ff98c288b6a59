//! Logging backend for native hosts.
//!
//! The engine itself logs through the [`log`](::log) facade. Hosts which
//! don't install their own logger may call [`init`] to get structured JSON
//! logs.

use std::io;

use chrono::Local;
use derivative::Derivative;
use slog::{o, Drain, Duplicate, FnValue, Fuse, Level, Logger, PushFnValue, Record};
use slog_async::Async;
use slog_json::Json;
use slog_scope::GlobalLoggerGuard;

use crate::conf;

/// Builds JSON [`Logger`] which prints all its log records to `w_out` writer,
/// but WARN level (and higher) to `w_err` writer. Logger will use [`Async`]
/// drain with channel size of 2048 entries.
///
/// Created [`Logger`] produces log records with `fqn`, `lvl`, `time` and `msg`
/// fields by default.
pub fn new_dual_logger<W1, W2>(w_out: W1, w_err: W2) -> Logger
where
    W1: io::Write + Send + 'static,
    W2: io::Write + Send + 'static,
{
    let drain_out = Json::new(w_out).build();
    let drain_err = Json::new(w_err).build();
    let drain = Duplicate(
        drain_out.filter(|r| !r.level().is_at_least(Level::Warning)),
        drain_err.filter_level(Level::Warning),
    )
    .map(Fuse);
    let drain = slog_envlogger::new(drain).fuse();
    let drain = Async::new(drain).chan_size(2048).build().fuse();
    add_default_keys(&Logger::root(drain, o!()))
}

/// Adds default log record data (key-value pairs) to specified [`Logger`]:
/// - `msg`: log record message.
/// - `fqn`: path to code line that called log function.
/// - `time`: creation date and time of log record in [RFC 3339] format.
/// - `lvl`: logging level of log record.
///
/// [RFC 3339]: https://www.ietf.org/rfc/rfc3339.txt
fn add_default_keys(logger: &Logger) -> Logger {
    logger.new(o!(
        "msg" => PushFnValue(move |record : &Record, ser| {
            ser.emit(record.msg())
        }),
        "fqn" => PushFnValue(move |record : &Record, ser| {
             ser.emit(format_args!("{}:{}", record.module(), record.line()))
        }),
        "time" => PushFnValue(move |_ : &Record, ser| {
            ser.emit(Local::now().to_rfc3339())
        }),
        "lvl" => FnValue(move |rinfo : &Record| {
            rinfo.level().as_str()
        }),
    ))
}

/// Keeps the global logger installed by [`init`] alive.
///
/// The previous global logger is restored on [`Drop`].
#[derive(Derivative)]
#[derivative(Debug)]
pub struct LogGuard(#[derivative(Debug = "ignore")] GlobalLoggerGuard);

/// Installs the dual JSON logger writing to stdout and stderr as the global
/// one, and bridges the [`log`](::log) facade records into it.
///
/// Returns `None` if logging is turned `OFF` by the provided [`conf::Log`].
///
/// # Errors
///
/// If another [`log`](::log) facade logger is installed already.
pub fn init(
    conf: &conf::Log,
) -> Result<Option<LogGuard>, ::log::SetLoggerError> {
    let level = if let Some(level) = conf.level() {
        level
    } else {
        return Ok(None);
    };

    let logger = new_dual_logger(io::stdout(), io::stderr());
    let logger = Logger::root(logger.filter_level(level).fuse(), o!());
    let guard = slog_scope::set_global_logger(logger);
    slog_stdlog::init_with_level(facade_level(level))?;

    Ok(Some(LogGuard(guard)))
}

/// Converts [`slog::Level`] into the [`log`](::log) facade one.
fn facade_level(level: Level) -> ::log::Level {
    match level {
        Level::Critical | Level::Error => ::log::Level::Error,
        Level::Warning => ::log::Level::Warn,
        Level::Info => ::log::Level::Info,
        Level::Debug => ::log::Level::Debug,
        Level::Trace => ::log::Level::Trace,
    }
}

#[cfg(test)]
mod spec {
    use std::borrow::Cow;

    use super::*;

    #[test]
    fn maps_levels_to_facade() {
        assert_eq!(facade_level(Level::Critical), ::log::Level::Error);
        assert_eq!(facade_level(Level::Warning), ::log::Level::Warn);
        assert_eq!(facade_level(Level::Trace), ::log::Level::Trace);
    }

    #[test]
    fn off_level_installs_nothing() {
        let conf = conf::Log {
            level: Cow::Borrowed("OFF"),
        };

        assert!(init(&conf).unwrap().is_none());
    }
}
