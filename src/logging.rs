//! Logging goes through `tracing`. There is no process-wide logger configuration in this crate:
//!  each socket gets a [LogSink] that decides which categories are emitted, and optionally
//!  routes them to a specific subscriber.

use std::fmt::Display;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use bitflags::bitflags;
use tracing::dispatcher::DefaultGuard;
use tracing::{info, Dispatch};

bitflags! {
    /// Log categories that can be switched on and off at runtime. Errors are always logged.
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct LogLevels: u8 {
        const INFO  = 0b0001;
        const USER  = 0b0010;
        const DEBUG = 0b0100;
        const WARN  = 0b1000;
    }
}

struct LogSinkInner {
    levels: AtomicU8,
    dispatch: Option<Dispatch>,
}

/// A handle for controlling a socket's logging. Clones share their state, so the application can
///  keep a clone and change the enabled levels while the socket is running.
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<LogSinkInner>,
}

impl Default for LogSink {
    fn default() -> Self {
        LogSink::new(LogLevels::all())
    }
}

impl LogSink {
    /// logs to the global default subscriber
    pub fn new(levels: LogLevels) -> LogSink {
        LogSink {
            inner: Arc::new(LogSinkInner {
                levels: AtomicU8::new(levels.bits()),
                dispatch: None,
            }),
        }
    }

    /// logs to the given subscriber instead of the global default
    pub fn with_dispatch(dispatch: Dispatch, levels: LogLevels) -> LogSink {
        LogSink {
            inner: Arc::new(LogSinkInner {
                levels: AtomicU8::new(levels.bits()),
                dispatch: Some(dispatch),
            }),
        }
    }

    pub fn levels(&self) -> LogLevels {
        LogLevels::from_bits_truncate(self.inner.levels.load(Ordering::Relaxed))
    }

    pub fn enable(&self, levels: LogLevels) {
        self.inner.levels.fetch_or(levels.bits(), Ordering::Relaxed);
    }

    pub fn disable(&self, levels: LogLevels) {
        self.inner.levels.fetch_and(!levels.bits(), Ordering::Relaxed);
    }

    pub fn is_enabled(&self, levels: LogLevels) -> bool {
        self.levels().contains(levels)
    }

    /// Emits an application message, subject to [LogLevels::USER]
    pub fn user(&self, msg: impl Display) {
        if !self.is_enabled(LogLevels::USER) {
            return;
        }
        match &self.inner.dispatch {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, || info!(target: "rudp::user", "{}", msg)),
            None => info!(target: "rudp::user", "{}", msg),
        }
    }

    /// Makes this sink's subscriber the default for the current thread until the guard is dropped.
    ///  Without a dedicated subscriber, the global default stays in place.
    pub(crate) fn install(&self) -> Option<DefaultGuard> {
        self.inner.dispatch.as_ref()
            .map(tracing::dispatcher::set_default)
    }
}

macro_rules! log_info {
    ($log:expr, $($arg:tt)+) => {
        if $log.is_enabled($crate::logging::LogLevels::INFO) {
            tracing::info!($($arg)+);
        }
    };
}

macro_rules! log_debug {
    ($log:expr, $($arg:tt)+) => {
        if $log.is_enabled($crate::logging::LogLevels::DEBUG) {
            tracing::debug!($($arg)+);
        }
    };
}

/// per-packet details, switched together with the debug level
macro_rules! log_trace {
    ($log:expr, $($arg:tt)+) => {
        if $log.is_enabled($crate::logging::LogLevels::DEBUG) {
            tracing::trace!($($arg)+);
        }
    };
}

macro_rules! log_warn {
    ($log:expr, $($arg:tt)+) => {
        if $log.is_enabled($crate::logging::LogLevels::WARN) {
            tracing::warn!($($arg)+);
        }
    };
}

pub(crate) use {log_debug, log_info, log_trace, log_warn};


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_default_enables_all() {
        let log = LogSink::default();
        assert_eq!(log.levels(), LogLevels::all());
        assert!(log.install().is_none());
    }

    #[rstest]
    #[case::info(LogLevels::INFO)]
    #[case::user(LogLevels::USER)]
    #[case::debug(LogLevels::DEBUG)]
    #[case::warn(LogLevels::WARN)]
    fn test_enable_disable(#[case] level: LogLevels) {
        let log = LogSink::new(LogLevels::empty());
        assert!(!log.is_enabled(level));

        log.enable(level);
        assert!(log.is_enabled(level));
        assert_eq!(log.levels(), level);

        log.disable(level);
        assert!(!log.is_enabled(level));
    }

    #[test]
    fn test_clones_share_levels() {
        let log = LogSink::new(LogLevels::INFO);
        let clone = log.clone();
        clone.enable(LogLevels::WARN);
        assert_eq!(log.levels(), LogLevels::INFO | LogLevels::WARN);
    }

    #[test]
    fn test_dispatch_is_installed() {
        let subscriber = tracing_subscriber::fmt()
            .with_test_writer()
            .finish();
        let log = LogSink::with_dispatch(Dispatch::new(subscriber), LogLevels::all());
        log.user("user message");

        let guard = log.install();
        assert!(guard.is_some());
        log_info!(log, "through the installed dispatch");
    }
}
