//! Write-ahead log configuration.

use crate::error::CoreError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked once when the log hits a fatal error.
#[derive(Clone)]
pub struct FatalErrorHandler(Arc<dyn Fn(&CoreError) + Send + Sync>);

impl FatalErrorHandler {
    /// Wraps a callback.
    pub fn new(handler: impl Fn(&CoreError) + Send + Sync + 'static) -> Self {
        Self(Arc::new(handler))
    }

    /// Handler that only relies on the error log line the log writes itself.
    #[must_use]
    pub fn log_only() -> Self {
        Self::new(|_| {})
    }

    /// Handler that terminates the process with exit status 1.
    #[must_use]
    pub fn exit_process() -> Self {
        Self::new(|_| std::process::exit(1))
    }

    pub(crate) fn call(&self, error: &CoreError) {
        (self.0)(error);
    }
}

impl fmt::Debug for FatalErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FatalErrorHandler")
    }
}

/// Configuration for opening a write-ahead log.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to take an exclusive lock on the directory.
    pub lock_directory: bool,

    /// Largest payload accepted on write and on read.
    pub max_payload_size: u32,

    /// Size at which the current log file is rotated (0 = never).
    pub max_log_file_size: u64,

    /// Batching window of the background flusher.
    pub flush_interval: Duration,

    /// Called once when a fatal error poisons the log.
    pub fatal_handler: FatalErrorHandler,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            lock_directory: true,
            max_payload_size: 64 * 1024 * 1024, // 64 MB
            max_log_file_size: 0,               // disabled
            flush_interval: Duration::from_millis(5),
            fatal_handler: FatalErrorHandler::log_only(),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to lock the directory.
    #[must_use]
    pub const fn lock_directory(mut self, value: bool) -> Self {
        self.lock_directory = value;
        self
    }

    /// Sets the maximum payload size.
    #[must_use]
    pub const fn max_payload_size(mut self, size: u32) -> Self {
        self.max_payload_size = size;
        self
    }

    /// Sets the log file rotation size.
    #[must_use]
    pub const fn max_log_file_size(mut self, size: u64) -> Self {
        self.max_log_file_size = size;
        self
    }

    /// Sets the flusher batching window.
    #[must_use]
    pub const fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Sets the fatal error callback.
    #[must_use]
    pub fn fatal_handler(mut self, handler: impl Fn(&CoreError) + Send + Sync + 'static) -> Self {
        self.fatal_handler = FatalErrorHandler::new(handler);
        self
    }

    /// Terminates the process on the first fatal error.
    #[must_use]
    pub fn exit_on_fatal(mut self) -> Self {
        self.fatal_handler = FatalErrorHandler::exit_process();
        self
    }
}
