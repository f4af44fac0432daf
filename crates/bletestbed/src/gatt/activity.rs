//! Session activity log
//!
//! Every log-worthy session event goes to the `log` facade and, when one is
//! installed, to a caller-supplied callback (typically an on-screen log).

use log::{log, Level};

/// Receives every session log line. Error lines arrive prefixed `Error: `.
pub type LogCallback = Box<dyn Fn(Level, &str) + Send + 'static>;

pub(crate) struct ActivityLog {
    target: &'static str,
    callback: Option<LogCallback>,
}

impl ActivityLog {
    pub(crate) fn new(target: &'static str) -> Self {
        Self {
            target,
            callback: None,
        }
    }

    pub(crate) fn set_callback(&mut self, callback: LogCallback) {
        self.callback = Some(callback);
    }

    pub(crate) fn info(&self, message: &str) {
        self.emit(Level::Info, message);
    }

    pub(crate) fn debug(&self, message: &str) {
        self.emit(Level::Debug, message);
    }

    pub(crate) fn error(&self, message: &str) {
        self.emit(Level::Error, &format!("Error: {}", message));
    }

    fn emit(&self, level: Level, message: &str) {
        log!(target: self.target, level, "{}", message);
        if let Some(callback) = &self.callback {
            callback(level, message);
        }
    }
}

impl std::fmt::Debug for ActivityLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityLog")
            .field("target", &self.target)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}
