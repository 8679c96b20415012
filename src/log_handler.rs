//! Instance log forwarding.
//!
//! Entry points log through `RunnableContext::log`. Lines travel with the
//! instance's other reports to the application supervisor, which hands each
//! one to every registered `LogHandler`.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use parking_lot::RwLock;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// One log line emitted by a runnable instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub application_id: String,
    pub runnable: String,
    pub instance_id: String,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: SystemTime,
}

/// Receives instance log lines. Called from the supervisor task; keep it quick.
pub trait LogHandler: Send + Sync + 'static {
    fn on_log(
        &self,
        entry: &LogEntry,
    );
}

impl<F> LogHandler for F
where
    F: Fn(&LogEntry) + Send + Sync + 'static,
{
    fn on_log(
        &self,
        entry: &LogEntry,
    ) {
        self(entry)
    }
}

/// Re-emits instance logs as `tracing` events under the `d_fleet::instance` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogHandler;

impl LogHandler for TracingLogHandler {
    fn on_log(
        &self,
        entry: &LogEntry,
    ) {
        let LogEntry {
            runnable,
            instance_id,
            message,
            ..
        } = entry;
        match entry.level {
            LogLevel::Trace => trace!(target: "d_fleet::instance", %runnable, %instance_id, "{}", message),
            LogLevel::Debug => debug!(target: "d_fleet::instance", %runnable, %instance_id, "{}", message),
            LogLevel::Info => info!(target: "d_fleet::instance", %runnable, %instance_id, "{}", message),
            LogLevel::Warn => warn!(target: "d_fleet::instance", %runnable, %instance_id, "{}", message),
            LogLevel::Error => error!(target: "d_fleet::instance", %runnable, %instance_id, "{}", message),
        }
    }
}

/// Keeps every entry it sees
#[derive(Debug, Default)]
pub struct CollectingLogHandler {
    entries: Mutex<Vec<LogEntry>>,
}

impl CollectingLogHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries.lock().iter().map(|e| e.message.clone()).collect()
    }
}

impl LogHandler for CollectingLogHandler {
    fn on_log(
        &self,
        entry: &LogEntry,
    ) {
        self.entries.lock().push(entry.clone());
    }
}

/// Handler set shared by a controller and its supervisor
#[derive(Default)]
pub(crate) struct LogHandlers {
    handlers: RwLock<Vec<Arc<dyn LogHandler>>>,
}

impl LogHandlers {
    pub(crate) fn new(handlers: Vec<Arc<dyn LogHandler>>) -> Self {
        Self {
            handlers: RwLock::new(handlers),
        }
    }

    pub(crate) fn add(
        &self,
        handler: Arc<dyn LogHandler>,
    ) {
        self.handlers.write().push(handler);
    }

    pub(crate) fn dispatch(
        &self,
        entry: &LogEntry,
    ) {
        for handler in self.handlers.read().iter() {
            handler.on_log(entry);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers.read().len()
    }
}
