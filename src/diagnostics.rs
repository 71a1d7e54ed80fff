//! Injected diagnostics sink.
//!
//! Components that report progress receive a `Diagnostics` value instead of
//! writing to a global logger. [`LogDiagnostics`] forwards to the `log` facade,
//! so the host application decides where records go; the library never
//! installs a logger itself.

use log::Level;

/// Structured sink for chain events.
pub trait Diagnostics {
    /// Records `message` emitted by `component` at `level`.
    fn record(&self, level: Level, component: &str, message: &str);

    fn info(&self, component: &str, message: &str) {
        self.record(Level::Info, component, message);
    }

    fn debug(&self, component: &str, message: &str) {
        self.record(Level::Debug, component, message);
    }

    fn warn(&self, component: &str, message: &str) {
        self.record(Level::Warn, component, message);
    }
}

/// Forwards records to the `log` crate, using the component as the target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDiagnostics;

impl Diagnostics for LogDiagnostics {
    fn record(&self, level: Level, component: &str, message: &str) {
        log::log!(target: component, level, "{}", message);
    }
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDiagnostics;

impl Diagnostics for NullDiagnostics {
    fn record(&self, _level: Level, _component: &str, _message: &str) {}
}
