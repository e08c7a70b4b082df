/// Severity of an outbound event record.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Severity {
    Info,
    Error,
}

/// The finite set of notifications the executive emits: one per
/// control-request outcome plus creation and load failures.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u16)]
pub enum EventId {
    AppStarted = 10,
    AppStartFailed = 11,
    AppExited = 12,
    AppExitedOnError = 13,
    AppStopped = 14,
    AppRestarted = 15,
    AppRestartFailed = 16,
    AppReloaded = 17,
    AppReloadFailed = 18,
    InvalidControlRequest = 19,
    LibraryLoaded = 20,
}

/// Destination for structured events and the append-only syslog.
///
/// The executive never formats for humans beyond the message text; the
/// sink decides routing, filtering, and persistence. Implementations must
/// be callable from any task.
pub trait EventSink {
    fn send_event(&self, id: EventId, severity: Severity, text: &str);

    fn write_syslog(&self, text: &str);
}

/// Discards everything. Useful for embedders that only consume the `log`
/// facade.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn send_event(&self, _id: EventId, _severity: Severity, _text: &str) {}

    fn write_syslog(&self, _text: &str) {}
}
