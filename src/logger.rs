use std::fmt;

/// A client-defined log destination for one connection.
///
/// Records carry the broker session id alongside the message. Sinks are
/// best-effort: they return nothing and must not panic.
pub trait LogSink: Send + Sync {
    fn log(&self, session: &str, args: fmt::Arguments<'_>);
}

/// A `LogSink` that forwards records to `tracing` at INFO level under the
/// `iridium_stomp_core::session` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, session: &str, args: fmt::Arguments<'_>) {
        tracing::info!(target: "iridium_stomp_core::session", session = %session, "{}", args);
    }
}

impl<F> LogSink for F
where
    F: Fn(&str, &str) + Send + Sync,
{
    fn log(&self, session: &str, args: fmt::Arguments<'_>) {
        self(session, &args.to_string());
    }
}
