use bytes::Bytes;
use std::fmt;

/// A structured STOMP frame as handed over by the transport collaborator.
///
/// The core never encodes or decodes wire text; it only inspects the command
/// and a handful of headers when routing inbound frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// STOMP command (e.g. MESSAGE, RECEIPT, ERROR)
    pub command: String,
    /// Ordered headers as (key, value) pairs
    pub headers: Vec<(String, String)>,
    /// Body bytes, shared cheaply when a frame is cloned for fan-out
    pub body: Bytes,
}

impl Frame {
    /// Create a new frame with the given command and empty headers/body.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Add a header (builder style).
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Set the frame body (builder style).
    pub fn set_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Get the value of a header by name.
    ///
    /// STOMP 1.2 says the first occurrence of a repeated header wins, so
    /// this returns the first match (case-sensitive).
    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The `subscription` header of a MESSAGE frame, if this is one.
    pub fn subscription(&self) -> Option<&str> {
        if self.command == "MESSAGE" {
            self.get_header("subscription")
        } else {
            None
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Command: {}", self.command)?;
        for (k, v) in &self.headers {
            writeln!(f, "{}: {}", k, v)?;
        }
        writeln!(f, "Body ({} bytes)", self.body.len())
    }
}

/// Items exchanged with the transport collaborator.
///
/// A `StompItem` is either a structured `Frame` or a `Heartbeat` marker
/// standing for a single EOL pulse on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StompItem {
    /// A STOMP frame (command + headers + body)
    Frame(Frame),
    /// A single heartbeat pulse
    Heartbeat,
}
