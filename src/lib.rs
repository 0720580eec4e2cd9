//! Connection core for async STOMP clients.
//!
//! A [`Connection`] owns one broker session: its negotiated heartbeats,
//! the subscription queues that share the transport, the general input
//! queue and the background tasks tied to the session. Frame encoding and
//! socket I/O stay with the caller, who hands the connection a
//! `futures::Sink` and `futures::Stream` of [`StompItem`]s.

pub mod connection;
pub mod error;
pub mod frame;
pub mod heartbeat;
pub mod logger;
pub mod message;
pub mod registry;
pub mod subscription;
pub mod version;

pub use connection::{Connection, ConnectionBuilder, ConnectionState};
pub use error::{ConnError, ReadError};
pub use frame::{Frame, StompItem};
pub use heartbeat::{Heartbeat, HeartbeatDescriptor, negotiate_heartbeats, parse_heartbeat_header};
pub use logger::{LogSink, TracingSink};
pub use message::MessageData;
pub use registry::SubscriptionRegistry;
pub use subscription::Subscription;
pub use version::{SUPPORTED_VERSIONS, negotiate_version, supported};
