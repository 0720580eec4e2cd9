use tokio::sync::mpsc;

use crate::connection::Connection;
use crate::error::ConnError;
use crate::message::MessageData;

/// A lightweight handle returned from `Connection::subscribe` that packages
/// the subscription id and the receiving side of its delivery queue.
///
/// Frames routed to this subscription and any read failure on the shared
/// connection both arrive here as [`MessageData`].
pub struct Subscription {
    id: String,
    receiver: mpsc::Receiver<MessageData>,
    conn: Connection,
}

impl Subscription {
    pub(crate) fn new(id: String, receiver: mpsc::Receiver<MessageData>, conn: Connection) -> Self {
        Self { id, receiver, conn }
    }

    /// Returns the local subscription id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The connection this subscription belongs to.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Wait for the next envelope. `None` once the subscription has been
    /// removed and its queue drained.
    pub async fn recv(&mut self) -> Option<MessageData> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<MessageData> {
        self.receiver.try_recv().ok()
    }

    /// Consume the `Subscription` and return the underlying receiver so the
    /// caller can drive message handling directly.
    pub fn into_receiver(self) -> mpsc::Receiver<MessageData> {
        self.receiver
    }

    /// Remove this subscription from the connection's registry.
    pub async fn unsubscribe(self) -> Result<(), ConnError> {
        self.conn.unsubscribe(&self.id).await
    }
}
