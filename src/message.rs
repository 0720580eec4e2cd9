use crate::error::ReadError;
use crate::frame::Frame;

/// The envelope routed to consumers: either a received frame or a read
/// failure.
///
/// Cloning is cheap (frame bodies are `Bytes`, I/O errors are behind an
/// `Arc`), which is what fan-out relies on.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageData {
    /// A frame received from the broker
    Message(Frame),
    /// A failure observed by the reader
    Error(ReadError),
}

impl MessageData {
    /// Returns `true` for the error variant.
    pub fn is_error(&self) -> bool {
        matches!(self, MessageData::Error(_))
    }

    pub fn frame(&self) -> Option<&Frame> {
        match self {
            MessageData::Message(f) => Some(f),
            MessageData::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ReadError> {
        match self {
            MessageData::Message(_) => None,
            MessageData::Error(e) => Some(e),
        }
    }

    /// Convert into a `Result`, handy for `?`-style consumers.
    pub fn into_result(self) -> Result<Frame, ReadError> {
        match self {
            MessageData::Message(f) => Ok(f),
            MessageData::Error(e) => Err(e),
        }
    }
}

impl From<Frame> for MessageData {
    fn from(f: Frame) -> Self {
        MessageData::Message(f)
    }
}

impl From<ReadError> for MessageData {
    fn from(e: ReadError) -> Self {
        MessageData::Error(e)
    }
}
