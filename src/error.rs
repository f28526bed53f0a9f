use thiserror::Error;
use crate::frame::EndpointId;
use crate::seq_no::SeqNo;

/// Everything that can go wrong with a frame or a submission.
///
/// Most of these are expected in regular operation on a lossy link and are handled by dropping
///  the frame in question: the engines return them so callers can log or count them, but none
///  of them is fatal. Only [ArqError::PayloadTooLarge], [ArqError::QueueFull] and
///  [ArqError::EndpointClosed] are caller errors that need to be handled by the application.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ArqError {
    #[error("corrupt frame layout: {0}")]
    CorruptLayout(String),

    #[error("checksum mismatch")]
    CorruptFrame,

    #[error("frame addressed to {dst:?}, this endpoint is {own:?}")]
    Misdirected { own: EndpointId, dst: EndpointId },

    #[error("sequence number {seq:?} is outside the window")]
    OutOfWindow { seq: SeqNo },

    #[error("sequence number {seq:?} is in the window but {expected:?} is expected next")]
    OutOfOrder { seq: SeqNo, expected: SeqNo },

    #[error("frame {seq:?} has a kind this endpoint does not process")]
    UnexpectedKind { seq: SeqNo },

    #[error("payload of {len} bytes exceeds the frame capacity of {capacity} bytes")]
    PayloadTooLarge { len: usize, capacity: usize },

    #[error("the endpoint's input queue is full")]
    QueueFull,

    #[error("the endpoint is shut down")]
    EndpointClosed,
}
