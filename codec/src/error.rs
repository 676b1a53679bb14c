use thiserror::Error;

/// Errors raised by the codec for inputs that violate its preconditions.
/// Malformed-but-correctly-sized frames are not errors — they classify as
/// [`crate::packet::PacketType::Invalid`] instead, per the protocol's own
/// validation order.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecoderError {
    #[error("expected a {expected}-byte frame, got {actual}")]
    WrongLength { expected: usize, actual: usize },
}
