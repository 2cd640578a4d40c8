use thiserror::Error;

/// Errors that can occur while reading or writing a bitstream.
///
/// Exhaustion is never fatal to the engine: an outgoing payload that
/// overflows is discarded whole, an incoming payload that underflows is
/// abandoned without applying partial state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SerdeErr {
    /// Attempted to write past the end of the bitstream buffer
    #[error("bitstream capacity exceeded while writing")]
    WriteOverflow,

    /// Attempted to read past the end of the bitstream buffer
    #[error("bitstream exhausted while reading")]
    ReadOverflow,

    /// Payload bits decoded to a value that is not representable
    #[error("malformed bitstream payload")]
    Malformed,
}
