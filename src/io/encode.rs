use crate::error::Error;

/// Encode a frontend message by appending it, type tag and length prefix
/// included, to the caller-provided buffer.
///
/// Encoding fails only when a message body would exceed the protocol's
/// maximum body length.
pub trait Encode {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), Error>;
}
