use bytes::Bytes;

use crate::error::Error;

/// Decode a backend message from its body.
///
/// The length prefix and type tag have already been consumed; `buf` is the
/// body only. `Bytes` is a refcounted slice, so a decoder keeps only what it
/// explicitly slices or copies out.
pub trait Decode: Sized {
    fn decode(buf: Bytes) -> Result<Self, Error>;
}

impl Decode for Bytes {
    fn decode(buf: Bytes) -> Result<Self, Error> {
        Ok(buf)
    }
}

impl Decode for () {
    fn decode(_: Bytes) -> Result<(), Error> {
        Ok(())
    }
}
