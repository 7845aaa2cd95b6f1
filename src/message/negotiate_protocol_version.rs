use bytes::{Buf, Bytes};

use crate::error::Error;
use crate::io::{BufExt, Decode};

/// The server does not support the exact protocol version or the protocol
/// options the startup message asked for, but is willing to continue with
/// the newest minor version it does support.
///
/// Recorded on the connection and otherwise ignored; this crate only ever
/// requests 3.0, so the negotiation can only ratchet down protocol options.
#[derive(Debug, Clone)]
pub struct NegotiateProtocolVersion {
    /// Newest minor protocol version supported by the server for the major
    /// version requested by the client.
    pub newest_minor_version: u32,

    /// The protocol options the server did not recognize.
    pub unsupported_options: Vec<String>,
}

impl Decode for NegotiateProtocolVersion {
    fn decode(mut buf: Bytes) -> Result<Self, Error> {
        if buf.remaining() < 8 {
            return Err(err_protocol!("NegotiateProtocolVersion body too short"));
        }

        let newest_minor_version = buf.get_u32();
        let cnt = buf.get_u32() as usize;

        let mut unsupported_options = Vec::with_capacity(cnt);
        for _ in 0..cnt {
            unsupported_options.push(buf.get_str_nul()?);
        }

        Ok(Self {
            newest_minor_version,
            unsupported_options,
        })
    }
}
