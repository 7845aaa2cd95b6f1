use crate::error::Error;
use crate::io::Encode;
use crate::message::{GSS_ENC_REQUEST_CODE, SSL_REQUEST_CODE};

/// Sent first on a fresh connection to ask the server to switch to TLS.
///
/// The server answers with a single byte: `'S'` to proceed with the TLS
/// handshake, `'N'` to refuse. Anything else is a protocol error.
#[derive(Debug)]
pub struct SslRequest;

impl Encode for SslRequest {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        buf.extend(&8_u32.to_be_bytes());
        buf.extend(&SSL_REQUEST_CODE.to_be_bytes());

        Ok(())
    }
}

/// The GSSAPI-encryption analogue of [`SslRequest`]; same single-byte
/// answer convention. This crate sends it only to probe and always treats
/// `'N'` as final, as GSSAPI encryption itself is out of scope.
#[derive(Debug)]
pub struct GssEncRequest;

impl Encode for GssEncRequest {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        buf.extend(&8_u32.to_be_bytes());
        buf.extend(&GSS_ENC_REQUEST_CODE.to_be_bytes());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{GssEncRequest, SslRequest};
    use crate::io::Encode;

    #[test]
    fn it_encodes_ssl_request() {
        let mut buf = Vec::new();

        SslRequest.encode(&mut buf).unwrap();

        assert_eq!(buf, b"\x00\x00\x00\x08\x04\xd2\x16/");
    }

    #[test]
    fn it_encodes_gss_enc_request() {
        let mut buf = Vec::new();

        GssEncRequest.encode(&mut buf).unwrap();

        assert_eq!(buf, b"\x00\x00\x00\x08\x04\xd2\x160");
    }
}
