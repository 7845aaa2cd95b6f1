use crate::error::Error;
use crate::io::{Encode, PgBufMutExt};
use crate::message::CANCEL_REQUEST_CODE;

/// Sent instead of [`Startup`], on a *new* connection, to cancel a query
/// running on an existing session identified by its process ID and secret
/// key.
///
/// A 4-byte secret produces the fixed 16-byte packet that every protocol
/// 3.0 server expects; longer secrets (up to 256 bytes, as negotiated by
/// protocol 3.2 servers) extend the packet accordingly.
///
/// [`Startup`]: super::Startup
#[derive(Debug)]
pub struct CancelRequest<'a> {
    /// The process ID of the target backend.
    pub process_id: u32,

    /// The secret key for the target backend.
    pub secret_key: &'a [u8],
}

impl Encode for CancelRequest<'_> {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        if self.secret_key.len() > 256 {
            return Err(err_protocol!(
                "cancel secret key is too long: {} bytes",
                self.secret_key.len()
            ));
        }

        buf.put_length_prefixed(|buf| {
            buf.extend(&CANCEL_REQUEST_CODE.to_be_bytes());
            buf.extend(&self.process_id.to_be_bytes());
            buf.extend_from_slice(self.secret_key);

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::CancelRequest;
    use crate::io::Encode;

    #[test]
    fn it_encodes_legacy_cancel_request() {
        let mut buf = Vec::new();
        let m = CancelRequest {
            process_id: 10182,
            secret_key: &2303903019u32.to_be_bytes(),
        };

        m.encode(&mut buf).unwrap();

        assert_eq!(buf, b"\0\0\0\x10\x04\xd2\x16.\0\0'\xc6\x89R\xc5+");
    }

    #[test]
    fn it_encodes_long_secret_keys() {
        let mut buf = Vec::new();
        let secret = [0xaa_u8; 32];
        let m = CancelRequest {
            process_id: 1,
            secret_key: &secret,
        };

        m.encode(&mut buf).unwrap();

        assert_eq!(buf.len(), 12 + 32);
        assert_eq!(&buf[0..4], &(44u32).to_be_bytes());
    }

    #[test]
    fn it_rejects_oversize_secret_keys() {
        let secret = [0_u8; 257];
        let m = CancelRequest {
            process_id: 1,
            secret_key: &secret,
        };

        assert!(m.encode(&mut Vec::new()).is_err());
    }
}
