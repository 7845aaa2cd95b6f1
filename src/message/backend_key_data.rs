use bytes::{Buf, Bytes};

use crate::error::Error;
use crate::io::Decode;

/// Secret-key data that the frontend must save to be able to issue cancel
/// requests later.
///
/// Protocol 3.0 always sends a 4-byte secret; newer servers may send up to
/// 256 bytes, which we carry through verbatim to [`CancelRequest`].
///
/// [`CancelRequest`]: super::CancelRequest
#[derive(Debug, Clone)]
pub struct BackendKeyData {
    /// The process ID of this backend.
    pub process_id: u32,

    /// The secret key of this backend.
    pub secret_key: Bytes,
}

impl Decode for BackendKeyData {
    fn decode(mut buf: Bytes) -> Result<Self, Error> {
        if buf.remaining() < 8 {
            return Err(err_protocol!("BackendKeyData body too short"));
        }

        let process_id = buf.get_u32();

        if buf.remaining() > 256 {
            return Err(err_protocol!(
                "BackendKeyData secret is too long: {} bytes",
                buf.remaining()
            ));
        }

        Ok(Self {
            process_id,
            secret_key: buf,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::BackendKeyData;
    use crate::io::Decode;
    use bytes::Bytes;

    #[test]
    fn it_decodes_backend_key_data() {
        let m = BackendKeyData::decode(Bytes::from_static(b"\0\0'\xc6\x89R\xc5+")).unwrap();

        assert_eq!(m.process_id, 10182);
        assert_eq!(m.secret_key.as_ref(), &2303903019u32.to_be_bytes());
    }
}
