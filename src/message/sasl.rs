use crate::error::Error;
use crate::io::{BufMutExt, Encode, PgBufMutExt};

/// Begin a SASL negotiation: the selected mechanism and, optionally, the
/// mechanism's initial response.
#[derive(Debug)]
pub struct SaslInitialResponse<'a> {
    pub mechanism: &'a str,
    pub data: &'a [u8],
}

impl Encode for SaslInitialResponse<'_> {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        buf.push(b'p');

        buf.put_length_prefixed(|buf| {
            buf.put_str_nul(self.mechanism);

            buf.extend(&(self.data.len() as i32).to_be_bytes());
            buf.extend_from_slice(self.data);

            Ok(())
        })
    }
}

/// A continuation message in an ongoing SASL exchange.
#[derive(Debug)]
pub struct SaslResponse<'a>(pub &'a [u8]);

impl Encode for SaslResponse<'_> {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        buf.push(b'p');

        buf.put_length_prefixed(|buf| {
            buf.extend_from_slice(self.0);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{SaslInitialResponse, SaslResponse};
    use crate::io::Encode;

    #[test]
    fn it_encodes_sasl_initial_response() {
        let mut buf = Vec::new();

        SaslInitialResponse {
            mechanism: "SCRAM-SHA-256",
            data: b"n,,n=,r=abc",
        }
        .encode(&mut buf)
        .unwrap();

        assert_eq!(&buf, b"p\0\0\0\x21SCRAM-SHA-256\0\0\0\0\x0bn,,n=,r=abc");
    }

    #[test]
    fn it_encodes_sasl_response() {
        let mut buf = Vec::new();

        SaslResponse(b"c=biws,r=abc,p=dGhl").encode(&mut buf).unwrap();

        assert_eq!(&buf, b"p\0\0\0\x17c=biws,r=abc,p=dGhl");
    }
}
