use crate::error::Error;
use crate::io::MAX_MESSAGE_BODY;

pub trait BufMutExt {
    fn put_str_nul(&mut self, s: &str);
}

impl BufMutExt for Vec<u8> {
    fn put_str_nul(&mut self, s: &str) {
        self.extend_from_slice(s.as_bytes());
        self.push(0);
    }
}

pub trait PgBufMutExt {
    fn put_length_prefixed<F>(&mut self, f: F) -> Result<(), Error>
    where
        F: FnOnce(&mut Vec<u8>) -> Result<(), Error>;
}

impl PgBufMutExt for Vec<u8> {
    // Writes a length-prefixed message; this is used when encoding nearly
    // all messages as postgres wants us to send the length of the
    // often-variable-sized messages up front.
    fn put_length_prefixed<F>(&mut self, f: F) -> Result<(), Error>
    where
        F: FnOnce(&mut Vec<u8>) -> Result<(), Error>,
    {
        // reserve space to write the prefixed length
        let offset = self.len();
        self.extend_from_slice(&[0; 4]);

        // write the main body of the message
        let write_result = f(self);

        let result = write_result.and_then(|_| {
            // now calculate the size of what we wrote and set the length value
            let size = self.len() - offset;

            // the length prefix counts itself but not the type tag; the body
            // on top of the 4 prefix bytes must fit in the protocol limit
            if size - 4 > MAX_MESSAGE_BODY {
                return Err(err_protocol!(
                    "message body too large for the wire format: {} bytes",
                    size - 4
                ));
            }

            self[offset..(offset + 4)].copy_from_slice(&(size as i32).to_be_bytes());

            Ok(())
        });

        if result.is_err() {
            // undo the write so the buffer does not carry half a message
            self.truncate(offset);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::{BufMutExt, PgBufMutExt};

    #[test]
    fn it_patches_length_prefix() {
        let mut buf = Vec::new();
        buf.push(b'Q');

        buf.put_length_prefixed(|buf| {
            buf.put_str_nul("SELECT 1");
            Ok(())
        })
        .unwrap();

        assert_eq!(buf, b"Q\0\0\0\rSELECT 1\0");
    }

    #[test]
    fn it_truncates_on_inner_error() {
        let mut buf = vec![b'Q'];

        let res: Result<(), _> = buf.put_length_prefixed(|_| Err(err_protocol!("boom")));

        assert!(res.is_err());
        assert_eq!(buf, b"Q");
    }
}
