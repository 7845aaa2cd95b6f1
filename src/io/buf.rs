use bytes::{Buf, Bytes};
use memchr::memchr;

use crate::error::Error;

pub trait BufExt: Buf {
    // Read a nul-terminated byte sequence
    fn get_bytes_nul(&mut self) -> Result<Bytes, Error>;

    // Read a byte sequence of the given length
    fn get_bytes(&mut self, cnt: usize) -> Result<Bytes, Error>;

    // Read a nul-terminated string
    fn get_str_nul(&mut self) -> Result<String, Error>;

    // Read a string of the given length
    fn get_str(&mut self, cnt: usize) -> Result<String, Error>;
}

impl BufExt for Bytes {
    fn get_bytes_nul(&mut self) -> Result<Bytes, Error> {
        let nul =
            memchr(b'\0', self).ok_or_else(|| err_protocol!("expected NUL in byte sequence"))?;

        let v = self.slice(0..nul);

        self.advance(nul + 1);

        Ok(v)
    }

    fn get_bytes(&mut self, cnt: usize) -> Result<Bytes, Error> {
        if self.remaining() < cnt {
            return Err(err_protocol!(
                "expected {} bytes but only {} remain",
                cnt,
                self.remaining()
            ));
        }

        Ok(self.split_to(cnt))
    }

    fn get_str_nul(&mut self) -> Result<String, Error> {
        self.get_bytes_nul().and_then(|bytes| {
            String::from_utf8(bytes.to_vec())
                .map_err(|err| err_protocol!("{}", err))
        })
    }

    fn get_str(&mut self, cnt: usize) -> Result<String, Error> {
        let bytes = self.get_bytes(cnt)?;

        String::from_utf8(bytes.to_vec()).map_err(|err| err_protocol!("{}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::BufExt;
    use bytes::Bytes;

    #[test]
    fn it_gets_str_nul() {
        let mut buf = Bytes::from_static(b"hello\0world\0");

        assert_eq!(buf.get_str_nul().unwrap(), "hello");
        assert_eq!(buf.get_str_nul().unwrap(), "world");
        assert!(buf.get_str_nul().is_err());
    }

    #[test]
    fn it_rejects_short_reads() {
        let mut buf = Bytes::from_static(b"abc");

        assert!(buf.get_bytes(4).is_err());
    }
}
