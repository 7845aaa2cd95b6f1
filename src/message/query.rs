use crate::error::Error;
use crate::io::{BufMutExt, Encode, PgBufMutExt};

/// A simple-protocol query: one or more SQL statements separated by
/// semicolons, executed as a single implicit transaction unless the text
/// contains explicit transaction commands.
#[derive(Debug)]
pub struct Query<'a>(pub &'a str);

impl Encode for Query<'_> {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        buf.reserve(self.0.len() + 6);
        buf.push(b'Q');

        buf.put_length_prefixed(|buf| {
            buf.put_str_nul(self.0);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Query;
    use crate::io::Encode;

    #[test]
    fn it_encodes_query() {
        let mut buf = Vec::new();

        Query("SELECT 1").encode(&mut buf).unwrap();

        assert_eq!(buf, b"Q\0\0\0\rSELECT 1\0");
    }
}
