use crate::error::Error;
use crate::io::{BufMutExt, Encode, PgBufMutExt};

#[derive(Debug)]
pub struct Execute<'a> {
    /// The name of the portal to execute (an empty string selects the
    /// unnamed portal).
    pub portal: &'a str,

    /// Maximum number of rows to return, if the portal contains a query
    /// that returns rows. Zero denotes "no limit".
    pub limit: u32,
}

impl Encode for Execute<'_> {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        buf.reserve(20);
        buf.push(b'E');

        buf.put_length_prefixed(|buf| {
            buf.put_str_nul(self.portal);
            buf.extend(&self.limit.to_be_bytes());

            Ok(())
        })
    }
}
