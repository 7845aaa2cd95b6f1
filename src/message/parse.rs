use crate::error::Error;
use crate::io::{BufMutExt, Encode, PgBufMutExt};
use crate::types::Oid;

#[derive(Debug)]
pub struct Parse<'a> {
    /// The name of the destination prepared statement (an empty string
    /// selects the unnamed statement, which the server replaces on each
    /// parse).
    pub statement: &'a str,

    /// The query string to be parsed.
    pub query: &'a str,

    /// The parameter data types specified (can be empty). This is not an
    /// indication of the number of parameters that might appear in the
    /// query string, only the number the frontend wants to pre-specify
    /// types for.
    pub param_types: &'a [Oid],
}

impl Encode for Parse<'_> {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        if self.param_types.len() > (i16::MAX as usize) {
            return Err(err_protocol!(
                "too many parameter types: {}",
                self.param_types.len()
            ));
        }

        buf.push(b'P');

        buf.put_length_prefixed(|buf| {
            buf.put_str_nul(self.statement);
            buf.put_str_nul(self.query);

            buf.extend(&(self.param_types.len() as i16).to_be_bytes());

            for ty in self.param_types {
                buf.extend(&ty.0.to_be_bytes());
            }

            Ok(())
        })
    }
}
