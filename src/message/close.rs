use crate::error::Error;
use crate::io::{BufMutExt, Encode, PgBufMutExt};

const CLOSE_PORTAL: u8 = b'P';
const CLOSE_STATEMENT: u8 = b'S';

/// Ask the server to release a named prepared statement or portal.
///
/// `CloseComplete` acknowledges; the exchange still needs a `Sync` (or
/// `Flush`) to force a response.
#[derive(Debug)]
pub enum Close<'a> {
    Statement(&'a str),
    Portal(&'a str),
}

impl Encode for Close<'_> {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        buf.reserve(20);
        buf.push(b'C');

        buf.put_length_prefixed(|buf| {
            match self {
                Close::Statement(name) => {
                    buf.push(CLOSE_STATEMENT);
                    buf.put_str_nul(name);
                }

                Close::Portal(name) => {
                    buf.push(CLOSE_PORTAL);
                    buf.put_str_nul(name);
                }
            }

            Ok(())
        })
    }
}
