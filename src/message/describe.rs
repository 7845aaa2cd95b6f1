use crate::error::Error;
use crate::io::{BufMutExt, Encode, PgBufMutExt};

const DESCRIBE_PORTAL: u8 = b'P';
const DESCRIBE_STATEMENT: u8 = b'S';

/// Ask the server to describe a prepared statement (parameter types plus
/// row shape) or a portal (row shape only).
#[derive(Debug)]
pub enum Describe<'a> {
    Statement(&'a str),
    Portal(&'a str),
}

impl Encode for Describe<'_> {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        buf.reserve(20);
        buf.push(b'D');

        buf.put_length_prefixed(|buf| {
            match self {
                Describe::Statement(name) => {
                    buf.push(DESCRIBE_STATEMENT);
                    buf.put_str_nul(name);
                }

                Describe::Portal(name) => {
                    buf.push(DESCRIBE_PORTAL);
                    buf.put_str_nul(name);
                }
            }

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Describe;
    use crate::io::Encode;

    #[test]
    fn it_encodes_describe_statement() {
        let mut buf = Vec::new();

        Describe::Statement("ps1").encode(&mut buf).unwrap();

        assert_eq!(buf, b"D\0\0\0\x09Sps1\0");
    }

    #[test]
    fn it_encodes_describe_unnamed_portal() {
        let mut buf = Vec::new();

        Describe::Portal("").encode(&mut buf).unwrap();

        assert_eq!(buf, b"D\0\0\0\x06P\0");
    }
}
