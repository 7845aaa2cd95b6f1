use crate::error::Error;
use crate::io::Encode;

#[derive(Debug)]
pub struct Terminate;

impl Encode for Terminate {
    #[inline]
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        buf.push(b'X');
        buf.extend(&4_i32.to_be_bytes());

        Ok(())
    }
}
