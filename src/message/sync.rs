use crate::error::Error;
use crate::io::Encode;

// The universal resynchronization point of the extended protocol: the
// backend answers every Sync with ReadyForQuery, even if the sequence in
// front of it failed part-way.

#[derive(Debug)]
pub struct Sync;

impl Encode for Sync {
    #[inline]
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        buf.push(b'S');
        buf.extend(&4_i32.to_be_bytes());

        Ok(())
    }
}
