use bytes::Bytes;
use memchr::memrchr;

use crate::error::Error;
use crate::io::{BufExt, Decode};

/// A SQL command completed normally.
#[derive(Debug)]
pub struct CommandComplete {
    /// The command tag, e.g. `SELECT 5` or `CREATE TABLE`.
    tag: Bytes,
}

impl Decode for CommandComplete {
    fn decode(mut buf: Bytes) -> Result<Self, Error> {
        // The tag is the whole body, NUL-terminated.
        Ok(CommandComplete {
            tag: buf.get_bytes_nul()?,
        })
    }
}

impl CommandComplete {
    /// The command tag as text.
    pub fn tag(&self) -> &str {
        std::str::from_utf8(&self.tag).unwrap_or("")
    }

    /// The number of rows affected, parsed from the last word of the tag.
    ///
    /// Tags without a trailing count (`CREATE TABLE`, `BEGIN`, ...) report
    /// zero.
    pub fn rows_affected(&self) -> u64 {
        let word = match memrchr(b' ', &self.tag) {
            Some(i) => &self.tag[(i + 1)..],
            None => return 0,
        };

        atoi::atoi(word).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::CommandComplete;
    use crate::io::Decode;
    use bytes::Bytes;

    #[test]
    fn it_decodes_insert() {
        let m = CommandComplete::decode(Bytes::from_static(b"INSERT 0 1\0")).unwrap();

        assert_eq!(m.tag(), "INSERT 0 1");
        assert_eq!(m.rows_affected(), 1);
    }

    #[test]
    fn it_decodes_update() {
        let m = CommandComplete::decode(Bytes::from_static(b"UPDATE 512\0")).unwrap();

        assert_eq!(m.rows_affected(), 512);
    }

    #[test]
    fn it_decodes_begin() {
        let m = CommandComplete::decode(Bytes::from_static(b"BEGIN\0")).unwrap();

        assert_eq!(m.rows_affected(), 0);
    }

    #[test]
    fn it_decodes_create_table() {
        let m = CommandComplete::decode(Bytes::from_static(b"CREATE TABLE\0")).unwrap();

        assert_eq!(m.rows_affected(), 0);
    }
}
