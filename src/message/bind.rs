use crate::error::Error;
use crate::io::{BufMutExt, Encode, PgBufMutExt};
use crate::types::PgFormat;

#[derive(Debug)]
pub struct Bind<'a> {
    /// The name of the destination portal (an empty string selects the
    /// unnamed portal).
    pub portal: &'a str,

    /// The name of the source prepared statement (an empty string selects
    /// the unnamed statement).
    pub statement: &'a str,

    /// The parameter format codes. Can be empty to indicate that all
    /// parameters use the default format (text); or one, in which case the
    /// specified format code is applied to all parameters; or it can equal
    /// the actual number of parameters.
    pub formats: &'a [PgFormat],

    /// The parameter values, already in their wire encoding. `None` is the
    /// SQL NULL.
    pub params: &'a [Option<&'a [u8]>],

    /// The result-column format codes, with the same zero/one/exact-count
    /// convention as `formats`.
    pub result_formats: &'a [PgFormat],
}

impl Encode for Bind<'_> {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        if self.params.len() > (i16::MAX as usize) {
            return Err(err_protocol!(
                "too many parameters to bind: {}",
                self.params.len()
            ));
        }

        buf.push(b'B');

        buf.put_length_prefixed(|buf| {
            buf.put_str_nul(self.portal);
            buf.put_str_nul(self.statement);

            buf.extend(&(self.formats.len() as i16).to_be_bytes());

            for &format in self.formats {
                buf.extend(&(format as i16).to_be_bytes());
            }

            buf.extend(&(self.params.len() as i16).to_be_bytes());

            for param in self.params {
                match param {
                    // As a special case, -1 indicates a NULL parameter
                    // value; no value bytes follow.
                    None => buf.extend(&(-1_i32).to_be_bytes()),

                    Some(value) => {
                        buf.extend(&(value.len() as i32).to_be_bytes());
                        buf.extend_from_slice(value);
                    }
                }
            }

            buf.extend(&(self.result_formats.len() as i16).to_be_bytes());

            for &format in self.result_formats {
                buf.extend(&(format as i16).to_be_bytes());
            }

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Bind;
    use crate::io::Encode;
    use crate::types::PgFormat;

    #[test]
    fn it_encodes_bind() {
        let mut buf = Vec::new();
        let m = Bind {
            portal: "",
            statement: "ps1",
            formats: &[PgFormat::Text],
            params: &[Some(b"hi"), None],
            result_formats: &[],
        };

        m.encode(&mut buf).unwrap();

        assert_eq!(
            buf,
            b"B\0\0\0\x1b\0ps1\0\0\x01\0\0\0\x02\0\0\0\x02hi\xff\xff\xff\xff\0\0"
        );
    }
}
