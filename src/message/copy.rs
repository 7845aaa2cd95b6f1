use bytes::{Buf, Bytes};

use crate::error::Error;
use crate::io::{BufMutExt, Decode, Encode, PgBufMutExt};
use crate::types::PgFormat;

/// A chunk of COPY data, flowing in either direction.
///
/// The payload is an arbitrary slice of the data stream; message boundaries
/// carry no meaning (rows may span messages).
#[derive(Debug)]
pub struct CopyData<'a>(pub &'a [u8]);

impl Encode for CopyData<'_> {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        buf.push(b'd');

        buf.put_length_prefixed(|buf| {
            buf.extend_from_slice(self.0);
            Ok(())
        })
    }
}

/// Sent (or received) when a COPY data stream ends normally.
#[derive(Debug)]
pub struct CopyDone;

impl Encode for CopyDone {
    #[inline]
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        buf.push(b'c');
        buf.extend(&4_i32.to_be_bytes());

        Ok(())
    }
}

/// Abort a `COPY FROM STDIN` with an error message; the server responds
/// with an `ErrorResponse` attributed to the COPY command.
#[derive(Debug)]
pub struct CopyFail<'a> {
    pub message: &'a str,
}

impl Encode for CopyFail<'_> {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        buf.push(b'f');

        buf.put_length_prefixed(|buf| {
            buf.put_str_nul(self.message);
            Ok(())
        })
    }
}

/// Body of `CopyInResponse`, `CopyOutResponse`, and `CopyBothResponse`:
/// the overall data format and the per-column format codes.
#[derive(Debug)]
pub struct CopyResponse {
    pub format: PgFormat,
    pub column_formats: Vec<PgFormat>,
}

impl Decode for CopyResponse {
    fn decode(mut buf: Bytes) -> Result<Self, Error> {
        if buf.remaining() < 3 {
            return Err(err_protocol!("CopyResponse body too short"));
        }

        let format = PgFormat::try_from_i16(buf.get_i8() as i16)?;
        let columns = buf.get_u16() as usize;

        if buf.remaining() < columns * 2 {
            return Err(err_protocol!(
                "CopyResponse advertises {} columns but carries {} bytes",
                columns,
                buf.remaining()
            ));
        }

        let mut column_formats = Vec::with_capacity(columns);
        for _ in 0..columns {
            column_formats.push(PgFormat::try_from_i16(buf.get_i16())?);
        }

        Ok(CopyResponse {
            format,
            column_formats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{CopyData, CopyDone, CopyFail, CopyResponse};
    use crate::io::{Decode, Encode};
    use crate::types::PgFormat;
    use bytes::Bytes;

    #[test]
    fn it_encodes_copy_data() {
        let mut buf = Vec::new();

        CopyData(b"0,foo\n").encode(&mut buf).unwrap();

        assert_eq!(buf, b"d\0\0\0\x0a0,foo\n");
    }

    #[test]
    fn it_encodes_copy_done() {
        let mut buf = Vec::new();

        CopyDone.encode(&mut buf).unwrap();

        assert_eq!(buf, b"c\0\0\0\x04");
    }

    #[test]
    fn it_encodes_copy_fail() {
        let mut buf = Vec::new();

        CopyFail { message: "broken" }.encode(&mut buf).unwrap();

        assert_eq!(buf, b"f\0\0\0\x0bbroken\0");
    }

    #[test]
    fn it_decodes_copy_response() {
        let m = CopyResponse::decode(Bytes::from_static(b"\0\0\x02\0\0\0\0")).unwrap();

        assert_eq!(m.format, PgFormat::Text);
        assert_eq!(m.column_formats, [PgFormat::Text, PgFormat::Text]);
    }
}
