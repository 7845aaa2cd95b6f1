use bytes::{Buf, Bytes};

use crate::error::Error;
use crate::io::Decode;
use crate::types::Oid;

/// Describes the parameters needed by a prepared statement.
#[derive(Debug)]
pub struct ParameterDescription {
    pub types: Vec<Oid>,
}

impl Decode for ParameterDescription {
    fn decode(mut buf: Bytes) -> Result<Self, Error> {
        if buf.remaining() < 2 {
            return Err(err_protocol!("ParameterDescription body too short"));
        }

        let cnt = buf.get_u16() as usize;

        if buf.remaining() < cnt * 4 {
            return Err(err_protocol!(
                "ParameterDescription advertises {} parameters but carries {} bytes",
                cnt,
                buf.remaining()
            ));
        }

        let mut types = Vec::with_capacity(cnt);
        for _ in 0..cnt {
            types.push(Oid(buf.get_u32()));
        }

        Ok(Self { types })
    }
}

#[cfg(test)]
mod tests {
    use super::ParameterDescription;
    use crate::io::Decode;
    use crate::types::Oid;
    use bytes::Bytes;

    #[test]
    fn it_decodes_parameter_description() {
        let m =
            ParameterDescription::decode(Bytes::from_static(b"\x00\x02\x00\x00\x00\x19\x00\x00\x00\x17"))
                .unwrap();

        assert_eq!(m.types, [Oid(25), Oid(23)]);
    }

    #[test]
    fn it_decodes_empty_parameter_description() {
        let m = ParameterDescription::decode(Bytes::from_static(b"\x00\x00")).unwrap();

        assert!(m.types.is_empty());
    }
}
