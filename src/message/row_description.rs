use bytes::{Buf, Bytes};

use crate::error::Error;
use crate::io::{BufExt, Decode};
use crate::statement::FieldDescription;
use crate::types::Oid;

/// Describes the shape of the rows about to be returned: one
/// [`FieldDescription`] per column.
#[derive(Debug)]
pub struct RowDescription {
    pub fields: Vec<FieldDescription>,
}

impl Decode for RowDescription {
    fn decode(mut buf: Bytes) -> Result<Self, Error> {
        if buf.remaining() < 2 {
            return Err(err_protocol!("RowDescription body too short"));
        }

        let cnt = buf.get_u16() as usize;
        let mut fields = Vec::with_capacity(cnt);

        for _ in 0..cnt {
            let name = buf.get_str_nul()?;

            if buf.remaining() < 18 {
                return Err(err_protocol!("RowDescription truncated inside a field"));
            }

            fields.push(FieldDescription {
                name,
                table_oid: buf.get_u32(),
                column_attr: buf.get_u16(),
                type_oid: Oid(buf.get_u32()),
                type_size: buf.get_i16(),
                type_modifier: buf.get_i32(),
                format: buf.get_i16(),
            });
        }

        Ok(Self { fields })
    }
}

#[cfg(test)]
mod tests {
    use super::RowDescription;
    use crate::io::Decode;
    use crate::types::Oid;
    use bytes::Bytes;

    #[test]
    fn it_decodes_row_description() {
        #[rustfmt::skip]
        let data: &[u8] = &[
            0, 2, // count

            b'u', b's', b'e', b'r', b'_', b'i', b'd', 0, // name
            0, 0, 0, 0,    // table_oid
            0, 0,          // column_attr
            0, 0, 0, 0x17, // type_oid (int4)
            0, 4,          // type_size
            0xff, 0xff, 0xff, 0xff, // type_modifier (-1)
            0, 0,          // format

            b'n', b'a', b'm', b'e', 0,
            0, 0, 0, 0,
            0, 0,
            0, 0, 0, 0x19, // type_oid (text)
            0xff, 0xff,    // type_size (-1)
            0xff, 0xff, 0xff, 0xff,
            0, 0,
        ];

        let m = RowDescription::decode(Bytes::copy_from_slice(data)).unwrap();

        assert_eq!(m.fields.len(), 2);
        assert_eq!(m.fields[0].name, "user_id");
        assert_eq!(m.fields[0].type_oid, Oid(23));
        assert_eq!(m.fields[0].type_size, 4);
        assert_eq!(m.fields[1].name, "name");
        assert_eq!(m.fields[1].type_oid, Oid(25));
        assert_eq!(m.fields[1].type_modifier, -1);
    }

    #[test]
    fn it_decodes_empty_row_description() {
        let m = RowDescription::decode(Bytes::from_static(b"\x00\x00")).unwrap();

        assert!(m.fields.is_empty());
    }
}
