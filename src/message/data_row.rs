use std::ops::Range;

use bytes::{Buf, Bytes};

use crate::error::Error;
use crate::io::Decode;

/// One row of a result set.
///
/// Decoding records the extent of each value in the shared body buffer
/// rather than copying them out; `get` borrows directly from the wire
/// bytes.
#[derive(Debug)]
pub struct DataRow {
    storage: Bytes,
    values: Vec<Option<Range<usize>>>,
}

impl DataRow {
    /// The number of values in the row.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The raw value at `index`; `None` is the SQL NULL. Out-of-range
    /// indexes are also `None`.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&[u8]> {
        let range = self.values.get(index)?.as_ref()?;

        Some(&self.storage[range.clone()])
    }
}

impl Decode for DataRow {
    fn decode(buf: Bytes) -> Result<Self, Error> {
        let mut cursor = buf.clone();

        if cursor.remaining() < 2 {
            return Err(err_protocol!("DataRow body too short"));
        }

        let cnt = cursor.get_u16() as usize;
        let mut values = Vec::with_capacity(cnt);

        // offsets are into the whole body, past the 2-byte column count
        let mut offset = 2_usize;

        for _ in 0..cnt {
            if cursor.remaining() < 4 {
                return Err(err_protocol!("DataRow truncated at value length"));
            }

            // The length of the column value (not including itself); -1 is
            // the SQL NULL and carries no value bytes.
            let size = cursor.get_i32();
            offset += 4;

            if size == -1 {
                values.push(None);
            } else {
                let size = size as usize;

                if cursor.remaining() < size {
                    return Err(err_protocol!("DataRow truncated inside a value"));
                }

                values.push(Some(offset..(offset + size)));
                cursor.advance(size);
                offset += size;
            }
        }

        Ok(Self {
            storage: buf,
            values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::DataRow;
    use crate::io::Decode;
    use bytes::Bytes;

    const DATA: &[u8] = b"\x00\x03\x00\x00\x00\x011\x00\x00\x00\x012\xff\xff\xff\xff";

    #[test]
    fn it_decodes_data_row() {
        let row = DataRow::decode(Bytes::from_static(DATA)).unwrap();

        assert_eq!(row.len(), 3);
        assert_eq!(row.get(0), Some(&b"1"[..]));
        assert_eq!(row.get(1), Some(&b"2"[..]));
        assert_eq!(row.get(2), None);
        assert_eq!(row.get(3), None);
    }

    #[test]
    fn it_rejects_truncated_rows() {
        let data = b"\x00\x02\x00\x00\x00\x05ab";

        assert!(DataRow::decode(Bytes::copy_from_slice(data)).is_err());
    }
}
