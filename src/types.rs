use std::fmt::{self, Display, Formatter};

/// The PostgreSQL object identifier of a type, table, or other catalog
/// object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Oid(pub u32);

impl Display for Oid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for Oid {
    fn from(oid: u32) -> Self {
        Oid(oid)
    }
}

/// The format of a parameter or result value on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum PgFormat {
    Text = 0,
    Binary = 1,
}

impl PgFormat {
    pub(crate) fn try_from_i16(value: i16) -> Result<Self, crate::error::Error> {
        match value {
            0 => Ok(PgFormat::Text),
            1 => Ok(PgFormat::Binary),

            _ => Err(err_protocol!("unknown format code: {}", value)),
        }
    }
}
