use bytes::Bytes;

use crate::error::Error;
use crate::io::{BufExt, Decode};

/// Reports the current setting of a backend parameter the server considers
/// interesting to clients (`server_version`, `client_encoding`, ...). Sent
/// during startup and again whenever a setting changes.
#[derive(Debug)]
pub struct ParameterStatus {
    pub name: String,
    pub value: String,
}

impl Decode for ParameterStatus {
    fn decode(mut buf: Bytes) -> Result<Self, Error> {
        let name = buf.get_str_nul()?;
        let value = buf.get_str_nul()?;

        Ok(Self { name, value })
    }
}
