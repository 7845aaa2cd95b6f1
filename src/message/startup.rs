use crate::error::Error;
use crate::io::{BufMutExt, Encode, PgBufMutExt};
use crate::message::PROTOCOL_VERSION;

// To begin a session, a frontend opens a connection to the server
// and sends a startup message.

// The startup message has no type byte: its length prefix is followed by
// the requested protocol version and then `key\0value\0` pairs, terminated
// by one extra NUL.

#[derive(Debug)]
pub struct Startup<'a> {
    /// The database user name to connect as. Required; there is no default.
    pub username: Option<&'a str>,

    /// The target database. Defaults to the user name.
    pub database: Option<&'a str>,

    /// Additional run-time parameters to set at session start
    /// (`application_name`, `search_path`, ...); last writer wins.
    pub params: &'a [(&'a str, &'a str)],
}

impl Encode for Startup<'_> {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        buf.reserve(120);

        buf.put_length_prefixed(|buf| {
            buf.extend(&PROTOCOL_VERSION.to_be_bytes());

            if let Some(username) = self.username {
                encode_startup_param(buf, "user", username);
            }

            if let Some(database) = self.database {
                encode_startup_param(buf, "database", database);
            }

            for (name, value) in self.params {
                encode_startup_param(buf, name, value);
            }

            // a zero byte is required as a terminator
            // after the last name/value pair
            buf.push(0);

            Ok(())
        })
    }
}

fn encode_startup_param(buf: &mut Vec<u8>, name: &str, value: &str) {
    buf.put_str_nul(name);
    buf.put_str_nul(value);
}
