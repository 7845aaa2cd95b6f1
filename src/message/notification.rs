use bytes::{Buf, Bytes};

use crate::error::Error;
use crate::io::{BufExt, Decode};

/// An asynchronous `NOTIFY` delivered by the server.
///
/// Decoding copies the channel and payload out of the receive buffer, so a
/// notification may be queued and handed to the application at any later
/// point.
#[derive(Debug, Clone)]
pub struct Notification {
    /// The process ID of the notifying backend.
    pub process_id: u32,

    /// The name of the channel the notify was sent on.
    pub channel: String,

    /// The "payload" string passed from the notifying process.
    pub payload: String,
}

impl Decode for Notification {
    fn decode(mut buf: Bytes) -> Result<Self, Error> {
        if buf.remaining() < 4 {
            return Err(err_protocol!("NotificationResponse body too short"));
        }

        let process_id = buf.get_u32();
        let channel = buf.get_str_nul()?;
        let payload = buf.get_str_nul()?;

        Ok(Self {
            process_id,
            channel,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Notification;
    use crate::io::Decode;
    use bytes::Bytes;

    const NOTIFICATION_RESPONSE: &[u8] = b"\x34\x20\x10\x02TEST-CHANNEL\0THIS IS A TEST\0";

    #[test]
    fn it_decodes_notification_response() {
        let m = Notification::decode(Bytes::from_static(NOTIFICATION_RESPONSE)).unwrap();

        assert_eq!(m.process_id, 0x34201002);
        assert_eq!(m.channel, "TEST-CHANNEL");
        assert_eq!(m.payload, "THIS IS A TEST");
    }
}
