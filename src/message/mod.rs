//! Typed encoders and decoders for the v3 frontend/backend protocol.
//!
//! Every non-startup message on the wire is `[type: u8][length: i32
//! including itself][body]`, integers big-endian. The startup family
//! (`Startup`, `SslRequest`, `GssEncRequest`, `CancelRequest`) carries no
//! type byte and is identified by a 4-byte request code instead.
//!
//! <https://www.postgresql.org/docs/current/protocol-message-formats.html>

use bytes::Bytes;

use crate::error::Error;
use crate::io::Decode;

mod authentication;
mod backend_key_data;
mod bind;
mod cancel_request;
mod close;
mod command_complete;
mod copy;
mod data_row;
mod describe;
mod execute;
mod flush;
mod negotiate_protocol_version;
mod notification;
mod parameter_description;
mod parameter_status;
mod parse;
mod password;
mod query;
mod ready_for_query;
mod response;
mod row_description;
mod sasl;
mod ssl_request;
mod startup;
mod sync;
mod terminate;

pub use authentication::{Authentication, AuthenticationMd5Password, AuthenticationSasl};
pub use backend_key_data::BackendKeyData;
pub use bind::Bind;
pub use cancel_request::CancelRequest;
pub use close::Close;
pub use command_complete::CommandComplete;
pub use copy::{CopyData, CopyDone, CopyFail, CopyResponse};
pub use data_row::DataRow;
pub use describe::Describe;
pub use execute::Execute;
pub use flush::Flush;
pub use negotiate_protocol_version::NegotiateProtocolVersion;
pub use notification::Notification;
pub use parameter_description::ParameterDescription;
pub use parameter_status::ParameterStatus;
pub use parse::Parse;
pub use password::Password;
pub use query::Query;
pub use ready_for_query::{ReadyForQuery, TransactionStatus};
pub use response::{Notice, PgSeverity};
pub use row_description::RowDescription;
pub use sasl::{SaslInitialResponse, SaslResponse};
pub use ssl_request::{GssEncRequest, SslRequest};
pub use startup::Startup;
pub use sync::Sync;
pub use terminate::Terminate;

/// The protocol version this crate speaks: 3.0.
pub const PROTOCOL_VERSION: u32 = 196608; // 3 << 16

pub(crate) const SSL_REQUEST_CODE: u32 = 80877103;
pub(crate) const CANCEL_REQUEST_CODE: u32 = 80877102;
pub(crate) const GSS_ENC_REQUEST_CODE: u32 = 80877104;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MessageFormat {
    Authentication,
    BackendKeyData,
    BindComplete,
    CloseComplete,
    CommandComplete,
    CopyBothResponse,
    CopyData,
    CopyDone,
    CopyInResponse,
    CopyOutResponse,
    DataRow,
    EmptyQueryResponse,
    ErrorResponse,
    NegotiateProtocolVersion,
    NoData,
    NoticeResponse,
    NotificationResponse,
    ParameterDescription,
    ParameterStatus,
    ParseComplete,
    PortalSuspended,
    ReadyForQuery,
    RowDescription,
}

impl MessageFormat {
    pub fn try_from_u8(v: u8) -> Result<Self, Error> {
        Ok(match v {
            b'1' => MessageFormat::ParseComplete,
            b'2' => MessageFormat::BindComplete,
            b'3' => MessageFormat::CloseComplete,
            b'A' => MessageFormat::NotificationResponse,
            b'C' => MessageFormat::CommandComplete,
            b'D' => MessageFormat::DataRow,
            b'E' => MessageFormat::ErrorResponse,
            b'G' => MessageFormat::CopyInResponse,
            b'H' => MessageFormat::CopyOutResponse,
            b'I' => MessageFormat::EmptyQueryResponse,
            b'K' => MessageFormat::BackendKeyData,
            b'N' => MessageFormat::NoticeResponse,
            b'R' => MessageFormat::Authentication,
            b'S' => MessageFormat::ParameterStatus,
            b'T' => MessageFormat::RowDescription,
            b'W' => MessageFormat::CopyBothResponse,
            b'Z' => MessageFormat::ReadyForQuery,
            b'c' => MessageFormat::CopyDone,
            b'd' => MessageFormat::CopyData,
            b'n' => MessageFormat::NoData,
            b's' => MessageFormat::PortalSuspended,
            b't' => MessageFormat::ParameterDescription,
            b'v' => MessageFormat::NegotiateProtocolVersion,

            _ => {
                return Err(err_protocol!(
                    "unknown message type: {:?}",
                    v as char
                ))
            }
        })
    }
}

/// A framed backend message: the type byte, already mapped, and the body.
///
/// `contents` is a refcounted slice of the receive buffer; it is cheap to
/// hold but anything decoded out of it that should outlive the next receive
/// must be copied by the decoder.
#[derive(Debug)]
pub struct Message {
    pub format: MessageFormat,
    pub contents: Bytes,
}

impl Message {
    #[inline]
    pub fn decode<T>(self) -> Result<T, Error>
    where
        T: Decode,
    {
        T::decode(self.contents)
    }
}
