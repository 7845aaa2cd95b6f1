use bytes::Bytes;

use crate::error::Error;
use crate::io::Decode;

/// The transaction status reported with every `ReadyForQuery`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum TransactionStatus {
    /// Not in a transaction block.
    Idle = b'I',

    /// In a transaction block.
    Transaction = b'T',

    /// In a _failed_ transaction block. Queries will be rejected until the
    /// block is ended.
    Error = b'E',
}

/// `ReadyForQuery` is sent whenever the backend is ready for a new query
/// cycle. It is the resynchronization fence: after any error, discarding
/// until this message puts the protocol back in a known state.
#[derive(Debug)]
pub struct ReadyForQuery {
    pub transaction_status: TransactionStatus,
}

impl Decode for ReadyForQuery {
    fn decode(buf: Bytes) -> Result<Self, Error> {
        let status = match buf.first() {
            Some(b'I') => TransactionStatus::Idle,
            Some(b'T') => TransactionStatus::Transaction,
            Some(b'E') => TransactionStatus::Error,

            other => {
                return Err(err_protocol!(
                    "unknown transaction status: {:?}",
                    other.map(|&b| b as char)
                ));
            }
        };

        Ok(Self {
            transaction_status: status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{ReadyForQuery, TransactionStatus};
    use crate::io::Decode;
    use bytes::Bytes;

    #[test]
    fn it_decodes_ready_for_query() {
        let m = ReadyForQuery::decode(Bytes::from_static(b"E")).unwrap();

        assert_eq!(m.transaction_status, TransactionStatus::Error);
    }

    #[test]
    fn it_rejects_unknown_status() {
        assert!(ReadyForQuery::decode(Bytes::from_static(b"X")).is_err());
    }
}
