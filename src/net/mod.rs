//! The transport layer: socket connectors, the optional TLS wrapper, and
//! the non-blocking connection that the protocol driver sits on.

mod bg_reader;
mod nb_stream;
mod socket;
mod tls;

pub use bg_reader::BgStatus;
pub use nb_stream::{Deadline, DeadlineHandle, NbStream};
pub use socket::{connect_tcp, connect_uds, Stream};
pub use tls::MaybeTlsStream;

/// The socket type the connection state machine drives: any byte stream,
/// possibly upgraded to TLS.
pub type PgSocket = MaybeTlsStream<Box<dyn Stream>>;
