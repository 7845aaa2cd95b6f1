mod buf;
mod buf_mut;
mod chunked;
mod decode;
mod encode;

pub mod pool;

pub use buf::BufExt;
pub use buf_mut::{BufMutExt, PgBufMutExt};
pub use chunked::ChunkedReader;
pub use decode::Decode;
pub use encode::Encode;
pub use pool::PoolBuf;

/// The maximum length, in bytes, of a message body. Also the largest body
/// length the backend will accept from us.
pub const MAX_MESSAGE_BODY: usize = (1 << 30) - 1;
