//! pglink is a low-level, asynchronous PostgreSQL connection library.
//!
//! It speaks the v3 frontend/backend wire protocol over TCP or Unix-domain
//! sockets, optionally wrapped in TLS, and exposes the protocol directly:
//! parameters and result values are raw bytes in the text or binary format
//! the server uses on the wire. Query building, placeholder rewriting,
//! per-type value codecs, and connection pooling are all left to layers
//! above this crate.
//!
//! The core pieces:
//!
//!  * [`message`]: typed encoders and decoders for every protocol message
//!  * [`net`]: the non-blocking connection wrapper that buffers writes and
//!    opportunistically drains reads so a saturated send buffer can never
//!    deadlock against a peer doing the same
//!  * [`PgConnection`]: the session handle for startup and authentication,
//!    simple and extended queries, COPY, cancellation, notifications
//!  * [`StatementCache`]: a prepared-statement LRU that tolerates
//!    server-side plan invalidation
//!
//! ```no_run
//! # async fn example() -> Result<(), pglink::Error> {
//! use pglink::PgConnection;
//!
//! let mut conn = PgConnection::connect("postgres://postgres@localhost/postgres").await?;
//!
//! let result = conn.exec("select 'Hello, world'").await?.read_all().await?;
//! assert_eq!(result[0].rows[0].get(0), Some(&b"Hello, world"[..]));
//!
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

#[macro_use]
pub mod error;

pub mod io;
pub mod message;
pub mod net;
pub mod options;
pub mod trace;

mod cache;
mod connection;
mod statement;
mod types;

pub use cache::{CacheMode, StatementCache};
pub use connection::{
    PgCancelToken, PgConnection, PgMultiResult, PgParams, PgQueryResult, PgResultReader, PgRow,
    WatchToken,
};
pub use error::{Error, PgDatabaseError, Result};
pub use message::{Notice, Notification, PgSeverity, TransactionStatus};
pub use options::{PgConnectOptions, PgSslMode};
pub use statement::{FieldDescription, StatementDescription};
pub use types::{Oid, PgFormat};
