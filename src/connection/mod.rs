use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

use crate::cache::{CacheMode, StatementCache};
use crate::error::Error;
use crate::message::{MessageFormat, Notice, Notification, Query, ReadyForQuery, TransactionStatus};
use crate::net::Stream;
use crate::options::PgConnectOptions;
use crate::trace::{TraceConfig, Tracer};

mod cancel;
mod copy;
mod establish;
mod executor;
mod sasl;
mod tls;
mod watcher;

pub(crate) mod stream;

pub use cancel::PgCancelToken;
pub use executor::{PgMultiResult, PgParams, PgQueryResult, PgResultReader, PgRow};
pub use watcher::WatchToken;

use crate::io::Decode;
use stream::PgStream;

// Seeds statement-name generation; every connection takes a distinct seed,
// so generated names can never collide across connections that end up
// talking to the same server.
static NEXT_STATEMENT_SEED: AtomicU64 = AtomicU64::new(1);

/// A single PostgreSQL session.
///
/// Startup and authentication happen in [`connect`]; the returned value is
/// always a live, authenticated session. A connection is **not** safe for
/// concurrent use: one task drives it at a time, and the only helpers it
/// spawns internally (the cancellation watcher) interact with it strictly
/// through the stream's deadline handle.
///
/// Transport and protocol errors are fatal: once one is returned, every
/// subsequent operation fails with [`Error::Closed`]. Server errors leave
/// the session usable; the protocol resynchronizes on the next
/// `ReadyForQuery`.
///
/// [`connect`]: Self::connect
pub struct PgConnection {
    pub(crate) stream: PgStream,

    // dial information, kept for cancel requests; absent when the
    // connection was built over a caller-provided stream
    options: Option<PgConnectOptions>,

    // process id and secret key of this backend, used for cancel requests
    process_id: u32,
    secret_key: Bytes,

    pub(crate) transaction_status: TransactionStatus,

    // number of ReadyForQuery messages that we are currently expecting;
    // abandoned operations leave their terminator behind and the next
    // operation drains to it before starting
    pub(crate) pending_ready_for_query_count: usize,

    pub(crate) cache: StatementCache,
    cache_mode: CacheMode,

    stmt_seed: u64,
    stmt_counter: u64,

    broken: bool,

    watcher: Option<watcher::WatchGuard>,
}

impl PgConnection {
    /// Open a connection described by a `postgres://` connection URI.
    pub async fn connect(url: &str) -> Result<Self, Error> {
        Self::connect_with(&url.parse()?).await
    }

    /// Open a connection with explicit options.
    pub async fn connect_with(options: &PgConnectOptions) -> Result<Self, Error> {
        establish::establish(options).await
    }

    /// Perform startup and authentication over an already-connected byte
    /// stream (an in-memory pipe, a tunneled socket, ...). TLS negotiation
    /// is skipped; host-dependent behavior (Unix socket detection, cancel
    /// dialing) is unavailable.
    pub async fn connect_with_stream(
        stream: impl Stream,
        options: &PgConnectOptions,
    ) -> Result<Self, Error> {
        establish::establish_over(stream, options).await
    }

    pub(super) fn assemble(
        stream: PgStream,
        options: Option<PgConnectOptions>,
        process_id: u32,
        secret_key: Bytes,
        transaction_status: TransactionStatus,
    ) -> Self {
        let (cache_capacity, cache_mode) = match &options {
            Some(options) => (
                options.statement_cache_capacity,
                options.statement_cache_mode,
            ),
            None => (100, CacheMode::Prepare),
        };

        PgConnection {
            stream,
            options,
            process_id,
            secret_key,
            transaction_status,
            pending_ready_for_query_count: 0,
            cache: StatementCache::new(cache_capacity),
            cache_mode,
            stmt_seed: NEXT_STATEMENT_SEED.fetch_add(1, Ordering::Relaxed),
            stmt_counter: 0,
            broken: false,
            watcher: None,
        }
    }

    /// The transaction status reported by the most recent `ReadyForQuery`.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// The process ID of the backend serving this session.
    pub fn server_process_id(&self) -> u32 {
        self.process_id
    }

    /// The current value of a runtime parameter reported by the server
    /// (`server_version`, `client_encoding`, ...). Later `ParameterStatus`
    /// messages overwrite earlier values.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.stream.parameter(name)
    }

    /// The server version as a number (e.g. `140002`), when the server
    /// reported one.
    pub fn server_version_num(&self) -> Option<u32> {
        self.stream.server_version_num
    }

    /// The protocol-version downgrade the server negotiated during
    /// startup, if it sent one.
    pub fn negotiated_protocol_version(
        &self,
    ) -> Option<&crate::message::NegotiateProtocolVersion> {
        self.stream.negotiated_protocol.as_ref()
    }

    /// `true` once a fatal error has made the connection unusable.
    pub fn is_broken(&self) -> bool {
        self.broken || self.stream.nb().is_closed()
    }

    /// Install a callback for `NOTIFY` messages delivered on this session.
    pub fn on_notification(&mut self, handler: impl FnMut(Notification) + Send + 'static) {
        self.stream.notification_handler = Some(Box::new(handler));
    }

    /// Install a callback for server notices (which are also logged under
    /// the `pglink::notice` target).
    pub fn on_notice(&mut self, handler: impl FnMut(&Notice) + Send + 'static) {
        self.stream.notice_handler = Some(Box::new(handler));
    }

    /// Write a libpq-style trace of every message to `out`.
    pub fn trace(&mut self, out: Box<dyn std::io::Write + Send>, config: TraceConfig) {
        self.stream.tracer = Some(Tracer::new(out, config));
    }

    pub fn untrace(&mut self) {
        self.stream.tracer = None;
    }

    /// A token that can cancel the query currently running on this
    /// session, from another task, by dialing a new connection.
    pub fn cancel_token(&self) -> PgCancelToken {
        PgCancelToken {
            options: self.options.clone(),
            process_id: self.process_id,
            secret_key: self.secret_key.clone(),
        }
    }

    /// Tie this connection's I/O to a cancellation token: when the token
    /// triggers, pending and future reads and writes fail promptly and the
    /// connection becomes unusable.
    ///
    /// At most one watch may be active; panics on re-entry. Use
    /// [`unwatch`] to release it.
    ///
    /// [`unwatch`]: Self::unwatch
    pub fn watch(&mut self, token: &WatchToken) {
        assert!(
            self.watcher.is_none(),
            "watch is not re-entrant; call unwatch first"
        );

        self.watcher = Some(watcher::spawn(token, self.stream.deadline_handle()));
    }

    /// Release the active watch, if any, and clear the deadlines it may
    /// have installed. Safe to call repeatedly.
    pub fn unwatch(&mut self) {
        if self.watcher.take().is_some() {
            let handle = self.stream.deadline_handle();

            if handle.is_canceled() {
                // the token fired: the protocol state is unknown
                self.broken = true;
            }

            handle.reset();
        }
    }

    /// Gracefully terminate the session.
    pub async fn close(mut self) -> Result<(), Error> {
        self.unwatch();
        self.stream.close().await
    }

    pub(crate) fn ensure_usable(&self) -> Result<(), Error> {
        if self.is_broken() {
            return Err(Error::Closed);
        }

        Ok(())
    }

    // Fatal errors (anything but a server error) latch the connection
    // into the broken state.
    pub(crate) fn fuse(&mut self, err: Error) -> Error {
        if err.is_fatal() {
            self.broken = true;
        }

        err
    }

    // Will return when the connection is ready for another query; any
    // leftovers of an abandoned operation (including its server errors,
    // which now belong to nobody) are discarded along the way.
    pub(crate) async fn wait_until_ready(&mut self) -> Result<(), Error> {
        while self.pending_ready_for_query_count > 0 {
            loop {
                let message = match self.stream.recv_filtered().await {
                    Ok(message) => message,
                    Err(e) => return Err(self.fuse(e)),
                };

                if message.format == MessageFormat::ReadyForQuery {
                    self.handle_ready_for_query(message.contents)?;
                    break;
                }
            }
        }

        Ok(())
    }

    pub(crate) fn handle_ready_for_query(&mut self, contents: Bytes) -> Result<(), Error> {
        self.pending_ready_for_query_count =
            self.pending_ready_for_query_count.saturating_sub(1);
        self.transaction_status = ReadyForQuery::decode(contents)?.transaction_status;

        Ok(())
    }

    // Discard messages until the ReadyForQuery that terminates the current
    // (failed) operation arrives; the session is back in a known state
    // afterwards.
    pub(crate) async fn resync_to_ready(&mut self) -> Result<(), Error> {
        loop {
            let message = match self.stream.recv_filtered().await {
                Ok(message) => message,
                Err(e) => return Err(self.fuse(e)),
            };

            if message.format == MessageFormat::ReadyForQuery {
                return self.handle_ready_for_query(message.contents);
            }
        }
    }

    pub(crate) fn next_statement_name(&mut self) -> String {
        self.stmt_counter += 1;

        format!("lru_{}_{}", self.stmt_seed, self.stmt_counter)
    }

    pub(crate) fn cache_mode(&self) -> CacheMode {
        self.cache_mode
    }

    /// The cache reported a statement as invalid (the server refused a
    /// cached plan). The entry moves to the invalidated list now; the
    /// server-side name is deallocated at the next point the session is
    /// idle, because the server rejects `DEALLOCATE` inside a failed
    /// transaction.
    pub(crate) fn statement_errored(&mut self, sql: &str) {
        self.cache.invalidate(sql);
    }

    // Deallocate the server-side names of invalidated cache entries.
    // No-op unless the session is idle.
    pub(crate) async fn flush_invalidated_statements(&mut self) -> Result<(), Error> {
        if self.transaction_status != TransactionStatus::Idle {
            return Ok(());
        }

        if self.cache.get_invalidated().is_empty() {
            return Ok(());
        }

        let mut sql = String::new();

        for sd in self.cache.get_invalidated() {
            if !sd.name.is_empty() {
                let _ = write!(sql, "deallocate \"{}\";", sd.name);
            }
        }

        if !sql.is_empty() {
            self.exec_discard(&sql).await?;
        }

        self.cache.remove_invalidated();

        Ok(())
    }

    // Run a query for its side effects, discarding results and server
    // errors.
    async fn exec_discard(&mut self, sql: &str) -> Result<(), Error> {
        self.wait_until_ready().await?;

        self.stream.write(Query(sql))?;
        self.stream.flush().await.map_err(|e| self.fuse(e))?;
        self.pending_ready_for_query_count += 1;

        self.wait_until_ready().await
    }
}

impl std::fmt::Debug for PgConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConnection")
            .field("process_id", &self.process_id)
            .field("transaction_status", &self.transaction_status)
            .finish()
    }
}
