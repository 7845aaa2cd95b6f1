use bytes::Bytes;

use crate::connection::stream::PgStream;
use crate::connection::tls;
use crate::error::Error;
use crate::message::CancelRequest;
use crate::options::PgConnectOptions;

/// Cancels an in-flight query on its originating session.
///
/// Obtained from [`PgConnection::cancel_token`]; usable from any task. The
/// cancel request travels over a *new* connection to the same server,
/// carrying the session's process ID and secret key; on success the
/// session observes an `ErrorResponse` with SQLSTATE `57014`, followed by
/// `ReadyForQuery`.
///
/// [`PgConnection::cancel_token`]: crate::PgConnection::cancel_token
#[derive(Clone)]
pub struct PgCancelToken {
    pub(super) options: Option<PgConnectOptions>,
    pub(super) process_id: u32,
    pub(super) secret_key: Bytes,
}

impl PgCancelToken {
    /// The process ID of the target backend.
    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    /// Dial the server and ask it to cancel the session's current query.
    ///
    /// Cancellation is inherently racy: the query may complete first, in
    /// which case the request does nothing. An `Ok` here means the request
    /// was delivered, not that anything was canceled.
    pub async fn cancel(&self) -> Result<(), Error> {
        let options = self.options.as_ref().ok_or_else(|| {
            Error::config("this connection carries no dial information to cancel through")
        })?;

        let mut last_err = None;

        for (i, host) in options.host.iter().enumerate() {
            let port = options
                .port
                .get(i)
                .or_else(|| options.port.first())
                .copied()
                .unwrap_or(5432);

            match self.cancel_once(options, host, port).await {
                Ok(()) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err.unwrap_or_else(|| Error::config("no hosts to cancel through")))
    }

    async fn cancel_once(
        &self,
        options: &PgConnectOptions,
        host: &str,
        port: u16,
    ) -> Result<(), Error> {
        let mut stream = PgStream::connect(options, host, port).await?;

        tls::maybe_upgrade(&mut stream, options, host).await?;

        stream
            .send(CancelRequest {
                process_id: self.process_id,
                secret_key: &self.secret_key,
            })
            .await?;

        // no reply is defined; the server processes the request and closes
        // the connection
        let _ = stream.read_ssl_response().await;

        Ok(())
    }
}
