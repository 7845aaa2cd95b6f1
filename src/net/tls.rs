use std::io;
use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll};

use native_tls::TlsConnector;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_native_tls::TlsStream;

use crate::error::Error;
use crate::net::Stream;

/// A byte stream that starts out in the clear and may be upgraded to TLS
/// in place after the `SSLRequest` handshake.
pub enum MaybeTlsStream<S>
where
    S: Stream,
{
    Raw(S),
    Tls(TlsStream<S>),

    // Transient state held only while `upgrade` is mid-flight; observing it
    // from I/O means the upgrade future was dropped part-way.
    Upgrading,
}

impl<S> MaybeTlsStream<S>
where
    S: Stream,
{
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// Perform the client side of the TLS handshake over the raw stream.
    ///
    /// Must be called at most once, after the server has agreed to TLS and
    /// before any further protocol traffic.
    pub async fn upgrade(&mut self, host: &str, connector: TlsConnector) -> Result<(), Error> {
        let raw = match mem::replace(self, MaybeTlsStream::Upgrading) {
            MaybeTlsStream::Raw(raw) => raw,

            MaybeTlsStream::Tls(_) => {
                return Err(Error::tls("connection was already upgraded to TLS"));
            }

            MaybeTlsStream::Upgrading => {
                return Err(Error::tls("TLS upgrade is already in progress"));
            }
        };

        let connector = tokio_native_tls::TlsConnector::from(connector);

        *self = MaybeTlsStream::Tls(connector.connect(host, raw).await.map_err(Error::tls)?);

        Ok(())
    }

    /// The `tls-server-end-point` channel-binding data for the negotiated
    /// session: a digest of the server certificate.
    ///
    /// `None` when the stream is not TLS or when the TLS backend does not
    /// expose the peer certificate; SCRAM then must not advertise the
    /// `-PLUS` mechanism.
    pub fn tls_server_end_point(&self) -> Option<Vec<u8>> {
        match self {
            MaybeTlsStream::Tls(stream) => {
                let cert = stream.get_ref().peer_certificate().ok()??;
                let der = cert.to_der().ok()?;

                Some(Sha256::digest(&der).to_vec())
            }

            _ => None,
        }
    }
}

fn upgrading_err() -> io::Error {
    io::Error::new(
        io::ErrorKind::Other,
        "stream is mid-upgrade to TLS; the upgrade future was dropped",
    )
}

impl<S> AsyncRead for MaybeTlsStream<S>
where
    S: Stream,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Raw(s) => Pin::new(s).poll_read(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s).poll_read(cx, buf),
            MaybeTlsStream::Upgrading => Poll::Ready(Err(upgrading_err())),
        }
    }
}

impl<S> AsyncWrite for MaybeTlsStream<S>
where
    S: Stream,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Raw(s) => Pin::new(s).poll_write(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s).poll_write(cx, buf),
            MaybeTlsStream::Upgrading => Poll::Ready(Err(upgrading_err())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Raw(s) => Pin::new(s).poll_flush(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s).poll_flush(cx),
            MaybeTlsStream::Upgrading => Poll::Ready(Err(upgrading_err())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Raw(s) => Pin::new(s).poll_shutdown(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s).poll_shutdown(cx),
            MaybeTlsStream::Upgrading => Poll::Ready(Err(upgrading_err())),
        }
    }
}
