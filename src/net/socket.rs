use std::path::Path;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::Error;

/// A byte stream a connection can be built over. Implemented for every
/// `AsyncRead + AsyncWrite` type, which is what lets the tests drive a full
/// connection over an in-memory duplex pipe.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Stream for T {}

pub async fn connect_tcp(host: &str, port: u16) -> Result<TcpStream, Error> {
    // IPv6 addresses in URLs will be wrapped in brackets and the parser
    // doesn't trim those.
    let host = host.trim_matches(&['[', ']'][..]);

    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(true)?;

    Ok(stream)
}

/// Connect a Unix Domain Socket at the given path.
///
/// Returns an error if Unix Domain Sockets are not supported on this
/// platform.
#[cfg(unix)]
pub async fn connect_uds(path: impl AsRef<Path>) -> Result<tokio::net::UnixStream, Error> {
    Ok(tokio::net::UnixStream::connect(path).await?)
}

#[cfg(not(unix))]
pub async fn connect_uds(path: impl AsRef<Path>) -> Result<tokio::net::TcpStream, Error> {
    drop(path);

    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "Unix domain sockets are not supported on this platform",
    )
    .into())
}
