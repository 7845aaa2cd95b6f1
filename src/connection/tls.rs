use native_tls::{Certificate, Identity, TlsConnector};

use crate::connection::stream::PgStream;
use crate::error::Error;
use crate::message::SslRequest;
use crate::options::{PgConnectOptions, PgSslMode};

/// Negotiate TLS per `sslmode` before the startup packet is sent.
///
/// <https://www.postgresql.org/docs/current/libpq-ssl.html#LIBPQ-SSL-SSLMODE-STATEMENTS>
pub(super) async fn maybe_upgrade(
    stream: &mut PgStream,
    options: &PgConnectOptions,
    host: &str,
) -> Result<(), Error> {
    if !options.ssl_mode.wants_tls() {
        return Ok(());
    }

    if !upgrade(stream, options, host).await? && options.ssl_mode.requires_tls() {
        // the upgrade was refused and this mode does not allow clear text
        return Err(Error::tls("server does not support TLS"));
    }

    Ok(())
}

async fn upgrade(
    stream: &mut PgStream,
    options: &PgConnectOptions,
    host: &str,
) -> Result<bool, Error> {
    // To initiate an SSL-encrypted connection, the frontend initially
    // sends an SSLRequest message rather than a StartupMessage.

    stream.send(SslRequest).await?;

    // The server then responds with a single byte containing S or N,
    // indicating that it is willing or unwilling to perform SSL,
    // respectively.

    match stream.read_ssl_response().await? {
        b'S' => {
            // The server is ready and willing to accept an SSL connection
        }

        b'N' => {
            // The server is _unwilling_ to perform SSL
            return Ok(false);
        }

        other => {
            return Err(err_protocol!(
                "unexpected response from SSLRequest: 0x{:02x}",
                other
            ));
        }
    }

    let accept_invalid_certs = !matches!(
        options.ssl_mode,
        PgSslMode::VerifyCa | PgSslMode::VerifyFull
    );

    let mut builder = TlsConnector::builder();
    builder
        .danger_accept_invalid_certs(accept_invalid_certs)
        .danger_accept_invalid_hostnames(!matches!(options.ssl_mode, PgSslMode::VerifyFull));

    if !accept_invalid_certs {
        if let Some(ca) = &options.ssl_root_cert {
            let data = tokio::fs::read(ca).await?;
            let cert = Certificate::from_pem(&data).map_err(Error::tls)?;

            builder.add_root_certificate(cert);
        }
    }

    if let (Some(cert), Some(key)) = (&options.ssl_client_cert, &options.ssl_client_key) {
        let cert = tokio::fs::read(cert).await?;
        let key = tokio::fs::read(key).await?;
        let identity = Identity::from_pkcs8(&cert, &key).map_err(Error::tls)?;

        builder.identity(identity);
    }

    let connector = builder.build().map_err(Error::tls)?;

    stream.upgrade_tls(host, connector).await?;

    Ok(true)
}
