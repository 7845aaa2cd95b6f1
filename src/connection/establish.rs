use bytes::Bytes;

use crate::connection::stream::PgStream;
use crate::connection::{sasl, tls, PgConnection};
use crate::error::Error;
use crate::io::Decode;
use crate::message::{
    Authentication, BackendKeyData, MessageFormat, Password, ReadyForQuery, Startup,
};
use crate::net::Stream;
use crate::options::PgConnectOptions;

// https://www.postgresql.org/docs/current/protocol-flow.html#PROTOCOL-FLOW-START-UP

pub(super) async fn establish(options: &PgConnectOptions) -> Result<PgConnection, Error> {
    if options.port.len() > 1 && options.port.len() != options.host.len() {
        return Err(Error::config(
            "when multiple ports are given there must be one per host",
        ));
    }

    let mut last_err = None;

    for (i, host) in options.host.iter().enumerate() {
        let port = options
            .port
            .get(i)
            .or_else(|| options.port.first())
            .copied()
            .unwrap_or(5432);

        let attempt = connect_once(options, host, port);

        let result = match options.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, attempt)
                .await
                .unwrap_or(Err(Error::Timeout)),

            None => attempt.await,
        };

        match result {
            Ok(conn) => return Ok(conn),
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap_or_else(|| Error::config("no hosts were provided")))
}

async fn connect_once(
    options: &PgConnectOptions,
    host: &str,
    port: u16,
) -> Result<PgConnection, Error> {
    let mut stream = PgStream::connect(options, host, port).await?;

    // Upgrade to TLS if we were asked to and the server supports it
    tls::maybe_upgrade(&mut stream, options, host).await?;

    startup(stream, options, host, port, true).await
}

pub(super) async fn establish_over(
    stream: impl Stream,
    options: &PgConnectOptions,
) -> Result<PgConnection, Error> {
    let stream = PgStream::from_stream(stream);
    let host = options.host.first().cloned().unwrap_or_default();
    let port = options.port.first().copied().unwrap_or(5432);

    startup(stream, options, &host, port, false).await
}

async fn startup(
    mut stream: PgStream,
    options: &PgConnectOptions,
    host: &str,
    port: u16,
    dialed: bool,
) -> Result<PgConnection, Error> {
    // To begin a session, a frontend opens a connection to the server and
    // sends a startup message.

    let mut params: Vec<(&str, &str)> = Vec::new();

    if let Some(application_name) = &options.application_name {
        params.push(("application_name", application_name));
    }

    for (name, value) in &options.extra_params {
        params.push((name.as_str(), value.as_str()));
    }

    stream
        .send(Startup {
            username: Some(&options.username),
            database: options.database.as_deref(),
            params: &params,
        })
        .await?;

    // The server then uses this information and the contents of its
    // configuration files (such as pg_hba.conf) to determine whether the
    // connection is provisionally acceptable, and what additional
    // authentication is required (if any).

    let password = options.password_for(host, port);

    let mut process_id = 0;
    let mut secret_key = Bytes::new();
    let transaction_status;

    loop {
        let message = stream.recv().await?;
        match message.format {
            MessageFormat::Authentication => match message.decode()? {
                Authentication::Ok => {
                    // the authentication exchange is successfully completed;
                    // no more information is required to continue
                }

                Authentication::CleartextPassword => {
                    // The frontend must now send a [Password] containing
                    // the password in clear-text form.

                    stream.write_with_hint(
                        Password::Cleartext(password.as_deref().unwrap_or_default()),
                        Some("PasswordMessage"),
                    )?;
                    stream.flush().await?;
                }

                Authentication::Md5Password(body) => {
                    // The frontend must now send a [Password] containing
                    // the password (with user name) encrypted via MD5, then
                    // encrypted again using the 4-byte random salt from the
                    // request.

                    stream.write_with_hint(
                        Password::Md5 {
                            username: &options.username,
                            password: password.as_deref().unwrap_or_default(),
                            salt: body.salt,
                        },
                        Some("PasswordMessage"),
                    )?;
                    stream.flush().await?;
                }

                Authentication::Sasl(body) => {
                    sasl::authenticate(
                        &mut stream,
                        &options.username,
                        password.as_deref().unwrap_or_default(),
                        body,
                    )
                    .await?;
                }

                method => {
                    return Err(Error::UnsupportedAuthMethod(method.name().to_owned()));
                }
            },

            MessageFormat::BackendKeyData => {
                // provides secret-key data that the frontend must save if
                // it wants to be able to issue cancel requests later

                let data: BackendKeyData = message.decode()?;

                process_id = data.process_id;
                secret_key = data.secret_key;
            }

            MessageFormat::ReadyForQuery => {
                // start-up is completed; the frontend can now issue
                // commands
                transaction_status =
                    ReadyForQuery::decode(message.contents)?.transaction_status;

                break;
            }

            _ => {
                return Err(err_protocol!(
                    "establish: unexpected message: {:?}",
                    message.format
                ));
            }
        }
    }

    log::debug!(
        "connected to server (pid {process_id}, version {:?})",
        stream.server_version_num
    );

    Ok(PgConnection::assemble(
        stream,
        dialed.then(|| options.clone()),
        process_id,
        secret_key,
        transaction_status,
    ))
}
