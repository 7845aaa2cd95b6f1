use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::Error;
use crate::io::{ChunkedReader, Decode, Encode, MAX_MESSAGE_BODY};
use crate::message::{
    Message, MessageFormat, NegotiateProtocolVersion, Notice, Notification, ParameterStatus,
    PgSeverity, Terminate,
};
use crate::net::{connect_tcp, connect_uds, Deadline, DeadlineHandle, NbStream, PgSocket, Stream};
use crate::options::PgConnectOptions;
use crate::trace::{Sender, Tracer};

// the stream is a separate type from the connection to uphold the invariant
// where an instantiated [PgConnection] is a **valid** connection to postgres

// when a new connection is asked for, we work directly on the [PgStream]
// type until the connection is fully established

/// The frontend driver: composes outbound messages into a write buffer,
/// frames and dispatches inbound messages, and owns the handlers for the
/// asynchronous message kinds (notices, notifications, parameter changes).
pub struct PgStream {
    // non-blocking stream wrapped in the chunked framing reader
    reader: ChunkedReader<NbStream<PgSocket>>,

    // encode buffer; messages accumulate here until `flush`
    wbuf: Vec<u8>,

    pub(crate) notification_handler: Option<Box<dyn FnMut(Notification) + Send>>,
    pub(crate) notice_handler: Option<Box<dyn FnMut(&Notice) + Send>>,

    pub(crate) parameter_statuses: BTreeMap<String, String>,

    pub(crate) server_version_num: Option<u32>,

    pub(crate) negotiated_protocol: Option<NegotiateProtocolVersion>,

    pub(crate) tracer: Option<Tracer>,
}

impl PgStream {
    pub(crate) async fn connect(
        options: &PgConnectOptions,
        host: &str,
        port: u16,
    ) -> Result<Self, Error> {
        let socket: Box<dyn Stream> = match options.fetch_socket(host, port) {
            Some(path) => Box::new(connect_uds(&path).await?),
            None => Box::new(connect_tcp(host, port).await?),
        };

        Ok(Self::from_socket(socket))
    }

    /// Build the driver over an already-connected byte stream.
    pub(crate) fn from_stream(stream: impl Stream) -> Self {
        Self::from_socket(Box::new(stream))
    }

    fn from_socket(socket: Box<dyn Stream>) -> Self {
        PgStream {
            reader: ChunkedReader::new(NbStream::new(crate::net::MaybeTlsStream::Raw(socket))),
            wbuf: Vec::with_capacity(1024),
            notification_handler: None,
            notice_handler: None,
            parameter_statuses: BTreeMap::new(),
            server_version_num: None,
            negotiated_protocol: None,
            tracer: None,
        }
    }

    pub(crate) fn nb(&self) -> &NbStream<PgSocket> {
        self.reader.get_ref()
    }

    pub(crate) fn nb_mut(&mut self) -> &mut NbStream<PgSocket> {
        self.reader.get_mut()
    }

    pub(crate) fn deadline_handle(&self) -> DeadlineHandle {
        self.nb().deadline_handle()
    }

    pub(crate) fn is_tls(&self) -> bool {
        self.nb().is_tls()
    }

    pub(crate) fn tls_server_end_point(&self) -> Option<Vec<u8>> {
        self.nb().tls_server_end_point()
    }

    pub(crate) async fn upgrade_tls(
        &mut self,
        host: &str,
        connector: native_tls::TlsConnector,
    ) -> Result<(), Error> {
        self.reader.get_mut().start_tls(host, connector).await
    }

    pub(crate) fn set_read_deadline(&mut self, deadline: Deadline) {
        self.nb_mut().set_read_deadline(deadline);
    }

    fn refine(&self, err: Error) -> Error {
        self.nb().refine_error(err)
    }

    /// Append an encoded message to the write buffer; nothing is sent
    /// until [`flush`].
    ///
    /// [`flush`]: Self::flush
    pub(crate) fn write<T: Encode>(&mut self, message: T) -> Result<(), Error> {
        self.write_with_hint(message, None)
    }

    /// As [`write`], naming the message for the tracer where the type tag
    /// alone is ambiguous.
    ///
    /// [`write`]: Self::write
    pub(crate) fn write_with_hint<T: Encode>(
        &mut self,
        message: T,
        trace_name: Option<&'static str>,
    ) -> Result<(), Error> {
        let offset = self.wbuf.len();

        message.encode(&mut self.wbuf)?;

        if let Some(tracer) = &mut self.tracer {
            tracer.message(Sender::Frontend, &self.wbuf[offset..], trace_name);
        }

        Ok(())
    }

    /// Write the buffered messages out through the non-blocking stream.
    pub(crate) async fn flush(&mut self) -> Result<(), Error> {
        if !self.wbuf.is_empty() {
            self.reader.get_mut().write(&self.wbuf)?;
            self.wbuf.clear();
        }

        self.reader.get_mut().flush().await
    }

    /// Encode and send a single message now.
    pub(crate) async fn send<T: Encode>(&mut self, message: T) -> Result<(), Error> {
        self.write(message)?;
        self.flush().await
    }

    /// Flush pending messages, then push a `CopyData` frame straight into
    /// the stream's write queue. Bulk COPY payloads skip the encode buffer
    /// so the same large chunk is not copied twice.
    pub(crate) async fn send_unbuffered_copy_data(&mut self, data: &[u8]) -> Result<(), Error> {
        self.flush().await?;

        let mut header = [0_u8; 5];
        header[0] = b'd';
        header[1..5].copy_from_slice(&((data.len() + 4) as i32).to_be_bytes());

        if let Some(tracer) = &mut self.tracer {
            // trace a bounded prefix; bulk frames can be arbitrarily large
            let mut wire = header.to_vec();
            wire.extend_from_slice(&data[..data.len().min(256)]);
            tracer.message(Sender::Frontend, &wire, None);
        }

        let nb = self.reader.get_mut();
        nb.write(&header)?;
        nb.write(data)?;
        nb.flush().await
    }

    /// Read the single-byte server answer to `SSLRequest`.
    pub(crate) async fn read_ssl_response(&mut self) -> Result<u8, Error> {
        let byte = self.reader.next(1).await.map_err(|e| self.refine(e))?;

        Ok(byte[0])
    }

    /// Receive the next backend message, unfiltered.
    ///
    /// In non-blocking read mode a `WouldBlock` failure leaves any
    /// partially read message buffered, and the next call resumes it.
    pub(crate) async fn recv_unchecked(&mut self) -> Result<Message, Error> {
        // all packets in postgres start with a 5-byte header containing the
        // message type and the total length of the message

        if let Err(e) = self.reader.fill(5).await {
            return Err(self.refine(e));
        }

        let header = &self.reader.buffered()[..5];
        let format = MessageFormat::try_from_u8(header[0])?;
        let length = u32::from_be_bytes(header[1..5].try_into().unwrap()) as usize;

        if length < 4 {
            return Err(err_protocol!("message length too small: {}", length));
        }

        if length - 4 > MAX_MESSAGE_BODY {
            return Err(err_protocol!("message length too large: {}", length));
        }

        if let Err(e) = self.reader.fill(5 + (length - 4)).await {
            return Err(self.refine(e));
        }

        let header = self.reader.take(5);
        let contents = self.reader.take(length - 4);

        if let Some(tracer) = &mut self.tracer {
            let mut wire = Vec::with_capacity(5 + contents.len());
            wire.extend_from_slice(&header);
            wire.extend_from_slice(&contents);
            tracer.message(Sender::Backend, &wire, None);
        }

        Ok(Message { format, contents })
    }

    /// Get the next message from the server relevant to the current
    /// operation, transparently handling the asynchronous message kinds
    /// and failing on `ErrorResponse`.
    pub(crate) async fn recv(&mut self) -> Result<Message, Error> {
        let message = self.recv_filtered().await?;

        if message.format == MessageFormat::ErrorResponse {
            // An error returned from the database server.
            return Err(Notice::decode(message.contents)?.into());
        }

        Ok(message)
    }

    /// As [`recv`], but hands `ErrorResponse` back to the caller instead
    /// of failing; used when draining an abandoned operation, where the
    /// error belongs to nobody.
    ///
    /// [`recv`]: Self::recv
    pub(crate) async fn recv_filtered(&mut self) -> Result<Message, Error> {
        loop {
            let message = self.recv_unchecked().await?;

            match message.format {
                MessageFormat::ParameterStatus => {
                    // informs the frontend about the current (initial)
                    // setting of backend parameters

                    let ParameterStatus { name, value } = message.decode()?;

                    if name == "server_version" {
                        self.server_version_num = parse_server_version(&value);
                    }

                    self.parameter_statuses.insert(name, value);

                    continue;
                }

                MessageFormat::NotificationResponse => {
                    let notification: Notification = message.decode()?;

                    if let Some(handler) = &mut self.notification_handler {
                        handler(notification);
                    } else {
                        log::trace!(
                            target: "pglink::notify",
                            "dropping notification from {} on {:?}: no handler installed",
                            notification.process_id,
                            notification.channel
                        );
                    }

                    continue;
                }

                MessageFormat::NoticeResponse => {
                    let notice: Notice = message.decode()?;

                    let level = match notice.severity() {
                        PgSeverity::Fatal | PgSeverity::Panic | PgSeverity::Error => {
                            log::Level::Error
                        }
                        PgSeverity::Warning => log::Level::Warn,
                        PgSeverity::Notice => log::Level::Info,
                        PgSeverity::Debug => log::Level::Debug,
                        PgSeverity::Info | PgSeverity::Log => log::Level::Trace,
                    };

                    log::log!(target: "pglink::notice", level, "{}", notice.message());

                    if let Some(handler) = &mut self.notice_handler {
                        handler(&notice);
                    }

                    continue;
                }

                MessageFormat::NegotiateProtocolVersion => {
                    // the server is older than the protocol we asked for;
                    // record what it settled on and carry on
                    self.negotiated_protocol = Some(message.decode()?);

                    continue;
                }

                _ => {}
            }

            return Ok(message);
        }
    }

    /// Expect a specific message type next.
    pub(crate) async fn recv_expect<T: Decode>(
        &mut self,
        format: MessageFormat,
    ) -> Result<T, Error> {
        let message = self.recv().await?;

        if message.format != format {
            return Err(err_protocol!(
                "expecting {:?} but received {:?}",
                format,
                message.format
            ));
        }

        message.decode()
    }

    /// Value of a runtime parameter previously reported by the server.
    pub(crate) fn parameter(&self, name: &str) -> Option<&str> {
        self.parameter_statuses.get(name).map(|s| s.as_str())
    }

    /// Graceful termination: `Terminate`, flush, shut down. Best-effort;
    /// closing an already-dead connection is not an error.
    pub(crate) async fn close(&mut self) -> Result<(), Error> {
        // The normal, graceful termination procedure is that the frontend
        // sends a Terminate message and immediately closes the connection.
        let _ = self.write(Terminate);
        let _ = self.reader.get_mut().write(&self.wbuf);
        self.wbuf.clear();

        self.reader.get_mut().close().await
    }
}

// reference:
// https://github.com/postgres/postgres/blob/master/src/interfaces/libpq/fe-exec.c
fn parse_server_version(s: &str) -> Option<u32> {
    let mut parts = Vec::<u32>::with_capacity(3);

    let mut from = 0;
    let mut chs = s.char_indices().peekable();
    while let Some((i, ch)) = chs.next() {
        match ch {
            '.' => {
                if let Ok(num) = u32::from_str(&s[from..i]) {
                    parts.push(num);
                    from = i + 1;
                } else {
                    break;
                }
            }
            _ if ch.is_ascii_digit() => {
                if chs.peek().is_none() {
                    if let Ok(num) = u32::from_str(&s[from..]) {
                        parts.push(num);
                    }
                    break;
                }
            }
            _ => {
                if let Ok(num) = u32::from_str(&s[from..i]) {
                    parts.push(num);
                }
                break;
            }
        };
    }

    let version_num = match parts.as_slice() {
        [major, minor, rev] => (100 * major + minor) * 100 + rev,
        [major, minor] if *major >= 10 => 100 * 100 * major + minor,
        [major, minor] => (100 * major + minor) * 100,
        [major] => 100 * 100 * major,
        _ => return None,
    };

    Some(version_num)
}
