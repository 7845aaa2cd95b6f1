//! A wire-level message tracer in the spirit of libpq's `PQtrace`.
//!
//! One line per protocol message, tab-separated:
//!
//! ```text
//! [timestamp]\tsender\tMsgType\tencoded_len\targs
//! ```
//!
//! `sender` is `F` or `B`. Text arguments render as `"…"`, binary
//! arguments as `'…'` with `\xNN` escapes, so mixed payloads stay
//! one-line. Regress mode redacts the values that differ run to run
//! (backend PIDs, secret keys), which keeps traces diffable.
//!
//! [`parse_line`] round-trips the format so tooling (and the tests) can
//! consume traces structurally.

use std::fmt::Write as _;
use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Buf;

use crate::message::{CANCEL_REQUEST_CODE, GSS_ENC_REQUEST_CODE, SSL_REQUEST_CODE};

/// Which peer produced a traced message.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Sender {
    Frontend,
    Backend,
}

impl Sender {
    fn letter(self) -> char {
        match self {
            Sender::Frontend => 'F',
            Sender::Backend => 'B',
        }
    }
}

/// Tracer options.
#[derive(Debug, Clone, Default)]
pub struct TraceConfig {
    /// Prefix each line with a `seconds.micros` UNIX timestamp.
    pub timestamps: bool,

    /// Redact values that vary between identical runs (process IDs,
    /// secret keys, portal positions) so traces can be compared textually.
    pub regress: bool,
}

/// Observes every message a connection sends or receives and writes one
/// trace line per message.
pub struct Tracer {
    out: Box<dyn Write + Send>,
    config: TraceConfig,
}

impl Tracer {
    pub fn new(out: Box<dyn Write + Send>, config: TraceConfig) -> Self {
        Self { out, config }
    }

    /// Trace one message from its full wire image (tag byte, if any,
    /// included). `name_hint` overrides the tag-derived message name where
    /// the tag alone is ambiguous (the `p` family).
    pub(crate) fn message(&mut self, sender: Sender, wire: &[u8], name_hint: Option<&str>) {
        let Some(line) = self.render(sender, wire, name_hint) else {
            return;
        };

        let _ = writeln!(self.out, "{line}");
        let _ = self.out.flush();
    }

    fn render(&self, sender: Sender, wire: &[u8], name_hint: Option<&str>) -> Option<String> {
        let mut line = String::new();

        if self.config.timestamps {
            let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;

            if self.config.regress {
                line.push_str("0.000000\t");
            } else {
                let _ = write!(line, "{}.{:06}\t", now.as_secs(), now.subsec_micros());
            }
        }

        let (name, body, reported_len) = split_message(wire, sender, name_hint)?;

        let _ = write!(line, "{}\t{}\t{}\t", sender.letter(), name, reported_len);

        self.render_args(&mut line, name, body);

        Some(line)
    }

    fn render_args(&self, line: &mut String, name: &str, mut body: &[u8]) {
        match name {
            "ErrorResponse" | "NoticeResponse" => {
                // field-tagged strings until the final NUL
                while let Some((tag, value, rest)) = take_tagged_str(body) {
                    let _ = write!(line, "{} ", tag as char);
                    push_text(line, value);
                    line.push(' ');
                    body = rest;
                }
            }

            "Query" | "CommandComplete" | "CopyFail" => {
                push_text(line, str_until_nul(body));
            }

            "Parse" => {
                push_text(line, str_until_nul(body));
                let rest = &body[str_until_nul(body).len() + 1..];
                line.push(' ');
                push_text(line, str_until_nul(rest));

                let mut tail = &rest[str_until_nul(rest).len() + 1..];
                if tail.len() >= 2 {
                    let cnt = tail.get_u16();
                    let _ = write!(line, " {cnt}");
                    for _ in 0..cnt {
                        if tail.len() < 4 {
                            break;
                        }
                        let _ = write!(line, " {}", tail.get_u32());
                    }
                }
            }

            "Bind" | "Describe" | "Close" | "Execute" => {
                // render the leading names/tags and leave the payload raw
                match name {
                    "Describe" | "Close" if !body.is_empty() => {
                        let _ = write!(line, "{} ", body[0] as char);
                        push_text(line, str_until_nul(&body[1..]));
                    }
                    "Execute" => {
                        push_text(line, str_until_nul(body));
                        let rest = &body[str_until_nul(body).len() + 1..];
                        if rest.len() >= 4 {
                            let _ = write!(line, " {}", u32::from_be_bytes(
                                rest[..4].try_into().unwrap()
                            ));
                        }
                    }
                    _ => {
                        push_text(line, str_until_nul(body));
                        let rest = &body[str_until_nul(body).len() + 1..];
                        line.push(' ');
                        push_text(line, str_until_nul(rest));
                    }
                }
            }

            "ReadyForQuery" => {
                if let Some(&status) = body.first() {
                    line.push(status as char);
                }
            }

            "ParameterStatus" => {
                push_text(line, str_until_nul(body));
                let rest = &body[str_until_nul(body).len() + 1..];
                line.push(' ');
                push_text(line, str_until_nul(rest));
            }

            "BackendKeyData" | "CancelRequest" => {
                if self.config.regress {
                    line.push_str("NNNN NNNN");
                } else {
                    push_bytes(line, body);
                }
            }

            "Authentication" => {
                if body.len() >= 4 {
                    let _ = write!(line, "{}", u32::from_be_bytes(body[..4].try_into().unwrap()));
                }
            }

            "DataRow" => {
                if body.len() >= 2 {
                    let cnt = body.get_u16();
                    let _ = write!(line, "{cnt}");

                    for _ in 0..cnt {
                        if body.len() < 4 {
                            break;
                        }
                        let len = body.get_i32();

                        if len < 0 {
                            line.push_str(" -1");
                        } else if body.len() >= len as usize {
                            line.push(' ');
                            push_bytes(line, &body[..len as usize]);
                            body.advance(len as usize);
                        }
                    }
                }
            }

            "RowDescription" => {
                if body.len() >= 2 {
                    let cnt = body.get_u16();
                    let _ = write!(line, "{cnt}");

                    for _ in 0..cnt {
                        let name = str_until_nul(body);
                        line.push(' ');
                        push_text(line, name);
                        body = &body[name.len() + 1..];

                        if body.len() < 18 {
                            break;
                        }

                        let _ = write!(
                            line,
                            " {} {} {} {} {} {}",
                            body.get_u32(),
                            body.get_u16(),
                            body.get_u32(),
                            body.get_i16(),
                            body.get_i32(),
                            body.get_i16(),
                        );
                    }
                }
            }

            "StartupMessage" => {
                // skip the version, render key/value pairs
                if body.len() >= 4 {
                    body.advance(4);

                    while !body.is_empty() && body[0] != 0 {
                        let key = str_until_nul(body);
                        body = &body[key.len() + 1..];
                        let value = str_until_nul(body);
                        body = &body[value.len() + 1..];

                        push_text(line, key);
                        line.push(' ');
                        push_text(line, value);
                        line.push(' ');
                    }
                }
            }

            "SSLRequest" | "GSSENCRequest" | "Sync" | "Flush" | "Terminate" | "CopyDone"
            | "ParseComplete" | "BindComplete" | "CloseComplete" | "NoData"
            | "EmptyQueryResponse" | "PortalSuspended" => {}

            _ => {
                // fall back to a raw byte rendering
                push_bytes(line, body);
            }
        }

        // normalize: no trailing space
        while line.ends_with(' ') {
            line.pop();
        }
    }
}

// Splits a full wire image into (message name, body, reported length); the
// reported length is the value of the protocol length field, which is what
// libpq traces print.
fn split_message<'a>(
    wire: &'a [u8],
    sender: Sender,
    name_hint: Option<&'a str>,
) -> Option<(&'a str, &'a [u8], usize)> {
    if wire.len() >= 8 && wire[0] == 0 {
        // untagged startup-family messages carry a request code where a
        // tagged message would have tag + length; tagged messages never
        // start with a zero byte
        let code = u32::from_be_bytes(wire[4..8].try_into().unwrap());

        let name = match code {
            SSL_REQUEST_CODE => Some("SSLRequest"),
            GSS_ENC_REQUEST_CODE => Some("GSSENCRequest"),
            CANCEL_REQUEST_CODE => Some("CancelRequest"),
            crate::message::PROTOCOL_VERSION => Some("StartupMessage"),
            _ => None,
        };

        if let Some(name) = name {
            return Some((name, &wire[8..], wire.len()));
        }
    }

    let tag = *wire.first()?;
    let body = wire.get(5..)?;
    let reported_len = wire.len() - 1;

    if let Some(hint) = name_hint {
        return Some((hint, body, reported_len));
    }

    let name = match (sender, tag) {
        (Sender::Frontend, b'B') => "Bind",
        (Sender::Frontend, b'C') => "Close",
        (Sender::Frontend, b'D') => "Describe",
        (Sender::Frontend, b'E') => "Execute",
        (Sender::Frontend, b'H') => "Flush",
        (Sender::Frontend, b'P') => "Parse",
        (Sender::Frontend, b'Q') => "Query",
        (Sender::Frontend, b'S') => "Sync",
        (Sender::Frontend, b'X') => "Terminate",
        (Sender::Frontend, b'c') => "CopyDone",
        (Sender::Frontend, b'd') => "CopyData",
        (Sender::Frontend, b'f') => "CopyFail",
        (Sender::Frontend, b'p') => "PasswordMessage",

        (Sender::Backend, b'1') => "ParseComplete",
        (Sender::Backend, b'2') => "BindComplete",
        (Sender::Backend, b'3') => "CloseComplete",
        (Sender::Backend, b'A') => "NotificationResponse",
        (Sender::Backend, b'C') => "CommandComplete",
        (Sender::Backend, b'D') => "DataRow",
        (Sender::Backend, b'E') => "ErrorResponse",
        (Sender::Backend, b'G') => "CopyInResponse",
        (Sender::Backend, b'H') => "CopyOutResponse",
        (Sender::Backend, b'I') => "EmptyQueryResponse",
        (Sender::Backend, b'K') => "BackendKeyData",
        (Sender::Backend, b'N') => "NoticeResponse",
        (Sender::Backend, b'R') => "Authentication",
        (Sender::Backend, b'S') => "ParameterStatus",
        (Sender::Backend, b'T') => "RowDescription",
        (Sender::Backend, b'W') => "CopyBothResponse",
        (Sender::Backend, b'Z') => "ReadyForQuery",
        (Sender::Backend, b'c') => "CopyDone",
        (Sender::Backend, b'd') => "CopyData",
        (Sender::Backend, b'n') => "NoData",
        (Sender::Backend, b's') => "PortalSuspended",
        (Sender::Backend, b't') => "ParameterDescription",
        (Sender::Backend, b'v') => "NegotiateProtocolVersion",

        _ => "Unknown",
    };

    Some((name, body, reported_len))
}

fn str_until_nul(body: &[u8]) -> &str {
    let end = memchr::memchr(b'\0', body).unwrap_or(body.len());
    std::str::from_utf8(&body[..end]).unwrap_or("")
}

fn take_tagged_str(body: &[u8]) -> Option<(u8, &str, &[u8])> {
    let (&tag, rest) = body.split_first()?;

    if tag == 0 {
        return None;
    }

    let value = str_until_nul(rest);
    let rest = rest.get(value.len() + 1..)?;

    Some((tag, value, rest))
}

fn push_text(line: &mut String, s: &str) {
    line.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            line.push('\\');
        }
        line.push(c);
    }
    line.push('"');
}

fn push_bytes(line: &mut String, bytes: &[u8]) {
    line.push('\'');
    for &b in bytes {
        if (0x20..0x7f).contains(&b) && b != b'\'' && b != b'\\' {
            line.push(b as char);
        } else {
            let _ = write!(line, "\\x{b:02x}");
        }
    }
    line.push('\'');
}

/// One parsed trace line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceLine {
    pub timestamp: Option<String>,
    pub sender: Sender,
    pub message_type: String,
    pub encoded_len: usize,
    pub args: String,
}

impl std::fmt::Display for TraceLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ts) = &self.timestamp {
            write!(f, "{ts}\t")?;
        }

        write!(
            f,
            "{}\t{}\t{}\t{}",
            match self.sender {
                Sender::Frontend => 'F',
                Sender::Backend => 'B',
            },
            self.message_type,
            self.encoded_len,
            self.args
        )
    }
}

/// Parse one line of tracer output back into its parts, so the format
/// round-trips.
pub fn parse_line(line: &str) -> Option<TraceLine> {
    let mut parts = line.splitn(5, '\t');

    let first = parts.next()?;

    let (timestamp, sender_str) = if first == "F" || first == "B" {
        (None, first)
    } else {
        (Some(first.to_owned()), parts.next()?)
    };

    let sender = match sender_str {
        "F" => Sender::Frontend,
        "B" => Sender::Backend,
        _ => return None,
    };

    let message_type = parts.next()?.to_owned();
    let encoded_len = parts.next()?.parse().ok()?;
    let args = parts.next().unwrap_or("").to_owned();

    Some(TraceLine {
        timestamp,
        sender,
        message_type,
        encoded_len,
        args,
    })
}

#[cfg(test)]
mod tests {
    use super::{parse_line, Sender, TraceConfig, Tracer};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn trace_of(sender: Sender, wire: &[u8]) -> String {
        let buf = SharedBuf::default();
        let mut tracer = Tracer::new(Box::new(buf.clone()), TraceConfig::default());

        tracer.message(sender, wire, None);

        let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        out.trim_end().to_owned()
    }

    #[test]
    fn it_formats_a_query() {
        let line = trace_of(Sender::Frontend, b"Q\0\0\0\rSELECT 1\0");

        assert_eq!(line, "F\tQuery\t13\t\"SELECT 1\"");
    }

    #[test]
    fn it_formats_ready_for_query() {
        let line = trace_of(Sender::Backend, b"Z\0\0\0\x05I");

        assert_eq!(line, "B\tReadyForQuery\t5\tI");
    }

    #[test]
    fn it_formats_data_row_bytes() {
        let line = trace_of(
            Sender::Backend,
            b"D\0\0\0\x0e\x00\x01\x00\x00\x00\x04a\x00bc",
        );

        assert_eq!(line, "B\tDataRow\t14\t1 'a\\x00bc'");
    }

    #[test]
    fn it_redacts_backend_key_data_in_regress_mode() {
        let buf = SharedBuf::default();
        let mut tracer = Tracer::new(
            Box::new(buf.clone()),
            TraceConfig {
                timestamps: false,
                regress: true,
            },
        );

        tracer.message(Sender::Backend, b"K\0\0\0\x0c\0\0'\xc6\x89R\xc5+", None);

        let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(out.trim_end(), "B\tBackendKeyData\t12\tNNNN NNNN");
    }

    #[test]
    fn lines_round_trip_through_the_parser() {
        for wire in [
            &b"Q\0\0\0\rSELECT 1\0"[..],
            &b"Z\0\0\0\x05I"[..],
            &b"C\0\0\0\x0dSELECT 1\0"[..],
        ] {
            let sender = if wire[0] == b'Q' {
                Sender::Frontend
            } else {
                Sender::Backend
            };

            let line = trace_of(sender, wire);
            let parsed = parse_line(&line).unwrap();

            assert_eq!(parsed.to_string(), line);
        }
    }
}
