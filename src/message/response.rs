use std::str::from_utf8;

use bytes::Bytes;
use memchr::memchr;

use crate::error::Error;
use crate::io::Decode;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum PgSeverity {
    Panic,
    Fatal,
    Error,
    Warning,
    Notice,
    Debug,
    Info,
    Log,
}

impl PgSeverity {
    #[inline]
    pub fn is_error(self) -> bool {
        matches!(self, Self::Panic | Self::Fatal | Self::Error)
    }
}

impl TryFrom<&str> for PgSeverity {
    type Error = Error;

    fn try_from(s: &str) -> Result<PgSeverity, Error> {
        Ok(match s {
            "PANIC" => PgSeverity::Panic,
            "FATAL" => PgSeverity::Fatal,
            "ERROR" => PgSeverity::Error,
            "WARNING" => PgSeverity::Warning,
            "NOTICE" => PgSeverity::Notice,
            "DEBUG" => PgSeverity::Debug,
            "INFO" => PgSeverity::Info,
            "LOG" => PgSeverity::Log,

            severity => {
                return Err(err_protocol!("unknown severity: {:?}", severity));
            }
        })
    }
}

/// The shared body of `ErrorResponse` and `NoticeResponse`: a sequence of
/// tagged, NUL-terminated fields ending in an extra NUL.
///
/// The decoded form keeps the raw body and indexes the three fields every
/// consumer reads (severity, code, message); the rest are found by walking
/// the fields on demand.
#[derive(Debug)]
pub struct Notice {
    storage: Bytes,
    severity: PgSeverity,
    message: (u16, u16),
    code: (u16, u16),
}

impl Notice {
    #[inline]
    pub fn severity(&self) -> PgSeverity {
        self.severity
    }

    /// The SQLSTATE code.
    #[inline]
    pub fn code(&self) -> &str {
        self.get_cached_str(self.code)
    }

    /// The primary human-readable message.
    #[inline]
    pub fn message(&self) -> &str {
        self.get_cached_str(self.message)
    }

    // Field descriptions available here:
    //  https://www.postgresql.org/docs/current/protocol-error-fields.html

    #[inline]
    pub fn get(&self, ty: u8) -> Option<&str> {
        self.get_raw(ty).and_then(|v| from_utf8(v).ok())
    }

    pub fn get_raw(&self, ty: u8) -> Option<&[u8]> {
        self.fields()
            .filter(|(field, _)| *field == ty)
            .map(|(_, (start, end))| &self.storage[start as usize..end as usize])
            .next()
    }

    #[inline]
    fn fields(&self) -> Fields<'_> {
        Fields {
            storage: &self.storage,
            offset: 0,
        }
    }

    #[inline]
    fn get_cached_str(&self, cache: (u16, u16)) -> &str {
        // unwrap: indexes were validated during decode
        from_utf8(&self.storage[cache.0 as usize..cache.1 as usize]).unwrap()
    }
}

impl Decode for Notice {
    fn decode(buf: Bytes) -> Result<Self, Error> {
        // In order to support PostgreSQL 9.5 and older we need to parse the
        // severity from the string field `'S'`; in 9.6 and newer there is a
        // guaranteed-untranslated `'V'` field.
        let mut severity_v = None;
        let mut severity_s = None;
        let mut message = (0, 0);
        let mut code = (0, 0);

        // we cache the three always-present fields; this keeps the access
        // time down for the fields most likely accessed

        let fields = Fields {
            storage: &buf,
            offset: 0,
        };

        for (field, v) in fields {
            if message.0 != 0 && code.0 != 0 && severity_v.is_some() {
                // stop iterating when we have the fields we were looking for
                break;
            }

            match field {
                b'S' => {
                    // unwrap: the fields iterator yields in-bounds ranges
                    severity_s = from_utf8(&buf[v.0 as usize..v.1 as usize])
                        .unwrap()
                        .try_into()
                        .ok();
                }

                b'V' => {
                    severity_v = Some(
                        from_utf8(&buf[v.0 as usize..v.1 as usize])
                            .unwrap()
                            .try_into()?,
                    );
                }

                b'M' => {
                    message = v;
                }

                b'C' => {
                    code = v;
                }

                _ => {}
            }
        }

        let severity = severity_v
            .or(severity_s)
            .ok_or_else(|| err_protocol!("error response is missing a severity field"))?;

        if from_utf8(&buf[message.0 as usize..message.1 as usize]).is_err()
            || from_utf8(&buf[code.0 as usize..code.1 as usize]).is_err()
        {
            return Err(err_protocol!("error response fields are not UTF-8"));
        }

        Ok(Self {
            severity,
            message,
            code,
            storage: buf,
        })
    }
}

/// An iterator over each field in an Error (or Notice) response.
struct Fields<'a> {
    storage: &'a [u8],
    offset: u16,
}

impl<'a> Iterator for Fields<'a> {
    type Item = (u8, (u16, u16));

    fn next(&mut self) -> Option<Self::Item> {
        // The fields in the response body are sequentially stored as
        // [tag][string], ending in a final, additional [nul]

        let ty = *self.storage.get(self.offset as usize)?;

        if ty == 0 {
            return None;
        }

        let nul = memchr(b'\0', self.storage.get((self.offset + 1) as usize..)?)? as u16;
        let offset = self.offset;

        self.offset += nul + 2;

        Some((ty, (offset + 1, offset + nul + 1)))
    }
}
