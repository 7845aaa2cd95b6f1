use std::str::FromStr;

use crate::error::Error;

/// Options for controlling the level of protection provided for PostgreSQL
/// connections, mirroring libpq's `sslmode`.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, PartialOrd, Ord)]
pub enum PgSslMode {
    /// Only try a non-SSL connection.
    Disable,

    /// First try a non-SSL connection; if that fails, try an SSL
    /// connection.
    Allow,

    /// First try an SSL connection; if that fails, try a non-SSL
    /// connection.
    #[default]
    Prefer,

    /// Only try an SSL connection. If a root CA file is present, verify
    /// the connection in the same way as if `VerifyCa` was specified.
    Require,

    /// Only try an SSL connection, and verify that the server certificate
    /// is issued by a trusted certificate authority (CA).
    VerifyCa,

    /// Only try an SSL connection; verify that the server certificate is
    /// issued by a trusted CA and that the requested server host name
    /// matches that in the certificate.
    VerifyFull,
}

impl PgSslMode {
    /// TLS is attempted for this mode.
    pub(crate) fn wants_tls(self) -> bool {
        !matches!(self, PgSslMode::Disable)
    }

    /// A refused or failed TLS negotiation is fatal for this mode.
    pub(crate) fn requires_tls(self) -> bool {
        matches!(
            self,
            PgSslMode::Require | PgSslMode::VerifyCa | PgSslMode::VerifyFull
        )
    }
}

impl FromStr for PgSslMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Ok(match &*s.to_ascii_lowercase() {
            "disable" => PgSslMode::Disable,
            "allow" => PgSslMode::Allow,
            "prefer" => PgSslMode::Prefer,
            "require" => PgSslMode::Require,
            "verify-ca" => PgSslMode::VerifyCa,
            "verify-full" => PgSslMode::VerifyFull,

            _ => {
                return Err(Error::config(format!(
                    "unknown value {s:?} for `ssl_mode`"
                )));
            }
        })
    }
}
