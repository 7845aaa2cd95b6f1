use std::str::from_utf8;

use bytes::{Buf, Bytes};
use memchr::memchr;

use crate::error::Error;
use crate::io::Decode;

// On startup, the server sends an appropriate authentication request
// message, to which the frontend must reply with an appropriate
// authentication response message (such as a password).

// For GSSAPI, SSPI and SASL, multiple exchanges of packets may be needed to
// complete the authentication.

// <https://www.postgresql.org/docs/current/protocol-flow.html#PROTOCOL-FLOW-START-UP>

#[derive(Debug)]
pub enum Authentication {
    /// The authentication exchange is successfully completed.
    Ok,

    /// The frontend must now send a [`Password`] containing the password in
    /// clear-text form.
    ///
    /// [`Password`]: super::Password
    CleartextPassword,

    /// The frontend must now send a [`Password`] containing the password
    /// (with user name) encrypted via MD5, then encrypted again using the
    /// 4-byte random salt.
    ///
    /// [`Password`]: super::Password
    Md5Password(AuthenticationMd5Password),

    /// The frontend must now initiate a SASL negotiation, using one of the
    /// SASL mechanisms listed in the message.
    ///
    /// The frontend will send a [`SaslInitialResponse`] with the name of
    /// the selected mechanism, and the first part of the SASL data stream.
    ///
    /// [`SaslInitialResponse`]: super::SaslInitialResponse
    Sasl(AuthenticationSasl),

    /// This message contains challenge data from the previous step of the
    /// SASL negotiation; the frontend must respond with a [`SaslResponse`].
    ///
    /// [`SaslResponse`]: super::SaslResponse
    SaslContinue(Bytes),

    /// SASL authentication has completed with additional mechanism-specific
    /// data for the client. [`Authentication::Ok`] follows on success.
    SaslFinal(Bytes),

    /// Methods this crate does not speak; surfaced so the caller gets a
    /// typed "unsupported" error instead of a framing failure.
    KerberosV5,
    ScmCredential,
    Gss,
    GssContinue(Bytes),
    Sspi,
}

impl Authentication {
    /// The name of the authentication request, for error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Authentication::Ok => "Ok",
            Authentication::CleartextPassword => "CleartextPassword",
            Authentication::Md5Password(_) => "MD5Password",
            Authentication::Sasl(_) => "SASL",
            Authentication::SaslContinue(_) => "SASLContinue",
            Authentication::SaslFinal(_) => "SASLFinal",
            Authentication::KerberosV5 => "KerberosV5",
            Authentication::ScmCredential => "SCMCredential",
            Authentication::Gss => "GSS",
            Authentication::GssContinue(_) => "GSSContinue",
            Authentication::Sspi => "SSPI",
        }
    }
}

impl Decode for Authentication {
    fn decode(mut buf: Bytes) -> Result<Self, Error> {
        if buf.remaining() < 4 {
            return Err(err_protocol!("authentication message body too short"));
        }

        Ok(match buf.get_u32() {
            0 => Authentication::Ok,

            2 => Authentication::KerberosV5,

            3 => Authentication::CleartextPassword,

            5 => {
                if buf.remaining() < 4 {
                    return Err(err_protocol!("AuthenticationMD5Password is missing salt"));
                }

                let mut salt = [0; 4];
                buf.copy_to_slice(&mut salt);

                Authentication::Md5Password(AuthenticationMd5Password { salt })
            }

            6 => Authentication::ScmCredential,

            7 => Authentication::Gss,

            8 => Authentication::GssContinue(buf),

            9 => Authentication::Sspi,

            10 => Authentication::Sasl(AuthenticationSasl(buf)),

            11 => Authentication::SaslContinue(buf),

            12 => Authentication::SaslFinal(buf),

            ty => {
                return Err(err_protocol!("unknown authentication method: {}", ty));
            }
        })
    }
}

/// Body of [`Authentication::Md5Password`].
#[derive(Debug)]
pub struct AuthenticationMd5Password {
    pub salt: [u8; 4],
}

/// Body of [`Authentication::Sasl`].
#[derive(Debug)]
pub struct AuthenticationSasl(Bytes);

impl AuthenticationSasl {
    #[inline]
    pub fn mechanisms(&self) -> SaslMechanisms<'_> {
        SaslMechanisms(&self.0)
    }
}

/// An iterator over the SASL authentication mechanisms provided by the
/// server.
pub struct SaslMechanisms<'a>(&'a [u8]);

impl<'a> Iterator for SaslMechanisms<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let mechanism = memchr(b'\0', self.0).and_then(|nul| from_utf8(&self.0[..nul]).ok())?;

        if mechanism.is_empty() {
            return None;
        }

        self.0 = &self.0[(mechanism.len() + 1)..];

        Some(mechanism)
    }
}

#[cfg(test)]
mod tests {
    use super::{Authentication, Decode};
    use bytes::Bytes;

    #[test]
    fn it_decodes_authentication_ok() {
        let m = Authentication::decode(Bytes::from_static(b"\0\0\0\0")).unwrap();

        assert!(matches!(m, Authentication::Ok));
    }

    #[test]
    fn it_decodes_md5_password_salt() {
        let m = Authentication::decode(Bytes::from_static(b"\0\0\0\x05\x93\x189\x98")).unwrap();

        match m {
            Authentication::Md5Password(body) => assert_eq!(body.salt, [147, 24, 57, 152]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn it_lists_sasl_mechanisms() {
        let m = Authentication::decode(Bytes::from_static(
            b"\0\0\0\x0aSCRAM-SHA-256-PLUS\0SCRAM-SHA-256\0\0",
        ))
        .unwrap();

        match m {
            Authentication::Sasl(body) => {
                let mechanisms: Vec<_> = body.mechanisms().collect();
                assert_eq!(mechanisms, ["SCRAM-SHA-256-PLUS", "SCRAM-SHA-256"]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
