use md5::{Digest, Md5};

use crate::error::Error;
use crate::io::{BufMutExt, Encode, PgBufMutExt};

/// The password response to [`Authentication::CleartextPassword`] or
/// [`Authentication::Md5Password`].
///
/// [`Authentication::CleartextPassword`]: super::Authentication::CleartextPassword
/// [`Authentication::Md5Password`]: super::Authentication::Md5Password
#[derive(Debug)]
pub enum Password<'a> {
    Cleartext(&'a str),

    Md5 {
        password: &'a str,
        username: &'a str,
        salt: [u8; 4],
    },
}

impl Encode for Password<'_> {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), Error> {
        buf.push(b'p');

        buf.put_length_prefixed(|buf| {
            match self {
                Password::Cleartext(password) => {
                    buf.put_str_nul(password);
                }

                Password::Md5 {
                    password,
                    username,
                    salt,
                } => {
                    // The actual `PasswordMessage` can be computed in SQL as
                    // `concat('md5', md5(concat(md5(concat(password, username)), random-salt)))`.

                    // Keep in mind the md5() function returns its result as
                    // a hex string.

                    let mut hasher = Md5::new();

                    hasher.update(password);
                    hasher.update(username);

                    let credentials = format!("{:x}", hasher.finalize_reset());

                    hasher.update(credentials);
                    hasher.update(salt);

                    let salted = format!("{:x}", hasher.finalize());

                    buf.extend_from_slice(b"md5");
                    buf.put_str_nul(&salted);
                }
            }

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Password;
    use crate::io::Encode;

    #[test]
    fn it_encodes_password_cleartext() {
        let mut buf = Vec::new();

        Password::Cleartext("password").encode(&mut buf).unwrap();

        assert_eq!(buf, b"p\0\0\0\rpassword\0");
    }

    #[test]
    fn it_encodes_password_md5() {
        let mut buf = Vec::new();

        Password::Md5 {
            password: "password",
            username: "root",
            salt: [147, 24, 57, 152],
        }
        .encode(&mut buf)
        .unwrap();

        assert_eq!(buf, &b"p\0\0\0(md53e2c9d99d49b201ef867a36f3f9ed62c\0"[..]);
    }
}
