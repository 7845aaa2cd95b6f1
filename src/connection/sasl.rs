use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::connection::stream::PgStream;
use crate::error::Error;
use crate::message::{
    Authentication, AuthenticationSasl, MessageFormat, SaslInitialResponse, SaslResponse,
};

const SCRAM_SHA_256: &str = "SCRAM-SHA-256";
const SCRAM_SHA_256_PLUS: &str = "SCRAM-SHA-256-PLUS";

// channel-binding prefixes for the GS2 header:
//   "n" - client does not support channel binding
//   "y" - client supports it but believes the server does not
//   "p" - client requires it, naming the binding type
const GS2_NO_BINDING: &str = "n,,";
const GS2_BINDING_SUPPORTED: &str = "y,,";
const GS2_TLS_SERVER_END_POINT: &str = "p=tls-server-end-point,,";

/// Run the client side of a SCRAM-SHA-256(-PLUS) exchange.
///
/// `SCRAM-SHA-256-PLUS` is selected only when the session is TLS *and* the
/// TLS backend exposes the server certificate to bind to. If the server
/// advertises `-PLUS` and the binding data is unavailable, authentication
/// fails outright rather than silently downgrading; a downgrade here is
/// exactly what channel binding exists to detect.
pub(super) async fn authenticate(
    stream: &mut PgStream,
    username: &str,
    password: &str,
    data: AuthenticationSasl,
) -> Result<(), Error> {
    let mut offers_plus = false;
    let mut offers_plain = false;

    for mechanism in data.mechanisms() {
        match mechanism {
            SCRAM_SHA_256 => offers_plain = true,
            SCRAM_SHA_256_PLUS => offers_plus = true,
            _ => {}
        }
    }

    let end_point = stream.tls_server_end_point();

    let (mechanism, gs2_header, cbind_data) = if stream.is_tls() && offers_plus {
        match end_point {
            Some(data) => (SCRAM_SHA_256_PLUS, GS2_TLS_SERVER_END_POINT, Some(data)),

            None => {
                return Err(Error::Authentication(
                    "server offered SCRAM-SHA-256-PLUS but the TLS backend does not expose \
                     channel-binding data"
                        .into(),
                ));
            }
        }
    } else if offers_plain {
        if end_point.is_some() {
            (SCRAM_SHA_256, GS2_BINDING_SUPPORTED, None)
        } else {
            (SCRAM_SHA_256, GS2_NO_BINDING, None)
        }
    } else {
        return Err(Error::UnsupportedAuthMethod(format!(
            "no supported SASL mechanism offered: {:?}",
            data.mechanisms().collect::<Vec<_>>()
        )));
    };

    let nonce = gen_nonce();
    let client_first_bare = format!("n={},r={}", escape_name(username), nonce);
    let client_first = format!("{gs2_header}{client_first_bare}");

    stream.write_with_hint(
        SaslInitialResponse {
            mechanism,
            data: client_first.as_bytes(),
        },
        Some("SASLInitialResponse"),
    )?;
    stream.flush().await?;

    let server_first = match stream
        .recv_expect::<Authentication>(MessageFormat::Authentication)
        .await?
    {
        Authentication::SaslContinue(data) => String::from_utf8(data.to_vec())
            .map_err(|_| err_protocol!("SASL challenge is not UTF-8"))?,

        other => {
            return Err(err_protocol!(
                "expected SASLContinue but received Authentication{}",
                other.name()
            ));
        }
    };

    let (client_final, expected_server_signature) = client_final_message(
        password,
        gs2_header,
        cbind_data.as_deref(),
        &client_first_bare,
        &nonce,
        &server_first,
    )?;

    stream.write_with_hint(
        SaslResponse(client_final.as_bytes()),
        Some("SASLResponse"),
    )?;
    stream.flush().await?;

    let server_final = match stream
        .recv_expect::<Authentication>(MessageFormat::Authentication)
        .await?
    {
        Authentication::SaslFinal(data) => String::from_utf8(data.to_vec())
            .map_err(|_| err_protocol!("SASL verifier is not UTF-8"))?,

        other => {
            return Err(err_protocol!(
                "expected SASLFinal but received Authentication{}",
                other.name()
            ));
        }
    };

    let verifier = server_final
        .split(',')
        .find_map(|attr| attr.strip_prefix("v="))
        .ok_or_else(|| err_protocol!("SASL verifier is missing from the final message"))?;

    let verifier = BASE64
        .decode(verifier)
        .map_err(|_| err_protocol!("SASL verifier is not valid base64"))?;

    // an attacker able to intercept the exchange could fake everything up
    // to this point; the server signature is the server's proof that it
    // actually knows the (salted) password
    if verifier != expected_server_signature {
        return Err(Error::Authentication(
            "SCRAM server signature mismatch".into(),
        ));
    }

    // Authentication::Ok follows; the caller's startup loop consumes it
    Ok(())
}

// Nonce is a sequence of random printable ASCII characters excluding ','
fn gen_nonce() -> String {
    let mut rng = rand::thread_rng();
    let raw: [u8; 18] = rng.gen();

    // base64 output is printable and never contains ','
    BASE64.encode(raw)
}

// "=" and "," inside a SASL name are escaped as =3D and =2C
fn escape_name(name: &str) -> String {
    name.replace('=', "=3D").replace(',', "=2C")
}

/// Compute the client-final message for a SCRAM exchange, along with the
/// server signature we must observe in the server-final message.
fn client_final_message(
    password: &str,
    gs2_header: &str,
    cbind_data: Option<&[u8]>,
    client_first_bare: &str,
    client_nonce: &str,
    server_first: &str,
) -> Result<(String, Vec<u8>), Error> {
    let mut server_nonce = None;
    let mut salt = None;
    let mut iterations = None;

    for attr in server_first.split(',') {
        if let Some(r) = attr.strip_prefix("r=") {
            server_nonce = Some(r);
        } else if let Some(s) = attr.strip_prefix("s=") {
            salt = Some(s);
        } else if let Some(i) = attr.strip_prefix("i=") {
            iterations = Some(i);
        }
    }

    let server_nonce =
        server_nonce.ok_or_else(|| err_protocol!("SASL challenge is missing a nonce"))?;

    if !server_nonce.starts_with(client_nonce) {
        return Err(Error::Authentication(
            "SCRAM server nonce does not extend the client nonce".into(),
        ));
    }

    let salt = BASE64
        .decode(salt.ok_or_else(|| err_protocol!("SASL challenge is missing a salt"))?)
        .map_err(|_| err_protocol!("SASL salt is not valid base64"))?;

    let iterations: u32 = iterations
        .and_then(|i| i.parse().ok())
        .ok_or_else(|| err_protocol!("SASL challenge is missing an iteration count"))?;

    // SaltedPassword := Hi(Normalize(password), salt, i)
    let normalized = stringprep::saslprep(password)
        .map(|prepped| prepped.into_owned())
        .unwrap_or_else(|_| password.to_owned());

    let salted_password = hi(normalized.as_bytes(), &salt, iterations);

    // ClientKey := HMAC(SaltedPassword, "Client Key")
    let client_key = hmac_sha256(&salted_password, b"Client Key");

    // StoredKey := H(ClientKey)
    let stored_key = Sha256::digest(client_key);

    // channel-binding = "c=" base64(gs2-header [ cbind-data ])
    let mut cbind_input = gs2_header.as_bytes().to_vec();
    cbind_input.extend_from_slice(cbind_data.unwrap_or_default());
    let channel_binding = format!("c={}", BASE64.encode(&cbind_input));

    let client_final_without_proof = format!("{channel_binding},r={server_nonce}");

    // AuthMessage := client-first-message-bare + "," +
    //                server-first-message + "," +
    //                client-final-message-without-proof
    let auth_message =
        format!("{client_first_bare},{server_first},{client_final_without_proof}");

    // ClientSignature := HMAC(StoredKey, AuthMessage)
    let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes());

    // ClientProof := ClientKey XOR ClientSignature
    let mut client_proof = client_key;
    for (proof, signature) in client_proof.iter_mut().zip(client_signature.iter()) {
        *proof ^= signature;
    }

    // ServerSignature := HMAC(HMAC(SaltedPassword, "Server Key"), AuthMessage)
    let server_key = hmac_sha256(&salted_password, b"Server Key");
    let server_signature = hmac_sha256(&server_key, auth_message.as_bytes());

    let client_final = format!(
        "{client_final_without_proof},p={}",
        BASE64.encode(client_proof)
    );

    Ok((client_final, server_signature.to_vec()))
}

// Hi(str, salt, i) = PBKDF2-HMAC-SHA-256 with a single 32-byte block
fn hi(password: &[u8], salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut mac = Hmac::<Sha256>::new_from_slice(password)
        .expect("HMAC is able to accept all key sizes");

    mac.update(salt);
    mac.update(&1_u32.to_be_bytes());

    let mut u = mac.finalize_reset().into_bytes();
    let mut hi = u;

    for _ in 1..iterations {
        mac.update(&u);
        u = mac.finalize_reset().into_bytes();

        for (hi, u) in hi.iter_mut().zip(u.iter()) {
            *hi ^= u;
        }
    }

    hi.into()
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key).expect("HMAC is able to accept all key sizes");

    mac.update(data);

    mac.finalize().into_bytes().into()
}

#[cfg(test)]
mod tests {
    use super::{client_final_message, escape_name, hi};
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;

    // Test vector from RFC 7677 §3.
    const CLIENT_FIRST_BARE: &str = "n=user,r=rOprNGfwEbeRWgbNEkqO";
    const CLIENT_NONCE: &str = "rOprNGfwEbeRWgbNEkqO";
    const SERVER_FIRST: &str =
        "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";

    #[test]
    fn it_computes_the_rfc7677_proof() {
        let (client_final, server_signature) = client_final_message(
            "pencil",
            "n,,",
            None,
            CLIENT_FIRST_BARE,
            CLIENT_NONCE,
            SERVER_FIRST,
        )
        .unwrap();

        assert_eq!(
            client_final,
            "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
             p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ="
        );

        assert_eq!(
            BASE64.encode(server_signature),
            "6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4="
        );
    }

    #[test]
    fn it_rejects_a_nonce_that_does_not_extend_ours() {
        let result = client_final_message(
            "pencil",
            "n,,",
            None,
            CLIENT_FIRST_BARE,
            "someothernonce",
            SERVER_FIRST,
        );

        assert!(result.is_err());
    }

    #[test]
    fn hi_is_order_sensitive() {
        // a sanity check that the PBKDF2 loop actually iterates
        let salt = BASE64.decode("W22ZaJ0SNY7soEsUEjb6gQ==").unwrap();

        assert_ne!(hi(b"pencil", &salt, 1), hi(b"pencil", &salt, 2));
        assert_ne!(hi(b"pencil", &salt, 4096), hi(b"pencil", &salt, 4095));
    }

    #[test]
    fn it_escapes_sasl_names() {
        assert_eq!(escape_name("a=b,c"), "a=3Db=2Cc");
    }

    #[test]
    fn channel_binding_data_lands_in_the_c_attribute() {
        let (client_final, _) = client_final_message(
            "pencil",
            "p=tls-server-end-point,,",
            Some(b"\x01\x02\x03"),
            CLIENT_FIRST_BARE,
            CLIENT_NONCE,
            SERVER_FIRST,
        )
        .unwrap();

        let expected = BASE64.encode(b"p=tls-server-end-point,,\x01\x02\x03");
        assert!(client_final.starts_with(&format!("c={expected}")));
    }
}
